pub mod backends;
pub mod config;
pub mod credentials;
pub mod error;
pub mod frame;
mod options;
pub mod registry;
pub mod resource;
pub mod resources;

pub use config::{DbmsConfig, LaunchpadConfig, Options, Params, ResourceConfig};
pub use error::{ResourceError, Result};
pub use registry::{BackendDescriptor, BackendRegistry, DbmsBinding};
pub use resource::{DataSink, DataSource, Raw, Resource, ResourceKind};
pub use resources::Resources;
