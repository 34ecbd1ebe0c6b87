// crates/launchpad/src/main.rs

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use launchpad_core::{
    BackendRegistry, LaunchpadConfig, Params, ResourceConfig, ResourceKind, Resources,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Read and write the data resources declared in a launchpad config", long_about = None)]
struct Cli {
    /// Path to the resource configuration (.toml or .json)
    #[arg(short, long, global = true, default_value = "launchpad.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured datasources and datasinks with the backend serving each
    List,
    /// Print the first rows of a datasource
    Head(HeadArgs),
    /// Read a datasource and store the result in a datasink
    Copy(CopyArgs),
}

#[derive(Args, Debug)]
struct HeadArgs {
    source: String,
    #[arg(short = 'n', long, default_value_t = 10)]
    rows: usize,
    /// Query parameters as key=value
    #[arg(short, long = "param")]
    params: Vec<String>,
}

#[derive(Args, Debug)]
struct CopyArgs {
    source: String,
    sink: String,
    /// Move the payload as raw text/bytes instead of a dataframe
    #[arg(long)]
    raw: bool,
    /// Query parameters as key=value
    #[arg(short, long = "param")]
    params: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = LaunchpadConfig::from_path(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    match cli.command {
        Command::List => {
            list(&config)?;
            Ok(())
        }
        Command::Head(args) => {
            let params = parse_params(&args.params)?;
            let mut resources = open(&config, &args.source, None)?;
            let result = resources
                .source(&args.source)
                .and_then(|source| source.get_dataframe(params.as_ref(), false));
            resources.close_all();
            let df = result.with_context(|| format!("failed to read '{}'", args.source))?;
            println!("{}", df.head(Some(args.rows)));
            Ok(())
        }
        Command::Copy(args) => {
            let params = parse_params(&args.params)?;
            let mut resources = open(&config, &args.source, Some(&args.sink))?;

            let result = copy(&mut resources, &args, params.as_ref());
            let failures = resources.close_all();
            if failures > 0 {
                warn!(failures, "some resources did not close cleanly");
            }
            result
        }
    }
}

fn list(config: &LaunchpadConfig) -> Result<()> {
    let registry = BackendRegistry::builtin();
    let mut table = Table::new();
    table.set_header(vec!["Kind", "Id", "Type", "Backend", "Location", "Tags"]);

    let entries = config
        .datasources
        .iter()
        .map(|(id, entry)| (ResourceKind::Source, id, entry))
        .chain(
            config
                .datasinks
                .iter()
                .map(|(id, entry)| (ResourceKind::Sink, id, entry)),
        );
    for (kind, id, entry) in entries {
        let backend = match registry.resolve(kind, id, entry, &config.dbms) {
            Ok((tag, _)) => registry
                .backend_for_tag(&tag)
                .map(|backend| backend.name.to_string())
                .unwrap_or_else(|| format!("<none for {tag}>")),
            Err(err) => format!("<{err}>"),
        };
        table.add_row(vec![
            kind.label().to_string(),
            id.clone(),
            entry.resource_type.clone(),
            backend,
            location(entry),
            entry.tags.join(", "),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn location(entry: &ResourceConfig) -> String {
    if let Some(path) = &entry.path {
        path.display().to_string()
    } else if let Some(table) = &entry.table {
        table.clone()
    } else if let Some(query) = &entry.query {
        query.clone()
    } else {
        String::new()
    }
}

fn copy(resources: &mut Resources, args: &CopyArgs, params: Option<&Params>) -> Result<()> {
    if args.raw {
        let raw = resources
            .source(&args.source)?
            .get_raw(params, false)
            .with_context(|| format!("failed to read '{}'", args.source))?;
        let bytes = raw.len();
        resources
            .sink(&args.sink)?
            .put_raw(raw, None, false)
            .with_context(|| format!("failed to write '{}'", args.sink))?;
        info!(source = %args.source, sink = %args.sink, bytes, "copied raw payload");
    } else {
        let df = resources
            .source(&args.source)?
            .get_dataframe(params, false)
            .with_context(|| format!("failed to read '{}'", args.source))?;
        resources
            .sink(&args.sink)?
            .put_dataframe(&df, None, false)
            .with_context(|| format!("failed to write '{}'", args.sink))?;
        info!(source = %args.source, sink = %args.sink, rows = df.height(), "copied dataframe");
    }
    Ok(())
}

/// Build just the resources a command touches, so unrelated database
/// connections are never opened.
fn open(config: &LaunchpadConfig, source_id: &str, sink_id: Option<&str>) -> Result<Resources> {
    let registry = BackendRegistry::builtin();
    let mut resources = Resources::default();

    let entry = lookup(&config.datasources, source_id, ResourceKind::Source)?;
    let source = registry
        .create_data_source(source_id, entry, &config.dbms)
        .with_context(|| format!("failed to open datasource '{source_id}'"))?;
    resources.insert_source(source);

    if let Some(sink_id) = sink_id {
        let entry = lookup(&config.datasinks, sink_id, ResourceKind::Sink)?;
        let sink = registry
            .create_data_sink(sink_id, entry, &config.dbms)
            .with_context(|| format!("failed to open datasink '{sink_id}'"))?;
        resources.insert_sink(sink);
    }
    Ok(resources)
}

fn lookup(
    entries: &std::collections::BTreeMap<String, ResourceConfig>,
    id: &str,
    kind: ResourceKind,
) -> Result<ResourceConfig> {
    entries
        .get(id)
        .cloned()
        .with_context(|| format!("no {kind} named '{id}' in the config"))
}

/// `key=value` pairs; values that parse as JSON keep their type, anything
/// else is passed as a string.
fn parse_params(pairs: &[String]) -> Result<Option<Params>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut params = Params::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("parameter '{pair}' is not key=value"))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(Some(params))
}
