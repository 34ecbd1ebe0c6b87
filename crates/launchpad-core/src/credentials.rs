use std::fmt;

use crate::error::{ResourceError, Result};

/// Username and optional password pulled from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Resolve credentials from the process environment.
///
/// The username variable must be set; the password is optional, both when no
/// variable name is configured and when the named variable is unset.
pub fn get_user_pw(user_var: &str, password_var: Option<&str>) -> Result<Credentials> {
    resolve_credentials(user_var, password_var, |name| std::env::var(name).ok())
}

/// Same policy as [`get_user_pw`], reading variables through `lookup`.
pub fn resolve_credentials<F>(
    user_var: &str,
    password_var: Option<&str>,
    lookup: F,
) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let user = lookup(user_var).ok_or_else(|| ResourceError::MissingCredential {
        var: user_var.to_string(),
    })?;
    let password = password_var.and_then(|name| lookup(name));

    Ok(Credentials { user, password })
}
