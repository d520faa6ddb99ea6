//! Secret lookup for service credentials.
//!
//! A secret may be given inline, read from a file (Docker secrets) or taken
//! from a named environment variable. The first non-empty source wins.

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Failed to read secret from file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },
}

/// Where a secret may come from, in priority order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecretSource<'a> {
    pub direct: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl SecretSource<'_> {
    /// Resolves the secret, or `None` when no source is configured.
    pub fn resolve(&self) -> Result<Option<SecretString>, SecretError> {
        if let Some(value) = non_empty(self.direct) {
            return Ok(Some(SecretString::from(value.to_string())));
        }

        if let Some(path) = non_empty(self.file) {
            let expanded = expand_home(path);
            let content =
                std::fs::read_to_string(&expanded).map_err(|source| SecretError::FileRead {
                    path: expanded.clone(),
                    source,
                })?;
            return Ok(Some(SecretString::from(content.trim().to_string())));
        }

        if let Some(name) = non_empty(self.env_var) {
            return match std::env::var(name) {
                Ok(value) => Ok(Some(SecretString::from(value.trim().to_string()))),
                Err(_) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
            };
        }

        Ok(None)
    }
}

pub fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest).display().to_string())
            .unwrap_or_else(|| path.to_string()),
        None => path.to_string(),
    }
}
