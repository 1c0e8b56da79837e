//! Environment-backed secrets
//!
//! Values come from the process environment, which `main` seeds from a `.env`
//! file via dotenvy before anything else runs.

use async_trait::async_trait;

use super::{SecretError, SecretSource};

/// Reads secrets from environment variables, optionally under a prefix
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets {
    prefix: Option<String>,
}

impl EnvSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `{prefix}{name}` instead of `name`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn var_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name.to_string(),
        }
    }
}

#[async_trait]
impl SecretSource for EnvSecrets {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        let var = self.var_name(name);
        match std::env::var(&var) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(SecretError::NotFound(var)),
        }
    }
}
