//! Engine configuration.
//!
//! Parsed from TOML:
//!
//! ```toml
//! ticket_hash_alg = "sha256"
//! max_sessions = 64
//! max_or_branches = 8
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Crypto;
use crate::tpm_types::TPM_ALG_ID;

/// Errors from loading an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

/// Tunables for [`crate::policy::PolicyEngine`] and
/// [`crate::session_table::SessionTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// HMAC hash for authorization and verification tickets
    #[serde(default = "default_ticket_hash_alg")]
    pub ticket_hash_alg: TPM_ALG_ID,

    /// Number of concurrently open sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Largest digest list accepted by PolicyOR
    #[serde(default = "default_max_or_branches")]
    pub max_or_branches: usize,
}

fn default_ticket_hash_alg() -> TPM_ALG_ID {
    TPM_ALG_ID::SHA256
}

fn default_max_sessions() -> usize {
    64
}

fn default_max_or_branches() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ticket_hash_alg: default_ticket_hash_alg(),
            max_sessions: default_max_sessions(),
            max_or_branches: default_max_or_branches(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Crypto::digest_size(self.ticket_hash_alg) == 0 {
            return Err(ConfigError::Validation(
                "ticket_hash_alg must name a hash algorithm".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        // PolicyOR needs at least two branches to mean anything
        if !(2..=8).contains(&self.max_or_branches) {
            return Err(ConfigError::Validation(
                "max_or_branches must be between 2 and 8".to_string(),
            ));
        }
        Ok(())
    }
}
