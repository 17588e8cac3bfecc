//! Engine configuration.
//!
//! Deployment-level identity of one engine instance: who the principal is,
//! which account's operations are being authorized, and which chain the
//! typed-data domain binds signatures to.
//!
//! ```yaml
//! principal: "0x52908400098527886e0f7030069857d2e4169ee7"
//! account: "0x8617e340b3d01fa5f11f306f4090fd50e238070d"
//! chain_id: 1
//! ```

use std::path::Path;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Configuration errors surfaced while loading or validating.
#[derive(Debug)]
pub enum ConfigError {
    /// YAML syntax or shape did not match the expected structure.
    YamlParse(serde_yaml::Error),
    /// The configuration file could not be read.
    FileRead(String, std::io::Error),
    /// The configuration parsed but fails a semantic check.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::YamlParse(e) => write!(f, "failed to parse configuration: {}", e),
            ConfigError::FileRead(path, e) => {
                write!(f, "failed to read configuration file '{}': {}", path, e)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Identity of one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The principal identity. Only this caller may administer sub-agents,
    /// grants, budgets, and revocations.
    pub principal: Address,
    /// The account whose operations are authorized and whose balances the
    /// session post-check observes. Also the verifying address in the
    /// typed-data domain.
    pub account: Address,
    /// Chain the typed-data domain binds signatures to.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

fn default_chain_id() -> u64 {
    1
}

impl EngineConfig {
    pub fn new(principal: Address, account: Address, chain_id: u64) -> Self {
        Self {
            principal,
            account,
            chain_id,
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml).map_err(ConfigError::YamlParse)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.display().to_string(), e))?;
        Self::from_yaml(&contents)
    }

    /// Semantic checks beyond YAML shape.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.principal == Address::ZERO {
            return Err(ConfigError::Invalid(
                "principal must not be the zero address".to_string(),
            ));
        }
        if self.account == Address::ZERO {
            return Err(ConfigError::Invalid(
                "account must not be the zero address".to_string(),
            ));
        }
        if self.chain_id == 0 {
            return Err(ConfigError::Invalid("chain_id must be non-zero".to_string()));
        }
        Ok(())
    }
}
