use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::abi::{AbiVersion, RA_ABI_VERSION};
use crate::error::{RaError, RaResult};

/// Access layer configuration.
///
/// ```toml
/// abi_version = "1.0"
/// window_size = 65536
///
/// [scheme_aliases]
/// repo = "memory"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaConfig {
    /// ABI version requested from backends.
    pub abi_version: AbiVersion,
    /// Target bytes per text-delta window.
    pub window_size: usize,
    /// Extra URL scheme → registered backend name.
    pub scheme_aliases: BTreeMap<String, String>,
}

impl Default for RaConfig {
    fn default() -> Self {
        Self {
            abi_version: RA_ABI_VERSION,
            window_size: ra_delta::DEFAULT_WINDOW_SIZE,
            scheme_aliases: BTreeMap::new(),
        }
    }
}

impl RaConfig {
    pub fn from_toml_str(input: &str) -> RaResult<Self> {
        let config: RaConfig =
            toml::from_str(input).map_err(|e| RaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> RaResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| RaError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> RaResult<String> {
        toml::to_string(self).map_err(|e| RaError::Config(e.to_string()))
    }

    fn validate(&self) -> RaResult<()> {
        if self.window_size == 0 {
            return Err(RaError::Config("window_size must be positive".into()));
        }
        for (scheme, backend) in &self.scheme_aliases {
            if scheme.is_empty() || backend.is_empty() {
                return Err(RaError::Config(format!(
                    "empty scheme alias '{scheme}' -> '{backend}'"
                )));
            }
        }
        Ok(())
    }
}
