//! Compiler configuration, loadable from TOML.
//!
//! ```toml
//! mtu = 244
//! omit_zero_scalars = true
//! blocks_context = 1
//! reset_before_load = false
//! annotate = true
//! ```

use emuflow_types::wire::DEFAULT_MTU;
use emuflow_types::MAX_CONTEXT_ID;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest MTU accepted. Splittable packets need room for their prefix
/// plus one record.
pub const MIN_MTU: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Upper bound of split packets (descriptors, scalar and array data),
    /// header byte included.
    pub mtu: usize,
    /// Skip scalar-data entries whose value is zero.
    pub omit_zero_scalars: bool,
    /// Context reserved for block outputs.
    pub blocks_context: u8,
    /// Prefix the dump with the reset-all order.
    pub reset_before_load: bool,
    /// Emit `# … #` comments in the dump text.
    pub annotate: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            omit_zero_scalars: true,
            blocks_context: 1,
            reset_before_load: false,
            annotate: true,
        }
    }
}

impl CompilerConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < MIN_MTU {
            return Err(ConfigError::Invalid(format!(
                "mtu {} is below the minimum of {MIN_MTU}",
                self.mtu
            )));
        }
        if self.blocks_context > MAX_CONTEXT_ID {
            return Err(ConfigError::Invalid(format!(
                "blocks_context {} is outside 0..={MAX_CONTEXT_ID}",
                self.blocks_context
            )));
        }
        Ok(())
    }
}
