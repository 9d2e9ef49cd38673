//! Server configuration, loaded from a TOML file.
//!
//! Every field has a default, so a missing file or a partial one is fine:
//!
//! ```toml
//! world_dir = "world"
//! autosave_secs = 300
//!
//! [transmission]
//! base_loss_per_block = 0.02
//! integrity_check_on_load = true
//!
//! [transmission.kinds.prism]
//! max_range = 32.0
//! obstruction_tolerance = 2
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use starlight_engine::TransmissionConfig;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root of the world save. Starlight caches go under `<world_dir>/starlight`.
    pub world_dir: PathBuf,
    /// Seconds between autosaves in `--serve` mode.
    pub autosave_secs: u64,
    /// Write cache files on a background task instead of inline.
    pub queued_writes: bool,
    pub transmission: TransmissionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("world"),
            autosave_secs: 300,
            queued_writes: true,
            transmission: TransmissionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = ServerConfig::parse(
            r#"
            autosave_secs = 60

            [transmission]
            parallel_rebuild = true

            [transmission.kinds.prism]
            max_range = 32.0
            obstruction_tolerance = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.autosave_secs, 60);
        assert_eq!(config.world_dir, PathBuf::from("world"));
        assert!(config.transmission.parallel_rebuild);
        assert_eq!(config.transmission.kinds.prism.max_range, 32.0);
        assert_eq!(config.transmission.kinds.prism.obstruction_tolerance, 2);
        assert_eq!(config.transmission.kinds.relay.max_range, 16.0);
        assert_eq!(config.transmission.base_loss_per_block, 0.02);
    }

    #[test]
    fn missing_file_is_default() {
        let path = std::env::temp_dir().join("starlight_test_no_such_config.toml");
        let _ = fs::remove_file(&path);
        assert_eq!(ServerConfig::load(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(ServerConfig::parse("autosave_secs = \"soon\"").is_err());
    }
}
