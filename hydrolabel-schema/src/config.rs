//! Configuration loading and data root resolution

use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use crate::{Error, Result};

/// Environment variable overriding the data root folder
pub const ROOT_ENV_VAR: &str = "HYDROLABEL_ROOT";

/// Optional TOML configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Folder relative paths in documents are resolved against
    pub data_root: Option<PathBuf>,
    /// Taxonomy snapshot to validate labels against
    pub taxonomy_path: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset
    pub log_level: Option<String>,
}

/// Data root resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. HYDROLABEL_ROOT environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_root(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    match load_toml_config() {
        Ok(config) => {
            if let Some(root) = config.data_root {
                return root;
            }
        }
        Err(Error::Config(_)) => {} // no config file is fine
        Err(e) => warn!(error = %e, "ignoring unreadable config file"),
    }

    // Priority 4: OS-dependent compiled default
    default_data_root()
}

/// Load the TOML configuration, if a config file exists
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = find_config_file()?;
    let raw = std::fs::read_to_string(&path)?;
    toml::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))
}

/// Locate the configuration file for the platform
fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/hydrolabel/config.toml first, then /etc/hydrolabel/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("hydrolabel").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/hydrolabel/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("hydrolabel").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )))
        }
    }
}

/// OS-dependent default data root folder
fn default_data_root() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("hydrolabel"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\hydrolabel"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("hydrolabel"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/hydrolabel"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("hydrolabel"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/hydrolabel"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cli_argument_wins() {
        std::env::set_var(ROOT_ENV_VAR, "/from/env");
        let root = resolve_data_root(Some("/from/cli"));
        std::env::remove_var(ROOT_ENV_VAR);
        assert_eq!(root, PathBuf::from("/from/cli"));
    }

    #[test]
    #[serial]
    fn test_env_var_beats_default() {
        std::env::set_var(ROOT_ENV_VAR, "/from/env");
        let root = resolve_data_root(None);
        std::env::remove_var(ROOT_ENV_VAR);
        assert_eq!(root, PathBuf::from("/from/env"));
    }

    #[test]
    #[serial]
    fn test_empty_env_var_ignored() {
        std::env::set_var(ROOT_ENV_VAR, "");
        let root = resolve_data_root(None);
        std::env::remove_var(ROOT_ENV_VAR);
        assert!(!root.as_os_str().is_empty());
    }

    #[test]
    #[serial]
    fn test_default_root_is_nonempty() {
        std::env::remove_var(ROOT_ENV_VAR);
        let root = resolve_data_root(None);
        assert!(!root.as_os_str().is_empty());
    }

    #[test]
    fn test_toml_config_decodes() {
        let config: TomlConfig = toml::from_str(
            "data_root = \"/data/hydrolabel\"\nlog_level = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(config.data_root, Some(PathBuf::from("/data/hydrolabel")));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(config.taxonomy_path.is_none());
    }

    #[test]
    fn test_toml_config_empty_is_valid() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert!(config.data_root.is_none());
    }
}
