use anyhow::{anyhow, Result};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::ui::{print_command_status, CommandStatus};

/// Persistent defaults for `login`. Flags and environment variables win over
/// anything set here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub env_name: Option<String>,
    pub region: Option<String>,
    pub origin_url: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub fn global_config_dir() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("studio-login"));
    }
    dirs::home_dir()
        .map(|path| path.join(".config").join("studio-login"))
        .ok_or_else(|| anyhow!("$HOME not configured."))
}

pub fn global_path() -> Result<PathBuf> {
    Ok(global_config_dir()?.join("config.json"))
}

pub fn load_file(path: &Path) -> Config {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Config::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    let config: Config = match serde_json::from_str(&file_contents) {
        Ok(c) => c,
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    for key in config.extra.keys() {
        print_command_status(
            CommandStatus::Warning,
            &format!("unknown config key {} in {}", key, path.display()),
        );
    }

    config
}

pub fn load_global() -> Result<Config> {
    Ok(load_file(&global_path()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_file(&tmp.path().join("nonexistent.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_invalid_json_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("invalid.json");
        fs::write(&path, "not valid json {{{").unwrap();
        assert_eq!(load_file(&path), Config::default());
    }

    #[test]
    fn load_known_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{"env_name": "staging", "region": "eu-west-1", "port": 5000, "timeout_secs": 0}"#,
        )
        .unwrap();

        let config = load_file(&path);
        assert_eq!(config.env_name.as_deref(), Some("staging"));
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.port, Some(5000));
        assert_eq!(config.timeout_secs, Some(0));
        assert_eq!(config.origin_url, None);
    }

    #[test]
    fn load_unknown_keys_still_returns_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"region": "us-west-2", "unknown_field": "value"}"#).unwrap();

        let config = load_file(&path);
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert!(config.extra.contains_key("unknown_field"));
    }
}
