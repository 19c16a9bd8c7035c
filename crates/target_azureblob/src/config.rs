use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::TargetError;

/// Keys recognised in the `--config` JSON file. Anything else is ignored.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    account_name: Option<String>,
    #[serde(default)]
    account_key: Option<String>,
    #[serde(default)]
    container_name: Option<String>,
    #[serde(default)]
    disable_collection: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub container_name: String,
    pub disable_collection: bool,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("container_name", &self.container_name)
            .field("disable_collection", &self.disable_collection)
            .finish()
    }
}

impl TargetConfig {
    /// Loads the config file, or an empty config when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, TargetError> {
        let raw = match path {
            Some(path) => {
                let bytes = fs::read(path).map_err(|err| {
                    TargetError::Config(format!("failed to read `{}`: {err}", path.display()))
                })?;
                serde_json::from_slice::<RawConfig>(&bytes).map_err(|err| {
                    TargetError::Config(format!("failed to parse `{}`: {err}", path.display()))
                })?
            }
            None => RawConfig::default(),
        };
        Self::from_raw(raw)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, TargetError> {
        let raw = serde_json::from_value::<RawConfig>(value)
            .map_err(|err| TargetError::Config(err.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, TargetError> {
        let container_name = raw
            .container_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| TargetError::Config("`container_name` is required".to_string()))?;
        Ok(Self {
            account_name: raw.account_name,
            account_key: raw.account_key,
            container_name,
            disable_collection: raw.disable_collection,
        })
    }

    /// Default local staging directory: `$HOME/<container_name>`.
    pub fn default_staging_dir(&self) -> PathBuf {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        home.join(&self.container_name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn recognised_keys_are_read_and_others_ignored() {
        let config = TargetConfig::from_json(json!({
            "account_name": "acct",
            "account_key": "secret",
            "container_name": "landing",
            "disable_collection": true,
            "unrelated": 1
        }))
        .unwrap();

        assert_eq!(config.account_name.as_deref(), Some("acct"));
        assert_eq!(config.container_name, "landing");
        assert!(config.disable_collection);
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn container_name_is_required() {
        assert!(matches!(
            TargetConfig::from_json(json!({"account_name": "acct"})),
            Err(TargetError::Config(_))
        ));
        assert!(TargetConfig::from_json(json!({"container_name": "  "})).is_err());
        assert!(TargetConfig::load(None).is_err());
    }

    #[test]
    fn collection_is_enabled_by_default() {
        let config = TargetConfig::from_json(json!({"container_name": "c"})).unwrap();
        assert!(!config.disable_collection);
        assert!(config.default_staging_dir().ends_with("c"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"container_name": "from-file"}"#).unwrap();

        let config = TargetConfig::load(Some(&path)).unwrap();
        assert_eq!(config.container_name, "from-file");
    }
}
