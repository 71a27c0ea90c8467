use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::NodeConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Merge `patch` into `base` recursively: objects merge key by key, any
/// other value (arrays included) replaces wholesale.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) if base_value.is_object() && patch_value.is_object() => {
                        deep_merge(base_value, patch_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// JSON config persistence. Writes go through a temp file and rename so a
/// power cut mid-write never corrupts the live file, and the previous
/// version is kept as a backup for recovery.
pub struct ConfigStore {
    path: PathBuf,
    temp_path: PathBuf,
    backup_path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let temp_path = with_suffix(&path, ".tmp");
        let backup_path = with_suffix(&path, ".bak");
        Self {
            path,
            temp_path,
            backup_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the live file, falling back to the backup (restoring it as the
    /// new live copy), and finally to the built-in defaults. Corruption is
    /// logged and swallowed; boot must never fail on a bad config file.
    pub fn load(&self) -> NodeConfig {
        if let Some(config) = self.parse_file(&self.path) {
            return config;
        }

        if let Some(config) = self.parse_file(&self.backup_path) {
            warn!("config: live file unusable, restoring from backup");
            if let Err(err) = fs::copy(&self.backup_path, &self.path) {
                warn!("config: backup restore failed: {err}");
            }
            return config;
        }

        info!("config: no usable file, using defaults");
        NodeConfig::default()
    }

    /// Persist the document: back up the current live file, write the new
    /// content to a temp file, then rename over the live path.
    pub fn save(&self, config: &NodeConfig) -> Result<(), ConfigError> {
        let value = serde_json::to_value(config)?;
        self.save_value(&value)
    }

    /// Apply a partial document on top of the stored one and persist the
    /// result. Returns the merged, typed configuration.
    pub fn update(&self, patch: &Value) -> Result<NodeConfig, ConfigError> {
        let mut value = serde_json::to_value(self.load())?;
        deep_merge(&mut value, patch);
        let merged: NodeConfig = serde_json::from_value(value.clone())?;
        self.save_value(&value)?;
        Ok(merged)
    }

    /// Remove the live file, backup, and any leftover temp file.
    pub fn delete(&self) {
        for path in [&self.path, &self.backup_path, &self.temp_path] {
            if path.exists() {
                if let Err(err) = fs::remove_file(path) {
                    warn!("config: failed to remove {}: {err}", path.display());
                }
            }
        }
    }

    fn save_value(&self, value: &Value) -> Result<(), ConfigError> {
        if self.path.exists() {
            fs::copy(&self.path, &self.backup_path)?;
        }

        let serialized = serde_json::to_vec_pretty(value)?;
        let result = (|| {
            let mut file = fs::File::create(&self.temp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
            fs::rename(&self.temp_path, &self.path)
        })();

        if let Err(err) = result {
            // Leave no stale temp file behind on failure.
            let _ = fs::remove_file(&self.temp_path);
            return Err(err.into());
        }
        info!("config: saved {}", self.path.display());
        Ok(())
    }

    fn parse_file(&self, path: &Path) -> Option<NodeConfig> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!("config: {} is malformed: {err}", path.display());
                None
            }
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
