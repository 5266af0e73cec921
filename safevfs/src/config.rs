use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Mount settings, stored as `~/.config/safevfs/config.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SafeVfsConfig {
    pub fs_name: String,
    /// How long the kernel may cache attributes and entries.
    pub attr_ttl_secs: u64,
    pub max_write: u32,
    /// Mount through fusermount3 instead of requiring root.
    pub unprivileged: bool,
    pub allow_other: bool,
}

impl Default for SafeVfsConfig {
    fn default() -> Self {
        Self {
            fs_name: "safevfs".to_string(),
            attr_ttl_secs: 1,
            max_write: 1024 * 1024,
            unprivileged: true,
            allow_other: false,
        }
    }
}

impl SafeVfsConfig {
    const APP_NAME: &'static str = "safevfs";
    const CONFIG_NAME: &'static str = "config";

    /// Load the per-user config, creating it with defaults on first use.
    pub fn load() -> anyhow::Result<Self> {
        confy::load::<Self>(Self::APP_NAME, Self::CONFIG_NAME).with_context(|| {
            format!(
                "failed to load config file `{}/{}`",
                Self::APP_NAME,
                Self::CONFIG_NAME,
            )
        })
    }

    /// Load an explicit config file.
    pub fn load_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        confy::load_path::<Self>(path)
            .with_context(|| format!("failed to load config file {}", path.display()))
    }
}
