//! Role configuration, read from `<data_dir>/teep.toml`.
//!
//! Every field has a default, so a missing file (or an empty one) yields a
//! working single-version role.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::message::{AppId, QueryResponse, Update};
use crate::version::VersionRange;

pub const CONFIG_FILE: &str = "teep.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Settings shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    /// Identity label; also names the key files.
    pub label: String,
    #[serde(default)]
    pub versions: VersionRange,
    /// Peer address -> trusted identity label expected to sign its messages.
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
}

impl RoleConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), versions: VersionRange::default(), peers: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub role: RoleConfig,
    /// Applications already present on the device at startup.
    pub installed: BTreeSet<AppId>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { role: RoleConfig::new("agent"), installed: BTreeSet::new() }
    }
}

/// When the TAM follows a QueryResponse with an Update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePolicy {
    /// Always send, even if empty.
    Always,
    /// Send only if the Update changes something.
    WhenChanged,
    /// Send unless the Update is empty and the device only asked for removals
    /// that are already in effect.
    #[default]
    SkipTrivialRemoval,
}

impl UpdatePolicy {
    pub fn should_send(self, update: &Update, response: &QueryResponse) -> bool {
        match self {
            UpdatePolicy::Always => true,
            UpdatePolicy::WhenChanged => !update.is_empty(),
            UpdatePolicy::SkipTrivialRemoval => {
                !(update.is_empty() && !response.unneeded.is_empty())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TamConfig {
    pub role: RoleConfig,
    /// Applications this TAM can provision on request.
    pub catalog: BTreeSet<AppId>,
    /// Applications every device must have.
    pub required: BTreeSet<AppId>,
    pub update_policy: UpdatePolicy,
    /// Include a fresh challenge in each QueryRequest.
    pub send_challenge: bool,
}

impl Default for TamConfig {
    fn default() -> Self {
        Self {
            role: RoleConfig::new("tam"),
            catalog: BTreeSet::new(),
            required: BTreeSet::new(),
            update_policy: UpdatePolicy::default(),
            send_challenge: false,
        }
    }
}

pub fn from_toml<T: DeserializeOwned>(content: &str) -> Result<T, ConfigError> {
    Ok(toml::from_str(content)?)
}

pub fn load_from_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    from_toml(&content)
}

/// Read `<dir>/teep.toml`, or fall back to defaults when it doesn't exist.
pub fn load_or_default<T: DeserializeOwned + Default>(dir: &Path) -> Result<T, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(T::default());
    }
    load_from_file(&path)
}
