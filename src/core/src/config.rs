//! Engine configuration.
//!
//! Two sources feed the engine:
//!
//! - `registries.conf` (TOML), which supplies the ordered unqualified-search
//!   registry list and the registries that should be reached over plain HTTP.
//!   Both the current `unqualified-search-registries = [...]` form and the
//!   legacy `[registries.search]` table are accepted.
//! - Environment overrides (`SKIFF_STORE`, `SKIFF_REGISTRIES_CONF`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SkiffError};

/// Search list used when no registries configuration exists at all.
pub const DEFAULT_SEARCH_REGISTRIES: &[&str] = &["docker.io", "quay.io"];

/// System-wide registries configuration.
const SYSTEM_REGISTRIES_CONF: &str = "/etc/containers/registries.conf";

/// Parsed `registries.conf`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistriesConf {
    /// Ordered search list (current format)
    #[serde(rename = "unqualified-search-registries", default)]
    pub unqualified_search_registries: Vec<String>,

    /// Per-registry entries (current format)
    #[serde(default)]
    pub registry: Vec<RegistryEntry>,

    /// Legacy `[registries.*]` tables
    #[serde(default)]
    pub registries: Option<LegacyRegistries>,
}

/// A `[[registry]]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryEntry {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub blocked: bool,
}

/// Legacy `[registries.search]`, `[registries.insecure]`, `[registries.block]` tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyRegistries {
    #[serde(default)]
    pub search: Option<LegacyRegistryList>,
    #[serde(default)]
    pub insecure: Option<LegacyRegistryList>,
    #[serde(default)]
    pub block: Option<LegacyRegistryList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyRegistryList {
    #[serde(default)]
    pub registries: Vec<String>,
}

impl RegistriesConf {
    /// Parse registries configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        let conf: RegistriesConf = toml::from_str(content)?;
        let legacy_search = conf
            .registries
            .as_ref()
            .and_then(|r| r.search.as_ref())
            .map_or(false, |s| !s.registries.is_empty());
        if legacy_search && !conf.unqualified_search_registries.is_empty() {
            return Err(SkiffError::Config(
                "mixing unqualified-search-registries with [registries.search] is not supported"
                    .to_string(),
            ));
        }
        Ok(conf)
    }

    /// Load and parse a registries configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SkiffError::Config(format!(
                "Failed to read registries configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&data).map_err(|e| {
            SkiffError::Config(format!("{}: {}", path.display(), e))
        })
    }

    /// Ordered unqualified-search registries.
    pub fn search_registries(&self) -> Vec<String> {
        if !self.unqualified_search_registries.is_empty() {
            return self.unqualified_search_registries.clone();
        }
        self.registries
            .as_ref()
            .and_then(|r| r.search.as_ref())
            .map(|s| s.registries.clone())
            .unwrap_or_default()
    }

    /// Registries reached over plain HTTP.
    pub fn insecure_registries(&self) -> Vec<String> {
        let mut insecure: Vec<String> = self
            .registry
            .iter()
            .filter(|r| r.insecure)
            .map(|r| r.prefix.clone().unwrap_or_else(|| r.location.clone()))
            .collect();
        if let Some(legacy) = self.registries.as_ref().and_then(|r| r.insecure.as_ref()) {
            insecure.extend(legacy.registries.iter().cloned());
        }
        insecure
    }

    /// Registries that must never be contacted.
    pub fn blocked_registries(&self) -> Vec<String> {
        let mut blocked: Vec<String> = self
            .registry
            .iter()
            .filter(|r| r.blocked)
            .map(|r| r.prefix.clone().unwrap_or_else(|| r.location.clone()))
            .collect();
        if let Some(legacy) = self.registries.as_ref().and_then(|r| r.block.as_ref()) {
            blocked.extend(legacy.registries.iter().cloned());
        }
        blocked
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of the local image store
    pub store_dir: PathBuf,

    /// Ordered unqualified-search registries
    pub search_registries: Vec<String>,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Registries that must never be contacted
    pub blocked_registries: Vec<String>,

    /// Tag digest-only pulls as `<name>:none` so they stay enumerable by name
    pub digest_pull_sentinel_tag: bool,

    /// Connect timeout for registry requests, in seconds
    pub connect_timeout_secs: u64,

    /// Read timeout for registry requests, in seconds
    pub read_timeout_secs: u64,

    /// Platform to select from manifest lists (`os/arch[/variant]`);
    /// the host platform when unset
    #[serde(default)]
    pub platform: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            search_registries: DEFAULT_SEARCH_REGISTRIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            insecure_registries: Vec::new(),
            blocked_registries: Vec::new(),
            digest_pull_sentinel_tag: false,
            connect_timeout_secs: 30,
            read_timeout_secs: 300,
            platform: None,
        }
    }
}

impl EngineConfig {
    /// Build the configuration from the environment and the first
    /// registries configuration file found.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SKIFF_STORE") {
            if !dir.is_empty() {
                config.store_dir = PathBuf::from(dir);
            }
        }

        if let Ok(platform) = std::env::var("SKIFF_PLATFORM") {
            if !platform.is_empty() {
                config.platform = Some(platform);
            }
        }

        if let Some(path) = registries_conf_path() {
            tracing::debug!(path = %path.display(), "Loading registries configuration");
            config.apply_registries_conf(&RegistriesConf::from_path(&path)?);
        }

        Ok(config)
    }

    /// Replace registry lists with the ones from a parsed configuration.
    pub fn apply_registries_conf(&mut self, conf: &RegistriesConf) {
        self.search_registries = conf.search_registries();
        self.insecure_registries = conf.insecure_registries();
        self.blocked_registries = conf.blocked_registries();
    }

    /// Use an explicit search list.
    pub fn with_search_registries<I, S>(mut self, registries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_registries = registries.into_iter().map(Into::into).collect();
        self
    }

    /// Use an explicit store directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }
}

/// Default image store directory (`~/.skiff/images`).
pub fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".skiff"))
        .unwrap_or_else(|| PathBuf::from(".skiff"))
        .join("images")
}

/// First registries configuration present: `$SKIFF_REGISTRIES_CONF`,
/// the per-user file, then the system file.
fn registries_conf_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SKIFF_REGISTRIES_CONF") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let user = dirs::config_dir().map(|d| d.join("containers").join("registries.conf"));
    if let Some(user) = user.filter(|p| p.exists()) {
        return Some(user);
    }
    let system = PathBuf::from(SYSTEM_REGISTRIES_CONF);
    system.exists().then_some(system)
}
