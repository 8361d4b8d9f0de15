//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `ARCHIVIST_*` env vars.
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;

const ENV_PREFIX: &str = "ARCHIVIST_";

/// Tantivy refuses writer budgets below this.
const MIN_WRITER_MEMORY_MB: usize = 15;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = Self { figment };
        config.validate()?;
        Ok(config)
    }

    /// Defaults, one explicit TOML file, then the environment.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("config file {}", path.display())).into());
        }
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config = Self { figment };
        config.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        self.figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))
    }

    fn validate(&self) -> anyhow::Result<()> {
        let settings = self.settings()?;
        if settings.search.fuzzy_distance > 2 {
            return Err(Error::InvalidConfig(format!(
                "search.fuzzy_distance must be 0, 1 or 2 (got {})",
                settings.search.fuzzy_distance
            ))
            .into());
        }
        if settings.index.writer_memory_mb < MIN_WRITER_MEMORY_MB {
            return Err(Error::InvalidConfig(format!(
                "index.writer_memory_mb must be at least {} (got {})",
                MIN_WRITER_MEMORY_MB, settings.index.writer_memory_mb
            ))
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub batch: BatchSettings,
    pub search: SearchSettings,
    pub index: IndexSettings,
    pub megadoc: MegadocSettings,
    pub log: LogSettings,
}

/// Where a batch lives. Unset roots fall back to the legacy layout, see
/// `BatchLayout::for_batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub path: String,
    pub image_root: Option<String>,
    pub sidecar_root: Option<String>,
    pub cache_dir: Option<String>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { path: "data/00_initial".to_string(), image_root: None, sidecar_root: None, cache_dir: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Edit distance used by `word~` when no explicit distance is given.
    pub fuzzy_distance: u8,
    /// Count a swap of adjacent characters as one edit.
    pub transpositions: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { fuzzy_distance: 1, transpositions: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub writer_memory_mb: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { writer_memory_mb: 50 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MegadocSettings {
    pub root_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
