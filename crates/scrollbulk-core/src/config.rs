//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`APP_BULK__CONCURRENCY=8`). Provides helpers to expand
//! `~` and `${VAR}` in paths given on the command line.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(None)
    }

    /// Like `load`, with an extra TOML file merged after the environment files.
    pub fn load_with(extra: Option<&Path>) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self::from_figment(figment);
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        if matches!(env, "prod" | "production") {
            let insecure: bool = self.get("transport.accept_invalid_certs").unwrap_or(false);
            if insecure {
                anyhow::bail!("transport.accept_invalid_certs must be false in production");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transport: TransportSettings,
    pub scroll: ScrollSettings,
    pub bulk: BulkSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub accept_invalid_certs: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            addresses: vec!["http://127.0.0.1:9200".to_string()],
            username: None,
            password: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 1,
            pool_max_idle_per_host: 10,
            accept_invalid_certs: false,
        }
    }
}

impl TransportSettings {
    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
    pub fn connect_timeout(&self) -> Duration { Duration::from_secs(self.connect_timeout_secs) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollSettings {
    pub page_size: usize,
    pub max_pages: usize,
    pub keep_alive_secs: u64,
}

impl Default for ScrollSettings {
    fn default() -> Self { Self { page_size: 5000, max_pages: 50, keep_alive_secs: 60 } }
}

impl ScrollSettings {
    pub fn keep_alive(&self) -> Duration { Duration::from_secs(self.keep_alive_secs) }
}

/// When the engine should make bulk writes visible to search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refresh {
    #[default]
    False,
    True,
    WaitFor,
}

impl Refresh {
    pub fn as_param(self) -> &'static str {
        match self {
            Refresh::False => "false",
            Refresh::True => "true",
            Refresh::WaitFor => "wait_for",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
    pub chunk_size: usize,
    pub delete_chunk_size: usize,
    pub concurrency: usize,
    pub retry_on_conflict: u32,
    pub refresh: Refresh,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self { chunk_size: 1000, delete_chunk_size: 20_000, concurrency: 4, retry_on_conflict: 3, refresh: Refresh::False }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.transport.addresses.is_empty() { return invalid("transport.addresses must not be empty"); }
        if self.scroll.page_size == 0 { return invalid("scroll.page_size must be positive"); }
        if self.scroll.keep_alive_secs == 0 { return invalid("scroll.keep_alive_secs must be positive"); }
        if self.bulk.chunk_size == 0 || self.bulk.delete_chunk_size == 0 { return invalid("bulk chunk sizes must be positive"); }
        if self.bulk.concurrency == 0 { return invalid("bulk.concurrency must be at least 1"); }
        Ok(())
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

