//! Engine configuration
//!
//! Loaded from a YAML file (`TRIPWIRE_CONFIG`, default `config.yml`) with a
//! handful of environment overrides. Validation failures are fatal at startup.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::runner::OverlapPolicy;

pub const DEFAULT_LUA_MODULES_PATH: &str = "./?.lua;./modules/?.lua;./modules/?/init.lua";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub scripts: ScriptsConfig,
    pub channels: ChannelsConfig,
    pub datasources: DataSourcesConfig,
    pub storages: StoragesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub api: Option<ApiConfig>,
    pub storages: GlobalStorages,
    pub send_start_notification: Vec<String>,
    pub send_stop_notification: Vec<String>,
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            api: None,
            storages: GlobalStorages::default(),
            send_start_notification: Vec::new(),
            send_stop_notification: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub address: String,
}

/// Names of the core storages backing alerts and the KV namespace
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalStorages {
    pub alert: String,
    pub kv: String,
}

impl Default for GlobalStorages {
    fn default() -> Self {
        Self {
            alert: "memory".to_string(),
            kv: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Tick period; zero runs a single pass and then idles
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,
    /// Default per-run deadline
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// How long `stop` waits for in-flight runs before aborting them
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    pub overlap: OverlapPolicy,
    pub lua_modules_path: String,
    pub sources: ScriptSources,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            overlap: OverlapPolicy::default(),
            lua_modules_path: DEFAULT_LUA_MODULES_PATH.to_string(),
            sources: ScriptSources::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptSources {
    pub folder: Vec<FolderSource>,
    pub inline: Vec<InlineSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderSource {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_mask")]
    pub mask: String,
}

fn default_mask() -> String {
    "*.lua".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InlineSource {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub log: Vec<LogChannelConfig>,
    pub webhook: Vec<WebhookChannelConfig>,
    pub slack: Vec<SlackChannelConfig>,
}

impl ChannelsConfig {
    pub fn names(&self) -> Vec<&str> {
        self.log
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.webhook.iter().map(|c| c.name.as_str()))
            .chain(self.slack.iter().map(|c| c.name.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogChannelConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChannelConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackChannelConfig {
    pub name: String,
    pub url: String,
    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub timeout: Duration,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataSourcesConfig {
    pub prometheus: Vec<PrometheusConfig>,
    pub postgres: Vec<PostgresSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Connection settings shared by the Postgres data source and core storage
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConnection {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    /// `disable`, `prefer`, `require`, `verify-ca` or `verify-full`
    #[serde(default)]
    pub ssl_mode: Option<String>,
    #[serde(default)]
    pub ssl_cert_path: Option<PathBuf>,
    #[serde(with = "humantime_serde", default = "default_sql_timeout")]
    pub timeout: Duration,
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_sql_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresSourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub connection: PostgresConnection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoragesConfig {
    pub core: CoreStoragesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreStoragesConfig {
    pub memory: Vec<MemoryStorageConfig>,
    pub file: Vec<FileStorageConfig>,
    pub sqlite: Vec<SqliteStorageConfig>,
    pub postgres: Vec<PostgresStorageConfig>,
}

impl Default for CoreStoragesConfig {
    fn default() -> Self {
        Self {
            memory: vec![MemoryStorageConfig {
                name: "memory".to_string(),
            }],
            file: Vec::new(),
            sqlite: Vec::new(),
            postgres: Vec::new(),
        }
    }
}

impl CoreStoragesConfig {
    pub fn names(&self) -> Vec<&str> {
        self.memory
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.file.iter().map(|c| c.name.as_str()))
            .chain(self.sqlite.iter().map(|c| c.name.as_str()))
            .chain(self.postgres.iter().map(|c| c.name.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStorageConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileStorageConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Tables holding alert records and KV pairs; created when missing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqlTables {
    pub table_alerts: String,
    pub table_kv: String,
}

impl Default for SqlTables {
    fn default() -> Self {
        Self {
            table_alerts: "tripwire_alerts".to_string(),
            table_kv: "tripwire_kv".to_string(),
        }
    }
}

impl SqlTables {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for table in [&self.table_alerts, &self.table_kv] {
            if !is_identifier(table) {
                return Err(ConfigError::Invalid(format!("invalid table name '{}'", table)));
            }
        }
        Ok(())
    }
}

/// Plain SQL identifier: a letter or `_`, then letters, digits or `_`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStorageConfig {
    pub name: String,
    /// Database file, created when missing
    pub path: PathBuf,
    #[serde(flatten)]
    pub tables: SqlTables,
    #[serde(with = "humantime_serde", default = "default_sql_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresStorageConfig {
    pub name: String,
    #[serde(flatten)]
    pub connection: PostgresConnection,
    #[serde(flatten)]
    pub tables: SqlTables,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        Self::from_yaml(&yaml)
    }

    /// Load from `TRIPWIRE_CONFIG` (or `config.yml`) and apply environment
    /// overrides. A missing default file yields the built-in defaults.
    pub fn from_env() -> Result<(Self, Flags), ConfigError> {
        let mut config = match std::env::var("TRIPWIRE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) if Path::new("config.yml").exists() => Self::from_file("config.yml")?,
            Err(_) => Self::default(),
        };

        let flags = Flags::from_env();

        if let Some(script) = &flags.script {
            tracing::info!(path = %script.display(), "Replacing script sources with a single file");
            config.scripts.sources = ScriptSources {
                folder: vec![FolderSource {
                    name: "cli-script".to_string(),
                    path: script.clone(),
                    mask: default_mask(),
                }],
                inline: Vec::new(),
            };
        }
        if let Ok(address) = std::env::var("TRIPWIRE_API_ADDRESS") {
            config.global.api = Some(ApiConfig { address });
        }
        if let Ok(level) = std::env::var("TRIPWIRE_LOG_LEVEL") {
            config.global.log_level = level;
        }

        config.validate()?;
        Ok((config, flags))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unique("channel", self.channels.names())?;
        check_unique(
            "datasource 'prometheus'",
            self.datasources.prometheus.iter().map(|c| c.name.as_str()),
        )?;
        check_unique(
            "datasource 'postgres'",
            self.datasources.postgres.iter().map(|c| c.name.as_str()),
        )?;
        check_unique("core storage", self.storages.core.names())?;
        check_unique(
            "script source",
            self.scripts
                .sources
                .folder
                .iter()
                .map(|c| c.name.as_str())
                .chain(self.scripts.sources.inline.iter().map(|c| c.name.as_str())),
        )?;

        let storage_names: HashSet<&str> = self.storages.core.names().into_iter().collect();
        for (role, name) in [
            ("alert", &self.global.storages.alert),
            ("kv", &self.global.storages.kv),
        ] {
            if !storage_names.contains(name.as_str()) {
                return Err(ConfigError::UnknownStorage(role, name.clone()));
            }
        }

        let channel_names: HashSet<&str> = self.channels.names().into_iter().collect();
        for name in self
            .global
            .send_start_notification
            .iter()
            .chain(&self.global.send_stop_notification)
        {
            if !channel_names.contains(name.as_str()) {
                return Err(ConfigError::UnknownChannel(name.clone()));
            }
        }

        for cfg in &self.channels.webhook {
            if cfg.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "webhook channel '{}' has an empty url",
                    cfg.name
                )));
            }
        }

        for cfg in &self.storages.core.sqlite {
            cfg.tables.validate()?;
        }
        for cfg in &self.storages.core.postgres {
            cfg.tables.validate()?;
        }
        let postgres = self
            .storages
            .core
            .postgres
            .iter()
            .map(|c| (c.name.as_str(), &c.connection))
            .chain(
                self.datasources
                    .postgres
                    .iter()
                    .map(|c| (c.name.as_str(), &c.connection)),
            );
        for (name, connection) in postgres {
            if connection.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "postgres '{}': host must be defined",
                    name
                )));
            }
        }

        Ok(())
    }
}

fn check_unique<'a>(
    section: &'static str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{} name must be not empty", section)));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate(section, name.to_string()));
        }
    }
    Ok(())
}

/// Process-level switches taken from the environment
#[derive(Debug, Clone, Default)]
pub struct Flags {
    /// Run every script once and exit
    pub once: bool,
    /// Run only this script file
    pub script: Option<PathBuf>,
}

impl Flags {
    pub fn from_env() -> Self {
        let once = std::env::var("TRIPWIRE_ONCE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let script = std::env::var("TRIPWIRE_SCRIPT").ok().map(PathBuf::from);
        Self { once, script }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error read config file '{0}': {1}")]
    Read(String, std::io::Error),

    #[error("error parse config: {0}")]
    Parse(String),

    #[error("found duplicated name for {0}: {1}")]
    Duplicate(&'static str, String),

    #[error("{0} storage '{1}' is not configured")]
    UnknownStorage(&'static str, String),

    #[error("channel '{0}' is not configured")]
    UnknownChannel(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
