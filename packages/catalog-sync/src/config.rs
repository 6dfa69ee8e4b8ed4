//! Sync configuration (YAML file + environment overrides)
//!
//! Precedence: built-in defaults < YAML file < environment. The environment
//! variable names follow the deployment's existing `.env` layout:
//!
//! ```text
//! POSTGRES_{HOST,PORT,USERNAME,PASSWORD,DB}
//! REDIS_BACKEND_{HOST,PORT,USERNAME,PASSWORD,DB}
//! ELASTIC_{NODES,USERNAME,PASSWORD,MOVIES_INDEX,GENRES_INDEX,PERSONS_INDEX}
//! SYNC_{BATCH_SIZE,LOCK_TTL_SECS,VALIDATION_POLICY}
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::models::ValidationPolicy;
use crate::stream::StreamId;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported configuration version {found}. Supported versions: {}", SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32 },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ═══════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub db: String,
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "app".to_string(),
            password: String::new(),
            db: "movies_database".to_string(),
            max_connections: 5,
        }
    }
}

impl PostgresConfig {
    pub fn connect_options(&self) -> sqlx::postgres::PgConnectOptions {
        sqlx::postgres::PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.db)
            .application_name("catalog-sync")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Connection parameters with credentials passed verbatim (no URL escaping).
    pub fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: i64::from(self.db),
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

/// Index name per stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexNames {
    pub works: String,
    pub categories: String,
    pub contributors: String,
}

impl Default for IndexNames {
    fn default() -> Self {
        Self {
            works: "movies".to_string(),
            categories: "genres".to_string(),
            contributors: "persons".to_string(),
        }
    }
}

impl IndexNames {
    pub fn for_stream(&self, stream: StreamId) -> &str {
        match stream {
            StreamId::Works => &self.works,
            StreamId::Categories => &self.categories,
            StreamId::Contributors => &self.contributors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElasticConfig {
    pub nodes: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    pub indices: IndexNames,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["http://localhost:9200".to_string()],
            username: None,
            password: None,
            request_timeout_secs: 60,
            indices: IndexNames::default(),
        }
    }
}

impl ElasticConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    pub batch_size: usize,
    pub lock_ttl_secs: u64,
    pub retry_on_conflict: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            batch_size: 100,
            lock_ttl_secs: 15,
            retry_on_conflict: 1,
        }
    }
}

impl SyncSection {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSection {
    pub policy: ValidationPolicy,
}

// ═══════════════════════════════════════════════════════════════════════════
// Root
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub version: u32,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub elastic: ElasticConfig,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub validation: ValidationSection,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: 1,
            postgres: PostgresConfig::default(),
            redis: RedisConfig::default(),
            elastic: ElasticConfig::default(),
            sync: SyncSection::default(),
            validation: ValidationSection::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: SyncConfig = serde_yaml::from_str(content)?;
        if !SUPPORTED_VERSIONS.contains(&config.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
            });
        }
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = env("POSTGRES_HOST") {
            self.postgres.host = v;
        }
        if let Some(v) = env("POSTGRES_PORT") {
            self.postgres.port = parse_env("POSTGRES_PORT", &v)?;
        }
        if let Some(v) = env("POSTGRES_USERNAME") {
            self.postgres.username = v;
        }
        if let Some(v) = env("POSTGRES_PASSWORD") {
            self.postgres.password = v;
        }
        if let Some(v) = env("POSTGRES_DB") {
            self.postgres.db = v;
        }

        if let Some(v) = env("REDIS_BACKEND_HOST") {
            self.redis.host = v;
        }
        if let Some(v) = env("REDIS_BACKEND_PORT") {
            self.redis.port = parse_env("REDIS_BACKEND_PORT", &v)?;
        }
        if let Some(v) = env("REDIS_BACKEND_USERNAME") {
            self.redis.username = Some(v);
        }
        if let Some(v) = env("REDIS_BACKEND_PASSWORD") {
            self.redis.password = Some(v);
        }
        if let Some(v) = env("REDIS_BACKEND_DB") {
            self.redis.db = parse_env("REDIS_BACKEND_DB", &v)?;
        }

        if let Some(v) = env("ELASTIC_NODES") {
            self.elastic.nodes = v
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env("ELASTIC_USERNAME") {
            self.elastic.username = Some(v);
        }
        if let Some(v) = env("ELASTIC_PASSWORD") {
            self.elastic.password = Some(v);
        }
        if let Some(v) = env("ELASTIC_MOVIES_INDEX") {
            self.elastic.indices.works = v;
        }
        if let Some(v) = env("ELASTIC_GENRES_INDEX") {
            self.elastic.indices.categories = v;
        }
        if let Some(v) = env("ELASTIC_PERSONS_INDEX") {
            self.elastic.indices.contributors = v;
        }

        if let Some(v) = env("SYNC_BATCH_SIZE") {
            self.sync.batch_size = parse_env("SYNC_BATCH_SIZE", &v)?;
        }
        if let Some(v) = env("SYNC_LOCK_TTL_SECS") {
            self.sync.lock_ttl_secs = parse_env("SYNC_LOCK_TTL_SECS", &v)?;
        }
        if let Some(v) = env("SYNC_VALIDATION_POLICY") {
            self.validation.policy = v
                .parse()
                .map_err(|reason: String| ConfigError::invalid("SYNC_VALIDATION_POLICY", reason))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sync.batch_size == 0 {
            return Err(ConfigError::invalid("sync.batch_size", "must be at least 1"));
        }
        if self.sync.lock_ttl_secs == 0 {
            return Err(ConfigError::invalid("sync.lock_ttl_secs", "must be at least 1"));
        }
        if self.elastic.nodes.is_empty() {
            return Err(ConfigError::invalid("elastic.nodes", "at least one node is required"));
        }
        if let Some(node) = self
            .elastic
            .nodes
            .iter()
            .find(|n| !(n.starts_with("http://") || n.starts_with("https://")))
        {
            return Err(ConfigError::invalid(
                "elastic.nodes",
                format!("'{}' is not an http(s) URL", node),
            ));
        }
        if self.elastic.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "elastic.request_timeout_secs",
                "must be at least 1",
            ));
        }

        let indices = &self.elastic.indices;
        for (field, name) in [
            ("elastic.indices.works", &indices.works),
            ("elastic.indices.categories", &indices.categories),
            ("elastic.indices.contributors", &indices.contributors),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid(field, "index name is empty"));
            }
        }
        if self.postgres.max_connections == 0 {
            return Err(ConfigError::invalid(
                "postgres.max_connections",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(name, format!("'{}': {}", value, e)))
}
