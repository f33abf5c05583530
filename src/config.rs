//! Gateway configuration.
//!
//! Loaded from a YAML file; every key has a default so the gateway starts
//! without one. The key names follow the configuration surface of the
//! deployment tooling (`proxy-db-type`, `proxy-port`, `target.*`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which wire protocol the gateway speaks to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum DbKind {
    #[serde(rename = "mysql")]
    #[value(name = "mysql")]
    MySql,
    #[serde(rename = "postgresql")]
    #[value(name = "postgresql")]
    Postgres,
}

impl Default for DbKind {
    fn default() -> Self {
        DbKind::MySql
    }
}

impl std::fmt::Display for DbKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbKind::MySql => f.write_str("mysql"),
            DbKind::Postgres => f.write_str("postgresql"),
        }
    }
}

/// Coordinates of the single backend database every session executes
/// against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "password".to_string(),
            database: "demo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(rename = "proxy-db-type")]
    pub proxy_db_type: DbKind,
    /// Listen port; when absent the protocol default applies (3307 for
    /// MySQL so a local real server on 3306 is not shadowed, 5432 for
    /// PostgreSQL).
    #[serde(rename = "proxy-port")]
    pub proxy_port: Option<u16>,
    pub target: TargetConfig,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing config file {path}"))
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn listen_port(&self) -> u16 {
        self.proxy_port.unwrap_or(match self.proxy_db_type {
            DbKind::MySql => 3307,
            DbKind::Postgres => 5432,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_keys() {
        let yaml = r#"
proxy-db-type: postgresql
proxy-port: 6432
target:
  host: db.internal
  port: 5433
  username: gateway
  password: s3cret
  database: appdb
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.proxy_db_type, DbKind::Postgres);
        assert_eq!(config.listen_port(), 6432);
        assert_eq!(config.target.host, "db.internal");
        assert_eq!(config.target.database, "appdb");
    }

    #[test]
    fn defaults_apply_when_keys_are_missing() {
        let config: AppConfig = serde_yaml::from_str("proxy-db-type: mysql\n").unwrap();
        assert_eq!(config.proxy_db_type, DbKind::MySql);
        assert_eq!(config.listen_port(), 3307);
        assert_eq!(config.target.host, "localhost");
    }

    #[test]
    fn postgres_default_port_is_5432() {
        let config = AppConfig {
            proxy_db_type: DbKind::Postgres,
            ..Default::default()
        };
        assert_eq!(config.listen_port(), 5432);
    }
}
