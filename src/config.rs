use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use sqlparser::dialect::{
    AnsiDialect, BigQueryDialect, Dialect, GenericDialect, HiveDialect, MySqlDialect,
    PostgreSqlDialect, SnowflakeDialect,
};
use strum_macros::{Display, EnumString};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ParserConfig {
    #[serde(default)]
    pub dialect: SqlDialect,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Finished, failed and cancelled jobs kept for status queries; older ones are forgotten.
    #[serde(default = "default_retained_jobs")]
    pub retained_jobs: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retained_jobs: default_retained_jobs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_retained_jobs() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// SQL dialect handed to the external parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Generic,
    MySql,
    Snowflake,
    BigQuery,
    Hive,
    Ansi,
}

impl SqlDialect {
    pub fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Snowflake => Box::new(SnowflakeDialect {}),
            SqlDialect::BigQuery => Box::new(BigQueryDialect {}),
            SqlDialect::Hive => Box::new(HiveDialect {}),
            SqlDialect::Ansi => Box::new(AnsiDialect {}),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let config_str = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> anyhow::Result<Self> {
        toml::from_str(config_str).context("Failed to parse config file")
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.parser.dialect, SqlDialect::Postgres);
        assert_eq!(config.scan.workers, 4);
        assert_eq!(config.scan.retained_jobs, 1000);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_config_sections() {
        let config = Config::from_toml(
            r#"
            [parser]
            dialect = "snowflake"

            [scan]
            workers = 2
            retained_jobs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.parser.dialect, SqlDialect::Snowflake);
        assert_eq!(config.scan.workers, 2);
        assert_eq!(config.scan.retained_jobs, 10);
    }

    #[test]
    fn test_dialect_names() {
        assert_eq!(SqlDialect::from_str("mysql").unwrap(), SqlDialect::MySql);
        assert_eq!(SqlDialect::BigQuery.to_string(), "bigquery");
        assert!(SqlDialect::from_str("oracle").is_err());
    }
}
