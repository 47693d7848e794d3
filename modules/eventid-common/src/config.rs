use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::schema::Platform;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Broker
    pub kafka_brokers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,

    // Postgres
    pub database_url: String,
    pub db_max_connections: u32,

    // Metrics / health server
    pub metrics_port: u16,

    // Ingestion retry budget
    pub ingest_max_retries: u32,
    pub ingest_retry_base: Duration,
    pub ingest_retry_max: Duration,

    // Workflow actions
    pub action_timeout: Duration,
    pub action_max_retries: u32,
    pub max_causation_depth: u32,
    pub platform_urls: HashMap<Platform, String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL").unwrap_or_else(|| {
            format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                or("DB_USER", "eventid"),
                or("DB_PASSWORD", "password"),
                or("DB_HOST", "localhost"),
                parse_or(get("DB_PORT"), "DB_PORT", 5432u16),
                or("DB_NAME", "eventid_events"),
                or("DB_SSLMODE", "disable"),
            )
        });

        let platform_urls = Platform::ALL
            .iter()
            .filter_map(|platform| {
                let key = format!("PLATFORM_{}_URL", platform.as_str().to_uppercase());
                get(&key).map(|url| (*platform, url.trim_end_matches('/').to_string()))
            })
            .collect();

        Self {
            kafka_brokers: or("KAFKA_BROKERS", "localhost:9092"),
            kafka_topic: or("KAFKA_TOPIC", "regulatory-events"),
            kafka_group_id: or("KAFKA_GROUP_ID", "eventid-consumer-audit"),
            kafka_auto_offset_reset: or("KAFKA_AUTO_OFFSET_RESET", "earliest"),
            database_url,
            db_max_connections: parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 10),
            metrics_port: parse_or(get("METRICS_PORT"), "METRICS_PORT", 9090),
            ingest_max_retries: parse_or(get("INGEST_MAX_RETRIES"), "INGEST_MAX_RETRIES", 5),
            ingest_retry_base: Duration::from_millis(parse_or(
                get("INGEST_RETRY_BASE_MS"),
                "INGEST_RETRY_BASE_MS",
                200,
            )),
            ingest_retry_max: Duration::from_millis(parse_or(
                get("INGEST_RETRY_MAX_MS"),
                "INGEST_RETRY_MAX_MS",
                30_000,
            )),
            action_timeout: Duration::from_secs(parse_or(
                get("ACTION_TIMEOUT_SECS"),
                "ACTION_TIMEOUT_SECS",
                30,
            )),
            action_max_retries: parse_or(get("ACTION_MAX_RETRIES"), "ACTION_MAX_RETRIES", 2),
            max_causation_depth: parse_or(get("MAX_CAUSATION_DEPTH"), "MAX_CAUSATION_DEPTH", 8),
            platform_urls,
        }
    }

    /// Log the effective configuration with credentials masked.
    pub fn log_redacted(&self) {
        info!(
            kafka_brokers = self.kafka_brokers.as_str(),
            kafka_topic = self.kafka_topic.as_str(),
            kafka_group_id = self.kafka_group_id.as_str(),
            database_url = redact_url(&self.database_url).as_str(),
            metrics_port = self.metrics_port,
            ingest_max_retries = self.ingest_max_retries,
            action_timeout_secs = self.action_timeout.as_secs(),
            action_max_retries = self.action_max_retries,
            max_causation_depth = self.max_causation_depth,
            platforms = ?self.platform_urls.keys().collect::<Vec<_>>(),
            "Loaded configuration"
        );
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = value.as_str(), default = %default, "Unparsable value, using default");
            default
        }),
    }
}

/// Mask the password component of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.find('@') else {
        return url.to_string();
    };
    let credentials = &rest[..at];
    match credentials.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..scheme_end + 3],
            &credentials[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
