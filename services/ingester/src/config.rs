use std::env;

/// Environment-driven configuration for the ingester binary. `BATCH_SIZE`
/// and `FLUSH_INTERVAL_MS` are fixed in the spec but left overridable here
/// so integration tests can shrink them instead of waiting out real time.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub database_url: String,
    pub queue_prefix: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        let redis_host = env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_owned());
        let redis_port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_owned());
        let redis_password = env::var("REDIS_PASSWORD").ok();
        let redis_url = build_redis_url(&redis_host, &redis_port, redis_password.as_deref());

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let queue_prefix = env::var("QUEUE_PREFIX").unwrap_or_else(|_| "queue:node:".to_owned());
        let batch_size = env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(150);
        let flush_interval_ms = env::var("FLUSH_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);
        let discovery_interval_ms = env::var("DISCOVERY_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        let poll_interval_ms = env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        Self {
            redis_url,
            database_url,
            queue_prefix,
            batch_size,
            flush_interval_ms,
            discovery_interval_ms,
            poll_interval_ms,
            log_level,
        }
    }
}

fn build_redis_url(host: &str, port: &str, password: Option<&str>) -> String {
    match password {
        Some(password) if !password.is_empty() => format!("redis://:{password}@{host}:{port}/"),
        _ => format!("redis://{host}:{port}/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_omits_credentials_when_password_unset() {
        assert_eq!(build_redis_url("localhost", "6379", None), "redis://localhost:6379/");
    }

    #[test]
    fn redis_url_embeds_password_when_set() {
        assert_eq!(
            build_redis_url("redis.internal", "6380", Some("hunter2")),
            "redis://:hunter2@redis.internal:6380/"
        );
    }
}
