use std::env;

/// Environment-driven configuration for the gateway binary. Every field has
/// the default from the spec's configuration table; only `database_url` has
/// no sane default and must be set explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub database_url: String,
    pub queue_prefix: String,
    pub buffer_size: usize,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let redis_host = env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_owned());
        let redis_port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_owned());
        let redis_password = env::var("REDIS_PASSWORD").ok();
        let redis_url = build_redis_url(&redis_host, &redis_port, redis_password.as_deref());

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let queue_prefix = env::var("QUEUE_PREFIX").unwrap_or_else(|_| "queue:node:".to_owned());
        let buffer_size = env::var("BUFFER_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        Self {
            port,
            redis_url,
            database_url,
            queue_prefix,
            buffer_size,
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
        assert_eq!(build_redis_url("localhost", "6379", Some("")), "redis://localhost:6379/");
    }

    #[test]
    fn redis_url_embeds_password_when_set() {
        assert_eq!(
            build_redis_url("redis.internal", "6380", Some("hunter2")),
            "redis://:hunter2@redis.internal:6380/"
        );
    }
}
