use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 5 * 60,
            max_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub cache: CacheConfig,
    pub host: String,
    pub port: u16,
    pub cors_allowed_origin: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let defaults = CacheConfig::default();
        let cache = CacheConfig {
            ttl_secs: env_parse("USER_CACHE_TTL_SECS").unwrap_or(defaults.ttl_secs),
            max_capacity: env_parse("USER_CACHE_MAX_CAPACITY").unwrap_or(defaults.max_capacity),
        };
        Ok(Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            db_acquire_timeout_ms: env_parse("DB_ACQUIRE_TIMEOUT_MS").unwrap_or(5_000),
            store_timeout_ms: env_parse("STORE_TIMEOUT_MS").unwrap_or(5_000),
            cache,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("APP_PORT").unwrap_or(8080),
            cors_allowed_origin: std::env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:4200".into()),
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.db_acquire_timeout_ms)
    }
}

/// Missing or unparseable values fall back to the caller's default.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}
