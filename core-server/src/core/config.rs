use std::time::Duration;

/// Core coordinator configuration
///
/// # Environment variables
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | STATION_ID | core-01 | Core station identifier |
/// | DATABASE_PATH | /var/lib/flowline/core.db | SQLite database file |
/// | BUS_LISTEN_ADDR | 0.0.0.0:9440 | Broker listen address |
/// | ORDERS_TOPIC | orders | Edge→core topic |
/// | DISPATCH_TOPIC | dispatch | Core→edge topic |
/// | OUTBOX_DRAIN_INTERVAL_MS | 5000 | Outbox drain tick |
/// | FLEET_BASE_URL | http://127.0.0.1:8088 | Fleet manager API |
/// | FLEET_TIMEOUT_MS | 5000 | Per-request fleet HTTP timeout |
/// | FLEET_POLL_INTERVAL_MS | 2000 | Order state poll tick |
/// | LOG_LEVEL | info | tracing filter |
/// | LOG_DIR | (empty) | Optional rolling log file directory |
#[derive(Debug, Clone)]
pub struct Config {
    pub station_id: String,
    pub database_path: String,
    pub bus_listen_addr: String,
    pub orders_topic: String,
    pub dispatch_topic: String,
    pub outbox_drain_interval: Duration,
    pub fleet_base_url: String,
    pub fleet_timeout: Duration,
    pub fleet_poll_interval: Duration,
    pub log_level: String,
    pub log_dir: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            station_id: env_or("STATION_ID", "core-01"),
            database_path: env_or("DATABASE_PATH", "/var/lib/flowline/core.db"),
            bus_listen_addr: env_or("BUS_LISTEN_ADDR", "0.0.0.0:9440"),
            orders_topic: env_or("ORDERS_TOPIC", "orders"),
            dispatch_topic: env_or("DISPATCH_TOPIC", "dispatch"),
            outbox_drain_interval: Duration::from_millis(env_parse(
                "OUTBOX_DRAIN_INTERVAL_MS",
                5000,
            )),
            fleet_base_url: env_or("FLEET_BASE_URL", "http://127.0.0.1:8088"),
            fleet_timeout: Duration::from_millis(env_parse("FLEET_TIMEOUT_MS", 5000)),
            fleet_poll_interval: Duration::from_millis(env_parse("FLEET_POLL_INTERVAL_MS", 2000)),
            log_level: env_or("LOG_LEVEL", "info"),
            log_dir: std::env::var("LOG_DIR").ok().filter(|s| !s.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
