use std::time::Duration;

/// Edge station configuration
///
/// # Environment variables
///
/// All settings can be overridden through environment variables:
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | STATION_ID | edge-01 | Physical station identifier |
/// | NODE_ID | <station_id> | Logical routing key on the dispatch topic |
/// | LINE_IDS | (empty) | Comma-separated production line ids |
/// | DATABASE_PATH | /var/lib/flowline/edge.db | SQLite database file |
/// | BUS_ADDR | 127.0.0.1:9440 | core-server broker address |
/// | ORDERS_TOPIC | orders | Edge→core topic |
/// | DISPATCH_TOPIC | dispatch | Core→edge topic |
/// | OUTBOX_DRAIN_INTERVAL_MS | 5000 | Outbox drain tick |
/// | HEARTBEAT_INTERVAL_SECS | 60 | Heartbeat tick |
/// | TIMEZONE | (empty) | IANA timezone for hourly bucketing |
/// | JUMP_THRESHOLD | 1000 | Counter delta anomaly threshold |
/// | LOG_LEVEL | info | tracing filter |
/// | LOG_DIR | (empty) | Optional rolling log file directory |
#[derive(Debug, Clone)]
pub struct Config {
    pub station_id: String,
    pub node_id: String,
    pub line_ids: Vec<String>,
    pub database_path: String,
    pub bus_addr: String,
    pub orders_topic: String,
    pub dispatch_topic: String,
    pub outbox_drain_interval: Duration,
    pub heartbeat_interval: Duration,
    /// IANA timezone for date/hour bucketing; empty means server local.
    pub timezone: String,
    pub jump_threshold: i64,
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
        let station_id = env_or("STATION_ID", "edge-01");
        let node_id = env_or("NODE_ID", &station_id);
        let line_ids = std::env::var("LINE_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Self {
            node_id,
            line_ids,
            database_path: env_or("DATABASE_PATH", "/var/lib/flowline/edge.db"),
            bus_addr: env_or("BUS_ADDR", "127.0.0.1:9440"),
            orders_topic: env_or("ORDERS_TOPIC", "orders"),
            dispatch_topic: env_or("DISPATCH_TOPIC", "dispatch"),
            outbox_drain_interval: Duration::from_millis(env_parse(
                "OUTBOX_DRAIN_INTERVAL_MS",
                5000,
            )),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL_SECS", 60)),
            timezone: env_or("TIMEZONE", ""),
            jump_threshold: env_parse("JUMP_THRESHOLD", 1000),
            log_level: env_or("LOG_LEVEL", "info"),
            log_dir: std::env::var("LOG_DIR").ok().filter(|s| !s.is_empty()),
            station_id,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
