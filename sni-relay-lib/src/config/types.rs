use std::time::Duration;

/// Runtime configuration, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy listener port (`PORT`).
    pub port: u16,
    /// Observability sidecar port (`HEALTH_PORT`); must differ from `port`.
    pub health_port: u16,
    /// Raw allow-list rules (`ALLOWED_IPS`), parsed into an `IpFilter`
    /// after tracing is up so invalid entries can be warned about.
    pub allowed_ips: String,
    /// Upstream dial deadline (`PROXY_CONNECT_TIMEOUT`, ms).
    pub connect_timeout: Duration,
    /// Idle deadline during the splice phase (`PROXY_TIMEOUT`, ms).
    pub proxy_timeout: Duration,
    /// ClientHello arrival deadline (`PREREAD_TIMEOUT`, ms).
    pub preread_timeout: Duration,
    /// Max connections per source per 60 s window (`RATE_LIMIT_PER_IP`).
    pub rate_limit_per_ip: u32,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (`LOG_LEVEL`): "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Human-oriented multi-line formatter (`LOG_PRETTY`).
    pub pretty: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 443,
            health_port: 3000,
            allowed_ips: "0.0.0.0/0".to_string(),
            connect_timeout: Duration::from_millis(10_000),
            proxy_timeout: Duration::from_millis(300_000),
            preread_timeout: Duration::from_millis(10_000),
            rate_limit_per_ip: 100,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), pretty: false }
    }
}
