use std::str::FromStr;
use std::time::Duration;

use crate::config::types::{Config, LoggingConfig};
use crate::error::{ProxyError, Result};

const MIN_TIMEOUT_MS: u64 = 1_000;

/// Resolve the configuration from the process environment.
pub fn from_env() -> Result<Config> {
    load(|name| std::env::var(name).ok())
}

/// Resolve the configuration through an injectable variable lookup.
///
/// Every check runs even after the first failure; the error message
/// enumerates all of them so the operator fixes the environment in one pass.
pub fn load(var: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let defaults = Config::default();
    let mut errors = Vec::new();

    let port: u16 = parse_var(&var, "PORT", defaults.port, &mut errors);
    let health_port: u16 = parse_var(&var, "HEALTH_PORT", defaults.health_port, &mut errors);
    let connect_ms: u64 = parse_var(
        &var,
        "PROXY_CONNECT_TIMEOUT",
        defaults.connect_timeout.as_millis() as u64,
        &mut errors,
    );
    let proxy_ms: u64 = parse_var(
        &var,
        "PROXY_TIMEOUT",
        defaults.proxy_timeout.as_millis() as u64,
        &mut errors,
    );
    let preread_ms: u64 = parse_var(
        &var,
        "PREREAD_TIMEOUT",
        defaults.preread_timeout.as_millis() as u64,
        &mut errors,
    );
    let rate_limit_per_ip: u32 =
        parse_var(&var, "RATE_LIMIT_PER_IP", defaults.rate_limit_per_ip, &mut errors);
    let pretty: bool = parse_var(&var, "LOG_PRETTY", defaults.logging.pretty, &mut errors);

    let allowed_ips = var("ALLOWED_IPS").unwrap_or_else(|| defaults.allowed_ips.clone());
    let level = var("LOG_LEVEL").unwrap_or_else(|| defaults.logging.level.clone());

    if port == 0 {
        errors.push("PORT must be in 1..=65535".to_string());
    }
    if health_port == 0 {
        errors.push("HEALTH_PORT must be in 1..=65535".to_string());
    }
    if port != 0 && port == health_port {
        errors.push("HEALTH_PORT must differ from PORT".to_string());
    }
    if connect_ms < MIN_TIMEOUT_MS {
        errors.push(format!("PROXY_CONNECT_TIMEOUT must be >= {MIN_TIMEOUT_MS} ms"));
    }
    if proxy_ms < MIN_TIMEOUT_MS {
        errors.push(format!("PROXY_TIMEOUT must be >= {MIN_TIMEOUT_MS} ms"));
    }
    if preread_ms == 0 {
        errors.push("PREREAD_TIMEOUT must be > 0 ms".to_string());
    }
    if rate_limit_per_ip == 0 {
        errors.push("RATE_LIMIT_PER_IP must be >= 1".to_string());
    }

    if !errors.is_empty() {
        return Err(ProxyError::Config(errors.join("; ")));
    }

    Ok(Config {
        port,
        health_port,
        allowed_ips,
        connect_timeout: Duration::from_millis(connect_ms),
        proxy_timeout: Duration::from_millis(proxy_ms),
        preread_timeout: Duration::from_millis(preread_ms),
        rate_limit_per_ip,
        logging: LoggingConfig { level, pretty },
    })
}

fn parse_var<T>(
    var: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    errors: &mut Vec<String>,
) -> T
where
    T: FromStr,
{
    match var(name) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                errors.push(format!("{name} is not a valid value (got {raw:?})"));
                default
            }
        },
    }
}
