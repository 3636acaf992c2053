//! JSON response builders for the observability endpoints.

use std::time::Duration;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{Response, StatusCode};
use serde_json::{json, Value};

use crate::error::{ProxyError, Result};
use crate::proxy::ProxyContext;

pub(crate) type RespBody = BoxBody<Bytes, hyper::Error>;

/// Name the deployed service reports, independent of the crate split.
const SERVICE: &str = "sni-relay";

pub(crate) const ENDPOINTS: [&str; 4] = ["/", "/health", "/ready", "/stats"];

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn json_response(status: StatusCode, body: &Value) -> Result<Response<RespBody>> {
    let bytes = serde_json::to_vec(body)
        .map_err(|e| ProxyError::Http(format!("Failed to serialize response: {e}")))?;
    let body = Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(body)
        .map_err(|e| ProxyError::Http(format!("Failed to build response: {e}")))
}

/// `GET /health` and `GET /` - always 200 while the process runs.
pub fn health_response() -> Result<Response<RespBody>> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "timestamp": timestamp(),
            "service": SERVICE,
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// `GET /ready` - the proxy has no warm-up phase, so readiness tracks
/// liveness.
pub fn ready_response() -> Result<Response<RespBody>> {
    json_response(
        StatusCode::OK,
        &json!({
            "ready": true,
            "timestamp": timestamp(),
        }),
    )
}

/// `GET /stats` - connection counters plus the effective configuration.
pub fn stats_response(ctx: &ProxyContext) -> Result<Response<RespBody>> {
    let snapshot = ctx.stats.snapshot();
    let uptime = ctx.stats.uptime();
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "timestamp": timestamp(),
            "stats": {
                "uptime": {
                    "ms": uptime.as_millis() as u64,
                    "human": format_uptime(uptime),
                },
                "connections": {
                    "total": snapshot.total,
                    "active": snapshot.active,
                    "successful": snapshot.successful,
                    "failed": snapshot.failed,
                },
                "domains": snapshot.domains,
                "topIPs": snapshot.top_sources,
            },
            "config": {
                "allowedDomains": ctx.routes.hostnames(),
                "ipFilterRules": ctx.ip_filter.rules(),
                "port": ctx.config.port,
            },
        }),
    )
}

/// Catch-all 404 listing what does exist.
pub fn not_found_response() -> Result<Response<RespBody>> {
    json_response(
        StatusCode::NOT_FOUND,
        &json!({
            "error": "Not found",
            "availableEndpoints": ENDPOINTS,
        }),
    )
}

/// Compact `1d 2h 3m 4s` rendering, dropping leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || !parts.is_empty() {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || !parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime_seconds_only() {
        assert_eq!(format_uptime(Duration::from_secs(12)), "12s");
    }

    #[test]
    fn test_format_uptime_full() {
        let d = Duration::from_secs(86_400 + 2 * 3_600 + 3 * 60 + 4);
        assert_eq!(format_uptime(d), "1d 2h 3m 4s");
    }

    #[test]
    fn test_format_uptime_keeps_inner_zero_units() {
        let d = Duration::from_secs(3_600 + 5);
        assert_eq!(format_uptime(d), "1h 0m 5s");
    }

    #[test]
    fn test_health_response_shape() {
        let resp = health_response().expect("health");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("Content-Type").map(|v| v.as_bytes()),
            Some(b"application/json".as_ref())
        );
        assert_eq!(
            resp.headers()
                .get("Access-Control-Allow-Origin")
                .map(|v| v.as_bytes()),
            Some(b"*".as_ref())
        );
    }

    #[test]
    fn test_not_found_lists_endpoints() {
        let resp = not_found_response().expect("404");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
