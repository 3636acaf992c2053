//! Per-connection pipeline: admission, preread, routing, dial, splice.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::proxy::context::ProxyContext;
use crate::proxy::splice;
use crate::sni::{self, Probe};

/// Terminal outcome of one client connection. Every failure is local to its
/// connection; the handler never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Ok,
    IpDenied,
    RateLimited,
    NotTls,
    HelloTooLarge,
    PrereadTimeout,
    NoSni,
    SniNotAllowed,
    UpstreamUnreachable,
    TransportError,
}

impl CloseReason {
    pub fn is_ok(self) -> bool {
        matches!(self, CloseReason::Ok)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Ok => "ok",
            CloseReason::IpDenied => "ip_denied",
            CloseReason::RateLimited => "rate_limited",
            CloseReason::NotTls => "not_tls",
            CloseReason::HelloTooLarge => "hello_too_large",
            CloseReason::PrereadTimeout => "preread_timeout",
            CloseReason::NoSni => "no_sni",
            CloseReason::SniNotAllowed => "sni_not_allowed",
            CloseReason::UpstreamUnreachable => "upstream_unreachable",
            CloseReason::TransportError => "transport_error",
        }
    }
}

/// Drive one accepted connection to completion and settle the counters:
/// exactly one of successful/failed per connection, on every path.
pub async fn handle_connection(ctx: Arc<ProxyContext>, client: TcpStream, peer: SocketAddr) {
    let reason = drive(&ctx, client, peer).await;
    if reason.is_ok() {
        ctx.stats.record_success();
        info!(%peer, "connection closed");
    } else {
        ctx.stats.record_failure();
        warn!(%peer, reason = reason.as_str(), "connection failed");
    }
}

async fn drive(ctx: &ProxyContext, mut client: TcpStream, peer: SocketAddr) -> CloseReason {
    // Admission control happens before a single byte is read.
    if !ctx.ip_filter.is_allowed(peer.ip()) {
        return CloseReason::IpDenied;
    }
    if !ctx.rate_limiter.check(peer.ip()) {
        return CloseReason::RateLimited;
    }

    let hello = match timeout(
        ctx.config.preread_timeout,
        read_client_hello(&mut client),
    )
    .await
    {
        Ok(Ok(buf)) => buf,
        Ok(Err(reason)) => return reason,
        Err(_) => return CloseReason::PrereadTimeout,
    };

    let Some(sni) = sni::parse(&hello) else {
        return CloseReason::NoSni;
    };

    // Admission is recorded before the route lookup, so hostnames the table
    // rejects still show up in the per-domain counters.
    let _active = ctx.stats.clone().record_admission(&sni, peer.ip());

    let Some(upstream) = ctx.routes.lookup(&sni) else {
        debug!(%peer, sni = %sni, "sni not in route table");
        return CloseReason::SniNotAllowed;
    };

    debug!(%peer, sni = %sni, upstream = %upstream.authority(), "dialing upstream");
    let mut remote = match timeout(
        ctx.config.connect_timeout,
        TcpStream::connect((upstream.host.as_str(), upstream.port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(%peer, upstream = %upstream.authority(), error = %e, "upstream dial failed");
            return CloseReason::UpstreamUnreachable;
        }
        Err(_) => {
            debug!(%peer, upstream = %upstream.authority(), "upstream dial timed out");
            return CloseReason::UpstreamUnreachable;
        }
    };

    // Replay the buffered ClientHello verbatim: the upstream sees the
    // client's own handshake, never one minted here.
    if let Err(e) = remote.write_all(&hello).await {
        debug!(%peer, error = %e, "failed to replay client hello");
        return CloseReason::TransportError;
    }
    drop(hello);

    match splice::splice(client, remote, ctx.config.proxy_timeout).await {
        Ok((to_upstream, to_client)) => {
            debug!(%peer, sni = %sni, to_upstream, to_client, "splice finished");
            CloseReason::Ok
        }
        Err(e) => {
            debug!(%peer, sni = %sni, error = %e, "splice ended with error");
            CloseReason::TransportError
        }
    }
}

/// Append-only preread until the probe reaches a verdict or the buffer cap.
async fn read_client_hello(stream: &mut TcpStream) -> Result<Vec<u8>, CloseReason> {
    let mut buf = Vec::with_capacity(2048);
    loop {
        match sni::probe(&buf) {
            Probe::Complete(_) => return Ok(buf),
            Probe::NotTls => return Err(CloseReason::NotTls),
            Probe::Incomplete => {}
        }
        if buf.len() >= sni::MAX_CLIENT_HELLO_BYTES {
            return Err(CloseReason::HelloTooLarge);
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) => return Err(CloseReason::TransportError),
            Ok(_) => {}
            Err(_) => return Err(CloseReason::TransportError),
        }
    }
}
