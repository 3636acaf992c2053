//! Observability sidecar: a small HTTP listener on its own port.
//!
//! Failures here are logged and never take the proxy down.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;
use crate::proxy::ProxyContext;
use crate::telemetry::health::{
    health_response, not_found_response, ready_response, stats_response, RespBody,
};

/// Serve `/health`, `/ready`, `/stats` and the 404 catch-all until the
/// shutdown signal flips.
pub async fn run(
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(addr = ?listener.local_addr()?, "observability server started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "observability accept error");
                        continue;
                    }
                };

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let ctx = ctx.clone();
                        async move {
                            let resp = match req.uri().path() {
                                "/" | "/health" => health_response(),
                                "/ready" => ready_response(),
                                "/stats" => stats_response(&ctx),
                                _ => not_found_response(),
                            };
                            match resp {
                                Ok(resp) => Ok::<_, hyper::Error>(resp),
                                Err(e) => {
                                    warn!(error = %e, "failed to build response");
                                    Ok(internal_error())
                                }
                            }
                        }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "observability serve_connection error");
                    }
                });
            }
        }
    }

    info!("observability server stopped");
    Ok(())
}

fn internal_error() -> hyper::Response<RespBody> {
    let body = Full::new(Bytes::from("Internal Server Error"))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = hyper::Response::new(body);
    *resp.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
    resp
}
