#![forbid(unsafe_code)]

mod context;
mod handler;
mod router;
mod splice;
mod stats;

pub use context::ProxyContext;
pub use handler::CloseReason;
pub use router::{default_routes, RouteTable, Upstream};
pub use stats::{SourceCount, StatsSnapshot, StatsTracker, TOP_SOURCES};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;

/// Grace period for in-flight connections after a shutdown signal.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Accept loop: one handler task per connection, shutdown-aware, with a
/// bounded drain of in-flight connections once the signal arrives.
pub async fn run(
    ctx: Arc<ProxyContext>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(addr = ?listener.local_addr()?, "proxy listener bound");

    let in_flight = Arc::new(AtomicUsize::new(0));
    let (drained_tx, mut drained_rx) = watch::channel(());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutdown signal received; no longer accepting");
                break;
            }
            accepted = listener.accept() => {
                let (client, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                in_flight.fetch_add(1, Ordering::Relaxed);
                let guard = HandlerGuard {
                    counter: in_flight.clone(),
                    notifier: drained_tx.clone(),
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    handler::handle_connection(ctx, client, peer).await;
                });
            }
        }
    }

    drop(listener);
    drain(&in_flight, &mut drained_rx, DRAIN_GRACE).await;
    Ok(())
}

/// Decrements the in-flight counter and notifies when the last connection
/// closes, so the drain can finish early.
struct HandlerGuard {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::Relaxed);
        if remaining == 1 {
            let _ = self.notifier.send(());
        }
    }
}

async fn drain(in_flight: &AtomicUsize, drained: &mut watch::Receiver<()>, grace: Duration) {
    let connections = in_flight.load(Ordering::Relaxed);
    if connections == 0 {
        return;
    }
    info!(connections, "waiting for in-flight connections to drain");

    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(
                    remaining = in_flight.load(Ordering::Relaxed),
                    "drain grace elapsed; closing anyway"
                );
                return;
            }
            changed = drained.changed() => {
                if changed.is_err() || in_flight.load(Ordering::Relaxed) == 0 {
                    info!("all connections drained");
                    return;
                }
            }
        }
    }
}
