//! Bidirectional byte relay with a shared idle deadline.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

const COPY_BUF_BYTES: usize = 16 * 1024;

/// How long the surviving direction may keep running after the opposite
/// direction has hit EOF and been half-closed.
pub const HALF_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Shared lifecycle state for the two copy directions: the last moment
/// either direction moved bytes, and the moment the first direction ended.
struct ActivityClock {
    start: Instant,
    last_ms: AtomicU64,
    // ms since `start` of the first EOF; MAX until one direction ends.
    half_closed_ms: AtomicU64,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
            half_closed_ms: AtomicU64::new(u64::MAX),
        }
    }

    fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.start.elapsed().saturating_sub(last)
    }

    fn mark_half_closed(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.half_closed_ms.fetch_min(elapsed, Ordering::Relaxed);
    }

    /// Time since the first direction ended, if any has.
    fn half_closed_for(&self) -> Option<Duration> {
        let at = self.half_closed_ms.load(Ordering::Relaxed);
        if at == u64::MAX {
            return None;
        }
        Some(
            self.start
                .elapsed()
                .saturating_sub(Duration::from_millis(at)),
        )
    }
}

/// Relay bytes in both directions until EOF on either side, a transport
/// error, or `idle` passing with no traffic in either direction.
///
/// EOF on one direction half-closes the opposite peer; from that moment the
/// surviving direction races a short grace deadline and is force-closed
/// when it elapses. The forced close is a normal end of the splice, not an
/// error. An error on either side tears the whole splice down. Returns
/// bytes copied client→upstream and upstream→client.
pub async fn splice(
    client: TcpStream,
    upstream: TcpStream,
    idle: Duration,
) -> io::Result<(u64, u64)> {
    let clock = Arc::new(ActivityClock::new());
    let (mut client_rd, mut client_wr) = client.into_split();
    let (mut upstream_rd, mut upstream_wr) = upstream.into_split();

    tokio::try_join!(
        copy_half(&mut client_rd, &mut upstream_wr, idle, HALF_CLOSE_GRACE, &clock),
        copy_half(&mut upstream_rd, &mut client_wr, idle, HALF_CLOSE_GRACE, &clock),
    )
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Duration,
    grace: Duration,
    clock: &ActivityClock,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_BYTES];
    let mut copied = 0u64;
    loop {
        let mut budget = idle.saturating_sub(clock.idle_for());
        if let Some(since) = clock.half_closed_for() {
            budget = budget.min(grace.saturating_sub(since));
        }
        let read = match timeout(budget, reader.read(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                if let Some(since) = clock.half_closed_for() {
                    // The opposite direction already ended; once the grace
                    // (or the idle budget) runs out, force-close this one.
                    if since >= grace || clock.idle_for() >= idle {
                        break;
                    }
                } else if clock.idle_for() >= idle {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "splice idle timeout",
                    ));
                }
                // The other direction has been active; keep waiting.
                continue;
            }
        };
        if read == 0 {
            break;
        }
        writer.write_all(&buf[..read]).await?;
        clock.touch();
        copied = copied.saturating_add(read as u64);
    }
    // Half-close so the peer sees EOF while the reverse direction drains.
    clock.mark_half_closed();
    let _ = writer.shutdown().await;
    Ok(copied)
}
