#![forbid(unsafe_code)]

mod common;

use std::time::Duration;

use common::{client_hello, spawn_proxy, test_config, wait_for, TestResult};
use sni_relay_lib::config::Config;
use sni_relay_lib::proxy::{ProxyContext, RouteTable, Upstream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

#[tokio::test]
async fn happy_path_replays_hello_and_splices() -> TestResult {
    let hello = client_hello("fw-download.ubnt.com");
    let hello_len = hello.len();

    let upstream_listener = TcpListener::bind("127.0.0.1:0").await?;
    let upstream_addr = upstream_listener.local_addr()?;
    let (received_tx, received_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = upstream_listener.accept().await {
            let mut buf = vec![0u8; hello_len];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = received_tx.send(buf);
                let _ = stream.write_all(b"upstream-response").await;
            }
            // Drain until the client half-closes so the splice ends cleanly.
            let mut sink = [0u8; 64];
            while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
        }
    });

    let routes = RouteTable::new([(
        "fw-download.ubnt.com".to_string(),
        Upstream::new("127.0.0.1", upstream_addr.port()),
    )]);
    let ctx = ProxyContext::new(test_config(), routes);
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    let mut client = TcpStream::connect(proxy_addr).await?;
    client.write_all(&hello).await?;

    let mut response = [0u8; 17];
    client.read_exact(&mut response).await?;
    assert_eq!(&response, b"upstream-response");

    let replayed = timeout(Duration::from_secs(2), received_rx).await??;
    assert_eq!(replayed, hello, "upstream must see the client hello verbatim");

    client.shutdown().await?;
    let mut rest = [0u8; 1];
    assert_eq!(client.read(&mut rest).await?, 0, "proxy closes after splice");

    let stats = ctx.stats.clone();
    assert!(
        wait_for(|| {
            let s = stats.snapshot();
            s.total == 1 && s.successful == 1 && s.active == 0
        })
        .await,
        "stats must settle: {:?}",
        stats.snapshot()
    );
    let snap = stats.snapshot();
    assert_eq!(snap.failed, 0);
    assert_eq!(snap.domains.get("fw-download.ubnt.com"), Some(&1));
    assert_eq!(snap.top_sources.len(), 1);
    assert_eq!(snap.top_sources[0].ip, "127.0.0.1");

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn unknown_sni_is_counted_then_closed() -> TestResult {
    let ctx = ProxyContext::new(test_config(), RouteTable::default());
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    let mut client = TcpStream::connect(proxy_addr).await?;
    client.write_all(&client_hello("example.com")).await?;

    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)), "closed without upstream dial");

    let stats = ctx.stats.clone();
    assert!(
        wait_for(|| {
            let s = stats.snapshot();
            s.total == 1 && s.failed == 1 && s.active == 0
        })
        .await
    );
    // The hostname is still counted at admission time.
    assert_eq!(stats.snapshot().domains.get("example.com"), Some(&1));

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn denied_source_is_closed_before_any_read() -> TestResult {
    let config = Config {
        allowed_ips: "10.0.0.0/8".to_string(),
        ..test_config()
    };
    let ctx = ProxyContext::new(config, RouteTable::default());
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    let mut client = TcpStream::connect(proxy_addr).await?;
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)));

    let stats = ctx.stats.clone();
    assert!(wait_for(|| stats.snapshot().failed == 1).await);
    let snap = stats.snapshot();
    assert_eq!(snap.total, 0, "policy rejects before the admission record");
    assert!(snap.domains.is_empty());
    assert!(snap.top_sources.is_empty());

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn rate_limit_rejects_third_connection() -> TestResult {
    let config = Config {
        rate_limit_per_ip: 2,
        ..test_config()
    };
    let ctx = ProxyContext::new(config, RouteTable::default());
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    // First two are admitted and fail on the empty route table.
    for _ in 0..2 {
        let mut client = TcpStream::connect(proxy_addr).await?;
        client.write_all(&client_hello("svc.test")).await?;
        let mut buf = [0u8; 1];
        let _ = timeout(Duration::from_secs(2), client.read(&mut buf)).await?;
    }

    let stats = ctx.stats.clone();
    assert!(wait_for(|| stats.snapshot().failed == 2).await);

    // Third is dropped by the limiter before any read.
    let mut third = TcpStream::connect(proxy_addr).await?;
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), third.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)));

    assert!(wait_for(|| stats.snapshot().failed == 3).await);
    assert_eq!(stats.snapshot().total, 2, "the limited connection was never admitted");

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn non_tls_bytes_are_rejected() -> TestResult {
    let ctx = ProxyContext::new(test_config(), RouteTable::default());
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    let mut client = TcpStream::connect(proxy_addr).await?;
    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await?;

    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)));

    let stats = ctx.stats.clone();
    assert!(wait_for(|| stats.snapshot().failed == 1).await);
    assert_eq!(stats.snapshot().total, 0);

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn silent_client_hits_preread_timeout() -> TestResult {
    let config = Config {
        preread_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let ctx = ProxyContext::new(config, RouteTable::default());
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    let mut client = TcpStream::connect(proxy_addr).await?;
    // Send nothing; the preread deadline must close the connection.
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)));

    let stats = ctx.stats.clone();
    assert!(wait_for(|| stats.snapshot().failed == 1).await);
    assert_eq!(stats.snapshot().total, 0);

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn oversized_hello_is_rejected_at_the_cap() -> TestResult {
    let ctx = ProxyContext::new(test_config(), RouteTable::default());
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    let mut client = TcpStream::connect(proxy_addr).await?;
    // Record header claims 0xFFFF payload bytes, which can never fit the cap.
    let mut oversized = vec![0x16, 0x03, 0x01, 0xFF, 0xFF];
    oversized.extend_from_slice(&vec![0u8; 17 * 1024]);
    // The proxy may close mid-write; only the close itself matters.
    let _ = client.write_all(&oversized).await;

    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_)) | Err(_)));

    let stats = ctx.stats.clone();
    assert!(wait_for(|| stats.snapshot().failed == 1).await);

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn unreachable_upstream_fails_the_connection() -> TestResult {
    // Unroutable bogon, as in classic connect-timeout tests.
    let routes = RouteTable::new([(
        "svc.test".to_string(),
        Upstream::new("10.255.255.1", 9),
    )]);
    let config = Config {
        connect_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let ctx = ProxyContext::new(config, routes);
    let (proxy_addr, proxy, _shutdown) = spawn_proxy(ctx.clone()).await?;

    let mut client = TcpStream::connect(proxy_addr).await?;
    client.write_all(&client_hello("svc.test")).await?;

    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(3), client.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)));

    let stats = ctx.stats.clone();
    assert!(
        wait_for(|| {
            let s = stats.snapshot();
            s.total == 1 && s.failed == 1 && s.active == 0
        })
        .await
    );

    proxy.abort();
    Ok(())
}

#[tokio::test]
async fn graceful_shutdown_stops_accepting() -> TestResult {
    let ctx = ProxyContext::new(test_config(), RouteTable::default());
    let (proxy_addr, proxy, shutdown) = spawn_proxy(ctx).await?;

    // Prove the listener is up, then signal shutdown.
    let probe = TcpStream::connect(proxy_addr).await?;
    drop(probe);
    shutdown.send(true)?;

    let run_result = timeout(Duration::from_secs(10), proxy).await??;
    assert!(run_result.is_ok(), "run exits cleanly after drain");

    // The listener socket is gone; new connections must fail.
    let reconnect = timeout(Duration::from_millis(500), TcpStream::connect(proxy_addr)).await;
    assert!(matches!(reconnect, Ok(Err(_)) | Err(_)));
    Ok(())
}
