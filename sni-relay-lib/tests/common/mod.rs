#![allow(dead_code)] // each test binary uses a different helper subset

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sni_relay_lib::config::Config;
use sni_relay_lib::error;
use sni_relay_lib::proxy::{self, ProxyContext};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Defaults with short deadlines so failure paths resolve quickly.
pub fn test_config() -> Config {
    Config {
        connect_timeout: Duration::from_millis(2_000),
        proxy_timeout: Duration::from_millis(5_000),
        preread_timeout: Duration::from_millis(2_000),
        ..Config::default()
    }
}

/// Bind a loopback listener and run the proxy on it.
pub async fn spawn_proxy(
    ctx: Arc<ProxyContext>,
) -> TestResult<(SocketAddr, JoinHandle<error::Result<()>>, watch::Sender<bool>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(proxy::run(ctx, listener, shutdown_rx));
    Ok((addr, handle, shutdown_tx))
}

/// Poll until `cond` holds or ~2 s elapse; returns the final verdict.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Minimal well-formed ClientHello record carrying one SNI entry.
pub fn client_hello(sni: &str) -> Vec<u8> {
    let name = sni.as_bytes();
    let sni_ext_len = 2 + 1 + 2 + name.len();
    let extensions_len = 4 + sni_ext_len;

    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]); // client_version
    body.extend_from_slice(&[0u8; 32]); // random
    body.push(0); // empty session_id
    body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // one cipher suite
    body.extend_from_slice(&[0x01, 0x00]); // null compression
    body.extend_from_slice(&(extensions_len as u16).to_be_bytes());
    body.extend_from_slice(&[0x00, 0x00]); // server_name extension
    body.extend_from_slice(&(sni_ext_len as u16).to_be_bytes());
    body.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    body.push(0x00); // host_name
    body.extend_from_slice(&(name.len() as u16).to_be_bytes());
    body.extend_from_slice(name);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    record.push(0x01); // ClientHello
    record.push(0);
    record.extend_from_slice(&(body.len() as u16).to_be_bytes());
    record.extend_from_slice(&body);
    record
}
