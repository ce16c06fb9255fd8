//! Connectivity probe and the shared HTTP client

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

pub const USER_AGENT: &str = concat!("accessly-kiosk/", env!("CARGO_PKG_VERSION"));
const PROBE_ADDR: &str = "8.8.8.8:53";

/// HTTP client with the kiosk user agent and a request timeout.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// True when a TCP connection to a public DNS resolver succeeds.
pub async fn internet_ok(timeout: Duration) -> bool {
    let Ok(addr) = PROBE_ADDR.parse::<SocketAddr>() else {
        return false;
    };
    reachable(addr, timeout).await
}

pub async fn reachable(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("Unable to establish connection to {}: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("Connection to {} timed out", addr);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reachable_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(reachable(addr, Duration::from_secs(2)).await);
        drop(listener);
    }

    #[tokio::test]
    async fn test_unreachable_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!reachable(addr, Duration::from_secs(2)).await);
    }
}
