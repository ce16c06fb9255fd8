//! Kiosk idle state and the local query channel
//!
//! The kiosk answers one request line per TCP connection on loopback:
//! - `STATUS`  -> `IDLE` | `BUSY`
//! - `RESERVE` -> `GRANTED` | `DENIED`
//!
//! A granted reservation holds until the kiosk process is killed and blocks
//! further logins. When nothing listens, the kiosk is not running and the
//! caller treats it as idle.

use crate::error::{KioskError, KioskResult};
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KioskState {
    Locked,
    Idle,
    LoggedIn,
    Reserved,
}

#[derive(Debug)]
struct Inner {
    /// Never `Idle`; idleness is derived from `last_input` in `state()`.
    state: KioskState,
    last_input: Instant,
}

/// Shared idle tracker for the login wall.
#[derive(Debug, Clone)]
pub struct IdleState {
    inner: Arc<RwLock<Inner>>,
    idle_after: Duration,
    flag_file: Option<PathBuf>,
}

impl IdleState {
    pub fn new(idle_after: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: KioskState::Locked,
                last_input: Instant::now(),
            })),
            idle_after,
            flag_file: None,
        }
    }

    /// Also mirror the idle state into a flag file.
    pub fn with_flag_file(mut self, path: PathBuf) -> Self {
        self.flag_file = Some(path);
        self
    }

    pub fn flag_file(&self) -> Option<&Path> {
        self.flag_file.as_deref()
    }

    pub async fn state(&self) -> KioskState {
        let inner = self.inner.read().await;
        match inner.state {
            KioskState::Locked if inner.last_input.elapsed() >= self.idle_after => KioskState::Idle,
            other => other,
        }
    }

    pub async fn is_idle(&self) -> bool {
        matches!(self.state().await, KioskState::Idle | KioskState::Reserved)
    }

    /// Any keyboard input at the wall.
    pub async fn touch(&self) {
        self.inner.write().await.last_input = Instant::now();
    }

    /// Enter `LoggedIn`. Refused while an update holds the reservation.
    pub async fn login(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state == KioskState::Reserved {
            return false;
        }
        inner.state = KioskState::LoggedIn;
        inner.last_input = Instant::now();
        true
    }

    pub async fn logout(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == KioskState::LoggedIn {
            inner.state = KioskState::Locked;
        }
        inner.last_input = Instant::now();
    }

    /// Grant the update reservation only while idle.
    pub async fn reserve(&self) -> bool {
        let idle = self.state().await;
        let mut inner = self.inner.write().await;
        match (idle, inner.state) {
            (_, KioskState::Reserved) => true,
            (KioskState::Idle, _) => {
                inner.state = KioskState::Reserved;
                info!("Update reservation granted");
                true
            }
            _ => false,
        }
    }

    /// Create or remove the idle flag file to match the current state.
    pub async fn sync_flag(&self) {
        let Some(flag) = &self.flag_file else {
            return;
        };
        let idle = self.is_idle().await;
        let result = match (idle, flag.exists()) {
            (true, false) => std::fs::write(flag, b""),
            (false, true) => std::fs::remove_file(flag),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Could not update idle flag {}: {}", flag.display(), e);
        }
    }

    /// Refresh the flag file once per second until the task is dropped.
    pub fn spawn_flag_watchdog(&self) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                state.sync_flag().await;
            }
        })
    }
}

/// Requests understood by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleRequest {
    Status,
    Reserve,
}

impl IdleRequest {
    fn as_line(self) -> &'static str {
        match self {
            IdleRequest::Status => "STATUS",
            IdleRequest::Reserve => "RESERVE",
        }
    }
}

pub fn channel_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

pub async fn bind(port: u16) -> KioskResult<TcpListener> {
    Ok(TcpListener::bind(channel_addr(port)).await?)
}

/// Answer idle queries until the listener fails.
pub async fn serve(listener: TcpListener, state: IdleState) {
    if let Ok(addr) = listener.local_addr() {
        info!("Idle channel listening on {}", addr);
    }
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &state).await {
                        debug!("Idle channel connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                warn!("Idle channel accept failed: {}", e);
                return;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, state: &IdleState) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read).read_line(&mut line).await?;

    let reply = match line.trim().to_ascii_uppercase().as_str() {
        "STATUS" => {
            if state.is_idle().await {
                "IDLE"
            } else {
                "BUSY"
            }
        }
        "RESERVE" => {
            if state.reserve().await {
                "GRANTED"
            } else {
                "DENIED"
            }
        }
        other => {
            debug!("Unknown idle request: {:?}", other);
            "ERROR"
        }
    };
    write.write_all(format!("{}\n", reply).as_bytes()).await?;
    write.shutdown().await
}

/// Send one request and return the trimmed reply, `None` when nothing
/// listens on the port.
pub async fn query(port: u16, request: IdleRequest) -> KioskResult<Option<String>> {
    let addr = channel_addr(port);
    let mut stream = match tokio::time::timeout(QUERY_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(KioskError::Process(format!("Idle channel {} timed out", addr))),
    };

    stream
        .write_all(format!("{}\n", request.as_line()).as_bytes())
        .await?;
    let mut reply = String::new();
    tokio::time::timeout(QUERY_TIMEOUT, BufReader::new(stream).read_line(&mut reply))
        .await
        .map_err(|_| KioskError::Process(format!("Idle channel {} did not answer", addr)))??;
    Ok(Some(reply.trim().to_string()))
}

/// True when the kiosk reports idle or is not running at all.
pub async fn kiosk_idle(port: u16) -> bool {
    match query(port, IdleRequest::Status).await {
        Ok(None) => true,
        Ok(Some(reply)) => reply == "IDLE",
        Err(e) => {
            warn!("Idle query failed: {}", e);
            false
        }
    }
}

/// Ask the kiosk to hold off logins for an update.
pub async fn request_reservation(port: u16) -> bool {
    match query(port, IdleRequest::Reserve).await {
        Ok(None) => true,
        Ok(Some(reply)) => reply == "GRANTED",
        Err(e) => {
            warn!("Reservation request failed: {}", e);
            false
        }
    }
}
