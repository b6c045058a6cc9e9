//! A simple, non-persistent TStorage mock server for testing purposes.
//!
//! Mimics the behaviour of a suboptimally configured single-node TStorage
//! system: an in-memory store behind the real wire protocol. Intended for
//! integration tests and for experimenting with the client without access
//! to a production instance.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

mod log;
mod session;
mod store;

pub use store::{ProtocolError, Store, ACQ_FOLLOW_THRESHOLD, MAX_PAYLOAD_SIZE};

use session::SharedLog;

/// Address production-shaped setups expect the mock to listen on.
pub const DEFAULT_ADDR: &str = "127.0.0.1:2090";

/// The mock server: a TCP listener over a shared [`Store`].
///
/// Connections are served concurrently; requests within one connection are
/// strictly serialised, matching the one-request-in-flight channel
/// contract.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    store: Arc<Store>,
    log: Option<SharedLog>,
}

impl Server {
    /// Binds to the given address; use `127.0.0.1:0` in tests for an
    /// ephemeral port and [`local_addr`](Self::local_addr) to find it.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store: Arc::new(Store::new()),
            log: None,
        })
    }

    /// Logs all TCP traffic, hex-dumped, to the file at `path`.
    pub fn with_traffic_log(mut self, path: &Path) -> std::io::Result<Self> {
        self.log = Some(session::open_log(path)?);
        Ok(self)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the backing store.
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Accepts and serves connections until the future is dropped.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, "listening");
        loop {
            let (stream, addr) = self.listener.accept().await?;
            info!(%addr, "incoming connection");
            let store = Arc::clone(&self.store);
            let log = self.log.clone();
            tokio::spawn(async move {
                if let Err(error) = session::serve(stream, store, log).await {
                    warn!(%error, %addr, "connection failed");
                }
            });
        }
    }
}
