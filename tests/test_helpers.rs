#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;

use tstorage_client::mock::Server;

static LOGGING: Once = Once::new();

/// Starts the tracing subscriber when `RUST_LOG` asks for output.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        LOGGING.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .init();
        });
    }
}

/// Spawns a fresh mock server on an ephemeral port, returning its address.
pub async fn start_mock_server() -> SocketAddr {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve());
    addr
}

/// Runs a fresh mock server on a background thread with its own runtime,
/// for tests driving the blocking channel.
pub fn start_mock_server_thread() -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let server = Server::bind("127.0.0.1:0").await.unwrap();
            tx.send(server.local_addr().unwrap()).unwrap();
            let _ = server.serve().await;
        });
    });
    rx.recv().unwrap()
}
