//! Common utilities for integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tcp_mirror::{CaptureSinks, Forwarder, ForwarderConfig, ForwarderStats, StatsSnapshot};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default upper bound for any network wait in tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An address nobody is listening on
pub async fn unreachable_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);
    addr.to_string()
}

/// Create a simple echo server for testing
pub async fn start_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) => break, // Connection closed
                                Ok(n) => {
                                    if socket.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, handle)
}

/// A forwarder running in the background, stopped on drop
pub struct RunningForwarder {
    pub addr: SocketAddr,
    pub stats: ForwarderStats,
    pub shutdown: CancellationToken,
    pub handle: Option<JoinHandle<tcp_mirror::Result<StatsSnapshot>>>,
}

impl RunningForwarder {
    /// Stop accepting and return the final snapshot
    pub async fn stop(mut self) -> StatsSnapshot {
        self.shutdown.cancel();
        let handle = self.handle.take().expect("forwarder already stopped");
        timeout(TEST_TIMEOUT, handle)
            .await
            .expect("Timeout waiting for forwarder to stop")
            .expect("Forwarder task panicked")
            .expect("Forwarder returned an error")
    }
}

impl Drop for RunningForwarder {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Start a forwarder on an ephemeral loopback port
pub async fn start_forwarder(
    target: &str,
    buffer_size: usize,
    captures: CaptureSinks,
) -> RunningForwarder {
    let mut config = ForwarderConfig::new(target);
    config.listen_addr = "127.0.0.1".to_string();
    config.source_port = 0;
    config.buffer_size = buffer_size;

    let forwarder = Forwarder::bind(&config, captures)
        .await
        .expect("Failed to bind forwarder");
    let addr = forwarder.local_addr();
    let stats = forwarder.stats();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(forwarder.run(shutdown.clone()));

    RunningForwarder {
        addr,
        stats,
        shutdown,
        handle: Some(handle),
    }
}

/// Send data through the forwarder to an echo target and read it back
pub async fn echo_through(addr: SocketAddr, test_data: &[u8]) -> Result<Vec<u8>, String> {
    timeout(TEST_TIMEOUT, async {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("Failed to connect to forwarder: {}", e))?;
        let (mut reader, mut writer) = stream.into_split();

        let data = test_data.to_vec();
        let write_task = tokio::spawn(async move {
            writer.write_all(&data).await.map(|_| writer)
        });

        let mut response = Vec::with_capacity(test_data.len());
        let mut buf = vec![0u8; 8192];
        while response.len() < test_data.len() {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&buf[..n]),
                Err(e) => return Err(format!("Failed to read response: {}", e)),
            }
        }

        write_task
            .await
            .map_err(|e| format!("Writer task failed: {}", e))?
            .map_err(|e| format!("Failed to write data: {}", e))?;

        Ok(response)
    })
    .await
    .map_err(|_| "Timeout waiting for response".to_string())?
}

/// Poll until `check` holds or the timeout elapses
pub async fn wait_for<F>(mut check: F, max: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + max;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Unique temp file path for capture output
pub fn temp_capture_path(tag: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    std::env::temp_dir().join(format!(
        "tcp-mirror-test-{}-{}-{}-{}.bin",
        tag,
        timestamp,
        counter,
        std::process::id()
    ))
}

/// Cleanup function for test resources
pub struct TestCleanup {
    paths: Vec<PathBuf>,
}

impl TestCleanup {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}
