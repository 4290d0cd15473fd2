//! A TCP listener that records every byte it receives.
//!
//! Each accepted connection is drained on its own task so the sender can
//! reconnect while earlier sockets are still being read.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{io::AsyncReadExt, net::TcpListener, task::JoinHandle};

pub struct Collector {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<u8>>>,
    accept_loop: JoinHandle<()>,
}

impl Collector {
    pub async fn start() -> Self {
        Self::start_on(0).await
    }

    pub async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind collector");
        let addr = listener.local_addr().expect("collector address");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let accept_loop = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    let mut chunk = [0u8; 4096];
                    while let Ok(n) = socket.read(&mut chunk).await {
                        if n == 0 {
                            break;
                        }
                        sink.lock().extend_from_slice(&chunk[..n]);
                    }
                });
            }
        });
        Self {
            addr,
            received,
            accept_loop,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait until at least `len` bytes have arrived and return them all.
    pub async fn wait_for(&self, len: usize) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let received = self.received.lock().clone();
                if received.len() >= len {
                    return received;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("collector did not receive enough bytes")
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("reserve local port")
}
