//! A minimal in-process broker stand-in for kernel and link tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};

pub(crate) struct FakeBroker {
    pub port: u16,
    contacted: Arc<AtomicBool>,
    task: JoinHandle<Vec<u8>>,
}

impl FakeBroker {
    /// Accepts one client, answers its CONNECT with a CONNACK carrying
    /// `return_code`, then either keeps reading until the client closes
    /// (`hold_open`) or hangs up immediately.
    pub async fn start(return_code: u8, hold_open: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let contacted = Arc::new(AtomicBool::new(false));
        let flag = contacted.clone();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            flag.store(true, Ordering::SeqCst);

            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            received.extend_from_slice(&buf[..n]);
            let _ = socket.write_all(&[0x20, 0x02, 0x00, return_code]).await;

            if hold_open {
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => received.extend_from_slice(&buf[..n]),
                    }
                }
            }
            received
        });

        Self {
            port,
            contacted,
            task,
        }
    }

    pub fn was_contacted(&self) -> bool {
        self.contacted.load(Ordering::SeqCst)
    }

    /// Every byte the client sent, available once the connection closed.
    pub async fn received(self) -> Vec<u8> {
        self.task.await.unwrap()
    }
}

/// A local port with nothing listening on it.
pub(crate) async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
