//! Raw Unix-domain-socket listener.
//!
//! Connections are served one at a time in the order the kernel hands them
//! out; clients connecting meanwhile wait in the listen backlog. Each
//! connection is read until the peer shuts down its write side, and the
//! payload is queued together with a per-connection id.
//!
//! The accept loop waits at most `accept_timeout` for the next client. When
//! nobody connects in time the listener stops on its own, so it can never
//! hang waiting for a client that will not come. Reading one connection is
//! bounded by the same timeout; a peer that never finishes sending is
//! dropped without queueing anything.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One connection's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub data: Vec<u8>,
    /// Unique per accepted connection, increasing in acceptance order.
    pub socket_id: u64,
}

pub struct SocketListener {
    socket_path: PathBuf,
    fileno: RawFd,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    data_queue: Mutex<mpsc::UnboundedReceiver<Received>>,
}

impl SocketListener {
    /// Bind `socket_path` and start accepting. Must be called inside a Tokio runtime.
    ///
    /// A stale socket file at `socket_path` is replaced.
    pub fn bind(socket_path: impl Into<PathBuf>, accept_timeout: Duration) -> io::Result<Self> {
        let socket_path = socket_path.into();
        remove_stale_socket(&socket_path)?;
        let listener = UnixListener::bind(&socket_path)?;
        let fileno = listener.as_raw_fd();

        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        debug!(path = %socket_path.display(), timeout = ?accept_timeout, "Socket listening");
        tokio::spawn(accept_loop(
            listener,
            accept_timeout,
            tx,
            Arc::clone(&running),
            cancel.clone(),
        ));

        Ok(Self {
            socket_path,
            fileno,
            running,
            cancel,
            data_queue: Mutex::new(rx),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Raw descriptor of the listening socket. Stale once the listener stopped.
    pub fn fileno(&self) -> RawFd {
        self.fileno
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Next queued payload, waiting up to `timeout`.
    pub async fn next_message(&self, timeout: Duration) -> Option<Received> {
        let mut queue = self.data_queue.lock().await;
        tokio::time::timeout(timeout, queue.recv())
            .await
            .ok()
            .flatten()
    }

    /// Stop accepting. Payloads already queued remain readable.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = std::fs::remove_file(&self.socket_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.socket_path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    accept_timeout: Duration,
    tx: mpsc::UnboundedSender<Received>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut next_id: u64 = 0;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(accept_timeout, listener.accept()) => result,
        };
        let mut stream = match accepted {
            Ok(Ok((stream, _addr))) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "Accept failed, stopping listener");
                break;
            }
            Err(_elapsed) => {
                debug!("No client within accept timeout, stopping listener");
                break;
            }
        };

        next_id += 1;
        let socket_id = next_id;
        let mut data = Vec::new();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = tokio::time::timeout(accept_timeout, stream.read_to_end(&mut data)) => read,
        };
        let Ok(read) = read else {
            warn!(socket_id, timeout = ?accept_timeout, "Connection not finished in time, dropping it");
            continue;
        };
        match read {
            Ok(len) => {
                debug!(socket_id, len, "Connection drained");
                if tx.send(Received { data, socket_id }).is_err() {
                    break;
                }
            }
            Err(e) => warn!(socket_id, error = %e, "Failed to read connection"),
        }
    }

    running.store(false, Ordering::SeqCst);
    debug!("Socket listener stopped");
}

pub(crate) fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    async fn send(path: &Path, payload: &[u8]) {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn accept_does_not_block_indefinitely() {
        let dir = TempDir::new().unwrap();
        let listener = SocketListener::bind(dir.path().join("relay.sock"), Duration::from_millis(100)).unwrap();
        assert!(listener.is_running());
        assert!(listener.fileno() >= 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn sequential_clients_get_distinct_ids_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = SocketListener::bind(&path, Duration::from_secs(2)).unwrap();

        send(&path, b"first").await;
        send(&path, b"second").await;

        let a = listener.next_message(Duration::from_secs(2)).await.unwrap();
        let b = listener.next_message(Duration::from_secs(2)).await.unwrap();
        assert_eq!(a.data, b"first");
        assert_eq!(b.data, b"second");
        assert_ne!(a.socket_id, b.socket_id);
        assert!(a.socket_id < b.socket_id);
    }

    #[tokio::test]
    async fn silent_client_is_dropped_after_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = SocketListener::bind(&path, Duration::from_millis(200)).unwrap();

        let mut silent = UnixStream::connect(&path).await.unwrap();
        silent.write_all(b"never finished").await.unwrap();
        send(&path, b"after").await;

        let msg = listener.next_message(Duration::from_secs(2)).await.unwrap();
        assert_eq!(msg.data, b"after");
        assert_eq!(msg.socket_id, 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!listener.is_running());
        assert!(listener.next_message(Duration::from_millis(50)).await.is_none());
        drop(silent);
    }

    #[tokio::test]
    async fn empty_connection_yields_empty_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = SocketListener::bind(&path, Duration::from_secs(2)).unwrap();

        send(&path, b"").await;
        let msg = listener.next_message(Duration::from_secs(2)).await.unwrap();
        assert!(msg.data.is_empty());
    }

    #[tokio::test]
    async fn drop_removes_socket_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = SocketListener::bind(&path, Duration::from_secs(2)).unwrap();
        assert!(path.exists());

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stop_ends_accept_loop() {
        let dir = TempDir::new().unwrap();
        let listener = SocketListener::bind(dir.path().join("relay.sock"), Duration::from_secs(30)).unwrap();
        listener.stop();
        assert!(!listener.is_running());
        assert!(listener.next_message(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        std::fs::write(&path, b"").unwrap();

        let listener = SocketListener::bind(&path, Duration::from_secs(2)).unwrap();
        send(&path, b"hello").await;
        let msg = listener.next_message(Duration::from_secs(2)).await.unwrap();
        assert_eq!(msg.data, b"hello");
    }
}
