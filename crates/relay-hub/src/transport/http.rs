//! HTTP listeners for the task API.

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use axum::{Extension, Router};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::socket::remove_stale_socket;

/// Request extension marking requests accepted on the local Unix socket.
#[derive(Debug, Clone, Copy)]
pub struct LocalSocket;

/// Serve `app` on `listener` until `shutdown` is cancelled.
///
/// Peer addresses are recorded as `ConnectInfo<SocketAddr>` so the origin
/// check can see them.
pub async fn serve_tcp(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "Listening on TCP");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
}

/// Serve `app` on a Unix socket at `path` until `shutdown` is cancelled.
///
/// The socket file is replaced if stale and removed on exit.
pub async fn serve_unix(path: &Path, app: Router, shutdown: CancellationToken) -> io::Result<()> {
    remove_stale_socket(path)?;
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "Listening on Unix socket");

    let result = axum::serve(listener, app.layer(Extension(LocalSocket)))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
    let _ = remove_stale_socket(path);
    result
}
