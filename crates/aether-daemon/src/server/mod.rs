//! RPC server: a single owner-only Unix stream socket.
//!
//! Socket permissions drop to 0700 immediately after bind so other local
//! users cannot issue commands (particularly `shutdown`). Each connection
//! runs an independent decode/dispatch/encode loop.

mod connection;
pub(crate) mod detail;
mod handlers;


use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::DaemonError;

pub use handlers::ServerCtx;

/// Bind the daemon socket, replacing a stale one, and restrict it to the
/// owning user before anything can connect through it.
pub fn bind_socket(path: &Path) -> Result<UnixListener, DaemonError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DaemonError::DirCreate {
            path: parent.display().to_string(),
            source: e,
        })?;
        // Owner-only directory too: the socket file mode alone does not
        // stop traversal on every platform
        if let Err(e) =
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
        {
            warn!(
                event = "daemon.server.socket_dir_chmod_failed",
                path = %parent.display(),
                error = %e,
            );
        }
    }

    if path.exists() {
        std::fs::remove_file(path).map_err(|e| DaemonError::SocketBind {
            path: path.display().to_string(),
            message: format!("failed to remove stale socket: {e}"),
        })?;
    }

    let listener = UnixListener::bind(path).map_err(|e| DaemonError::SocketBind {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
        DaemonError::SocketPermissions {
            path: path.display().to_string(),
            source: e,
        }
    })?;

    info!(
        event = "daemon.server.socket_bound",
        path = %path.display(),
    );
    Ok(listener)
}

/// Accept connections until cancellation.
pub async fn run(listener: UnixListener, ctx: Arc<ServerCtx>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(event = "daemon.server.accept_loop_cancelled");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(connection::handle_connection(stream, ctx));
                    }
                    Err(e) => {
                        warn!(event = "daemon.server.accept_failed", error = %e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_socket_sets_owner_only_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sockets").join("myproj.sock");
        let _listener = bind_socket(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_bind_socket_replaces_stale_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("myproj.sock");
        std::fs::write(&path, b"stale").unwrap();
        let _listener = bind_socket(&path).unwrap();
        // The stale regular file is gone, replaced by the socket
        let meta = std::fs::symlink_metadata(&path).unwrap();
        assert!(!meta.file_type().is_file());
    }
}
