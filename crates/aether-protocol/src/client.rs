//! Synchronous RPC client for the aetherflow daemon socket.
//!
//! Used by CLI tooling and integration tests. Wire framing is length-less
//! JSON documents streamed back-to-back; the reader therefore consumes
//! exactly one document per call via a streaming deserializer rather than
//! assuming line boundaries.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::messages::{Request, Response};

/// Error from the client layer.
#[non_exhaustive]
#[derive(Debug)]
pub enum ClientError {
    /// Daemon socket does not exist or connection was refused.
    NotRunning { path: String },
    /// Socket exists but connection failed for a non-refused reason.
    ConnectionFailed(std::io::Error),
    /// Daemon returned `success=false`.
    Daemon { message: String },
    /// Serialization or framing error.
    Protocol { message: String },
    /// Other I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotRunning { path } => {
                write!(f, "daemon is not running (socket not found at {path})")
            }
            ClientError::ConnectionFailed(e) => write!(f, "connection failed: {e}"),
            ClientError::Daemon { message } => write!(f, "daemon error: {message}"),
            ClientError::Protocol { message } => write!(f, "protocol error: {message}"),
            ClientError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::ConnectionFailed(e) | ClientError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

/// A synchronous connection to the aetherflow daemon.
#[derive(Debug)]
pub struct Client {
    stream: UnixStream,
}

impl Client {
    /// Connect to the daemon socket at `path`.
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                ClientError::NotRunning {
                    path: path.display().to_string(),
                }
            }
            _ => ClientError::ConnectionFailed(e),
        })?;
        Ok(Self { stream })
    }

    /// Set the read timeout for subsequent calls.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send one request and read one response document.
    ///
    /// Returns the `result` payload on success; a `success=false` response
    /// becomes `ClientError::Daemon`.
    pub fn call(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        let request = Request {
            method: method.to_string(),
            params,
        };
        let wire = serde_json::to_vec(&request).map_err(|e| ClientError::Protocol {
            message: format!("failed to serialize request: {e}"),
        })?;
        self.stream.write_all(&wire)?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()?;

        let response = self.read_response()?;
        if response.success {
            Ok(response.result.unwrap_or(serde_json::Value::Null))
        } else {
            Err(ClientError::Daemon {
                message: response
                    .error
                    .unwrap_or_else(|| "daemon returned failure with no message".to_string()),
            })
        }
    }

    fn read_response(&mut self) -> Result<Response, ClientError> {
        let mut documents =
            serde_json::Deserializer::from_reader(&mut self.stream).into_iter::<Response>();
        match documents.next() {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(ClientError::Protocol {
                message: format!("invalid response JSON: {e}"),
            }),
            None => Err(ClientError::Protocol {
                message: "connection closed before response".to_string(),
            }),
        }
    }
}
