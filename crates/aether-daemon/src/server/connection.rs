//! Per-connection decode/dispatch/encode loop.
//!
//! The wire is length-less JSON documents streamed back-to-back, so the
//! reader accumulates bytes and peels off one complete document at a time
//! with a streaming deserializer. Newlines between documents are tolerated
//! but not required.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::{debug, warn};

use super::handlers::{ServerCtx, dispatch};
use aether_protocol::{Request, Response};

/// Result of trying to peel one request off the front of the buffer.
enum Decoded {
    /// A complete document and how many bytes it consumed.
    Request(Box<Request>, usize),
    /// The buffer holds only a prefix of a document; read more.
    Incomplete,
    /// The buffer cannot ever parse; the connection is poisoned.
    Malformed(String),
}

fn decode_one(buf: &[u8]) -> Decoded {
    let mut documents = serde_json::Deserializer::from_slice(buf).into_iter::<Request>();
    match documents.next() {
        Some(Ok(request)) => Decoded::Request(Box::new(request), documents.byte_offset()),
        Some(Err(e)) if e.is_eof() => Decoded::Incomplete,
        Some(Err(e)) => Decoded::Malformed(e.to_string()),
        // Whitespace only
        None => Decoded::Incomplete,
    }
}

pub async fn handle_connection(mut stream: UnixStream, ctx: Arc<ServerCtx>) {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);

    loop {
        match decode_one(&buf) {
            Decoded::Request(request, consumed) => {
                buf.drain(..consumed);
                debug!(
                    event = "daemon.server.request_received",
                    method = %request.method,
                );
                let response = dispatch(&ctx, *request).await;
                if let Err(e) = write_response(&mut stream, &response).await {
                    debug!(event = "daemon.server.write_failed", error = %e);
                    return;
                }
            }
            Decoded::Incomplete => {
                use tokio::io::AsyncReadExt;
                match stream.read_buf(&mut buf).await {
                    Ok(0) => {
                        debug!(event = "daemon.server.client_disconnected");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(event = "daemon.server.read_failed", error = %e);
                        return;
                    }
                }
            }
            Decoded::Malformed(message) => {
                warn!(event = "daemon.server.malformed_request", error = %message);
                let response = Response::err(format!("invalid request JSON: {message}"));
                let _ = write_response(&mut stream, &response).await;
                return;
            }
        }
    }
}

async fn write_response(
    stream: &mut UnixStream,
    response: &Response,
) -> std::io::Result<()> {
    let mut wire = serde_json::to_vec(response).unwrap_or_else(|_| {
        // A response we built ourselves failing to serialize is a bug, but
        // the client still deserves a parseable answer
        b"{\"success\":false,\"error\":\"internal serialization failure\"}".to_vec()
    });
    wire.push(b'\n');
    stream.write_all(&wire).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_one_complete_document() {
        let wire = br#"{"method":"status.full"}"#;
        match decode_one(wire) {
            Decoded::Request(request, consumed) => {
                assert_eq!(request.method, "status.full");
                assert_eq!(consumed, wire.len());
            }
            _ => panic!("expected a request"),
        }
    }

    #[test]
    fn test_decode_one_back_to_back_documents() {
        let wire = br#"{"method":"pool.drain"}{"method":"pool.resume"}"#;
        let Decoded::Request(first, consumed) = decode_one(wire) else {
            panic!("expected a request");
        };
        assert_eq!(first.method, "pool.drain");
        let Decoded::Request(second, _) = decode_one(&wire[consumed..]) else {
            panic!("expected a second request");
        };
        assert_eq!(second.method, "pool.resume");
    }

    #[test]
    fn test_decode_one_partial_document_is_incomplete() {
        assert!(matches!(
            decode_one(br#"{"method":"stat"#),
            Decoded::Incomplete
        ));
    }

    #[test]
    fn test_decode_one_whitespace_is_incomplete() {
        assert!(matches!(decode_one(b"  \n  "), Decoded::Incomplete));
        assert!(matches!(decode_one(b""), Decoded::Incomplete));
    }

    #[test]
    fn test_decode_one_garbage_is_malformed() {
        assert!(matches!(
            decode_one(b"not json at all"),
            Decoded::Malformed(_)
        ));
    }

    #[test]
    fn test_decode_one_newline_separated_documents() {
        let wire = b"{\"method\":\"pool.pause\"}\n{\"method\":\"pool.resume\"}\n";
        let Decoded::Request(first, consumed) = decode_one(wire) else {
            panic!("expected a request");
        };
        assert_eq!(first.method, "pool.pause");
        let Decoded::Request(second, _) = decode_one(&wire[consumed..]) else {
            panic!("expected a second request");
        };
        assert_eq!(second.method, "pool.resume");
    }
}
