//! Public ingress
//!
//! Accepts public HTTP connections, reads just far enough to resolve
//! the Host header, and parks the raw socket until the routed agent
//! dials back, keeping every byte read so far as the replay prefix.
//! The bytes are never re-serialized, so the local service receives
//! the request exactly as the public caller sent it.

use crate::relay::RelayError;
use crate::state::{ParkOutcome, ServerState};
use burrow_proto::{ControlEnvelope, OpenDataConnection, KIND_OPEN_DATA_CONNECTION};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

/// Cap on the request line + header block; beyond this the request is
/// refused without routing.
const MAX_HEADER_BYTES: usize = 64 * 1024;

const RESPONSE_400: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 15\r\n\r\nNo Host header\n";
const RESPONSE_404: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 16\r\n\r\nRoute not found\n";
const RESPONSE_431: &[u8] =
    b"HTTP/1.1 431 Request Header Fields Too Large\r\nContent-Length: 23\r\n\r\nHeader block too large\n";
const RESPONSE_500: &[u8] =
    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 22\r\n\r\nInternal Server Error\n";
const RESPONSE_502: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 18\r\n\r\nAgent unreachable\n";

pub(crate) async fn run_public_listener(
    listener: TcpListener,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_public_conn(stream, peer_addr, state).await;
                });
            }
            Err(error) => {
                error!(%error, "failed to accept public connection");
            }
        }
    }
}

async fn handle_public_conn(mut conn: TcpStream, peer_addr: SocketAddr, state: Arc<ServerState>) {
    let prefix = match read_header_block(&mut conn).await {
        Ok(HeaderRead::Complete(buf)) => buf.freeze(),
        Ok(HeaderRead::Eof) => return,
        Ok(HeaderRead::TooLarge) => {
            warn!(peer = %peer_addr, "public request header block too large");
            respond(&mut conn, RESPONSE_431).await;
            return;
        }
        Err(error) => {
            debug!(peer = %peer_addr, %error, "failed to read public request");
            return;
        }
    };

    let Some(host) = extract_host(&prefix) else {
        warn!(peer = %peer_addr, "public request without a Host header");
        respond(&mut conn, RESPONSE_400).await;
        return;
    };

    // Route, mint, and park in one atomic step; notify the agent only
    // after the lock is released. A data dial-in racing this request
    // always finds the token already parked.
    match state.park_for_host(&host, conn, prefix) {
        ParkOutcome::NoRoute { mut conn } => {
            warn!(host = %host, peer = %peer_addr, "no route for host");
            respond(&mut conn, RESPONSE_404).await;
        }
        ParkOutcome::Parked { token, session } => {
            let frame =
                match ControlEnvelope::encode(KIND_OPEN_DATA_CONNECTION, &OpenDataConnection { token })
                {
                    Ok(frame) => frame,
                    Err(error) => {
                        error!(%error, "failed to encode openDataConnection message");
                        if let Some(mut pending) = state.claim(&token) {
                            respond(&mut pending.conn, RESPONSE_500).await;
                        }
                        return;
                    }
                };

            if let Err(error) = session.send(Message::Text(frame)) {
                warn!(
                    host = %host,
                    connection_id = %session.id(),
                    %error,
                    "failed to notify agent; closing its session"
                );
                if let Some(mut pending) = state.claim(&token) {
                    respond(&mut pending.conn, RESPONSE_502).await;
                }
                state.remove_session(session.id());
                session.close();
                return;
            }

            debug!(
                host = %host,
                token = %token,
                connection_id = %session.id(),
                peer = %peer_addr,
                "public request parked"
            );
            // The connection now belongs to the pending table; a data
            // dial-in or the eviction sweeper takes it from here.
        }
    }
}

enum HeaderRead {
    /// Everything read so far, ending at or past the header terminator.
    Complete(BytesMut),
    Eof,
    TooLarge,
}

/// Read until the HTTP header block is complete, keeping every byte.
/// Body bytes that arrive in the same reads stay in the buffer; they
/// belong to the replay prefix.
async fn read_header_block(conn: &mut TcpStream) -> std::io::Result<HeaderRead> {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if find_header_end(&buf).is_some() {
            return Ok(HeaderRead::Complete(buf));
        }
        if buf.len() >= MAX_HEADER_BYTES {
            return Ok(HeaderRead::TooLarge);
        }
        if conn.read_buf(&mut buf).await? == 0 {
            return Ok(HeaderRead::Eof);
        }
    }
}

/// Offset of the `\r\n\r\n` header terminator, if present.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Extract the Host header value, with any `:port` suffix stripped.
fn extract_host(prefix: &[u8]) -> Option<String> {
    let end = find_header_end(prefix)?;
    let head = std::str::from_utf8(&prefix[..end]).ok()?;

    for line in head.split("\r\n").skip(1) {
        if line.len() >= 5 && line.as_bytes()[..5].eq_ignore_ascii_case(b"host:") {
            let value = line[5..].trim();
            let host = value.split(':').next().unwrap_or(value).trim();
            if host.is_empty() {
                return None;
            }
            return Some(host.to_string());
        }
    }
    None
}

async fn respond(conn: &mut TcpStream, response: &[u8]) {
    let _ = conn.write_all(response).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_extract_host_basic() {
        let prefix = b"GET /ping HTTP/1.1\r\nHost: example.test\r\nAccept: */*\r\n\r\n";
        assert_eq!(extract_host(prefix).as_deref(), Some("example.test"));
    }

    #[test]
    fn test_extract_host_strips_port_and_case() {
        let prefix = b"GET / HTTP/1.1\r\nhOsT:   example.test:8080  \r\n\r\n";
        assert_eq!(extract_host(prefix).as_deref(), Some("example.test"));
    }

    #[test]
    fn test_extract_host_missing() {
        let prefix = b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n";
        assert_eq!(extract_host(prefix), None);
    }

    #[test]
    fn test_extract_host_ignores_body_lines() {
        let prefix = b"POST / HTTP/1.1\r\nHost: a.test\r\n\r\nhost: fake.test\r\n";
        assert_eq!(extract_host(prefix).as_deref(), Some("a.test"));
    }

    #[test]
    fn test_extract_host_empty_value() {
        let prefix = b"GET / HTTP/1.1\r\nHost:   \r\n\r\n";
        assert_eq!(extract_host(prefix), None);
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_header_block_keeps_buffered_body_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            conn.write_all(b"POST / HTTP/1.1\r\nHost: a.test\r\nContent-Length: 4\r\n\r\nbody")
                .await
                .unwrap();
            conn
        });

        let (mut server_side, _) = listener.accept().await.unwrap();
        let read = read_header_block(&mut server_side).await.unwrap();
        let HeaderRead::Complete(buf) = read else {
            panic!("expected a complete header block");
        };
        // The body bytes that arrived with the headers stay in the prefix.
        assert!(buf.ends_with(b"\r\n\r\nbody"));

        let _conn = client.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_header_block_across_partial_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            conn.write_all(b"GET / HTTP/1.1\r\nHo").await.unwrap();
            conn.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            conn.write_all(b"st: example.test\r\n\r\n").await.unwrap();
            conn
        });

        let (mut server_side, _) = listener.accept().await.unwrap();
        let read = read_header_block(&mut server_side).await.unwrap();
        let HeaderRead::Complete(buf) = read else {
            panic!("expected a complete header block");
        };
        assert_eq!(&buf[..], b"GET / HTTP/1.1\r\nHost: example.test\r\n\r\n");
        assert_eq!(extract_host(&buf).as_deref(), Some("example.test"));

        let _conn = client.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_header_block_eof_before_terminator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            conn.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
            conn.shutdown().await.unwrap();
        });

        let (mut server_side, _) = listener.accept().await.unwrap();
        assert!(matches!(
            read_header_block(&mut server_side).await.unwrap(),
            HeaderRead::Eof
        ));
        client.await.unwrap();
    }
}
