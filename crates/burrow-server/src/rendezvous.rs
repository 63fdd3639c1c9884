//! Data rendezvous
//!
//! Raw TCP listener where agents dial back. The first newline-terminated
//! line is the token; whatever the agent coalesced after the newline is
//! already response payload and is preserved as the agent-side prefix
//! for the splice.

use crate::relay::RelayError;
use crate::state::ServerState;
use burrow_proto::Token;
use burrow_splice::splice;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// A token line is 32 hex chars plus line ending; anything much longer
/// is not a token.
const MAX_TOKEN_LINE: usize = 256;

pub(crate) async fn run_data_listener(
    listener: TcpListener,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_data_conn(stream, peer_addr, state).await;
                });
            }
            Err(error) => {
                error!(%error, "failed to accept data connection");
            }
        }
    }
}

async fn handle_data_conn(mut conn: TcpStream, peer_addr: SocketAddr, state: Arc<ServerState>) {
    let (line, tail) = match read_token_line(&mut conn).await {
        Ok(Some(parts)) => parts,
        Ok(None) => {
            debug!(peer = %peer_addr, "data connection closed before a token line");
            return;
        }
        Err(error) => {
            debug!(peer = %peer_addr, %error, "failed to read token line");
            return;
        }
    };

    let token = match std::str::from_utf8(&line)
        .ok()
        .and_then(|s| Token::from_hex(s.trim()))
    {
        Some(token) => token,
        None => {
            warn!(peer = %peer_addr, "data connection presented a malformed token");
            return;
        }
    };

    // Single-use: a second dial-in with the same token finds nothing.
    let Some(pending) = state.claim(&token) else {
        warn!(token = %token, peer = %peer_addr, "unknown token");
        return;
    };

    info!(token = %token, peer = %peer_addr, "splicing connections");

    match splice(conn, tail, pending.conn, pending.request_prefix).await {
        Ok(summary) => {
            debug!(
                token = %token,
                to_public = summary.a_to_b,
                to_agent = summary.b_to_a,
                "splice completed"
            );
        }
        Err(error) => {
            warn!(token = %token, %error, "splice ended with error");
        }
    }
}

/// Read up to and including the first LF. Returns the line without its
/// LF plus any bytes read past it; `None` on EOF or an oversized line.
async fn read_token_line(conn: &mut TcpStream) -> std::io::Result<Option<(Vec<u8>, Bytes)>> {
    let mut buf = BytesMut::with_capacity(64);
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos);
            return Ok(Some((line.to_vec(), buf.freeze())));
        }
        if buf.len() >= MAX_TOKEN_LINE {
            return Ok(None);
        }
        if conn.read_buf(&mut buf).await? == 0 {
            return Ok(None);
        }
    }
}
