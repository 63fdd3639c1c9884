//! Control endpoint
//!
//! Accepts persistent agent connections on the internal listener and
//! upgrades them to websockets on `/control`. Each session gets a
//! writer task draining its outbound queue into the socket; the accept
//! task runs the read loop and the disconnect cleanup.
//!
//! The same listener answers ACME HTTP-01 challenge paths with
//! `501 Not Implemented` through the handshake callback; certificate
//! issuance lives outside this process.

use crate::relay::RelayError;
use crate::session::{ConnectionId, SessionHandle};
use crate::state::ServerState;
use burrow_proto::{ControlEnvelope, RegisterHost, ACME_CHALLENGE_PREFIX, CONTROL_PATH, KIND_REGISTER_HOST};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

pub(crate) async fn run_control_listener(
    listener: TcpListener,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_control_conn(stream, peer_addr, state).await;
                });
            }
            Err(error) => {
                error!(%error, "failed to accept control connection");
            }
        }
    }
}

async fn handle_control_conn(stream: TcpStream, peer_addr: SocketAddr, state: Arc<ServerState>) {
    let callback = |req: &Request, response: Response| {
        let path = req.uri().path();
        if path == CONTROL_PATH {
            Ok(response)
        } else if path.starts_with(ACME_CHALLENGE_PREFIX) {
            info!(path = %path, "acme challenge requested; issuance not implemented");
            let response = Response::builder()
                .status(StatusCode::NOT_IMPLEMENTED)
                .body(None)
                .unwrap();
            Err(response)
        } else {
            let response = Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(None)
                .unwrap();
            Err(response)
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(error) => {
            debug!(peer = %peer_addr, %error, "control handshake failed");
            return;
        }
    };

    let id = ConnectionId::next();
    let (session, mut outbound) = SessionHandle::new(id);
    state.insert_session(session.clone());
    info!(connection_id = %id, peer = %peer_addr, "agent connected");

    let (mut sink, mut frames) = ws_stream.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let shutdown = session.shutdown_signal();
    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = shutdown.notified() => {
                debug!(connection_id = %id, "session closed by the relay");
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        let flow = match frame {
            Ok(Message::Text(text)) => handle_control_frame(&state, &session, &text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => handle_control_frame(&state, &session, &text),
                Err(_) => close_invalid(&session),
            },
            Ok(Message::Close(_)) => ControlFlow::Break(()),
            Ok(_) => ControlFlow::Continue(()),
            Err(error) => {
                debug!(connection_id = %id, %error, "control channel read error");
                ControlFlow::Break(())
            }
        };
        if flow.is_break() {
            break;
        }
    }

    match state.remove_session(id) {
        Some(host) => info!(connection_id = %id, host = %host, "agent disconnected"),
        None => info!(connection_id = %id, "agent disconnected"),
    }

    // The writer exits once the last handle is gone; give it a moment
    // to flush any queued error frame, then cut it loose.
    drop(session);
    let mut writer = writer;
    if tokio::time::timeout(Duration::from_secs(5), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

fn handle_control_frame(
    state: &ServerState,
    session: &SessionHandle,
    frame: &str,
) -> ControlFlow<()> {
    let envelope = match ControlEnvelope::decode(frame) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(connection_id = %session.id(), %error, "malformed control frame");
            return close_invalid(session);
        }
    };

    match envelope.kind.as_str() {
        KIND_REGISTER_HOST => {
            let payload: RegisterHost = match envelope.payload() {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(connection_id = %session.id(), %error, "malformed registerHost payload");
                    return close_invalid(session);
                }
            };
            if state.register_host(session.id(), &payload.host) {
                info!(connection_id = %session.id(), host = %payload.host, "registered host");
            }
            ControlFlow::Continue(())
        }
        kind => {
            // Unknown but well-formed kinds are ignored so older relays
            // tolerate newer agents.
            warn!(connection_id = %session.id(), kind = %kind, "ignoring unknown control message kind");
            ControlFlow::Continue(())
        }
    }
}

fn close_invalid(session: &SessionHandle) -> ControlFlow<()> {
    let _ = session.send(Message::Text("Invalid message".to_string()));
    let _ = session.send(Message::Close(None));
    ControlFlow::Break(())
}
