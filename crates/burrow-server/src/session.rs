//! Agent session handles
//!
//! A session is one live control channel to an agent. The websocket
//! sink is owned by a writer task; everything else holds a
//! [`SessionHandle`] and talks to the socket through a bounded queue,
//! so no table lock is ever held across socket I/O.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;

/// Outbound frames queued per session before sends start failing.
const SESSION_SEND_BUFFER: usize = 32;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a control session, stable for the
/// session's lifetime. Minted from a monotonic counter; identifiers are
/// never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a frame could not be handed to a session's writer task.
#[derive(Debug, Error)]
pub enum SessionSendError {
    #[error("session outbound queue is full")]
    Backlogged,
    #[error("session is closed")]
    Closed,
}

/// Cloneable handle to a live agent session.
///
/// The writer task exits (closing the socket) once every handle clone
/// has been dropped; removing a session from all relay tables is how
/// the server closes it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
    shutdown: Arc<Notify>,
}

impl SessionHandle {
    /// Create a handle and the receiving end for its writer task.
    pub fn new(id: ConnectionId) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SESSION_SEND_BUFFER);
        (
            Self {
                id,
                tx,
                shutdown: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for delivery. Never blocks; fails if the agent has
    /// stopped draining its queue or the session is gone.
    pub fn send(&self, message: Message) -> Result<(), SessionSendError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionSendError::Backlogged,
            mpsc::error::TrySendError::Closed(_) => SessionSendError::Closed,
        })
    }

    /// Ask the session's read loop to shut the connection down. Works
    /// even when the outbound queue is full, which is exactly when it
    /// is needed.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Signal awaited by the session's read loop; fires after [`close`].
    ///
    /// [`close`]: SessionHandle::close
    pub(crate) fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }
}

/// A registered `(host, session)` binding in the routing table.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub host: String,
    pub connection_id: ConnectionId,
    pub session: SessionHandle,
}

impl RouteEntry {
    pub fn new(host: String, session: SessionHandle) -> Self {
        Self {
            host,
            connection_id: session.id(),
            session,
        }
    }
}

// Identity is (host, connection id); the session handle is payload.
impl PartialEq for RouteEntry {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.connection_id == other.connection_id
    }
}
