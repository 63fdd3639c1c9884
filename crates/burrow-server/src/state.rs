//! Shared relay state
//!
//! Four tables back the rendezvous engine: live sessions, the
//! connection -> host index, the host routing table, and the parked
//! public connections awaiting a data dial-in. They live behind a
//! single mutex so every logical operation updates them atomically:
//! observers never see a session without its route entry or a route
//! entry for a dead session.
//!
//! The lock is never held across I/O: callers capture what they need
//! (a session handle, a reclaimed connection) inside one short hold and
//! do all socket work outside.

use crate::session::{ConnectionId, RouteEntry, SessionHandle};
use burrow_proto::Token;
use burrow_router::RoutingTable;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::net::TcpStream;

/// A hijacked public connection parked until an agent dials back.
#[derive(Debug)]
pub struct PendingConn {
    pub conn: TcpStream,
    /// Request bytes already consumed by the ingress parser; replayed to
    /// the agent so the local service sees the original request verbatim.
    pub request_prefix: Bytes,
    pub parked_at: Instant,
}

/// Result of routing a public connection to an agent.
pub enum ParkOutcome {
    /// The connection is parked under `token`; notify `session` next
    /// (outside any lock).
    Parked {
        token: Token,
        session: SessionHandle,
    },
    /// No agent has registered this host; the connection is handed back
    /// so the caller can answer 404.
    NoRoute { conn: TcpStream },
}

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<ConnectionId, SessionHandle>,
    connection_host: HashMap<ConnectionId, String>,
    routes: RoutingTable<RouteEntry>,
    pending: HashMap<Token, PendingConn>,
}

/// All mutable relay state, shared by the control endpoint, the public
/// ingress, the data rendezvous, and the eviction sweeper.
#[derive(Debug, Default)]
pub struct ServerState {
    tables: Mutex<Tables>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly connected control session.
    pub fn insert_session(&self, session: SessionHandle) {
        let mut tables = self.tables.lock().unwrap();
        tables.sessions.insert(session.id(), session);
    }

    /// Bind `id` to `host`. Re-registration replaces any prior binding
    /// of this session, so a connection id appears under at most one
    /// host. Returns false if the session is no longer tracked.
    pub fn register_host(&self, id: ConnectionId, host: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();
        let Some(session) = tables.sessions.get(&id).cloned() else {
            return false;
        };
        if let Some(previous) = tables.connection_host.remove(&id) {
            let entry = RouteEntry::new(previous.clone(), session.clone());
            tables.routes.remove(&previous, &entry);
        }
        tables
            .routes
            .add(host, RouteEntry::new(host.to_string(), session));
        tables.connection_host.insert(id, host.to_string());
        true
    }

    /// Forget a session entirely: drop it from the session table and,
    /// if it had registered a host, from the routing table and the
    /// connection -> host index. Returns the host it was serving, if
    /// any. Idempotent; runs on every disconnect path.
    pub fn remove_session(&self, id: ConnectionId) -> Option<String> {
        let mut tables = self.tables.lock().unwrap();
        let session = tables.sessions.remove(&id);
        let host = tables.connection_host.remove(&id)?;
        if let Some(session) = session {
            let entry = RouteEntry::new(host.clone(), session);
            tables.routes.remove(&host, &entry);
        }
        Some(host)
    }

    /// Route `host`, mint a token, and park the connection in one
    /// atomic step, so a data dial-in can never race ahead of the park.
    /// The caller notifies the returned session after the lock is gone.
    pub fn park_for_host(&self, host: &str, conn: TcpStream, request_prefix: Bytes) -> ParkOutcome {
        let mut tables = self.tables.lock().unwrap();
        let Some(entry) = tables.routes.get_random(host) else {
            return ParkOutcome::NoRoute { conn };
        };
        let session = entry.session.clone();

        let mut token = Token::mint();
        while tables.pending.contains_key(&token) {
            token = Token::mint();
        }
        tables.pending.insert(
            token,
            PendingConn {
                conn,
                request_prefix,
                parked_at: Instant::now(),
            },
        );
        ParkOutcome::Parked { token, session }
    }

    /// Atomically look up and remove a parked connection. Each token is
    /// claimable at most once.
    pub fn claim(&self, token: &Token) -> Option<PendingConn> {
        let mut tables = self.tables.lock().unwrap();
        tables.pending.remove(token)
    }

    /// Remove and return every entry parked longer than `timeout`. The
    /// caller closes the connections outside the lock.
    pub fn evict_stale(&self, timeout: std::time::Duration) -> Vec<(Token, PendingConn)> {
        let mut tables = self.tables.lock().unwrap();
        let stale: Vec<Token> = tables
            .pending
            .iter()
            .filter(|(_, pending)| pending.parked_at.elapsed() >= timeout)
            .map(|(token, _)| *token)
            .collect();
        stale
            .into_iter()
            .filter_map(|token| tables.pending.remove(&token).map(|p| (token, p)))
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.tables.lock().unwrap().sessions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.tables.lock().unwrap().pending.len()
    }

    pub fn has_route(&self, host: &str) -> bool {
        self.tables.lock().unwrap().routes.has(host)
    }

    pub fn route_count(&self, host: &str) -> usize {
        self.tables.lock().unwrap().routes.count(host)
    }

    /// Host currently registered by `id`, if any.
    pub fn host_of(&self, id: ConnectionId) -> Option<String> {
        self.tables.lock().unwrap().connection_host.get(&id).cloned()
    }
}
