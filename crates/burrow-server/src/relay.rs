//! Relay assembly
//!
//! Binds the three listeners (control, data rendezvous, public ingress),
//! runs them alongside the pending-connection eviction sweeper, and
//! tears everything down on the first fatal listener error.

use crate::state::ServerState;
use crate::{control, ingress, rendezvous};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to bind to {address}:{port}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Control listener: agents connect here (websocket on `/control`).
    pub internal_addr: SocketAddr,
    /// Data rendezvous listener: agents dial back here per request.
    pub data_addr: SocketAddr,
    /// Public listener: HTTP callers connect here.
    pub public_addr: SocketAddr,
    /// How long a parked public connection may wait for its data
    /// dial-in before it is evicted and closed.
    pub pending_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            internal_addr: "0.0.0.0:8081".parse().unwrap(),
            data_addr: "0.0.0.0:8082".parse().unwrap(),
            public_addr: "0.0.0.0:8080".parse().unwrap(),
            pending_timeout: Duration::from_secs(30),
        }
    }
}

/// The tunnel relay: three listeners over one shared [`ServerState`].
pub struct Relay {
    state: Arc<ServerState>,
    control_listener: TcpListener,
    data_listener: TcpListener,
    public_listener: TcpListener,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    public_addr: SocketAddr,
    pending_timeout: Duration,
}

impl Relay {
    /// Bind all three listeners. Any bind failure is fatal.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let control_listener = bind(config.internal_addr).await?;
        let data_listener = bind(config.data_addr).await?;
        let public_listener = bind(config.public_addr).await?;

        let control_addr = control_listener.local_addr()?;
        let data_addr = data_listener.local_addr()?;
        let public_addr = public_listener.local_addr()?;

        info!(addr = %control_addr, "control listener bound");
        info!(addr = %data_addr, "data rendezvous listener bound");
        info!(addr = %public_addr, "public listener bound");

        Ok(Self {
            state: Arc::new(ServerState::new()),
            control_listener,
            data_listener,
            public_listener,
            control_addr,
            data_addr,
            public_addr,
            pending_timeout: config.pending_timeout,
        })
    }

    /// Address the control listener actually bound (useful with port 0).
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }

    /// Shared state handle, for introspection.
    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Serve until the first fatal listener error.
    pub async fn run(self) -> Result<(), RelayError> {
        let sweeper = tokio::spawn(run_eviction_sweeper(
            self.state.clone(),
            self.pending_timeout,
        ));

        let result = tokio::try_join!(
            control::run_control_listener(self.control_listener, self.state.clone()),
            rendezvous::run_data_listener(self.data_listener, self.state.clone()),
            ingress::run_public_listener(self.public_listener, self.state.clone()),
        );

        sweeper.abort();
        result.map(|_| ())
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr).await.map_err(|e| {
        RelayError::BindError {
            address: addr.ip().to_string(),
            port: addr.port(),
            reason: e.to_string(),
        }
    })
}

/// Close parked public connections whose agent never dialed back.
/// Without this a crashed agent leaks one socket per routed request.
async fn run_eviction_sweeper(state: Arc<ServerState>, timeout: Duration) {
    let period = (timeout / 2).clamp(Duration::from_millis(50), Duration::from_secs(5));
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;
        for (token, pending) in state.evict_stale(timeout) {
            warn!(
                token = %token,
                parked_for = ?pending.parked_at.elapsed(),
                "evicting parked connection; agent never dialed back"
            );
            // Dropping the entry closes the public socket.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.internal_addr.port(), 8081);
        assert_eq!(config.data_addr.port(), 8082);
        assert_eq!(config.public_addr.port(), 8080);
        assert_eq!(config.pending_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_bind_reports_conflicting_port() {
        let first = Relay::bind(RelayConfig {
            internal_addr: "127.0.0.1:0".parse().unwrap(),
            data_addr: "127.0.0.1:0".parse().unwrap(),
            public_addr: "127.0.0.1:0".parse().unwrap(),
            ..RelayConfig::default()
        })
        .await
        .unwrap();

        let conflict = Relay::bind(RelayConfig {
            internal_addr: first.control_addr(),
            data_addr: "127.0.0.1:0".parse().unwrap(),
            public_addr: "127.0.0.1:0".parse().unwrap(),
            ..RelayConfig::default()
        })
        .await;

        match conflict {
            Err(RelayError::BindError { port, .. }) => {
                assert_eq!(port, first.control_addr().port());
            }
            other => panic!("expected BindError, got {:?}", other.map(|_| ())),
        }
    }
}
