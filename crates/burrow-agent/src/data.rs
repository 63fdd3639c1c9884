//! Agent data handler
//!
//! One task per `openDataConnection`: dial the relay's data port, write
//! the token line, dial the local service, splice. Whatever was opened
//! is dropped on any failure before the splice starts; the public
//! caller sees a reset and may retry at its own layer.

use crate::agent::AgentConfig;
use burrow_proto::Token;
use burrow_splice::splice;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Errors from a single data connection attempt
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Failed to dial relay data port {addr}: {source}")]
    DialTunnel {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write token line: {0}")]
    WriteToken(#[source] std::io::Error),

    #[error("Failed to dial local service {addr}: {source}")]
    DialService {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Splice error: {0}")]
    Splice(#[source] std::io::Error),
}

pub(crate) async fn handle_open_data(token: Token, config: AgentConfig) {
    if let Err(error) = open_data_connection(token, &config).await {
        warn!(token = %token, %error, "data connection failed");
    }
}

async fn open_data_connection(token: Token, config: &AgentConfig) -> Result<(), DataError> {
    let tunnel_addr = format!("{}:{}", config.tunnel_host, config.tunnel_data_port);
    let mut tunnel = TcpStream::connect(&tunnel_addr)
        .await
        .map_err(|source| DataError::DialTunnel {
            addr: tunnel_addr.clone(),
            source,
        })?;

    tunnel
        .write_all(format!("{token}\n").as_bytes())
        .await
        .map_err(DataError::WriteToken)?;

    let service_addr = format!("{}:{}", config.service_host, config.service_port);
    let service = TcpStream::connect(&service_addr)
        .await
        .map_err(|source| DataError::DialService {
            addr: service_addr.clone(),
            source,
        })?;

    debug!(token = %token, service = %service_addr, "splicing tunnel and local service");

    let summary = splice(tunnel, Bytes::new(), service, Bytes::new())
        .await
        .map_err(DataError::Splice)?;

    debug!(
        token = %token,
        to_service = summary.a_to_b,
        from_service = summary.b_to_a,
        "data connection completed"
    );
    Ok(())
}
