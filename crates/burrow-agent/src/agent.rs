//! Agent control loop

use crate::data;
use burrow_proto::{
    ControlEnvelope, OpenDataConnection, RegisterHost, CONTROL_PATH, KIND_OPEN_DATA_CONNECTION,
    KIND_REGISTER_HOST,
};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Errors that can occur in the agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("Control channel error: {0}")]
    Control(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Control channel closed by relay")]
    ControlClosed,
}

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Virtual hostname to claim on the relay. Required.
    pub register_host: String,

    /// Local service the tunnel exposes.
    pub service_host: String,
    pub service_port: u16,

    /// Relay hostname.
    pub tunnel_host: String,

    /// Relay control port. Fixed by convention; the data port is the
    /// one that varies between deployments.
    pub tunnel_control_port: u16,

    /// Relay data rendezvous port.
    pub tunnel_data_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            register_host: String::new(),
            service_host: "localhost".to_string(),
            service_port: 8080,
            tunnel_host: "localhost".to_string(),
            tunnel_control_port: 8081,
            tunnel_data_port: 8082,
        }
    }
}

/// The tunnel agent - registers a hostname and serves data connections
/// until the control channel drops.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent with the given configuration.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        if config.register_host.is_empty() {
            return Err(AgentError::InvalidConfig(
                "register_host cannot be empty".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// The websocket URL of the relay's control endpoint.
    pub fn control_url(&self) -> String {
        format!(
            "ws://{}:{}{}",
            self.config.tunnel_host, self.config.tunnel_control_port, CONTROL_PATH
        )
    }

    /// Connect, register the hostname, and dispatch control messages
    /// until the channel errors or the relay closes it. Each
    /// `openDataConnection` is handled on its own task; a failing data
    /// connection never takes the control loop down with it.
    pub async fn run(self) -> Result<(), AgentError> {
        let url = self.control_url();
        info!(url = %url, host = %self.config.register_host, "connecting to relay");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|source| AgentError::Connect {
                url: url.clone(),
                source,
            })?;

        let (mut sink, mut frames) = ws_stream.split();

        let frame = ControlEnvelope::encode(
            KIND_REGISTER_HOST,
            &RegisterHost {
                host: self.config.register_host.clone(),
            },
        )?;
        sink.send(Message::Text(frame)).await?;
        info!(host = %self.config.register_host, "registered with relay");

        while let Some(frame) = frames.next().await {
            match frame? {
                Message::Text(text) => self.handle_frame(&text),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_frame(&text),
                    Err(_) => warn!("ignoring non-utf8 control frame"),
                },
                Message::Close(reason) => {
                    info!(reason = ?reason, "relay closed the control channel");
                    return Err(AgentError::ControlClosed);
                }
                _ => {}
            }
        }

        Err(AgentError::ControlClosed)
    }

    fn handle_frame(&self, frame: &str) {
        let envelope = match ControlEnvelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                // The relay answers protocol violations with a plain
                // error text frame before closing; surface it as-is.
                warn!(%error, frame = %frame, "undecodable control frame");
                return;
            }
        };

        match envelope.kind.as_str() {
            KIND_OPEN_DATA_CONNECTION => {
                let payload: OpenDataConnection = match envelope.payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(%error, "malformed openDataConnection payload");
                        return;
                    }
                };
                let config = self.config.clone();
                tokio::spawn(async move {
                    data::handle_open_data(payload.token, config).await;
                });
            }
            kind => {
                warn!(kind = %kind, "ignoring unknown control message kind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_requires_register_host() {
        let result = Agent::new(AgentConfig::default());
        assert!(matches!(result, Err(AgentError::InvalidConfig(_))));
    }

    #[test]
    fn test_control_url() {
        let agent = Agent::new(AgentConfig {
            register_host: "example.test".to_string(),
            tunnel_host: "relay.internal".to_string(),
            tunnel_control_port: 9001,
            ..AgentConfig::default()
        })
        .unwrap();

        assert_eq!(agent.control_url(), "ws://relay.internal:9001/control");
    }

    #[test]
    fn test_config_defaults_match_relay_conventions() {
        let config = AgentConfig::default();
        assert_eq!(config.service_host, "localhost");
        assert_eq!(config.service_port, 8080);
        assert_eq!(config.tunnel_control_port, 8081);
        assert_eq!(config.tunnel_data_port, 8082);
    }
}
