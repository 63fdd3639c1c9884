//! burrow agent
//!
//! The private half of the tunnel. The agent keeps one outbound control
//! channel to the relay, registers a virtual hostname, and for every
//! `openDataConnection` instruction dials a fresh data connection into
//! the relay, presents the token, and splices it onto a connection to
//! the local service.
//!
//! # Example
//!
//! ```no_run
//! use burrow_agent::{Agent, AgentConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig {
//!         register_host: "example.test".to_string(),
//!         ..AgentConfig::default()
//!     };
//!     Agent::new(config)?.run().await?;
//!     Ok(())
//! }
//! ```

mod agent;
mod data;

pub use agent::{Agent, AgentConfig, AgentError};
pub use data::DataError;
