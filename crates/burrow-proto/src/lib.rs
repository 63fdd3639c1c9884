//! Protocol types for the burrow reverse tunnel
//!
//! This crate defines the control-channel message envelope exchanged
//! between relay and agents, the typed payloads for each message kind,
//! and the rendezvous token that correlates a parked public connection
//! with the data connection an agent dials back.

pub mod messages;
pub mod token;

pub use messages::{
    ControlEnvelope, OpenDataConnection, RegisterHost, KIND_OPEN_DATA_CONNECTION,
    KIND_REGISTER_HOST,
};
pub use token::Token;

/// Path agents upgrade on to open the control channel.
pub const CONTROL_PATH: &str = "/control";

/// ACME HTTP-01 challenge path prefix served by the control listener.
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";
