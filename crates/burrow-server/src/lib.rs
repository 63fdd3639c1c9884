//! burrow relay server
//!
//! The public half of the tunnel: accepts agent control channels,
//! routes public HTTP requests to registered agents, pairs each parked
//! request with the data connection its agent dials back, and splices
//! the two streams byte-for-byte.
//!
//! # Architecture
//!
//! Three listeners share one [`ServerState`]:
//!
//! 1. **Control** (`:8081`): websocket upgrade on `/control`; agents
//!    register virtual hostnames and receive `openDataConnection`
//!    instructions.
//! 2. **Public ingress** (`:8080`): resolves the Host header, parks the
//!    raw connection under a fresh token, and signals one registered
//!    agent.
//! 3. **Data rendezvous** (`:8082`): reads a token line from each agent
//!    dial-in and splices it onto the matching parked connection.

mod control;
mod ingress;
mod relay;
mod rendezvous;
mod session;
mod state;

pub use relay::{Relay, RelayConfig, RelayError};
pub use session::{ConnectionId, RouteEntry, SessionHandle, SessionSendError};
pub use state::{ParkOutcome, PendingConn, ServerState};
