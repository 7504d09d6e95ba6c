//! Shared runtime state for the server.
//!
//! - `ConnectionRegistry`: live connections, guarded by a mutex
//! - `Lifecycle`: the running flag, `NotStarted -> Running -> Stopped`

mod connection;
mod lifecycle;

pub use connection::{Connection, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use lifecycle::{Lifecycle, ServerState};
