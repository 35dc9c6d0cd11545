//! Networking: the accept gateway and per-connection session tasks.

pub mod connection;
pub mod gateway;

pub use connection::{stage, ConnState, Connection, TimeoutKind};
pub use gateway::Gateway;
