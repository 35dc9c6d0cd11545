//! Protocol engine: one handler per inbound command, wired through the
//! registry.

pub mod chat;
pub mod handshake;
pub mod helpers;
pub mod login;
pub mod myinfo;
pub mod nicklist;
pub mod oper;
pub mod registry;
pub mod routing;
pub mod search;

pub use registry::{Handler, Registry};
