//! Integration test common infrastructure.
//!
//! Spawns real daemon processes on ephemeral ports and drives them with a
//! minimal protocol client.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::TestServer;
