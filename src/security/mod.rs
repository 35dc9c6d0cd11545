//! Abuse control: flood counters, temp bans, clone detection and nick
//! validation.

pub mod bans;
pub mod clone;
pub mod flood;
pub mod nick;

pub use bans::{BanKind, TempBan, TempBans};
pub use flood::{AllFloodKind, AllFloodVerdict, FloodKind, FloodTrack, FloodVerdict, HubFlood};
