//! # nmdc-proto
//!
//! A Rust library for parsing and serializing NMDC hub-side protocol
//! messages.
//!
//! ## Features
//!
//! - Pipe-terminated frame extraction with per-frame length caps
//! - DCN / entity escaping (`/%DCNnnn%/`, `&#nn;`) as a pure module
//! - Lock generation and the lock-to-key challenge transform
//! - Per-command positional grammars yielding typed chunks
//! - Client tag (`<client V:x,M:m,H:u/r/o,S:s>`) parsing
//! - Outbound frame builders for every hub-emitted command
//! - Optional ZPipe (zlib) batch compression for outbound traffic

#![deny(clippy::all)]

pub mod error;
pub mod escape;
pub mod frames;
pub mod lock;
pub mod message;
pub mod tag;
pub mod transport;

pub use self::error::{MessageParseError, ProtocolError};
pub use self::escape::{escape, escape_dcn, unescape};
pub use self::lock::{key_for_lock, lock_challenge, validate_key};
pub use self::message::{Message, MsgKind};
pub use self::tag::{ClientMode, ClientTag};
pub use self::transport::{FrameCodec, ZPipeWriter};

/// Frame terminator byte.
pub const PIPE: u8 = b'|';

/// Length of a TTH root hash in its base32 wire form.
pub const TTH_LEN: usize = 39;
