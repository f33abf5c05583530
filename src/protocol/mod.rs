//! Wire-protocol codecs.
//!
//! Both codecs are pure byte-in/byte-out state machines: they frame and parse
//! logical messages but never touch a socket or a backend. The protocol
//! engines in [`crate::engine`] own all sequencing and dispatch decisions.

pub mod mysql;
pub mod postgres;

use thiserror::Error;

/// Hard cap on a single logical message in either protocol, the MySQL
/// protocol maximum of 2^24 bytes. Larger frames are fatal to the session.
pub const MAX_MESSAGE_BYTES: usize = 1 << 24;

/// Errors raised while framing or parsing protocol messages.
///
/// Framing errors are fatal to the session; the session controller sends a
/// best-effort protocol error message and closes.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("truncated packet while reading {0}")]
    Truncated(&'static str),
    #[error("frame of {got} bytes exceeds the {max} byte limit")]
    FrameTooLarge { got: usize, max: usize },
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("missing NUL terminator in {0}")]
    UnterminatedString(&'static str),
    #[error("reserved length marker 0x{0:02x}")]
    ReservedLengthMarker(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
