//! Crate-wide error type.
//!
//! Configuration and send-size errors are returned synchronously and never
//! leave partial state behind.  Decode errors and conv/token mismatches only
//! cost the offending segment; [`crate::Session::input`] reports them when a
//! datagram yielded nothing usable.  A dead link is not an error at all, see
//! [`crate::state::LinkState`].

use thiserror::Error;

use crate::packet::DecodeError;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("mtu {mtu} outside the accepted range {min}..={max}")]
    InvalidMtu { mtu: usize, min: usize, max: usize },

    #[error("window sizes must be at least one segment (snd={snd}, rcv={rcv})")]
    InvalidWindow { snd: u32, rcv: u32 },

    #[error("flush interval {0} ms outside 10..=5000")]
    InvalidInterval(u32),

    #[error("dead-link threshold must be at least 1")]
    InvalidDeadLink,

    #[error("cannot send an empty message")]
    EmptyMessage,

    #[error("message needs {count} fragments, at most {max} are allowed")]
    TooManyFragments { count: usize, max: usize },

    #[error("malformed segment: {0}")]
    Decode(#[from] DecodeError),

    #[error("conversation mismatch: expected {expected}, got {got}")]
    ConvMismatch { expected: u32, got: u32 },

    #[error("token mismatch on conversation {conv}")]
    TokenMismatch { conv: u32 },

    #[error("data segment without payload on conversation {conv}")]
    EmptyPush { conv: u32 },

    #[error("receive buffer holds {available} bytes, next message needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("could not allocate {needed} bytes for the received message")]
    Alloc { needed: usize },
}

impl Error {
    /// `true` for errors that only cost one inbound segment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Decode(_)
                | Error::ConvMismatch { .. }
                | Error::TokenMismatch { .. }
                | Error::EmptyPush { .. }
        )
    }
}
