//! Unified error types for the MeshLight model engine.
//!
//! Follows embedded practice: a single `Error` enum that every subsystem can
//! convert into, keeping the message-dispatch layer's error handling uniform.
//! All variants are `Copy` so they can be cheaply passed back through the
//! mesh-stack glue without allocation.
//!
//! Most rejection paths in this engine are *not* errors: the mesh model spec
//! mandates silently dropping malformed messages and prohibited values, and
//! retransmissions are absorbed by the dedup window.  Those paths return
//! `Ok(None)` from the handlers and log a [`RejectReason`].  Only resource
//! failures (timer arming, storage) surface as `Err`.

use core::fmt;

use crate::app::ports::{StorageError, TimerError};

// ---------------------------------------------------------------------------
// Top-level engine error
// ---------------------------------------------------------------------------

/// Every fallible operation in the engine funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A timer could not be armed.  The model state is untouched; the
    /// caller may retry the same message.
    Timer(TimerError),
    /// A persistence operation failed.
    Storage(StorageError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer(e) => write!(f, "timer: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl From<TimerError> for Error {
    fn from(e: TimerError) -> Self {
        Self::Timer(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Silent-drop taxonomy
// ---------------------------------------------------------------------------

/// Why an inbound message was dropped without a reply or state change.
///
/// Used for debug logging only; the mesh model spec requires these drops to
/// be silent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Payload length does not match any defined message shape.
    WrongLength,
    /// A field carries a prohibited value (OnOff > 1, OnPowerUp > 2).
    ProhibitedValue,
    /// The transition-time step field is the reserved `0x3F` value.
    ReservedTransitionTime,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength => write!(f, "wrong payload length"),
            Self::ProhibitedValue => write!(f, "prohibited field value"),
            Self::ReservedTransitionTime => write!(f, "reserved transition time"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Engine-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
