//! Port traits — the boundary between the transition engine and the host.
//!
//! ```text
//!   mesh stack ──▶ recv_* handlers ──▶ engine ──▶ TimerPort / PublishSink
//!   timer host ──▶ Node::on_timer_fired ─┘            StoragePort
//! ```
//!
//! Driven adapters (hardware timer service, mesh publish path, NVS) implement
//! these traits.  The servers consume them via generics at call sites, so the
//! engine never touches the vendor stack directly and every port can be
//! replaced by a mock in tests.

use crate::app::messages::StatusMessage;

// ───────────────────────────────────────────────────────────────
// Timer identity
// ───────────────────────────────────────────────────────────────

/// Index of a model element within the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u8);

/// The role a timer plays for one element.
///
/// At most one timer exists per (element, role) pair; re-arming an armed
/// pair restarts it rather than creating a second timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerRole {
    /// Start-delay before a transition begins.
    Delay,
    /// Single-shot transition to the On state.
    OnOffOn,
    /// Single-shot transition to the Off state.
    OnOffOff,
    /// Per-hop step timer for Level transitions (also the Move rate tick).
    LevelStep,
}

/// Value identity for a timer: which element, which role.
///
/// The host's timer callback hands this back through
/// [`Node::on_timer_fired`](crate::server::Node::on_timer_fired); no raw
/// pointers cross the boundary, so a torn-down element can never be
/// dereferenced by a late fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub element: ElementId,
    pub role: TimerRole,
}

// ───────────────────────────────────────────────────────────────
// Timer port (driven adapter: engine → host timer service)
// ───────────────────────────────────────────────────────────────

/// Host timer service.
///
/// Implementations must guarantee that arming an already-armed key restarts
/// the existing timer.  Fires are delivered back on the same logical task as
/// message handling (queue them if the timer backend runs on another thread).
pub trait TimerPort {
    /// Arm (or restart) the timer for `key`.
    ///
    /// `periodic` timers re-fire every `duration_ms` until disarmed;
    /// one-shot timers fire once.
    fn arm(&mut self, key: TimerKey, duration_ms: u32, periodic: bool) -> Result<(), TimerError>;

    /// Stop the timer for `key`.  A no-op if it is not armed.
    fn disarm(&mut self, key: TimerKey);

    /// Whether the timer for `key` is currently armed.
    fn is_active(&self, key: TimerKey) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Publish sink (driven adapter: engine → mesh stack)
// ───────────────────────────────────────────────────────────────

/// Unsolicited status publication path into the mesh stack.
///
/// The engine calls this exactly once per completed transition, and on
/// state changes of the auxiliary models (Default Transition Time,
/// OnPowerUp).  Replies to acknowledged Get/Set messages do *not* go through
/// here — they are returned from the handlers for the transport to send.
pub trait PublishSink {
    fn publish(&mut self, element: ElementId, status: &StatusMessage);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: engine ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for model state surviving power loss.
///
/// Keys are namespaced to prevent collisions between subsystems.  Write
/// operations MUST be atomic — no partial records on power loss.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`TimerPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The host cannot allocate or arm another timer.
    Exhausted,
    /// Backend-specific failure.
    Backend(&'static str),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "timer resources exhausted"),
            Self::Backend(msg) => write!(f, "timer backend: {msg}"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
