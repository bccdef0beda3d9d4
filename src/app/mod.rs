//! Application boundary: port traits and message types.
//!
//! Everything the engine needs from the outside world (timers, the mesh
//! stack's publish path, persistent storage) enters through the traits in
//! [`ports`]; everything it hands back out is typed in [`messages`].

pub mod messages;
pub mod ports;
