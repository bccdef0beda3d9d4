//! Node configuration parameters
//!
//! All tunable parameters for a MeshLight node's generic model servers.
//! Values can be overridden via NVS (non-volatile storage) or provisioning.

use serde::{Deserialize, Serialize};

/// Core node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Elements ---
    /// Number of model elements this node exposes (1-4).
    pub element_count: u8,

    // --- Retransmission window ---
    /// Window (milliseconds) in which a repeated (TID, src, dst) triple is
    /// treated as a retransmission of an already-handled Set message.
    pub dedup_window_ms: i64,

    // --- Generic Level range ---
    /// Minimum allowed Level state value (working representation).
    pub range_min: u16,
    /// Maximum allowed Level state value (working representation).
    pub range_max: u16,

    // --- Power-up defaults ---
    /// Default Transition Time state used when a Set message carries no
    /// transition-time field (wire encoding: resolution in the high 2 bits,
    /// step count in the low 6).
    pub default_trans_time: u8,
    /// OnPowerUp mode applied when no persisted value exists
    /// (0 = Off, 1 = On, 2 = Restore).
    pub default_on_power_up: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // Elements
            element_count: 1,

            // Retransmission window (mesh model spec: 6 seconds)
            dedup_window_ms: 6_000,

            // Level range (full working range)
            range_min: 0x0000,
            range_max: 0xFFFF,

            // Power-up
            default_trans_time: 0x00, // instantaneous
            default_on_power_up: 0x00,
        }
    }
}
