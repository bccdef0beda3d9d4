//! Outbound status messages and inbound message context.
//!
//! The servers hand these to the [`PublishSink`](super::ports::PublishSink)
//! port and return them as replies to acknowledged messages.  The transport
//! owns opcodes and network framing; the post-opcode payload layout is owned
//! here and produced by [`StatusMessage::to_bytes`].

use heapless::Vec;

/// Largest status payload: Generic Battery (8 bytes).
pub const MAX_STATUS_LEN: usize = 8;

/// Source/destination addressing of an inbound message, as resolved by the
/// mesh stack.  Feeds the retransmission dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgCtx {
    /// Source element address.
    pub src: u16,
    /// Destination address the message was received on.
    pub dst: u16,
}

/// Generic OnOff Status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnOffStatus {
    /// Present OnOff value (0 or 1).
    pub present: u8,
    /// Target OnOff and encoded remaining time, present only while a
    /// transition is in flight.
    pub transition: Option<(u8, u8)>,
}

/// Generic Level Status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelStatus {
    /// Present Level value.
    pub present: i16,
    /// Target Level and encoded remaining time, present only while a
    /// transition is in flight.
    pub transition: Option<(i16, u8)>,
}

/// Generic Battery Status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// Charge level in percent (0-100, 0xFF = unknown).
    pub battery_level: u8,
    /// Minutes until discharge, 24-bit (0xFFFFFF = unknown).
    pub time_to_discharge: u32,
    /// Minutes until fully charged, 24-bit.
    pub time_to_charge: u32,
    /// Presence / indicator / charging / serviceability flags.
    pub flags: u8,
}

/// A status message one of the element's servers wants sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMessage {
    OnOff(OnOffStatus),
    Level(LevelStatus),
    DefaultTransitionTime(u8),
    OnPowerUp(u8),
    Battery(BatteryStatus),
}

impl StatusMessage {
    /// Serialize to the post-opcode wire payload.
    ///
    /// Layouts match the mesh model spec: single bytes for OnOff state,
    /// little-endian `i16` for Level, and the packed 8-byte Battery layout
    /// (`level | time_to_discharge << 8`, `time_to_charge | flags << 24`).
    pub fn to_bytes(&self) -> Vec<u8, MAX_STATUS_LEN> {
        let mut out = Vec::new();
        match self {
            Self::OnOff(s) => {
                let _ = out.push(s.present);
                if let Some((target, remaining)) = s.transition {
                    let _ = out.push(target);
                    let _ = out.push(remaining);
                }
            }
            Self::Level(s) => {
                let _ = out.extend_from_slice(&s.present.to_le_bytes());
                if let Some((target, remaining)) = s.transition {
                    let _ = out.extend_from_slice(&target.to_le_bytes());
                    let _ = out.push(remaining);
                }
            }
            Self::DefaultTransitionTime(tt) => {
                let _ = out.push(*tt);
            }
            Self::OnPowerUp(mode) => {
                let _ = out.push(*mode);
            }
            Self::Battery(s) => {
                let lo = (s.time_to_discharge & 0x00FF_FFFF) << 8 | u32::from(s.battery_level);
                let hi = u32::from(s.flags) << 24 | (s.time_to_charge & 0x00FF_FFFF);
                let _ = out.extend_from_slice(&lo.to_le_bytes());
                let _ = out.extend_from_slice(&hi.to_le_bytes());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onoff_status_layout() {
        let plain = StatusMessage::OnOff(OnOffStatus {
            present: 1,
            transition: None,
        });
        assert_eq!(plain.to_bytes().as_slice(), &[0x01]);

        let in_flight = StatusMessage::OnOff(OnOffStatus {
            present: 0,
            transition: Some((1, 0x45)),
        });
        assert_eq!(in_flight.to_bytes().as_slice(), &[0x00, 0x01, 0x45]);
    }

    #[test]
    fn level_status_layout_is_little_endian() {
        let msg = StatusMessage::Level(LevelStatus {
            present: -32768,
            transition: Some((0x1234, 0x0A)),
        });
        assert_eq!(
            msg.to_bytes().as_slice(),
            &[0x00, 0x80, 0x34, 0x12, 0x0A]
        );
    }

    #[test]
    fn battery_status_packing() {
        let msg = StatusMessage::Battery(BatteryStatus {
            battery_level: 0x64,
            time_to_discharge: 0xFEFFFF,
            time_to_charge: 0x0,
            flags: 0x5F,
        });
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 0x64);
        assert_eq!(&bytes[1..4], &[0xFF, 0xFF, 0xFE]);
        assert_eq!(&bytes[4..7], &[0x00, 0x00, 0x00]);
        assert_eq!(bytes[7], 0x5F);
    }

    #[test]
    fn single_byte_statuses() {
        assert_eq!(
            StatusMessage::DefaultTransitionTime(0x42).to_bytes().as_slice(),
            &[0x42]
        );
        assert_eq!(StatusMessage::OnPowerUp(2).to_bytes().as_slice(), &[0x02]);
    }
}
