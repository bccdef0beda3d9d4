//! Transition-time quantization codec.
//!
//! The mesh model spec packs a transition time into one byte: a step count
//! in the low 6 bits (`0x3F` reserved/unknown) and a resolution in the high
//! 2 bits selecting 100 ms, 1 s, 10 s, or 10 min steps.  The same packing
//! carries the "remaining time" field of in-flight status messages.
//!
//! Level values travel as little-endian `i16` biased by `-i16::MIN` into an
//! unsigned working range so range clamping and per-step arithmetic stay in
//! `u16`/`i32` without sign traps.

use crate::model::TransitionKind;

/// Reserved step-count value: transition time is unknown/prohibited.
pub const TRANS_TIME_UNKNOWN: u8 = 0x3F;

/// Mask extracting the step count from the wire byte.
pub const STEPS_MASK: u8 = 0x3F;

/// Granularity of the Set message delay field (5 ms ticks).
pub const DELAY_STEP_MS: u32 = 5;

/// A decoded transition time in engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionTiming {
    /// Duration of one hop (step) in milliseconds.
    pub hop_duration_ms: u32,
    /// Number of hops.  Zero means the transition is instantaneous.
    pub steps: u32,
    /// `hop_duration_ms * steps`.
    pub total_duration_ms: u32,
}

/// Decode the 1-byte wire transition time.
///
/// Returns `None` for the reserved `0x3F` step count — the caller must drop
/// the message.  A zero step count decodes to a zero-duration timing; the
/// caller short-circuits to an instantaneous state change instead of
/// scheduling.
pub fn decode_transition_time(raw: u8) -> Option<TransitionTiming> {
    let steps = u32::from(raw & STEPS_MASK);
    if steps == u32::from(TRANS_TIME_UNKNOWN) {
        return None;
    }

    let hop_duration_ms = match raw >> 6 {
        0 => 100,
        1 => 1_000,
        2 => 10_000,
        _ => 600_000,
    };

    Some(TransitionTiming {
        hop_duration_ms,
        steps,
        total_duration_ms: hop_duration_ms * steps,
    })
}

/// Resolution bits for a hop duration, if it is one of the four defined
/// quantization steps.
pub fn resolution_for_hop(hop_duration_ms: u32) -> Option<u8> {
    match hop_duration_ms {
        100 => Some(0),
        1_000 => Some(1),
        10_000 => Some(2),
        600_000 => Some(3),
        _ => None,
    }
}

/// Pack a (hop duration, step count) pair back into the wire byte.
///
/// Returns `None` if the hop duration is not a defined resolution or the
/// step count does not fit the 6-bit field.
pub fn encode_transition_time(hop_duration_ms: u32, steps: u32) -> Option<u8> {
    if steps >= u32::from(TRANS_TIME_UNKNOWN) {
        return None;
    }
    let resolution = resolution_for_hop(hop_duration_ms)?;
    Some((resolution << 6) | steps as u8)
}

/// Encode the remaining transition time of a live transition.
///
/// Move transitions have no defined end time and always encode the unknown
/// sentinel.  Otherwise the remainder is banded into the coarsest resolution
/// whose step count fits: strictly greater than 620 s selects 10-minute
/// steps, greater than 62 s selects 10-second steps, greater than 6.2 s
/// selects 1-second steps, anything else positive selects 100 ms steps.
/// The boundary values themselves (6 200, 62 000, 620 000 ms) therefore
/// encode as exactly 62 steps of the finer resolution.
///
/// A zero `start_timestamp` means the transition has not started yet (still
/// in its delay phase); the full total duration is encoded.
pub fn encode_remaining_time(
    kind: TransitionKind,
    total_duration_ms: u32,
    start_timestamp: i64,
    now_ms: i64,
) -> u8 {
    if kind == TransitionKind::Move {
        return TRANS_TIME_UNKNOWN;
    }

    let remainder: i64 = if start_timestamp == 0 {
        i64::from(total_duration_ms)
    } else {
        i64::from(total_duration_ms).saturating_sub(now_ms.saturating_sub(start_timestamp))
    };

    let (resolution, steps) = if remainder > 620_000 {
        (0b11u8, remainder / 600_000)
    } else if remainder > 62_000 {
        (0b10, remainder / 10_000)
    } else if remainder > 6_200 {
        (0b01, remainder / 1_000)
    } else if remainder > 0 {
        (0b00, remainder / 100)
    } else {
        (0b00, 0)
    };

    (resolution << 6) | (steps.min(62) as u8)
}

/// Shift a wire Level value into the unsigned working range.
pub fn level_to_working(level: i16) -> u16 {
    (level as u16).wrapping_add(0x8000)
}

/// Shift a working-range value back to the wire Level representation.
pub fn working_to_level(working: u16) -> i16 {
    working.wrapping_sub(0x8000) as i16
}
