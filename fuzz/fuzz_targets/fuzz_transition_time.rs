//! Fuzz target: transition-time quantization codec.
//!
//! Every non-reserved byte must round-trip exactly, and the remaining-time
//! encoder must stay panic-free and inside the 6-bit step field for any
//! timing inputs.
//!
//! cargo fuzz run fuzz_transition_time

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshlight::codec::{
    decode_transition_time, encode_remaining_time, encode_transition_time,
};
use meshlight::model::TransitionKind;

fuzz_target!(|data: &[u8]| {
    let Some((&raw, rest)) = data.split_first() else {
        return;
    };

    match decode_transition_time(raw) {
        Some(t) => {
            assert_eq!(
                encode_transition_time(t.hop_duration_ms, t.steps),
                Some(raw),
                "decode/encode must round-trip"
            );
            assert_eq!(t.total_duration_ms, t.hop_duration_ms * t.steps);
        }
        None => assert_eq!(raw & 0x3F, 0x3F, "only the reserved value decodes to None"),
    }

    if rest.len() >= 16 {
        let total = u32::from_le_bytes(rest[0..4].try_into().unwrap());
        let start = i64::from_le_bytes(rest[4..12].try_into().unwrap());
        let elapsed = i64::from(u32::from_le_bytes(rest[12..16].try_into().unwrap()));
        let now = start.wrapping_add(elapsed);

        let enc = encode_remaining_time(TransitionKind::NonMove, total, start, now);
        assert_ne!(enc & 0x3F, 0x3F);
        assert_eq!(
            encode_remaining_time(TransitionKind::Move, total, start, now),
            0x3F
        );
    }
});
