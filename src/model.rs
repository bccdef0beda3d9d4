//! Transition model: state, dedup, and Set-message planning.
//!
//! One [`TransitionModel`] holds the bound OnOff/Level state of a single
//! element in its unsigned working representation, the in-flight transition
//! descriptor, and the retransmission dedup key.
//!
//! Planning is deliberately split from mutation: every `plan_*` method is
//! pure — it validates, dedups, and clamps, then returns a [`SetPlan`]
//! describing what *would* change.  The scheduler commits a plan only after
//! timer resources are secured, so a failed arm leaves the model exactly as
//! it was and the message can be retried.

use crate::app::messages::{LevelStatus, MsgCtx, OnOffStatus};
use crate::codec::{
    self, DELAY_STEP_MS, TransitionTiming, level_to_working, working_to_level,
};
use crate::config::NodeConfig;

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

/// Shape of the transition a Set message requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionKind {
    /// No transition in flight.
    #[default]
    None,
    /// Discrete ramp toward a fixed target (OnOff and Level/Delta Sets).
    NonMove,
    /// Rate-driven Move toward a range bound.
    Move,
}

/// Which server shape drives a transition — determines timer roles and the
/// status message type published on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    OnOff,
    Level,
}

/// One controllable scalar in working (shifted) representation.
///
/// OnOff and Level are bound states sharing this value: OnOff reads it as
/// zero/nonzero, Level as a biased `i16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateProperties {
    /// Present value.
    pub current: u16,
    /// Value the transition is driving toward.
    pub target: u16,
    /// Inclusive lower clamp bound.
    pub range_min: u16,
    /// Inclusive upper clamp bound.
    pub range_max: u16,
    /// Per-step increment for gradual transitions, or the raw Move rate.
    pub delta: i32,
}

/// One in-flight (or idle) transition descriptor.
///
/// `remaining_hops == 0` is the sole authoritative "finished" signal;
/// `start_timestamp` is reset to 0 exactly when it reaches 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    pub kind: TransitionKind,
    /// Wire-format quantized transition time.
    pub trans_time_raw: u8,
    /// Remaining start delay; cleared when the delay timer fires.
    pub delay_ms: u32,
    pub hop_duration_ms: u32,
    pub remaining_hops: u32,
    pub total_duration_ms: u32,
    /// Uptime at which the transition entered Running; 0 = not started.
    pub start_timestamp: i64,
}

impl Transition {
    /// Whether a transition is in flight (delaying or running).
    pub fn in_flight(&self) -> bool {
        self.remaining_hops > 0
    }
}

/// Retransmission detection key, updated on every accepted Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupKey {
    last_tid: u8,
    last_src_addr: u16,
    last_dst_addr: u16,
    last_msg_timestamp: i64,
}

impl DedupKey {
    fn matches(&self, tid: u8, ctx: MsgCtx, now_ms: i64, window_ms: i64) -> bool {
        self.last_tid == tid
            && self.last_src_addr == ctx.src
            && self.last_dst_addr == ctx.dst
            && now_ms - self.last_msg_timestamp <= window_ms
    }

    fn refreshed(tid: u8, ctx: MsgCtx, now_ms: i64) -> Self {
        Self {
            last_tid: tid,
            last_src_addr: ctx.src,
            last_dst_addr: ctx.dst,
            last_msg_timestamp: now_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Planning output
// ---------------------------------------------------------------------------

/// How an accepted Set resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Already at the target (or a zero-rate/zero-time Move): no transition
    /// is scheduled, but an acknowledged Set still owes a status reply.
    NoTransition,
    /// Zero transition steps: the state snaps to the target and a single
    /// status is published.
    Instantaneous,
    /// A timer-driven transition must be armed, optionally after a delay.
    Scheduled { delay_ms: u32 },
}

/// Delta bookkeeping carried by accepted Delta Sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaTrack {
    /// Level captured at the start of the dedup window.
    pub base: i16,
    /// The message delta, remembered for retransmission comparison.
    pub message_delta: i32,
}

/// Everything an accepted Set would change, computed without mutating.
#[derive(Debug, Clone, Copy)]
pub struct SetPlan {
    pub role: ServerRole,
    pub kind: TransitionKind,
    pub outcome: SetOutcome,
    pub dedup: DedupKey,
    pub target: u16,
    pub trans_time_raw: u8,
    /// Populated for `Scheduled`; zeroed otherwise.
    pub timing: TransitionTiming,
    /// New `StateProperties::delta`, when the plan defines one.
    pub delta: Option<i32>,
    pub delta_track: Option<DeltaTrack>,
}

/// Result of planning one inbound Set message.
#[derive(Debug, Clone, Copy)]
pub enum Decision {
    /// The message repeats one handled inside the dedup window.  No state
    /// change; acknowledged Sets reply with the unchanged status.
    Retransmission,
    Accepted(SetPlan),
}

// ---------------------------------------------------------------------------
// Transition model
// ---------------------------------------------------------------------------

/// Per-element model state plus planning logic.
#[derive(Debug)]
pub struct TransitionModel {
    pub state: StateProperties,
    pub transition: Transition,
    dedup: DedupKey,
    /// Level captured when the current Delta dedup window opened.
    delta_base: i16,
    /// Message delta of the last accepted Delta Set, if any.
    last_delta: Option<i32>,
    dedup_window_ms: i64,
}

impl TransitionModel {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            state: StateProperties {
                current: 0,
                target: 0,
                range_min: config.range_min,
                range_max: config.range_max,
                delta: 0,
            },
            transition: Transition::default(),
            dedup: DedupKey::default(),
            delta_base: 0,
            last_delta: None,
            dedup_window_ms: config.dedup_window_ms,
        }
    }

    // ── Planning ──────────────────────────────────────────────

    /// Plan a Generic OnOff Set.  `onoff` must already be validated to 0/1.
    pub fn plan_onoff(
        &self,
        tid: u8,
        ctx: MsgCtx,
        now_ms: i64,
        onoff: u8,
        trans_time_raw: u8,
        timing: TransitionTiming,
        delay: u8,
    ) -> Decision {
        debug_assert!(onoff <= 1);
        if self.dedup.matches(tid, ctx, now_ms, self.dedup_window_ms) {
            return Decision::Retransmission;
        }

        self.finish_non_move(
            ServerRole::OnOff,
            u16::from(onoff),
            DedupKey::refreshed(tid, ctx, now_ms),
            trans_time_raw,
            timing,
            delay,
            None,
        )
    }

    /// Plan a Generic Level Set (absolute).
    pub fn plan_level(
        &self,
        tid: u8,
        ctx: MsgCtx,
        now_ms: i64,
        level: i16,
        trans_time_raw: u8,
        timing: TransitionTiming,
        delay: u8,
    ) -> Decision {
        if self.dedup.matches(tid, ctx, now_ms, self.dedup_window_ms) {
            return Decision::Retransmission;
        }

        let target = self.constrain_target(level_to_working(level));
        self.finish_non_move(
            ServerRole::Level,
            target,
            DedupKey::refreshed(tid, ctx, now_ms),
            trans_time_raw,
            timing,
            delay,
            None,
        )
    }

    /// Plan a Generic Delta Set.
    ///
    /// A message matching the dedup key with the *same* delta is a true
    /// retransmission; one with a different delta continues the transaction
    /// from the Level captured when the window opened.
    pub fn plan_delta(
        &self,
        tid: u8,
        ctx: MsgCtx,
        now_ms: i64,
        delta: i32,
        trans_time_raw: u8,
        timing: TransitionTiming,
        delay: u8,
    ) -> Decision {
        let base = if self.dedup.matches(tid, ctx, now_ms, self.dedup_window_ms) {
            if self.last_delta == Some(delta) {
                return Decision::Retransmission;
            }
            self.delta_base
        } else {
            working_to_level(self.state.current)
        };

        let target_level = (i32::from(base) + delta)
            .clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        let target = self.constrain_delta_target(level_to_working(target_level), delta);

        self.finish_non_move(
            ServerRole::Level,
            target,
            DedupKey::refreshed(tid, ctx, now_ms),
            trans_time_raw,
            timing,
            delay,
            Some(DeltaTrack {
                base,
                message_delta: delta,
            }),
        )
    }

    /// Plan a Generic Move Set.
    ///
    /// The delta is a rate, not a step: the target is the range bound in the
    /// delta's direction and the rate is applied unscaled every transition
    /// time.  A zero rate or zero transition time produces no movement.
    pub fn plan_move(
        &self,
        tid: u8,
        ctx: MsgCtx,
        now_ms: i64,
        delta: i16,
        trans_time_raw: u8,
        timing: TransitionTiming,
        delay: u8,
    ) -> Decision {
        if self.dedup.matches(tid, ctx, now_ms, self.dedup_window_ms) {
            return Decision::Retransmission;
        }

        let target = if delta < 0 {
            self.state.range_min
        } else if delta > 0 {
            self.state.range_max
        } else {
            self.state.current
        };

        let mut plan = SetPlan {
            role: ServerRole::Level,
            kind: TransitionKind::Move,
            outcome: SetOutcome::NoTransition,
            dedup: DedupKey::refreshed(tid, ctx, now_ms),
            target,
            trans_time_raw,
            timing: TransitionTiming::default(),
            delta: Some(i32::from(delta)),
            delta_track: None,
        };

        // A Move with nothing to move, or with a zero transition time, sets
        // the target but never starts a transition (no instantaneous jump).
        if target != self.state.current && timing.steps > 0 {
            plan.outcome = SetOutcome::Scheduled {
                delay_ms: u32::from(delay) * DELAY_STEP_MS,
            };
            plan.timing = timing;
        }

        Decision::Accepted(plan)
    }

    fn finish_non_move(
        &self,
        role: ServerRole,
        target: u16,
        dedup: DedupKey,
        trans_time_raw: u8,
        timing: TransitionTiming,
        delay: u8,
        delta_track: Option<DeltaTrack>,
    ) -> Decision {
        let mut plan = SetPlan {
            role,
            kind: TransitionKind::NonMove,
            outcome: SetOutcome::NoTransition,
            dedup,
            target,
            trans_time_raw,
            timing: TransitionTiming::default(),
            delta: None,
            delta_track,
        };

        if target == self.state.current {
            return Decision::Accepted(plan);
        }

        if timing.steps == 0 {
            plan.outcome = SetOutcome::Instantaneous;
            return Decision::Accepted(plan);
        }

        plan.outcome = SetOutcome::Scheduled {
            delay_ms: u32::from(delay) * DELAY_STEP_MS,
        };
        plan.timing = timing;

        if role == ServerRole::Level {
            // Per-step increment, sign-correct toward the target.  Integer
            // division may leave a residue; the final step absorbs it by
            // snapping to the target.
            let span = (i32::from(target) - i32::from(self.state.current)).abs();
            let step = span / timing.steps as i32;
            plan.delta = Some(if target >= self.state.current { step } else { -step });
        }

        Decision::Accepted(plan)
    }

    // ── Clamping ──────────────────────────────────────────────

    /// Range clamp for absolute Level targets: nonzero values below the
    /// minimum snap up, values above the maximum snap down.
    fn constrain_target(&self, target: u16) -> u16 {
        if target > 0 && target < self.state.range_min {
            self.state.range_min
        } else if target > self.state.range_max {
            self.state.range_max
        } else {
            target
        }
    }

    /// Range clamp for Delta targets: an underflow below the minimum with a
    /// negative delta resets to 0 instead of snapping up.
    fn constrain_delta_target(&self, target: u16, delta: i32) -> u16 {
        if target > 0 && target < self.state.range_min {
            if delta < 0 { 0 } else { self.state.range_min }
        } else if target > self.state.range_max {
            self.state.range_max
        } else {
            target
        }
    }

    // ── Commit (called by the scheduler once timers are secured) ──

    pub(crate) fn apply_plan(&mut self, plan: &SetPlan) {
        self.dedup = plan.dedup;
        self.state.target = plan.target;
        if let Some(delta) = plan.delta {
            self.state.delta = delta;
        }
        match plan.delta_track {
            Some(track) => {
                self.delta_base = track.base;
                self.last_delta = Some(track.message_delta);
            }
            None => self.last_delta = None,
        }

        match plan.outcome {
            SetOutcome::NoTransition => {
                self.transition = Transition::default();
            }
            SetOutcome::Instantaneous => {
                self.transition = Transition::default();
                self.state.current = plan.target;
            }
            SetOutcome::Scheduled { delay_ms } => {
                self.transition = Transition {
                    kind: plan.kind,
                    trans_time_raw: plan.trans_time_raw,
                    delay_ms,
                    hop_duration_ms: plan.timing.hop_duration_ms,
                    remaining_hops: plan.timing.steps,
                    total_duration_ms: plan.timing.total_duration_ms,
                    start_timestamp: 0,
                };
            }
        }
    }

    /// Mark the transition finished: the completion invariant in one place.
    pub(crate) fn finish_transition(&mut self) {
        self.transition.remaining_hops = 0;
        self.transition.start_timestamp = 0;
        self.transition.kind = TransitionKind::None;
    }

    // ── Status snapshots ──────────────────────────────────────

    /// Present OnOff plus target/remaining while a transition is in flight.
    ///
    /// Presentation rule: an element transitioning toward On already reports
    /// On even though the bound value has not flipped yet.
    pub fn onoff_status(&self, now_ms: i64) -> OnOffStatus {
        let present = u8::from(self.state.current != 0 || self.state.target != 0);
        let transition = self.transition.in_flight().then(|| {
            (
                u8::from(self.state.target != 0),
                codec::encode_remaining_time(
                    self.transition.kind,
                    self.transition.total_duration_ms,
                    self.transition.start_timestamp,
                    now_ms,
                ),
            )
        });
        OnOffStatus { present, transition }
    }

    /// Present Level plus target/remaining while a transition is in flight.
    pub fn level_status(&self, now_ms: i64) -> LevelStatus {
        let present = working_to_level(self.state.current);
        let transition = self.transition.in_flight().then(|| {
            (
                working_to_level(self.state.target),
                codec::encode_remaining_time(
                    self.transition.kind,
                    self.transition.total_duration_ms,
                    self.transition.start_timestamp,
                    now_ms,
                ),
            )
        });
        LevelStatus { present, transition }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_transition_time;

    const CTX: MsgCtx = MsgCtx { src: 0x0101, dst: 0xC000 };

    fn model() -> TransitionModel {
        TransitionModel::new(&NodeConfig::default())
    }

    fn timing(raw: u8) -> TransitionTiming {
        decode_transition_time(raw).unwrap()
    }

    fn accepted(decision: Decision) -> SetPlan {
        match decision {
            Decision::Accepted(plan) => plan,
            Decision::Retransmission => panic!("expected accepted plan"),
        }
    }

    #[test]
    fn onoff_instantaneous_when_steps_zero() {
        let m = model();
        let plan = accepted(m.plan_onoff(1, CTX, 100, 1, 0x00, timing(0x00), 0));
        assert_eq!(plan.outcome, SetOutcome::Instantaneous);
        assert_eq!(plan.target, 1);
    }

    #[test]
    fn onoff_already_at_target() {
        let m = model();
        let plan = accepted(m.plan_onoff(1, CTX, 100, 0, 0x05, timing(0x05), 0));
        assert_eq!(plan.outcome, SetOutcome::NoTransition);
    }

    #[test]
    fn retransmission_inside_window() {
        let mut m = model();
        let plan = accepted(m.plan_onoff(7, CTX, 1_000, 1, 0x00, timing(0x00), 0));
        m.apply_plan(&plan);

        // Same (tid, src, dst) 3 seconds later: deduped.
        assert!(matches!(
            m.plan_onoff(7, CTX, 4_000, 0, 0x00, timing(0x00), 0),
            Decision::Retransmission
        ));

        // Same triple 7 seconds later: window expired, accepted.
        assert!(matches!(
            m.plan_onoff(7, CTX, 8_000, 0, 0x00, timing(0x00), 0),
            Decision::Accepted(_)
        ));
    }

    #[test]
    fn different_source_is_not_a_retransmission() {
        let mut m = model();
        let plan = accepted(m.plan_onoff(7, CTX, 1_000, 1, 0x00, timing(0x00), 0));
        m.apply_plan(&plan);

        let other = MsgCtx { src: 0x0202, dst: CTX.dst };
        assert!(matches!(
            m.plan_onoff(7, other, 2_000, 0, 0x00, timing(0x00), 0),
            Decision::Accepted(_)
        ));
    }

    #[test]
    fn level_snaps_up_to_range_min() {
        let mut m = model();
        m.state.range_min = 0x1000;
        // Working 0x0800 is nonzero and below the minimum.
        let requested = working_to_level(0x0800);
        let plan = accepted(m.plan_level(1, CTX, 100, requested, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0x1000);
    }

    #[test]
    fn level_snaps_down_to_range_max() {
        let mut m = model();
        m.state.range_max = 0x9000;
        let plan = accepted(m.plan_level(1, CTX, 100, i16::MAX, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0x9000);
    }

    #[test]
    fn level_zero_is_preserved() {
        let mut m = model();
        m.state.range_min = 0x1000;
        m.state.current = 0x2000;
        let plan = accepted(m.plan_level(1, CTX, 100, i16::MIN, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0, "working zero must not snap up to range_min");
    }

    #[test]
    fn level_step_delta_is_signed_toward_target() {
        let mut m = model();
        m.state.current = level_to_working(2_000);
        let plan = accepted(m.plan_level(1, CTX, 100, 1_000, 0x05, timing(0x05), 0));
        assert_eq!(plan.delta, Some(-200));

        let plan = accepted(m.plan_level(2, CTX, 100, 3_000, 0x05, timing(0x05), 0));
        assert_eq!(plan.delta, Some(200));
    }

    #[test]
    fn delta_saturates_then_resets_to_zero_on_underflow() {
        let mut m = model();
        m.state.current = 100; // working
        let plan = accepted(m.plan_delta(1, CTX, 100, -50_000, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0, "underflow with negative delta resets to 0");
    }

    #[test]
    fn delta_underflow_into_nonzero_range_clamps_to_zero() {
        let mut m = model();
        m.state.range_min = 0x0100;
        m.state.current = 0x0200;
        let plan = accepted(m.plan_delta(1, CTX, 100, -600, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0);
    }

    #[test]
    fn delta_positive_overflow_clamps_to_range_max() {
        let mut m = model();
        m.state.range_max = 0x9000;
        m.state.current = 0x8000; // level 0
        let plan = accepted(m.plan_delta(1, CTX, 100, 60_000, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0x9000);
    }

    #[test]
    fn delta_same_value_in_window_is_retransmission() {
        let mut m = model();
        m.state.current = 0x8000;
        let plan = accepted(m.plan_delta(5, CTX, 1_000, 100, 0x00, timing(0x00), 0));
        m.apply_plan(&plan);
        assert!(matches!(
            m.plan_delta(5, CTX, 2_000, 100, 0x00, timing(0x00), 0),
            Decision::Retransmission
        ));
    }

    #[test]
    fn delta_continuation_recomputes_from_window_base() {
        let mut m = model();
        m.state.current = 0x8000; // level 0
        let plan = accepted(m.plan_delta(5, CTX, 1_000, 100, 0x00, timing(0x00), 0));
        m.apply_plan(&plan);
        assert_eq!(m.state.current, 0x8000 + 100);

        // Same TID, larger delta: target is base + delta, not current + delta.
        let plan = accepted(m.plan_delta(5, CTX, 2_000, 250, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0x8000 + 250);
    }

    #[test]
    fn delta_outside_window_captures_new_base() {
        let mut m = model();
        m.state.current = 0x8000;
        let plan = accepted(m.plan_delta(5, CTX, 1_000, 100, 0x00, timing(0x00), 0));
        m.apply_plan(&plan);

        let plan = accepted(m.plan_delta(6, CTX, 2_000, 100, 0x00, timing(0x00), 0));
        assert_eq!(plan.target, 0x8000 + 200, "new window starts from current");
    }

    #[test]
    fn move_targets_range_bound_by_sign() {
        let mut m = model();
        m.state.current = 0x8000;
        let down = accepted(m.plan_move(1, CTX, 100, -10, 0x45, timing(0x45), 0));
        assert_eq!(down.target, m.state.range_min);
        assert_eq!(down.kind, TransitionKind::Move);
        assert_eq!(down.delta, Some(-10));

        let up = accepted(m.plan_move(2, CTX, 200, 10, 0x45, timing(0x45), 0));
        assert_eq!(up.target, m.state.range_max);
    }

    #[test]
    fn move_zero_rate_or_zero_time_never_schedules() {
        let mut m = model();
        m.state.current = 0x8000;
        let plan = accepted(m.plan_move(1, CTX, 100, 0, 0x45, timing(0x45), 0));
        assert_eq!(plan.outcome, SetOutcome::NoTransition);

        let plan = accepted(m.plan_move(2, CTX, 200, 10, 0x00, timing(0x00), 0));
        assert_eq!(
            plan.outcome,
            SetOutcome::NoTransition,
            "zero transition time must not jump to the bound"
        );
    }

    #[test]
    fn scheduled_plan_carries_delay_in_5ms_ticks() {
        let m = model();
        let plan = accepted(m.plan_onoff(1, CTX, 100, 1, 0x05, timing(0x05), 20));
        assert_eq!(plan.outcome, SetOutcome::Scheduled { delay_ms: 100 });
    }

    #[test]
    fn onoff_status_reports_on_during_off_to_on_transition() {
        let mut m = model();
        let plan = accepted(m.plan_onoff(1, CTX, 100, 1, 0x05, timing(0x05), 0));
        m.apply_plan(&plan);
        let status = m.onoff_status(200);
        assert_eq!(status.present, 1);
        assert!(status.transition.is_some());
    }
}
