//! Transition scheduler.
//!
//! Drives a [`TransitionModel`] through its timer-based lifecycle:
//!
//! ```text
//!            Set (Scheduled, delay > 0)
//!   Idle ───────────────────────────────▶ Delaying
//!    │                                       │ delay timer fires
//!    │  Set (Scheduled, delay = 0)           ▼
//!    └──────────────────────────────────▶ Running ──▶ Idle (+ publish)
//! ```
//!
//! One engine exists per model element and exclusively owns that element's
//! timers, identified by `(element, role)` value keys.  Each role is tracked
//! with an explicit [`TimerState`], so "construct vs restart" collapses into
//! a single arm path and a second timer per role can never leak.
//!
//! A new Set arriving while delaying or running restarts the relevant timer
//! with the new duration; superseded roles are disarmed in the same commit.
//! Late fires from a superseded timer are rejected by the phase and
//! `remaining_hops` guards at the top of the fire handler.

use log::{debug, warn};

use crate::app::ports::{ElementId, PublishSink, TimerKey, TimerPort, TimerRole};
use crate::codec;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::model::{
    ServerRole, SetOutcome, SetPlan, TransitionKind, TransitionModel,
};

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// Lifecycle phase of the element's transition machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Delay timer armed; the transition proper has not started.
    Delaying,
    /// Transition timer(s) armed; `start_timestamp` is set.
    Running,
}

/// Armed-ness of one timer role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerState {
    #[default]
    Unarmed,
    Armed,
}

#[derive(Debug, Default)]
struct TimerBank {
    delay: TimerState,
    onoff_on: TimerState,
    onoff_off: TimerState,
    level_step: TimerState,
}

impl TimerBank {
    const ROLES: [TimerRole; 4] = [
        TimerRole::Delay,
        TimerRole::OnOffOn,
        TimerRole::OnOffOff,
        TimerRole::LevelStep,
    ];

    fn get(&self, role: TimerRole) -> TimerState {
        match role {
            TimerRole::Delay => self.delay,
            TimerRole::OnOffOn => self.onoff_on,
            TimerRole::OnOffOff => self.onoff_off,
            TimerRole::LevelStep => self.level_step,
        }
    }

    fn set(&mut self, role: TimerRole, state: TimerState) {
        match role {
            TimerRole::Delay => self.delay = state,
            TimerRole::OnOffOn => self.onoff_on = state,
            TimerRole::OnOffOff => self.onoff_off = state,
            TimerRole::LevelStep => self.level_step = state,
        }
    }
}

// ---------------------------------------------------------------------------
// Transition engine
// ---------------------------------------------------------------------------

/// Scheduler plus model for one element.
#[derive(Debug)]
pub struct TransitionEngine {
    element: ElementId,
    model: TransitionModel,
    phase: Phase,
    /// Which server shape the in-flight transition belongs to.
    active_role: Option<ServerRole>,
    timers: TimerBank,
}

impl TransitionEngine {
    pub fn new(element: ElementId, config: &NodeConfig) -> Self {
        Self {
            element,
            model: TransitionModel::new(config),
            phase: Phase::Idle,
            active_role: None,
            timers: TimerBank::default(),
        }
    }

    pub fn model(&self) -> &TransitionModel {
        &self.model
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    // ── Commit ────────────────────────────────────────────────

    /// Commit an accepted plan: secure timers, then mutate.
    ///
    /// For scheduled transitions the new timer is armed *before* any state
    /// is touched — if the host cannot arm it, the previous transition (and
    /// the dedup key) are left exactly as they were and the message can be
    /// retried.
    pub fn commit(
        &mut self,
        plan: &SetPlan,
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        match plan.outcome {
            SetOutcome::NoTransition => {
                self.cancel_all(timer);
                self.model.apply_plan(plan);
                self.phase = Phase::Idle;
                self.active_role = None;
                Ok(())
            }
            SetOutcome::Instantaneous => {
                self.cancel_all(timer);
                self.model.apply_plan(plan);
                self.phase = Phase::Idle;
                self.active_role = None;
                debug!(
                    "el{}: instantaneous change to {}",
                    self.element.0, plan.target
                );
                self.publish(plan.role, now_ms, sink);
                Ok(())
            }
            SetOutcome::Scheduled { delay_ms } => {
                let (first_role, duration_ms) = if delay_ms > 0 {
                    (TimerRole::Delay, delay_ms)
                } else {
                    starting_timer(
                        plan.role,
                        plan.target,
                        plan.kind,
                        plan.timing.hop_duration_ms,
                        plan.timing.total_duration_ms,
                    )
                };

                self.arm(timer, first_role, duration_ms)?;
                self.cancel_all_except(timer, first_role);
                self.model.apply_plan(plan);
                self.active_role = Some(plan.role);

                if delay_ms > 0 {
                    self.phase = Phase::Delaying;
                    debug!(
                        "el{}: transition to {} delayed {} ms",
                        self.element.0, plan.target, delay_ms
                    );
                } else {
                    self.enter_running(now_ms);
                }
                Ok(())
            }
        }
    }

    // ── Timer fire dispatch ───────────────────────────────────

    /// Handle a timer fire for this element.
    ///
    /// Fires that no longer correspond to the in-flight transition (late
    /// fires from a superseded or completed transition) are dropped.
    pub fn on_timer_fired(
        &mut self,
        role: TimerRole,
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        if self.timers.get(role) != TimerState::Armed || !self.model.transition.in_flight() {
            warn!("el{}: stale {:?} fire ignored", self.element.0, role);
            return Ok(());
        }

        match role {
            TimerRole::Delay => self.on_delay_fired(now_ms, timer),
            TimerRole::OnOffOn | TimerRole::OnOffOff => {
                self.on_onoff_fired(role, now_ms, sink);
                Ok(())
            }
            TimerRole::LevelStep => self.on_level_step_fired(now_ms, timer, sink),
        }
    }

    fn on_delay_fired(&mut self, now_ms: i64, timer: &mut impl TimerPort) -> Result<()> {
        if self.phase != Phase::Delaying {
            warn!("el{}: delay fire outside Delaying ignored", self.element.0);
            self.timers.set(TimerRole::Delay, TimerState::Unarmed);
            return Ok(());
        }
        self.timers.set(TimerRole::Delay, TimerState::Unarmed);

        let Some(role) = self.active_role else {
            return Ok(());
        };
        let (timer_role, duration_ms) = starting_timer(
            role,
            self.model.state.target,
            self.model.transition.kind,
            self.model.transition.hop_duration_ms,
            self.model.transition.total_duration_ms,
        );
        // Stay in Delaying on arm failure; a subsequent Set recovers.
        self.arm(timer, timer_role, duration_ms)?;
        self.enter_running(now_ms);
        Ok(())
    }

    fn on_onoff_fired(&mut self, role: TimerRole, now_ms: i64, sink: &mut impl PublishSink) {
        if self.phase != Phase::Running || self.active_role != Some(ServerRole::OnOff) {
            warn!("el{}: stray {:?} fire ignored", self.element.0, role);
            self.timers.set(role, TimerState::Unarmed);
            return;
        }
        self.timers.set(role, TimerState::Unarmed);

        // Turning off flips at completion; turning on already flipped when
        // the transition entered Running.
        self.model.state.current = self.model.state.target;
        self.complete(ServerRole::OnOff, now_ms, sink);
    }

    fn on_level_step_fired(
        &mut self,
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        if self.phase != Phase::Running || self.active_role != Some(ServerRole::Level) {
            warn!("el{}: stray LevelStep fire ignored", self.element.0);
            self.timers.set(TimerRole::LevelStep, TimerState::Unarmed);
            return Ok(());
        }
        self.timers.set(TimerRole::LevelStep, TimerState::Unarmed);

        match self.model.transition.kind {
            TransitionKind::NonMove => {
                self.model.transition.remaining_hops -= 1;
                if self.model.transition.remaining_hops > 0 {
                    let next = i32::from(self.model.state.current) + self.model.state.delta;
                    self.model.state.current = next.clamp(0, 0xFFFF) as u16;
                    let hop = self.model.transition.hop_duration_ms;
                    self.arm(timer, TimerRole::LevelStep, hop)?;
                } else {
                    // Final hop lands exactly on the target, absorbing any
                    // integer-division residue in the per-step delta.
                    self.model.state.current = self.model.state.target;
                    self.complete(ServerRole::Level, now_ms, sink);
                }
            }
            TransitionKind::Move => {
                // Rate tick: apply the raw delta, saturating at the target
                // bound so the working value can never wrap.
                let next = i32::from(self.model.state.current) + self.model.state.delta;
                let next = next.clamp(0, 0xFFFF) as u16;
                self.model.state.current = if self.model.state.delta > 0 {
                    next.min(self.model.state.target)
                } else {
                    next.max(self.model.state.target)
                };
                if self.model.state.current == self.model.state.target {
                    self.complete(ServerRole::Level, now_ms, sink);
                } else {
                    let period = self.model.transition.total_duration_ms;
                    self.arm(timer, TimerRole::LevelStep, period)?;
                }
            }
            TransitionKind::None => {
                warn!("el{}: LevelStep fire with no transition", self.element.0);
            }
        }
        Ok(())
    }

    // ── Power-up restore ──────────────────────────────────────

    /// Apply the restored OnOff target at boot.
    ///
    /// A zero (or invalid) default transition time snaps the state
    /// immediately; otherwise a normal OnOff transition runs over the
    /// decoded duration and publishes on completion.  Timer failure at boot
    /// degrades to the instantaneous path.
    pub fn power_up(
        &mut self,
        target: u16,
        default_trans_time: u8,
        now_ms: i64,
        timer: &mut impl TimerPort,
    ) {
        self.model.state.target = target;
        if target == self.model.state.current {
            return;
        }

        let timing = codec::decode_transition_time(default_trans_time)
            .filter(|t| t.steps > 0);
        let Some(timing) = timing else {
            self.model.state.current = target;
            return;
        };

        let (timer_role, duration_ms) = starting_timer(
            ServerRole::OnOff,
            target,
            TransitionKind::NonMove,
            timing.hop_duration_ms,
            timing.total_duration_ms,
        );
        if let Err(e) = self.arm(timer, timer_role, duration_ms) {
            warn!(
                "el{}: power-up transition timer unavailable ({e}), snapping",
                self.element.0
            );
            self.model.state.current = target;
            return;
        }

        self.model.transition = crate::model::Transition {
            kind: TransitionKind::NonMove,
            trans_time_raw: default_trans_time,
            delay_ms: 0,
            hop_duration_ms: timing.hop_duration_ms,
            remaining_hops: timing.steps,
            total_duration_ms: timing.total_duration_ms,
            start_timestamp: 0,
        };
        self.active_role = Some(ServerRole::OnOff);
        self.enter_running(now_ms);
    }

    // ── Internal ──────────────────────────────────────────────

    /// Enter `Running`: stamp the start time and apply the on-flip rule
    /// (turning on is visually instantaneous; the publish waits for the
    /// timer).
    fn enter_running(&mut self, now_ms: i64) {
        self.phase = Phase::Running;
        self.model.transition.delay_ms = 0;
        self.model.transition.start_timestamp = now_ms;
        if self.active_role == Some(ServerRole::OnOff) && self.model.state.target != 0 {
            self.model.state.current = self.model.state.target;
        }
        debug!(
            "el{}: running toward {} ({} hops)",
            self.element.0, self.model.state.target, self.model.transition.remaining_hops
        );
    }

    /// Finish the in-flight transition and publish exactly once.
    fn complete(&mut self, role: ServerRole, now_ms: i64, sink: &mut impl PublishSink) {
        self.model.finish_transition();
        self.phase = Phase::Idle;
        self.active_role = None;
        debug!(
            "el{}: transition complete at {}",
            self.element.0, self.model.state.current
        );
        self.publish(role, now_ms, sink);
    }

    fn publish(&self, role: ServerRole, now_ms: i64, sink: &mut impl PublishSink) {
        let status = match role {
            ServerRole::OnOff => {
                crate::app::messages::StatusMessage::OnOff(self.model.onoff_status(now_ms))
            }
            ServerRole::Level => {
                crate::app::messages::StatusMessage::Level(self.model.level_status(now_ms))
            }
        };
        sink.publish(self.element, &status);
    }

    fn key(&self, role: TimerRole) -> TimerKey {
        TimerKey {
            element: self.element,
            role,
        }
    }

    fn arm(
        &mut self,
        timer: &mut impl TimerPort,
        role: TimerRole,
        duration_ms: u32,
    ) -> Result<()> {
        timer.arm(self.key(role), duration_ms, false)?;
        self.timers.set(role, TimerState::Armed);
        Ok(())
    }

    fn cancel_all(&mut self, timer: &mut impl TimerPort) {
        for role in TimerBank::ROLES {
            if self.timers.get(role) == TimerState::Armed {
                timer.disarm(self.key(role));
                self.timers.set(role, TimerState::Unarmed);
            }
        }
    }

    fn cancel_all_except(&mut self, timer: &mut impl TimerPort, keep: TimerRole) {
        for role in TimerBank::ROLES {
            if role != keep && self.timers.get(role) == TimerState::Armed {
                timer.disarm(self.key(role));
                self.timers.set(role, TimerState::Unarmed);
            }
        }
    }
}

/// Which timer role starts a transition, and for how long.
fn starting_timer(
    role: ServerRole,
    target: u16,
    kind: TransitionKind,
    hop_duration_ms: u32,
    total_duration_ms: u32,
) -> (TimerRole, u32) {
    match (role, kind) {
        (ServerRole::OnOff, _) => {
            if target == 0 {
                (TimerRole::OnOffOff, total_duration_ms)
            } else {
                (TimerRole::OnOffOn, total_duration_ms)
            }
        }
        (ServerRole::Level, TransitionKind::Move) => (TimerRole::LevelStep, total_duration_ms),
        (ServerRole::Level, _) => (TimerRole::LevelStep, hop_duration_ms),
    }
}
