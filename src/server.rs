//! Generic model element servers and the node registry.
//!
//! One [`ElementServer`] per mesh element hosts the bound OnOff/Level state
//! (driven by its [`TransitionEngine`]) plus the auxiliary generic models:
//! Default Transition Time, Power OnOff (OnPowerUp), and Battery.
//!
//! Handlers take the post-opcode payload bytes exactly as the transport
//! delivers them.  Malformed payloads and prohibited values are dropped
//! silently (logged at debug), per the mesh model spec.  Acknowledged
//! handlers return the status reply the transport owes; unacknowledged
//! handlers return nothing.
//!
//! The [`Node`] owns the elements and routes timer fires back to them by
//! value key — no pointers are parked inside timer callbacks.

use heapless::Vec as HVec;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::messages::{BatteryStatus, MsgCtx, StatusMessage};
use crate::app::ports::{ElementId, PublishSink, StoragePort, TimerKey, TimerPort, TimerRole};
use crate::codec::{self, STEPS_MASK, TRANS_TIME_UNKNOWN, TransitionTiming};
use crate::config::NodeConfig;
use crate::engine::TransitionEngine;
use crate::error::{Error, RejectReason, Result};
use crate::model::{Decision, SetOutcome};

/// Upper bound on elements per node (stack-allocated registry).
pub const MAX_ELEMENTS: usize = 4;

/// Storage namespace for persisted model state.
const STORE_NAMESPACE: &str = "models";

/// OnPowerUp modes.
const POWER_UP_OFF: u8 = 0x00;
const POWER_UP_ON: u8 = 0x01;
const POWER_UP_RESTORE: u8 = 0x02;

// ── Persisted records ─────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct PersistedOnOff {
    target: u16,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDefaultTransTime {
    trans_time: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedOnPowerUp {
    mode: u8,
}

// ───────────────────────────────────────────────────────────────
// Element server
// ───────────────────────────────────────────────────────────────

/// All generic model servers of one element.
#[derive(Debug)]
pub struct ElementServer {
    id: ElementId,
    engine: TransitionEngine,
    default_trans_time: u8,
    on_power_up: u8,
    battery: BatteryStatus,
}

impl ElementServer {
    pub fn new(id: ElementId, config: &NodeConfig) -> Self {
        Self {
            id,
            engine: TransitionEngine::new(id, config),
            default_trans_time: config.default_trans_time,
            on_power_up: config.default_on_power_up,
            battery: BatteryStatus {
                battery_level: 0x64,
                time_to_discharge: 0xFE_FFFF,
                time_to_charge: 0x0,
                flags: 0x5F,
            },
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    /// Read access to the transition engine (state snapshots, phase).
    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }

    /// Update the battery readings reported by the Battery server.
    pub fn set_battery(&mut self, battery: BatteryStatus) {
        self.battery = battery;
    }

    // ── Generic OnOff server ──────────────────────────────────

    pub fn recv_onoff_get(&self, now_ms: i64) -> StatusMessage {
        StatusMessage::OnOff(self.engine.model().onoff_status(now_ms))
    }

    pub fn recv_onoff_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) -> Result<Option<StatusMessage>> {
        self.handle_onoff_set(ctx, payload, now_ms, true, timer, sink, store)
    }

    pub fn recv_onoff_set_unack(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) -> Result<()> {
        self.handle_onoff_set(ctx, payload, now_ms, false, timer, sink, store)
            .map(|_| ())
    }

    fn handle_onoff_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        ack: bool,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) -> Result<Option<StatusMessage>> {
        let [onoff, tid, rest @ ..] = payload else {
            self.reject("OnOff set", RejectReason::WrongLength);
            return Ok(None);
        };
        if *onoff > 1 {
            self.reject("OnOff set", RejectReason::ProhibitedValue);
            return Ok(None);
        }
        let Some((tt, timing, delay)) = self.resolve_timing("OnOff set", rest) else {
            return Ok(None);
        };

        debug!(
            "el{}: OnOff set {} tid={} from 0x{:04x}",
            self.id.0, onoff, tid, ctx.src
        );
        match self
            .engine
            .model()
            .plan_onoff(*tid, ctx, now_ms, *onoff, tt, timing, delay)
        {
            Decision::Retransmission => {
                debug!("el{}: OnOff set retransmission", self.id.0);
                Ok(ack.then(|| self.recv_onoff_get(now_ms)))
            }
            Decision::Accepted(plan) => {
                self.engine.commit(&plan, now_ms, timer, sink)?;
                if !matches!(plan.outcome, SetOutcome::NoTransition) {
                    self.store_onoff_target(store);
                }
                Ok(ack.then(|| self.recv_onoff_get(now_ms)))
            }
        }
    }

    // ── Generic Level server ──────────────────────────────────

    pub fn recv_level_get(&self, now_ms: i64) -> StatusMessage {
        StatusMessage::Level(self.engine.model().level_status(now_ms))
    }

    pub fn recv_level_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<Option<StatusMessage>> {
        self.handle_level_set(ctx, payload, now_ms, true, timer, sink)
    }

    pub fn recv_level_set_unack(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        self.handle_level_set(ctx, payload, now_ms, false, timer, sink)
            .map(|_| ())
    }

    fn handle_level_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        ack: bool,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<Option<StatusMessage>> {
        let [lo, hi, tid, rest @ ..] = payload else {
            self.reject("Level set", RejectReason::WrongLength);
            return Ok(None);
        };
        let level = i16::from_le_bytes([*lo, *hi]);
        let Some((tt, timing, delay)) = self.resolve_timing("Level set", rest) else {
            return Ok(None);
        };

        debug!(
            "el{}: Level set {} tid={} from 0x{:04x}",
            self.id.0, level, tid, ctx.src
        );
        match self
            .engine
            .model()
            .plan_level(*tid, ctx, now_ms, level, tt, timing, delay)
        {
            Decision::Retransmission => {
                debug!("el{}: Level set retransmission", self.id.0);
                Ok(ack.then(|| self.recv_level_get(now_ms)))
            }
            Decision::Accepted(plan) => {
                self.engine.commit(&plan, now_ms, timer, sink)?;
                Ok(ack.then(|| self.recv_level_get(now_ms)))
            }
        }
    }

    pub fn recv_delta_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<Option<StatusMessage>> {
        self.handle_delta_set(ctx, payload, now_ms, true, timer, sink)
    }

    pub fn recv_delta_set_unack(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        self.handle_delta_set(ctx, payload, now_ms, false, timer, sink)
            .map(|_| ())
    }

    fn handle_delta_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        ack: bool,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<Option<StatusMessage>> {
        let [d0, d1, d2, d3, tid, rest @ ..] = payload else {
            self.reject("Delta set", RejectReason::WrongLength);
            return Ok(None);
        };
        let delta = i32::from_le_bytes([*d0, *d1, *d2, *d3]);
        let Some((tt, timing, delay)) = self.resolve_timing("Delta set", rest) else {
            return Ok(None);
        };

        debug!(
            "el{}: Delta set {} tid={} from 0x{:04x}",
            self.id.0, delta, tid, ctx.src
        );
        match self
            .engine
            .model()
            .plan_delta(*tid, ctx, now_ms, delta, tt, timing, delay)
        {
            Decision::Retransmission => {
                debug!("el{}: Delta set retransmission", self.id.0);
                Ok(ack.then(|| self.recv_level_get(now_ms)))
            }
            Decision::Accepted(plan) => {
                self.engine.commit(&plan, now_ms, timer, sink)?;
                Ok(ack.then(|| self.recv_level_get(now_ms)))
            }
        }
    }

    pub fn recv_move_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<Option<StatusMessage>> {
        self.handle_move_set(ctx, payload, now_ms, true, timer, sink)
    }

    pub fn recv_move_set_unack(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        self.handle_move_set(ctx, payload, now_ms, false, timer, sink)
            .map(|_| ())
    }

    fn handle_move_set(
        &mut self,
        ctx: MsgCtx,
        payload: &[u8],
        now_ms: i64,
        ack: bool,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<Option<StatusMessage>> {
        let [lo, hi, tid, rest @ ..] = payload else {
            self.reject("Move set", RejectReason::WrongLength);
            return Ok(None);
        };
        let delta = i16::from_le_bytes([*lo, *hi]);
        let Some((tt, timing, delay)) = self.resolve_timing("Move set", rest) else {
            return Ok(None);
        };

        debug!(
            "el{}: Move set rate {} tid={} from 0x{:04x}",
            self.id.0, delta, tid, ctx.src
        );
        match self
            .engine
            .model()
            .plan_move(*tid, ctx, now_ms, delta, tt, timing, delay)
        {
            Decision::Retransmission => {
                debug!("el{}: Move set retransmission", self.id.0);
                Ok(ack.then(|| self.recv_level_get(now_ms)))
            }
            Decision::Accepted(plan) => {
                self.engine.commit(&plan, now_ms, timer, sink)?;
                Ok(ack.then(|| self.recv_level_get(now_ms)))
            }
        }
    }

    // ── Generic Default Transition Time server ────────────────

    pub fn recv_default_trans_time_get(&self) -> StatusMessage {
        StatusMessage::DefaultTransitionTime(self.default_trans_time)
    }

    pub fn recv_default_trans_time_set(
        &mut self,
        payload: &[u8],
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) -> Option<StatusMessage> {
        self.handle_default_trans_time_set(payload, true, sink, store)
    }

    pub fn recv_default_trans_time_set_unack(
        &mut self,
        payload: &[u8],
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) {
        let _ = self.handle_default_trans_time_set(payload, false, sink, store);
    }

    fn handle_default_trans_time_set(
        &mut self,
        payload: &[u8],
        ack: bool,
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) -> Option<StatusMessage> {
        let [tt] = payload else {
            self.reject("DefaultTransTime set", RejectReason::WrongLength);
            return None;
        };
        if tt & STEPS_MASK == TRANS_TIME_UNKNOWN {
            self.reject("DefaultTransTime set", RejectReason::ReservedTransitionTime);
            return None;
        }

        if self.default_trans_time != *tt {
            self.default_trans_time = *tt;
            self.store_record(
                store,
                "dtt",
                &PersistedDefaultTransTime { trans_time: *tt },
            );
            sink.publish(self.id, &StatusMessage::DefaultTransitionTime(*tt));
        }
        ack.then(|| self.recv_default_trans_time_get())
    }

    // ── Generic Power OnOff server ────────────────────────────

    pub fn recv_on_power_up_get(&self) -> StatusMessage {
        StatusMessage::OnPowerUp(self.on_power_up)
    }

    pub fn recv_on_power_up_set(
        &mut self,
        payload: &[u8],
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) -> Option<StatusMessage> {
        self.handle_on_power_up_set(payload, true, sink, store)
    }

    pub fn recv_on_power_up_set_unack(
        &mut self,
        payload: &[u8],
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) {
        let _ = self.handle_on_power_up_set(payload, false, sink, store);
    }

    fn handle_on_power_up_set(
        &mut self,
        payload: &[u8],
        ack: bool,
        sink: &mut impl PublishSink,
        store: &mut impl StoragePort,
    ) -> Option<StatusMessage> {
        let [mode] = payload else {
            self.reject("OnPowerUp set", RejectReason::WrongLength);
            return None;
        };
        if *mode > POWER_UP_RESTORE {
            self.reject("OnPowerUp set", RejectReason::ProhibitedValue);
            return None;
        }

        if self.on_power_up != *mode {
            self.on_power_up = *mode;
            self.store_record(store, "powerup", &PersistedOnPowerUp { mode: *mode });
            sink.publish(self.id, &StatusMessage::OnPowerUp(*mode));
        }
        ack.then(|| self.recv_on_power_up_get())
    }

    // ── Generic Battery server ────────────────────────────────

    pub fn recv_battery_get(&self) -> StatusMessage {
        StatusMessage::Battery(self.battery)
    }

    // ── Timer dispatch & restore ──────────────────────────────

    pub fn on_timer_fired(
        &mut self,
        role: TimerRole,
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        self.engine.on_timer_fired(role, now_ms, timer, sink)
    }

    /// Restore persisted state and apply the OnPowerUp mode.
    pub fn restore(&mut self, store: &impl StoragePort, timer: &mut impl TimerPort, now_ms: i64) {
        if let Some(rec) = self.read_record::<PersistedOnPowerUp>(store, "powerup") {
            if rec.mode <= POWER_UP_RESTORE {
                self.on_power_up = rec.mode;
            }
        }
        if let Some(rec) = self.read_record::<PersistedDefaultTransTime>(store, "dtt") {
            if rec.trans_time & STEPS_MASK != TRANS_TIME_UNKNOWN {
                self.default_trans_time = rec.trans_time;
            }
        }

        let target = match self.on_power_up {
            POWER_UP_OFF => 0,
            POWER_UP_ON => 1,
            POWER_UP_RESTORE => self
                .read_record::<PersistedOnOff>(store, "onoff")
                .map_or(0, |rec| rec.target),
            _ => return,
        };

        info!(
            "el{}: power-up mode {} -> OnOff target {}, dtt 0x{:02x}",
            self.id.0, self.on_power_up, target, self.default_trans_time
        );
        self.engine
            .power_up(target, self.default_trans_time, now_ms, timer);
    }

    // ── Internal ──────────────────────────────────────────────

    /// Resolve the optional `(trans_time, delay)` suffix of a Set payload,
    /// falling back to the Default Transition Time state, and decode it.
    fn resolve_timing(&self, what: &str, rest: &[u8]) -> Option<(u8, TransitionTiming, u8)> {
        let (tt, delay) = match rest {
            [] => (self.default_trans_time, 0),
            [tt, delay] => {
                if tt & STEPS_MASK == TRANS_TIME_UNKNOWN {
                    self.reject(what, RejectReason::ReservedTransitionTime);
                    return None;
                }
                (*tt, *delay)
            }
            _ => {
                self.reject(what, RejectReason::WrongLength);
                return None;
            }
        };
        // The stored default can only be invalid if persistence corrupted it.
        let timing = codec::decode_transition_time(tt)?;
        Some((tt, timing, delay))
    }

    fn reject(&self, what: &str, reason: RejectReason) {
        debug!("el{}: {what} dropped: {reason}", self.id.0);
    }

    fn store_onoff_target(&self, store: &mut impl StoragePort) {
        let record = PersistedOnOff {
            target: self.engine.model().state.target,
        };
        self.store_record(store, "onoff", &record);
    }

    fn store_record<T: Serialize>(&self, store: &mut impl StoragePort, field: &str, record: &T) {
        let key = self.storage_key(field);
        match postcard::to_allocvec(record) {
            Ok(bytes) => {
                if let Err(e) = store.write(STORE_NAMESPACE, &key, &bytes) {
                    warn!("el{}: persist '{key}' failed: {e}", self.id.0);
                }
            }
            Err(_) => warn!("el{}: persist '{key}' encode failed", self.id.0),
        }
    }

    fn read_record<T: serde::de::DeserializeOwned>(
        &self,
        store: &impl StoragePort,
        field: &str,
    ) -> Option<T> {
        let mut buf = [0u8; 16];
        let key = self.storage_key(field);
        let n = store.read(STORE_NAMESPACE, &key, &mut buf).ok()?;
        postcard::from_bytes(&buf[..n]).ok()
    }

    fn storage_key(&self, field: &str) -> String {
        format!("el{}.{field}", self.id.0)
    }
}

// ───────────────────────────────────────────────────────────────
// Node registry
// ───────────────────────────────────────────────────────────────

/// All elements of one node; resolves timer keys back to engines.
#[derive(Debug)]
pub struct Node {
    elements: HVec<ElementServer, MAX_ELEMENTS>,
}

impl Node {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let mut elements = HVec::new();
        for i in 0..config.element_count {
            elements
                .push(ElementServer::new(ElementId(i), config))
                .map_err(|_| Error::Config("element_count exceeds MAX_ELEMENTS"))?;
        }
        Ok(Self { elements })
    }

    pub fn element(&self, id: ElementId) -> Option<&ElementServer> {
        self.elements.get(usize::from(id.0))
    }

    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut ElementServer> {
        self.elements.get_mut(usize::from(id.0))
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Restore every element from persistent storage at boot.
    pub fn restore(
        &mut self,
        store: &impl StoragePort,
        timer: &mut impl TimerPort,
        now_ms: i64,
    ) {
        for element in &mut self.elements {
            element.restore(store, timer, now_ms);
        }
    }

    /// Route a timer fire to the owning element.
    ///
    /// Fires for unknown elements (e.g. after a reconfiguration shrank the
    /// node) are dropped — the key carries no pointer to go stale.
    pub fn on_timer_fired(
        &mut self,
        key: TimerKey,
        now_ms: i64,
        timer: &mut impl TimerPort,
        sink: &mut impl PublishSink,
    ) -> Result<()> {
        match self.element_mut(key.element) {
            Some(element) => element.on_timer_fired(key.role, now_ms, timer, sink),
            None => {
                warn!("timer fire for unknown element {}", key.element.0);
                Ok(())
            }
        }
    }
}
