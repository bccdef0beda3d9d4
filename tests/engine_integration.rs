//! Integration tests: wire payloads → element servers → timers → publish.

use meshlight::app::messages::{MsgCtx, StatusMessage};
use meshlight::app::ports::{
    ElementId, PublishSink, StorageError, StoragePort, TimerError, TimerKey, TimerPort, TimerRole,
};
use meshlight::config::NodeConfig;
use meshlight::server::{ElementServer, Node};
use std::collections::HashMap;

const CTX: MsgCtx = MsgCtx { src: 0x0101, dst: 0xC000 };

// ── Mock implementations ──────────────────────────────────────

#[derive(Default)]
struct MockTimer {
    armed: Vec<(TimerKey, u32)>,
    fail_arm: bool,
}

impl MockTimer {
    /// Simulate a one-shot timer expiring before its fire is dispatched.
    fn expire(&mut self, role: TimerRole) {
        self.armed.retain(|(k, _)| k.role != role);
    }

    fn armed_duration(&self, role: TimerRole) -> Option<u32> {
        self.armed
            .iter()
            .find(|(k, _)| k.role == role)
            .map(|(_, d)| *d)
    }
}

impl TimerPort for MockTimer {
    fn arm(&mut self, key: TimerKey, duration_ms: u32, _periodic: bool) -> Result<(), TimerError> {
        if self.fail_arm {
            return Err(TimerError::Exhausted);
        }
        self.armed.retain(|(k, _)| *k != key);
        self.armed.push((key, duration_ms));
        Ok(())
    }

    fn disarm(&mut self, key: TimerKey) {
        self.armed.retain(|(k, _)| *k != key);
    }

    fn is_active(&self, key: TimerKey) -> bool {
        self.armed.iter().any(|(k, _)| *k == key)
    }
}

#[derive(Default)]
struct MockSink {
    published: Vec<(ElementId, StatusMessage)>,
}

impl PublishSink for MockSink {
    fn publish(&mut self, element: ElementId, status: &StatusMessage) {
        self.published.push((element, *status));
    }
}

#[derive(Default)]
struct MockStore {
    entries: HashMap<String, Vec<u8>>,
}

impl StoragePort for MockStore {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.entries.get(&format!("{ns}::{key}")) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.entries.insert(format!("{ns}::{key}"), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.entries.remove(&format!("{ns}::{key}"));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.entries.contains_key(&format!("{ns}::{key}"))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn element() -> ElementServer {
    ElementServer::new(ElementId(0), &NodeConfig::default())
}

fn level_set_payload(level: i16, tid: u8, tt: u8, delay: u8) -> Vec<u8> {
    let mut p = level.to_le_bytes().to_vec();
    p.extend_from_slice(&[tid, tt, delay]);
    p
}

fn level_status(msg: StatusMessage) -> (i16, Option<(i16, u8)>) {
    match msg {
        StatusMessage::Level(s) => (s.present, s.transition),
        other => panic!("expected Level status, got {other:?}"),
    }
}

fn onoff_status(msg: StatusMessage) -> (u8, Option<(u8, u8)>) {
    match msg {
        StatusMessage::OnOff(s) => (s.present, s.transition),
        other => panic!("expected OnOff status, got {other:?}"),
    }
}

/// Put the element's Level at `level` via an instantaneous Set.
fn prime_level(
    el: &mut ElementServer,
    level: i16,
    tid: u8,
    now: i64,
    timer: &mut MockTimer,
    sink: &mut MockSink,
) {
    el.recv_level_set(CTX, &level_set_payload(level, tid, 0x00, 0), now, timer, sink)
        .unwrap();
    sink.published.clear();
}

// ── Scenarios ─────────────────────────────────────────────────

#[test]
fn onoff_set_with_zero_steps_is_synchronous() {
    let mut el = element();
    let (mut timer, mut sink, mut store) =
        (MockTimer::default(), MockSink::default(), MockStore::default());

    let reply = el
        .recv_onoff_set(CTX, &[0x01, 0x01, 0x00, 0x00], 1_000, &mut timer, &mut sink, &mut store)
        .unwrap()
        .unwrap();

    let (present, transition) = onoff_status(reply);
    assert_eq!(present, 1);
    assert!(transition.is_none(), "no target/remaining fields after an instant set");

    assert_eq!(sink.published.len(), 1, "exactly one publish");
    let (pub_present, pub_transition) = onoff_status(sink.published[0].1);
    assert_eq!(pub_present, 1);
    assert!(pub_transition.is_none());
    assert!(timer.armed.is_empty());
}

#[test]
fn level_transition_runs_five_hops_and_publishes_once() {
    let mut el = element();
    let (mut timer, mut sink) = (MockTimer::default(), MockSink::default());
    prime_level(&mut el, 1_000, 1, 0, &mut timer, &mut sink);

    // 5 steps × 100 ms toward 2000.
    let mut now = 10_000i64;
    let reply = el
        .recv_level_set(CTX, &level_set_payload(2_000, 2, 0x05, 0), now, &mut timer, &mut sink)
        .unwrap()
        .unwrap();
    let (present, transition) = level_status(reply);
    assert_eq!(present, 1_000);
    assert_eq!(transition, Some((2_000, 0x05)));
    assert_eq!(timer.armed_duration(TimerRole::LevelStep), Some(100));

    let expected = [1_200, 1_400, 1_600, 1_800, 2_000];
    let start = now;
    for value in expected {
        now += 100;
        timer.expire(TimerRole::LevelStep);
        el.on_timer_fired(TimerRole::LevelStep, now, &mut timer, &mut sink)
            .unwrap();
        let (present, _) = level_status(el.recv_level_get(now));
        assert_eq!(present, value);
    }

    assert!(now - start >= 500, "five hops take at least 500 ms");
    assert_eq!(sink.published.len(), 1, "publish fires exactly once, on the 5th hop");
    let (pub_present, pub_transition) = level_status(sink.published[0].1);
    assert_eq!(pub_present, 2_000);
    assert!(pub_transition.is_none());
    assert!(timer.armed.is_empty(), "no timer survives completion");
}

#[test]
fn get_during_transition_reports_target_and_remaining() {
    let mut el = element();
    let (mut timer, mut sink) = (MockTimer::default(), MockSink::default());
    prime_level(&mut el, 0, 1, 0, &mut timer, &mut sink);

    // 10 × 1 s.
    let now = 5_000i64;
    el.recv_level_set(CTX, &level_set_payload(10_000, 2, 0x4A, 0), now, &mut timer, &mut sink)
        .unwrap();

    // 3.4 s in: 6.6 s remain → 6 × 1 s band.
    let (present, transition) = level_status(el.recv_level_get(now + 3_400));
    assert_eq!(present, 0, "no hop has fired yet");
    assert_eq!(transition, Some((10_000, 0x46)));
}

#[test]
fn dedup_window_absorbs_and_then_expires() {
    let mut el = element();
    let (mut timer, mut sink) = (MockTimer::default(), MockSink::default());

    // First Set applies.
    el.recv_level_set(CTX, &level_set_payload(100, 9, 0x00, 0), 1_000, &mut timer, &mut sink)
        .unwrap();
    assert_eq!(level_status(el.recv_level_get(1_000)).0, 100);
    sink.published.clear();

    // Same (tid, src, dst) 3 s later with a different value: retransmission.
    el.recv_level_set(CTX, &level_set_payload(200, 9, 0x00, 0), 4_000, &mut timer, &mut sink)
        .unwrap();
    assert_eq!(
        level_status(el.recv_level_get(4_000)).0,
        100,
        "a Set inside the window is a no-op"
    );
    assert!(sink.published.is_empty());

    // Same triple 7 s after the first: the window has expired.
    el.recv_level_set(CTX, &level_set_payload(200, 9, 0x00, 0), 8_000, &mut timer, &mut sink)
        .unwrap();
    assert_eq!(level_status(el.recv_level_get(8_000)).0, 200);
    assert_eq!(sink.published.len(), 1);
}

#[test]
fn retransmission_replies_with_unchanged_status() {
    let mut el = element();
    let (mut timer, mut sink) = (MockTimer::default(), MockSink::default());
    prime_level(&mut el, 500, 1, 0, &mut timer, &mut sink);

    // Second identical Set 3 s later: deduped, but the acked reply still goes out.
    let reply = el
        .recv_level_set(CTX, &level_set_payload(500, 1, 0x00, 0), 3_000, &mut timer, &mut sink)
        .unwrap()
        .unwrap();
    let (present, _) = level_status(reply);
    assert_eq!(present, 500);
    assert!(sink.published.is_empty(), "retransmission publishes nothing");

    // Unacknowledged retransmission is fully silent.
    el.recv_level_set_unack(CTX, &level_set_payload(500, 1, 0x00, 0), 4_000, &mut timer, &mut sink)
        .unwrap();
    assert!(sink.published.is_empty());
}

#[test]
fn delta_underflow_with_negative_delta_resets_to_zero() {
    let mut el = element();
    let (mut timer, mut sink) = (MockTimer::default(), MockSink::default());

    // Working value 100 == engineering -32668.
    prime_level(&mut el, -32_668, 1, 0, &mut timer, &mut sink);

    let mut payload = (-50_000i32).to_le_bytes().to_vec();
    payload.extend_from_slice(&[2, 0x00, 0x00]);
    let reply = el
        .recv_delta_set(CTX, &payload, 1_000, &mut timer, &mut sink)
        .unwrap()
        .unwrap();

    let (present, _) = level_status(reply);
    assert_eq!(present, i16::MIN, "working 0, not range_min");
    assert_eq!(sink.published.len(), 1);
}

#[test]
fn move_set_rate_ticks_toward_range_max() {
    let mut el = element();
    let (mut timer, mut sink) = (MockTimer::default(), MockSink::default());
    prime_level(&mut el, 0, 1, 0, &mut timer, &mut sink);

    // Rate +30000 per 5 s.
    let mut payload = 30_000i16.to_le_bytes().to_vec();
    payload.extend_from_slice(&[2, 0x45, 0x00]);
    let mut now = 10_000i64;
    let reply = el
        .recv_move_set(CTX, &payload, now, &mut timer, &mut sink)
        .unwrap()
        .unwrap();

    let (present, transition) = level_status(reply);
    assert_eq!(present, 0);
    assert_eq!(
        transition,
        Some((i16::MAX, 0x3F)),
        "Move remaining time is always unknown"
    );
    assert_eq!(timer.armed_duration(TimerRole::LevelStep), Some(5_000));

    // Between ticks the present value is stale — no live interpolation.
    let (present, _) = level_status(el.recv_level_get(now + 2_500));
    assert_eq!(present, 0);

    // First rate tick advances by the raw rate.
    now += 5_000;
    timer.expire(TimerRole::LevelStep);
    el.on_timer_fired(TimerRole::LevelStep, now, &mut timer, &mut sink)
        .unwrap();
    let (present, transition) = level_status(el.recv_level_get(now));
    assert_eq!(present, 30_000);
    assert_eq!(transition, Some((i16::MAX, 0x3F)));
    assert!(sink.published.is_empty());
    assert_eq!(
        timer.armed_duration(TimerRole::LevelStep),
        Some(5_000),
        "rate tick re-armed"
    );

    // Second tick saturates at the bound and completes.
    now += 5_000;
    timer.expire(TimerRole::LevelStep);
    el.on_timer_fired(TimerRole::LevelStep, now, &mut timer, &mut sink)
        .unwrap();
    let (present, transition) = level_status(el.recv_level_get(now));
    assert_eq!(present, i16::MAX);
    assert!(transition.is_none());
    assert_eq!(sink.published.len(), 1, "reaching the bound publishes once");
}

#[test]
fn delayed_set_arms_delay_then_transition() {
    let mut el = element();
    let (mut timer, mut sink, mut store) =
        (MockTimer::default(), MockSink::default(), MockStore::default());

    // OnOff → 1, 5 × 100 ms, delay 20 ticks (100 ms).
    let mut now = 1_000i64;
    el.recv_onoff_set(CTX, &[0x01, 0x01, 0x05, 0x14], now, &mut timer, &mut sink, &mut store)
        .unwrap();

    assert_eq!(timer.armed_duration(TimerRole::Delay), Some(100));
    assert_eq!(timer.armed_duration(TimerRole::OnOffOn), None);
    let (present, _) = onoff_status(el.recv_onoff_get(now));
    assert_eq!(present, 1, "off→on in flight already reads as On");

    now += 100;
    timer.expire(TimerRole::Delay);
    el.on_timer_fired(TimerRole::Delay, now, &mut timer, &mut sink)
        .unwrap();
    assert_eq!(timer.armed_duration(TimerRole::OnOffOn), Some(500));
    assert!(sink.published.is_empty());

    now += 500;
    timer.expire(TimerRole::OnOffOn);
    el.on_timer_fired(TimerRole::OnOffOn, now, &mut timer, &mut sink)
        .unwrap();
    assert_eq!(sink.published.len(), 1);
}

#[test]
fn timer_exhaustion_is_recoverable() {
    let mut el = element();
    let (mut timer, mut sink) = (MockTimer::default(), MockSink::default());
    prime_level(&mut el, 0, 1, 0, &mut timer, &mut sink);

    timer.fail_arm = true;
    let payload = level_set_payload(1_000, 2, 0x05, 0);
    assert!(
        el.recv_level_set(CTX, &payload, 1_000, &mut timer, &mut sink)
            .is_err()
    );

    // No partial mutation: state and dedup are untouched...
    let (present, transition) = level_status(el.recv_level_get(1_000));
    assert_eq!(present, 0);
    assert!(transition.is_none());

    // ...so the very same message (same TID) can be retried successfully.
    timer.fail_arm = false;
    let reply = el
        .recv_level_set(CTX, &payload, 1_500, &mut timer, &mut sink)
        .unwrap()
        .unwrap();
    let (_, transition) = level_status(reply);
    assert_eq!(transition, Some((1_000, 0x05)));
}

#[test]
fn node_restores_every_element_and_routes_fires() {
    let config = NodeConfig {
        element_count: 2,
        ..NodeConfig::default()
    };
    let mut node = Node::new(&config).unwrap();
    let (mut timer, mut sink, mut store) =
        (MockTimer::default(), MockSink::default(), MockStore::default());

    // Element 1: OnPowerUp = On with a 5 s default transition.
    let el1 = node.element_mut(ElementId(1)).unwrap();
    el1.recv_on_power_up_set(&[0x01], &mut sink, &mut store);
    el1.recv_default_trans_time_set(&[0x45], &mut sink, &mut store);
    sink.published.clear();

    let mut fresh = Node::new(&config).unwrap();
    fresh.restore(&store, &mut timer, 0);

    assert_eq!(timer.armed.len(), 1);
    let key = timer.armed[0].0;
    assert_eq!(key.element, ElementId(1));

    timer.expire(key.role);
    fresh.on_timer_fired(key, 5_000, &mut timer, &mut sink).unwrap();
    assert_eq!(sink.published.len(), 1);
    assert_eq!(sink.published[0].0, ElementId(1));
    let (present, transition) = onoff_status(sink.published[0].1);
    assert_eq!(present, 1);
    assert!(transition.is_none());
}
