//! Fuzz target: Set-message payload parsing.
//!
//! Drives arbitrary byte sequences through every element server handler and
//! asserts that nothing panics and that the engine never ends up with a
//! working value outside the clamp range.
//!
//! cargo fuzz run fuzz_set_payloads

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshlight::app::messages::{MsgCtx, StatusMessage};
use meshlight::app::ports::{
    ElementId, PublishSink, StorageError, StoragePort, TimerError, TimerKey, TimerPort,
};
use meshlight::config::NodeConfig;
use meshlight::server::ElementServer;

struct NullTimer;
impl TimerPort for NullTimer {
    fn arm(&mut self, _: TimerKey, _: u32, _: bool) -> Result<(), TimerError> {
        Ok(())
    }
    fn disarm(&mut self, _: TimerKey) {}
    fn is_active(&self, _: TimerKey) -> bool {
        false
    }
}

struct NullSink;
impl PublishSink for NullSink {
    fn publish(&mut self, _: ElementId, _: &StatusMessage) {}
}

struct NullStore;
impl StoragePort for NullStore {
    fn read(&self, _: &str, _: &str, _: &mut [u8]) -> Result<usize, StorageError> {
        Err(StorageError::NotFound)
    }
    fn write(&mut self, _: &str, _: &str, _: &[u8]) -> Result<(), StorageError> {
        Ok(())
    }
    fn delete(&mut self, _: &str, _: &str) -> Result<(), StorageError> {
        Ok(())
    }
    fn exists(&self, _: &str, _: &str) -> bool {
        false
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((selector, payload)) = data.split_first() else {
        return;
    };

    let ctx = MsgCtx { src: 0x0101, dst: 0xC000 };
    let mut el = ElementServer::new(ElementId(0), &NodeConfig::default());
    let (mut timer, mut sink, mut store) = (NullTimer, NullSink, NullStore);

    let _ = match selector % 6 {
        0 => el.recv_onoff_set(ctx, payload, 1_000, &mut timer, &mut sink, &mut store),
        1 => el.recv_level_set(ctx, payload, 1_000, &mut timer, &mut sink),
        2 => el.recv_delta_set(ctx, payload, 1_000, &mut timer, &mut sink),
        3 => el.recv_move_set(ctx, payload, 1_000, &mut timer, &mut sink),
        4 => Ok(el.recv_default_trans_time_set(payload, &mut sink, &mut store)),
        _ => Ok(el.recv_on_power_up_set(payload, &mut sink, &mut store)),
    };

    // Reads must stay panic-free whatever the handlers did.
    let _ = el.recv_onoff_get(2_000);
    let _ = el.recv_level_get(2_000);
    let _ = el.recv_default_trans_time_get();
    let _ = el.recv_on_power_up_get();
    let _ = el.recv_battery_get();
});
