//! ESP-IDF timer adapter.
//!
//! Backs [`TimerPort`] with the `esp_timer` service.  Timer callbacks run in
//! the ESP timer task, not on the main task, so they must never touch the
//! engine directly: each fire pushes its [`TimerKey`] into a channel that the
//! main loop drains and feeds to `Node::on_timer_fired`.  That keeps every
//! model mutation on one logical task, which is the serialization discipline
//! the engine requires.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;

use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};
use log::info;

use crate::app::ports::{TimerError, TimerKey, TimerPort};

/// `TimerPort` over `esp_timer`, one lazily-created timer per key.
pub struct EspTimerPort {
    service: EspTaskTimerService,
    timers: HashMap<TimerKey, EspTimer<'static>>,
    tx: Sender<TimerKey>,
}

impl EspTimerPort {
    /// Create the port and the receiving end of the fire queue.
    ///
    /// The main loop owns the receiver and calls
    /// `Node::on_timer_fired(key, ...)` for every key it drains.
    pub fn new() -> Result<(Self, Receiver<TimerKey>), TimerError> {
        let service =
            EspTaskTimerService::new().map_err(|_| TimerError::Backend("esp_timer service"))?;
        let (tx, rx) = channel();
        info!("esp_timer: timer service ready");
        Ok((
            Self {
                service,
                timers: HashMap::new(),
                tx,
            },
            rx,
        ))
    }

    fn timer_for(&mut self, key: TimerKey) -> Result<&mut EspTimer<'static>, TimerError> {
        match self.timers.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let tx = self.tx.clone();
                let timer = self
                    .service
                    .timer(move || {
                        let _ = tx.send(key);
                    })
                    .map_err(|_| TimerError::Exhausted)?;
                Ok(entry.insert(timer))
            }
        }
    }
}

impl TimerPort for EspTimerPort {
    fn arm(&mut self, key: TimerKey, duration_ms: u32, periodic: bool) -> Result<(), TimerError> {
        let timer = self.timer_for(key)?;
        // Restart semantics: cancel any pending schedule before re-arming.
        let _ = timer.cancel();
        let duration = Duration::from_millis(u64::from(duration_ms));
        let result = if periodic {
            timer.every(duration)
        } else {
            timer.after(duration)
        };
        result.map_err(|_| TimerError::Backend("esp_timer arm"))
    }

    fn disarm(&mut self, key: TimerKey) {
        if let Some(timer) = self.timers.get_mut(&key) {
            let _ = timer.cancel();
        }
    }

    fn is_active(&self, key: TimerKey) -> bool {
        self.timers
            .get(&key)
            .is_some_and(|t| t.is_scheduled().unwrap_or(false))
    }
}
