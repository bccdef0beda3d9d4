//! Publish sink that writes status messages to the log.
//!
//! Useful on its own during bring-up, and as the inner sink of a chain that
//! also forwards to the mesh stack's publish path.

use log::info;

use crate::app::messages::StatusMessage;
use crate::app::ports::{ElementId, PublishSink};

/// Logs every published status at info level.
#[derive(Debug, Default)]
pub struct LogPublishSink;

impl PublishSink for LogPublishSink {
    fn publish(&mut self, element: ElementId, status: &StatusMessage) {
        match status {
            StatusMessage::OnOff(s) => info!(
                "el{}: publish OnOff present={} transition={:?}",
                element.0, s.present, s.transition
            ),
            StatusMessage::Level(s) => info!(
                "el{}: publish Level present={} transition={:?}",
                element.0, s.present, s.transition
            ),
            StatusMessage::DefaultTransitionTime(tt) => {
                info!("el{}: publish DefaultTransTime 0x{:02x}", element.0, tt);
            }
            StatusMessage::OnPowerUp(mode) => {
                info!("el{}: publish OnPowerUp {}", element.0, mode);
            }
            StatusMessage::Battery(b) => info!(
                "el{}: publish Battery level={}% flags=0x{:02x}",
                element.0, b.battery_level, b.flags
            ),
        }
    }
}
