//! MeshLight generic model engine.
//!
//! Implements the Bluetooth-Mesh-style Generic OnOff and Generic Level
//! server state machines (including Delta and Move) for a lighting node:
//! quantized transition times, optional start delays, retransmission
//! suppression, and exactly-once status publication when a transition
//! completes.  The mesh transport, provisioning, and addressing live in the
//! host stack and reach this crate only through the port traits in
//! [`app::ports`].
//!
//! ESP-IDF-specific adapters are gated behind the `espidf` feature; the
//! engine itself is pure logic and tests entirely on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod server;
