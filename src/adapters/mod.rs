//! Port adapters.
//!
//! Host-neutral adapters are always available; the ESP-IDF adapters are
//! compiled only with the `espidf` feature so host builds and tests never
//! need the ESP toolchain.

pub mod log_sink;

#[cfg(feature = "espidf")]
pub mod esp_timer;

#[cfg(feature = "espidf")]
pub mod nvs;
