//! Firmware for an ESP32 liquid flow meter.
//!
//! The pulse counting, integration, reading and OTA protocol modules are plain Rust
//! and are tested on the host. The ESP-IDF glue sits behind the `espidf` feature.

pub mod config;
pub mod flow;
pub mod integrator;
pub mod ota;
pub mod report;
pub mod task;

#[cfg(feature = "espidf")]
pub mod http;
#[cfg(feature = "espidf")]
pub mod net;
#[cfg(feature = "espidf")]
pub mod sampler;
#[cfg(feature = "espidf")]
pub mod storage;
