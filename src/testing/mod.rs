//! Testing utilities and mock implementations
//!
//! Lets the executor be exercised without an MQTT broker and lets tests assert
//! on the exact lines written to the log and to stdout. [`FakeBroker`] serves
//! the real rumqttc sessions over localhost TCP.

pub mod broker;
pub mod mocks;

pub use broker::{BrokerScript, FakeBroker};
pub use mocks::*;
