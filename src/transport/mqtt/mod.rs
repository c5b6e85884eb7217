//! rumqttc-backed MQTT sessions
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Connection state, errors and option building
//! - [`message_handler`] - Pure routing of event loop events
//! - [`inflight`] - Correlation of requests with acknowledgements
//! - [`session`] - State shared by a session and its event loop task
//! - [`protocol`] - The points where rumqttc's 3.1.1 and 5 APIs differ
//! - [`client`] - Impure I/O: one session type driving either generation
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_cli::transport::mqtt::{BrokerAddress, V5ConnectRequest, V5Session};
//! use mqtt_cli::transport::Session;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = V5Session::new(BrokerAddress::parse("mqtt://localhost:1883")?);
//! let request = V5ConnectRequest {
//!     client_id: "sensor-reader".to_string(),
//!     keep_alive: Duration::from_secs(60),
//!     clean_start: true,
//!     credentials: None,
//! };
//! session.connect(&request).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod inflight;
pub mod message_handler;
pub mod protocol;
pub mod session;

pub use client::{RumqttcSession, V3Session, V5Session, DEFAULT_CONNECT_TIMEOUT};
pub use connection::{
    BrokerAddress, ConnectionState, Credentials, MqttError, V3ConnectRequest, V5ConnectRequest,
};
pub use message_handler::{EventRoute, EventRouter};
pub use protocol::{PollFailure, Protocol, Rejection, V3, V5};
