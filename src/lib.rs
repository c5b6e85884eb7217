//! MQTT command line client
//!
//! The execution layer of an MQTT CLI: connect, subscribe and publish against
//! MQTT 3.1.1 or MQTT 5 brokers, with each asynchronous outcome turned into
//! exactly one report line and received messages optionally echoed to stdout
//! or appended to a file.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_cli::command::{ConnectCommand, PublishCommand, Qos};
//! use mqtt_cli::executor::executor;
//! use mqtt_cli::transport::mqtt::{BrokerAddress, V5Session};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connect = ConnectCommand::default();
//! let mut session = V5Session::new(BrokerAddress::new(&connect.host, connect.port));
//!
//! if executor().connect(&mut session, &connect.v5_request(), &connect).await? {
//!     let publish = PublishCommand {
//!         message: "23.7".to_string(),
//!         ..Default::default()
//!     };
//!     executor()
//!         .publish(&session, &publish, "sensors/temp", Qos::AtLeastOnce)
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod observability;
pub mod shutdown;
pub mod testing;
pub mod transport;

pub use command::{ConnectCommand, ProtocolVersion, PublishCommand, Qos, SubscribeCommand};
pub use config::{CliConfig, ConfigError};
pub use error::CliError;
pub use executor::{executor, MqttClientExecutor};
pub use transport::{MqttError, Session};
