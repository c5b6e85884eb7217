//! Observability for the command line client

pub mod logging;

pub use logging::{init_cli_logging, init_logging, LogFormat};
