//! Execution of connect, subscribe and publish commands
//!
//! [`MqttClientExecutor`] is written once against [`Session`] and serves both
//! protocol generations. Connect blocks the calling task; subscribe and publish
//! return immediately and report their outcome from a spawned task, exactly
//! once per call.

pub mod console;
pub mod file_sink;
pub mod report;

use crate::command::{ConnectCommand, PublishCommand, Qos, SubscribeCommand};
use crate::shutdown::{shutdown_hooks, ShutdownHooks};
use crate::transport::{InboundMessage, MessageHandler, MqttError, ReasonCode, Session};
use console::Console;
use file_sink::FileSink;
use once_cell::sync::Lazy;
use std::error::Error;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

static EXECUTOR: Lazy<MqttClientExecutor> =
    Lazy::new(|| MqttClientExecutor::new(Console::stdout(), shutdown_hooks()));

/// Get the process-wide executor
pub fn executor() -> &'static MqttClientExecutor {
    &EXECUTOR
}

fn report_outcome<T>(outcome: &Result<T, MqttError>) -> Result<(), &(dyn Error + 'static)> {
    match outcome {
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Debug)]
pub struct MqttClientExecutor {
    console: Console,
    hooks: Arc<ShutdownHooks>,
}

impl MqttClientExecutor {
    pub fn new(console: Console, hooks: Arc<ShutdownHooks>) -> Self {
        Self { console, hooks }
    }

    /// Connect and return the session's live connection state afterwards.
    ///
    /// Connect errors are returned unreported for the caller to handle.
    pub async fn connect<S: Session>(
        &self,
        session: &mut S,
        request: &S::ConnectRequest,
        command: &ConnectCommand,
    ) -> Result<bool, MqttError> {
        let connack = session.connect(request).await?;
        report::connect_report(command, &connack.reason_code()).emit();
        Ok(session.is_connected())
    }

    /// Subscribe to `filter`. The returned task reports the SUBACK outcome.
    pub fn subscribe<S: Session>(
        &self,
        session: &S,
        command: &SubscribeCommand,
        filter: &str,
        qos: Qos,
    ) -> JoinHandle<()> {
        let sink = command.output_file.as_deref().and_then(|path| {
            match FileSink::open(path) {
                Ok(sink) => Some(Arc::new(sink)),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        "Could not open output file, received messages will not be written to it: {}",
                        e
                    );
                    None
                }
            }
        });

        let hook_sink = sink.clone();
        self.hooks.register(move || {
            if let Some(sink) = hook_sink {
                sink.close();
            }
        });

        let handler = self.message_handler(command, sink);
        let pending = session.subscribe(filter, qos, handler);

        let filter = filter.to_string();
        let debug = command.debug;
        tokio::spawn(async move {
            let outcome = pending.resolve().await;
            report::subscribe_report(&filter, debug, report_outcome(&outcome)).emit();
        })
    }

    /// Publish the descriptor's message to `topic`. The returned task reports
    /// the completion outcome.
    pub fn publish<S: Session>(
        &self,
        session: &S,
        command: &PublishCommand,
        topic: &str,
        qos: Qos,
    ) -> JoinHandle<()> {
        let pending = session.publish(topic, qos, command.retain, command.payload());

        let command = command.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let outcome = pending.resolve().await;
            report::publish_report(&topic, &command, report_outcome(&outcome)).emit();
        })
    }

    fn message_handler(
        &self,
        command: &SubscribeCommand,
        sink: Option<Arc<FileSink>>,
    ) -> MessageHandler {
        let console = self.console.clone();
        let base64 = command.base64;
        let print_to_stdout = command.print_to_stdout;
        let debug = command.debug;

        Arc::new(move |message: &InboundMessage| {
            let decoded = report::decode_payload(&message.payload, base64);

            if let Some(sink) = &sink {
                sink.append_line(&report::file_line(&message.topic, &decoded));
            }
            if print_to_stdout {
                console.println(&decoded);
            }
            report::received_report(&message.topic, &decoded, debug).emit();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_outcome_drops_success_value() {
        let ok: Result<u16, MqttError> = Ok(7);
        assert!(report_outcome(&ok).is_ok());

        let err: Result<u16, MqttError> = Err(MqttError::OutcomeDropped);
        let reported = report_outcome(&err).unwrap_err();
        assert_eq!(
            reported.to_string(),
            "Operation outcome was dropped before it resolved"
        );
    }

    #[test]
    fn test_global_executor_is_shared() {
        assert!(std::ptr::eq(executor(), executor()));
    }
}
