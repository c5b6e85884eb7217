//! Pure construction of the user-visible report lines
//!
//! Every outcome of a connect, subscribe, receipt or publish turns into exactly
//! one [`Report`]. Builders here are pure; [`Report::emit`] is the only place a
//! line reaches tracing.

use crate::command::{ConnectCommand, PublishCommand};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::error::Error;
use tracing::{debug, error, info, Level};

/// Characters of payload shown in concise lines
pub const PREVIEW_LEN: usize = 10;

/// Appended to every preview, including short payloads
pub const PREVIEW_MARKER: &str = "...";

/// First [`PREVIEW_LEN`] characters of `text` followed by [`PREVIEW_MARKER`]
pub fn preview(text: &str) -> String {
    let mut shown: String = text.chars().take(PREVIEW_LEN).collect();
    shown.push_str(PREVIEW_MARKER);
    shown
}

/// Render a payload for display: base64 text, or UTF-8 with invalid
/// sequences replaced
pub fn decode_payload(payload: &[u8], base64: bool) -> String {
    if base64 {
        STANDARD.encode(payload)
    } else {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// Line written to the output file for one received message
pub fn file_line(topic: &str, decoded_payload: &str) -> String {
    format!("{topic}: {decoded_payload}")
}

/// Full diagnostic of an error: its debug form followed by the source chain
pub fn diagnostic(err: &(dyn Error + 'static)) -> String {
    let mut rendered = format!("{err:?}");
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\n    caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// One line for the log stream
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub level: Level,
    pub message: String,
}

impl Report {
    pub fn debug(message: String) -> Self {
        Self {
            level: Level::DEBUG,
            message,
        }
    }

    pub fn info(message: String) -> Self {
        Self {
            level: Level::INFO,
            message,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            level: Level::ERROR,
            message,
        }
    }

    pub fn emit(&self) {
        if self.level == Level::ERROR {
            error!("{}", self.message);
        } else if self.level >= Level::DEBUG {
            debug!("{}", self.message);
        } else {
            info!("{}", self.message);
        }
    }
}

/// Connect: the full descriptor under debug, the reason code otherwise
pub fn connect_report(command: &ConnectCommand, reason_code: &str) -> Report {
    if command.debug {
        Report::debug(format!("Client connect with {command}"))
    } else {
        Report::info(format!("Client connect with {reason_code}"))
    }
}

pub fn subscribe_report(
    filter: &str,
    debug: bool,
    outcome: Result<(), &(dyn Error + 'static)>,
) -> Report {
    match outcome {
        Ok(()) => Report::info(format!("Client subscribed to Topic: {filter}")),
        Err(err) if debug => Report::debug(format!(
            "Client subscribe to Topic: {filter} failed with reason: {}",
            diagnostic(err)
        )),
        Err(err) => Report::error(format!(
            "Client subscribe to Topic: {filter} failed with reason: {err}"
        )),
    }
}

pub fn received_report(topic: &str, decoded_payload: &str, debug: bool) -> Report {
    if debug {
        Report::debug(format!(
            "Client received on topic: {topic} message: '{decoded_payload}'"
        ))
    } else {
        Report::info(format!(
            "Client received on topic: {topic} msg: '{}'",
            preview(decoded_payload)
        ))
    }
}

/// Publish outcome. The payload shown always comes from the descriptor.
pub fn publish_report(
    topic: &str,
    command: &PublishCommand,
    outcome: Result<(), &(dyn Error + 'static)>,
) -> Report {
    let message = &command.message;
    match outcome {
        Ok(()) if command.debug => Report::debug(format!(
            "Client publish to topic: {topic} message: '{message}'"
        )),
        Ok(()) => Report::info(format!(
            "Client publish to topic: {topic} message: '{}'",
            preview(message)
        )),
        Err(err) if command.debug => Report::debug(format!(
            "Client publish to topic: {topic} message: '{message}' failed with reason: {}",
            diagnostic(err)
        )),
        Err(err) => Report::error(format!(
            "Client publish to topic: {topic} message: '{}' failed with reason: {err}",
            preview(message)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MqttError;
    use proptest::prelude::*;

    fn publish_command(message: &str, debug: bool) -> PublishCommand {
        PublishCommand {
            debug,
            message: message.to_string(),
            retain: false,
        }
    }

    #[test]
    fn test_preview_truncates_long_text() {
        assert_eq!(preview("Hello, this is a long message"), "Hello, thi...");
    }

    #[test]
    fn test_preview_keeps_marker_for_short_text() {
        assert_eq!(preview("23.7"), "23.7...");
        assert_eq!(preview(""), "...");
        assert_eq!(preview("0123456789"), "0123456789...");
    }

    #[test]
    fn test_preview_counts_characters_not_bytes() {
        assert_eq!(preview("température élevée"), "températur...");
        assert_eq!(preview("🌡️🌡️🌡️🌡️🌡️🌡️"), format!("{}...", "🌡️".repeat(5)));
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload(b"23.7", false), "23.7");
        assert_eq!(decode_payload(&[0xde, 0xad, 0xbe, 0xef], true), "3q2+7w==");
        assert_eq!(decode_payload(&[0x66, 0xff, 0x6f], false), "f\u{fffd}o");
    }

    #[test]
    fn test_file_line() {
        assert_eq!(file_line("sensors/temp", "23.7"), "sensors/temp: 23.7");
    }

    #[test]
    fn test_connect_report_by_debug_flag() {
        let mut command = ConnectCommand {
            identifier: "reader".to_string(),
            ..ConnectCommand::default()
        };

        let concise = connect_report(&command, "Success");
        assert_eq!(concise, Report::info("Client connect with Success".to_string()));

        command.debug = true;
        let verbose = connect_report(&command, "Success");
        assert_eq!(verbose.level, Level::DEBUG);
        assert!(verbose.message.starts_with("Client connect with ConnectCommand{"));
        assert!(verbose.message.contains("identifier=reader"));
        assert!(!verbose.message.contains("Success"));
    }

    #[test]
    fn test_subscribe_report_success_is_info_even_in_debug() {
        let report = subscribe_report("sensors/#", true, Ok(()));
        assert_eq!(
            report,
            Report::info("Client subscribed to Topic: sensors/#".to_string())
        );
    }

    #[test]
    fn test_subscribe_report_failure() {
        let err = MqttError::Rejected("NotAuthorized".to_string());

        let concise = subscribe_report("secret/#", false, Err(&err));
        assert_eq!(concise.level, Level::ERROR);
        assert_eq!(
            concise.message,
            "Client subscribe to Topic: secret/# failed with reason: Broker rejected request: NotAuthorized"
        );

        let verbose = subscribe_report("secret/#", true, Err(&err));
        assert_eq!(verbose.level, Level::DEBUG);
        assert!(verbose.message.contains("Rejected(\"NotAuthorized\")"));
    }

    #[test]
    fn test_received_report() {
        let concise = received_report("sensors/temp", "23.7", false);
        assert_eq!(
            concise,
            Report::info("Client received on topic: sensors/temp msg: '23.7...'".to_string())
        );

        let long = "a payload that is long enough to be cut";
        let verbose = received_report("sensors/temp", long, true);
        assert_eq!(verbose.level, Level::DEBUG);
        assert!(verbose.message.contains(long));
    }

    #[test]
    fn test_publish_report_truncates_in_both_branches() {
        let command = publish_command("Hello, this is a long message", false);
        let err = MqttError::ConnectionLost("network reset".to_string());

        let success = publish_report("greetings", &command, Ok(()));
        let failure = publish_report("greetings", &command, Err(&err));

        assert_eq!(
            success,
            Report::info("Client publish to topic: greetings message: 'Hello, thi...'".to_string())
        );
        assert_eq!(failure.level, Level::ERROR);
        assert!(failure.message.contains("'Hello, thi...'"));
        assert!(failure.message.ends_with("failed with reason: Connection lost: network reset"));
        assert!(!failure.message.contains("long message"));
    }

    #[test]
    fn test_publish_report_debug_shows_full_payload() {
        let command = publish_command("Hello, this is a long message", true);
        let report = publish_report("greetings", &command, Ok(()));
        assert_eq!(
            report,
            Report::debug(
                "Client publish to topic: greetings message: 'Hello, this is a long message'"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_diagnostic_includes_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused by peer");
        let err = MqttError::ConnectionFailed(Box::new(io));

        let rendered = diagnostic(&err);

        assert!(rendered.starts_with("ConnectionFailed("));
        assert!(rendered.contains("caused by: refused by peer"));
    }

    proptest! {
        #[test]
        fn base64_rendering_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let rendered = decode_payload(&payload, true);
            let decoded = STANDARD.decode(rendered.as_bytes()).unwrap();
            prop_assert_eq!(decoded, payload);
        }

        #[test]
        fn preview_is_prefix_plus_marker(text in "\\PC{0,40}") {
            let shown = preview(&text);
            let prefix: String = text.chars().take(PREVIEW_LEN).collect();
            prop_assert_eq!(shown, format!("{prefix}{PREVIEW_MARKER}"));
        }

        #[test]
        fn short_payloads_appear_in_full(text in "\\PC{0,10}") {
            let report = received_report("t", &text, false);
            let expected = format!("'{text}...'");
            prop_assert!(report.message.ends_with(&expected));
        }
    }
}
