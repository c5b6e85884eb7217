//! Integration tests for connect and publish execution
//!
//! Tests the executor against the mock session:
//! - Connect verdict comes from live session state, not the CONNACK
//! - Exactly one report line per connect and per publish
//! - Concise vs debug rendering of publish outcomes

use mqtt_cli::command::{ConnectCommand, PublishCommand, Qos};
use mqtt_cli::executor::console::Console;
use mqtt_cli::executor::MqttClientExecutor;
use mqtt_cli::shutdown::ShutdownHooks;
use mqtt_cli::testing::{LogCapture, MockSession, SharedBuffer};
use mqtt_cli::transport::{MqttError, Session};
use std::sync::Arc;

fn test_executor() -> MqttClientExecutor {
    MqttClientExecutor::new(
        Console::new(SharedBuffer::default()),
        Arc::new(ShutdownHooks::new()),
    )
}

fn publish_command(message: &str, debug: bool) -> PublishCommand {
    PublishCommand {
        debug,
        message: message.to_string(),
        retain: false,
    }
}

#[tokio::test]
async fn test_connect_returns_true_when_session_connected() {
    // Arrange
    let capture = LogCapture::start();
    let executor = test_executor();
    let mut session = MockSession::new();
    let command = ConnectCommand::default();

    // Act
    let connected = executor.connect(&mut session, &(), &command).await.unwrap();

    // Assert
    assert!(connected);
    assert_eq!(capture.count("Client connect with"), 1);
    assert_eq!(capture.count("Client connect with Success"), 1);
}

#[tokio::test]
async fn test_connect_verdict_ignores_successful_connack() {
    // Arrange: CONNACK says Success but the transport ends up disconnected
    let _capture = LogCapture::start();
    let executor = test_executor();
    let mut session = MockSession::new()
        .with_reason_code("Success")
        .disconnected_after_connect();

    // Act
    let connected = executor
        .connect(&mut session, &(), &ConnectCommand::default())
        .await
        .unwrap();

    // Assert
    assert!(!connected);
    assert_eq!(session.connect_calls(), 1);
}

#[tokio::test]
async fn test_connect_debug_reports_descriptor_only() {
    let capture = LogCapture::start();
    let executor = test_executor();
    let mut session = MockSession::new().with_reason_code("Success");
    let command = ConnectCommand {
        identifier: "debug-client".to_string(),
        password: Some("secret".to_string()),
        debug: true,
        ..ConnectCommand::default()
    };

    executor.connect(&mut session, &(), &command).await.unwrap();

    let lines = capture.lines_containing("Client connect with");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("DEBUG"));
    assert!(lines[0].contains("identifier=debug-client"));
    assert!(!lines[0].contains("secret"));
    assert!(!lines[0].contains("Client connect with Success"));
}

#[tokio::test]
async fn test_connect_failure_propagates_without_report() {
    let capture = LogCapture::start();
    let executor = test_executor();
    let mut session = MockSession::new().with_connect_failure("connection refused");

    let result = executor
        .connect(&mut session, &(), &ConnectCommand::default())
        .await;

    assert!(matches!(result, Err(MqttError::ConnectionFailed(_))));
    assert_eq!(capture.count("Client connect with"), 0);
}

#[tokio::test]
async fn test_publish_success_truncates_payload() {
    // Arrange
    let capture = LogCapture::start();
    let executor = test_executor();
    let session = MockSession::new().connected();
    let command = publish_command("Hello, this is a long message", false);

    // Act
    executor
        .publish(&session, &command, "greetings", Qos::AtLeastOnce)
        .await
        .unwrap();

    // Assert
    let lines = capture.lines_containing("Client publish to topic: greetings");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("INFO"));
    assert!(lines[0].contains("message: 'Hello, thi...'"));
    assert!(!lines[0].contains("long message"));
}

#[tokio::test]
async fn test_publish_failure_truncates_payload_and_reports_reason() {
    let capture = LogCapture::start();
    let executor = test_executor();
    let session = MockSession::new()
        .connected()
        .with_publish_failure("network reset");
    let command = publish_command("Hello, this is a long message", false);

    executor
        .publish(&session, &command, "greetings", Qos::AtLeastOnce)
        .await
        .unwrap();

    let lines = capture.lines_containing("Client publish to topic: greetings");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("ERROR"));
    assert!(lines[0].contains("'Hello, thi...'"));
    assert!(lines[0].contains("failed with reason: Connection lost: network reset"));
}

#[tokio::test]
async fn test_publish_debug_reports_full_payload_and_diagnostic() {
    let capture = LogCapture::start();
    let executor = test_executor();
    let session = MockSession::new()
        .connected()
        .with_publish_failure("network reset");
    let command = publish_command("Hello, this is a long message", true);

    executor
        .publish(&session, &command, "greetings", Qos::ExactlyOnce)
        .await
        .unwrap();

    let lines = capture.lines_containing("Client publish to topic: greetings");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("DEBUG"));
    assert!(lines[0].contains("'Hello, this is a long message'"));
    assert!(lines[0].contains("ConnectionLost(\"network reset\")"));
}

#[tokio::test]
async fn test_publish_sends_descriptor_payload_and_retain() {
    let _capture = LogCapture::start();
    let executor = test_executor();
    let session = MockSession::new().connected();
    let command = PublishCommand {
        debug: false,
        message: "on".to_string(),
        retain: true,
    };

    executor
        .publish(&session, &command, "lights/kitchen", Qos::AtLeastOnce)
        .await
        .unwrap();

    let publishes = session.publishes();
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].topic, "lights/kitchen");
    assert_eq!(publishes[0].qos, Qos::AtLeastOnce);
    assert!(publishes[0].retain);
    assert_eq!(&publishes[0].payload[..], b"on");
}

#[tokio::test]
async fn test_each_publish_reported_exactly_once() {
    let capture = LogCapture::start();
    let executor = test_executor();
    let session = MockSession::new().connected();
    let command = publish_command("tick", false);

    let reports: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|topic| executor.publish(&session, &command, topic, Qos::AtMostOnce))
        .collect();
    for report in reports {
        report.await.unwrap();
    }

    for topic in ["a", "b", "c"] {
        assert_eq!(
            capture.count(&format!("Client publish to topic: {topic} message")),
            1
        );
    }
}

#[tokio::test]
async fn test_publish_without_connection_reports_failure() {
    let capture = LogCapture::start();
    let executor = test_executor();
    let session = MockSession::new();

    executor
        .publish(&session, &publish_command("x", false), "t", Qos::AtMostOnce)
        .await
        .unwrap();

    assert!(!session.is_connected());
    assert_eq!(capture.count("failed with reason: Not connected"), 1);
}
