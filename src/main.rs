//! mqtt-cli - Main Entry Point
//!
//! Parses the command line, merges it with the optional defaults file and
//! drives one subscribe or publish run through the executor.

use clap::{Args, Parser, Subcommand};
use mqtt_cli::command::{
    generate_client_id, pair_topics_with_qos, ConnectCommand, ProtocolVersion, PublishCommand,
    Qos, SubscribeCommand,
};
use mqtt_cli::config::CliConfig;
use mqtt_cli::error::CliError;
use mqtt_cli::executor::executor;
use mqtt_cli::observability::init_cli_logging;
use mqtt_cli::shutdown::{shutdown_hooks, wait_for_termination};
use mqtt_cli::transport::mqtt::{BrokerAddress, V3Session, V5Session};
use mqtt_cli::transport::Session;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{debug, error, warn};

/// MQTT command line client
#[derive(Parser)]
#[command(name = "mqtt-cli")]
#[command(about = "Publish and subscribe to MQTT 3.1.1 and MQTT 5 brokers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to topics and report received messages until terminated
    Sub {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Topic filter to subscribe to
        #[arg(short, long = "topic", required = true)]
        topics: Vec<String>,

        /// QoS level, once for all topics or once per topic
        #[arg(short, long)]
        qos: Vec<Qos>,

        /// Append received messages to this file
        #[arg(long, visible_alias = "of", value_name = "FILE")]
        output_file: Option<PathBuf>,

        /// Print received payloads to stdout
        #[arg(short = 's', long = "stdout")]
        stdout: bool,

        /// Show payloads base64 encoded
        #[arg(long, visible_alias = "b64")]
        base64: bool,
    },
    /// Publish a message to topics
    Pub {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Topic to publish to
        #[arg(short, long = "topic", required = true)]
        topics: Vec<String>,

        /// Message payload
        #[arg(short, long)]
        message: String,

        /// QoS level, once for all topics or once per topic
        #[arg(short, long)]
        qos: Vec<Qos>,

        /// Ask the broker to retain the message
        #[arg(short, long)]
        retain: bool,
    },
}

impl Commands {
    fn connection(&self) -> &ConnectionArgs {
        match self {
            Commands::Sub { connection, .. } | Commands::Pub { connection, .. } => connection,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ConnectionArgs {
    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(short, long)]
    port: Option<u16>,

    /// MQTT version, 3 or 5
    #[arg(short = 'V', long = "mqtt-version", value_parser = parse_version)]
    mqtt_version: Option<ProtocolVersion>,

    /// Client identifier, generated when absent
    #[arg(short, long)]
    identifier: Option<String>,

    /// Username
    #[arg(short, long)]
    user: Option<String>,

    /// Password
    #[arg(short = 'P', long, env = "MQTT_CLI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(short, long = "keep-alive", value_name = "SECS")]
    keep_alive: Option<u16>,

    /// Resume the broker-side session instead of starting a clean one
    #[arg(long)]
    no_clean_start: bool,

    /// Verbose reporting
    #[arg(short, long)]
    debug: bool,
}

fn parse_version(s: &str) -> Result<ProtocolVersion, String> {
    s.parse::<u8>()
        .ok()
        .and_then(ProtocolVersion::from_number)
        .ok_or_else(|| format!("invalid MQTT version '{s}', expected 3 or 5"))
}

/// Merge command line options over the configuration file
fn build_connect(
    args: &ConnectionArgs,
    config: &CliConfig,
) -> Result<(ConnectCommand, BrokerAddress), CliError> {
    let mut broker = config.broker_address()?;
    if let Some(host) = &args.host {
        broker.host = host.clone();
    }
    if let Some(port) = args.port {
        broker.port = port;
    }

    let command = ConnectCommand {
        host: broker.host.clone(),
        port: broker.port,
        version: args
            .mqtt_version
            .unwrap_or_else(|| config.protocol_version()),
        identifier: args.identifier.clone().unwrap_or_else(generate_client_id),
        user: args.user.clone().or_else(|| config.username()),
        password: args.password.clone().or_else(|| config.password()),
        keep_alive_secs: args
            .keep_alive
            .map(u64::from)
            .unwrap_or(config.broker.keep_alive_secs),
        clean_start: !args.no_clean_start,
        debug: args.debug,
    };
    Ok((command, broker))
}

/// Connect, subscribe to every topic and wait for a termination signal
async fn run_subscribe<S: Session>(
    mut session: S,
    request: S::ConnectRequest,
    connect: &ConnectCommand,
    subscribe: &SubscribeCommand,
    topics: &[(String, Qos)],
) -> Result<(), CliError> {
    let executor = executor();
    if !executor.connect(&mut session, &request, connect).await? {
        return Err(CliError::NotConnected);
    }

    let _subscriptions: Vec<_> = topics
        .iter()
        .map(|(topic, qos)| executor.subscribe(&session, subscribe, topic, *qos))
        .collect();

    let terminated = wait_for_termination().await;
    shutdown_hooks().run();
    session.disconnect().await?;

    let signal = terminated?;
    debug!(signal, "Subscriber stopped");
    Ok(())
}

/// Connect, publish to every topic and wait for each outcome report
async fn run_publish<S: Session>(
    mut session: S,
    request: S::ConnectRequest,
    connect: &ConnectCommand,
    publish: &PublishCommand,
    topics: &[(String, Qos)],
) -> Result<(), CliError> {
    let executor = executor();
    if !executor.connect(&mut session, &request, connect).await? {
        return Err(CliError::NotConnected);
    }

    let reports: Vec<_> = topics
        .iter()
        .map(|(topic, qos)| executor.publish(&session, publish, topic, *qos))
        .collect();
    for report in reports {
        if let Err(e) = report.await {
            warn!("Publish report task failed: {}", e);
        }
    }

    session.disconnect().await?;
    shutdown_hooks().run();
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let connect_timeout = Duration::from_secs(config.broker.connect_timeout_secs);
    let (connect, broker) = build_connect(cli.command.connection(), &config)?;

    match cli.command {
        Commands::Sub {
            topics,
            qos,
            output_file,
            stdout,
            base64,
            ..
        } => {
            let topics = pair_topics_with_qos(&topics, &qos)?;
            let subscribe = SubscribeCommand {
                debug: connect.debug,
                print_to_stdout: stdout,
                base64,
                output_file,
            };

            match connect.version {
                ProtocolVersion::V3 => {
                    let session = V3Session::new(broker).with_connect_timeout(connect_timeout);
                    run_subscribe(session, connect.v3_request(), &connect, &subscribe, &topics)
                        .await
                }
                ProtocolVersion::V5 => {
                    let session = V5Session::new(broker).with_connect_timeout(connect_timeout);
                    run_subscribe(session, connect.v5_request(), &connect, &subscribe, &topics)
                        .await
                }
            }
        }
        Commands::Pub {
            topics,
            message,
            qos,
            retain,
            ..
        } => {
            let topics = pair_topics_with_qos(&topics, &qos)?;
            let publish = PublishCommand {
                debug: connect.debug,
                message,
                retain,
            };

            match connect.version {
                ProtocolVersion::V3 => {
                    let session = V3Session::new(broker).with_connect_timeout(connect_timeout);
                    run_publish(session, connect.v3_request(), &connect, &publish, &topics).await
                }
                ProtocolVersion::V5 => {
                    let session = V5Session::new(broker).with_connect_timeout(connect_timeout);
                    run_publish(session, connect.v5_request(), &connect, &publish, &topics).await
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_cli_logging(cli.command.connection().debug);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subscribe() {
        let cli = parse(&[
            "mqtt-cli", "sub", "-t", "sensors/#", "-t", "alerts", "-q", "1", "--of", "out.log",
            "-s", "--b64", "-V", "3",
        ]);

        match cli.command {
            Commands::Sub {
                connection,
                topics,
                qos,
                output_file,
                stdout,
                base64,
            } => {
                assert_eq!(topics, vec!["sensors/#", "alerts"]);
                assert_eq!(qos, vec![Qos::AtLeastOnce]);
                assert_eq!(output_file, Some(PathBuf::from("out.log")));
                assert!(stdout);
                assert!(base64);
                assert_eq!(connection.mqtt_version, Some(ProtocolVersion::V3));
            }
            Commands::Pub { .. } => panic!("expected sub command"),
        }
    }

    #[test]
    fn test_parse_publish() {
        let cli = parse(&[
            "mqtt-cli", "pub", "-t", "greetings", "-m", "hello", "-r", "-q", "2", "--host",
            "broker.local", "-p", "1884", "-d",
        ]);

        let connection = cli.command.connection().clone();
        assert_eq!(connection.host.as_deref(), Some("broker.local"));
        assert_eq!(connection.port, Some(1884));
        assert!(connection.debug);
        match cli.command {
            Commands::Pub {
                message, retain, qos, ..
            } => {
                assert_eq!(message, "hello");
                assert!(retain);
                assert_eq!(qos, vec![Qos::ExactlyOnce]);
            }
            Commands::Sub { .. } => panic!("expected pub command"),
        }
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(Cli::try_parse_from(["mqtt-cli", "pub", "-t", "a", "-m", "b", "-V", "4"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "mqtt-cli", "sub", "-t", "a", "--host", "override.local", "-k", "15", "-i", "reader",
            "--no-clean-start",
        ]);
        let config = CliConfig::default();

        let (command, broker) = build_connect(cli.command.connection(), &config).unwrap();

        assert_eq!(broker.host, "override.local");
        assert_eq!(broker.port, 1883);
        assert_eq!(command.keep_alive_secs, 15);
        assert_eq!(command.identifier, "reader");
        assert!(!command.clean_start);
        assert_eq!(command.version, ProtocolVersion::V5);
    }

    #[test]
    fn test_keep_alive_flag_is_bounded_by_mqtt_field() {
        let max = parse(&["mqtt-cli", "sub", "-t", "a", "-k", "65535"]);
        let (command, _) = build_connect(max.command.connection(), &CliConfig::default()).unwrap();
        assert_eq!(command.keep_alive_secs, 65535);

        assert!(Cli::try_parse_from(["mqtt-cli", "sub", "-t", "a", "-k", "65536"]).is_err());
    }

    #[test]
    fn test_config_supplies_defaults() {
        let cli = parse(&["mqtt-cli", "pub", "-t", "a", "-m", "b"]);
        let mut config = CliConfig::default();
        config.broker.url = "mqtts://broker.example.com".to_string();
        config.broker.mqtt_version = 3;

        let (command, broker) = build_connect(cli.command.connection(), &config).unwrap();

        assert!(broker.tls);
        assert_eq!(broker.port, 8883);
        assert_eq!(command.version, ProtocolVersion::V3);
        assert!(command.identifier.starts_with("mqtt-cli-"));
    }
}
