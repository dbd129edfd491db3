//! envdash - Main Entry Point
//!
//! Runs a dashboard session against an MQTT broker with a line-oriented
//! console standing in for the touch UI.

use envdash::config::DashboardConfig;
use envdash::observability::init_default_logging;
use envdash::protocol::TelemetryDecoder;
use envdash::session::{Session, SessionHandle};
use envdash::state::{DashboardSnapshot, StateReconciler, UserIntent};
use envdash::storage::JsonFileStore;
use envdash::transport::mqtt::MqttClient;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

/// Environmental monitoring dashboard core
#[derive(Parser)]
#[command(name = "envdash")]
#[command(about = "Telemetry dashboard and setpoint control for an MQTT environmental monitor")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, overrides the configuration file
    #[arg(long, env = "ENVDASH_BROKER_URL")]
    broker_url: Option<String>,

    /// Telemetry topic, overrides the configuration file
    #[arg(long, env = "ENVDASH_TOPIC")]
    topic: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the dashboard session
    Run,
    /// Validate configuration
    Config {
        /// Show the resolved configuration (credentials redacted)
        #[arg(long)]
        show: bool,
    },
    /// Decode one telemetry payload and print the resulting state as JSON
    Decode {
        /// Payload file; reads stdin when omitted
        file: Option<PathBuf>,
    },
}

/// One line typed into the console
#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Intent(UserIntent),
    Status,
    Help,
    Quit,
}

fn parse_console_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default().to_ascii_lowercase();
    let argument = parts.next();

    let number = |arg: Option<&str>| -> Result<f64, String> {
        let raw = arg.ok_or_else(|| format!("'{command}' needs a value"))?;
        raw.parse::<f64>()
            .map_err(|_| format!("'{raw}' is not a number"))
    };

    match command.as_str() {
        "temp" | "temperature" => Ok(ConsoleCommand::Intent(
            UserIntent::SetDesiredTemperature(number(argument)?),
        )),
        "window" => Ok(ConsoleCommand::Intent(UserIntent::SetWindowAngle(number(
            argument,
        )?))),
        "auto" => match argument.map(str::to_ascii_lowercase).as_deref() {
            Some("on") | Some("1") | Some("true") => {
                Ok(ConsoleCommand::Intent(UserIntent::SetAutoMode(true)))
            }
            Some("off") | Some("0") | Some("false") => {
                Ok(ConsoleCommand::Intent(UserIntent::SetAutoMode(false)))
            }
            _ => Err("usage: auto on|off".to_string()),
        },
        "status" => Ok(ConsoleCommand::Status),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command '{other}', try 'help'")),
    }
}

const CONSOLE_HELP: &str = "commands: temp <10-30> | window <-90-90> | auto on|off | status | quit";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let result = match cli.command {
        Commands::Decode { ref file } => decode_payload(file.as_ref()),
        Commands::Run | Commands::Config { .. } => {
            let config = match load_configuration(&cli) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to load configuration: {}", e);
                    process::exit(1);
                }
            };

            match cli.command {
                Commands::Config { show } => handle_config_command(&config, show),
                _ => run_dashboard(config).await,
            }
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(cli: &Cli) -> Result<DashboardConfig, Box<dyn std::error::Error>> {
    let path = cli.config.clone().or_else(DashboardConfig::find_default_file);

    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            DashboardConfig::load_from_file(&path)?
        }
        None => match (&cli.broker_url, &cli.topic) {
            (Some(url), Some(topic)) => DashboardConfig::new(url.clone(), topic.clone()),
            _ => {
                return Err("No configuration file found. Provide one with -c/--config, \
                     create envdash.toml, or set ENVDASH_BROKER_URL and ENVDASH_TOPIC"
                    .into())
            }
        },
    };

    config.apply_overrides(cli.broker_url.clone(), cli.topic.clone())?;
    Ok(config)
}

fn handle_config_command(
    config: &DashboardConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn decode_payload(file: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let payload = match file {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer)?;
            buffer
        }
    };

    let record = TelemetryDecoder::decode(&payload)?;
    let mut reconciler = StateReconciler::new();
    reconciler.apply_telemetry(&record);

    println!("{}", serde_json::to_string_pretty(&reconciler.snapshot())?);
    Ok(())
}

async fn run_dashboard(config: DashboardConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        broker = %envdash::config::redact_broker_url(&config.mqtt.broker_url),
        topic = %config.mqtt.telemetry_topic,
        "Starting envdash v{}",
        env!("CARGO_PKG_VERSION")
    );

    let transport = MqttClient::new(config.mqtt.clone())?;
    let store = Arc::new(JsonFileStore::new(config.storage.path.clone()));
    let session = Session::new(transport, store, config.mqtt.telemetry_topic.clone())?;
    let handle = session.start().await;

    tokio::spawn(log_snapshots(handle.clone()));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    println!("{CONSOLE_HELP}");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_console_line(&handle, &line).await? {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Console closed, running until a shutdown signal");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Console read failed");
                    stdin_open = false;
                }
            }
        }
    }

    handle.shutdown().await?;
    info!("Application shutdown complete");
    Ok(())
}

/// Returns false when the user asked to quit
async fn handle_console_line(
    handle: &SessionHandle,
    line: &str,
) -> Result<bool, Box<dyn std::error::Error>> {
    if line.trim().is_empty() {
        return Ok(true);
    }

    match parse_console_command(line) {
        Ok(ConsoleCommand::Intent(intent)) => handle.apply_intent(intent).await?,
        Ok(ConsoleCommand::Status) => {
            println!("{}", serde_json::to_string_pretty(&handle.snapshot())?);
        }
        Ok(ConsoleCommand::Help) => println!("{CONSOLE_HELP}"),
        Ok(ConsoleCommand::Quit) => return Ok(false),
        Err(message) => println!("{message}"),
    }
    Ok(true)
}

async fn log_snapshots(handle: SessionHandle) {
    let mut rx = handle.subscribe();
    while rx.changed().await.is_ok() {
        let snapshot: DashboardSnapshot = rx.borrow_and_update().clone();
        info!(
            readiness = ?snapshot.readiness,
            internal_temperature = ?snapshot.device.internal_temperature,
            internal_humidity = ?snapshot.device.internal_humidity,
            air_quality_index = snapshot.device.air_quality_index,
            desired_temperature = snapshot.device.desired_temperature,
            window_angle = snapshot.device.window_angle,
            auto_mode = snapshot.device.is_auto_mode(),
            weather_temperature = ?snapshot.weather.temperature,
            wind = ?snapshot.weather.compass_point(),
            hazards = ?snapshot.hazards.active(),
            alert_color = snapshot.hazards.severity_color.display_color(),
            "Dashboard updated"
        );
    }
}
