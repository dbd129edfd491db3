//! Telemetry Injection Utility
//!
//! Publishes device-shaped telemetry to a broker, standing in for the
//! microcontroller while testing a running dashboard.
//!
//! ## Usage
//!
//! ```bash
//! # Indoor readings only
//! inject-telemetry --temperature 22.5 --humidity 48 --gas 12000
//!
//! # Weather with an alert
//! inject-telemetry --weather-temperature 3 --alert-event "Orange warning" \
//!   --alert-description "Snow and fog expected overnight"
//!
//! # Raw payload from a file
//! inject-telemetry --payload-file sample.json
//!
//! # Watch what the dashboard sends back
//! inject-telemetry --temperature 21 --listen 30
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tokio::time::{Duration, Instant};

#[derive(Parser)]
#[command(
    name = "inject-telemetry",
    about = "Publish device telemetry to an envdash broker",
    long_about = "Simulates the monitoring device: publishes one telemetry payload and \
                  optionally prints the setpoint commands the dashboard sends back."
)]
struct Args {
    /// Telemetry topic
    #[arg(long, default_value = "/topic/esp32data")]
    topic: String,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,

    /// Indoor temperature (°C)
    #[arg(long)]
    temperature: Option<f64>,

    /// Indoor relative humidity (%)
    #[arg(long)]
    humidity: Option<f64>,

    /// Gas sensor resistance (ohms)
    #[arg(long)]
    gas: Option<f64>,

    /// Echoed target temperature
    #[arg(long)]
    desired_temperature: Option<f64>,

    /// Echoed window angle
    #[arg(long)]
    window_deg: Option<f64>,

    /// Echoed auto mode (0 or 1)
    #[arg(long)]
    is_auto: Option<u8>,

    #[arg(long)]
    weather_temperature: Option<f64>,

    #[arg(long)]
    weather_humidity: Option<f64>,

    #[arg(long)]
    wind_speed: Option<f64>,

    #[arg(long)]
    wind_deg: Option<f64>,

    /// Alert headline, e.g. "Yellow warning for wind"
    #[arg(long)]
    alert_event: Option<String>,

    /// Alert body, e.g. "Heavy rain and fog expected"
    #[arg(long)]
    alert_description: Option<String>,

    /// Publish this file verbatim instead of building a payload
    #[arg(long, conflicts_with_all = ["temperature", "humidity", "gas", "weather_temperature"])]
    payload_file: Option<PathBuf>,

    /// Publish as a retained message
    #[arg(long)]
    retain: bool,

    /// Seconds to listen on /topic/phoneData afterwards
    #[arg(long, default_value = "0")]
    listen: u64,
}

fn insert_number(group: &mut Map<String, Value>, key: &str, value: Option<f64>) {
    if let Some(value) = value {
        group.insert(key.to_string(), json!(value));
    }
}

fn insert_text(group: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        group.insert(key.to_string(), json!(value));
    }
}

fn build_payload(args: &Args) -> Value {
    let mut internal = Map::new();
    insert_number(&mut internal, "internal_temperature", args.temperature);
    insert_number(&mut internal, "internal_humidity", args.humidity);
    insert_number(&mut internal, "gas_resistance", args.gas);
    insert_number(&mut internal, "desired_temperature", args.desired_temperature);
    insert_number(&mut internal, "window_deg", args.window_deg);
    if let Some(is_auto) = args.is_auto {
        internal.insert("is_auto".to_string(), json!(is_auto));
    }

    let mut weather = Map::new();
    insert_number(&mut weather, "weather_temperature", args.weather_temperature);
    insert_number(&mut weather, "weather_humidity", args.weather_humidity);
    insert_number(&mut weather, "weather_wind_speed", args.wind_speed);
    insert_number(&mut weather, "weather_wind_deg", args.wind_deg);
    insert_text(&mut weather, "weather_alert_event", args.alert_event.as_ref());
    insert_text(
        &mut weather,
        "weather_alert_description",
        args.alert_description.as_ref(),
    );

    let mut payload = Map::new();
    if !internal.is_empty() {
        payload.insert("internal_data".to_string(), Value::Object(internal));
    }
    if !weather.is_empty() {
        payload.insert("weather_data".to_string(), Value::Object(weather));
    }
    Value::Object(payload)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let payload = match &args.payload_file {
        Some(path) => std::fs::read(path)?,
        None => serde_json::to_vec(&build_payload(&args))?,
    };

    let client_id = format!(
        "inject-telemetry-{}",
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs()
    );
    let mut mqttoptions = MqttOptions::new(client_id, &args.broker_host, args.broker_port);
    mqttoptions.set_keep_alive(Duration::from_secs(60));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    if args.listen > 0 {
        client.subscribe("/topic/phoneData", QoS::AtMostOnce).await?;
    }
    client
        .publish(&args.topic, QoS::AtLeastOnce, args.retain, payload.clone())
        .await?;

    println!(
        "Publishing to {} on {}:{}",
        args.topic, args.broker_host, args.broker_port
    );
    println!("   {}", String::from_utf8_lossy(&payload));

    // Drive the event loop until the publish is acknowledged, then listen
    let listen_until = Instant::now() + Duration::from_secs(args.listen);
    let mut acknowledged = false;
    loop {
        let timeout = if acknowledged {
            listen_until.saturating_duration_since(Instant::now())
        } else {
            Duration::from_secs(5)
        };
        if acknowledged && timeout.is_zero() {
            break;
        }

        match tokio::time::timeout(timeout, eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::PubAck(_)))) => {
                println!("Telemetry acknowledged by broker");
                acknowledged = true;
            }
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                println!(
                    "Command on {}: {}",
                    publish.topic,
                    String::from_utf8_lossy(&publish.payload)
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                eprintln!("MQTT eventloop error: {e}");
                break;
            }
            Err(_) if !acknowledged => {
                eprintln!("Timed out waiting for the broker to acknowledge");
                break;
            }
            Err(_) => break,
        }
    }

    client.disconnect().await?;
    // One more poll so the DISCONNECT goes out
    let _ = tokio::time::timeout(Duration::from_millis(200), eventloop.poll()).await;
    Ok(())
}
