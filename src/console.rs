//! Console Front-End
//!
//! Line-oriented stand-in for the graphical interface: an interactive
//! acquisition session plus offline queries against the reading
//! database. Every failure the session produces surfaces here as text.

use crate::acquisition::worker::{self, RigHandle, WorkerConfig};
use crate::domain::models::{
    ConnectionStatus, GridPosition, MessageSeverity, RigEvent, RigRequest, StatusMessage,
    GRID_SIZE,
};
use crate::domain::safety::SafetyLimit;
use crate::domain::settings::{Settings, SettingsService};
use crate::infrastructure::bluetooth::link::DeviceConnector;
use crate::infrastructure::logging;
use crate::infrastructure::store::ReadingStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[clap(name = "probe-rig", about = "BLE probe positioning rig control and data capture")]
pub struct Opts {
    /// Reading database path (overrides the settings file)
    #[clap(long)]
    pub database: Option<String>,

    /// Scan window in seconds (overrides the settings file)
    #[clap(long)]
    pub scan_seconds: Option<u64>,

    /// Force limit in newtons (overrides the settings file)
    #[clap(long)]
    pub max_force: Option<f64>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive acquisition session (the default)
    Run,
    /// List every grid position with stored readings
    Positions,
    /// Print the readings captured at one grid cell
    Readings { x: i32, y: i32 },
}

pub fn run(opts: Opts) -> anyhow::Result<()> {
    let mut service = SettingsService::new().context("Failed to load settings")?;
    {
        let settings = service.get_mut();
        if let Some(path) = opts.database {
            settings.database_path = path;
        }
        if let Some(seconds) = opts.scan_seconds {
            settings.scan_seconds = seconds;
        }
        if let Some(limit) = opts.max_force {
            settings.max_force_newtons = limit;
        }
    }

    match opts.command.unwrap_or(Command::Run) {
        Command::Run => interactive(service),
        Command::Positions => {
            let store = open_store(service.get())?;
            print_positions(&store)
        }
        Command::Readings { x, y } => {
            let store = open_store(service.get())?;
            print_readings(&store, x, y)
        }
    }
}

fn open_store(settings: &Settings) -> anyhow::Result<ReadingStore> {
    ReadingStore::open(&settings.database_path).with_context(|| {
        format!("Failed to open reading database {:?}", settings.database_path)
    })
}

#[cfg(windows)]
fn build_connector(settings: &Settings) -> anyhow::Result<Box<dyn DeviceConnector + Send>> {
    use crate::infrastructure::bluetooth::connection::{LinkConfig, WinRtConnector};
    Ok(Box::new(WinRtConnector::new(LinkConfig {
        command_char_uuid: settings.command_char_uuid.clone(),
        telemetry_char_uuid: settings.telemetry_char_uuid.clone(),
    })))
}

#[cfg(not(windows))]
fn build_connector(_settings: &Settings) -> anyhow::Result<Box<dyn DeviceConnector + Send>> {
    anyhow::bail!("This build has no Bluetooth backend; the interactive session requires Windows")
}

fn interactive(service: SettingsService) -> anyhow::Result<()> {
    let _logging_guard = logging::init_logger(&service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {e}"))
        .ok();

    tracing::info!("Starting probe rig control session");

    let store = open_store(service.get())?;
    let connector = build_connector(service.get())?;
    let config = WorkerConfig {
        scan_seconds: service.get().scan_seconds,
        limit: SafetyLimit::new(service.get().max_force_newtons),
    };
    let (handle, events) = worker::spawn(connector, store, config);

    let service = Arc::new(Mutex::new(service));
    // Address of the connect attempt in flight, recorded to the
    // settings file once the link actually comes up.
    let pending_address = Arc::new(Mutex::new(None::<u64>));

    let printer = {
        let service = service.clone();
        let pending_address = pending_address.clone();
        std::thread::spawn(move || print_events(events, &service, &pending_address))
    };

    print_help();
    command_loop(&handle, &service, &pending_address)?;

    // Parks the carriage at the origin and joins the worker thread;
    // the event channel closes behind it, ending the printer.
    handle.shutdown();
    if printer.join().is_err() {
        tracing::error!("Event printer panicked");
    }
    Ok(())
}

fn command_loop(
    handle: &RigHandle,
    service: &Arc<Mutex<SettingsService>>,
    pending_address: &Arc<Mutex<Option<u64>>>,
) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        match verb {
            "scan" => handle.request(RigRequest::Scan),
            "connect" => match parse_connect(parts.next(), service) {
                Ok(address) => {
                    *pending_address.lock().unwrap() = Some(address);
                    handle.request(RigRequest::Connect(address));
                }
                Err(e) => println!("{e}"),
            },
            "goto" => match parse_cell(parts.next(), parts.next()) {
                Ok(position) => handle.request(RigRequest::MoveTo(position)),
                Err(e) => println!("{e}"),
            },
            "start" => handle.request(RigRequest::Start),
            "retract" => handle.request(RigRequest::Retract),
            "home" => handle.request(RigRequest::ReturnHome),
            "send" => {
                let text = line["send".len()..].trim();
                if text.is_empty() {
                    println!("usage: send <text>");
                } else {
                    handle.request(RigRequest::Raw(text.to_string()));
                }
            }
            "help" => print_help(),
            "quit" | "exit" => break,
            other => println!("Unknown command {other:?}; type `help` for the list"),
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  scan                    discover nearby devices");
    println!("  connect <address|last>  open the link (hex, decimal or AA:BB:.. address)");
    println!("  goto <x> <y>            drive the carriage to a grid cell (0-6 each axis)");
    println!("  start                   begin a measurement cycle at the current cell");
    println!("  retract                 retract the probe");
    println!("  home                    drive the carriage back to the origin");
    println!("  send <text>             write raw text to the command characteristic");
    println!("  quit                    park the carriage and exit");
}

fn print_events(
    mut events: mpsc::UnboundedReceiver<RigEvent>,
    service: &Arc<Mutex<SettingsService>>,
    pending_address: &Arc<Mutex<Option<u64>>>,
) {
    while let Some(event) = events.blocking_recv() {
        match event {
            RigEvent::DevicesDiscovered(devices) => {
                if devices.is_empty() {
                    println!("No devices found.");
                }
                for device in &devices {
                    println!(
                        "  {} | {:#014X} | {} dBm",
                        device.name, device.address, device.signal_strength
                    );
                }
            }
            RigEvent::ConnectionStatus(status) => {
                print_status(status);
                if status == ConnectionStatus::Connected {
                    remember_address(service, pending_address);
                }
            }
            RigEvent::CommandSent(text) => println!("Sent: {text}"),
            RigEvent::Reading(reading) => println!(
                "[{}] ({}, {})  measurement {:.4} | force {:.2} N | depth {:.4} cm",
                reading.timestamp,
                reading.x,
                reading.y,
                reading.measurement,
                reading.force_newtons(),
                reading.depth_cm()
            ),
            RigEvent::SafetyTripped { force_newtons } => {
                println!("Force too large ({force_newtons:.2} N); probe returning")
            }
            RigEvent::Log(message) => print_log(&message),
        }
    }
}

fn print_status(status: ConnectionStatus) {
    let text = match status {
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Connecting => "connecting...",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Error => "error",
    };
    println!("Link: {text}");
}

fn print_log(message: &StatusMessage) {
    match message.severity {
        MessageSeverity::Warning => println!("warning: {}", message.message),
        MessageSeverity::Error => println!("error: {}", message.message),
        _ => println!("{}", message.message),
    }
}

fn remember_address(
    service: &Arc<Mutex<SettingsService>>,
    pending_address: &Arc<Mutex<Option<u64>>>,
) {
    let Some(address) = pending_address.lock().unwrap().take() else {
        return;
    };
    if let Ok(mut service) = service.lock() {
        if let Err(e) = service.record_connected_address(address) {
            tracing::warn!("Could not save the connected address: {e}");
        }
    }
}

fn parse_connect(
    arg: Option<&str>,
    service: &Arc<Mutex<SettingsService>>,
) -> Result<u64, String> {
    let arg = arg.ok_or("usage: connect <address|last>")?;
    if arg.eq_ignore_ascii_case("last") {
        return service
            .lock()
            .unwrap()
            .get()
            .last_connected_address
            .ok_or_else(|| "No previously connected device on record".to_string());
    }
    parse_address(arg).ok_or_else(|| format!("Not a Bluetooth address: {arg:?}"))
}

/// Accepts `0x`-prefixed hex, colon-separated hex, or plain decimal.
fn parse_address(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    if text.contains(':') {
        return u64::from_str_radix(&text.replace(':', ""), 16).ok();
    }
    text.parse().ok()
}

fn parse_cell(x: Option<&str>, y: Option<&str>) -> Result<GridPosition, String> {
    let (Some(x), Some(y)) = (x, y) else {
        return Err("usage: goto <x> <y>".to_string());
    };
    let x: i32 = x.parse().map_err(|_| format!("Not a coordinate: {x:?}"))?;
    let y: i32 = y.parse().map_err(|_| format!("Not a coordinate: {y:?}"))?;
    GridPosition::new(x, y)
        .ok_or_else(|| format!("({x}, {y}) is outside the {n}x{n} grid", n = GRID_SIZE))
}

fn print_positions(store: &ReadingStore) -> anyhow::Result<()> {
    let positions = store.distinct_positions()?;
    if positions.is_empty() {
        println!("No readings recorded yet.");
        return Ok(());
    }
    for position in positions {
        let count = store.readings_at(position)?.len();
        println!("({}, {})  {count} reading(s)", position.x, position.y);
    }
    Ok(())
}

fn print_readings(store: &ReadingStore, x: i32, y: i32) -> anyhow::Result<()> {
    let position = GridPosition::new(x, y)
        .ok_or_else(|| anyhow::anyhow!("({x}, {y}) is outside the {n}x{n} grid", n = GRID_SIZE))?;
    let readings = store.readings_at(position)?;
    if readings.is_empty() {
        println!("No readings at ({x}, {y}).");
        return Ok(());
    }

    println!(
        "{:<23}  {:>11}  {:>9}  {:>9}  {:>10}",
        "timestamp", "measurement", "force (N)", "angle", "depth (cm)"
    );
    for reading in readings {
        println!(
            "{:<23}  {:>11.4}  {:>9.2}  {:>9.3}  {:>10.4}",
            reading.timestamp,
            reading.measurement,
            reading.force_newtons(),
            reading.angle,
            reading.depth_cm()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_parse_in_all_three_forms() {
        assert_eq!(parse_address("0x001B6312AF5C"), Some(0x001B_6312_AF5C));
        assert_eq!(parse_address("00:1B:63:12:AF:5C"), Some(0x001B_6312_AF5C));
        assert_eq!(parse_address("42"), Some(42));
        assert_eq!(parse_address("rig"), None);
    }

    #[test]
    fn cells_must_lie_on_the_grid() {
        assert_eq!(
            parse_cell(Some("2"), Some("3")),
            Ok(GridPosition::new(2, 3).unwrap())
        );
        assert!(parse_cell(Some("7"), Some("0")).is_err());
        assert!(parse_cell(Some("2"), None).is_err());
        assert!(parse_cell(Some("a"), Some("0")).is_err());
    }
}
