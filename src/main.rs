//! Binary entrypoint for the lorabridge CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the bridge, optionally overriding the configured serial port
//! - `init` - write a starter `config.toml`
//! - `status` - print known devices and pending scheduled events from the data files
//!
//! See the library crate docs for module-level details: `lorabridge::`.
use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use log::info;
use std::str::FromStr;

use lorabridge::config::Config;
use lorabridge::registry::DeviceRegistry;
use lorabridge::schedule::ScheduleCache;

#[derive(Parser)]
#[command(name = "lorabridge")]
#[command(about = "Bridge between a LoRa serial gateway and ThingsBoard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge
    Start {
        /// Gateway serial port (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Show known devices and pending scheduled events
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            info!("Starting lorabridge v{}", env!("CARGO_PKG_VERSION"));
            if let Some(port) = port {
                config.serial.port = port;
            }
            lorabridge::bridge::run(config).await?;
        }
        Commands::Init => {
            init_logging(None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Set [cloud].attribute_device_id before running `lorabridge start`");
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            show_status(&config)?;
        }
    }

    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let registry = DeviceRegistry::load(
        config.storage.device_map_path(),
        config.storage.counter_path(),
        &config.schedule.display_prefix,
    )?;
    let cache = ScheduleCache::load_from_file(&config.storage.schedule_path());

    println!("lorabridge v{}", env!("CARGO_PKG_VERSION"));
    println!("Data dir: {}", config.storage.data_dir);
    println!("Devices: {}", registry.len());
    for device in registry.snapshot() {
        let pending = cache.device(&device.mac_address).map_or(0, |e| e.len());
        println!(
            "  {:<10} {}  ({} pending event(s))",
            device.display_name, device.mac_address, pending
        );
    }

    println!("Scheduled events: {}", cache.len());
    for (mac, events) in cache.iter() {
        for (label, ev) in events {
            println!(
                "  {} {:<24} {} -> {}{}",
                mac,
                label,
                format_epoch(ev.start),
                format_epoch(ev.end),
                if ev.sent { "  [sent]" } else { "" }
            );
        }
    }
    Ok(())
}

fn format_epoch(epoch: i64) -> String {
    match Utc.timestamp_opt(epoch, 0).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => epoch.to_string(),
    }
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .and_then(|c| log::LevelFilter::from_str(&c.logging.level).ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let file = std::sync::Mutex::new(f);
        // Mirror to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
