// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! # floatbot-agent
//!
//! ## Usage
//!
//! ```bash
//! # One ingest/uplink cycle
//! floatbot-agent run --config /etc/floatbot.json
//!
//! # Ingest and rate only
//! floatbot-agent run --config /etc/floatbot.json --no-send
//!
//! # Inspect a captured uplink message
//! floatbot-agent decode uplink.bin --year 2024
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Datelike;
use clap::{Parser, Subcommand};
use floatbot::{Decoder, Segment};
use floatbot_agent::{now_epoch, AgentConfig, ConfigStore, Orchestrator, UdpLink};
use floatbot_store::RecordStore;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

const EXIT_SEND_FAILED: u8 = 1;
const EXIT_SETUP_FAILED: u8 = 2;

/// Float store-and-forward uplink agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one ingest and uplink cycle
    Run {
        /// Configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ingest and rate, but do not send
        #[arg(long)]
        no_send: bool,
    },
    /// Decode a binary uplink message
    Decode {
        /// File holding the raw message bytes
        file: PathBuf,

        /// Year the STATUS timestamps are relative to
        #[arg(short, long)]
        year: Option<i32>,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(config: Option<PathBuf>, no_send: bool) -> ExitCode {
    let loaded = match config {
        Some(path) => ConfigStore::load(&path),
        None => ConfigStore::in_memory(AgentConfig::default()),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("cannot load configuration: {}", e);
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };

    let store = match RecordStore::open(&config.config().db_path) {
        Ok(store) => store,
        Err(e) => {
            error!(
                "cannot open store {}: {}",
                config.config().db_path.display(),
                e
            );
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };
    let link = match UdpLink::new(config.config().link.clone()) {
        Ok(link) => link,
        Err(e) => {
            error!("invalid link settings: {}", e);
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };

    let mut agent = Orchestrator::new(store, config, link);
    if no_send {
        agent.disable_send();
    }
    match agent.run_cycle(now_epoch()) {
        Ok(report) if report.send_ok() => {
            info!("cycle complete: {:?}", report.send);
            ExitCode::SUCCESS
        }
        Ok(report) => {
            error!("cycle complete, uplink failed: {:?}", report.send);
            ExitCode::from(EXIT_SEND_FAILED)
        }
        Err(e) => {
            error!("cycle aborted: {}", e);
            ExitCode::from(EXIT_SETUP_FAILED)
        }
    }
}

fn decode(file: PathBuf, year: Option<i32>) -> ExitCode {
    let bytes = match std::fs::read(&file) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("cannot read {}: {}", file.display(), e);
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };
    let year = year.unwrap_or_else(|| chrono::Utc::now().year());
    let segments = Decoder::for_year(year).and_then(|decoder| decoder.decode(&bytes));

    match segments {
        Ok(segments) => {
            for segment in segments {
                match segment {
                    Segment::Status(status) => println!("STATUS {:#?}", status),
                    Segment::Data(data) => println!("DATA {:#?}", data),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("cannot decode {}: {}", file.display(), e);
            ExitCode::from(EXIT_SEND_FAILED)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);
    info!("floatbot-agent v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Run { config, no_send } => run(config, no_send),
        Command::Decode { file, year } => decode(file, year),
    }
}
