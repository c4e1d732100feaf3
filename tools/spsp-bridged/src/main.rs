// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SPSP bridge daemon for Linux.
//!
//! Bridges wireless SPSP clients on a monitor-mode 802.11 interface to an
//! in-process broker.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! spsp-bridged --config bridge.toml
//!
//! # Generate an example configuration
//! spsp-bridged gen-config --output bridge.toml
//! ```

mod config;

use clap::{Parser, Subcommand};
use config::{BridgedConfig, FarLayerKind};
use spsp::{Bridge, BridgeConfig, EspNow, EspNowConfig, LocalBroker};
use spsp_linux::InjectionAdapter;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// SPSP bridge daemon
#[derive(Parser, Debug)]
#[command(name = "spsp-bridged")]
#[command(about = "SPSP bridge daemon - wireless clients to a pub/sub backend")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Debug, Error)]
enum BridgedError {
    #[error("Adapter: {0}")]
    Adapter(#[from] spsp::AdapterError),

    #[error("This build carries no MQTT adapter; use far_layer = \"local_broker\"")]
    MqttUnavailable,
}

/// Fixed-channel WiFi control: channel hopping is not possible on a
/// monitor-mode interface, and a bridge never scans anyway.
struct MonitorWifi;

impl spsp::WifiChannelControl for MonitorWifi {
    fn channel(&self) -> u8 {
        1
    }

    fn set_channel(&self, _channel: u8) {}

    fn channel_restrictions(&self) -> spsp::ChannelRestrictions {
        spsp::ChannelRestrictions { low: 1, high: 1 }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(command) = args.command {
        return match command {
            Commands::GenConfig { output } => {
                std::fs::write(&output, BridgedConfig::example())?;
                println!("Wrote example configuration to {}", output.display());
                Ok(())
            }
            Commands::Validate { config } => {
                BridgedConfig::from_file(&config)?;
                println!("{} is valid", config.display());
                Ok(())
            }
        };
    }

    let Some(config_path) = args.config else {
        eprintln!("Usage: spsp-bridged --config CONFIG_FILE.toml");
        std::process::exit(1);
    };
    let config = BridgedConfig::from_file(&config_path)?;

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    run(&config).map_err(Into::into)
}

fn run(config: &BridgedConfig) -> Result<(), BridgedError> {
    let broker = match config.far_layer {
        FarLayerKind::LocalBroker => LocalBroker::new(config.local_broker.topic_prefix.clone()),
        FarLayerKind::Mqtt => return Err(BridgedError::MqttUnavailable),
    };

    let adapter = InjectionAdapter::new(&config.espnow.interface, config.espnow.retransmits)?;
    let espnow = EspNow::new(
        adapter,
        MonitorWifi,
        EspNowConfig {
            ssid: config.espnow.ssid,
            password: config.password_bytes(),
            ..EspNowConfig::default()
        },
    );

    let bridge = Bridge::new(
        espnow,
        broker,
        BridgeConfig {
            reporting: (&config.reporting).into(),
            ..BridgeConfig::default()
        },
    );

    println!("spsp-bridged v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Bridging {} (ssid {:#010x}) to the local broker",
        config.espnow.interface, config.espnow.ssid
    );
    println!("Press Ctrl+C to stop...");

    wait_for_termination();

    drop(bridge);
    Ok(())
}

/// Blocks until SIGINT or SIGTERM is received.
fn wait_for_termination() {
    // SAFETY: standard sigset manipulation; sigwait blocks the calling
    // thread until one of the masked signals arrives.
    unsafe {
        let mut sigset: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut sigset);
        libc::sigaddset(&mut sigset, libc::SIGINT);
        libc::sigaddset(&mut sigset, libc::SIGTERM);
        libc::pthread_sigmask(libc::SIG_BLOCK, &sigset, std::ptr::null_mut());

        let mut sig: libc::c_int = 0;
        libc::sigwait(&sigset, &mut sig);
    }
}
