// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! udphub-broker - the central relay process.
//!
//! ```bash
//! udphub-broker --port 9876
//! ```

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use udphub_broker::{Broker, BrokerConfig, DEFAULT_LIVENESS_WINDOW, DEFAULT_SWEEP_INTERVAL, DEFAULT_PORT};

/// Central relay for the udphub messaging and file-sharing fabric.
#[derive(Parser, Debug)]
#[command(name = "udphub-broker")]
#[command(version)]
struct Args {
    /// UDP port to bind the relay socket on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// How often the liveness sweeper checks for stale peers, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_millis() as u64)]
    sweep_interval_ms: u64,

    /// Maximum silence tolerated from a peer before it is evicted, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_LIVENESS_WINDOW.as_millis() as u64)]
    liveness_window_ms: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = BrokerConfig {
        port: args.port,
        sweep_interval: Duration::from_millis(args.sweep_interval_ms),
        liveness_window: Duration::from_millis(args.liveness_window_ms),
        ..BrokerConfig::default()
    };

    let mut broker = Broker::bind(config).context("failed to start broker")?;
    let stop_handle = broker.stop_handle();

    ctrlc::set_handler(move || {
        log::info!("[broker] shutdown requested");
        stop_handle.stop();
    })
    .context("failed to install Ctrl+C handler")?;

    log::info!("[broker] listening on {}", broker.local_addr()?);
    broker.run().context("broker receive loop failed")?;
    Ok(())
}
