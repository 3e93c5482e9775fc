// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! udphub-peer - a minimal line-oriented shell driving one peer endpoint.
//!
//! Not the interactive GUI shell; a narrow CLI for exercising
//! `send-message`/`send-file`/`list-peers` end to end.
//!
//! ```bash
//! udphub-peer --id alice --broker 127.0.0.1:9876
//! ```
//!
//! Commands read from stdin, one per line:
//!
//! ```text
//! msg <text>
//! msg-to <recipient-id> <text>
//! file <path> [recipient-id]
//! peers
//! quit
//! ```

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use udphub_peer::{Peer, PeerConfig, PeerEvent, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECEIVED_DIR};
use udphub_wire::BROADCAST_ID;

/// Peer endpoint for the udphub messaging and file-sharing fabric.
#[derive(Parser, Debug)]
#[command(name = "udphub-peer")]
#[command(version)]
struct Args {
    /// This peer's identifier, used as `sender-id` on every frame.
    #[arg(long)]
    id: String,

    /// Address of the broker to register and relay through.
    #[arg(long, default_value = "127.0.0.1:9876")]
    broker: SocketAddr,

    /// Interval between HEARTBEAT frames, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64)]
    heartbeat_interval_ms: u64,

    /// Directory inbound transfers are reassembled into.
    #[arg(long, default_value = DEFAULT_RECEIVED_DIR)]
    received_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PeerConfig {
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
        received_dir: args.received_dir,
        ..PeerConfig::new(args.broker)
    };

    let (peer, events) = Peer::bind(&args.id, config).context("failed to bind peer socket")?;
    let peer = Arc::new(peer);
    let stop_handle = peer.stop_handle();

    ctrlc::set_handler({
        let stop_handle = stop_handle.clone();
        move || {
            log::info!("[peer] shutdown requested");
            stop_handle.stop();
        }
    })
    .context("failed to install Ctrl+C handler")?;

    std::thread::spawn(move || {
        for event in events {
            print_event(&event);
        }
    });

    let receive_loop = {
        let peer = Arc::clone(&peer);
        std::thread::Builder::new()
            .name("udphub-peer-run".to_string())
            .spawn(move || peer.run())
            .context("failed to spawn peer receive loop")?
    };

    log::info!("[shell] connected to broker {} as {}", args.broker, args.id);
    run_shell(&peer);

    peer.stop();
    receive_loop
        .join()
        .expect("peer receive loop panicked")
        .context("peer receive loop failed")?;
    Ok(())
}

fn print_event(event: &PeerEvent) {
    match event {
        PeerEvent::Message { sender_id, text } => println!("[{sender_id}] {text}"),
        PeerEvent::FileStart {
            sender_id,
            filename,
            size,
            ..
        } => println!("[{sender_id}] sending {filename} ({size} bytes)"),
        PeerEvent::FileProgress {
            sender_id,
            bytes_received,
            total_size,
            ..
        } => println!("[{sender_id}] {bytes_received}/{total_size} bytes"),
        PeerEvent::FileComplete {
            sender_id,
            saved_path,
            ..
        } => println!("[{sender_id}] file saved to {}", saved_path.display()),
        PeerEvent::FileFailed {
            sender_id, reason, ..
        } => println!("[{sender_id}] file transfer failed: {reason}"),
        PeerEvent::PeerList(ids) => println!("online: {}", ids.join(", ")),
    }
}

/// Read shell commands from stdin and drive `peer` until `quit` or EOF.
fn run_shell(peer: &Peer) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();

        match command {
            "quit" => break,
            "peers" => {
                println!("online: {}", peer.online_peers().join(", "));
            }
            "msg" => dispatch(peer.send_message(rest)),
            "msg-to" => {
                let mut args = rest.splitn(2, ' ');
                let (Some(recipient), Some(text)) = (args.next(), args.next()) else {
                    println!("usage: msg-to <recipient-id> <text>");
                    continue;
                };
                dispatch(peer.send_message_to(recipient, text));
            }
            "file" => {
                let mut args = rest.split_whitespace();
                let Some(path) = args.next() else {
                    println!("usage: file <path> [recipient-id]");
                    continue;
                };
                let recipient = args.next().unwrap_or(BROADCAST_ID);
                match peer.send_file(Path::new(path), recipient) {
                    Ok(file_id) => println!("sending file_id={file_id} to {recipient}"),
                    Err(e) => println!("error: {e}"),
                }
            }
            other => println!("unknown command: {other}"),
        }
    }
}

fn dispatch(result: udphub_peer::Result<()>) {
    if let Err(e) = result {
        println!("error: {e}");
    }
}
