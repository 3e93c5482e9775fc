// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound file-transfer engine.
//!
//! One transient thread per active send. The task never revisits a segment
//! once it has moved past it — there is no sliding window, only a bounded
//! per-segment retry against a single `FILE_ACK`.

use dashmap::{DashMap, DashSet};
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use udphub_wire::{encode_file_end, encode_file_start, Packet, PacketType, CHUNK_SIZE};

use crate::error::{Error, Result};

/// Default window to wait for a `FILE_ACK` before retransmitting a chunk.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_millis(50);
/// Default maximum send attempts for a single chunk (first send + retries).
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default pacing delay between successfully-handled segments.
pub const DEFAULT_PACING: Duration = Duration::from_millis(10);

/// How often the retry wait polls the acknowledged-set while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Per-transfer acknowledged sequence numbers, shared between the transfer
/// task (reader) and the peer's receive loop (writer, on `FILE_ACK`).
pub type AckSet = Arc<DashSet<i32>>;

/// A registered outbound transfer: its acknowledged-set plus the segment
/// count fixed at send time, so progress can be read without touching the
/// transfer thread.
pub struct OutboundHandle {
    pub ack_set: AckSet,
    pub total_segments: usize,
}

/// Map from our own outbound `file_id` to that transfer's handle.
pub type TransferMap = Arc<DashMap<i32, OutboundHandle>>;

/// A point-in-time view of one in-flight outbound transfer, for the peer's
/// administrative surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTransferSnapshot {
    pub file_id: i32,
    pub acknowledged_count: usize,
    pub total_segments: usize,
}

/// Snapshot every outbound transfer currently in flight.
#[must_use]
pub fn snapshot(transfers: &TransferMap) -> Vec<OutboundTransferSnapshot> {
    transfers
        .iter()
        .map(|entry| OutboundTransferSnapshot {
            file_id: *entry.key(),
            acknowledged_count: entry.value().ack_set.len(),
            total_segments: entry.value().total_segments,
        })
        .collect()
}

/// Tunables for the outbound transfer engine.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub retry_window: Duration,
    pub max_retries: u32,
    pub pacing: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry_window: DEFAULT_RETRY_WINDOW,
            max_retries: DEFAULT_MAX_RETRIES,
            pacing: DEFAULT_PACING,
        }
    }
}

/// Read `path` fully and split it into `CHUNK_SIZE`-bounded segments.
///
/// A 0-byte file yields zero segments: per the empty-file boundary, no
/// `FILE_CHUNK` is ever emitted for it, only a `FILE_END` with
/// `total_chunks = 0`.
///
/// # Errors
///
/// Returns [`Error::FileNotFound`] if the file cannot be opened or read —
/// the caller reports this to the shell without emitting any frame.
pub fn prepare_segments(path: &Path) -> Result<(String, i64, Vec<Vec<u8>>)> {
    let bytes = std::fs::read(path).map_err(|_| Error::FileNotFound(path.to_path_buf()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let total_size = bytes.len() as i64;
    let segments: Vec<Vec<u8>> = bytes.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();

    Ok((filename, total_size, segments))
}

/// Spawn the transient task that drives one outbound transfer to completion.
#[allow(clippy::too_many_arguments)]
pub fn spawn_outbound_transfer(
    socket: Arc<UdpSocket>,
    broker_addr: SocketAddr,
    sender_id: String,
    recipient_id: String,
    file_id: i32,
    filename: String,
    total_size: i64,
    segments: Vec<Vec<u8>>,
    transfers: TransferMap,
    config: TransferConfig,
) -> std::thread::JoinHandle<()> {
    let ack_set: AckSet = Arc::new(DashSet::new());
    transfers.insert(
        file_id,
        OutboundHandle {
            ack_set: Arc::clone(&ack_set),
            total_segments: segments.len(),
        },
    );

    std::thread::Builder::new()
        .name(format!("udphub-outbound-{file_id}"))
        .spawn(move || {
            run_transfer(
                &socket,
                broker_addr,
                &sender_id,
                &recipient_id,
                file_id,
                &filename,
                total_size,
                &segments,
                &ack_set,
                config,
            );
            transfers.remove(&file_id);
        })
        .expect("failed to spawn outbound transfer thread")
}

#[allow(clippy::too_many_arguments)]
fn run_transfer(
    socket: &UdpSocket,
    broker_addr: SocketAddr,
    sender_id: &str,
    recipient_id: &str,
    file_id: i32,
    filename: &str,
    total_size: i64,
    segments: &[Vec<u8>],
    ack_set: &DashSet<i32>,
    config: TransferConfig,
) {
    let mut start = Packet::new(
        PacketType::FileStart,
        sender_id,
        recipient_id,
        encode_file_start(filename, total_size),
    );
    start.file_id = file_id;
    let _ = socket.send_to(&start.encode(), broker_addr);
    log::info!(
        "[peer:send] FILE_START file_id={file_id} filename={filename} size={total_size} recipient={recipient_id}"
    );

    for (i, segment) in segments.iter().enumerate() {
        let seq = i as i32;
        let mut chunk = Packet::new(
            PacketType::FileChunk,
            sender_id,
            recipient_id,
            segment.clone(),
        );
        chunk.sequence_number = seq;
        chunk.file_id = file_id;
        let encoded = chunk.encode();

        let mut acked = false;
        for attempt in 0..config.max_retries {
            let _ = socket.send_to(&encoded, broker_addr);
            if wait_for_ack(ack_set, seq, config.retry_window) {
                acked = true;
                break;
            }
            log::debug!(
                "[peer:send] file_id={file_id} seq={seq} unacked after attempt {}/{}",
                attempt + 1,
                config.max_retries
            );
        }

        if !acked {
            log::warn!(
                "[peer:send] file_id={file_id} seq={seq} exhausted retries, proceeding best-effort"
            );
            ack_set.insert(seq);
        }

        std::thread::sleep(config.pacing);
    }

    let mut end = Packet::new(
        PacketType::FileEnd,
        sender_id,
        recipient_id,
        encode_file_end(segments.len() as i32),
    );
    end.file_id = file_id;
    let _ = socket.send_to(&end.encode(), broker_addr);
    log::info!("[peer:send] FILE_END file_id={file_id} total_chunks={}", segments.len());
}

fn wait_for_ack(ack_set: &DashSet<i32>, seq: i32, window: Duration) -> bool {
    let deadline = Instant::now() + window;
    loop {
        if ack_set.contains(&seq) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
