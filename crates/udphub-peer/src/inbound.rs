// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound file-reassembly engine.
//!
//! Reception state is keyed by `(sender_id, file_id)` so two senders can
//! transfer files concurrently without interfering with each other's
//! reassembly, per the file-id namespace rules in the spec.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Reception key: the tuple that globally identifies one inbound transfer.
pub type TransferKey = (String, i32);

/// In-progress inbound transfer state.
#[derive(Debug)]
pub struct ReceptionState {
    pub filename: String,
    pub declared_size: i64,
    received_chunks: HashMap<i32, Vec<u8>>,
    pub bytes_received: i64,
}

/// Map of active inbound receptions, shared by the receive loop only (single
/// writer) but exposed through a concurrent map for uniformity with the
/// outbound side and for lock-free progress reads from other threads.
pub type ReceptionMap = DashMap<TransferKey, ReceptionState>;

/// Open a new reception state for `(sender_id, file_id)`, replacing any
/// previous state for the same key (at-most-one active reception per key).
pub fn on_file_start(
    map: &ReceptionMap,
    sender_id: &str,
    file_id: i32,
    filename: String,
    declared_size: i64,
) {
    map.insert(
        (sender_id.to_string(), file_id),
        ReceptionState {
            filename,
            declared_size,
            received_chunks: HashMap::new(),
            bytes_received: 0,
        },
    );
}

/// Record one chunk, first-arrival-only. Returns the updated
/// `(bytes_received, declared_size)` if a matching reception state exists.
pub fn on_file_chunk(
    map: &ReceptionMap,
    sender_id: &str,
    file_id: i32,
    seq: i32,
    payload: Vec<u8>,
) -> Option<(i64, i64)> {
    let mut entry = map.get_mut(&(sender_id.to_string(), file_id))?;
    if entry.received_chunks.contains_key(&seq) {
        return Some((entry.bytes_received, entry.declared_size));
    }
    entry.bytes_received += payload.len() as i64;
    entry.received_chunks.insert(seq, payload);
    Some((entry.bytes_received, entry.declared_size))
}

/// Finalize a transfer on `FILE_END`: concatenate chunks `0..total_chunks` in
/// order and write them under `received_dir`. Consumes the reception state
/// whether it succeeds or fails.
///
/// # Errors
///
/// Returns [`Error::UnknownTransfer`] if no reception state is open for
/// `(sender_id, file_id)` — the `FILE_START` was lost, already finalized, or
/// this `FILE_END` is a wire duplicate; ordinary UDP loss/reordering, not a
/// bug, so the caller logs and drops rather than treating it as fatal.
/// Returns [`Error::MissingChunks`] if any index in `0..total_chunks` never
/// arrived; no partial file is written in that case.
pub fn on_file_end(
    map: &ReceptionMap,
    sender_id: &str,
    file_id: i32,
    total_chunks: i32,
    received_dir: &Path,
) -> Result<PathBuf> {
    let Some((_, state)) = map.remove(&(sender_id.to_string(), file_id)) else {
        return Err(Error::UnknownTransfer {
            sender_id: sender_id.to_string(),
            file_id,
        });
    };

    let total_chunks = usize::try_from(total_chunks).unwrap_or(0);
    let missing: Vec<i32> = (0..total_chunks)
        .filter(|i| !state.received_chunks.contains_key(&(*i as i32)))
        .map(|i| i as i32)
        .collect();

    if !missing.is_empty() {
        return Err(Error::MissingChunks { file_id, missing });
    }

    let mut bytes = Vec::with_capacity(state.bytes_received.max(0) as usize);
    for i in 0..total_chunks {
        bytes.extend_from_slice(&state.received_chunks[&(i as i32)]);
    }

    std::fs::create_dir_all(received_dir).map_err(Error::Io)?;
    let safe_name = sanitize_filename(&state.filename);
    let saved_path = received_dir.join(safe_name);
    std::fs::write(&saved_path, &bytes).map_err(Error::Io)?;

    Ok(saved_path)
}

/// A point-in-time view of one in-progress inbound reception, for the
/// peer's administrative surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTransferSnapshot {
    pub sender_id: String,
    pub file_id: i32,
    pub filename: String,
    pub bytes_received: i64,
    pub declared_size: i64,
}

/// Snapshot every inbound reception currently open.
#[must_use]
pub fn snapshot(map: &ReceptionMap) -> Vec<InboundTransferSnapshot> {
    map.iter()
        .map(|entry| {
            let (sender_id, file_id) = entry.key().clone();
            InboundTransferSnapshot {
                sender_id,
                file_id,
                filename: entry.value().filename.clone(),
                bytes_received: entry.value().bytes_received,
                declared_size: entry.value().declared_size,
            }
        })
        .collect()
}

/// Strip any directory components from an attacker-influenceable filename,
/// keeping only the final path segment.
fn sanitize_filename(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "received_file".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_in_order_despite_reordered_arrival() {
        let map = ReceptionMap::new();
        on_file_start(&map, "alice", 1, "greeting.txt".to_string(), 11);
        on_file_chunk(&map, "alice", 1, 1, b"World".to_vec());
        on_file_chunk(&map, "alice", 1, 0, b"Hello".to_vec());

        let dir = tempfile::tempdir().unwrap();
        let saved = on_file_end(&map, "alice", 1, 2, dir.path()).unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"HelloWorld");
    }

    #[test]
    fn duplicate_chunks_are_idempotent() {
        let map = ReceptionMap::new();
        on_file_start(&map, "alice", 1, "f.bin".to_string(), 5);
        on_file_chunk(&map, "alice", 1, 0, b"hello".to_vec());
        let (bytes_received, _) = on_file_chunk(&map, "alice", 1, 0, b"hello".to_vec()).unwrap();
        assert_eq!(bytes_received, 5);
    }

    #[test]
    fn missing_chunk_fails_reassembly_without_partial_file() {
        let map = ReceptionMap::new();
        on_file_start(&map, "alice", 1, "f.bin".to_string(), 10);
        on_file_chunk(&map, "alice", 1, 0, b"hello".to_vec());
        // seq 1 never arrives.

        let dir = tempfile::tempdir().unwrap();
        let result = on_file_end(&map, "alice", 1, 2, dir.path());
        assert!(matches!(
            result,
            Err(Error::MissingChunks { file_id: 1, ref missing }) if missing == &[1]
        ));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn empty_file_reassembles_to_zero_bytes() {
        let map = ReceptionMap::new();
        on_file_start(&map, "alice", 1, "empty.bin".to_string(), 0);
        let dir = tempfile::tempdir().unwrap();
        let saved = on_file_end(&map, "alice", 1, 0, dir.path()).unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn concurrent_transfers_from_different_senders_do_not_interfere() {
        let map = ReceptionMap::new();
        on_file_start(&map, "alice", 1, "a.bin".to_string(), 3);
        on_file_start(&map, "bob", 1, "b.bin".to_string(), 3);
        on_file_chunk(&map, "alice", 1, 0, b"AAA".to_vec());
        on_file_chunk(&map, "bob", 1, 0, b"BBB".to_vec());

        let dir = tempfile::tempdir().unwrap();
        let a = on_file_end(&map, "alice", 1, 1, dir.path()).unwrap();
        let b = on_file_end(&map, "bob", 1, 1, dir.path()).unwrap();
        assert_eq!(std::fs::read(a).unwrap(), b"AAA");
        assert_eq!(std::fs::read(b).unwrap(), b"BBB");
    }

    #[test]
    fn file_end_without_matching_file_start_is_reported_not_panicked() {
        let map = ReceptionMap::new();
        let dir = tempfile::tempdir().unwrap();
        let result = on_file_end(&map, "alice", 1, 0, dir.path());
        assert!(matches!(
            result,
            Err(Error::UnknownTransfer { ref sender_id, file_id: 1 }) if sender_id == "alice"
        ));
    }

    #[test]
    fn duplicate_file_end_after_finalization_is_reported_not_panicked() {
        let map = ReceptionMap::new();
        on_file_start(&map, "alice", 1, "f.bin".to_string(), 5);
        on_file_chunk(&map, "alice", 1, 0, b"hello".to_vec());
        let dir = tempfile::tempdir().unwrap();
        on_file_end(&map, "alice", 1, 1, dir.path()).unwrap();

        // A duplicated FILE_END for the same transfer arrives after it was
        // already finalized and removed.
        let result = on_file_end(&map, "alice", 1, 1, dir.path());
        assert!(matches!(result, Err(Error::UnknownTransfer { .. })));
    }

    #[test]
    fn snapshot_reports_bytes_received_against_declared_size() {
        let map = ReceptionMap::new();
        on_file_start(&map, "alice", 1, "f.bin".to_string(), 10);
        on_file_chunk(&map, "alice", 1, 0, b"hello".to_vec());

        let snap = snapshot(&map);
        assert_eq!(
            snap,
            vec![InboundTransferSnapshot {
                sender_id: "alice".to_string(),
                file_id: 1,
                filename: "f.bin".to_string(),
                bytes_received: 5,
                declared_size: 10,
            }]
        );
    }

    #[test]
    fn sanitizes_directory_components_in_declared_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("plain.txt"), "plain.txt");
    }
}
