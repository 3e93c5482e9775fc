// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shell-facing events emitted by the peer core.
//!
//! The interactive shell itself is an external collaborator (out of scope);
//! this module is the narrow interface the core uses to talk to it. Events
//! are delivered over a `std::sync::mpsc` channel so any consumer — a line
//! shell, a GUI, or a test harness — can drain them independently of the
//! core's receive loop.

use std::path::PathBuf;

/// One notification surfaced from the peer core to its shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A chat message arrived from `sender_id`.
    Message { sender_id: String, text: String },
    /// `sender_id` has started sending us a file.
    FileStart {
        sender_id: String,
        file_id: i32,
        filename: String,
        size: i64,
    },
    /// Another chunk of an in-flight inbound transfer has arrived.
    FileProgress {
        sender_id: String,
        file_id: i32,
        bytes_received: i64,
        total_size: i64,
    },
    /// Reassembly succeeded; the file was written to `saved_path`.
    FileComplete {
        sender_id: String,
        file_id: i32,
        saved_path: PathBuf,
    },
    /// Reassembly failed; `reason` is a human-readable description.
    FileFailed {
        sender_id: String,
        file_id: i32,
        reason: String,
    },
    /// The peer's local view of the online set, excluding self.
    PeerList(Vec<String>),
}
