// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type for peer operations.

use std::fmt;
use std::path::PathBuf;

/// Errors returned by peer setup and shell-facing operations.
#[derive(Debug)]
pub enum Error {
    /// Failed to bind the peer's ephemeral socket.
    BindFailed(std::io::Error),
    /// A send or receive call failed outside the per-datagram resilient path.
    Io(std::io::Error),
    /// `send-file` was asked to send a path that does not exist or cannot be read.
    FileNotFound(PathBuf),
    /// Reassembly failed at `FILE_END`: the listed chunk indices never arrived.
    MissingChunks { file_id: i32, missing: Vec<i32> },
    /// `FILE_END` (or a stray `FILE_CHUNK`) arrived for a `(sender_id, file_id)`
    /// with no live reception state — the `FILE_START` was lost, already
    /// finalized, or the frame is a wire duplicate.
    UnknownTransfer { sender_id: String, file_id: i32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindFailed(e) => write!(f, "failed to bind peer socket: {e}"),
            Self::Io(e) => write!(f, "peer I/O error: {e}"),
            Self::FileNotFound(path) => write!(f, "file not found: {}", path.display()),
            Self::MissingChunks { file_id, missing } => write!(
                f,
                "reassembly failed for file_id={file_id}: missing chunks {missing:?}"
            ),
            Self::UnknownTransfer { sender_id, file_id } => write!(
                f,
                "no reception state for sender={sender_id} file_id={file_id}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BindFailed(e) | Self::Io(e) => Some(e),
            Self::FileNotFound(_) | Self::MissingChunks { .. } | Self::UnknownTransfer { .. } => {
                None
            }
        }
    }
}

/// Convenient alias for peer operations.
pub type Result<T> = std::result::Result<T, Error>;
