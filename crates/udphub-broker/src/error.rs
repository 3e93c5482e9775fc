// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type for broker operations.

use std::fmt;

/// Errors returned by broker setup and runtime operations.
#[derive(Debug)]
pub enum Error {
    /// Failed to bind the relay socket to the configured address.
    BindFailed(std::io::Error),
    /// A send or receive call failed outside the per-datagram resilient path.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindFailed(e) => write!(f, "failed to bind broker socket: {e}"),
            Self::Io(e) => write!(f, "broker I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BindFailed(e) | Self::Io(e) => Some(e),
        }
    }
}

/// Convenient alias for broker operations.
pub type Result<T> = std::result::Result<T, Error>;
