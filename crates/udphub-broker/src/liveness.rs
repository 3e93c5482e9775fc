// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveness sweeper - periodically evicts peers that have gone quiet.
//!
//! Background thread wakes every `sweep_interval` and removes any registry
//! entry whose `last_seen` exceeds `liveness_window`. On eviction it invokes
//! `on_evicted` so the caller can broadcast a fresh `CLIENT_LIST`.

use crate::registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default interval between liveness sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// Default maximum silence tolerated before a peer is evicted.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(15);

/// Owns the background liveness thread and its graceful shutdown.
pub struct LivenessSweeper {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessSweeper {
    /// Spawn the sweeper thread.
    pub fn start<F>(
        registry: Arc<Registry>,
        sweep_interval: Duration,
        liveness_window: Duration,
        mut on_evicted: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut(&[String]) + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = Arc::clone(&stop_flag);

        let handle = thread::Builder::new()
            .name("udphub-liveness".to_string())
            .spawn(move || {
                while !stop_flag_clone.load(Ordering::Relaxed) {
                    thread::sleep(sweep_interval);
                    let evicted = registry.remove_expired(liveness_window);
                    if !evicted.is_empty() {
                        log::info!("[broker] liveness sweep evicted {} peer(s): {:?}", evicted.len(), evicted);
                        on_evicted(&evicted);
                    }
                }
            })?;

        Ok(Self {
            stop_flag,
            handle: Some(handle),
        })
    }

    /// Signal the sweeper to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LivenessSweeper {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn evicts_stale_peer_and_reports_it() {
        let registry = Arc::new(Registry::new());
        registry.register("stale", addr(1));

        let evicted_ids: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let evicted_ids_clone = Arc::clone(&evicted_ids);

        let sweeper = LivenessSweeper::start(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_millis(10),
            move |ids| evicted_ids_clone.lock().unwrap().extend_from_slice(ids),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        sweeper.stop();

        assert!(registry.is_empty());
        assert_eq!(evicted_ids.lock().unwrap().as_slice(), ["stale".to_string()]);
    }

    #[test]
    fn retains_active_peer() {
        let registry = Arc::new(Registry::new());
        registry.register("active", addr(1));

        let sweeper = LivenessSweeper::start(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_secs(10),
            |_ids| {},
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        sweeper.stop();

        assert_eq!(registry.len(), 1);
    }
}
