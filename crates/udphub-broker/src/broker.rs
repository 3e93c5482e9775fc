// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The broker itself: bind, relay/broadcast engine, liveness wiring.
//!
//! Deliberately an explicit object with `bind`/`run`/`stop`, not
//! process-global state, so tests can instantiate several brokers on
//! distinct ports in one process.

use crate::error::{Error, Result};
use crate::liveness::{LivenessSweeper, DEFAULT_LIVENESS_WINDOW, DEFAULT_SWEEP_INTERVAL};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::{PeerSnapshot, Registry};
use socket2::{Domain, Socket, Type};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use udphub_wire::{DecodeError, Packet, PacketType, BROADCAST_ID, MAX_FRAME_SIZE};

/// Default well-known broker port.
pub const DEFAULT_PORT: u16 = 9876;

/// Tunable broker parameters (see the configuration expansion in the spec).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub port: u16,
    pub sweep_interval: Duration,
    pub liveness_window: Duration,
    /// Socket read timeout used to let the receive loop observe shutdown
    /// without blocking forever on a quiet socket.
    pub poll_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            poll_timeout: Duration::from_millis(200),
        }
    }
}

/// The central relay. Owns the peer registry; never owns peer-side state.
pub struct Broker {
    socket: Arc<UdpSocket>,
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
    running: Arc<AtomicBool>,
    config: BrokerConfig,
    liveness: Option<LivenessSweeper>,
}

impl Broker {
    /// Bind the relay socket. Bind failures are fatal per the error-handling
    /// contract; everything after this point is log-and-continue.
    pub fn bind(config: BrokerConfig) -> Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(Error::BindFailed)?;
        socket2
            .set_reuse_address(true)
            .map_err(Error::BindFailed)?;
        let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.port)
            .parse()
            .expect("valid bind address");
        socket2.bind(&bind_addr.into()).map_err(Error::BindFailed)?;
        socket2
            .set_read_timeout(Some(config.poll_timeout))
            .map_err(Error::BindFailed)?;

        let socket: UdpSocket = socket2.into();
        log::info!("[broker] bound relay socket on {}", socket.local_addr().map_err(Error::Io)?);

        Ok(Self {
            socket: Arc::new(socket),
            registry: Arc::new(Registry::new()),
            metrics: Arc::new(Metrics::new()),
            running: Arc::new(AtomicBool::new(true)),
            config,
            liveness: None,
        })
    }

    /// Local address the relay socket is bound to (useful with `port: 0` in tests).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn registry_snapshot(&self) -> Vec<PeerSnapshot> {
        self.registry.snapshot()
    }

    /// Signal a running receive loop to stop. `run` returns once its current
    /// `poll_timeout` wait elapses.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// A cheaply cloneable handle that can call [`Broker::stop`]'s effect
    /// from another thread (e.g. a Ctrl+C handler) while `run` is blocking
    /// the thread that owns the `Broker` value.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Start the liveness sweeper and block running the receive loop until
    /// [`Broker::stop`] is called from another thread.
    pub fn run(&mut self) -> Result<()> {
        let registry_for_sweep = Arc::clone(&self.registry);
        let socket_for_sweep = Arc::clone(&self.socket);
        let sweep_interval = self.config.sweep_interval;
        let liveness_window = self.config.liveness_window;

        self.liveness = Some(
            LivenessSweeper::start(registry_for_sweep, sweep_interval, liveness_window, {
                let registry = Arc::clone(&self.registry);
                move |_evicted| {
                    broadcast_client_list(&socket_for_sweep, &registry);
                }
            })
            .map_err(Error::Io)?,
        );

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        while self.running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, src)) => self.handle_datagram(&buf[..len], src),
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    log::warn!("[broker] receive error: {e}");
                    continue;
                }
            }
        }

        if let Some(liveness) = self.liveness.take() {
            liveness.stop();
        }
        log::info!("[broker] receive loop stopped");
        Ok(())
    }

    fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        self.metrics.record_received();
        let packet = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                self.metrics.record_dropped();
                log_decode_error(&e, src);
                return;
            }
        };

        let known = self.registry.touch(&packet.sender_id);

        match packet.packet_type {
            PacketType::Register => {
                let is_new = self.registry.register(&packet.sender_id, src);
                log::info!(
                    "[broker] {} peer id={} addr={}",
                    if is_new { "registered" } else { "re-registered" },
                    packet.sender_id,
                    src
                );
                self.ack(&packet.sender_id, src);
                broadcast_client_list(&self.socket, &self.registry);
            }
            PacketType::Heartbeat => {
                if !known {
                    self.registry.register(&packet.sender_id, src);
                    log::info!(
                        "[broker] implicit registration via heartbeat id={} addr={}",
                        packet.sender_id,
                        src
                    );
                    broadcast_client_list(&self.socket, &self.registry);
                }
            }
            PacketType::Msg | PacketType::FileStart | PacketType::FileEnd => {
                self.route(&packet);
            }
            PacketType::FileChunk => {
                self.route(&packet);
                self.file_ack(&packet, src);
            }
            PacketType::FileAck => {
                log::debug!(
                    "[broker] consumed FILE_ACK from {} (file_id={}, seq={})",
                    packet.sender_id,
                    packet.file_id,
                    packet.sequence_number
                );
            }
            PacketType::Ack | PacketType::ClientList => {
                log::debug!(
                    "[broker] dropped broker-originated type {:?} received from {}",
                    packet.packet_type,
                    packet.sender_id
                );
                self.metrics.record_dropped();
            }
        }
    }

    fn route(&self, packet: &Packet) {
        if packet.is_broadcast() {
            let targets = self.registry.all_except(&packet.sender_id);
            let encoded = packet.encode();
            for (_, addr) in &targets {
                let _ = self.socket.send_to(&encoded, addr);
            }
            self.metrics.record_relayed(targets.len() as u64);
        } else {
            match self.registry.lookup(&packet.recipient_id) {
                Some(addr) => {
                    let _ = self.socket.send_to(&packet.encode(), addr);
                    self.metrics.record_relayed(1);
                }
                None => {
                    self.metrics.record_dropped();
                    log::warn!(
                        "[broker] dropped unicast from {} to unknown recipient {}",
                        packet.sender_id,
                        packet.recipient_id
                    );
                }
            }
        }
    }

    fn ack(&self, recipient_id: &str, addr: SocketAddr) {
        let ack = Packet::new(PacketType::Ack, "SERVER", recipient_id, Vec::new());
        let _ = self.socket.send_to(&ack.encode(), addr);
    }

    fn file_ack(&self, packet: &Packet, sender_addr: SocketAddr) {
        let mut ack = Packet::new(PacketType::FileAck, "SERVER", packet.sender_id.clone(), Vec::new());
        ack.sequence_number = packet.sequence_number;
        ack.file_id = packet.file_id;
        let _ = self.socket.send_to(&ack.encode(), sender_addr);
    }
}

/// Cloneable shutdown trigger for a [`Broker`], safe to hand to a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn broadcast_client_list(socket: &UdpSocket, registry: &Registry) {
    let ids = registry.ids();
    let payload = udphub_wire::encode_client_list(&ids);
    let frame = Packet::new(PacketType::ClientList, "SERVER", BROADCAST_ID, payload);
    let encoded = frame.encode();
    for addr in registry.addrs() {
        let _ = socket.send_to(&encoded, addr);
    }
}

fn log_decode_error(err: &DecodeError, src: SocketAddr) {
    log::warn!("[broker] dropped malformed frame from {src}: {err}");
}
