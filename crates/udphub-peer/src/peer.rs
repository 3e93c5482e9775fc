// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The peer core: registration, heartbeats, chat, and file transfer over a
//! single ephemeral UDP socket talking to one broker.
//!
//! Like [`udphub_broker::Broker`], this is an explicit object with
//! `bind`/`run`/`stop`, not process-global state, so a test can run several
//! peers against one broker in a single process.

use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use socket2::{Domain, Socket, Type};
use udphub_wire::{
    decode_client_list, decode_file_end, decode_file_start, Packet, PacketType, BROADCAST_ID,
    MAX_FRAME_SIZE,
};

use crate::error::{Error, Result};
use crate::events::PeerEvent;
use crate::inbound::{self, ReceptionMap};
use crate::online_set::OnlineSet;
use crate::outbound::{self, TransferConfig, TransferMap};

/// Default interval between outgoing `HEARTBEAT` frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default directory inbound transfers are reassembled into.
pub const DEFAULT_RECEIVED_DIR: &str = "received_files";

/// Tunable peer parameters (see the configuration expansion in the spec).
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub broker_addr: SocketAddr,
    pub heartbeat_interval: Duration,
    pub poll_timeout: Duration,
    pub received_dir: PathBuf,
    pub transfer: TransferConfig,
}

impl PeerConfig {
    #[must_use]
    pub fn new(broker_addr: SocketAddr) -> Self {
        Self {
            broker_addr,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_timeout: Duration::from_millis(200),
            received_dir: PathBuf::from(DEFAULT_RECEIVED_DIR),
            transfer: TransferConfig::default(),
        }
    }
}

/// One endpoint in the fabric: owns its socket, its view of the online set,
/// and the in-flight inbound/outbound transfer state.
pub struct Peer {
    socket: Arc<UdpSocket>,
    id: String,
    running: Arc<AtomicBool>,
    config: PeerConfig,
    online: Arc<OnlineSet>,
    outbound: TransferMap,
    inbound: Arc<ReceptionMap>,
    next_file_id: Arc<AtomicI32>,
    events: Sender<PeerEvent>,
}

impl Peer {
    /// Bind an ephemeral socket and register `id` with the peer's view of
    /// the fabric, without yet announcing itself to the broker. Call
    /// [`Peer::run`] to send `REGISTER` and start serving.
    pub fn bind(id: impl Into<String>, config: PeerConfig) -> Result<(Self, Receiver<PeerEvent>)> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(Error::BindFailed)?;
        let bind_addr: SocketAddr = "0.0.0.0:0".parse().expect("valid bind address");
        socket2.bind(&bind_addr.into()).map_err(Error::BindFailed)?;
        socket2
            .set_read_timeout(Some(config.poll_timeout))
            .map_err(Error::BindFailed)?;
        let socket: UdpSocket = socket2.into();

        let (tx, rx) = mpsc::channel();
        let peer = Self {
            socket: Arc::new(socket),
            id: id.into(),
            running: Arc::new(AtomicBool::new(true)),
            config,
            online: Arc::new(OnlineSet::new()),
            outbound: Arc::new(DashMap::new()),
            inbound: Arc::new(ReceptionMap::new()),
            next_file_id: Arc::new(AtomicI32::new(1)),
            events: tx,
        };
        Ok((peer, rx))
    }

    /// Local address the peer's socket is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn online_peers(&self) -> Vec<String> {
        self.online.snapshot()
    }

    /// Administrative surface: a point-in-time view of every outbound
    /// transfer this peer currently has in flight.
    #[must_use]
    pub fn outbound_transfers_snapshot(&self) -> Vec<outbound::OutboundTransferSnapshot> {
        outbound::snapshot(&self.outbound)
    }

    /// Administrative surface: a point-in-time view of every inbound
    /// reception this peer currently has open.
    #[must_use]
    pub fn inbound_transfers_snapshot(&self) -> Vec<inbound::InboundTransferSnapshot> {
        inbound::snapshot(&self.inbound)
    }

    /// Signal a running receive loop to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// A cheaply cloneable handle that can call [`Peer::stop`]'s effect from
    /// another thread while `run` blocks the thread that owns the `Peer`.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Send `REGISTER`, start the heartbeat emitter, and block running the
    /// receive loop until [`Peer::stop`] is called from another thread.
    pub fn run(&self) -> Result<()> {
        self.send_register()?;

        let socket = Arc::clone(&self.socket);
        let broker_addr = self.config.broker_addr;
        let id = self.id.clone();
        let running = Arc::clone(&self.running);
        let interval = self.config.heartbeat_interval;
        std::thread::Builder::new()
            .name("udphub-heartbeat".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let hb = Packet::new(PacketType::Heartbeat, &id, "SERVER", Vec::new());
                    let _ = socket.send_to(&hb.encode(), broker_addr);
                    std::thread::sleep(interval);
                }
            })
            .expect("failed to spawn heartbeat thread");

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        while self.running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, src)) => self.handle_datagram(&buf[..len], src),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    log::warn!("[peer:{}] receive error: {e}", self.id);
                    continue;
                }
            }
        }

        log::info!("[peer:{}] receive loop stopped", self.id);
        Ok(())
    }

    fn send_register(&self) -> Result<()> {
        let register = Packet::new(PacketType::Register, &self.id, "SERVER", Vec::new());
        self.socket
            .send_to(&register.encode(), self.config.broker_addr)
            .map_err(Error::Io)?;
        Ok(())
    }

    fn handle_datagram(&self, bytes: &[u8], _src: SocketAddr) {
        let packet = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("[peer:{}] dropped malformed frame: {e}", self.id);
                return;
            }
        };

        match packet.packet_type {
            PacketType::Msg => {
                let text = String::from_utf8_lossy(&packet.payload).into_owned();
                self.emit(PeerEvent::Message {
                    sender_id: packet.sender_id,
                    text,
                });
            }
            PacketType::FileStart => {
                let Ok((filename, total_size)) = decode_file_start(&packet.payload) else {
                    log::warn!("[peer:{}] malformed FILE_START", self.id);
                    return;
                };
                inbound::on_file_start(
                    &self.inbound,
                    &packet.sender_id,
                    packet.file_id,
                    filename.clone(),
                    total_size,
                );
                self.emit(PeerEvent::FileStart {
                    sender_id: packet.sender_id,
                    file_id: packet.file_id,
                    filename,
                    size: total_size,
                });
            }
            PacketType::FileChunk => {
                if let Some((bytes_received, total_size)) = inbound::on_file_chunk(
                    &self.inbound,
                    &packet.sender_id,
                    packet.file_id,
                    packet.sequence_number,
                    packet.payload,
                ) {
                    self.emit(PeerEvent::FileProgress {
                        sender_id: packet.sender_id,
                        file_id: packet.file_id,
                        bytes_received,
                        total_size,
                    });
                }
            }
            PacketType::FileEnd => {
                let Ok(total_chunks) = decode_file_end(&packet.payload) else {
                    log::warn!("[peer:{}] malformed FILE_END", self.id);
                    return;
                };
                match inbound::on_file_end(
                    &self.inbound,
                    &packet.sender_id,
                    packet.file_id,
                    total_chunks,
                    &self.config.received_dir,
                ) {
                    Ok(saved_path) => self.emit(PeerEvent::FileComplete {
                        sender_id: packet.sender_id,
                        file_id: packet.file_id,
                        saved_path,
                    }),
                    Err(Error::UnknownTransfer { sender_id, file_id }) => {
                        log::debug!(
                            "[peer:{}] dropped FILE_END for unknown transfer sender={sender_id} file_id={file_id}",
                            self.id
                        );
                    }
                    Err(e) => self.emit(PeerEvent::FileFailed {
                        sender_id: packet.sender_id,
                        file_id: packet.file_id,
                        reason: e.to_string(),
                    }),
                }
            }
            PacketType::ClientList => {
                let ids = decode_client_list(&packet.payload);
                self.online.replace(ids, &self.id);
                self.emit(PeerEvent::PeerList(self.online.snapshot()));
            }
            PacketType::FileAck => {
                if let Some(handle) = self.outbound.get(&packet.file_id) {
                    handle.ack_set.insert(packet.sequence_number);
                }
            }
            PacketType::Ack => {
                log::debug!("[peer:{}] registration acknowledged", self.id);
            }
            PacketType::Register | PacketType::Heartbeat => {
                log::debug!(
                    "[peer:{}] dropped peer-originated type {:?} from relay",
                    self.id,
                    packet.packet_type
                );
            }
        }
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    /// Broadcast a chat message to every other registered peer.
    pub fn send_message(&self, text: &str) -> Result<()> {
        self.send_message_to(BROADCAST_ID, text)
    }

    /// Send a chat message to one recipient (or [`BROADCAST_ID`]).
    pub fn send_message_to(&self, recipient_id: &str, text: &str) -> Result<()> {
        let packet = Packet::new(PacketType::Msg, &self.id, recipient_id, text.as_bytes().to_vec());
        self.socket
            .send_to(&packet.encode(), self.config.broker_addr)
            .map_err(Error::Io)?;
        Ok(())
    }

    /// Read `path` synchronously and, if it exists, spawn the transient
    /// outbound transfer task. Returns the assigned `file_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] without emitting any frame if `path`
    /// cannot be read.
    pub fn send_file(&self, path: &Path, recipient_id: &str) -> Result<i32> {
        let (filename, total_size, segments) = outbound::prepare_segments(path)?;
        let file_id = self.next_file_id.fetch_add(1, Ordering::Relaxed);

        outbound::spawn_outbound_transfer(
            Arc::clone(&self.socket),
            self.config.broker_addr,
            self.id.clone(),
            recipient_id.to_string(),
            file_id,
            filename,
            total_size,
            segments,
            Arc::clone(&self.outbound),
            self.config.transfer,
        );

        Ok(file_id)
    }
}

/// Cloneable shutdown trigger for a [`Peer`], safe to hand to a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
