// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios driving a real broker plus several real peers over
//! loopback UDP with ephemeral ports, matching the corpus's own protocol-level
//! `tests/*.rs` integration style.

use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use udphub_broker::{Broker, BrokerConfig};
use udphub_peer::{Peer, PeerConfig, PeerEvent};

struct RunningBroker {
    addr: SocketAddr,
    stop: udphub_broker::StopHandle,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for RunningBroker {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn start_broker(config: BrokerConfig) -> RunningBroker {
    let mut broker = Broker::bind(config).expect("broker bind");
    let addr = broker.local_addr().expect("broker local addr");
    let stop = broker.stop_handle();
    let handle = thread::spawn(move || broker.run().expect("broker run"));
    RunningBroker {
        addr,
        stop,
        handle: Some(handle),
    }
}

struct RunningPeer {
    peer: Arc<Peer>,
    events: Receiver<PeerEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for RunningPeer {
    fn drop(&mut self) {
        self.peer.stop();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn start_peer_with(id: &str, broker_addr: SocketAddr, configure: impl FnOnce(&mut PeerConfig)) -> RunningPeer {
    let mut config = PeerConfig::new(broker_addr);
    config.heartbeat_interval = Duration::from_millis(100);
    configure(&mut config);
    let (peer, events) = Peer::bind(id, config).expect("peer bind");
    let peer = Arc::new(peer);
    let handle = {
        let peer = Arc::clone(&peer);
        thread::spawn(move || peer.run().expect("peer run"))
    };
    RunningPeer {
        peer,
        events,
        handle: Some(handle),
    }
}

fn start_peer(id: &str, broker_addr: SocketAddr, received_dir: &std::path::Path) -> RunningPeer {
    let dir = received_dir.to_path_buf();
    start_peer_with(id, broker_addr, |config| config.received_dir = dir)
}

/// Wait for `peer`'s online set (excluding itself) to equal `expected`,
/// draining whatever events arrive in the meantime.
fn wait_for_peer_list(peer: &RunningPeer, expected: &[&str], timeout: Duration) {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let mut online = peer.peer.online_peers();
        online.sort();
        let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        want.sort();
        if online == want {
            return;
        }
        if std::time::Instant::now() >= deadline {
            panic!("timed out waiting for online set {expected:?}, last saw {online:?}");
        }
        let _ = peer.events.recv_timeout(Duration::from_millis(50));
    }
}

fn drain_until<F>(events: &Receiver<PeerEvent>, timeout: Duration, mut pred: F) -> Option<PeerEvent>
where
    F: FnMut(&PeerEvent) -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match events.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn assert_no_event_matching<F>(events: &Receiver<PeerEvent>, timeout: Duration, pred: F)
where
    F: Fn(&PeerEvent) -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match events.recv_timeout(remaining) {
            Ok(event) => assert!(!pred(&event), "unexpected event: {event:?}"),
            Err(_) => return,
        }
    }
}

#[test]
fn broadcast_chat_reaches_every_other_peer_exactly_once() {
    let broker = start_broker(BrokerConfig {
        port: 0,
        ..BrokerConfig::default()
    });
    let dir = tempfile::tempdir().unwrap();

    let a = start_peer("A", broker.addr, dir.path());
    let b = start_peer("B", broker.addr, dir.path());
    let c = start_peer("C", broker.addr, dir.path());

    wait_for_peer_list(&a, &["B", "C"], Duration::from_secs(2));
    wait_for_peer_list(&b, &["A", "C"], Duration::from_secs(2));
    wait_for_peer_list(&c, &["A", "B"], Duration::from_secs(2));

    a.peer.send_message("hi").unwrap();

    let got_b = drain_until(&b.events, Duration::from_secs(1), |e| {
        matches!(e, PeerEvent::Message { sender_id, text } if sender_id == "A" && text == "hi")
    });
    assert!(got_b.is_some(), "B should receive A's broadcast");

    let got_c = drain_until(&c.events, Duration::from_secs(1), |e| {
        matches!(e, PeerEvent::Message { sender_id, text } if sender_id == "A" && text == "hi")
    });
    assert!(got_c.is_some(), "C should receive A's broadcast");

    assert_no_event_matching(&a.events, Duration::from_millis(200), |e| {
        matches!(e, PeerEvent::Message { .. })
    });
}

#[test]
fn unicast_chat_reaches_only_the_named_recipient() {
    let broker = start_broker(BrokerConfig {
        port: 0,
        ..BrokerConfig::default()
    });
    let dir = tempfile::tempdir().unwrap();

    let a = start_peer("A", broker.addr, dir.path());
    let b = start_peer("B", broker.addr, dir.path());
    let c = start_peer("C", broker.addr, dir.path());

    wait_for_peer_list(&a, &["B", "C"], Duration::from_secs(2));

    a.peer.send_message_to("B", "psst").unwrap();

    let got_b = drain_until(&b.events, Duration::from_secs(1), |e| {
        matches!(e, PeerEvent::Message { sender_id, text } if sender_id == "A" && text == "psst")
    });
    assert!(got_b.is_some(), "B should receive the unicast message");

    assert_no_event_matching(&c.events, Duration::from_millis(200), |e| {
        matches!(e, PeerEvent::Message { .. })
    });
}

#[test]
fn small_file_broadcast_reassembles_byte_identical() {
    let broker = start_broker(BrokerConfig {
        port: 0,
        ..BrokerConfig::default()
    });
    let send_dir = tempfile::tempdir().unwrap();
    let recv_dir_b = tempfile::tempdir().unwrap();
    let recv_dir_c = tempfile::tempdir().unwrap();

    let a = start_peer("A", broker.addr, send_dir.path());
    let b = start_peer("B", broker.addr, recv_dir_b.path());
    let c = start_peer("C", broker.addr, recv_dir_c.path());

    wait_for_peer_list(&a, &["B", "C"], Duration::from_secs(2));

    let payload: Vec<u8> = (0..622u32).map(|i| (i % 256) as u8).collect();
    let file_path = send_dir.path().join("test-file.txt");
    std::fs::write(&file_path, &payload).unwrap();

    a.peer.send_file(&file_path, "ALL").unwrap();

    for (events, dir) in [(&b.events, recv_dir_b.path()), (&c.events, recv_dir_c.path())] {
        let complete = drain_until(events, Duration::from_secs(3), |e| {
            matches!(e, PeerEvent::FileComplete { .. })
        });
        let Some(PeerEvent::FileComplete { saved_path, .. }) = complete else {
            panic!("expected FileComplete");
        };
        assert_eq!(saved_path, dir.join("test-file.txt"));
        assert_eq!(std::fs::read(&saved_path).unwrap(), payload);
    }
}

#[test]
fn multi_chunk_file_reassembles_identically_on_both_receivers() {
    let broker = start_broker(BrokerConfig {
        port: 0,
        ..BrokerConfig::default()
    });
    let send_dir = tempfile::tempdir().unwrap();
    let recv_dir_b = tempfile::tempdir().unwrap();
    let recv_dir_c = tempfile::tempdir().unwrap();

    let a = start_peer("A", broker.addr, send_dir.path());
    let b = start_peer("B", broker.addr, recv_dir_b.path());
    let c = start_peer("C", broker.addr, recv_dir_c.path());

    wait_for_peer_list(&a, &["B", "C"], Duration::from_secs(2));

    let payload = vec![9u8; 3 * 1024];
    let file_path = send_dir.path().join("three-kib.bin");
    std::fs::write(&file_path, &payload).unwrap();

    a.peer.send_file(&file_path, "ALL").unwrap();

    for (events, dir) in [(&b.events, recv_dir_b.path()), (&c.events, recv_dir_c.path())] {
        let complete = drain_until(events, Duration::from_secs(3), |e| {
            matches!(e, PeerEvent::FileComplete { .. })
        });
        let Some(PeerEvent::FileComplete { saved_path, .. }) = complete else {
            panic!("expected FileComplete");
        };
        assert_eq!(saved_path, dir.join("three-kib.bin"));
        assert_eq!(std::fs::read(&saved_path).unwrap(), payload);
    }
}

#[test]
fn empty_file_broadcast_completes_with_zero_chunk_frames() {
    let broker = start_broker(BrokerConfig {
        port: 0,
        ..BrokerConfig::default()
    });
    let send_dir = tempfile::tempdir().unwrap();
    let recv_dir_b = tempfile::tempdir().unwrap();

    let a = start_peer("A", broker.addr, send_dir.path());
    let b = start_peer("B", broker.addr, recv_dir_b.path());

    wait_for_peer_list(&a, &["B"], Duration::from_secs(2));

    let file_path = send_dir.path().join("empty.bin");
    std::fs::write(&file_path, []).unwrap();

    a.peer.send_file(&file_path, "ALL").unwrap();

    let complete = drain_until(&b.events, Duration::from_secs(3), |e| {
        matches!(e, PeerEvent::FileComplete { .. })
    });
    let Some(PeerEvent::FileComplete { saved_path, .. }) = complete else {
        panic!("expected FileComplete");
    };
    assert_eq!(saved_path, recv_dir_b.path().join("empty.bin"));
    assert_eq!(std::fs::read(&saved_path).unwrap(), Vec::<u8>::new());

    assert_no_event_matching(&b.events, Duration::from_millis(200), |e| {
        matches!(e, PeerEvent::FileProgress { .. })
    });
}

#[test]
fn peer_timeout_drops_out_of_the_online_set_after_one_sweep() {
    let broker = start_broker(BrokerConfig {
        port: 0,
        sweep_interval: Duration::from_millis(50),
        liveness_window: Duration::from_millis(150),
        ..BrokerConfig::default()
    });
    let dir = tempfile::tempdir().unwrap();

    let a = start_peer("A", broker.addr, dir.path());
    let b = start_peer("B", broker.addr, dir.path());
    let c = start_peer_with("C", broker.addr, |config| {
        config.received_dir = dir.path().to_path_buf();
        // A heartbeat interval longer than the liveness window simulates C
        // going silent without an explicit stop; C's own receive loop stays
        // up to observe its own eviction via the next CLIENT_LIST.
        config.heartbeat_interval = Duration::from_secs(10);
    });

    wait_for_peer_list(&a, &["B", "C"], Duration::from_secs(2));
    wait_for_peer_list(&b, &["A", "C"], Duration::from_secs(2));

    wait_for_peer_list(&a, &["B"], Duration::from_secs(2));
    wait_for_peer_list(&b, &["A"], Duration::from_secs(2));

    drop(c);
}

#[test]
fn concurrent_transfers_from_different_senders_are_kept_independent() {
    let broker = start_broker(BrokerConfig {
        port: 0,
        ..BrokerConfig::default()
    });
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let dir_c = tempfile::tempdir().unwrap();

    let a = start_peer("A", broker.addr, dir_a.path());
    let b = start_peer("B", broker.addr, dir_b.path());
    let c = start_peer("C", broker.addr, dir_c.path());

    wait_for_peer_list(&a, &["B", "C"], Duration::from_secs(2));
    wait_for_peer_list(&b, &["A", "C"], Duration::from_secs(2));

    let payload_f1 = vec![1u8; 1500];
    let payload_f2 = vec![2u8; 2000];
    let f1_path = dir_a.path().join("f1.bin");
    let f2_path = dir_b.path().join("f2.bin");
    std::fs::write(&f1_path, &payload_f1).unwrap();
    std::fs::write(&f2_path, &payload_f2).unwrap();

    a.peer.send_file(&f1_path, "ALL").unwrap();
    b.peer.send_file(&f2_path, "ALL").unwrap();

    let mut saved: Vec<(String, std::path::PathBuf)> = Vec::new();
    for _ in 0..2 {
        let complete = drain_until(&c.events, Duration::from_secs(3), |e| {
            matches!(e, PeerEvent::FileComplete { .. })
        });
        let Some(PeerEvent::FileComplete {
            sender_id,
            saved_path,
            ..
        }) = complete
        else {
            panic!("expected two FileComplete events");
        };
        saved.push((sender_id, saved_path));
    }

    let from_a = saved.iter().find(|(id, _)| id == "A").expect("missing F1 from A");
    let from_b = saved.iter().find(|(id, _)| id == "B").expect("missing F2 from B");
    assert_eq!(std::fs::read(&from_a.1).unwrap(), payload_f1);
    assert_eq!(std::fs::read(&from_b.1).unwrap(), payload_f2);
}
