//! Error recovery tests.
//!
//! Behavior of the link under an imperfect transport:
//! - Corrupted bytes are absorbed and counted
//! - Lost frames recover through REJ and retransmission timers
//! - A lossy link still delivers every payload exactly once, in order
//! - Exhausted retries fail the connection and auto-reconnect re-arms it

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use veza::{Callbacks, Link, LinkConfig, LinkStatus};

const RETRY_MS: u64 = 100;

fn config() -> LinkConfig {
    LinkConfig {
        mtu: 64,
        window_frames: 3,
        send_timeout_ms: 200,
        retry_timeout_ms: RETRY_MS,
        retries: 3,
        keep_alive_timeout_ms: 0,
        ..Default::default()
    }
}

fn collector() -> (Arc<Mutex<Vec<Vec<u8>>>>, Callbacks) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let callbacks = Callbacks::default().on_frame(move |payload| {
        sink.lock().push(payload.to_vec());
    });
    (received, callbacks)
}

fn pump(a: &Link, b: &Link) {
    let mut buf = [0u8; 128];
    loop {
        let na = a.get_tx_data(&mut buf);
        if na > 0 {
            b.on_rx_data(&buf[..na]);
        }
        let nb = b.get_tx_data(&mut buf);
        if nb > 0 {
            a.on_rx_data(&buf[..nb]);
        }
        if na == 0 && nb == 0 {
            break;
        }
    }
}

fn connected_pair(callbacks_b: Callbacks) -> (Link, Link) {
    let a = Link::init(config(), Callbacks::default()).unwrap();
    let b = Link::init(config(), callbacks_b).unwrap();
    a.connect().unwrap();
    pump(&a, &b);
    assert_eq!(a.get_status(), LinkStatus::Connected);
    assert_eq!(b.get_status(), LinkStatus::Connected);
    (a, b)
}

/// Split a wire byte stream into complete frames (flag to flag).
///
/// Escape transparency guarantees no raw 0x7E inside a frame, so
/// scanning for flags is enough.
fn split_frames(bytes: &[u8]) -> Vec<Vec<u8>> {
    let flags: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == 0x7E)
        .map(|(i, _)| i)
        .collect();

    let mut frames = Vec::new();
    for pair in flags.windows(2) {
        if pair[1] - pair[0] > 1 {
            frames.push(bytes[pair[0]..=pair[1]].to_vec());
        }
    }
    frames
}

/// Drain everything one side wants to send right now.
fn drain(link: &Link) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut buf = [0u8; 128];
    loop {
        let n = link.get_tx_data(&mut buf);
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&buf[..n]);
    }
    bytes
}

// ============================================================================
// Corruption
// ============================================================================

#[test]
fn test_corrupted_frame_recovers_via_retransmission() {
    let (received, callbacks) = collector();
    let (a, b) = connected_pair(callbacks);

    a.send_packet(b"fragile").unwrap();
    let mut bytes = drain(&a);

    // Flip a payload bit in flight
    bytes[4] ^= 0x20;
    b.on_rx_data(&bytes);
    assert!(received.lock().is_empty());
    assert_eq!(b.stats().crc_errors, 1);

    // The retransmission timer re-sends the frame intact
    thread::sleep(Duration::from_millis(RETRY_MS + 20));
    pump(&a, &b);
    assert_eq!(received.lock().as_slice(), &[b"fragile".to_vec()]);
    assert_eq!(a.stats().retransmissions, 1);
}

#[test]
fn test_garbage_between_frames_ignored() {
    let (received, callbacks) = collector();
    let (a, b) = connected_pair(callbacks);

    b.on_rx_data(&[0x00, 0x55, 0xAA, 0x13, 0x37]);
    a.send_packet(b"after noise").unwrap();
    pump(&a, &b);

    assert_eq!(received.lock().as_slice(), &[b"after noise".to_vec()]);
}

// ============================================================================
// Frame loss and REJ recovery
// ============================================================================

#[test]
fn test_lost_frame_triggers_reject_recovery() {
    let (received, callbacks) = collector();
    let (a, b) = connected_pair(callbacks);

    // Three I-frames; the middle one disappears on the wire
    a.send_packet(b"i0").unwrap();
    a.send_packet(b"i1").unwrap();
    a.send_packet(b"i2").unwrap();
    let frames = split_frames(&drain(&a));
    assert_eq!(frames.len(), 3);

    b.on_rx_data(&frames[0]);
    b.on_rx_data(&frames[2]); // frame 1 lost

    // B delivers only i0 and answers with REJ(1); A retransmits
    assert_eq!(received.lock().as_slice(), &[b"i0".to_vec()]);
    pump(&a, &b);

    assert_eq!(
        received.lock().as_slice(),
        &[b"i0".to_vec(), b"i1".to_vec(), b"i2".to_vec()]
    );
    assert_eq!(b.stats().rejects_sent, 1);
    assert_eq!(a.stats().rejects_received, 1);
    assert!(a.stats().retransmissions >= 2);
}

#[test]
fn test_lossy_link_delivers_exactly_once_in_order() {
    let mut rng = StdRng::seed_from_u64(42);
    let (received, callbacks) = collector();

    // A deep retry budget keeps a 30% frame-loss run from ever
    // exhausting a frame and resetting the session.
    let cfg = LinkConfig {
        retries: 10,
        ..config()
    };
    let a = Link::init(cfg.clone(), Callbacks::default()).unwrap();
    let b = Link::init(cfg, callbacks).unwrap();
    a.connect().unwrap();
    pump(&a, &b);

    let payloads: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i, i ^ 0xFF]).collect();
    for payload in &payloads {
        // Sends may time out while the window is clogged with losses;
        // keep retrying like a real application would.
        loop {
            match a.send_packet(payload) {
                Ok(()) => break,
                Err(veza::Error::Timeout) => {}
                Err(e) => panic!("send failed: {e}"),
            }
            exchange_lossy(&a, &b, &mut rng, 0.3);
        }
        exchange_lossy(&a, &b, &mut rng, 0.3);
    }

    // Let the timers flush out whatever is still pending, loss-free
    let deadline = Instant::now() + Duration::from_secs(10);
    while received.lock().len() < payloads.len() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(RETRY_MS / 2));
        pump(&a, &b);
    }

    assert_eq!(*received.lock(), payloads);
}

/// One round of bidirectional exchange dropping whole frames at the
/// given probability.
fn exchange_lossy(a: &Link, b: &Link, rng: &mut StdRng, loss: f64) {
    for _ in 0..4 {
        for frame in split_frames(&drain(a)) {
            if rng.gen_bool(1.0 - loss) {
                b.on_rx_data(&frame);
            }
        }
        for frame in split_frames(&drain(b)) {
            if rng.gen_bool(1.0 - loss) {
                a.on_rx_data(&frame);
            }
        }
    }
}

// ============================================================================
// Connection loss
// ============================================================================

#[test]
fn test_retries_exhausted_reports_failed() {
    let cfg = LinkConfig {
        auto_reconnect: false,
        ..config()
    };
    let a = Link::init(cfg, Callbacks::default()).unwrap();
    let b = Link::init(config(), Callbacks::default()).unwrap();
    a.connect().unwrap();
    pump(&a, &b);

    // Peer goes silent; the frame retransmits until the budget is gone
    a.send_packet(b"into the void").unwrap();
    let _ = drain(&a);

    let deadline = Instant::now() + Duration::from_secs(5);
    while a.get_status() != LinkStatus::Failed && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(RETRY_MS / 2));
        let _ = drain(&a);
    }

    assert_eq!(a.get_status(), LinkStatus::Failed);
    assert!(matches!(
        a.send_packet(b"more"),
        Err(veza::Error::ConnectionLost)
    ));
    assert_eq!(a.stats().retransmissions, 3);
    assert_eq!(a.stats().connection_losses, 1);
}

#[test]
fn test_auto_reconnect_restores_the_link() {
    let (received, callbacks) = collector();
    let (a, b) = connected_pair(callbacks);

    // Lose the connection by silencing the peer
    a.send_packet(b"lost").unwrap();
    let _ = drain(&a);
    let deadline = Instant::now() + Duration::from_secs(5);
    while a.get_status() != LinkStatus::Failed && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(RETRY_MS / 2));
        let _ = drain(&a);
    }
    assert_eq!(a.get_status(), LinkStatus::Failed);

    // Reconnect the wire; the re-armed SABM re-establishes the link
    let deadline = Instant::now() + Duration::from_secs(5);
    while a.get_status() != LinkStatus::Connected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(RETRY_MS / 2));
        pump(&a, &b);
    }
    assert_eq!(a.get_status(), LinkStatus::Connected);

    // Traffic flows again on the fresh session
    a.send_packet(b"revived").unwrap();
    pump(&a, &b);
    assert_eq!(received.lock().last().unwrap().as_slice(), b"revived");
}

#[test]
fn test_status_failed_until_reconnected() {
    let cfg = LinkConfig {
        auto_reconnect: true,
        ..config()
    };
    let a = Link::init(cfg, Callbacks::default()).unwrap();
    let b = Link::init(config(), Callbacks::default()).unwrap();
    a.connect().unwrap();
    pump(&a, &b);

    a.send_packet(b"doomed").unwrap();
    let _ = drain(&a);
    let deadline = Instant::now() + Duration::from_secs(5);
    while a.get_status() != LinkStatus::Failed && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(RETRY_MS / 2));
        let _ = drain(&a);
    }

    // Still failed while the SABM goes unanswered
    thread::sleep(Duration::from_millis(RETRY_MS));
    let _ = drain(&a);
    assert_eq!(a.get_status(), LinkStatus::Failed);
}
