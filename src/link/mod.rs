//! Public link handle.
//!
//! [`Link`] wraps the ABM state machine behind one mutex and one
//! condition variable. It is driven by at most two concurrent actors,
//! one per direction: a receive pump feeding bytes in (`on_rx_data` /
//! `run_rx`) and a transmit pump pulling bytes out (`get_tx_data` /
//! `run_tx`). Blocking sends wait on the condition variable for window
//! space; `close` wakes every waiter.

mod machine;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::types::{CrcType, LinkStats, LinkStatus};

use machine::Machine;

/// Bytes moved per pump iteration by `run_tx` / `run_rx`.
const PUMP_CHUNK: usize = 4;

/// Callback receiving a payload slice.
pub type FrameCallback = Box<dyn FnMut(&[u8]) + Send>;

/// User callbacks, invoked with no internal lock held.
///
/// `on_frame` fires from the receive context for every in-order payload.
/// `on_sent` fires from the transmit context when an information frame
/// has been fully emitted to the wire. Neither may call back into the
/// same link's mutating API from within the callback.
#[derive(Default)]
pub struct Callbacks {
    pub on_frame: Option<FrameCallback>,
    pub on_sent: Option<FrameCallback>,
}

impl Callbacks {
    /// Register a delivery callback.
    pub fn on_frame(mut self, cb: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_frame = Some(Box::new(cb));
        self
    }

    /// Register a sent-notification callback.
    pub fn on_sent(mut self, cb: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_sent = Some(Box::new(cb));
        self
    }
}

struct Inner {
    machine: Mutex<Machine>,
    space: Condvar,
    on_frame: Mutex<Option<FrameCallback>>,
    on_sent: Mutex<Option<FrameCallback>>,
    send_timeout: Duration,
}

/// Handle to one endpoint of a full-duplex frame link.
///
/// Clones share the same endpoint; clone the handle to drive receive
/// and transmit from different threads.
#[derive(Clone)]
pub struct Link {
    inner: Arc<Inner>,
}

impl Link {
    /// Create a link from a validated configuration.
    pub fn init(config: LinkConfig, callbacks: Callbacks) -> Result<Self> {
        let machine = Machine::new(&config, Instant::now())?;
        debug!(
            mtu = machine.mtu(),
            window = config.window_frames,
            crc = %config.crc_type,
            "link initialized"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                machine: Mutex::new(machine),
                space: Condvar::new(),
                on_frame: Mutex::new(callbacks.on_frame),
                on_sent: Mutex::new(callbacks.on_sent),
                send_timeout: config.send_timeout(),
            }),
        })
    }

    /// Initiate connection establishment (SABM handshake).
    pub fn connect(&self) -> Result<()> {
        let mut machine = self.inner.machine.lock();
        if machine.is_closed() {
            return Err(Error::Closed);
        }
        machine.connect(Instant::now());
        Ok(())
    }

    /// Request an orderly disconnect. Returns once DISC is queued.
    pub fn disconnect(&self) -> Result<()> {
        let mut machine = self.inner.machine.lock();
        if machine.is_closed() {
            return Err(Error::Closed);
        }
        machine.disconnect(Instant::now());
        Ok(())
    }

    /// Current link status.
    pub fn get_status(&self) -> LinkStatus {
        self.inner.machine.lock().status()
    }

    /// Maximum payload accepted by [`send_packet`](Self::send_packet).
    pub fn get_mtu(&self) -> usize {
        self.inner.machine.lock().mtu()
    }

    /// Traffic statistics snapshot.
    pub fn stats(&self) -> LinkStats {
        self.inner.machine.lock().stats
    }

    /// Adjust the keep-alive period; zero disables keep-alive.
    pub fn set_keep_alive(&self, timeout: Duration) {
        self.inner.machine.lock().set_keep_alive(timeout);
    }

    /// Enqueue one payload for reliable in-order delivery.
    ///
    /// Blocks up to the configured send timeout when the transmit
    /// window is full. The payload is copied into a window slot; return
    /// means enqueued, not yet acknowledged.
    pub fn send_packet(&self, buf: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.inner.send_timeout;
        let mut machine = self.inner.machine.lock();

        if buf.len() > machine.mtu() {
            return Err(Error::DataTooLarge {
                size: buf.len(),
                max: machine.mtu(),
            });
        }

        loop {
            if machine.is_closed() {
                return Err(Error::Closed);
            }
            if machine.is_failed() {
                return Err(Error::ConnectionLost);
            }
            if machine.can_enqueue() {
                machine.enqueue(buf);
                return Ok(());
            }
            if self
                .inner
                .space
                .wait_until(&mut machine, deadline)
                .timed_out()
            {
                // Last chance: an ack may have raced the deadline
                if !machine.is_closed() && !machine.is_failed() && machine.can_enqueue() {
                    machine.enqueue(buf);
                    return Ok(());
                }
                return Err(Error::Timeout);
            }
        }
    }

    /// Send an arbitrarily long buffer, fragmenting to the MTU.
    ///
    /// Returns the number of bytes actually enqueued; a timeout or a
    /// link failure stops fragmentation early.
    pub fn send(&self, buf: &[u8]) -> usize {
        let mtu = {
            let machine = self.inner.machine.lock();
            machine.mtu()
        };

        let mut enqueued = 0;
        for chunk in buf.chunks(mtu) {
            match self.send_packet(chunk) {
                Ok(()) => enqueued += chunk.len(),
                Err(_) => break,
            }
        }
        enqueued
    }

    /// Fill `buf` with outgoing wire bytes.
    ///
    /// Drives the transmit side of the state machine: retransmissions,
    /// supervisory responses, fresh I-frames and keep-alive all
    /// originate here. Returns the number of bytes written.
    pub fn get_tx_data(&self, buf: &mut [u8]) -> usize {
        let mut sent_payload: Option<Vec<u8>> = None;
        let (written, wake) = {
            let mut machine = self.inner.machine.lock();
            let out = machine.pull(buf, Instant::now());
            if out.sent_information && self.inner.on_sent.lock().is_some() {
                sent_payload = Some(machine.sent_payload.clone());
            }
            (out.written, out.wake)
        };

        if wake {
            self.inner.space.notify_all();
        }
        if let Some(payload) = sent_payload {
            if let Some(cb) = self.inner.on_sent.lock().as_mut() {
                cb(&payload);
            }
        }
        written
    }

    /// Process received wire bytes. Never fails; corrupt input only
    /// affects protocol state and statistics.
    pub fn on_rx_data(&self, data: &[u8]) {
        let mut rest = data;
        while !rest.is_empty() {
            let mut delivered: Option<Vec<u8>> = None;
            let wake = {
                let mut machine = self.inner.machine.lock();
                let out = machine.feed(rest, Instant::now());
                rest = &rest[out.consumed..];
                if out.delivered && self.inner.on_frame.lock().is_some() {
                    delivered = Some(machine.delivery.clone());
                }
                out.wake
            };

            if wake {
                self.inner.space.notify_all();
            }
            if let Some(payload) = delivered {
                if let Some(cb) = self.inner.on_frame.lock().as_mut() {
                    cb(&payload);
                }
            }
        }
    }

    /// Transmit pump: generate up to a few bytes and push them through
    /// the user write callback until accepted.
    ///
    /// Returns the number of bytes handed to the transport in this
    /// invocation; applications call this in a loop.
    pub fn run_tx<W>(&self, write: &mut W) -> io::Result<usize>
    where
        W: FnMut(&[u8]) -> io::Result<usize>,
    {
        let mut chunk = [0u8; PUMP_CHUNK];
        let n = self.get_tx_data(&mut chunk);

        let mut sent = 0;
        while sent < n {
            match write(&chunk[sent..n]) {
                Ok(0) => break,
                Ok(k) => sent += k,
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    /// Receive pump: read up to a few bytes from the user read callback
    /// and process them.
    ///
    /// Returns the number of bytes received in this invocation; a zero
    /// return means the transport had nothing available.
    pub fn run_rx<R>(&self, read: &mut R) -> io::Result<usize>
    where
        R: FnMut(&mut [u8]) -> io::Result<usize>,
    {
        let mut chunk = [0u8; PUMP_CHUNK];
        let n = read(&mut chunk)?;
        if n > 0 {
            self.on_rx_data(&chunk[..n]);
        }
        Ok(n)
    }

    /// Shut the link down.
    ///
    /// Idempotent. Blocked senders wake with
    /// [`Error::Closed`](crate::Error::Closed); buffered frames are
    /// dropped. The handle cannot be reused afterwards.
    pub fn close(&self) {
        {
            let mut machine = self.inner.machine.lock();
            machine.close();
        }
        self.inner.space.notify_all();
    }
}

/// Exact internal working-set size for a link, assuming CRC-16.
pub fn buffer_size_by_mtu(mtu: usize, window: usize) -> usize {
    buffer_size_by_mtu_ex(mtu, window, CrcType::Crc16)
}

/// Exact internal working-set size for a link.
///
/// Covers the window payload slots, encoder and decoder staging for one
/// maximum-size frame each, and the two callback scratch buffers.
pub fn buffer_size_by_mtu_ex(mtu: usize, window: usize, crc_type: CrcType) -> usize {
    window * mtu + 2 * (2 + mtu + crc_type.resolve().width()) + 2 * mtu
}
