//! ABM state machine.
//!
//! The machine owns every piece of protocol state for one endpoint:
//! connection lifecycle, the receive variable V(R), the transmit window,
//! response bookkeeping (piggyback acks, REJ recovery, P/F answers),
//! unnumbered command retries and keep-alive. It is driven from exactly
//! two entry points: `feed` with received bytes and `pull` with an
//! output buffer to fill. All deadlines are compared against a caller
//! supplied clock so tests can run on injected time.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::LinkConfig;
use crate::error::{FrameError, Result};
use crate::frame::{
    Control, Decoded, FrameDecoder, FrameEncoder, SupervisoryKind, UnnumberedKind, ADDRESS,
};
use crate::types::{ConnectionState, CrcType, LinkStats, LinkStatus, SequenceNumber};
use crate::window::FrameWindow;

/// Unnumbered command awaiting its UA, with retry state.
#[derive(Debug)]
struct PendingCommand {
    kind: UnnumberedKind,
    retries_left: u8,
    next_at: Instant,
    sent_once: bool,
}

/// What the encoder is currently emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxKind {
    Information,
    Supervisory,
    Unnumbered,
}

/// Result of feeding received bytes.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RxOutcome {
    /// Bytes consumed from the input slice.
    pub consumed: usize,
    /// An in-order payload is available in the delivery scratch.
    pub delivered: bool,
    /// Window space, lifecycle or failure changed; wake blocked senders.
    pub wake: bool,
}

/// Result of pulling transmit bytes.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TxOutcome {
    /// Bytes written to the output buffer.
    pub written: usize,
    /// An information frame was fully emitted; its payload is in the
    /// sent scratch.
    pub sent_information: bool,
    /// Lifecycle changed during timer processing; wake blocked senders.
    pub wake: bool,
}

pub(crate) struct Machine {
    // resolved configuration
    mtu: usize,
    retries: u8,
    retry_timeout: Duration,
    keep_alive: Option<Duration>,
    auto_reconnect: bool,

    // lifecycle
    state: ConnectionState,
    failed: bool,
    closed: bool,
    user_disconnected: bool,

    // receive side
    vr: SequenceNumber,
    reject_pending: bool,
    reject_to_send: bool,
    final_due: bool,
    ack_due: bool,
    peer_rnr: bool,

    // transmit side
    window: FrameWindow,
    command: Option<PendingCommand>,
    ua_reply: Option<bool>,
    tx_kind: Option<TxKind>,
    last_tx: Instant,

    // codec
    decoder: FrameDecoder,
    encoder: FrameEncoder,

    // scratch buffers handed out for callback invocation
    pub(crate) delivery: Vec<u8>,
    pub(crate) sent_payload: Vec<u8>,

    pub(crate) stats: LinkStats,
}

impl Machine {
    pub fn new(config: &LinkConfig, now: Instant) -> Result<Self> {
        config.validate()?;
        let mtu = config.effective_mtu()?;
        let crc_type: CrcType = config.crc_type.resolve();

        Ok(Self {
            mtu,
            retries: config.retries,
            retry_timeout: config.effective_retry_timeout(),
            keep_alive: config.keep_alive_timeout(),
            auto_reconnect: config.auto_reconnect,
            state: ConnectionState::Disconnected,
            failed: false,
            closed: false,
            user_disconnected: false,
            vr: SequenceNumber::ZERO,
            reject_pending: false,
            reject_to_send: false,
            final_due: false,
            ack_due: false,
            peer_rnr: false,
            window: FrameWindow::new(config.window_frames, mtu),
            command: None,
            ua_reply: None,
            tx_kind: None,
            last_tx: now,
            decoder: FrameDecoder::new(crc_type, mtu),
            encoder: FrameEncoder::new(crc_type, mtu),
            delivery: Vec::with_capacity(mtu),
            sent_payload: Vec::with_capacity(mtu),
            stats: LinkStats::default(),
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> LinkStatus {
        if self.closed || self.failed {
            LinkStatus::Failed
        } else if self.state.is_established() {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }

    pub fn set_keep_alive(&mut self, timeout: Duration) {
        self.keep_alive = if timeout.is_zero() { None } else { Some(timeout) };
    }

    /// Initiate connection establishment.
    pub fn connect(&mut self, now: Instant) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        debug!("connecting");
        self.user_disconnected = false;
        self.state = ConnectionState::Connecting;
        self.command = Some(PendingCommand {
            kind: UnnumberedKind::Sabm,
            retries_left: self.retries,
            next_at: now,
            sent_once: false,
        });
    }

    /// Request an orderly disconnect; DISC is sent, UA completes it.
    pub fn disconnect(&mut self, now: Instant) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return;
        }
        debug!("disconnecting");
        self.user_disconnected = true;
        self.state = ConnectionState::Disconnecting;
        self.command = Some(PendingCommand {
            kind: UnnumberedKind::Disc,
            retries_left: self.retries,
            next_at: now,
            sent_once: false,
        });
    }

    /// Stop the machine. Idempotent; everything buffered is dropped.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!("closing link");
        self.closed = true;
        self.state = ConnectionState::Disconnected;
        self.command = None;
        self.ua_reply = None;
        self.window.clear();
        self.decoder.reset();
        self.encoder.reset();
    }

    /// True when a payload can be accepted into the window right now.
    pub fn can_enqueue(&self) -> bool {
        !self.window.is_full()
    }

    /// Accept a payload into the transmit window.
    ///
    /// Callers must have verified `can_enqueue` under the same lock.
    pub fn enqueue(&mut self, payload: &[u8]) -> SequenceNumber {
        let seq = self.window.push(payload, self.retries);
        trace!(seq = seq.value(), len = payload.len(), "payload queued");
        seq
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Consume received bytes until one frame is processed or the input
    /// is exhausted. Callers loop on `consumed`.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> RxOutcome {
        let mut out = RxOutcome::default();
        if self.closed {
            out.consumed = data.len();
            return out;
        }

        let (consumed, event) = self.decoder.feed(data);
        out.consumed = consumed;

        match event {
            None => {}
            Some(Decoded::Discarded(e)) => {
                if e == FrameError::ChecksumMismatch {
                    self.stats.crc_errors += 1;
                }
                debug!("discarded corrupt frame: {e}");
            }
            Some(Decoded::Frame) => {
                let (address, control_byte, payload) = self.decoder.frame();
                if address != ADDRESS {
                    debug!(address, "dropping frame with foreign address");
                    return out;
                }
                let control = match Control::decode(control_byte) {
                    Ok(control) => control,
                    Err(e) => {
                        debug!("ignoring frame: {e}");
                        return out;
                    }
                };
                // Stage the payload before the decoder buffer is reused
                self.delivery.clear();
                self.delivery.extend_from_slice(payload);
                self.stats.frames_received += 1;
                self.handle_frame(control, now, &mut out);
            }
        }

        out
    }

    fn handle_frame(&mut self, control: Control, now: Instant, out: &mut RxOutcome) {
        trace!(?control, "frame received");
        match control {
            Control::Information { ns, nr, poll } => self.on_information(ns, nr, poll, out),
            Control::Supervisory { kind, nr, poll } => self.on_supervisory(kind, nr, poll, out),
            Control::Unnumbered { kind, poll } => self.on_unnumbered(kind, poll, now, out),
        }
    }

    fn on_information(
        &mut self,
        ns: SequenceNumber,
        nr: SequenceNumber,
        poll: bool,
        out: &mut RxOutcome,
    ) {
        if !self.state.is_established() {
            trace!("I-frame ignored outside Connected");
            return;
        }

        self.process_ack(nr, out);
        if poll {
            self.final_due = true;
        }

        if ns == self.vr {
            self.vr = self.vr.next();
            self.reject_pending = false;
            self.ack_due = true;
            self.stats.payloads_delivered += 1;
            out.delivered = true;
        } else {
            trace!(
                got = ns.value(),
                expected = self.vr.value(),
                "out-of-sequence I-frame"
            );
            if !self.reject_pending {
                self.reject_pending = true;
                self.reject_to_send = true;
            }
        }
    }

    fn on_supervisory(
        &mut self,
        kind: SupervisoryKind,
        nr: SequenceNumber,
        poll: bool,
        out: &mut RxOutcome,
    ) {
        if !self.state.is_established() {
            return;
        }

        self.process_ack(nr, out);
        match kind {
            SupervisoryKind::ReceiveReady => {
                self.peer_rnr = false;
            }
            SupervisoryKind::ReceiveNotReady => {
                debug!("peer receive-not-ready");
                self.peer_rnr = true;
            }
            SupervisoryKind::Reject => {
                debug!(nr = nr.value(), "REJ received, retransmitting");
                self.stats.rejects_received += 1;
                self.window.expedite_from(nr, self.retries);
            }
        }
        if poll {
            self.final_due = true;
        }
    }

    fn on_unnumbered(
        &mut self,
        kind: UnnumberedKind,
        poll: bool,
        now: Instant,
        out: &mut RxOutcome,
    ) {
        match kind {
            UnnumberedKind::Sabm => {
                debug!("SABM received, link reset");
                self.reset_link(true);
                self.ua_reply = Some(poll);
                self.state = ConnectionState::Connected;
                self.failed = false;
                self.user_disconnected = false;
                self.command = None;
                out.wake = true;
            }
            UnnumberedKind::Disc => {
                debug!("DISC received");
                self.ua_reply = Some(poll);
                self.state = ConnectionState::Disconnected;
                self.user_disconnected = true;
                self.command = None;
                self.reset_link(false);
                out.wake = true;
            }
            UnnumberedKind::Ua => match self.command.as_ref().map(|c| c.kind) {
                Some(UnnumberedKind::Sabm) => {
                    debug!("connection established");
                    self.command = None;
                    self.reset_link(true);
                    self.state = ConnectionState::Connected;
                    self.failed = false;
                    out.wake = true;
                }
                Some(UnnumberedKind::Disc) => {
                    debug!("disconnect confirmed");
                    self.command = None;
                    self.state = ConnectionState::Disconnected;
                    self.reset_link(false);
                    out.wake = true;
                }
                _ => trace!("stray UA ignored"),
            },
            UnnumberedKind::Dm => {
                debug!("DM received, peer refuses connection");
                self.fail_link(now);
                out.wake = true;
            }
            UnnumberedKind::Frmr => {
                warn!("FRMR received, resetting connection");
                self.fail_link(now);
                out.wake = true;
            }
        }
    }

    fn process_ack(&mut self, nr: SequenceNumber, out: &mut RxOutcome) {
        let freed = self.window.acknowledge(nr);
        if freed > 0 {
            trace!(nr = nr.value(), freed, "acknowledged");
            out.wake = true;
        }
    }

    /// Clear per-connection sequence state.
    ///
    /// On establishment (`keep_queued`) payloads accepted while the
    /// link was down stay queued, renumbered from zero; outstanding
    /// frames of the dead session are dropped either way.
    fn reset_link(&mut self, keep_queued: bool) {
        self.vr = SequenceNumber::ZERO;
        if keep_queued {
            self.window.reset_keep_queued();
        } else {
            self.window.clear();
        }
        self.peer_rnr = false;
        self.reject_pending = false;
        self.reject_to_send = false;
        self.final_due = false;
        self.ack_due = false;
    }

    /// Record a connection failure and arm reconnection when allowed.
    fn fail_link(&mut self, now: Instant) {
        self.state = ConnectionState::Disconnected;
        self.command = None;
        self.failed = true;
        self.stats.connection_losses += 1;
        self.reset_link(false);

        if self.auto_reconnect && !self.user_disconnected && !self.closed {
            debug!("re-arming SABM for automatic reconnect");
            self.state = ConnectionState::Connecting;
            self.command = Some(PendingCommand {
                kind: UnnumberedKind::Sabm,
                retries_left: self.retries,
                next_at: now + self.retry_timeout,
                sent_once: false,
            });
        }
    }

    // ------------------------------------------------------------------
    // Transmit path
    // ------------------------------------------------------------------

    /// Check all deadlines at `now`: connection-command retries and
    /// exhausted I-frame budgets.
    pub fn tick(&mut self, now: Instant, out: &mut TxOutcome) {
        if self.closed {
            return;
        }

        // Unnumbered command expiry
        let command_expired = self
            .command
            .as_ref()
            .is_some_and(|cmd| cmd.sent_once && now >= cmd.next_at);
        if command_expired {
            let cmd = self.command.as_mut().expect("checked above");
            if cmd.retries_left == 0 {
                let kind = cmd.kind;
                self.command = None;
                match kind {
                    UnnumberedKind::Sabm => {
                        warn!("SABM retries exhausted");
                        self.fail_link(now);
                    }
                    _ => {
                        // Give up waiting for the DISC UA
                        debug!("DISC unacknowledged, forcing disconnect");
                        self.state = ConnectionState::Disconnected;
                        self.reset_link(false);
                    }
                }
                out.wake = true;
            } else {
                cmd.retries_left -= 1;
                cmd.sent_once = false;
                trace!(kind = ?cmd.kind, left = cmd.retries_left, "command retry");
            }
        }

        // I-frame retry exhaustion: the oldest outstanding frame timing
        // out with an empty budget drops the connection.
        let exhausted = self.window.due(now).and_then(|slot| {
            if !slot.is_expedited() && slot.retries_left() == 0 {
                Some(slot.seq())
            } else {
                None
            }
        });
        if let Some(seq) = exhausted {
            warn!(seq = seq.value(), "retries exhausted, connection lost");
            self.fail_link(now);
            out.wake = true;
        }
    }

    /// Fill `buf` with transmit bytes.
    ///
    /// Runs the transmit priority ladder whenever the encoder goes idle.
    /// Stops early after completing an information frame so the caller
    /// can fire its sent-notification outside the lock.
    pub fn pull(&mut self, buf: &mut [u8], now: Instant) -> TxOutcome {
        let mut out = TxOutcome::default();
        if self.closed || buf.is_empty() {
            return out;
        }

        self.tick(now, &mut out);

        let mut written = 0;
        loop {
            if self.encoder.is_idle() && !self.select_next(now) {
                break;
            }

            written += self.encoder.fill(&mut buf[written..]);

            if self.encoder.is_idle() {
                if self.frame_completed(now) {
                    out.sent_information = true;
                    break;
                }
            } else if written == buf.len() {
                break;
            }
        }

        out.written = written;
        out
    }

    /// Pick the next frame to emit, in strict priority order.
    fn select_next(&mut self, now: Instant) -> bool {
        // 1. Unnumbered traffic: queued UA replies, then command (re)sends
        if let Some(fin) = self.ua_reply.take() {
            self.begin_unnumbered(UnnumberedKind::Ua, fin);
            return true;
        }
        let command_ready = self
            .command
            .as_ref()
            .is_some_and(|cmd| !cmd.sent_once && now >= cmd.next_at);
        if command_ready {
            let cmd = self.command.as_mut().expect("checked above");
            cmd.sent_once = true;
            cmd.next_at = now + self.retry_timeout;
            let kind = cmd.kind;
            self.begin_unnumbered(kind, true);
            return true;
        }

        // 2. Demanded supervisory responses: REJ, then a P answered by F
        if self.reject_to_send {
            self.reject_to_send = false;
            self.stats.rejects_sent += 1;
            let fin = self.take_final();
            self.begin_supervisory(SupervisoryKind::Reject, fin);
            return true;
        }
        if self.final_due {
            let fin = self.take_final();
            self.begin_supervisory(SupervisoryKind::ReceiveReady, fin);
            return true;
        }

        if !self.state.is_established() {
            return false;
        }

        // 3. Retransmission of the oldest due outstanding frame
        if let Some(slot) = self.window.due(now) {
            if !slot.is_expedited() && !slot.consume_retry() {
                // Exhaustion is handled by tick on the next pass
                return false;
            }
            self.stats.retransmissions += 1;
            return self.begin_information(now, true);
        }

        // 4. A fresh I-frame, window and peer permitting
        if !self.peer_rnr && self.window.next_unsent().is_some() {
            return self.begin_information(now, false);
        }

        // 5. Standalone acknowledgement
        if self.ack_due {
            self.begin_supervisory(SupervisoryKind::ReceiveReady, false);
            return true;
        }

        // 6. Keep-alive
        if let Some(ka) = self.keep_alive {
            if now.duration_since(self.last_tx) >= ka {
                self.stats.keep_alives_sent += 1;
                self.begin_supervisory(SupervisoryKind::ReceiveReady, false);
                return true;
            }
        }

        false
    }

    fn take_final(&mut self) -> bool {
        let fin = self.final_due;
        self.final_due = false;
        fin
    }

    fn begin_unnumbered(&mut self, kind: UnnumberedKind, poll: bool) {
        trace!(?kind, poll, "emitting U-frame");
        self.encoder.begin(Control::Unnumbered { kind, poll }, &[]);
        self.tx_kind = Some(TxKind::Unnumbered);
    }

    fn begin_supervisory(&mut self, kind: SupervisoryKind, fin: bool) {
        trace!(?kind, nr = self.vr.value(), "emitting S-frame");
        self.encoder.begin(
            Control::Supervisory {
                kind,
                nr: self.vr,
                poll: fin,
            },
            &[],
        );
        self.ack_due = false;
        self.tx_kind = Some(TxKind::Supervisory);
    }

    /// Emit an I-frame: the oldest due slot when `retransmit`, the
    /// oldest never-sent slot otherwise.
    fn begin_information(&mut self, now: Instant, retransmit: bool) -> bool {
        let nr = self.vr;
        let fin = self.take_final();
        let deadline = now + self.retry_timeout;

        let Machine {
            encoder, window, ..
        } = self;
        let slot = if retransmit {
            window.due(now)
        } else {
            window.next_unsent()
        };
        let Some(slot) = slot else {
            return false;
        };

        trace!(
            ns = slot.seq().value(),
            nr = nr.value(),
            retransmit,
            "emitting I-frame"
        );
        encoder.begin(
            Control::Information {
                ns: slot.seq(),
                nr,
                poll: fin,
            },
            slot.payload(),
        );
        slot.mark_sent(deadline);
        self.ack_due = false;
        self.tx_kind = Some(TxKind::Information);
        true
    }

    /// Bookkeeping after the encoder emits a complete frame.
    ///
    /// Returns true for information frames, whose payload is copied to
    /// the sent scratch for the notification callback.
    fn frame_completed(&mut self, now: Instant) -> bool {
        self.stats.frames_sent += 1;
        self.last_tx = now;
        match self.tx_kind.take() {
            Some(TxKind::Information) => {
                self.sent_payload.clear();
                self.sent_payload
                    .extend_from_slice(self.encoder.staged_payload());
                true
            }
            _ => false,
        }
    }
}
