//! The session engine: one reliable conversation with one peer.
//!
//! A [`Session`] owns all protocol state for a single `conv`/token pair and
//! coordinates the pieces built in the other modules:
//!
//! ```text
//!   host ──send()──▶ Sender ──dispatch/transmit──┐
//!                                                 ▼
//!   host ◀─recv()── Receiver        flush() ─▶ DatagramBatch ─▶ Output sink
//!                      ▲                          ▲
//!   host ──input()──▶ packet::segments ──acks──┘ (RtoEstimator, Congestion)
//! ```
//!
//! The session never reads a clock and never touches a socket.  The host
//! feeds it a monotonically non-decreasing millisecond counter through
//! [`Session::update`], hands it received datagrams through
//! [`Session::input`], and receives outgoing datagrams through the
//! [`Output`] sink.
//!
//! # Output sink and reentrancy
//!
//! All datagrams produced by one flush are collected first and handed to the
//! sink only after every piece of protocol state has been updated, so the
//! sink always observes a consistent session.  The sink cannot call back into
//! the session that owns it: the session is exclusively borrowed for the
//! whole flush.  A host that shares a session behind a `Mutex` will find the
//! lock held while its sink runs (`try_lock` fails, `lock` would deadlock);
//! work that needs the session has to be queued and done after `update`
//! returns.
//!
//! # Concurrency
//!
//! Everything here is synchronous and non-blocking.  A session is `Send` but
//! has no interior locking; one owner drives it at a time.

use std::fmt;

use crate::config::{self, SessionConfig, WND_RCV};
use crate::congestion::Congestion;
use crate::error::{Error, Result};
use crate::packet::{self, header_len, Command, Header};
use crate::receiver::Receiver;
use crate::sender::{OutboundSegment, ResendPolicy, Sender};
use crate::seq;
use crate::state::LinkState;
use crate::timer::RtoEstimator;

/// First delay before probing a peer that advertises a zero window.
pub const PROBE_INIT: u32 = 7_000;
/// Upper bound for the probe back-off.
pub const PROBE_LIMIT: u32 = 120_000;

/// A clock jump larger than this (either way) resynchronises the flush timer.
const CLOCK_SLAP_LIMIT: i32 = 10_000;

// ---------------------------------------------------------------------------
// Output sink
// ---------------------------------------------------------------------------

/// Destination for datagrams produced by a flush.
///
/// Delivery is fire-and-forget: whatever the sink does with the bytes is not
/// reported back, and a datagram lost here is recovered like any other loss.
/// The sink must not block.
pub trait Output {
    fn output(&mut self, datagram: &[u8]);
}

impl<F> Output for F
where
    F: FnMut(&[u8]),
{
    fn output(&mut self, datagram: &[u8]) {
        self(datagram)
    }
}

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// What [`Session::input`] did with one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSummary {
    /// Segments that matched this session and were processed.
    pub accepted: usize,
    /// Segments that were malformed or belonged to another session.
    pub dropped: usize,
    /// Bytes of the datagram that could be walked.
    pub consumed: usize,
}

/// Snapshot of the session's timing and window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub srtt: Option<u32>,
    pub rttvar: u32,
    pub rto: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub rmt_wnd: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub in_flight: usize,
    pub queued: usize,
    /// Retransmissions caused by expired timers.
    pub timeouts: u64,
    /// Retransmissions caused by duplicate acks.
    pub fast_retransmits: u64,
}

// ---------------------------------------------------------------------------
// Datagram packing
// ---------------------------------------------------------------------------

/// Packs segments back to back into datagrams of at most `mtu` bytes.
struct DatagramBatch {
    mtu: usize,
    current: Vec<u8>,
    done: Vec<Vec<u8>>,
}

impl DatagramBatch {
    fn new(mtu: usize) -> Self {
        Self {
            mtu,
            current: Vec::with_capacity(mtu),
            done: Vec::new(),
        }
    }

    fn push(&mut self, header: &Header, payload: &[u8]) {
        let size = header.encoded_len() + payload.len();
        if !self.current.is_empty() && self.current.len() + size > self.mtu {
            self.seal();
        }
        header.encode(&mut self.current);
        self.current.extend_from_slice(payload);
    }

    fn seal(&mut self) {
        if !self.current.is_empty() {
            let full = std::mem::replace(&mut self.current, Vec::with_capacity(self.mtu));
            self.done.push(full);
        }
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.seal();
        self.done
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One reliable conversation.
///
/// Dropping the session releases everything it owns; there is no close
/// handshake with the peer.
pub struct Session {
    conv: u32,
    /// `None` when the session was created with token 0.
    token: Option<u32>,
    mtu: usize,

    snd_wnd: u32,
    /// Receive window last advertised by the peer.
    rmt_wnd: u32,

    nodelay: bool,
    interval: u32,
    fast_resend: u32,
    fast_limit: u32,
    dead_link: u32,
    stream: bool,

    /// Clock value of the most recent `update`.
    current: u32,
    updated: bool,
    /// Next scheduled flush.
    ts_flush: u32,

    /// Next window probe, valid while `probe_wait != 0`.
    ts_probe: u32,
    probe_wait: u32,
    ask_probe: bool,
    ask_tell: bool,

    link: LinkState,
    timeouts: u64,
    fast_retransmits: u64,

    sender: Sender,
    receiver: Receiver,
    rto: RtoEstimator,
    cc: Congestion,

    output: Option<Box<dyn Output + Send>>,
}

impl Session {
    /// Session with the default configuration.
    ///
    /// A zero `token` means the conversation carries no token on the wire.
    pub fn new(conv: u32, token: u32) -> Self {
        let config = SessionConfig::default();
        Self::build(conv, token, &config)
    }

    /// Session with a validated custom configuration.
    pub fn with_config(conv: u32, token: u32, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(conv, token, &config))
    }

    fn build(conv: u32, token: u32, config: &SessionConfig) -> Self {
        let token = (token != 0).then_some(token);
        let mss = config.mtu - header_len(token.is_some());

        let mut sender = Sender::new(mss);
        sender.set_stream(config.stream);
        let mut receiver = Receiver::new(SessionConfig::effective_rcv_wnd(config.rcv_wnd));
        receiver.set_stream(config.stream);
        let mut rto = RtoEstimator::new(config.interval);
        rto.set_nodelay(config.nodelay);
        let mut cc = Congestion::new(mss as u32);
        cc.set_disabled(config.no_congestion_control);

        log::debug!(
            "[session] conv={} token={} mtu={} mss={} nodelay={} stream={}",
            conv,
            token.is_some(),
            config.mtu,
            mss,
            config.nodelay,
            config.stream
        );

        Self {
            conv,
            token,
            mtu: config.mtu,
            snd_wnd: config.snd_wnd,
            rmt_wnd: WND_RCV,
            nodelay: config.nodelay,
            interval: config.interval,
            fast_resend: config.fast_resend,
            fast_limit: config.fast_limit,
            dead_link: config.dead_link,
            stream: config.stream,
            current: 0,
            updated: false,
            ts_flush: 0,
            ts_probe: 0,
            probe_wait: 0,
            ask_probe: false,
            ask_tell: false,
            link: LinkState::Alive,
            timeouts: 0,
            fast_retransmits: 0,
            sender,
            receiver,
            rto,
            cc,
            output: None,
        }
    }

    /// Install the sink that receives outgoing datagrams.
    ///
    /// Without a sink, flushes still run and their datagrams are discarded.
    pub fn set_output<O>(&mut self, output: O)
    where
        O: Output + Send + 'static,
    {
        self.output = Some(Box::new(output));
    }

    // -----------------------------------------------------------------------
    // Data path
    // -----------------------------------------------------------------------

    /// Queue one message (or, in stream mode, more bytes) for delivery.
    ///
    /// Nothing is transmitted until the next flush.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let fragments = self.sender.enqueue(data)?;
        log::debug!(
            "[session] conv={} send {} bytes as {} fragment(s)",
            self.conv,
            data.len(),
            fragments
        );
        Ok(())
    }

    /// Take the next complete message, or in stream mode every contiguous
    /// byte received so far.  `Ok(None)` means nothing is ready yet.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let data = self.receiver.recv()?;
        self.note_reopened();
        Ok(data)
    }

    /// Like [`Session::recv`] but copies into a buffer owned by the host.
    ///
    /// Use [`Session::peek_size`] to size the buffer first.
    pub fn recv_into(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let n = self.receiver.recv_into(buf)?;
        self.note_reopened();
        Ok(n)
    }

    /// Size of the next unit [`Session::recv`] would return.
    pub fn peek_size(&self) -> Option<usize> {
        self.receiver.peek_size()
    }

    fn note_reopened(&mut self) {
        if self.receiver.take_reopened() {
            self.ask_tell = true;
        }
    }

    /// Feed one datagram received from the peer.
    ///
    /// Segments for another conversation, with the wrong token, or that fail
    /// to decode are dropped one by one; the rest of the datagram is still
    /// processed where it can be located.  An error is returned only when
    /// nothing in the datagram was usable.
    pub fn input(&mut self, datagram: &[u8]) -> Result<InputSummary> {
        let prev_una = self.sender.snd_una();
        let mut summary = InputSummary::default();
        let mut first_err: Option<Error> = None;
        let mut max_ack: Option<u32> = None;

        let mut segments = packet::segments(datagram, self.token.is_some());
        for item in segments.by_ref() {
            let (header, payload) = match item {
                Ok(seg) => seg,
                Err(err) => {
                    log::debug!("[session] conv={} dropping segment: {}", self.conv, err);
                    summary.dropped += 1;
                    first_err.get_or_insert(err.into());
                    continue;
                }
            };
            if let Err(err) = self.admit(&header, payload) {
                log::trace!("[session] {}", err);
                summary.dropped += 1;
                first_err.get_or_insert(err);
                continue;
            }

            self.rmt_wnd = u32::from(header.wnd);
            self.sender.on_una(header.una);

            match header.cmd {
                Command::Ack => {
                    if let Some(xmit) = self.sender.on_ack(header.sn) {
                        // A retransmitted segment's ack cannot be matched to
                        // one transmission.
                        if xmit == 1 && seq::ge(self.current, header.ts) {
                            self.rto.sample(seq::diff(self.current, header.ts) as u32);
                        }
                    }
                    max_ack = match max_ack {
                        Some(m) if seq::ge(m, header.sn) => Some(m),
                        _ => Some(header.sn),
                    };
                }
                Command::Push => {
                    let outcome =
                        self.receiver
                            .on_push(header.sn, header.ts, header.frg, payload);
                    log::trace!(
                        "[recv] conv={} push sn={} frg={} len={} -> {:?}",
                        self.conv,
                        header.sn,
                        header.frg,
                        payload.len(),
                        outcome
                    );
                }
                Command::WindowProbe => {
                    self.ask_tell = true;
                }
                Command::WindowTell => {}
            }
            summary.accepted += 1;
        }
        summary.consumed = segments.consumed();

        if let Some(sn) = max_ack {
            self.sender.on_fast_ack(sn);
        }
        if seq::gt(self.sender.snd_una(), prev_una) {
            self.cc.on_ack_progress(self.mss() as u32, self.rmt_wnd);
        }

        match first_err {
            Some(err) if summary.accepted == 0 => Err(err),
            _ => Ok(summary),
        }
    }

    /// Screen a decoded segment before it touches any state.
    fn admit(&self, header: &Header, payload: &[u8]) -> Result<()> {
        if header.conv != self.conv {
            return Err(Error::ConvMismatch {
                expected: self.conv,
                got: header.conv,
            });
        }
        if header.token != self.token {
            return Err(Error::TokenMismatch { conv: self.conv });
        }
        // `send` never produces one; usually a misparsed tokened segment.
        if header.cmd == Command::Push && payload.is_empty() {
            return Err(Error::EmptyPush { conv: self.conv });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Advance the session clock to `now` and flush when a tick is due.
    ///
    /// Call every 10-100 ms, or at the time returned by [`Session::check`].
    pub fn update(&mut self, now: u32) {
        self.current = now;
        if !self.updated {
            self.updated = true;
            self.ts_flush = now;
        }

        let mut slap = seq::diff(now, self.ts_flush);
        if !(-CLOCK_SLAP_LIMIT..CLOCK_SLAP_LIMIT).contains(&slap) {
            self.ts_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if seq::ge(now, self.ts_flush) {
                self.ts_flush = now.wrapping_add(self.interval);
            }
            self.flush();
        } else if self.resend_due(now) || self.output_ready() {
            // Off-tick flush, so that whatever `check` reported as due
            // goes out now instead of at the next tick.
            self.flush();
        }
    }

    fn resend_due(&self, now: u32) -> bool {
        self.sender
            .next_deadline()
            .is_some_and(|deadline| seq::ge(now, deadline))
    }

    /// Acks, a window tell, or queued data the window admits are waiting.
    ///
    /// A flush clears all three, so this never stays true across flushes.
    fn output_ready(&self) -> bool {
        let window = self.cc.send_window(self.snd_wnd, self.rmt_wnd);
        self.receiver.has_acks() || self.ask_tell || self.sender.can_dispatch(window)
    }

    /// Earliest time at which [`Session::update`] has work to do.
    ///
    /// Returns `now` when a flush tick or a retransmission is already due,
    /// or when acks, a window tell, or data the send window admits are
    /// waiting.  Otherwise the nearest of the next flush tick and the nearest
    /// resend deadline.
    pub fn check(&self, now: u32) -> u32 {
        if !self.updated || self.output_ready() {
            return now;
        }

        let mut ts_flush = self.ts_flush;
        if !(-CLOCK_SLAP_LIMIT..CLOCK_SLAP_LIMIT).contains(&seq::diff(now, ts_flush)) {
            ts_flush = now;
        }
        if seq::ge(now, ts_flush) {
            return now;
        }

        let tm_flush = seq::diff(ts_flush, now) as u32;
        let mut tm_packet = u32::MAX;
        for seg in self.sender.unacked() {
            let d = seq::diff(seg.resend_at, now);
            if d <= 0 {
                return now;
            }
            tm_packet = tm_packet.min(d as u32);
        }

        let minimal = tm_packet.min(tm_flush).min(self.interval);
        now.wrapping_add(minimal)
    }

    /// Milliseconds from `now` until [`Session::check`].
    pub fn check_delay(&self, now: u32) -> u32 {
        seq::diff(self.check(now), now).max(0) as u32
    }

    /// Emit pending acks, window probes, new segments and due
    /// retransmissions.
    ///
    /// Runs against the clock of the last [`Session::update`]; before the
    /// first update there is no clock and this does nothing.
    pub fn flush(&mut self) {
        if !self.updated {
            return;
        }
        let now = self.current;
        let wnd = self.receiver.wnd_unused();
        let una = self.receiver.rcv_nxt();
        let conv = self.conv;
        let token = self.token;
        let control = |cmd: Command, sn: u32, ts: u32| Header {
            conv,
            token,
            cmd,
            frg: 0,
            wnd,
            ts,
            sn,
            una,
            len: 0,
        };

        let mut batch = DatagramBatch::new(self.mtu);

        for (sn, ts) in self.receiver.take_acks() {
            batch.push(&control(Command::Ack, sn, ts), &[]);
        }

        self.schedule_probe(now);
        if self.ask_probe {
            log::debug!("[session] conv={} probing zero window", conv);
            batch.push(&control(Command::WindowProbe, 0, 0), &[]);
        }
        if self.ask_tell {
            batch.push(&control(Command::WindowTell, 0, 0), &[]);
        }
        self.ask_probe = false;
        self.ask_tell = false;

        let window = self.cc.send_window(self.snd_wnd, self.rmt_wnd);
        self.sender.dispatch(window);

        let policy = ResendPolicy {
            nodelay: self.nodelay,
            fast_resend: self.fast_resend,
            fast_limit: self.fast_limit,
            dead_link: self.dead_link,
        };
        let outcome = self
            .sender
            .transmit(now, &self.rto, policy, |seg: &OutboundSegment| {
                let header = Header {
                    conv,
                    token,
                    cmd: Command::Push,
                    frg: seg.frg,
                    wnd,
                    ts: seg.ts,
                    sn: seg.sn,
                    una,
                    len: seg.payload.len() as u32,
                };
                batch.push(&header, &seg.payload);
            });

        self.timeouts += u64::from(outcome.timeouts);
        self.fast_retransmits += u64::from(outcome.fast_retransmits);

        if outcome.dead && !self.link.is_dead() {
            log::warn!(
                "[session] conv={} link dead after {} transmissions of one segment",
                conv,
                self.dead_link
            );
            self.link = LinkState::Dead;
        }

        let mss = self.mss() as u32;
        if outcome.fast_retransmits > 0 {
            let inflight = self.sender.snd_nxt().wrapping_sub(self.sender.snd_una());
            self.cc.on_fast_retransmit(inflight, self.fast_resend, mss);
        }
        if outcome.timeouts > 0 {
            self.cc.on_timeout(mss);
        }

        let datagrams = batch.finish();
        if !datagrams.is_empty() {
            log::trace!(
                "[session] conv={} flush: {} datagram(s), {} new, {} resent",
                conv,
                datagrams.len(),
                outcome.fresh,
                outcome.timeouts + outcome.fast_retransmits
            );
        }
        if let Some(output) = self.output.as_mut() {
            for datagram in &datagrams {
                output.output(datagram);
            }
        }
    }

    /// Window probing while the peer advertises a zero window.
    fn schedule_probe(&mut self, now: u32) {
        if self.rmt_wnd != 0 {
            self.ts_probe = 0;
            self.probe_wait = 0;
            return;
        }
        if self.probe_wait == 0 {
            self.probe_wait = PROBE_INIT;
            self.ts_probe = now.wrapping_add(self.probe_wait);
        } else if seq::ge(now, self.ts_probe) {
            self.probe_wait = self.probe_wait.max(PROBE_INIT);
            self.probe_wait = (self.probe_wait + self.probe_wait / 2).min(PROBE_LIMIT);
            self.ts_probe = now.wrapping_add(self.probe_wait);
            self.ask_probe = true;
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Change the datagram size limit.
    ///
    /// Messages still waiting to be sent are re-split at the new size.
    /// Segments already in flight keep their size, so their retransmissions
    /// may exceed a lowered mtu.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<()> {
        config::validate_mtu(mtu)?;
        self.sender.set_mss(mtu - header_len(self.token.is_some()))?;
        self.mtu = mtu;
        Ok(())
    }

    /// Set the local send-window cap and the advertised receive window.
    pub fn set_window(&mut self, snd_wnd: u32, rcv_wnd: u32) -> Result<()> {
        config::validate_window(snd_wnd, rcv_wnd)?;
        self.snd_wnd = snd_wnd;
        self.receiver
            .set_rcv_wnd(SessionConfig::effective_rcv_wnd(rcv_wnd));
        Ok(())
    }

    /// The latency/throughput knobs in one call.
    pub fn set_nodelay(
        &mut self,
        nodelay: bool,
        interval: u32,
        fast_resend: u32,
        no_congestion_control: bool,
    ) -> Result<()> {
        config::validate_interval(interval)?;
        self.nodelay = nodelay;
        self.interval = interval;
        self.fast_resend = fast_resend;
        self.rto.set_nodelay(nodelay);
        self.rto.set_interval(interval);
        self.cc.set_disabled(no_congestion_control);
        Ok(())
    }

    /// Toggle message framing.  Switch before any data flows.
    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
        self.sender.set_stream(stream);
        self.receiver.set_stream(stream);
    }

    pub fn set_dead_link(&mut self, dead_link: u32) -> Result<()> {
        if dead_link == 0 {
            return Err(Error::InvalidDeadLink);
        }
        self.dead_link = dead_link;
        Ok(())
    }

    pub fn set_fast_limit(&mut self, fast_limit: u32) {
        self.fast_limit = fast_limit;
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn token(&self) -> Option<u32> {
        self.token
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn mss(&self) -> usize {
        self.sender.mss()
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn snd_una(&self) -> u32 {
        self.sender.snd_una()
    }

    pub fn snd_nxt(&self) -> u32 {
        self.sender.snd_nxt()
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.receiver.rcv_nxt()
    }

    pub fn rmt_wnd(&self) -> u32 {
        self.rmt_wnd
    }

    /// Queued plus unacknowledged segments.  Hosts throttle `send` on this.
    pub fn waitsnd(&self) -> usize {
        self.sender.waiting()
    }

    /// Same as [`Session::waitsnd`].
    pub fn pending_unacked(&self) -> usize {
        self.waitsnd()
    }

    /// Segments sent and not yet acknowledged, in sequence order.
    pub fn unacked(&self) -> impl Iterator<Item = &OutboundSegment> {
        self.sender.unacked()
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn is_dead(&self) -> bool {
        self.link.is_dead()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            srtt: self.rto.srtt(),
            rttvar: self.rto.rttvar(),
            rto: self.rto.rto(),
            cwnd: self.cc.cwnd(),
            ssthresh: self.cc.ssthresh(),
            rmt_wnd: self.rmt_wnd,
            snd_wnd: self.snd_wnd,
            rcv_wnd: self.receiver.rcv_wnd(),
            in_flight: self.sender.in_flight(),
            queued: self.sender.queued(),
            timeouts: self.timeouts,
            fast_retransmits: self.fast_retransmits,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("conv", &self.conv)
            .field("snd_una", &self.sender.snd_una())
            .field("snd_nxt", &self.sender.snd_nxt())
            .field("rcv_nxt", &self.receiver.rcv_nxt())
            .field("rmt_wnd", &self.rmt_wnd)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
