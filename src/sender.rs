//! Send pipeline: fragmentation, the window-bounded retransmission buffer,
//! and per-segment retransmission decisions.
//!
//! [`Sender`] never touches the output sink.  [`crate::Session`] calls these
//! methods and turns the segments they hand back into datagrams.
//!
//! # Sequence-number layout
//!
//! ```text
//!   snd_una             snd_nxt
//!      │                   │
//!  ────┼───────────────────┼──────────────────▶ seq space
//!      │ <─ unacked buf ──▶│ <── unsent queue (no sn yet)
//! ```
//!
//! - `send()` fragments a message into the unsent queue.
//! - [`Sender::dispatch`] assigns sequence numbers and moves segments into
//!   the unacked buffer while `snd_nxt < snd_una + window`.
//! - Acks remove individual segments, `una` removes every segment below it,
//!   and `snd_una` is always the smallest sequence number still buffered.

use std::collections::VecDeque;

use crate::config::WND_RCV;
use crate::error::{Error, Result};
use crate::seq;
use crate::timer::RtoEstimator;

/// Largest number of fragments one message may be split into.  A peer with
/// the minimum receive window can always hold a message of this size.
pub const MAX_FRAGMENTS: usize = WND_RCV as usize - 1;

// ---------------------------------------------------------------------------
// OutboundSegment
// ---------------------------------------------------------------------------

/// One fragment waiting for transmission or acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSegment {
    /// Sequence number, assigned when the segment enters the window.
    pub sn: u32,
    /// Fragments remaining after this one in its message.
    pub frg: u8,
    pub payload: Vec<u8>,
    /// Clock value of the most recent transmission.
    pub ts: u32,
    /// Clock value at which the segment is due for retransmission.
    pub resend_at: u32,
    /// Current retransmission timeout of this segment.
    pub rto: u32,
    /// Acks seen for later sequence numbers since the last transmission.
    pub fastack: u32,
    /// Number of transmissions so far (0 = not sent yet).
    pub xmit: u32,
}

impl OutboundSegment {
    fn new(frg: u8, payload: Vec<u8>) -> Self {
        Self {
            sn: 0,
            frg,
            payload,
            ts: 0,
            resend_at: 0,
            rto: 0,
            fastack: 0,
            xmit: 0,
        }
    }
}

/// Knobs that decide when a buffered segment goes out again.
#[derive(Debug, Clone, Copy)]
pub struct ResendPolicy {
    pub nodelay: bool,
    /// Duplicate acks needed for a fast retransmit (0 = never).
    pub fast_resend: u32,
    /// Fast retransmit only while `xmit <= fast_limit` (0 = unlimited).
    pub fast_limit: u32,
    /// Transmit count at which the link is reported dead.
    pub dead_link: u32,
}

/// What happened during one pass over the unacked buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitOutcome {
    /// Segments sent for the first time.
    pub fresh: u32,
    /// Segments resent because their RTO expired.
    pub timeouts: u32,
    /// Segments resent because of duplicate acks.
    pub fast_retransmits: u32,
    /// Some segment reached the dead-link transmit count.
    pub dead: bool,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Sender {
    /// Oldest unacknowledged sequence number (left window edge).
    snd_una: u32,
    /// Sequence number for the next segment entering the window.
    snd_nxt: u32,
    /// Fragments not yet assigned a sequence number.
    queue: VecDeque<OutboundSegment>,
    /// Segments in flight, ordered by sequence number.
    buf: VecDeque<OutboundSegment>,
    mss: usize,
    stream: bool,
    /// The last dispatched fragment was not the end of its message, so the
    /// queue starts with the rest of that message.
    split_head: bool,
}

impl Sender {
    pub fn new(mss: usize) -> Self {
        Self {
            snd_una: 0,
            snd_nxt: 0,
            queue: VecDeque::new(),
            buf: VecDeque::new(),
            mss,
            stream: false,
            split_head: false,
        }
    }

    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Change the fragment size and re-split the unsent queue to match.
    ///
    /// Segments already in flight keep their size, and so do the queued
    /// fragments of a message whose head is in flight: their `frg` numbers
    /// are already on the wire.  Nothing changes when a queued message would
    /// need more than [`MAX_FRAGMENTS`] fragments at the new size.
    pub fn set_mss(&mut self, mss: usize) -> Result<()> {
        let mut requeued = VecDeque::with_capacity(self.queue.len());
        let mut segs = self.queue.iter();

        if self.stream {
            let bytes: Vec<u8> = segs.flat_map(|seg| seg.payload.iter().copied()).collect();
            requeued.extend(
                bytes
                    .chunks(mss)
                    .map(|chunk| OutboundSegment::new(0, chunk.to_vec())),
            );
        } else {
            if self.split_head {
                for seg in segs.by_ref() {
                    requeued.push_back(seg.clone());
                    if seg.frg == 0 {
                        break;
                    }
                }
            }
            let mut message = Vec::new();
            for seg in segs {
                message.extend_from_slice(&seg.payload);
                if seg.frg != 0 {
                    continue;
                }
                let count = message.len().div_ceil(mss);
                if count > MAX_FRAGMENTS {
                    return Err(Error::TooManyFragments {
                        count,
                        max: MAX_FRAGMENTS,
                    });
                }
                for (i, chunk) in message.chunks(mss).enumerate() {
                    requeued.push_back(OutboundSegment::new((count - i - 1) as u8, chunk.to_vec()));
                }
                message.clear();
            }
        }

        log::debug!(
            "[send] mss {} -> {}, {} queued fragment(s) -> {}",
            self.mss,
            mss,
            self.queue.len(),
            requeued.len()
        );
        self.queue = requeued;
        self.mss = mss;
        Ok(())
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    /// Segments queued but not yet sent.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Segments sent and awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.buf.len()
    }

    /// Queued plus in-flight segments, the host's backpressure signal.
    pub fn waiting(&self) -> usize {
        self.queue.len() + self.buf.len()
    }

    pub fn unacked(&self) -> impl Iterator<Item = &OutboundSegment> {
        self.buf.iter()
    }

    /// Fragment `data` into the unsent queue.
    ///
    /// In stream mode the tail of the last queued fragment is topped up
    /// first.  Returns the number of new fragments.  Nothing is queued when
    /// the message would need more than [`MAX_FRAGMENTS`] fragments.
    pub fn enqueue(&mut self, mut data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(Error::EmptyMessage);
        }
        let mss = self.mss;

        // Work out the fragment count before touching the queue.
        let mut spill = 0;
        if self.stream {
            if let Some(last) = self.queue.back() {
                spill = mss.saturating_sub(last.payload.len()).min(data.len());
            }
        }
        let rest = data.len() - spill;
        let count = rest.div_ceil(mss);
        if count > MAX_FRAGMENTS {
            return Err(Error::TooManyFragments {
                count,
                max: MAX_FRAGMENTS,
            });
        }

        if spill > 0 {
            if let Some(last) = self.queue.back_mut() {
                last.payload.extend_from_slice(&data[..spill]);
                last.frg = 0;
            }
            data = &data[spill..];
        }

        for (i, chunk) in data.chunks(mss).enumerate() {
            let frg = if self.stream { 0 } else { (count - i - 1) as u8 };
            self.queue
                .push_back(OutboundSegment::new(frg, chunk.to_vec()));
        }

        log::trace!(
            "[send] queued {} fragment(s) (+{} bytes coalesced), waiting={}",
            count,
            spill,
            self.waiting()
        );
        Ok(count)
    }

    /// Whether [`Sender::dispatch`] with `window` would move anything.
    pub fn can_dispatch(&self, window: u32) -> bool {
        !self.queue.is_empty() && seq::lt(self.snd_nxt, self.snd_una.wrapping_add(window))
    }

    /// Move unsent fragments into the window while
    /// `snd_nxt < snd_una + window`.  Returns how many moved.
    pub fn dispatch(&mut self, window: u32) -> usize {
        let limit = self.snd_una.wrapping_add(window);
        let mut moved = 0;
        while seq::lt(self.snd_nxt, limit) {
            let Some(mut seg) = self.queue.pop_front() else {
                break;
            };
            seg.sn = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.split_head = !self.stream && seg.frg != 0;
            self.buf.push_back(seg);
            moved += 1;
        }
        moved
    }

    /// Cumulative acknowledgement: drop everything below `una`.
    pub fn on_una(&mut self, una: u32) {
        while let Some(front) = self.buf.front() {
            if seq::lt(front.sn, una) {
                self.buf.pop_front();
            } else {
                break;
            }
        }
        self.shrink();
    }

    /// Selective acknowledgement of `sn`.
    ///
    /// Returns the transmit count of the removed segment, or `None` when `sn`
    /// is outside the window or was already acknowledged.
    pub fn on_ack(&mut self, sn: u32) -> Option<u32> {
        if seq::lt(sn, self.snd_una) || seq::ge(sn, self.snd_nxt) {
            return None;
        }
        let idx = self
            .buf
            .iter()
            .take_while(|seg| seq::le(seg.sn, sn))
            .position(|seg| seg.sn == sn)?;
        let seg = self.buf.remove(idx)?;
        self.shrink();
        Some(seg.xmit)
    }

    /// Every segment older than the highest acked `sn` of this input was
    /// skipped over by the peer once more.
    pub fn on_fast_ack(&mut self, sn: u32) {
        if seq::lt(sn, self.snd_una) || seq::ge(sn, self.snd_nxt) {
            return;
        }
        for seg in self.buf.iter_mut() {
            if seq::ge(seg.sn, sn) {
                break;
            }
            seg.fastack += 1;
        }
    }

    /// Decide which buffered segments go out at `now` and hand each of them
    /// to `emit` after updating its bookkeeping.
    ///
    /// A segment is sent when it was never sent, when its resend deadline
    /// passed (RTO backed off), or when it collected enough duplicate acks.
    pub fn transmit<F>(
        &mut self,
        now: u32,
        est: &RtoEstimator,
        policy: ResendPolicy,
        mut emit: F,
    ) -> TransmitOutcome
    where
        F: FnMut(&OutboundSegment),
    {
        let resent = if policy.fast_resend > 0 {
            policy.fast_resend
        } else {
            u32::MAX
        };
        let rtomin = if policy.nodelay { 0 } else { est.rto() >> 3 };
        let mut outcome = TransmitOutcome::default();

        for seg in self.buf.iter_mut() {
            let send = if seg.xmit == 0 {
                seg.rto = est.rto();
                seg.resend_at = now.wrapping_add(seg.rto).wrapping_add(rtomin);
                outcome.fresh += 1;
                true
            } else if seq::ge(now, seg.resend_at) {
                seg.rto = est.backoff(seg.rto, policy.nodelay);
                seg.resend_at = now.wrapping_add(seg.rto);
                outcome.timeouts += 1;
                log::debug!(
                    "[send] timeout sn={} xmit={} next rto={}",
                    seg.sn,
                    seg.xmit + 1,
                    seg.rto
                );
                true
            } else if seg.fastack >= resent
                && (policy.fast_limit == 0 || seg.xmit <= policy.fast_limit)
            {
                seg.fastack = 0;
                seg.resend_at = now.wrapping_add(seg.rto);
                outcome.fast_retransmits += 1;
                log::debug!("[send] fast retransmit sn={} xmit={}", seg.sn, seg.xmit + 1);
                true
            } else {
                false
            };

            if send {
                seg.xmit += 1;
                seg.ts = now;
                emit(&*seg);
                if seg.xmit >= policy.dead_link {
                    outcome.dead = true;
                }
            }
        }
        outcome
    }

    /// Earliest resend deadline among buffered segments.
    pub fn next_deadline(&self) -> Option<u32> {
        self.buf
            .iter()
            .map(|seg| seg.resend_at)
            .reduce(|a, b| if seq::lt(b, a) { b } else { a })
    }

    fn shrink(&mut self) {
        self.snd_una = self.buf.front().map_or(self.snd_nxt, |seg| seg.sn);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
