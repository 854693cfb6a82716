//! Inbound segment reordering, reassembly and receive-window management.
//!
//! The [`Receiver`] handles everything between a decoded push segment and
//! the host reading a message:
//! - Dropping segments outside `[rcv_nxt, rcv_nxt + rcv_wnd)` and duplicates.
//! - Holding out-of-order segments in a sorted reorder buffer.
//! - Promoting the contiguous run starting at `rcv_nxt` into the ready queue,
//!   as long as the ready queue has room.
//! - Reassembling messages (by `frg` counting down to 0) or, in stream mode,
//!   handing out contiguous bytes without framing.
//! - Collecting `(sn, ts)` pairs to acknowledge on the next flush.
//!
//! ```text
//!            ready queue              reorder buffer
//!    ┌───┬───┬───┬───┐ rcv_nxt ┌───┐       ┌───┐
//!    │ 3 │ 4 │ 5 │ 6 │   (7)   │ 8 │  gap  │10 │
//!    └───┴───┴───┴───┘         └───┘       └───┘
//!     recv() drains ◀           arrives of 7 promotes 7 and 8
//! ```
//!
//! Like [`crate::sender::Sender`] it never emits anything itself.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::seq;

/// A received data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSegment {
    pub sn: u32,
    pub frg: u8,
    pub payload: Vec<u8>,
}

/// What happened to one push segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New data, buffered or already promoted.
    Accepted,
    /// Already buffered or already delivered; acked again, otherwise ignored.
    Duplicate,
    /// Beyond the receive window; neither buffered nor acked.
    OutOfWindow,
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Receiver {
    /// Next expected sequence number.
    rcv_nxt: u32,
    /// Receive window in segments, bounds the ready queue.
    rcv_wnd: u32,
    /// Out-of-order segments, sorted by `sn`, all `>= rcv_nxt`.
    buf: VecDeque<InboundSegment>,
    /// Contiguous segments ready for the host.
    queue: VecDeque<InboundSegment>,
    /// Pending acknowledgements as `(sn, ts)`.
    acks: Vec<(u32, u32)>,
    stream: bool,
    /// Set when a read freed space in a previously full ready queue.
    reopened: bool,
}

impl Receiver {
    pub fn new(rcv_wnd: u32) -> Self {
        Self {
            rcv_nxt: 0,
            rcv_wnd,
            buf: VecDeque::new(),
            queue: VecDeque::new(),
            acks: Vec::new(),
            stream: false,
            reopened: false,
        }
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    pub fn rcv_wnd(&self) -> u32 {
        self.rcv_wnd
    }

    pub fn set_rcv_wnd(&mut self, rcv_wnd: u32) {
        self.rcv_wnd = rcv_wnd;
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    /// Segments ready for the host.
    pub fn ready(&self) -> usize {
        self.queue.len()
    }

    /// Segments waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Free receive window to advertise.
    pub fn wnd_unused(&self) -> u16 {
        let free = self.rcv_wnd.saturating_sub(self.queue.len() as u32);
        free.min(u32::from(u16::MAX)) as u16
    }

    pub fn has_acks(&self) -> bool {
        !self.acks.is_empty()
    }

    /// Hand over the pending acknowledgements.
    pub fn take_acks(&mut self) -> Vec<(u32, u32)> {
        std::mem::take(&mut self.acks)
    }

    /// `true` once after a read reopened a full window.
    pub fn take_reopened(&mut self) -> bool {
        std::mem::take(&mut self.reopened)
    }

    /// Handle an inbound push segment.
    ///
    /// Anything below the window's right edge is acknowledged, including
    /// segments that were already delivered: the peer evidently missed our
    /// earlier ack.
    pub fn on_push(&mut self, sn: u32, ts: u32, frg: u8, payload: &[u8]) -> PushOutcome {
        let right_edge = self.rcv_nxt.wrapping_add(self.rcv_wnd);
        if seq::ge(sn, right_edge) {
            log::trace!("[recv] sn={} beyond window edge {}", sn, right_edge);
            return PushOutcome::OutOfWindow;
        }
        self.acks.push((sn, ts));

        if seq::lt(sn, self.rcv_nxt) {
            return PushOutcome::Duplicate;
        }

        // Scan from the back: arrivals are usually in order.
        let mut insert_at = self.buf.len();
        for (i, seg) in self.buf.iter().enumerate().rev() {
            if seg.sn == sn {
                return PushOutcome::Duplicate;
            }
            if seq::lt(seg.sn, sn) {
                break;
            }
            insert_at = i;
        }
        self.buf.insert(
            insert_at,
            InboundSegment {
                sn,
                frg,
                payload: payload.to_vec(),
            },
        );
        self.promote();
        PushOutcome::Accepted
    }

    /// Size of the next deliverable unit without consuming it.
    ///
    /// Message mode: the full message once all its fragments are ready.
    /// Stream mode: every contiguous byte ready so far.
    pub fn peek_size(&self) -> Option<usize> {
        let front = self.queue.front()?;
        if self.stream {
            return Some(self.queue.iter().map(|seg| seg.payload.len()).sum());
        }
        if front.frg == 0 {
            return Some(front.payload.len());
        }
        if self.queue.len() < usize::from(front.frg) + 1 {
            return None;
        }
        let mut size = 0;
        for seg in &self.queue {
            size += seg.payload.len();
            if seg.frg == 0 {
                break;
            }
        }
        Some(size)
    }

    /// Take the next message (or, in stream mode, all ready bytes).
    ///
    /// The returned buffer is grown with `try_reserve_exact`; on failure
    /// nothing is consumed and [`Error::Alloc`] is returned.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(size) = self.peek_size() else {
            return Ok(None);
        };
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::Alloc { needed: size })?;

        let was_full = self.queue.len() as u32 >= self.rcv_wnd;
        while let Some(seg) = self.queue.pop_front() {
            data.extend_from_slice(&seg.payload);
            if !self.stream && seg.frg == 0 {
                break;
            }
        }
        self.after_read(was_full);
        Ok(Some(data))
    }

    /// Copy the next unit into a host buffer.
    ///
    /// Message mode needs room for the whole message and otherwise fails with
    /// [`Error::BufferTooSmall`] without consuming anything.  Stream mode
    /// copies as much as fits and leaves the rest for the next read.
    pub fn recv_into(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        let Some(size) = self.peek_size() else {
            return Ok(None);
        };
        let too_small = if self.stream {
            out.is_empty()
        } else {
            out.len() < size
        };
        if too_small {
            return Err(Error::BufferTooSmall {
                needed: size,
                available: out.len(),
            });
        }

        let was_full = self.queue.len() as u32 >= self.rcv_wnd;
        let mut written = 0;
        while let Some(seg) = self.queue.front_mut() {
            let room = out.len() - written;
            if room == 0 {
                break;
            }
            if seg.payload.len() > room {
                // Only reachable in stream mode.
                out[written..].copy_from_slice(&seg.payload[..room]);
                seg.payload.drain(..room);
                written += room;
                break;
            }
            let n = seg.payload.len();
            out[written..written + n].copy_from_slice(&seg.payload);
            written += n;
            let last = seg.frg == 0;
            self.queue.pop_front();
            if !self.stream && last {
                break;
            }
        }
        self.after_read(was_full);
        Ok(Some(written))
    }

    fn after_read(&mut self, was_full: bool) {
        self.promote();
        if was_full && (self.queue.len() as u32) < self.rcv_wnd {
            log::debug!("[recv] window reopened, {} free", self.wnd_unused());
            self.reopened = true;
        }
    }

    /// Move the contiguous run at `rcv_nxt` into the ready queue.
    fn promote(&mut self) {
        while (self.queue.len() as u32) < self.rcv_wnd {
            match self.buf.front() {
                Some(seg) if seg.sn == self.rcv_nxt => {}
                _ => break,
            }
            if let Some(seg) = self.buf.pop_front() {
                self.queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
