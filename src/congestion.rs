//! Congestion window management.
//!
//! The window is counted in segments.  [`Congestion`] only tracks `cwnd`,
//! `ssthresh` and the byte-level growth accumulator; the session decides when
//! the events below happen:
//!
//! | event                        | effect                                          |
//! |------------------------------|-------------------------------------------------|
//! | cumulative ack advanced      | slow start (`cwnd += 1`) below `ssthresh`,      |
//! |                              | about one segment per window above it           |
//! | fast retransmit (dup acks)   | `ssthresh = inflight / 2`, `cwnd = ssthresh + resend` |
//! | retransmission timeout       | `ssthresh = cwnd / 2`, `cwnd = 1`               |
//!
//! `ssthresh` never drops below [`THRESH_MIN`] and `cwnd` never below one
//! segment, so the sender can always make progress.

/// Initial slow-start threshold.
pub const THRESH_INIT: u32 = 2;
/// Lower bound for `ssthresh` after a loss.
pub const THRESH_MIN: u32 = 2;

#[derive(Debug, Clone)]
pub struct Congestion {
    cwnd: u32,
    ssthresh: u32,
    /// Byte-granular growth accumulator for congestion avoidance.
    incr: u32,
    /// When set, `cwnd` no longer limits the send window.
    disabled: bool,
}

impl Congestion {
    pub fn new(mss: u32) -> Self {
        Self {
            cwnd: 1,
            ssthresh: THRESH_INIT,
            incr: mss,
            disabled: false,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Number of segments that may be in flight.
    ///
    /// `min(snd_wnd, rmt_wnd)`, further limited by `cwnd` unless congestion
    /// control is disabled.  May be zero when the peer advertises a zero
    /// window; the session probes in that case.
    pub fn send_window(&self, snd_wnd: u32, rmt_wnd: u32) -> u32 {
        let wnd = snd_wnd.min(rmt_wnd);
        if self.disabled {
            wnd
        } else {
            wnd.min(self.cwnd)
        }
    }

    /// The cumulative ack moved forward.
    pub fn on_ack_progress(&mut self, mss: u32, rmt_wnd: u32) {
        if self.cwnd >= rmt_wnd {
            return;
        }
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr = self.incr.saturating_add(mss);
        } else {
            if self.incr < mss {
                self.incr = mss;
            }
            let step = u64::from(mss) * u64::from(mss) / u64::from(self.incr.max(1));
            self.incr = self
                .incr
                .saturating_add(step as u32 + mss / 16);
            if (self.cwnd + 1).saturating_mul(mss) <= self.incr {
                self.cwnd = (self.incr + mss - 1) / mss.max(1);
            }
        }
        if self.cwnd > rmt_wnd {
            self.cwnd = rmt_wnd.max(1);
            self.incr = self.cwnd.saturating_mul(mss);
        }
    }

    /// Duplicate acks triggered a fast retransmit while `inflight` segments
    /// were outstanding.
    pub fn on_fast_retransmit(&mut self, inflight: u32, resend: u32, mss: u32) {
        self.ssthresh = (inflight / 2).max(THRESH_MIN);
        self.cwnd = self.ssthresh + resend;
        self.incr = self.cwnd.saturating_mul(mss);
    }

    /// A segment's retransmission timer expired.
    pub fn on_timeout(&mut self, mss: u32) {
        self.ssthresh = (self.cwnd / 2).max(THRESH_MIN);
        self.cwnd = 1;
        self.incr = mss;
    }
}
