//! Round-trip time estimation and retransmission timeout (RTO).
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! acknowledgement arrives within a bounded time.  [`RtoEstimator`] keeps the
//! smoothed RTT (`srtt`) and its mean deviation (`rttvar`) and derives the
//! timeout used for newly transmitted segments:
//!
//! `RTO = SRTT + max(interval, 4 × RTTVAR)`, clamped to `[min_rto, RTO_MAX]`.
//!
//! The `interval` term keeps the timeout from dropping below one flush tick:
//! a segment can never be resent before the engine has had a chance to see
//! its acknowledgement.
//!
//! All values are milliseconds on the host clock.

/// RTO floor in nodelay mode.
pub const RTO_NODELAY_MIN: u32 = 30;
/// RTO floor in normal mode.
pub const RTO_MIN: u32 = 100;
/// RTO before any RTT sample is available.
pub const RTO_DEFAULT: u32 = 200;
/// RTO ceiling, also applied to backed-off per-segment timeouts.
pub const RTO_MAX: u32 = 60_000;

/// Smoothed RTT / RTO state for one session.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    /// Smoothed RTT estimate (SRTT); `None` until the first sample.
    srtt: Option<u32>,
    /// Mean RTT deviation (RTTVAR).
    rttvar: u32,
    /// Current RTO handed to new transmissions.
    rto: u32,
    /// Lower clamp for `rto`.
    min_rto: u32,
    /// Flush interval, the smallest deviation term allowed.
    interval: u32,
}

impl RtoEstimator {
    pub fn new(interval: u32) -> Self {
        Self {
            srtt: None,
            rttvar: 0,
            rto: RTO_DEFAULT,
            min_rto: RTO_MIN,
            interval,
        }
    }

    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn srtt(&self) -> Option<u32> {
        self.srtt
    }

    pub fn rttvar(&self) -> u32 {
        self.rttvar
    }

    pub fn min_rto(&self) -> u32 {
        self.min_rto
    }

    /// Switch between the normal and the nodelay RTO floor.
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.min_rto = if nodelay { RTO_NODELAY_MIN } else { RTO_MIN };
        self.rto = self.rto.clamp(self.min_rto, RTO_MAX);
    }

    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval;
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO.
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn sample(&mut self, rtt: u32) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                let delta = rtt.abs_diff(srtt);
                let rttvar = (3 * u64::from(self.rttvar) + u64::from(delta)) / 4;
                self.rttvar = rttvar as u32;
                let srtt = (7 * u64::from(srtt) + u64::from(rtt)) / 8;
                self.srtt = Some((srtt as u32).max(1));
            }
        }

        let srtt = self.srtt.unwrap_or(rtt);
        let rto = srtt.saturating_add(self.interval.max(self.rttvar.saturating_mul(4)));
        self.rto = rto.clamp(self.min_rto, RTO_MAX);
    }

    /// Timeout for the next retransmission of a segment whose current timeout
    /// is `seg_rto`.
    ///
    /// Normal mode doubles (more precisely adds `max(seg_rto, rto)`), nodelay
    /// mode grows linearly by half the estimator's RTO so that retries stay
    /// close together under loss.
    pub fn backoff(&self, seg_rto: u32, nodelay: bool) -> u32 {
        let step = if nodelay {
            self.rto / 2
        } else {
            seg_rto.max(self.rto)
        };
        seg_rto.saturating_add(step).min(RTO_MAX)
    }
}
