//! Session tuning knobs.
//!
//! [`SessionConfig`] collects every parameter a host may want to adjust.
//! [`crate::Session::with_config`] validates the whole set before building a
//! session; the individual runtime setters on [`crate::Session`] run the
//! same checks and leave the session untouched when a value is rejected.

use crate::error::{Error, Result};

/// Default maximum datagram size handed to the output sink.
pub const MTU_DEFAULT: usize = 1400;
/// Smallest accepted mtu.
pub const MTU_MIN: usize = 50;
/// Largest accepted mtu (a UDP payload cannot be larger).
pub const MTU_MAX: usize = 65_535;
/// Default local send-window cap, in segments.
pub const WND_SND: u32 = 32;
/// Default receive window, in segments.  Also the floor for any configured
/// receive window so that a maximally fragmented message always fits.
pub const WND_RCV: u32 = 128;
/// Default flush interval in milliseconds.
pub const INTERVAL_DEFAULT: u32 = 100;
pub const INTERVAL_MIN: u32 = 10;
pub const INTERVAL_MAX: u32 = 5000;
/// Transmissions of one segment after which the link is considered dead.
pub const DEAD_LINK_DEFAULT: u32 = 20;
/// Fast retransmits allowed per segment (by transmit count).
pub const FAST_LIMIT_DEFAULT: u32 = 5;

/// All tunables of a [`crate::Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest datagram produced by a flush.
    pub mtu: usize,
    /// Local cap on segments in flight.
    pub snd_wnd: u32,
    /// Receive window advertised to the peer.
    pub rcv_wnd: u32,
    /// Lower RTO floor and linear retransmission backoff.
    pub nodelay: bool,
    /// Flush interval in milliseconds.
    pub interval: u32,
    /// Duplicate-ack count that triggers a fast retransmit (0 = off).
    pub fast_resend: u32,
    /// Let `cwnd` grow without limiting the send window.
    pub no_congestion_control: bool,
    /// Byte-stream delivery instead of message framing.
    pub stream: bool,
    /// Transmit count that marks the link dead.
    pub dead_link: u32,
    /// Fast retransmit only while the transmit count is at most this (0 = unlimited).
    pub fast_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::normal()
    }
}

impl SessionConfig {
    /// Conservative settings: TCP-like backoff, congestion control on.
    pub fn normal() -> Self {
        Self {
            mtu: MTU_DEFAULT,
            snd_wnd: WND_SND,
            rcv_wnd: WND_RCV,
            nodelay: false,
            interval: INTERVAL_DEFAULT,
            fast_resend: 0,
            no_congestion_control: false,
            stream: false,
            dead_link: DEAD_LINK_DEFAULT,
            fast_limit: FAST_LIMIT_DEFAULT,
        }
    }

    /// Latency-first settings: nodelay, 10 ms ticks, fast resend after two
    /// duplicate acks, congestion control off.
    pub fn fast() -> Self {
        Self {
            nodelay: true,
            interval: 10,
            fast_resend: 2,
            no_congestion_control: true,
            ..Self::normal()
        }
    }

    /// Check every field, reporting the first offending one.
    pub fn validate(&self) -> Result<()> {
        validate_mtu(self.mtu)?;
        validate_window(self.snd_wnd, self.rcv_wnd)?;
        validate_interval(self.interval)?;
        if self.dead_link == 0 {
            return Err(Error::InvalidDeadLink);
        }
        Ok(())
    }

    /// Receive window actually used for a configured value.
    pub fn effective_rcv_wnd(rcv_wnd: u32) -> u32 {
        rcv_wnd.max(WND_RCV)
    }
}

pub(crate) fn validate_mtu(mtu: usize) -> Result<()> {
    if !(MTU_MIN..=MTU_MAX).contains(&mtu) {
        return Err(Error::InvalidMtu {
            mtu,
            min: MTU_MIN,
            max: MTU_MAX,
        });
    }
    Ok(())
}

pub(crate) fn validate_window(snd: u32, rcv: u32) -> Result<()> {
    if snd == 0 || rcv == 0 || rcv > u32::from(u16::MAX) {
        return Err(Error::InvalidWindow { snd, rcv });
    }
    Ok(())
}

pub(crate) fn validate_interval(interval: u32) -> Result<()> {
    if !(INTERVAL_MIN..=INTERVAL_MAX).contains(&interval) {
        return Err(Error::InvalidInterval(interval));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        SessionConfig::normal().validate().unwrap();
        SessionConfig::fast().validate().unwrap();
        assert_eq!(SessionConfig::default(), SessionConfig::normal());
    }

    #[test]
    fn fast_preset_overrides_latency_knobs_only() {
        let fast = SessionConfig::fast();
        assert!(fast.nodelay);
        assert!(fast.no_congestion_control);
        assert_eq!(fast.interval, 10);
        assert_eq!(fast.fast_resend, 2);
        assert_eq!(fast.mtu, MTU_DEFAULT);
        assert_eq!(fast.snd_wnd, WND_SND);
    }

    #[test]
    fn rejects_bad_mtu() {
        let cfg = SessionConfig {
            mtu: 20,
            ..SessionConfig::normal()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidMtu { mtu: 20, .. })));
        assert!(validate_mtu(MTU_MAX + 1).is_err());
        assert!(validate_mtu(MTU_MIN).is_ok());
    }

    #[test]
    fn rejects_zero_windows() {
        assert_eq!(
            validate_window(0, 128),
            Err(Error::InvalidWindow { snd: 0, rcv: 128 })
        );
        assert!(validate_window(32, 0).is_err());
        assert!(validate_window(32, 70_000).is_err());
        assert!(validate_window(1, 1).is_ok());
    }

    #[test]
    fn rejects_interval_out_of_range() {
        assert_eq!(validate_interval(5), Err(Error::InvalidInterval(5)));
        assert!(validate_interval(5001).is_err());
        assert!(validate_interval(10).is_ok());
    }

    #[test]
    fn rejects_zero_dead_link() {
        let cfg = SessionConfig {
            dead_link: 0,
            ..SessionConfig::normal()
        };
        assert_eq!(cfg.validate(), Err(Error::InvalidDeadLink));
    }

    #[test]
    fn small_receive_window_is_raised() {
        assert_eq!(SessionConfig::effective_rcv_wnd(1), WND_RCV);
        assert_eq!(SessionConfig::effective_rcv_wnd(512), 512);
    }
}
