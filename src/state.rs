//! Link liveness as observed by the retransmission machinery.
//!
//! There is no connection handshake in this protocol, so a session has no
//! open/close state machine.  What the host does need to know is whether the
//! peer still seems reachable: once any single segment has been transmitted
//! `dead_link` times without an acknowledgement the session flips to
//! [`LinkState::Dead`].  The flag is advisory.  The engine keeps
//! retransmitting; abandoning the session is the host's decision.

/// Reachability of the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Segments are being acknowledged (or nothing has been retried too often).
    #[default]
    Alive,
    /// Some segment hit the dead-link retransmission threshold.
    Dead,
}

impl LinkState {
    pub fn is_dead(self) -> bool {
        self == LinkState::Dead
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
