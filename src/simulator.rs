//! Deterministic lossy link for tests and demos.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! retransmission and reassembly paths without depending on actual network
//! conditions, [`LossyLink`] models one direction of a path driven by the
//! same millisecond clock as the sessions:
//!
//! | Fault       | Description                                             |
//! |-------------|---------------------------------------------------------|
//! | Latency     | Every datagram arrives `latency` ms after it was sent.  |
//! | Loss        | Drop a datagram with probability `loss_rate`.           |
//! | Reordering  | Hold a datagram back an extra `reorder_delay` ms with   |
//! |             | probability `reorder_rate`, letting later ones overtake.|
//! | Duplication | Deliver a datagram twice with `duplicate_rate`.         |
//!
//! The random source is a seeded [`SmallRng`], so a failing run reproduces
//! exactly from its seed.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::seq;

/// Fault model of one direction.  Probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    /// Extra delay for reordered datagrams, in ms.
    pub reorder_delay: u32,
    /// One-way delay for every datagram, in ms.
    pub latency: u32,
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        // A perfect wire: nothing lost, nothing delayed.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: 0,
            latency: 0,
            seed: 0,
        }
    }
}

/// Counters of what the link did to the traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub delivered: u64,
}

#[derive(Debug)]
struct InTransit {
    due: u32,
    /// Send order, breaks ties between datagrams due at the same time.
    order: u64,
    datagram: Vec<u8>,
}

/// One direction of a simulated network path.
#[derive(Debug)]
pub struct LossyLink {
    config: LinkConfig,
    rng: SmallRng,
    in_transit: Vec<InTransit>,
    next_order: u64,
    stats: LinkStats,
}

impl LossyLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(config.seed),
            config,
            in_transit: Vec::new(),
            next_order: 0,
            stats: LinkStats::default(),
        }
    }

    /// A link that delivers everything unchanged after `latency` ms.
    pub fn perfect(latency: u32) -> Self {
        Self::new(LinkConfig {
            latency,
            ..LinkConfig::default()
        })
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Datagrams sent but not yet delivered.
    pub fn pending(&self) -> usize {
        self.in_transit.len()
    }

    /// Put a datagram on the wire at time `now`.
    pub fn send(&mut self, now: u32, datagram: &[u8]) {
        self.stats.sent += 1;
        if self.chance(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::trace!("[link] dropped {} bytes", datagram.len());
            return;
        }

        let mut delay = self.config.latency;
        if self.chance(self.config.reorder_rate) {
            self.stats.reordered += 1;
            delay = delay.saturating_add(self.config.reorder_delay);
        }
        self.enqueue(now.wrapping_add(delay), datagram.to_vec());

        if self.chance(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.enqueue(now.wrapping_add(delay), datagram.to_vec());
        }
    }

    /// Everything due at or before `now`, in arrival order.
    pub fn deliver(&mut self, now: u32) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.in_transit.len() {
            if seq::le(self.in_transit[i].due, now) {
                due.push(self.in_transit.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|d| (seq::diff(d.due, now), d.order));
        self.stats.delivered += due.len() as u64;
        due.into_iter().map(|d| d.datagram).collect()
    }

    fn enqueue(&mut self, due: u32, datagram: Vec<u8>) {
        self.in_transit.push(InTransit {
            due,
            order: self.next_order,
            datagram,
        });
        self.next_order += 1;
    }

    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen_bool(p.min(1.0))
    }
}
