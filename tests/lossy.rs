//! Two sessions talking over simulated lossy links.
//!
//! Every test drives both sessions and both link directions from one
//! millisecond counter, so runs are fully deterministic for a given seed.

use std::sync::{Arc, Mutex};

use kcp_over_udp::simulator::{LinkConfig, LossyLink};
use kcp_over_udp::{Session, SessionConfig};

type Wire = Arc<Mutex<Vec<Vec<u8>>>>;

const TICK: u32 = 10;

struct Pair {
    a: Session,
    b: Session,
    wa: Wire,
    wb: Wire,
    ab: LossyLink,
    ba: LossyLink,
    now: u32,
}

impl Pair {
    fn new(config: SessionConfig, ab: LinkConfig, ba: LinkConfig) -> Self {
        let (a, wa) = wired(config.clone());
        let (b, wb) = wired(config);
        Self {
            a,
            b,
            wa,
            wb,
            ab: LossyLink::new(ab),
            ba: LossyLink::new(ba),
            now: 0,
        }
    }

    /// Advance one tick: update both sessions, move datagrams across the
    /// links, feed whatever arrives.
    fn step(&mut self) {
        self.a.update(self.now);
        self.b.update(self.now);
        for d in drain(&self.wa) {
            self.ab.send(self.now, &d);
        }
        for d in drain(&self.wb) {
            self.ba.send(self.now, &d);
        }
        for d in self.ab.deliver(self.now) {
            self.b.input(&d).unwrap();
        }
        for d in self.ba.deliver(self.now) {
            self.a.input(&d).unwrap();
        }
        self.now += TICK;
    }
}

fn wired(config: SessionConfig) -> (Session, Wire) {
    let wire: Wire = Arc::default();
    let mut session = Session::with_config(42, 0, config).expect("valid config");
    let sink = Arc::clone(&wire);
    session.set_output(move |d: &[u8]| sink.lock().unwrap().push(d.to_vec()));
    (session, wire)
}

fn drain(wire: &Wire) -> Vec<Vec<u8>> {
    std::mem::take(&mut *wire.lock().unwrap())
}

fn messages(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let len = 1 + (i * 397) % 4000;
            (0..len).map(|j| (i + j) as u8).collect()
        })
        .collect()
}

fn hostile(seed: u64) -> LinkConfig {
    LinkConfig {
        loss_rate: 0.1,
        duplicate_rate: 0.05,
        reorder_rate: 0.1,
        reorder_delay: 30,
        latency: 20,
        seed,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn all_messages_survive_loss_duplication_and_reordering() {
    let mut pair = Pair::new(SessionConfig::fast(), hostile(1), hostile(2));
    let sent = messages(60);
    for msg in &sent {
        pair.a.send(msg).unwrap();
    }

    let mut got = Vec::new();
    while got.len() < sent.len() && pair.now < 120_000 {
        pair.step();
        while let Some(msg) = pair.b.recv().unwrap() {
            got.push(msg);
        }
    }
    assert_eq!(got, sent);

    let link = pair.ab.stats();
    assert!(link.dropped > 0, "seed produced no loss: {link:?}");
    assert!(pair.a.stats().timeouts + pair.a.stats().fast_retransmits > 0);
    assert!(!pair.a.is_dead());
}

#[test]
fn echo_in_both_directions() {
    let mut pair = Pair::new(SessionConfig::fast(), hostile(7), hostile(8));
    let sent = messages(30);
    for msg in &sent {
        pair.a.send(msg).unwrap();
    }

    let mut echoed = Vec::new();
    while echoed.len() < sent.len() && pair.now < 120_000 {
        pair.step();
        while let Some(msg) = pair.b.recv().unwrap() {
            pair.b.send(&msg).unwrap();
        }
        while let Some(msg) = pair.a.recv().unwrap() {
            echoed.push(msg);
        }
    }
    assert_eq!(echoed, sent);
}

#[test]
fn normal_mode_recovers_with_congestion_control() {
    let mut pair = Pair::new(SessionConfig::normal(), hostile(11), hostile(12));
    let sent = messages(20);
    for msg in &sent {
        pair.a.send(msg).unwrap();
    }

    let mut got = Vec::new();
    while got.len() < sent.len() && pair.now < 300_000 {
        pair.step();
        while let Some(msg) = pair.b.recv().unwrap() {
            got.push(msg);
        }
    }
    assert_eq!(got, sent);
    assert!(pair.a.stats().cwnd >= 1);
}

#[test]
fn severed_link_is_reported_dead() {
    let cut = LinkConfig {
        loss_rate: 1.0,
        ..LinkConfig::default()
    };
    let mut pair = Pair::new(SessionConfig::fast(), cut, LinkConfig::default());
    pair.a.set_dead_link(5).unwrap();
    pair.a.send(b"into the void").unwrap();

    while !pair.a.is_dead() && pair.now < 60_000 {
        pair.step();
    }
    assert!(pair.a.is_dead());
    assert_eq!(pair.b.rcv_nxt(), 0);
    assert_eq!(pair.a.waitsnd(), 1);
    assert!(pair.a.unacked().next().unwrap().xmit >= 5);
}

#[test]
fn slow_reader_is_throttled_by_its_window() {
    let mut config = SessionConfig::fast();
    config.snd_wnd = 256;
    let mut pair = Pair::new(config, LinkConfig::default(), LinkConfig::default());
    for i in 0..300u32 {
        pair.a.send(&i.to_le_bytes()).unwrap();
    }

    // Nobody reads on b: its ready queue fills to the receive window.
    for _ in 0..200 {
        pair.step();
    }
    assert_eq!(pair.b.rcv_nxt(), 128);
    assert_eq!(pair.a.rmt_wnd(), 0);
    assert!(pair.a.waitsnd() > 0);

    // Reading reopens the window and the rest flows.
    let mut got = 0u32;
    while got < 300 && pair.now < 120_000 {
        while let Some(msg) = pair.b.recv().unwrap() {
            assert_eq!(msg, got.to_le_bytes());
            got += 1;
        }
        pair.step();
    }
    assert_eq!(got, 300);
}
