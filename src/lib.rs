//! `kcp-over-udp`: a reliable, ordered, low-latency ARQ session engine for
//! unreliable datagram transports.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   segments   ┌──────────┐
//!  │  Sender  │─────────────▶│ Receiver │        (on the peer)
//!  └────┬─────┘              └─────┬────┘
//!       │        acks / una        │
//!       │◀─────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │             Session               │
//!  │  (RTO estimator, congestion,      │
//!  │   flush scheduling, output sink)  │
//!  └────┬──────────────────────────────┘
//!       │ raw datagrams, via the host
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! The engine is a synchronous state machine: the host supplies the clock
//! and the datagrams, and receives outgoing datagrams through an
//! [`Output`] sink.  Nothing in the engine blocks or spawns.
//!
//! Each module has a single responsibility:
//! - [`packet`]      wire format (encode / walk datagrams)
//! - [`seq`]         wrap-around comparison of sequence numbers and times
//! - [`timer`]       RTT smoothing and retransmission timeout
//! - [`congestion`]  congestion window
//! - [`sender`]      fragmentation and the retransmission buffer
//! - [`receiver`]    reordering, reassembly, acks to send
//! - [`state`]       link liveness
//! - [`config`]      tunables and their validation
//! - [`error`]       crate error type
//! - [`connection`]  the [`Session`] tying it all together
//! - [`simulator`]   deterministic lossy link for tests
//! - [`socket`]      async UDP socket abstraction
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use kcp_over_udp::Session;
//!
//! let wire = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
//! let mut alice = Session::new(7, 0);
//! let mut bob = Session::new(7, 0);
//! let tx = Arc::clone(&wire);
//! alice.set_output(move |d: &[u8]| tx.lock().unwrap().push(d.to_vec()));
//!
//! alice.send(b"hello").unwrap();
//! alice.update(0);
//! for datagram in wire.lock().unwrap().drain(..) {
//!     bob.input(&datagram).unwrap();
//! }
//! assert_eq!(bob.recv().unwrap().as_deref(), Some(&b"hello"[..]));
//! ```

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::SessionConfig;
pub use connection::{InputSummary, Output, Session, Stats};
pub use error::{Error, Result};
pub use state::LinkState;
