//! Entry point for `kcp-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  The server echoes every message back to the first peer that talks
//! to it; the client sends timestamped messages and reports round-trip
//! times.  All protocol work is delegated to [`kcp_over_udp::Session`];
//! `main.rs` owns only process setup and the socket/timer loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::time::Instant;

use kcp_over_udp::config::{SessionConfig, MTU_DEFAULT, WND_RCV, WND_SND};
use kcp_over_udp::socket::Socket;
use kcp_over_udp::Session;

/// Reliable, low-latency messaging over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Echo every message back to the peer.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Send messages to a server and measure echo round trips.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Number of messages to send.
        #[arg(short, long, default_value_t = 100)]
        count: u32,
        /// Bytes per message, at least 8.
        #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(8..))]
        size: u32,
        /// Give up after this many milliseconds.
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
        #[command(flatten)]
        tuning: Tuning,
    },
}

/// Session knobs shared by both modes.
#[derive(Args)]
struct Tuning {
    /// Conversation id; both ends must agree.
    #[arg(long, default_value_t = 1)]
    conv: u32,
    /// Validation token; 0 sends no token.
    #[arg(long, default_value_t = 0)]
    token: u32,
    #[arg(long, default_value_t = MTU_DEFAULT)]
    mtu: usize,
    #[arg(long, default_value_t = WND_SND)]
    snd_wnd: u32,
    #[arg(long, default_value_t = WND_RCV)]
    rcv_wnd: u32,
    /// Use the latency-first preset (nodelay, 10 ms ticks, fast resend).
    #[arg(long)]
    fast: bool,
}

impl Tuning {
    fn session(&self) -> Result<Session> {
        let base = if self.fast {
            SessionConfig::fast()
        } else {
            SessionConfig::normal()
        };
        let config = SessionConfig {
            mtu: self.mtu,
            snd_wnd: self.snd_wnd,
            rcv_wnd: self.rcv_wnd,
            ..base
        };
        Session::with_config(self.conv, self.token, config).context("invalid session settings")
    }
}

/// Millisecond clock for the session, starting at zero.
struct Clock(Instant);

impl Clock {
    fn now_ms(&self) -> u32 {
        self.0.elapsed().as_millis() as u32
    }
}

fn attach(session: &mut Session, socket: &Arc<Socket>, peer: SocketAddr) {
    let socket = Arc::clone(socket);
    session.set_output(move |datagram: &[u8]| {
        if let Err(e) = socket.try_send_to(datagram, peer) {
            log::debug!("[main] datagram to {peer} dropped: {e}");
        }
    });
}

/// Instant at which the session next needs an `update`.
fn next_wakeup(session: &Session, clock: &Clock) -> Instant {
    let delay = session.check_delay(clock.now_ms());
    Instant::now() + Duration::from_millis(u64::from(delay))
}

async fn run_server(bind: SocketAddr, tuning: Tuning) -> Result<()> {
    let socket = Arc::new(Socket::bind(bind).await.context("bind failed")?);
    log::info!("Echo server listening on {}", socket.local_addr());

    loop {
        // The first datagram fixes the peer for this session.
        let (first, peer) = socket.recv_from().await?;
        let mut session = tuning.session()?;
        attach(&mut session, &socket, peer);
        let clock = Clock(Instant::now());
        session.update(clock.now_ms());
        log::info!("Serving {peer}");

        let mut pending = Some(first);
        let mut echoed = 0u64;
        loop {
            if let Some(datagram) = pending.take() {
                if let Err(e) = session.input(&datagram) {
                    log::debug!("[main] ignored datagram: {e}");
                }
                while let Some(message) = session.recv()? {
                    session.send(&message)?;
                    echoed += 1;
                }
                session.flush();
            }
            if session.is_dead() {
                log::warn!("Peer {peer} stopped acknowledging after {echoed} echoes");
                break;
            }

            tokio::select! {
                res = socket.recv_from() => {
                    let (datagram, from) = res?;
                    if from == peer {
                        pending = Some(datagram);
                    }
                }
                _ = tokio::time::sleep_until(next_wakeup(&session, &clock)) => {
                    session.update(clock.now_ms());
                }
            }
        }
    }
}

async fn run_client(
    server: SocketAddr,
    count: u32,
    size: u32,
    timeout_ms: u64,
    tuning: Tuning,
) -> Result<()> {
    let local: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = Arc::new(Socket::bind(local).await.context("bind failed")?);
    let mut session = tuning.session()?;
    attach(&mut session, &socket, server);
    let snd_wnd = tuning.snd_wnd as usize;

    let clock = Clock(Instant::now());
    let give_up = Instant::now() + Duration::from_millis(timeout_ms);
    session.update(clock.now_ms());

    let mut sent = 0u32;
    let mut rtts: Vec<u32> = Vec::with_capacity(count as usize);
    let mut message = vec![0u8; size as usize];

    while (rtts.len() as u32) < count {
        // Keep at most two windows' worth of segments queued.
        while sent < count && session.waitsnd() < 2 * snd_wnd {
            message[..4].copy_from_slice(&sent.to_le_bytes());
            message[4..8].copy_from_slice(&clock.now_ms().to_le_bytes());
            session.send(&message)?;
            sent += 1;
        }

        if Instant::now() >= give_up {
            bail!("timed out with {}/{} echoes", rtts.len(), count);
        }
        if session.is_dead() {
            bail!("server stopped acknowledging");
        }

        tokio::select! {
            res = socket.recv_from() => {
                let (datagram, from) = res?;
                if from != server {
                    continue;
                }
                if let Err(e) = session.input(&datagram) {
                    log::debug!("[main] ignored datagram: {e}");
                }
                while let Some(echo) = session.recv()? {
                    if echo.len() < 8 {
                        bail!("short echo of {} bytes", echo.len());
                    }
                    let ts = u32::from_le_bytes([echo[4], echo[5], echo[6], echo[7]]);
                    rtts.push(clock.now_ms().wrapping_sub(ts));
                }
            }
            _ = tokio::time::sleep_until(next_wakeup(&session, &clock).min(give_up)) => {
                session.update(clock.now_ms());
            }
        }
    }

    let min = rtts.iter().min().copied().unwrap_or(0);
    let max = rtts.iter().max().copied().unwrap_or(0);
    let avg = rtts.iter().map(|&r| u64::from(r)).sum::<u64>() / rtts.len().max(1) as u64;
    let stats = session.stats();
    println!(
        "{} echoes: rtt min/avg/max = {}/{}/{} ms, rto {} ms, {} timeouts, {} fast retransmits",
        rtts.len(),
        min,
        avg,
        max,
        stats.rto,
        stats.timeouts,
        stats.fast_retransmits
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { bind, tuning } => run_server(bind, tuning).await,
        Mode::Client {
            server,
            count,
            size,
            timeout_ms,
            tuning,
        } => run_client(server, count, size, timeout_ms, tuning).await,
    }
}
