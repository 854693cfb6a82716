//! Sessions over real UDP sockets on the loopback interface.
//!
//! Each endpoint runs in its own tokio task, driving its session the way the
//! CLI does: wait for a datagram or for the time `check` asks for, then
//! `update`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};

use kcp_over_udp::socket::Socket;
use kcp_over_udp::{Session, SessionConfig};

const CONV: u32 = 0x5eed;
const TOKEN: u32 = 0xfeed_f00d;

async fn ephemeral() -> Arc<Socket> {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Arc::new(Socket::bind(addr).await.expect("bind failed"))
}

fn session_to(socket: &Arc<Socket>, peer: SocketAddr) -> Session {
    let mut session = Session::with_config(CONV, TOKEN, SessionConfig::fast()).unwrap();
    let socket = Arc::clone(socket);
    session.set_output(move |d: &[u8]| {
        let _ = socket.try_send_to(d, peer);
    });
    session
}

fn millis(start: Instant) -> u32 {
    start.elapsed().as_millis() as u32
}

/// Wait for one datagram or for the session's next deadline, whichever is
/// first, then advance the session.
async fn drive(session: &mut Session, socket: &Socket, start: Instant) {
    let delay = session.check_delay(millis(start)).max(1);
    tokio::select! {
        res = socket.recv_from() => {
            let (datagram, _) = res.expect("recv");
            if let Err(e) = session.input(&datagram) {
                panic!("unexpected input error: {e}");
            }
        }
        _ = tokio::time::sleep(Duration::from_millis(u64::from(delay))) => {}
    }
    session.update(millis(start));
}

#[tokio::test]
async fn echo_over_loopback() {
    const COUNT: usize = 40;

    let server_sock = ephemeral().await;
    let client_sock = ephemeral().await;
    let server_addr = server_sock.local_addr();
    let client_addr = client_sock.local_addr();

    let server = tokio::spawn(async move {
        let mut session = session_to(&server_sock, client_addr);
        let start = Instant::now();
        let mut echoed = 0;
        // Keep serving after the last echo so its retransmissions and acks
        // can still complete.
        while echoed < COUNT || session.waitsnd() > 0 {
            drive(&mut session, &server_sock, start).await;
            while let Some(msg) = session.recv().unwrap() {
                session.send(&msg).unwrap();
                echoed += 1;
            }
        }
        echoed
    });

    let client = tokio::spawn(async move {
        let mut session = session_to(&client_sock, server_addr);
        let start = Instant::now();
        let sent: Vec<Vec<u8>> = (0..COUNT)
            .map(|i| vec![i as u8; 1 + i * 100])
            .collect();
        for msg in &sent {
            session.send(msg).unwrap();
        }

        let mut got = Vec::new();
        while got.len() < COUNT {
            drive(&mut session, &client_sock, start).await;
            while let Some(msg) = session.recv().unwrap() {
                got.push(msg);
            }
        }
        // Let the final acks reach the server.
        let linger = Instant::now() + Duration::from_millis(200);
        while Instant::now() < linger {
            drive(&mut session, &client_sock, start).await;
        }
        assert_eq!(got, sent);
    });

    let (sr, cr) = timeout(Duration::from_secs(20), async { tokio::join!(server, client) })
        .await
        .expect("loopback echo timed out");
    assert_eq!(sr.unwrap(), COUNT);
    cr.unwrap();
}

#[tokio::test]
async fn stray_datagrams_do_not_disturb_a_session() {
    let sock = ephemeral().await;
    let stray = ephemeral().await;
    let mut session = session_to(&sock, stray.local_addr());
    session.update(0);

    stray.send_to(b"not a segment", sock.local_addr()).await.unwrap();
    let (datagram, _) = sock.recv_from().await.unwrap();
    assert!(session.input(&datagram).is_err());
    assert_eq!(session.rcv_nxt(), 0);
    assert_eq!(session.peek_size(), None);
}
