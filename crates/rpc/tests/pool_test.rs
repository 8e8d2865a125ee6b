use corelib::NodeId;
use rpc::{dial_fn, Dialer, ErrorKind, SessionPool, SessionState};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streaming::{MuxConfig, MuxSession};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify, Semaphore};

const PING: &[u8] = b"ping";

/// Dialer that connects to the address spelled by the peer id and counts
/// every attempt.
fn counting_dialer(dials: Arc<AtomicUsize>) -> impl Dialer {
    dial_fn(move |peer: NodeId| {
        let dials = Arc::clone(&dials);
        async move {
            dials.fetch_add(1, Ordering::SeqCst);
            TcpStream::connect(peer.as_str()).await
        }
    })
}

fn refusing_dialer() -> impl Dialer {
    dial_fn(|_peer: NodeId| async move {
        Err::<TcpStream, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "no dialing"))
    })
}

/// Multiplexed server that drains every stream and reports how many bytes
/// each one carried.
async fn spawn_drain_server() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((conn, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let session = MuxSession::server(conn, MuxConfig::default());
                while let Some(mut stream) = session.accept().await {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        if stream.read_to_end(&mut buf).await.is_ok() {
                            let _ = tx.send(buf);
                        }
                    });
                }
            });
        }
    });

    (addr, rx)
}

fn peer_at(addr: SocketAddr) -> NodeId {
    NodeId::new(addr.to_string()).unwrap()
}

async fn send_pings(pool: &SessionPool, peer: &NodeId, count: usize) {
    let mut stream = pool.get(peer).await.unwrap();
    for _ in 0..count {
        stream.write_all(PING).await.unwrap();
    }
    stream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_get_shares_one_session() {
    let (addr, mut received) = spawn_drain_server().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let pool = Arc::new(SessionPool::new(counting_dialer(Arc::clone(&dials))));
    let peer = peer_at(addr);

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let peer = peer.clone();
            tokio::spawn(async move {
                send_pings(&pool, &peer, 100).await;
                assert_eq!(pool.len(), 1);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for _ in 0..10 {
        let payload = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, PING.repeat(100));
    }

    assert_eq!(dials.load(Ordering::SeqCst), 1);
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn test_set_reports_replacement() {
    let pool = SessionPool::new(refusing_dialer());
    let peer = NodeId::new("node-a").unwrap();

    let (local, _remote) = tokio::io::duplex(64 * 1024);
    assert!(!pool.set(peer.clone(), local));
    let first = pool.cached_session(&peer).unwrap();
    assert_eq!(first.state(), SessionState::Active);

    let (local, _remote2) = tokio::io::duplex(64 * 1024);
    assert!(pool.set(peer.clone(), local));
    assert_eq!(first.state(), SessionState::Closed);
    assert_eq!(pool.len(), 1);

    let current = pool.cached_session(&peer).unwrap();
    assert!(!Arc::ptr_eq(&first, &current));
    assert_eq!(current.state(), SessionState::Active);

    let (local, _remote3) = tokio::io::duplex(64 * 1024);
    assert!(!pool.set(NodeId::new("node-b").unwrap(), local));
    assert_eq!(pool.len(), 2);
}

#[tokio::test]
async fn test_set_session_is_used_without_dialing() {
    let pool = SessionPool::new(refusing_dialer());
    let peer = NodeId::new("node-a").unwrap();

    let (local, remote) = tokio::io::duplex(64 * 1024);
    pool.set(peer.clone(), local);
    let server = MuxSession::server(remote, MuxConfig::default());

    let mut stream = pool.get(&peer).await.unwrap();
    stream.write_all(b"hello").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut accepted = server.accept().await.unwrap();
    let mut buf = Vec::new();
    accepted.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"hello");
}

#[tokio::test]
async fn test_remove_then_get_redials() {
    let (addr, _received) = spawn_drain_server().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let pool = SessionPool::new(counting_dialer(Arc::clone(&dials)));
    let peer = peer_at(addr);

    send_pings(&pool, &peer, 1).await;
    let first = pool.cached_session(&peer).unwrap();
    assert_eq!(pool.len(), 1);

    pool.remove(&peer);
    assert_eq!(pool.len(), 0);
    assert_eq!(first.state(), SessionState::Closed);

    // no-op
    pool.remove(&peer);
    assert_eq!(pool.len(), 0);

    send_pings(&pool, &peer, 1).await;
    assert_eq!(dials.load(Ordering::SeqCst), 2);
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn test_close_empties_pool() {
    let (addr_a, _rx_a) = spawn_drain_server().await;
    let (addr_b, _rx_b) = spawn_drain_server().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let pool = SessionPool::new(counting_dialer(Arc::clone(&dials)));

    let peers = [peer_at(addr_a), peer_at(addr_b)];
    for peer in &peers {
        send_pings(&pool, peer, 1).await;
    }
    let sessions: Vec<_> = peers
        .iter()
        .map(|peer| pool.cached_session(peer).unwrap())
        .collect();
    assert_eq!(pool.len(), 2);

    pool.close();
    assert!(pool.is_empty());
    for session in &sessions {
        assert_eq!(session.state(), SessionState::Closed);
    }

    // still usable
    send_pings(&pool, &peers[0], 1).await;
    assert_eq!(pool.len(), 1);
    assert_eq!(dials.load(Ordering::SeqCst), 3);
}

#[test]
fn test_instance_is_singleton() {
    let a = SessionPool::instance();
    let b = SessionPool::instance();
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn test_get_recovers_from_closed_session() {
    let (addr, mut received) = spawn_drain_server().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let pool = SessionPool::new(counting_dialer(Arc::clone(&dials)));
    let peer = peer_at(addr);

    send_pings(&pool, &peer, 1).await;
    pool.cached_session(&peer).unwrap().close();

    send_pings(&pool, &peer, 3).await;
    assert_eq!(dials.load(Ordering::SeqCst), 2);
    assert_eq!(pool.len(), 1);
    assert_eq!(
        pool.cached_session(&peer).unwrap().state(),
        SessionState::Active
    );

    let mut payloads = Vec::new();
    for _ in 0..2 {
        payloads.push(received.recv().await.unwrap());
    }
    assert!(payloads.contains(&PING.repeat(3)));
}

#[tokio::test]
async fn test_len_skips_sessions_closed_out_of_band() {
    let (addr, _received) = spawn_drain_server().await;
    let pool = SessionPool::new(counting_dialer(Arc::new(AtomicUsize::new(0))));
    let peer = peer_at(addr);

    send_pings(&pool, &peer, 1).await;
    assert_eq!(pool.len(), 1);

    let session = pool.cached_session(&peer).unwrap();
    session.close();
    assert_eq!(pool.len(), 0);
    assert!(pool.is_empty());
    // still cached until the next get evicts it
    assert!(pool.cached_session(&peer).is_some());
}

#[tokio::test]
async fn test_waiter_takes_over_after_failed_dial() {
    const CALLERS: usize = 8;

    let (addr, _received) = spawn_drain_server().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let dialer = {
        let dials = Arc::clone(&dials);
        let gate = Arc::clone(&gate);
        dial_fn(move |peer: NodeId| {
            let first = dials.fetch_add(1, Ordering::SeqCst) == 0;
            let gate = Arc::clone(&gate);
            async move {
                if first {
                    gate.acquire().await.unwrap().forget();
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
                }
                TcpStream::connect(peer.as_str()).await
            }
        })
    };
    let pool = Arc::new(SessionPool::new(dialer));
    let peer = peer_at(addr);

    let getters: Vec<_> = (0..CALLERS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let peer = peer.clone();
            tokio::spawn(async move { pool.get(&peer).await.map(|_| ()) })
        })
        .collect();

    // every getter is queued behind the first dial before it fails
    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.add_permits(1);

    let mut failures = Vec::new();
    for getter in getters {
        if let Err(err) = getter.await.unwrap() {
            failures.push(err.kind());
        }
    }

    assert_eq!(failures, vec![ErrorKind::DialFailure]);
    assert_eq!(dials.load(Ordering::SeqCst), 2);
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn test_dial_failure_leaves_no_entry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dials = Arc::new(AtomicUsize::new(0));
    let pool = SessionPool::new(counting_dialer(Arc::clone(&dials)));
    let peer = peer_at(addr);

    let err = pool.get(&peer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DialFailure);
    assert_eq!(err.peer(), Some(&peer));
    assert!(pool.is_empty());
    assert!(pool.cached_session(&peer).is_none());

    // nothing cached, so the next attempt dials again
    let _ = pool.get(&peer).await;
    assert_eq!(dials.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_remove_during_dial_discards_new_session() {
    let (addr, _received) = spawn_drain_server().await;
    let dials = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));

    let dialer = {
        let dials = Arc::clone(&dials);
        let entered = Arc::clone(&entered);
        let gate = Arc::clone(&gate);
        dial_fn(move |peer: NodeId| {
            let first = dials.fetch_add(1, Ordering::SeqCst) == 0;
            let entered = Arc::clone(&entered);
            let gate = Arc::clone(&gate);
            async move {
                if first {
                    entered.notify_one();
                    gate.acquire().await.unwrap().forget();
                }
                TcpStream::connect(peer.as_str()).await
            }
        })
    };
    let pool = Arc::new(SessionPool::new(dialer));
    let peer = peer_at(addr);

    let getter = tokio::spawn({
        let pool = Arc::clone(&pool);
        let peer = peer.clone();
        async move { pool.get(&peer).await.map(|_| ()) }
    });

    entered.notified().await;
    pool.remove(&peer);
    gate.add_permits(1);

    getter.await.unwrap().unwrap();
    assert_eq!(dials.load(Ordering::SeqCst), 2);
    assert_eq!(pool.len(), 1);
    assert_eq!(
        pool.cached_session(&peer).unwrap().state(),
        SessionState::Active
    );
}
