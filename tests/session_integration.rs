//! End-to-end scenarios against the session state machine, run entirely
//! in-process: a `tokio::io::duplex` stands in for the TLS stream (TLS
//! termination itself is exercised only by the supervisor, not here),
//! an in-memory user repository stands in for Postgres, and
//! [`vpnd::tun::mock::MockTun`] stands in for the kernel TUN device.
//! Mirrors spec.md §8's literal end-to-end scenarios.

use bytes::BytesMut;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use vpnd::auth::repository::{InMemoryUserRepository, UserRecord};
use vpnd::auth::token::TokenManager;
use vpnd::auth::AuthService;
use vpnd::codec::{self, AuthRequestPayload, Frame, Platform};
use vpnd::pool::IpPool;
use vpnd::registry::SessionRegistry;
use vpnd::session::{RouterInbound, SessionConfig};

fn argon2_hash(password: &str) -> String {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::Argon2;
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

struct Harness {
    auth: Arc<AuthService>,
    ip_pool: Arc<IpPool>,
    registry: Arc<SessionRegistry>,
    router_tx: mpsc::Sender<RouterInbound>,
    #[allow(dead_code)]
    router_rx: mpsc::Receiver<RouterInbound>,
}

fn harness(cidr: &str, repo: Arc<InMemoryUserRepository>) -> Harness {
    let tokens = TokenManager::new(b"integration-test-secret-key", 3600);
    let auth = Arc::new(AuthService::new(repo, tokens));
    let ip_pool = Arc::new(IpPool::new(cidr.parse().unwrap()));
    let registry = Arc::new(SessionRegistry::new());
    let (router_tx, router_rx) = mpsc::channel(64);

    Harness {
        auth,
        ip_pool,
        registry,
        router_tx,
        router_rx,
    }
}

impl Harness {
    fn seed_user(&self, repo: &InMemoryUserRepository, username: &str, password: &str, cap: i32) {
        repo.seed_user(UserRecord {
            id: uuid::Uuid::new_v4(),
            username: username.to_string(),
            password_hash: argon2_hash(password),
            enabled: true,
            max_connections: cap,
        });
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            auth: self.auth.clone(),
            ip_pool: self.ip_pool.clone(),
            registry: self.registry.clone(),
            router_tx: self.router_tx.clone(),
            peer_addr: "127.0.0.1:5000".to_string(),
            dns: vec!["8.8.8.8".parse().unwrap(), "8.8.4.4".parse().unwrap()],
            mtu: 1400,
            keepalive_interval: Duration::from_secs(10),
            idle_warn_after: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            auth_timeout: Duration::from_secs(5),
            max_payload: 64 * 1024,
        }
    }
}

async fn send_frame(stream: &mut DuplexStream, frame: &Frame) {
    let mut buf = BytesMut::new();
    codec::encode(frame, &mut buf).unwrap();
    stream.write_all(&buf).await.unwrap();
}

async fn recv_frame(stream: &mut DuplexStream, buf: &mut BytesMut) -> Option<Frame> {
    loop {
        match codec::decode_one(buf, 64 * 1024) {
            Ok((frame, consumed)) => {
                let _ = buf.split_to(consumed);
                return Some(frame);
            }
            Err(codec::FrameError::Need(_)) => {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(_) => return None,
        }
    }
}

fn auth_request(username: &str, password: &str) -> Frame {
    Frame::AuthRequest(AuthRequestPayload {
        username: username.to_string(),
        password: password.to_string(),
        client_version: "1.0.0".to_string(),
        platform: Platform::Macos,
    })
}

#[tokio::test]
async fn happy_path_issues_token_and_config_push() {
    let repo = Arc::new(InMemoryUserRepository::new());
    let h = harness("10.8.0.0/24", repo.clone());
    h.seed_user(&repo, "testuser", "test123", 3);

    let (client_io, server_io) = tokio::io::duplex(8192);
    let cfg = h.session_config();
    let server = tokio::spawn(vpnd::session::run(server_io, cfg));

    let mut client = client_io;
    let mut buf = BytesMut::new();
    send_frame(&mut client, &auth_request("testuser", "test123")).await;

    let response = recv_frame(&mut client, &mut buf).await.unwrap();
    match response {
        Frame::AuthResponse(p) => {
            assert!(p.success);
            assert!(p.session_token.is_some());
        }
        other => panic!("expected AuthResponse, got {other:?}"),
    }

    let push = recv_frame(&mut client, &mut buf).await.unwrap();
    match push {
        Frame::ConfigPush(p) => {
            assert_eq!(p.assigned_ip, "10.8.0.2");
            assert_eq!(p.subnet_mask, "255.255.255.0");
            assert_eq!(p.gateway, "10.8.0.1");
            assert_eq!(p.dns, vec!["8.8.8.8", "8.8.4.4"]);
            assert_eq!(p.mtu, 1400);
            assert_eq!(p.keepalive_interval, 10);
        }
        other => panic!("expected ConfigPush, got {other:?}"),
    }

    drop(client);
    let _ = server.await;
}

#[tokio::test]
async fn wrong_password_is_rejected_and_connection_closes() {
    let repo = Arc::new(InMemoryUserRepository::new());
    let h = harness("10.8.0.0/24", repo.clone());
    h.seed_user(&repo, "testuser", "test123", 3);

    let (client_io, server_io) = tokio::io::duplex(8192);
    let cfg = h.session_config();
    let server = tokio::spawn(vpnd::session::run(server_io, cfg));

    let mut client = client_io;
    let mut buf = BytesMut::new();
    send_frame(&mut client, &auth_request("testuser", "bad")).await;

    let response = recv_frame(&mut client, &mut buf).await.unwrap();
    match response {
        Frame::AuthResponse(p) => {
            assert!(!p.success);
            assert_eq!(p.error_message.as_deref(), Some("Invalid credentials"));
        }
        other => panic!("expected AuthResponse, got {other:?}"),
    }

    let disconnect = recv_frame(&mut client, &mut buf).await.unwrap();
    assert_eq!(disconnect.frame_type(), codec::FrameType::Disconnect);

    tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .expect("session task should finish promptly")
        .unwrap();

    let logs = repo.connection_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event_type, vpnd::auth::repository::ConnectionLogEvent::AuthFail);
    assert_eq!(logs[0].details.as_deref(), Some("Wrong password"));
}

#[tokio::test]
async fn ip_exhaustion_reports_no_available_addresses() {
    let repo = Arc::new(InMemoryUserRepository::new());
    let h = harness("10.8.0.0/30", repo.clone()); // gateway .1, one usable client address .2
    h.seed_user(&repo, "alice", "pw-alice", 3);
    h.seed_user(&repo, "bob", "pw-bob", 3);

    // Client A takes the only address and stays connected (never disconnects).
    let (mut client_a, server_a) = tokio::io::duplex(8192);
    let cfg_a = h.session_config();
    let server_a_task = tokio::spawn(vpnd::session::run(server_a, cfg_a));
    let mut buf_a = BytesMut::new();
    send_frame(&mut client_a, &auth_request("alice", "pw-alice")).await;
    let resp_a = recv_frame(&mut client_a, &mut buf_a).await.unwrap();
    assert!(matches!(resp_a, Frame::AuthResponse(p) if p.success));
    let _ = recv_frame(&mut client_a, &mut buf_a).await.unwrap(); // config push

    // Client B authenticates fine but the pool has nothing left to hand out.
    let (mut client_b, server_b) = tokio::io::duplex(8192);
    let cfg_b = h.session_config();
    let server_b_task = tokio::spawn(vpnd::session::run(server_b, cfg_b));
    let mut buf_b = BytesMut::new();
    send_frame(&mut client_b, &auth_request("bob", "pw-bob")).await;
    let resp_b = recv_frame(&mut client_b, &mut buf_b).await.unwrap();
    match resp_b {
        Frame::AuthResponse(p) => {
            assert!(!p.success);
            assert_eq!(p.error_message.as_deref(), Some("No available IP addresses"));
        }
        other => panic!("expected AuthResponse, got {other:?}"),
    }

    drop(client_a);
    drop(client_b);
    let _ = server_a_task.await;
    let _ = server_b_task.await;
}

#[tokio::test]
async fn reverse_forwarding_delivers_data_packet_and_counts_bytes() {
    let repo = Arc::new(InMemoryUserRepository::new());
    let h = harness("10.8.0.0/24", repo.clone());
    h.seed_user(&repo, "testuser", "test123", 3);

    let (mut client, server_io) = tokio::io::duplex(8192);
    let cfg = h.session_config();
    let server = tokio::spawn(vpnd::session::run(server_io, cfg));

    let mut buf = BytesMut::new();
    send_frame(&mut client, &auth_request("testuser", "test123")).await;
    let _ = recv_frame(&mut client, &mut buf).await.unwrap(); // auth response
    let _ = recv_frame(&mut client, &mut buf).await.unwrap(); // config push

    let assigned = Ipv4Addr::new(10, 8, 0, 2);
    let session = h.registry.lookup_by_ip(assigned).expect("session bound to assigned ip");

    let mut payload = vec![0u8; 200];
    payload[0] = 0x45;
    payload[16..20].copy_from_slice(&assigned.octets());
    assert!(session.deliver(payload.clone()).await);

    let data = recv_frame(&mut client, &mut buf).await.unwrap();
    match data {
        Frame::Data(d) => assert_eq!(d.payload, payload),
        other => panic!("expected Data frame, got {other:?}"),
    }
    assert_eq!(session.bytes_sent(), (codec::HDR_LEN + 200) as u64);

    drop(client);
    let _ = server.await;
}

#[tokio::test]
async fn concurrent_authentications_exhaust_pool_deterministically() {
    let repo = Arc::new(InMemoryUserRepository::new());
    let h = harness("10.8.0.0/28", repo.clone()); // gateway + 14 usable client addresses

    const USERS: usize = 50;
    for i in 0..USERS {
        h.seed_user(&repo, &format!("user{i}"), "pw", 1);
    }

    let mut tasks = Vec::new();
    for i in 0..USERS {
        let cfg = h.session_config();
        let (mut client, server_io) = tokio::io::duplex(8192);
        let server = tokio::spawn(vpnd::session::run(server_io, cfg));
        tasks.push(tokio::spawn(async move {
            let mut buf = BytesMut::new();
            send_frame(&mut client, &auth_request(&format!("user{i}"), "pw")).await;
            let resp = recv_frame(&mut client, &mut buf).await.unwrap();
            let success = matches!(&resp, Frame::AuthResponse(p) if p.success);
            (success, client, server)
        }));
    }

    let mut succeeded = 0;
    let mut clients = Vec::new();
    for t in tasks {
        let (success, client, server) = t.await.unwrap();
        if success {
            succeeded += 1;
        }
        clients.push((client, server));
    }

    let stats = h.ip_pool.stats();
    let client_capacity = stats.total - 1; // minus the reserved gateway
    assert_eq!(succeeded, client_capacity.min(USERS));
    assert_eq!(stats.in_use, succeeded + 1); // + gateway

    for (client, server) in clients {
        drop(client);
        let _ = server.await;
    }
}
