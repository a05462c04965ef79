//! Per-connection session state machine (spec.md §4.5).
//!
//! Grounded on the teacher's `Handler` in `src/server/server.rs`: a
//! `tokio::select!` over reading frames off the socket and draining an
//! outbound `mpsc` queue, running as one task per connection. Generalized
//! from the teacher's single-shot "handshake then forward" loop into the
//! full Connected/Authenticating/Authenticated/Active/Disconnecting/
//! Disconnected machine, with a 10s keepalive ticker grounded on the
//! `tokio::time::interval` pattern in `src/server/conf_agent.rs`.

use crate::auth::repository::ConnectionLogEvent;
use crate::auth::AuthService;
use crate::codec::{self, AuthRequestPayload, AuthResponsePayload, ConfigPushPayload, DataFrame, ErrorPayload, Frame};
use crate::error::AuthError;
use crate::pool::IpPool;
use crate::registry::SessionRegistry;
use bytes::BytesMut;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// `Connected`/`Authenticating` cover the pre-AUTH_REQUEST and
/// awaiting-credential-check phases of the handshake, before a
/// `SessionHandle` exists to hold the state in — the loop in [`run`] is
/// those two states made control flow instead of a stored field. A handle
/// is only ever constructed already `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticating,
    Authenticated,
    Active,
    Disconnecting,
    Disconnected,
}

/// A packet handed from a session task to the router for writing onto
/// the TUN device.
pub struct RouterInbound {
    pub src: Ipv4Addr,
    pub payload: Vec<u8>,
}

/// Shared, registry-visible handle to a live session. The session task
/// owns the socket; everything else (router, supervisor sweep) talks to
/// the session only through this handle.
pub struct SessionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub assigned_ip: Ipv4Addr,
    state: Mutex<SessionState>,
    last_activity: Mutex<Instant>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    outbound_tx: mpsc::Sender<Frame>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Queue a data packet for delivery to this session's client. Returns
    /// `false` if the session's outbound queue is gone (task exited).
    pub async fn deliver(&self, payload: Vec<u8>) -> bool {
        self.outbound_tx
            .send(Frame::Data(DataFrame { payload }))
            .await
            .is_ok()
    }

    /// Queue an arbitrary control frame (e.g. a server-initiated
    /// DISCONNECT during shutdown) for delivery to this session's client.
    pub async fn send_control(&self, frame: Frame) -> bool {
        self.outbound_tx.send(frame).await.is_ok()
    }
}

pub struct SessionConfig {
    pub auth: Arc<AuthService>,
    pub ip_pool: Arc<IpPool>,
    pub registry: Arc<SessionRegistry>,
    pub router_tx: mpsc::Sender<RouterInbound>,
    pub peer_addr: String,
    pub dns: Vec<Ipv4Addr>,
    pub mtu: u32,
    pub keepalive_interval: Duration,
    pub idle_warn_after: Duration,
    pub idle_timeout: Duration,
    pub auth_timeout: Duration,
    pub max_payload: usize,
}

/// Drive one client connection end to end: authenticate, assign an
/// address, then bridge data frames until disconnect or timeout.
pub async fn run<S>(mut socket: S, cfg: SessionConfig) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut write_buf = BytesMut::new();

    let auth_deadline = tokio::time::sleep(cfg.auth_timeout);
    tokio::pin!(auth_deadline);

    let request = loop {
        tokio::select! {
            _ = &mut auth_deadline => {
                debug!("authentication timed out before AUTH_REQUEST");
                return Ok(());
            }
            frame = read_frame(&mut socket, &mut read_buf, cfg.max_payload) => {
                match frame? {
                    Some(Frame::AuthRequest(req)) => break req,
                    Some(other) => {
                        warn!(peer = %cfg.peer_addr, frame = ?other, "dropping control message in Connected state");
                        continue;
                    }
                    None => return Ok(()), // peer closed
                }
            }
        }
    };

    let (handle, outbound_rx) = match authenticate_and_register(&cfg, &request).await {
        Ok(pair) => pair,
        Err(e) => {
            cfg.auth
                .log_connection_event(
                    None,
                    ConnectionLogEvent::AuthFail,
                    Some(&cfg.peer_addr),
                    Some(request.platform.as_str()),
                    Some(&e.log_detail()),
                )
                .await;
            send_auth_failure(&mut socket, &mut write_buf, &e).await?;
            return Ok(());
        }
    };

    // From here on the session is registered and holds an IP lease, so every
    // exit path — including a write failure right after authentication —
    // must still reach the teardown block below. `?` would skip it.
    let result = run_active(&mut socket, &mut read_buf, &mut write_buf, &handle, outbound_rx, &cfg).await;

    handle.set_state(SessionState::Disconnecting);
    let _ = cfg
        .auth
        .update_session_stats(handle.id, handle.bytes_sent(), handle.bytes_received())
        .await;
    let _ = cfg.auth.end_session(handle.id).await;
    cfg.auth
        .log_connection_event(
            Some(handle.user_id),
            ConnectionLogEvent::Disconnect,
            Some(&cfg.peer_addr),
            None,
            None,
        )
        .await;
    cfg.registry.unregister(handle.id, handle.assigned_ip);
    cfg.ip_pool.release(handle.assigned_ip);
    handle.set_state(SessionState::Disconnected);
    info!(id = %handle.id, "session closed");

    result
}

/// Send the post-auth handshake and run the data-bridging loop. Any error
/// here (including a write failure) is returned rather than propagated with
/// `?`, so the caller can run its cleanup unconditionally.
async fn run_active<S>(
    socket: &mut S,
    read_buf: &mut BytesMut,
    write_buf: &mut BytesMut,
    handle: &Arc<SessionHandle>,
    outbound_rx: mpsc::Receiver<Frame>,
    cfg: &SessionConfig,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    send_auth_success(socket, write_buf, handle, cfg).await?;
    cfg.registry.bind_ip(handle.id, handle.assigned_ip);
    handle.set_state(SessionState::Active);
    let span = tracing::info_span!("session", id = %handle.id, user = %handle.username);
    span.in_scope(|| info!(ip = %handle.assigned_ip, "session active"));

    active_loop(socket, read_buf, write_buf, handle, outbound_rx, cfg)
        .instrument(span)
        .await
}

async fn authenticate_and_register(
    cfg: &SessionConfig,
    request: &AuthRequestPayload,
) -> Result<(Arc<SessionHandle>, mpsc::Receiver<Frame>), AuthError> {
    let user = cfg
        .auth
        .authenticate(&request.username, &request.password, request.platform.as_str(), &cfg.peer_addr)
        .await?;

    let assigned_ip = cfg.ip_pool.allocate().map_err(|_| AuthError::PoolExhausted)?;

    let issued = match cfg
        .auth
        .create_session(
            &user,
            &assigned_ip.to_string(),
            request.platform.as_str(),
            &cfg.peer_addr,
            &request.client_version,
        )
        .await
    {
        Ok(issued) => issued,
        Err(e) => {
            cfg.ip_pool.release(assigned_ip);
            return Err(AuthError::Internal(e.to_string()));
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel(256);
    let handle = Arc::new(SessionHandle {
        id: issued.session_id,
        user_id: user.id,
        username: user.username,
        assigned_ip,
        state: Mutex::new(SessionState::Authenticated),
        last_activity: Mutex::new(Instant::now()),
        bytes_sent: AtomicU64::new(0),
        bytes_received: AtomicU64::new(0),
        outbound_tx,
    });
    cfg.registry.register(handle.clone());
    cfg.auth
        .log_connection_event(
            Some(handle.user_id),
            ConnectionLogEvent::Connect,
            Some(&cfg.peer_addr),
            Some(request.platform.as_str()),
            None,
        )
        .await;

    Ok((handle, outbound_rx))
}

async fn active_loop<S>(
    socket: &mut S,
    read_buf: &mut BytesMut,
    write_buf: &mut BytesMut,
    handle: &Arc<SessionHandle>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    cfg: &SessionConfig,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut ticker = interval(cfg.keepalive_interval);
    let mut keepalive_sent_at: Option<Instant> = None;

    loop {
        tokio::select! {
            frame = read_frame(socket, read_buf, cfg.max_payload) => {
                match frame? {
                    Some(Frame::Data(data)) => {
                        handle.touch();
                        keepalive_sent_at = None;
                        handle.bytes_received.fetch_add((codec::HDR_LEN + data.payload.len()) as u64, Ordering::Relaxed);
                        if data.invalid() {
                            warn!(id = %handle.id, "dropping undersized data packet");
                            continue;
                        }
                        let _ = cfg.router_tx.send(RouterInbound { src: handle.assigned_ip, payload: data.payload }).await;
                    }
                    Some(Frame::KeepAlive) => {
                        handle.touch();
                        let _ = cfg.auth.update_session_activity(handle.id).await;
                        write_frame(socket, write_buf, &Frame::KeepAliveAck).await?;
                        handle.bytes_sent.fetch_add(codec::HDR_LEN as u64, Ordering::Relaxed);
                    }
                    Some(Frame::KeepAliveAck) => {
                        handle.touch();
                        keepalive_sent_at = None;
                    }
                    Some(Frame::Disconnect) => {
                        debug!(id = %handle.id, "client requested disconnect");
                        return Ok(());
                    }
                    Some(Frame::AuthRequest(_)) => {
                        warn!(id = %handle.id, "duplicate AUTH_REQUEST while active, tearing down session");
                        return Err("unexpected AUTH_REQUEST in Active state".into());
                    }
                    Some(other) => {
                        warn!(id = %handle.id, frame = ?other, "dropping unexpected control message while active");
                        continue;
                    }
                    None => {
                        debug!(id = %handle.id, "peer closed connection");
                        return Ok(());
                    }
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let bytes = write_frame(socket, write_buf, &frame).await?;
                        handle.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
                    }
                    None => return Ok(()),
                }
            }
            _ = ticker.tick() => {
                let idle = handle.idle_for();
                if idle >= cfg.idle_timeout {
                    info!(id = %handle.id, "session idle timeout, disconnecting");
                    let _ = write_frame(socket, write_buf, &Frame::Error(ErrorPayload {
                        code: ErrorPayload::SESSION_TIMEOUT,
                        message: "Session timed out due to inactivity".into(),
                    })).await;
                    let _ = write_frame(socket, write_buf, &Frame::Disconnect).await;
                    return Ok(());
                }
                if idle >= cfg.idle_warn_after && keepalive_sent_at.is_none() {
                    let bytes = write_frame(socket, write_buf, &Frame::KeepAlive).await?;
                    handle.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
                    keepalive_sent_at = Some(Instant::now());
                }
            }
        }
    }
}

async fn send_auth_failure<S>(
    socket: &mut S,
    write_buf: &mut BytesMut,
    err: &AuthError,
) -> crate::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = Frame::AuthResponse(AuthResponsePayload {
        success: false,
        error_message: Some(err.client_message().to_string()),
        session_token: None,
    });
    write_frame(socket, write_buf, &response).await?;
    write_frame(socket, write_buf, &Frame::Disconnect).await?;
    Ok(())
}

async fn send_auth_success<S>(
    socket: &mut S,
    write_buf: &mut BytesMut,
    handle: &SessionHandle,
    cfg: &SessionConfig,
) -> crate::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = Frame::AuthResponse(AuthResponsePayload {
        success: true,
        error_message: None,
        session_token: Some(handle.id.to_string()),
    });
    write_frame(socket, write_buf, &response).await?;

    let push = Frame::ConfigPush(ConfigPushPayload {
        assigned_ip: handle.assigned_ip.to_string(),
        subnet_mask: cfg.ip_pool.subnet_mask().to_string(),
        gateway: cfg.ip_pool.gateway().to_string(),
        dns: cfg.dns.iter().map(|ip| ip.to_string()).collect(),
        mtu: cfg.mtu,
        keepalive_interval: cfg.keepalive_interval.as_secs() as u32,
    });
    write_frame(socket, write_buf, &push).await?;
    Ok(())
}

async fn read_frame<S>(
    socket: &mut S,
    buf: &mut BytesMut,
    max_payload: usize,
) -> crate::Result<Option<Frame>>
where
    S: AsyncRead + Unpin,
{
    loop {
        match codec::decode_one(buf, max_payload) {
            Ok((frame, consumed)) => {
                let _ = buf.split_to(consumed);
                return Ok(Some(frame));
            }
            Err(codec::FrameError::Need(_)) => {
                let mut chunk = [0u8; 4096];
                let n = socket.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn write_frame<S>(socket: &mut S, buf: &mut BytesMut, frame: &Frame) -> crate::Result<usize>
where
    S: AsyncWrite + Unpin,
{
    buf.clear();
    codec::encode(frame, buf)?;
    socket.write_all(buf).await?;
    Ok(buf.len())
}

/// Test-only constructors that reach past `SessionHandle`'s private
/// fields, kept out of the public API surface.
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn test_handle(ip: Ipv4Addr) -> Arc<SessionHandle> {
        let (outbound_tx, _outbound_rx) = mpsc::channel(1);
        Arc::new(SessionHandle {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            username: "test-user".into(),
            assigned_ip: ip,
            state: Mutex::new(SessionState::Active),
            last_activity: Mutex::new(Instant::now()),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            outbound_tx,
        })
    }
}
