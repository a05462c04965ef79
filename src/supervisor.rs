//! TLS-accepting listener and process lifecycle (spec.md §4.8).
//!
//! Grounded on the teacher's `Server::run`/`handle_conn`
//! (`src/server/server.rs`): an accept loop that spawns one task per
//! connection and hands it off immediately. TLS acceptance via
//! `tokio_rustls::TlsAcceptor` is new — the teacher ships no TLS, relying
//! on an application-layer AEAD `Block` instead — adapted from
//! `examples/other_examples/.../pegasusheavy-corevpn` server's
//! `load_tls_config`/`rustls::ServerConfig` pattern. Shutdown sequencing
//! (stop accepting, broadcast DISCONNECT, bounded grace wait, stop
//! router, destroy TUN) is new, built on the teacher's `tokio::select!`
//! idiom and `tokio::signal::ctrl_c()`.

use crate::auth::AuthService;
use crate::codec::Frame;
use crate::config::Config;
use crate::error::TlsError;
use crate::pool::IpPool;
use crate::registry::SessionRegistry;
use crate::router::Router;
use crate::session::{self, RouterInbound, SessionConfig};
use crate::tun::TunDevice;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

pub struct Supervisor {
    config: Arc<Config>,
    auth: Arc<AuthService>,
    ip_pool: Arc<IpPool>,
    registry: Arc<SessionRegistry>,
    tun: Arc<dyn TunDevice>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        auth: Arc<AuthService>,
        ip_pool: Arc<IpPool>,
        registry: Arc<SessionRegistry>,
        tun: Arc<dyn TunDevice>,
    ) -> Self {
        Self {
            config,
            auth,
            ip_pool,
            registry,
            tun,
        }
    }

    /// Accept connections and bridge TUN traffic until a shutdown signal
    /// arrives, then drain gracefully.
    pub async fn run(self) -> crate::Result<()> {
        let tls_acceptor = build_tls_acceptor(&self.config)?;
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!(addr = %self.config.listen_addr(), "listening");

        let (router_tx, router_rx) = mpsc::channel::<RouterInbound>(1000);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let router = Router::new(self.tun.clone(), self.registry.clone(), router_rx);
        let router_task = tokio::spawn(router.run(shutdown_rx.clone()));

        let sweep_task = tokio::spawn(sweep_stale_sessions(
            self.auth.clone(),
            self.config.stale_sweep_interval,
            shutdown_rx.clone(),
        ));

        let accept_result = self
            .accept_loop(listener, tls_acceptor, router_tx, shutdown_rx.clone())
            .await;

        info!("shutting down: broadcasting disconnect to active sessions");
        broadcast_disconnect(&self.registry).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let _ = shutdown_tx.send(true);
        let _ = router_task.await;
        let _ = sweep_task.await;
        let _ = self.tun.destroy().await;

        accept_result
    }

    async fn accept_loop(
        &self,
        listener: TcpListener,
        tls_acceptor: TlsAcceptor,
        router_tx: mpsc::Sender<RouterInbound>,
        mut shutdown: watch::Receiver<bool>,
    ) -> crate::Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let acceptor = tls_acceptor.clone();
                    let session_cfg = self.session_config(router_tx.clone(), peer.to_string());
                    tokio::spawn(async move {
                        let tls_stream = match acceptor.accept(stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(%peer, "TLS handshake failed: {e}");
                                return;
                            }
                        };
                        if let Err(e) = session::run(tls_stream, session_cfg).await {
                            warn!(%peer, "session ended with error: {e}");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("accept loop stopping");
                        return Ok(());
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    fn session_config(&self, router_tx: mpsc::Sender<RouterInbound>, peer_addr: String) -> SessionConfig {
        SessionConfig {
            auth: self.auth.clone(),
            ip_pool: self.ip_pool.clone(),
            registry: self.registry.clone(),
            router_tx,
            peer_addr,
            dns: self.config.vpn_dns.clone(),
            mtu: self.config.vpn_mtu,
            keepalive_interval: self.config.keepalive_interval,
            idle_warn_after: self.config.idle_warn_after,
            idle_timeout: self.config.idle_timeout,
            auth_timeout: self.config.auth_timeout,
            max_payload: self.config.max_payload,
        }
    }
}

async fn sweep_stale_sessions(
    auth: Arc<AuthService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match auth.cleanup_stale_sessions(5).await {
                    Ok(n) if n > 0 => info!(closed = n, "swept stale sessions"),
                    Ok(_) => {}
                    Err(e) => error!("stale session sweep failed: {e}"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn broadcast_disconnect(registry: &SessionRegistry) {
    for session in registry.all() {
        let _ = session.send_control(Frame::Disconnect).await;
    }
}

fn build_tls_acceptor(config: &Config) -> crate::Result<TlsAcceptor> {
    let certs = load_certs(&config.tls_cert_path)?;
    let key = load_key(&config.tls_key_path)?;

    let server_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = std::fs::read(path).map_err(|e| TlsError::CertLoad(e.to_string()))?;
    let mut reader = std::io::BufReader::new(file.as_slice());
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertLoad(e.to_string()))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = std::fs::read(path).map_err(|e| TlsError::KeyLoad(e.to_string()))?;
    let mut reader = std::io::BufReader::new(file.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::KeyLoad(e.to_string()))?
        .ok_or_else(|| TlsError::KeyLoad(format!("no private key found in {path}")))
}
