//! Bridges the TUN device and the session registry (spec.md §4.7).
//!
//! New relative to the teacher, which looks up the destination directly
//! inside the per-session handler, coupling routing to the session task.
//! Here routing is its own task: modeled on the teacher's `Device::run`
//! bridging loop (`tokio::select!` over a TUN read and an inbound
//! channel), decoupled from any one session via [`SessionRegistry`]
//! reverse lookup.

use crate::registry::SessionRegistry;
use crate::session::RouterInbound;
use crate::tun::TunDevice;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const MIN_IPV4_HEADER: usize = 20;

pub struct Router {
    tun: Arc<dyn TunDevice>,
    registry: Arc<SessionRegistry>,
    inbound_rx: mpsc::Receiver<RouterInbound>,
}

impl Router {
    pub fn new(
        tun: Arc<dyn TunDevice>,
        registry: Arc<SessionRegistry>,
        inbound_rx: mpsc::Receiver<RouterInbound>,
    ) -> Self {
        Self {
            tun,
            registry,
            inbound_rx,
        }
    }

    /// Bridge packets until the TUN device closes or a shutdown signal
    /// fires. Runs as its own task, separate from the TLS listener.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                packet = self.tun.recv() => {
                    match packet {
                        Ok(packet) => self.route_to_client(packet).await,
                        Err(e) => {
                            warn!("tun read failed, stopping router: {e}");
                            break;
                        }
                    }
                }
                inbound = self.inbound_rx.recv() => {
                    match inbound {
                        Some(inbound) => {
                            if inbound.payload.len() < MIN_IPV4_HEADER {
                                debug!(src = %inbound.src, len = inbound.payload.len(), "dropping undersized packet from client");
                                continue;
                            }
                            if let Err(e) = self.tun.send(inbound.payload).await {
                                warn!(src = %inbound.src, "tun write failed: {e}");
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("router shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn route_to_client(&self, packet: Vec<u8>) {
        if packet.len() < MIN_IPV4_HEADER {
            debug!(len = packet.len(), "dropping undersized packet from tun");
            return;
        }
        let dst = std::net::Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
        match self.registry.lookup_by_ip(dst) {
            Some(session) => {
                if !session.deliver(packet).await {
                    warn!(%dst, "session outbound queue closed, dropping packet");
                }
            }
            None => debug!(%dst, "no session bound to destination, dropping packet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::test_handle;
    use crate::tun::mock::MockTun;
    use std::net::Ipv4Addr;

    fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[12..16].copy_from_slice(&src.octets());
        packet[16..20].copy_from_slice(&dst.octets());
        packet
    }

    #[tokio::test]
    async fn routes_tun_packet_to_bound_session() {
        let tun = Arc::new(MockTun::new());
        let registry = Arc::new(SessionRegistry::new());
        let dst = Ipv4Addr::new(10, 8, 0, 5);
        let h = test_handle(dst);
        let id = h.id;
        registry.register(h);
        registry.bind_ip(id, dst);

        let (_tx, rx) = mpsc::channel(1);
        let router = Router::new(tun.clone(), registry, rx);

        tun.inject(ipv4_packet(Ipv4Addr::new(1, 2, 3, 4), dst)).await;
        router.route_to_client(tun.recv().await.unwrap()).await;
    }

    #[tokio::test]
    async fn drops_packet_with_no_bound_session() {
        let tun = Arc::new(MockTun::new());
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, rx) = mpsc::channel(1);
        let router = Router::new(tun, registry, rx);

        let packet = ipv4_packet(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(10, 8, 0, 9));
        router.route_to_client(packet).await; // must not panic
    }

    #[tokio::test]
    async fn forwards_client_packet_onto_tun() {
        let tun = Arc::new(MockTun::new());
        let registry = Arc::new(SessionRegistry::new());
        let (tx, rx) = mpsc::channel(1);
        let router = Router::new(tun.clone(), registry, rx);

        tx.send(RouterInbound {
            src: Ipv4Addr::new(10, 8, 0, 2),
            payload: vec![9, 9, 9],
        })
        .await
        .unwrap();
        drop(tx);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(router.run(shutdown_rx));
        let written = tun.written().await;
        assert_eq!(written, Some(vec![9, 9, 9]));
        drop(shutdown_tx);
        let _ = handle.await;
    }
}
