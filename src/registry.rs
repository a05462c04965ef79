//! Dual-indexed registry of live sessions, keyed by session id and by
//! tunnel IP. Grounded on the teacher's `ConnectionManager`
//! (`src/network/connection_manager.rs`): an `RwLock`-guarded map with
//! add/remove/lookup, generalized from the teacher's single
//! cluster-keyed map to the two maps routing needs — session lookup for
//! the supervisor's sweep, IP lookup for the packet router.

use crate::session::SessionHandle;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct SessionRegistry {
    by_id: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    by_ip: RwLock<HashMap<Ipv4Addr, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a freshly created session by id only. The session is not
    /// reachable by its tunnel IP until [`Self::bind_ip`] runs at the
    /// Active transition — the packet router must never deliver traffic
    /// to a session that hasn't finished authenticating.
    pub fn register(&self, handle: Arc<SessionHandle>) {
        tracing::debug!(id = %handle.id, "registering session");
        self.by_id
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.id, handle);
    }

    /// Bind a registered session's tunnel IP, making it visible to
    /// `lookup_by_ip`. Called once the session enters `Active`.
    pub fn bind_ip(&self, id: Uuid, ip: Ipv4Addr) {
        let handle = self.by_id.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned();
        let Some(handle) = handle else {
            tracing::warn!(%id, %ip, "bind_ip called for unregistered session");
            return;
        };
        tracing::debug!(%id, %ip, "binding session ip");
        self.by_ip
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ip, handle);
    }

    pub fn unregister(&self, id: Uuid, ip: Ipv4Addr) {
        tracing::debug!(%id, %ip, "unregistering session");
        self.by_id.write().unwrap_or_else(|e| e.into_inner()).remove(&id);
        self.by_ip.write().unwrap_or_else(|e| e.into_inner()).remove(&ip);
    }

    pub fn lookup_by_id(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.by_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn lookup_by_ip(&self, ip: Ipv4Addr) -> Option<Arc<SessionHandle>> {
        self.by_ip
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ip)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<SessionHandle>> {
        self.by_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
