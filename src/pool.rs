//! IPv4 address pool for per-session tunnel addresses.
//!
//! One pool backs the whole server, carved out of a single CIDR block
//! (spec.md §4.4). The gateway address (lowest host address in the block)
//! is reserved up front and never handed out; allocation otherwise picks
//! the lowest free host address first, which keeps behavior deterministic
//! for tests.

use crate::error::PoolError;
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub available: usize,
}

struct Inner {
    net: Ipv4Net,
    gateway: Ipv4Addr,
    in_use: HashSet<Ipv4Addr>,
}

/// Thread-safe CIDR-backed address allocator.
pub struct IpPool {
    inner: Mutex<Inner>,
}

impl IpPool {
    /// Build a pool over `net`. The network's first host address becomes
    /// the gateway and is pre-reserved.
    pub fn new(net: Ipv4Net) -> Self {
        let gateway = first_host(net);
        let mut in_use = HashSet::new();
        in_use.insert(gateway);
        Self {
            inner: Mutex::new(Inner {
                net,
                gateway,
                in_use,
            }),
        }
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.inner.lock().unwrap().gateway
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.inner.lock().unwrap().net.netmask()
    }

    /// Claim the lowest free host address in the block.
    pub fn allocate(&self) -> Result<Ipv4Addr, PoolError> {
        let mut inner = self.inner.lock().unwrap();
        let net = inner.net;
        for addr in net.hosts() {
            if addr == net.broadcast() {
                continue;
            }
            if !inner.in_use.contains(&addr) {
                inner.in_use.insert(addr);
                return Ok(addr);
            }
        }
        Err(PoolError::Exhausted)
    }

    /// Return `addr` to the pool. No-op if it wasn't allocated, or if it
    /// is the reserved gateway address.
    pub fn release(&self, addr: Ipv4Addr) {
        let mut inner = self.inner.lock().unwrap();
        if addr == inner.gateway {
            return;
        }
        inner.in_use.remove(&addr);
    }

    pub fn is_in_use(&self, addr: Ipv4Addr) -> bool {
        self.inner.lock().unwrap().in_use.contains(&addr)
    }

    /// `total` counts every host address in the block, including the
    /// reserved gateway; `in_use` likewise always counts the gateway, so
    /// client-allocatable capacity is `total - 1`.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap();
        let total = inner.net.hosts().count();
        let in_use = inner.in_use.len();
        PoolStats {
            total,
            in_use,
            available: total.saturating_sub(in_use),
        }
    }
}

fn first_host(net: Ipv4Net) -> Ipv4Addr {
    net.hosts().next().unwrap_or(net.network())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> IpPool {
        IpPool::new("10.8.0.0/24".parse().unwrap())
    }

    #[test]
    fn gateway_is_reserved() {
        let p = pool();
        assert_eq!(p.gateway(), Ipv4Addr::new(10, 8, 0, 1));
        assert!(p.is_in_use(p.gateway()));
    }

    #[test]
    fn allocate_is_lowest_first_and_skips_gateway() {
        let p = pool();
        assert_eq!(p.allocate().unwrap(), Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(p.allocate().unwrap(), Ipv4Addr::new(10, 8, 0, 3));
    }

    #[test]
    fn release_allows_reuse() {
        let p = pool();
        let a = p.allocate().unwrap();
        p.release(a);
        let b = p.allocate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn release_of_gateway_is_ignored() {
        let p = pool();
        let gw = p.gateway();
        p.release(gw);
        assert!(p.is_in_use(gw));
    }

    #[test]
    fn exhaustion_is_reported() {
        let p = IpPool::new("10.9.0.0/30".parse().unwrap());
        // /30 has 2 usable hosts; one is the gateway.
        let first = p.allocate().unwrap();
        assert!(p.allocate().is_err());
        p.release(first);
        assert!(p.allocate().is_ok());
    }

    #[test]
    fn stats_reflect_allocations() {
        let p = pool();
        p.allocate().unwrap();
        p.allocate().unwrap();
        let stats = p.stats();
        assert_eq!(stats.in_use, 3); // gateway + 2 allocated
        assert_eq!(stats.available, stats.total - 3);
    }
}
