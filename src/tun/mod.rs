pub mod kernel;
pub mod mock;

use crate::error::TunError;
use async_trait::async_trait;
use std::net::Ipv4Addr;

#[derive(Clone, Debug)]
pub struct TunConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub mtu: u16,
}

/// Capability for reading/writing IPv4 packets to the host's tunnel
/// interface. A trait rather than a concrete type so the router and
/// session layers can run against an in-memory double in tests — see
/// [`mock::MockTun`].
#[async_trait]
pub trait TunDevice: Send + Sync {
    /// Read the next packet off the device. Blocks until one is ready.
    async fn recv(&self) -> Result<Vec<u8>, TunError>;

    /// Write a packet to the device.
    async fn send(&self, packet: Vec<u8>) -> Result<(), TunError>;

    /// Tear the device down and undo any routing/NAT setup performed at
    /// creation time.
    async fn destroy(&self) -> Result<(), TunError>;
}
