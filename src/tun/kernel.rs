//! Real TUN device backed by the `tun` crate plus `ip`/`iptables` for
//! forwarding and NAT, grounded on the teacher's `Device`/`DeviceHandler`
//! pair (`src/utils/device.rs`) and `SysRoute` (`src/utils/sys_route.rs`).

use super::{TunConfig, TunDevice};
use crate::error::TunError;
use async_trait::async_trait;
use std::process::Command;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tun::AbstractDevice;

const READ_BUF_SIZE: usize = 2048;
const CHANNEL_DEPTH: usize = 1000;

/// Owns the background task that bridges the kernel TUN fd to async
/// channels, and the NAT/forwarding rules set up at creation time.
pub struct KernelTun {
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    iface_name: String,
}

impl KernelTun {
    /// Create and bring up a TUN device, enable IPv4 forwarding, and add a
    /// masquerade rule so tunneled clients can reach the outside network.
    pub async fn create(cfg: TunConfig) -> Result<Self, TunError> {
        let mut tun_cfg = tun::Configuration::default();
        tun_cfg
            .address(cfg.address.to_string())
            .netmask(cfg.netmask.to_string())
            .mtu(cfg.mtu)
            .up();

        #[cfg(target_os = "linux")]
        tun_cfg.platform_config(|platform| {
            platform.ensure_root_privileges(true);
        });

        let mut dev =
            tun::create_as_async(&tun_cfg).map_err(|e| TunError::Create(e.to_string()))?;
        let iface_name = dev.tun_name().unwrap_or_default();

        // Soft-fail: a container without NET_ADMIN (or a host that already
        // has forwarding/NAT configured externally) shouldn't abort startup.
        if let Err(e) = enable_ip_forwarding() {
            tracing::warn!("failed to enable ip forwarding, continuing: {e}");
        }
        if let Err(e) = enable_masquerade(&iface_name) {
            tracing::warn!("failed to enable masquerade rule, continuing: {e}");
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUF_SIZE];
            let _ = ready_tx.send(());
            loop {
                tokio::select! {
                    read = dev.read(&mut buf) => {
                        match read {
                            Ok(n) => {
                                if inbound_tx.send(buf[..n].to_vec()).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!("tun read failed: {e}");
                                continue;
                            }
                        }
                    }
                    packet = outbound_rx.recv() => {
                        match packet {
                            Some(packet) => {
                                if let Err(e) = dev.write(&packet).await {
                                    tracing::error!("tun write failed: {e}");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        let _ = ready_rx.await;

        Ok(Self {
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            iface_name,
        })
    }
}

#[async_trait]
impl TunDevice for KernelTun {
    async fn recv(&self) -> Result<Vec<u8>, TunError> {
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TunError::Closed)
    }

    async fn send(&self, packet: Vec<u8>) -> Result<(), TunError> {
        self.outbound_tx
            .send(packet)
            .await
            .map_err(|_| TunError::Closed)
    }

    async fn destroy(&self) -> Result<(), TunError> {
        disable_masquerade(&self.iface_name);
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn enable_ip_forwarding() -> Result<(), TunError> {
    let output = Command::new("sysctl")
        .args(["-w", "net.ipv4.ip_forward=1"])
        .output()
        .map_err(|e| TunError::Create(format!("sysctl ip_forward: {e}")))?;
    if !output.status.success() {
        return Err(TunError::Create(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn enable_ip_forwarding() -> Result<(), TunError> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn enable_masquerade(iface: &str) -> Result<(), TunError> {
    let output = Command::new("iptables")
        .args(["-t", "nat", "-A", "POSTROUTING", "-o", iface, "-j", "MASQUERADE"])
        .output()
        .map_err(|e| TunError::Create(format!("iptables masquerade: {e}")))?;
    if !output.status.success() {
        return Err(TunError::Create(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn enable_masquerade(_iface: &str) -> Result<(), TunError> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn disable_masquerade(iface: &str) {
    let _ = Command::new("iptables")
        .args(["-t", "nat", "-D", "POSTROUTING", "-o", iface, "-j", "MASQUERADE"])
        .output();
}

#[cfg(not(target_os = "linux"))]
fn disable_masquerade(_iface: &str) {}
