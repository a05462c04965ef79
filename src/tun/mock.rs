//! In-memory TUN double for tests: two channels standing in for the
//! kernel interface, with no process spawning and no root privileges
//! required.

use super::TunDevice;
use crate::error::TunError;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

pub struct MockTun {
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl MockTun {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        Self {
            inbound_rx: Mutex::new(inbound_rx),
            inbound_tx,
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        }
    }

    /// Simulate a packet arriving from the kernel (test injects inbound
    /// traffic as if a local application sent it out through the tunnel).
    pub async fn inject(&self, packet: Vec<u8>) {
        let _ = self.inbound_tx.send(packet).await;
    }

    /// Pull a packet the device-under-test wrote out, for assertions.
    pub async fn written(&self) -> Option<Vec<u8>> {
        self.outbound_rx.lock().await.recv().await
    }
}

impl Default for MockTun {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunDevice for MockTun {
    async fn recv(&self) -> Result<Vec<u8>, TunError> {
        self.inbound_rx.lock().await.recv().await.ok_or(TunError::Closed)
    }

    async fn send(&self, packet: Vec<u8>) -> Result<(), TunError> {
        self.outbound_tx
            .send(packet)
            .await
            .map_err(|_| TunError::Closed)
    }

    async fn destroy(&self) -> Result<(), TunError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_packets_are_received() {
        let tun = MockTun::new();
        tun.inject(vec![1, 2, 3]).await;
        assert_eq!(tun.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn sent_packets_are_observable() {
        let tun = MockTun::new();
        tun.send(vec![4, 5, 6]).await.unwrap();
        assert_eq!(tun.written().await.unwrap(), vec![4, 5, 6]);
    }
}
