//! Link-layer watcher: probes the host route to the broker.

use lean_homie_core::{Backoff, ConnectionEvent, Connectivity};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

/// Host network as seen from the device.
#[derive(Debug)]
pub struct HostLink {
    mac: String,
    broker_host: String,
    broker_port: u16,
    up: AtomicBool,
    local_ip: Mutex<Option<IpAddr>>,
}

impl HostLink {
    /// Create a link that probes the route to `broker_host:broker_port`.
    #[must_use]
    pub fn new(mac: impl Into<String>, broker_host: impl Into<String>, broker_port: u16) -> Self {
        Self {
            mac: mac.into(),
            broker_host: broker_host.into(),
            broker_port,
            up: AtomicBool::new(false),
            local_ip: Mutex::new(None),
        }
    }

    /// Resolve the broker and read the local address the route would use.
    ///
    /// A connected UDP socket sends nothing; this only consults the routing
    /// table.
    async fn probe(&self) -> std::io::Result<IpAddr> {
        let target = tokio::net::lookup_host((self.broker_host.as_str(), self.broker_port))
            .await?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address"))?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        Ok(socket.local_addr()?.ip())
    }

    fn mark(&self, up: bool, ip: Option<IpAddr>) -> bool {
        *self.local_ip.lock().unwrap_or_else(PoisonError::into_inner) = ip;
        self.up.swap(up, Ordering::AcqRel) != up
    }

    /// Probe forever, emitting link up/down transitions.
    ///
    /// Healthy links are re-probed every `poll`; a down link is retried on
    /// its own backoff schedule. Returns once `events` is closed.
    pub async fn watch(
        self: Arc<Self>,
        events: mpsc::Sender<ConnectionEvent>,
        state: watch::Sender<bool>,
        poll: Duration,
    ) {
        let mut backoff = Backoff::default();
        loop {
            let delay = match self.probe().await {
                Ok(ip) => {
                    backoff.reset();
                    if self.mark(true, Some(ip)) {
                        tracing::info!(local_ip = %ip, "Link up");
                        state.send_replace(true);
                        if events.send(ConnectionEvent::LinkUp).await.is_err() {
                            break;
                        }
                    }
                    poll
                }
                Err(e) => {
                    if self.mark(false, None) {
                        tracing::warn!(error = %e, "Link down");
                        state.send_replace(false);
                        if events.send(ConnectionEvent::LinkDown).await.is_err() {
                            break;
                        }
                    }
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        error = %e,
                        attempt = backoff.attempts(),
                        delay_secs = delay.as_secs(),
                        "Link probe failed"
                    );
                    delay
                }
            };
            tokio::time::sleep(delay).await;
        }
    }
}

impl Connectivity for HostLink {
    fn is_link_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    fn mac_address(&self) -> String {
        self.mac.clone()
    }

    fn local_ip(&self) -> Option<IpAddr> {
        *self.local_ip.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_broker_reports_loopback_address() {
        let link = HostLink::new("AA:BB:CC:DD:EE:FF", "127.0.0.1", 1883);

        let ip = link.probe().await.unwrap();

        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn watcher_emits_link_up_once() {
        let link = Arc::new(HostLink::new("AA:BB:CC:DD:EE:FF", "127.0.0.1", 1883));
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let (state_tx, mut state_rx) = watch::channel(false);

        let task = tokio::spawn(link.clone().watch(events_tx, state_tx, Duration::from_millis(10)));

        assert_eq!(events_rx.recv().await, Some(ConnectionEvent::LinkUp));
        state_rx.wait_for(|up| *up).await.unwrap();
        assert!(link.is_link_up());
        assert!(link.local_ip().is_some());
        assert_eq!(link.mac_address(), "AA:BB:CC:DD:EE:FF");

        drop(events_rx);
        task.abort();
    }
}
