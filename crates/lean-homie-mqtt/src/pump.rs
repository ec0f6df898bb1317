//! The ingestion activity: polls the event loop, forwards publishes into the
//! bounded inbox and reconnects with exponential backoff.

use lean_homie_core::{Backoff, ConnectionEvent, InboundMessage};
use rumqttc::{Event, EventLoop, Packet, Publish};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// What to do before the next connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Retry after the backoff delay
    After(Duration),
    /// Wait for the link layer; no backoff attempt is spent
    WhenLinkUp,
}

/// Outcome of a poll error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorOutcome {
    /// The session was up until this error
    pub disconnected: bool,
    /// How to retry
    pub reconnect: Reconnect,
}

/// Connection flag plus transport backoff, driven by poll results.
#[derive(Debug)]
pub struct Reconnector {
    connected: Arc<AtomicBool>,
    backoff: Backoff,
}

impl Reconnector {
    /// Track `connected` using `backoff` between failed attempts.
    #[must_use]
    pub fn new(connected: Arc<AtomicBool>, backoff: Backoff) -> Self {
        Self { connected, backoff }
    }

    /// The broker accepted the connection.
    pub fn on_connack(&mut self) {
        self.connected.store(true, Ordering::Release);
        self.backoff.reset();
    }

    /// A poll failed.
    pub fn on_error(&mut self, link_up: bool) -> ErrorOutcome {
        let disconnected = self.connected.swap(false, Ordering::AcqRel);
        let reconnect = if link_up {
            Reconnect::After(self.backoff.next_delay())
        } else {
            Reconnect::WhenLinkUp
        };
        ErrorOutcome {
            disconnected,
            reconnect,
        }
    }

    /// Failed attempts since the last connection.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }
}

/// Block until the next attempt may start. Returns `false` once the link
/// watcher is gone.
async fn wait_to_reconnect(reconnect: Reconnect, link: &mut watch::Receiver<bool>) -> bool {
    match reconnect {
        Reconnect::After(delay) => {
            tokio::time::sleep(delay).await;
            true
        }
        Reconnect::WhenLinkUp => link.wait_for(|up| *up).await.is_ok(),
    }
}

/// Drives the broker connection.
pub struct MqttEventPump {
    eventloop: EventLoop,
    reconnector: Reconnector,
}

impl MqttEventPump {
    pub(crate) fn new(eventloop: EventLoop, connected: Arc<AtomicBool>) -> Self {
        Self {
            eventloop,
            reconnector: Reconnector::new(connected, Backoff::default()),
        }
    }

    /// Poll until `events` is closed.
    ///
    /// Publishes go to `inbox` without ever waiting on it; a full inbox
    /// drops the message. While `link` reports down, reconnection waits for
    /// it to come back instead of burning backoff attempts.
    pub async fn run(
        mut self,
        inbox: mpsc::Sender<InboundMessage>,
        events: mpsc::Sender<ConnectionEvent>,
        mut link: watch::Receiver<bool>,
    ) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    self.reconnector.on_connack();
                    if events.send(ConnectionEvent::TransportConnected).await.is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(message) = to_inbound(&publish) else {
                        continue;
                    };
                    tracing::debug!(
                        topic = %message.topic,
                        payload_len = message.payload.len(),
                        retained = message.retained,
                        "Received MQTT message"
                    );
                    match inbox.try_send(message) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(dropped)) => {
                            tracing::warn!(topic = %dropped.topic, "Inbound queue full, dropping message");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::warn!("Inbound receiver dropped, stopping pump");
                            break;
                        }
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    tracing::debug!("Subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    let outcome = self.reconnector.on_error(*link.borrow_and_update());
                    if outcome.disconnected {
                        tracing::warn!(error = %e, "Disconnected from MQTT broker");
                        if events
                            .send(ConnectionEvent::TransportDisconnected(e.to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }

                    match outcome.reconnect {
                        Reconnect::After(delay) => tracing::info!(
                            error = %e,
                            attempt = self.reconnector.attempts(),
                            delay_secs = delay.as_secs(),
                            "Reconnecting to MQTT broker"
                        ),
                        Reconnect::WhenLinkUp => {
                            tracing::info!("Link down, waiting before reconnecting");
                        }
                    }
                    if !wait_to_reconnect(outcome.reconnect, &mut link).await {
                        tracing::warn!("Link watcher dropped, stopping pump");
                        break;
                    }
                }
            }
        }
        self.reconnector.connected.store(false, Ordering::Release);
    }
}

/// Copy a publish into an inbox message; empty retained payloads are dropped.
fn to_inbound(publish: &Publish) -> Option<InboundMessage> {
    if publish.retain && publish.payload.is_empty() {
        tracing::debug!(topic = %publish.topic, "Ignoring empty retained message");
        return None;
    }
    let payload = match std::str::from_utf8(&publish.payload) {
        Ok(payload) => payload.to_string(),
        Err(err) => {
            tracing::warn!(
                topic = %publish.topic,
                error = %err,
                "Payload is not valid UTF-8, replacing invalid bytes"
            );
            String::from_utf8_lossy(&publish.payload).into_owned()
        }
    };
    Some(InboundMessage {
        topic: publish.topic.clone(),
        payload,
        retained: publish.retain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;
    use tokio::time::Instant;

    fn reconnector(connected: bool) -> Reconnector {
        Reconnector::new(Arc::new(AtomicBool::new(connected)), Backoff::default())
    }

    #[test]
    fn retained_flag_carried_over() {
        let mut publish = Publish::new("homie/dev/node/p", QoS::AtLeastOnce, "5");
        publish.retain = true;

        let message = to_inbound(&publish).unwrap();

        assert_eq!(message, InboundMessage::retained("homie/dev/node/p", "5"));
    }

    #[test]
    fn empty_retained_ignored() {
        let mut publish = Publish::new("homie/dev/node/p", QoS::AtLeastOnce, "");
        publish.retain = true;

        assert!(to_inbound(&publish).is_none());
    }

    #[test]
    fn empty_live_command_kept() {
        let publish = Publish::new("homie/dev/node/p/set", QoS::AtLeastOnce, "");

        assert_eq!(
            to_inbound(&publish),
            Some(InboundMessage::live("homie/dev/node/p/set", ""))
        );
    }

    #[test]
    fn invalid_utf8_replaced() {
        let publish = Publish::new("homie/dev/node/p", QoS::AtLeastOnce, vec![b'4', 0xff]);

        let message = to_inbound(&publish).unwrap();

        assert_eq!(message.payload, "4\u{fffd}");
    }

    #[test]
    fn disconnect_reported_once_per_session() {
        let mut reconnector = reconnector(true);

        let first = reconnector.on_error(true);
        let second = reconnector.on_error(true);

        assert!(first.disconnected);
        assert!(!second.disconnected);
        assert_eq!(first.reconnect, Reconnect::After(Duration::from_secs(2)));
        assert_eq!(second.reconnect, Reconnect::After(Duration::from_secs(4)));
    }

    #[test]
    fn connack_resets_backoff() {
        let connected = Arc::new(AtomicBool::new(false));
        let mut reconnector = Reconnector::new(connected.clone(), Backoff::default());
        for _ in 0..3 {
            reconnector.on_error(true);
        }
        assert_eq!(reconnector.attempts(), 3);

        reconnector.on_connack();

        assert!(connected.load(Ordering::Acquire));
        assert_eq!(reconnector.attempts(), 0);
        let outcome = reconnector.on_error(true);
        assert!(outcome.disconnected);
        assert_eq!(outcome.reconnect, Reconnect::After(Duration::from_secs(2)));
    }

    #[test]
    fn link_down_spends_no_attempts() {
        let mut reconnector = reconnector(false);

        assert_eq!(reconnector.on_error(false).reconnect, Reconnect::WhenLinkUp);
        assert_eq!(reconnector.on_error(false).reconnect, Reconnect::WhenLinkUp);
        assert_eq!(reconnector.attempts(), 0);
        assert_eq!(
            reconnector.on_error(true).reconnect,
            Reconnect::After(Duration::from_secs(2))
        );
    }

    #[test]
    fn backoff_capped() {
        let mut reconnector = Reconnector::new(
            Arc::new(AtomicBool::new(false)),
            Backoff::new(Duration::from_secs(1), Duration::from_secs(4)),
        );

        let delays: Vec<_> = (0..4).map(|_| reconnector.on_error(true).reconnect).collect();

        assert_eq!(delays[2], Reconnect::After(Duration::from_secs(4)));
        assert_eq!(delays[3], Reconnect::After(Duration::from_secs(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_backoff_delay() {
        let (_link_tx, mut link_rx) = watch::channel(true);
        let start = Instant::now();

        assert!(wait_to_reconnect(Reconnect::After(Duration::from_secs(8)), &mut link_rx).await);

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(8) && waited < Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_link_to_return() {
        let (link_tx, mut link_rx) = watch::channel(false);

        let pending = tokio::time::timeout(
            Duration::from_secs(600),
            wait_to_reconnect(Reconnect::WhenLinkUp, &mut link_rx),
        )
        .await;
        assert!(pending.is_err());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            link_tx.send_replace(true);
            // keep the sender alive until the waiter has seen the change
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(wait_to_reconnect(Reconnect::WhenLinkUp, &mut link_rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_link_watcher_dropped() {
        let (link_tx, mut link_rx) = watch::channel(false);
        drop(link_tx);

        assert!(!wait_to_reconnect(Reconnect::WhenLinkUp, &mut link_rx).await);
    }
}
