//! Agent runtime: the connect cycle, dispatch activity and telemetry activity.
//!
//! The inbound queue is the only channel between ingestion and the device.
//! Reconciliation takes exclusive ownership of it for the settle window by
//! holding the queue lock; the dispatch activity gives the lock up whenever
//! the resume gate closes.

use crate::config::RuntimeConfig;
use lean_homie_core::{ConnectionEvent, Device, InboundMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shared handle to the device.
pub type SharedDevice = Arc<Mutex<Device>>;

/// The agent runtime.
#[derive(Clone)]
pub struct Runtime {
    device: SharedDevice,
    inbox: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
    resume: Arc<watch::Sender<bool>>,
    settle: Duration,
    setup_delay: Duration,
}

impl Runtime {
    /// Create a runtime around `device`, consuming messages from `inbox`.
    #[must_use]
    pub fn new(device: Device, inbox: mpsc::Receiver<InboundMessage>, config: &RuntimeConfig) -> Self {
        let (resume, _) = watch::channel(false);
        Self {
            device: Arc::new(Mutex::new(device)),
            inbox: Arc::new(Mutex::new(inbox)),
            resume: Arc::new(resume),
            settle: config.settle,
            setup_delay: config.setup_delay,
        }
    }

    /// Handle to the device.
    #[must_use]
    pub fn device(&self) -> SharedDevice {
        self.device.clone()
    }

    /// React to connection events until `events` is closed.
    pub async fn run(self, mut events: mpsc::Receiver<ConnectionEvent>) {
        tracing::info!("Starting agent runtime");

        let dispatch = tokio::spawn(self.clone().dispatch_loop());
        let telemetry = tokio::spawn(self.clone().telemetry_loop());
        let mut cycle: Option<JoinHandle<()>> = None;

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::TransportConnected => {
                    tracing::info!("Transport connected");
                    self.device.lock().await.mark_connected();
                    if let Some(previous) = cycle.take() {
                        previous.abort();
                    }
                    cycle = Some(tokio::spawn(self.clone().connect_cycle()));
                }
                ConnectionEvent::TransportDisconnected(reason) => {
                    tracing::warn!(reason, "Transport disconnected");
                    if let Some(previous) = cycle.take() {
                        previous.abort();
                    }
                    self.resume.send_replace(false);
                    self.device.lock().await.on_transport_disconnected();
                }
                ConnectionEvent::LinkUp => tracing::info!("Link layer up"),
                ConnectionEvent::LinkDown => tracing::warn!("Link layer down"),
            }
        }

        tracing::info!("Connection events closed, stopping runtime");
        if let Some(cycle) = cycle {
            cycle.abort();
        }
        dispatch.abort();
        telemetry.abort();
    }

    /// Setup or init, then reconcile the messages that arrive while settling.
    async fn connect_cycle(self) {
        tokio::time::sleep(self.setup_delay).await;
        self.resume.send_replace(false);

        if let Err(err) = self.device.lock().await.setup_or_init() {
            tracing::warn!(error = %err, "Setup aborted");
            return;
        }

        let mut inbox = self.inbox.lock().await;
        let deadline = Instant::now() + self.settle;
        let mut drained = Vec::new();
        while let Ok(Some(message)) = tokio::time::timeout_at(deadline, inbox.recv()).await {
            drained.push(message);
        }

        let outcome = self.device.lock().await.reconcile(drained);
        drop(inbox);
        tracing::info!(
            restored = outcome.restored,
            commanded = outcome.commanded,
            leftover = outcome.leftover,
            defaulted = outcome.defaulted,
            discarded = outcome.discarded,
            "Reconciliation finished"
        );
        self.resume.send_replace(true);
    }

    async fn dispatch_loop(self) {
        let mut gate = self.resume.subscribe();
        loop {
            if gate.wait_for(|open| *open).await.is_err() {
                return;
            }
            let mut inbox = self.inbox.lock().await;
            loop {
                tokio::select! {
                    message = inbox.recv() => {
                        let Some(message) = message else {
                            tracing::info!("Inbound queue closed, stopping dispatch");
                            return;
                        };
                        self.device.lock().await.dispatch(&message);
                    }
                    changed = gate.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !*gate.borrow_and_update() {
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn telemetry_loop(self) {
        let mut gate = self.resume.subscribe();
        loop {
            if gate.wait_for(|open| *open).await.is_err() {
                return;
            }
            let (has_stats, interval) = {
                let device = self.device.lock().await;
                (device.has_stats(), device.stats_interval())
            };
            if !has_stats {
                tracing::debug!("No stats registered, telemetry parked");
                return;
            }

            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let published = self.device.lock().await.publish_stats();
                        tracing::debug!(published, "Published stats");
                    }
                    changed = gate.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !*gate.borrow_and_update() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
