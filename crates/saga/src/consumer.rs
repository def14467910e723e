//! Consumer loop dispatching deliveries to the orchestrator.
//!
//! Each delivery runs in its own task. A semaphore bounds how many run at
//! once, and every delivery is answered with an [`Ack`] telling the bus
//! whether to forget it, redeliver it or drop it.

use std::sync::Arc;

use item_store::Store;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::SagaError;
use crate::events::InboundEnvelope;
use crate::orchestrator::{HandleOutcome, SagaOrchestrator};
use crate::publisher::EventPublisher;

/// Answer to a delivery, with pub/sub sidecar semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Ack {
    /// Handled (or nothing to do); do not redeliver.
    Success,
    /// Failed transiently; redeliver later.
    Retry,
    /// Can never be handled; discard.
    Drop,
}

impl Ack {
    /// Maps a handling result to an acknowledgement.
    pub fn from_result(result: &Result<HandleOutcome, SagaError>) -> Self {
        match result {
            Ok(_) => Ack::Success,
            Err(e) if e.is_transient() => Ack::Retry,
            Err(_) => Ack::Drop,
        }
    }
}

/// A delivery waiting to be handled, with the channel its ack goes back on.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: InboundEnvelope,
    pub reply: oneshot::Sender<Ack>,
}

impl Delivery {
    pub fn new(envelope: InboundEnvelope) -> (Self, oneshot::Receiver<Ack>) {
        let (reply, rx) = oneshot::channel();
        (Self { envelope, reply }, rx)
    }
}

/// Consumer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Deliveries handled concurrently.
    pub max_in_flight: usize,
    /// Deliveries buffered before senders wait.
    pub queue_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            queue_capacity: 256,
        }
    }
}

/// Cloneable entry point for submitting deliveries to a running consumer.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Delivery>,
}

impl EventSender {
    /// Submits a delivery and waits for its acknowledgement.
    ///
    /// A consumer that has stopped, or a handler that panicked, yields
    /// [`Ack::Retry`] so the bus keeps the event.
    pub async fn deliver(&self, envelope: InboundEnvelope) -> Ack {
        let (delivery, reply) = Delivery::new(envelope);
        if self.tx.send(delivery).await.is_err() {
            tracing::warn!("consumer stopped, asking for redelivery");
            return Ack::Retry;
        }
        reply.await.unwrap_or(Ack::Retry)
    }
}

/// Handle to a running consumer.
pub struct ConsumerHandle {
    sender: EventSender,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Signals the consumer to stop and waits for in-flight deliveries.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "consumer task panicked");
        }
    }
}

/// Explicit consumer loop over an mpsc channel of deliveries.
pub struct EventConsumer<S, P> {
    orchestrator: Arc<SagaOrchestrator<S, P>>,
    config: ConsumerConfig,
}

impl<S, P> EventConsumer<S, P>
where
    S: Store,
    P: EventPublisher + 'static,
{
    pub fn new(orchestrator: Arc<SagaOrchestrator<S, P>>, config: ConsumerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Spawns the consumer loop and returns a handle to it.
    pub fn start(self) -> ConsumerHandle {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx, stop_rx));
        ConsumerHandle {
            sender: EventSender { tx },
            stop: stop_tx,
            task,
        }
    }

    /// Runs until the stop signal fires or every sender is gone, then
    /// drains in-flight deliveries.
    pub async fn run(self, mut rx: mpsc::Receiver<Delivery>, mut stop: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        tracing::info!(max_in_flight = self.config.max_in_flight, "event consumer started");

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                delivery = rx.recv() => {
                    let Some(delivery) = delivery else { break };
                    let Ok(permit) = semaphore.clone().acquire_owned().await else { break };
                    let orchestrator = self.orchestrator.clone();
                    tasks.spawn(async move {
                        let result = orchestrator.handle(&delivery.envelope).await;
                        // The submitter may have given up waiting
                        let _ = delivery.reply.send(Ack::from_result(&result));
                        drop(permit);
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "event handler task panicked");
                    }
                }
            }
        }

        rx.close();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "event handler task panicked");
            }
        }
        tracing::info!("event consumer stopped");
    }
}
