use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

use crate::metrics;
use crate::model::Envelope;

/// In-process event bus: many producers, one draining consumer.
///
/// `publish` never applies back-pressure onto the latency-critical streams;
/// when the queue is full the event is dropped, logged, and counted.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Envelope>,
    dropped: Arc<AtomicU64>,
}

pub const DEFAULT_CAPACITY: usize = 1024;

impl EventBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            EventBus {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn publish(&self, event: Envelope) {
        metrics::EVENTS_OUT
            .with_label_values(&[event.kind.as_str()])
            .inc();
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::BUS_DROPPED.inc();
            error!("Event bus full, event DROPPED: {}", e);
        }
    }

    #[cfg(test)]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
