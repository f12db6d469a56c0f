//! Event source abstraction and the in-process queue implementation
//!
//! `EventSource` is the seam a broker client plugs into: deliveries come out
//! in order with a monotonically increasing offset, and the consumer commits
//! an offset once the delivery has been fully processed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::message::EventMessage;

/// One message handed out by a source
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub offset: u64,
    pub message: EventMessage,
}

#[async_trait]
pub trait EventSource: Send {
    /// Next delivery, or `None` once the source is closed and drained
    async fn recv(&mut self) -> Option<Delivery>;

    /// Mark every delivery up to and including `offset` as processed
    async fn commit(&mut self, offset: u64) -> anyhow::Result<()>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PublishError {
    #[error("event queue is full")]
    Full,

    #[error("event queue is closed")]
    Closed,
}

/// Producer half of the in-process queue
#[derive(Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<Delivery>,
    next_offset: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Enqueue without waiting. A full queue is reported, not awaited.
    pub fn publish(&self, message: EventMessage) -> Result<u64, PublishError> {
        let permit = self.sender.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })?;

        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        permit.send(Delivery { offset, message });
        Ok(offset)
    }
}

/// Consumer half of the in-process queue
pub struct ChannelEventSource {
    receiver: mpsc::Receiver<Delivery>,
    committed: Option<u64>,
}

impl ChannelEventSource {
    pub fn committed_offset(&self) -> Option<u64> {
        self.committed
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    async fn commit(&mut self, offset: u64) -> anyhow::Result<()> {
        if let Some(committed) = self.committed {
            anyhow::ensure!(
                offset > committed,
                "offset {} already committed (at {})",
                offset,
                committed
            );
        }
        self.committed = Some(offset);
        Ok(())
    }
}

/// Bounded in-process event queue
pub fn channel(capacity: usize) -> (EventPublisher, ChannelEventSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        EventPublisher {
            sender,
            next_offset: Arc::new(AtomicU64::new(0)),
        },
        ChannelEventSource {
            receiver,
            committed: None,
        },
    )
}
