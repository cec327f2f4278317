//! In-memory queue for tests/dev.
//!
//! Mirrors the broker contract the pipeline depends on:
//! - No IO / no threads; an empty `receive` sleeps for its timeout like a broker poll
//! - Prefetch of exactly one: nothing new is handed out while a message is unsettled
//! - Requeued messages go to the back and come back flagged as redelivered

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;

use crate::queue::{Disposition, MessageQueue, QueueMessage};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InMemoryQueueError {
    /// The message being settled is not the one currently in flight.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

/// Delivery handle for [`InMemoryQueue`].
#[derive(Debug)]
pub struct InMemoryHandle {
    delivery_tag: u64,
}

/// Record of one disposition call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub disposition: Disposition,
}

#[derive(Debug)]
struct Pending {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryQueue {
    pending: VecDeque<Pending>,
    in_flight: Option<u64>,
    next_tag: u64,
    settled: Vec<Settled>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message body to the back of the queue.
    pub fn publish(&mut self, body: impl Into<Vec<u8>>) {
        self.pending.push_back(Pending {
            body: body.into(),
            redelivered: false,
        });
    }

    /// Messages waiting to be received (requeued ones included).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Every disposition issued so far, in order.
    pub fn settled(&self) -> &[Settled] {
        &self.settled
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.settled
            .iter()
            .filter(|s| s.disposition == disposition)
            .count()
    }

    fn settle_in_flight(
        &mut self,
        message: QueueMessage<InMemoryHandle>,
        disposition: Disposition,
    ) -> Result<(), InMemoryQueueError> {
        let (body, handle) = message.into_parts();
        let delivery_tag = handle.delivery_tag;
        if self.in_flight != Some(delivery_tag) {
            return Err(InMemoryQueueError::UnknownDelivery(delivery_tag));
        }
        self.in_flight = None;

        if disposition == Disposition::Requeue {
            self.pending.push_back(Pending {
                body: body.clone(),
                redelivered: true,
            });
        }

        self.settled.push(Settled {
            delivery_tag,
            body,
            disposition,
        });
        Ok(())
    }
}

impl MessageQueue for InMemoryQueue {
    type Handle = InMemoryHandle;
    type Error = InMemoryQueueError;

    /// Returns `None` after sleeping for `timeout` when empty or when a
    /// message is still unsettled.
    fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<QueueMessage<Self::Handle>>, Self::Error> {
        let next = if self.in_flight.is_none() {
            self.pending.pop_front()
        } else {
            None
        };
        let Some(next) = next else {
            std::thread::sleep(timeout);
            return Ok(None);
        };

        self.next_tag += 1;
        let delivery_tag = self.next_tag;
        self.in_flight = Some(delivery_tag);

        Ok(Some(QueueMessage::new(
            next.body,
            delivery_tag,
            next.redelivered,
            InMemoryHandle { delivery_tag },
        )))
    }

    fn ack(&mut self, message: QueueMessage<Self::Handle>) -> Result<(), Self::Error> {
        self.settle_in_flight(message, Disposition::Ack)
    }

    fn reject(
        &mut self,
        message: QueueMessage<Self::Handle>,
        requeue: bool,
    ) -> Result<(), Self::Error> {
        let disposition = if requeue {
            Disposition::Requeue
        } else {
            Disposition::Discard
        };
        self.settle_in_flight(message, disposition)
    }
}
