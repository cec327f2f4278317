//! Queue capability contract (mechanics only).
//!
//! ## Delivery model
//!
//! - **At-least-once**: a message that never receives a disposition is
//!   redelivered by the broker.
//! - **Manual acknowledgment**: nothing is removed from the queue until the
//!   consumer says so.
//! - **Prefetch = 1**: the broker hands out the next message only after the
//!   current one is settled. The pipeline relies on this to process strictly
//!   one record at a time without locks.
//!
//! ## Ownership
//!
//! The broker owns a message until it is settled. [`MessageQueue::ack`] and
//! [`MessageQueue::reject`] take the [`QueueMessage`] by value, so a message
//! can be settled at most once and cannot be touched afterwards.

use std::time::Duration;

/// A message pulled from the broker, together with its delivery handle.
#[derive(Debug)]
pub struct QueueMessage<H> {
    body: Vec<u8>,
    delivery_tag: u64,
    redelivered: bool,
    handle: H,
}

impl<H> QueueMessage<H> {
    pub fn new(body: Vec<u8>, delivery_tag: u64, redelivered: bool, handle: H) -> Self {
        Self {
            body,
            delivery_tag,
            redelivered,
            handle,
        }
    }

    /// Raw message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Broker-assigned delivery tag (for logging).
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn into_handle(self) -> H {
        self.handle
    }

    pub fn into_parts(self) -> (Vec<u8>, H) {
        (self.body, self.handle)
    }
}

/// Terminal outcome for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Processed successfully; remove from the queue.
    Ack,
    /// Negative-ack without requeue; the message is dropped.
    Discard,
    /// Negative-ack with requeue; the broker redelivers it later.
    Requeue,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Discard => "discard",
            Disposition::Requeue => "requeue",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal broker capability: `{receive, ack, reject}`.
///
/// Methods take `&mut self`: a queue binding is driven by a single consumer
/// and needs no internal synchronisation.
pub trait MessageQueue {
    /// Broker-specific delivery handle carried inside each [`QueueMessage`].
    type Handle;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means nothing arrived in time; callers use it to check for
    /// shutdown between messages.
    fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<QueueMessage<Self::Handle>>, Self::Error>;

    /// Acknowledge (remove) the message.
    fn ack(&mut self, message: QueueMessage<Self::Handle>) -> Result<(), Self::Error>;

    /// Negative-acknowledge the message, optionally asking for redelivery.
    fn reject(
        &mut self,
        message: QueueMessage<Self::Handle>,
        requeue: bool,
    ) -> Result<(), Self::Error>;

    /// Issue the call matching `disposition`.
    fn settle(
        &mut self,
        message: QueueMessage<Self::Handle>,
        disposition: Disposition,
    ) -> Result<(), Self::Error> {
        match disposition {
            Disposition::Ack => self.ack(message),
            Disposition::Discard => self.reject(message, false),
            Disposition::Requeue => self.reject(message, true),
        }
    }
}

impl<Q> MessageQueue for &mut Q
where
    Q: MessageQueue + ?Sized,
{
    type Handle = Q::Handle;
    type Error = Q::Error;

    fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<QueueMessage<Self::Handle>>, Self::Error> {
        (**self).receive(timeout)
    }

    fn ack(&mut self, message: QueueMessage<Self::Handle>) -> Result<(), Self::Error> {
        (**self).ack(message)
    }

    fn reject(
        &mut self,
        message: QueueMessage<Self::Handle>,
        requeue: bool,
    ) -> Result<(), Self::Error> {
        (**self).reject(message, requeue)
    }
}
