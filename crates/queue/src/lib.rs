//! Broker-facing message queue abstraction.
//!
//! The pipeline only needs three capabilities from a broker: receive one
//! message, acknowledge it, or reject it (optionally requeueing). Any binding
//! that satisfies [`MessageQueue`] is interchangeable.

pub mod in_memory_queue;
pub mod queue;

pub use in_memory_queue::{InMemoryHandle, InMemoryQueue, InMemoryQueueError, Settled};
pub use queue::{Disposition, MessageQueue, QueueMessage};
