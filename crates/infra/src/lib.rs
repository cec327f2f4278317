//! Infrastructure layer: configuration, broker binding, HTTP delivery and the relay loop.

pub mod amqp;
pub mod config;
pub mod delivery;
pub mod pipeline;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use amqp::{AmqpError, AmqpHandle, AmqpQueue};
pub use config::{ConfigError, Settings};
pub use delivery::{
    ApiAcknowledgement, DeliveryClient, DeliveryError, DeliveryOutcome, HttpDeliveryClient,
};
pub use pipeline::{
    MessageReport, PipelineError, PipelineStats, RelayPipeline, ShutdownSignal,
};
pub use retry::{Delivered, RetryExhausted, RetryPolicy, Sleeper, ThreadSleeper, deliver_with_retry};
