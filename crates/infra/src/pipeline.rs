//! Consume, validate, deliver, settle.
//!
//! One message at a time: receive, decode, validate, deliver with retries,
//! then ack / discard / requeue. The loop checks the shutdown signal only
//! between messages, so a message that was received is always settled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{Span, debug, error, info, info_span};

use skyrelay_core::{PayloadError, decode_record, validate};
use skyrelay_queue::{Disposition, MessageQueue, QueueMessage};

use crate::config::Settings;
use crate::delivery::DeliveryClient;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper, deliver_with_retry};

/// How long one `receive` call may block before the shutdown flag is rechecked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cooperative stop flag shared between the signal handler and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one pipeline run. `acked`, `discarded` and `requeued` count
/// only dispositions the broker accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub acked: u64,
    pub discarded: u64,
    pub requeued: u64,
    pub delivery_attempts: u64,
    /// Dispositions the broker refused (ack/nack errors).
    pub settle_failures: u64,
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageReport {
    pub disposition: Disposition,
    /// HTTP attempts made; 0 when the payload never reached delivery.
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to receive from queue: {0}")]
    Receive(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The relay loop, generic over the queue, the delivery client and the
/// backoff sleeper.
pub struct RelayPipeline<Q, C, S = ThreadSleeper> {
    queue: Q,
    client: C,
    sleeper: S,
    policy: RetryPolicy,
    poll_interval: Duration,
    span: Span,
    stats: PipelineStats,
}

impl<Q, C> RelayPipeline<Q, C, ThreadSleeper>
where
    Q: MessageQueue,
    C: DeliveryClient,
{
    pub fn new(queue: Q, client: C, policy: RetryPolicy) -> Self {
        Self {
            queue,
            client,
            sleeper: ThreadSleeper,
            policy,
            poll_interval: DEFAULT_POLL_INTERVAL,
            span: info_span!("relay"),
            stats: PipelineStats::default(),
        }
    }

    /// Pipeline with the retry budget and a span carrying the queue name.
    pub fn from_settings(queue: Q, client: C, settings: &Settings) -> Self {
        Self::new(queue, client, RetryPolicy::new(settings.max_retries))
            .with_span(info_span!("relay", queue = %settings.queue_name))
    }
}

impl<Q, C, S> RelayPipeline<Q, C, S>
where
    Q: MessageQueue,
    C: DeliveryClient,
    S: Sleeper,
{
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> RelayPipeline<Q, C, S2> {
        RelayPipeline {
            queue: self.queue,
            client: self.client,
            sleeper,
            policy: self.policy,
            poll_interval: self.poll_interval,
            span: self.span,
            stats: self.stats,
        }
    }

    /// Span every log line of this pipeline is emitted under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn into_queue(self) -> Q {
        self.queue
    }

    /// Consume until `shutdown` is triggered or the queue fails.
    ///
    /// A receive error ends the loop; a failed ack/nack does not.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> Result<PipelineStats, PipelineError> {
        let span = self.span.clone();
        let _guard = span.enter();

        info!(
            max_retries = self.policy.attempts(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "consumer_started"
        );

        while !shutdown.is_triggered() {
            match self.queue.receive(self.poll_interval) {
                Ok(Some(message)) => {
                    self.process(message);
                }
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "queue_receive_failed");
                    return Err(PipelineError::Receive(Box::new(err)));
                }
            }
        }

        let stats = self.stats;
        info!(
            received = stats.received,
            acked = stats.acked,
            discarded = stats.discarded,
            requeued = stats.requeued,
            settle_failures = stats.settle_failures,
            "consumer_stopping"
        );
        Ok(stats)
    }

    /// Handle one message end to end and settle it.
    pub fn process(&mut self, message: QueueMessage<Q::Handle>) -> MessageReport {
        let span = self.span.clone();
        let _guard = span.enter();

        let delivery_tag = message.delivery_tag();
        info!(
            delivery_tag,
            size = message.body().len(),
            redelivered = message.redelivered(),
            "message_received"
        );
        self.stats.received += 1;

        let report = self.decide(message.body());

        self.stats.delivery_attempts += u64::from(report.attempts);

        match self.queue.settle(message, report.disposition) {
            Ok(()) => {
                debug!(delivery_tag, disposition = %report.disposition, "message_settled");
                match report.disposition {
                    Disposition::Ack => self.stats.acked += 1,
                    Disposition::Discard => self.stats.discarded += 1,
                    Disposition::Requeue => self.stats.requeued += 1,
                }
            }
            Err(err) => {
                self.stats.settle_failures += 1;
                error!(
                    delivery_tag,
                    disposition = %report.disposition,
                    error = %err,
                    "disposition_failed"
                );
            }
        }

        report
    }

    fn decide(&self, body: &[u8]) -> MessageReport {
        let discard = MessageReport {
            disposition: Disposition::Discard,
            attempts: 0,
        };

        let record = match decode_record(body) {
            Ok(record) => record,
            Err(err) => {
                error!(error = %err, "json_parse_error");
                return discard;
            }
        };

        let violations = validate(&record);
        if !violations.is_empty() {
            let count = violations.len();
            let err = PayloadError::Invalid(violations);
            error!(errors = %err, violations = count, city = %record.city, "validation_error");
            return discard;
        }

        match deliver_with_retry(&self.client, &self.sleeper, &self.policy, &record) {
            Ok(delivered) => {
                info!(
                    city = %record.city,
                    temperature = record.temperature,
                    attempts = delivered.attempts,
                    id = delivered.id.as_deref().unwrap_or(""),
                    "message_processed"
                );
                MessageReport {
                    disposition: Disposition::Ack,
                    attempts: delivered.attempts,
                }
            }
            Err(err) => {
                error!(
                    city = %record.city,
                    attempts = err.attempts,
                    error = %err,
                    "send_failed_after_retries"
                );
                MessageReport {
                    disposition: Disposition::Requeue,
                    attempts: err.attempts,
                }
            }
        }
    }
}
