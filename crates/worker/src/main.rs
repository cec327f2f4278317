//! Relay worker: RabbitMQ weather queue -> HTTP weather-log API.

use anyhow::Context;
use tracing::{error, info, warn};

use skyrelay_infra::{AmqpQueue, HttpDeliveryClient, RelayPipeline, Settings, ShutdownSignal};

fn main() -> anyhow::Result<()> {
    skyrelay_observability::init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "invalid_configuration");
            return Err(err).context("loading configuration");
        }
    };

    info!(
        queue = %settings.queue_name,
        rabbitmq_url = %settings.redacted_amqp_url(),
        api_url = %settings.weather_logs_url(),
        max_retries = settings.max_retries,
        http_timeout_secs = settings.http_timeout.as_secs(),
        "worker_starting"
    );

    // Broker IO and signal handling live on the runtime; the pipeline itself
    // runs on this thread with the blocking HTTP client.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let shutdown = ShutdownSignal::new();
    runtime.spawn(wait_for_shutdown(shutdown.clone()));

    let queue = match AmqpQueue::connect(runtime.handle().clone(), &settings) {
        Ok(queue) => queue,
        Err(err) => {
            error!(error = %err, "connection_failed");
            return Err(err).context("connecting to RabbitMQ");
        }
    };

    let client = HttpDeliveryClient::from_settings(&settings).context("building HTTP client")?;

    info!(consumer_tag = queue.consumer_tag(), "consumer_registered");

    let mut pipeline = RelayPipeline::from_settings(queue, client, &settings);
    let result = pipeline.run(&shutdown);
    let stats = pipeline.stats();

    if let Err(err) = pipeline.into_queue().close() {
        warn!(error = %err, "rabbitmq_close_failed");
    }

    info!(
        received = stats.received,
        acked = stats.acked,
        discarded = stats.discarded,
        requeued = stats.requeued,
        delivery_attempts = stats.delivery_attempts,
        settle_failures = stats.settle_failures,
        "worker_stopped"
    );

    result.map(|_| ()).context("consuming weather queue")
}

async fn wait_for_shutdown(shutdown: ShutdownSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "shutdown_signal_received"),
                    _ = tokio::signal::ctrl_c() => info!(signal = "SIGINT", "shutdown_signal_received"),
                }
            }
            Err(err) => {
                warn!(error = %err, "sigterm_handler_unavailable");
                let _ = tokio::signal::ctrl_c().await;
                info!(signal = "SIGINT", "shutdown_signal_received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!(signal = "ctrl_c", "shutdown_signal_received");
    }

    shutdown.trigger();
}
