use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};

use skyrelay_infra::{
    HttpDeliveryClient, RelayPipeline, RetryPolicy, Settings, ShutdownSignal, Sleeper,
};
use skyrelay_queue::{Disposition, InMemoryQueue, MessageQueue};

/// What the fake API does with the next request.
#[derive(Debug, Clone, Copy)]
enum Reply {
    Json(StatusCode),
    Text(StatusCode, &'static str),
    Slow(Duration),
}

#[derive(Clone, Default)]
struct ApiState {
    script: Arc<Mutex<VecDeque<Reply>>>,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

async fn weather_logs(State(state): State<ApiState>, body: Bytes) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Ok(value) = serde_json::from_slice::<Value>(&body) {
        state.bodies.lock().unwrap().push(value);
    }

    let next = state.script.lock().unwrap().pop_front();
    let reply = next.unwrap_or(Reply::Json(StatusCode::CREATED));

    match reply {
        Reply::Json(status) => (status, Json(ack_body(status.is_success()))).into_response(),
        Reply::Text(status, text) => (status, text).into_response(),
        Reply::Slow(delay) => {
            tokio::time::sleep(delay).await;
            (StatusCode::CREATED, Json(ack_body(true))).into_response()
        }
    }
}

fn ack_body(success: bool) -> Value {
    json!({ "success": success, "message": "weather log stored", "id": "665f1c2e9b" })
}

/// Fake downstream API on an ephemeral port, served from its own runtime so
/// the pipeline under test can stay fully blocking.
struct TestApi {
    base_url: String,
    state: ApiState,
    _runtime: tokio::runtime::Runtime,
}

impl TestApi {
    fn spawn(script: Vec<Reply>) -> Self {
        let state = ApiState::default();
        state.script.lock().unwrap().extend(script);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to build test runtime");

        let app = Router::new()
            .route("/api/weather/logs", post(weather_logs))
            .with_state(state.clone());

        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        runtime.spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            _runtime: runtime,
        }
    }

    fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    fn bodies(&self) -> Vec<Value> {
        self.state.bodies.lock().unwrap().clone()
    }

    fn client(&self, timeout: Duration) -> HttpDeliveryClient {
        let settings = Settings {
            api_base_url: self.base_url.clone(),
            http_timeout: timeout,
            ..Default::default()
        };
        HttpDeliveryClient::from_settings(&settings).unwrap()
    }
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

/// Captures formatted log output for assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    fn count(&self, needle: &str) -> usize {
        self.text().matches(needle).count()
    }
}

fn capture<T>(f: impl FnOnce() -> T) -> (T, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, logs)
}

fn weather_body(city: &str, temperature: f64, humidity: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "city": city,
        "country": "BR",
        "temperature": temperature,
        "feels_like": temperature + 1.5,
        "humidity": humidity,
        "pressure": 1012,
        "wind_speed": 4.1,
        "wind_direction": 90,
        "clouds": 40,
        "visibility": 10000,
        "condition": "Clouds",
        "condition_description": "scattered clouds",
        "icon": "03d",
        "rain_1h": null,
        "snow_1h": null,
        "sunrise": "2024-06-01T08:30:00Z",
        "sunset": "2024-06-01T20:30:00Z",
        "collected_at": "2024-06-01T15:00:00Z"
    }))
    .unwrap()
}

#[test]
fn two_server_errors_then_success_acks_after_three_attempts() {
    let api = TestApi::spawn(vec![
        Reply::Json(StatusCode::INTERNAL_SERVER_ERROR),
        Reply::Json(StatusCode::INTERNAL_SERVER_ERROR),
        Reply::Json(StatusCode::CREATED),
    ]);
    let mut queue = InMemoryQueue::new();
    queue.publish(weather_body("Recife", 28.4, 79));

    let (report, logs) = capture(|| {
        let mut pipeline =
            RelayPipeline::new(&mut queue, api.client(Duration::from_secs(5)), RetryPolicy::new(3))
                .with_sleeper(NoSleep);
        let msg = pipeline
            .queue_mut()
            .receive(Duration::ZERO)
            .unwrap()
            .expect("published message");
        pipeline.process(msg)
    });

    assert_eq!(report.disposition, Disposition::Ack);
    assert_eq!(report.attempts, 3);
    assert_eq!(api.hits(), 3);
    assert_eq!(queue.count(Disposition::Ack), 1);
    assert_eq!(queue.settled().len(), 1);
    assert_eq!(logs.count("retry_attempt"), 2);
    assert_eq!(logs.count("message_processed"), 1);
}

#[test]
fn delivered_body_keeps_wire_field_names() {
    let api = TestApi::spawn(vec![]);
    let mut queue = InMemoryQueue::new();
    queue.publish(weather_body("Natal", 30.0, 65));

    let mut pipeline =
        RelayPipeline::new(&mut queue, api.client(Duration::from_secs(5)), RetryPolicy::new(3))
            .with_sleeper(NoSleep);
    let msg = pipeline.queue_mut().receive(Duration::ZERO).unwrap().unwrap();
    pipeline.process(msg);

    let bodies = api.bodies();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["city"], "Natal");
    assert_eq!(body["humidity"], 65);
    assert_eq!(body["condition_description"], "scattered clouds");
    assert!(body["rain_1h"].is_null());
    assert!(body.get("collected_at").is_some());
}

#[test]
fn out_of_range_humidity_is_discarded_without_calling_the_api() {
    let api = TestApi::spawn(vec![]);
    let mut queue = InMemoryQueue::new();
    queue.publish(weather_body("Manaus", 31.0, 150));

    let (report, logs) = capture(|| {
        let mut pipeline =
            RelayPipeline::new(&mut queue, api.client(Duration::from_secs(5)), RetryPolicy::new(3))
                .with_sleeper(NoSleep);
        let msg = pipeline.queue_mut().receive(Duration::ZERO).unwrap().unwrap();
        pipeline.process(msg)
    });

    assert_eq!(report.disposition, Disposition::Discard);
    assert_eq!(api.hits(), 0);
    assert_eq!(queue.count(Disposition::Discard), 1);
    assert_eq!(queue.pending_len(), 0);
    assert!(logs.text().contains("humidity must be between 0 and 100"));
}

#[test]
fn malformed_body_is_discarded_without_calling_the_api() {
    let api = TestApi::spawn(vec![]);
    let mut queue = InMemoryQueue::new();
    queue.publish(&b"{\"city\": \"Belem\""[..]);

    let (report, logs) = capture(|| {
        let mut pipeline =
            RelayPipeline::new(&mut queue, api.client(Duration::from_secs(5)), RetryPolicy::new(3))
                .with_sleeper(NoSleep);
        let msg = pipeline.queue_mut().receive(Duration::ZERO).unwrap().unwrap();
        pipeline.process(msg)
    });

    assert_eq!(report.disposition, Disposition::Discard);
    assert_eq!(api.hits(), 0);
    assert_eq!(logs.count("json_parse_error"), 1);
}

#[test]
fn timeouts_exhaust_retries_and_requeue() {
    let api = TestApi::spawn(vec![
        Reply::Slow(Duration::from_secs(2)),
        Reply::Slow(Duration::from_secs(2)),
        Reply::Slow(Duration::from_secs(2)),
    ]);
    let mut queue = InMemoryQueue::new();
    queue.publish(weather_body("Salvador", 27.0, 80));

    let (report, logs) = capture(|| {
        let mut pipeline = RelayPipeline::new(
            &mut queue,
            api.client(Duration::from_millis(200)),
            RetryPolicy::new(3),
        )
        .with_sleeper(NoSleep);
        let msg = pipeline.queue_mut().receive(Duration::ZERO).unwrap().unwrap();
        pipeline.process(msg)
    });

    assert_eq!(report.disposition, Disposition::Requeue);
    assert_eq!(report.attempts, 3);
    assert_eq!(api.hits(), 3);
    assert_eq!(queue.count(Disposition::Requeue), 1);
    assert_eq!(queue.pending_len(), 1);
    assert_eq!(logs.count("send_failed_after_retries"), 1);
}

#[test]
fn client_errors_are_retried_like_server_errors() {
    let api = TestApi::spawn(vec![
        Reply::Json(StatusCode::BAD_REQUEST),
        Reply::Json(StatusCode::UNPROCESSABLE_ENTITY),
    ]);
    let mut queue = InMemoryQueue::new();
    queue.publish(weather_body("Curitiba", 12.0, 88));

    let mut pipeline =
        RelayPipeline::new(&mut queue, api.client(Duration::from_secs(5)), RetryPolicy::new(2))
            .with_sleeper(NoSleep);
    let msg = pipeline.queue_mut().receive(Duration::ZERO).unwrap().unwrap();
    let report = pipeline.process(msg);

    assert_eq!(report.disposition, Disposition::Requeue);
    assert_eq!(api.hits(), 2);
}

#[test]
fn success_with_undecodable_body_still_acks() {
    let api = TestApi::spawn(vec![Reply::Text(StatusCode::OK, "stored, thanks")]);
    let mut queue = InMemoryQueue::new();
    queue.publish(weather_body("Porto Alegre", 15.5, 72));

    let (report, logs) = capture(|| {
        let mut pipeline =
            RelayPipeline::new(&mut queue, api.client(Duration::from_secs(5)), RetryPolicy::new(3))
                .with_sleeper(NoSleep);
        let msg = pipeline.queue_mut().receive(Duration::ZERO).unwrap().unwrap();
        pipeline.process(msg)
    });

    assert_eq!(report.disposition, Disposition::Ack);
    assert_eq!(report.attempts, 1);
    assert_eq!(api.hits(), 1);
    assert_eq!(logs.count("could_not_decode_response"), 1);
}

#[test]
fn run_drains_the_queue_until_shutdown() {
    let api = TestApi::spawn(vec![]);
    let mut queue = InMemoryQueue::new();
    queue.publish(weather_body("Recife", 28.0, 70));
    queue.publish(&b"not json"[..]);
    queue.publish(weather_body("Olinda", 29.0, 71));

    let shutdown = ShutdownSignal::new();
    let hits = api.state.hits.clone();
    let stopper = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            while hits.load(Ordering::SeqCst) < 2 {
                std::thread::sleep(Duration::from_millis(10));
            }
            shutdown.trigger();
        })
    };

    let mut pipeline =
        RelayPipeline::new(&mut queue, api.client(Duration::from_secs(5)), RetryPolicy::new(3))
            .with_sleeper(NoSleep)
            .with_poll_interval(Duration::from_millis(10));
    let stats = pipeline.run(&shutdown).unwrap();
    stopper.join().unwrap();

    assert_eq!(stats.received, 3);
    assert_eq!(stats.acked, 2);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.delivery_attempts, 2);
    assert_eq!(queue.pending_len(), 0);
}
