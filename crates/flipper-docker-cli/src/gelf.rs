//! Ships log events to a GELF HTTP input over TLS.
//!
//! Events are encoded on the logging thread and handed to one delivery
//! thread through a bounded queue. A full queue drops the event, so an
//! unreachable sink never stalls the caller. Delivery failures are dropped,
//! never logged, so the sink cannot feed back into itself.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flipper_docker_schema::GelfSection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::Cell;
use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub const APP_NAME: &str = "flipper-docker-qa";
const QUEUE_CAPACITY: usize = 256;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

thread_local! {
    /// Set on the delivery thread: whatever it logs is not shipped.
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

enum Delivery {
    Message(Vec<u8>),
    Flush(mpsc::Sender<()>),
}

pub trait GelfSink: Send + Sync {
    fn send(&self, payload: &[u8]);
}

pub struct HttpsSink {
    agent: ureq::Agent,
    url: String,
    authorization: String,
}

impl HttpsSink {
    pub fn new(section: &GelfSection) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(5)))
            .build()
            .into();
        let credentials = STANDARD.encode(format!("{}:{}", section.username, section.password));
        Self {
            agent,
            url: format!("https://{}:{}/gelf", section.host, section.port),
            authorization: format!("Basic {credentials}"),
        }
    }
}

impl GelfSink for HttpsSink {
    fn send(&self, payload: &[u8]) {
        let _ = self
            .agent
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", &self.authorization)
            .send(payload);
    }
}

#[derive(Serialize)]
struct GelfMessage<'a> {
    version: &'static str,
    host: &'a str,
    short_message: String,
    timestamp: f64,
    level: u8,
    #[serde(flatten)]
    additional: Map<String, Value>,
}

/// Syslog severity for a tracing level.
fn severity(level: Level) -> u8 {
    match level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG | Level::TRACE => 7,
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields
                .insert(format!("_{}", field.name()), Value::String(value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

pub struct GelfLayer {
    queue: SyncSender<Delivery>,
    host: String,
    static_fields: Map<String, Value>,
}

/// Flushes queued messages when dropped, waiting at most `FLUSH_TIMEOUT`.
pub struct GelfGuard {
    queue: SyncSender<Delivery>,
}

impl Drop for GelfGuard {
    fn drop(&mut self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.queue.send(Delivery::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv_timeout(FLUSH_TIMEOUT);
        }
    }
}

fn deliver(sink: &dyn GelfSink, queue: &Receiver<Delivery>) {
    DELIVERING.with(|d| d.set(true));
    for item in queue {
        match item {
            Delivery::Message(payload) => sink.send(&payload),
            Delivery::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl GelfLayer {
    /// Start the delivery thread for `sink`. Keep the guard alive until the
    /// last event worth shipping has been logged.
    pub fn new(sink: Arc<dyn GelfSink>, host: &str, runner_name: &str) -> (Self, GelfGuard) {
        let (queue, pending) = mpsc::sync_channel(QUEUE_CAPACITY);
        let spawned = thread::Builder::new()
            .name("gelf-delivery".to_owned())
            .spawn(move || deliver(sink.as_ref(), &pending));
        if let Err(e) = spawned {
            eprintln!("warning: remote logging disabled: {e}");
        }

        let mut static_fields = Map::new();
        static_fields.insert(
            "_runner_name".to_owned(),
            Value::String(runner_name.to_owned()),
        );
        static_fields.insert("_app".to_owned(), Value::String(APP_NAME.to_owned()));
        let layer = Self {
            queue: queue.clone(),
            host: host.to_owned(),
            static_fields,
        };
        (layer, GelfGuard { queue })
    }

    pub fn https(section: &GelfSection, host: &str, runner_name: &str) -> (Self, GelfGuard) {
        Self::new(Arc::new(HttpsSink::new(section)), host, runner_name)
    }

    fn encode(&self, event: &Event<'_>) -> Option<Vec<u8>> {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let mut additional = self.static_fields.clone();
        additional.insert(
            "_logger".to_owned(),
            Value::String(meta.target().to_owned()),
        );
        additional.extend(visitor.fields);

        let message = GelfMessage {
            version: "1.1",
            host: &self.host,
            short_message: visitor.message,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            level: severity(*meta.level()),
            additional,
        };
        serde_json::to_vec(&message).ok()
    }
}

impl<S: Subscriber> Layer<S> for GelfLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if target.starts_with("ureq") || target.starts_with("rustls") {
            return;
        }
        if DELIVERING.with(Cell::get) {
            return;
        }
        if let Some(payload) = self.encode(event) {
            // Full or closed queue: the event is not shipped.
            let _ = self.queue.try_send(Delivery::Message(payload));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<Value>>);

    impl GelfSink for MemorySink {
        fn send(&self, payload: &[u8]) {
            let value = serde_json::from_slice(payload).unwrap();
            self.0.lock().unwrap().push(value);
        }
    }

    /// Holds every delivery until the test opens the gate.
    struct GatedSink {
        gate: Mutex<mpsc::Receiver<()>>,
        delivered: Mutex<usize>,
    }

    impl GelfSink for GatedSink {
        fn send(&self, _payload: &[u8]) {
            let _ = self.gate.lock().unwrap().recv();
            *self.delivered.lock().unwrap() += 1;
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let sink = Arc::new(MemorySink::default());
        let (layer, guard) = GelfLayer::new(sink.clone(), "bench-1", "bench-1-flip_A");
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        drop(guard);
        let out = sink.0.lock().unwrap().clone();
        out
    }

    #[test]
    fn event_becomes_gelf_message() {
        let msgs = capture(|| tracing::error!(exit_code = 3, "container exited"));
        assert_eq!(msgs.len(), 1);
        let m = &msgs[0];
        assert_eq!(m["version"], "1.1");
        assert_eq!(m["host"], "bench-1");
        assert_eq!(m["short_message"], "container exited");
        assert_eq!(m["level"], 3);
        assert_eq!(m["_runner_name"], "bench-1-flip_A");
        assert_eq!(m["_app"], APP_NAME);
        assert_eq!(m["_exit_code"], "3");
        assert!(m["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn levels_map_to_syslog_severity() {
        let msgs = capture(|| {
            tracing::warn!("w");
            tracing::info!("i");
            tracing::debug!("d");
        });
        let levels: Vec<u64> = msgs.iter().map(|m| m["level"].as_u64().unwrap()).collect();
        assert_eq!(levels, vec![4, 6, 7]);
    }

    #[test]
    fn transport_events_are_not_shipped() {
        let msgs = capture(|| tracing::info!(target: "ureq::unversioned", "connecting"));
        assert!(msgs.is_empty());
    }

    #[test]
    fn stalled_sink_does_not_block_logging() {
        let (open, gate) = mpsc::channel();
        let sink = Arc::new(GatedSink {
            gate: Mutex::new(gate),
            delivered: Mutex::new(0),
        });
        let (layer, guard) = GelfLayer::new(sink.clone(), "bench-1", "bench-1-flip_A");
        let subscriber = tracing_subscriber::registry().with(layer);

        let started = std::time::Instant::now();
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..(QUEUE_CAPACITY * 2) {
                tracing::info!("line {i}");
            }
        });
        assert!(started.elapsed() < Duration::from_secs(2));

        // Overflow was dropped: at most one in flight plus a full queue.
        for _ in 0..(QUEUE_CAPACITY * 2) {
            let _ = open.send(());
        }
        drop(guard);
        let delivered = *sink.delivered.lock().unwrap();
        assert!(delivered >= 1);
        assert!(delivered <= QUEUE_CAPACITY + 1);
    }

    #[test]
    fn https_sink_targets_gelf_endpoint() {
        let sink = HttpsSink::new(&GelfSection {
            host: "logs.example.com".to_owned(),
            port: 12202,
            username: "user".to_owned(),
            password: "pass".to_owned(),
        });
        assert_eq!(sink.url, "https://logs.example.com:12202/gelf");
        assert_eq!(sink.authorization, "Basic dXNlcjpwYXNz");
    }
}
