#![forbid(unsafe_code)]

//! Checks the structured log events emitted by the scheduler.

use std::sync::{Arc, Mutex};

use flow2d_signal::{FlowError, Runtime, SchedulerConfig, record};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Debug, Clone)]
struct Captured {
    level: Level,
    message: String,
}

#[derive(Clone, Default)]
struct Capture {
    events: Arc<Mutex<Vec<Captured>>>,
}

impl Capture {
    fn messages_at(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .expect("capture lock")
            .iter()
            .filter(|event| event.level == level)
            .map(|event| event.message.clone())
            .collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().expect("capture lock").push(Captured {
            level: *event.metadata().level(),
            message: visitor.0,
        });
    }
}

fn with_capture(f: impl FnOnce()) -> Capture {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, f);
    capture
}

#[test]
fn runaway_chain_logs_an_error() {
    let capture = with_capture(|| {
        let rt = Runtime::with_config(SchedulerConfig::new().with_max_ticks(5)).unwrap();
        let s = rt.signal(record! { n: 0 }).unwrap();
        s.on(|this, _| {
            let n = this.get("n").unwrap().as_f64().unwrap_or(0.0);
            this.set("n", n + 1.0)
        });
        s.set("n", 1).unwrap();
        assert!(matches!(
            rt.update_all(),
            Err(FlowError::RunawayChain { limit: 5 })
        ));
    });
    assert_eq!(capture.messages_at(Level::ERROR), vec!["too long update chain"]);
}

#[test]
fn failing_subscriber_logs_a_warning() {
    let capture = with_capture(|| {
        let rt = Runtime::new();
        let s = rt.signal(record! { n: 0 }).unwrap();
        s.on(|_, _| -> Result<(), &'static str> { Err("denied") });
        s.set("n", 1).unwrap();
        assert!(rt.update_all().is_err());
    });
    assert_eq!(capture.messages_at(Level::WARN), vec!["subscriber failed"]);
}

#[test]
fn every_tick_is_traced() {
    let capture = with_capture(|| {
        let rt = Runtime::new();
        let a = rt.signal(record! { n: 0 }).unwrap();
        let b = rt.signal(record! { n: 0 }).unwrap();
        a.on(move |this, _| b.set("n", this.get("n").unwrap()));
        a.set("n", 1).unwrap();
        rt.update_all().unwrap();
    });
    assert_eq!(capture.messages_at(Level::TRACE).len(), 2);
    assert_eq!(capture.messages_at(Level::DEBUG).last().map(String::as_str), Some("settled"));
}
