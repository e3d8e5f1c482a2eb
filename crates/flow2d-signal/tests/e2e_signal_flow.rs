#![forbid(unsafe_code)]

//! E2E tests for the signal propagation engine.
//!
//! Validates that:
//! 1. Writes are deferred until a settle and coalesce within one tick.
//! 2. Nested records bubble exactly one notification to their ancestors.
//! 3. A child shared by two parents notifies both.
//! 4. Linked signals mirror writes and keep their own old values.
//! 5. A tick commits everything before notifying anyone.
//! 6. Runaway chains are stopped and failing subscribers are isolated.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use flow2d_signal::{FlowError, Method, Record, Runtime, SchedulerConfig, Signal, Value, record};

// ============================================================================
// Helpers
// ============================================================================

/// Records what a subscriber saw on each notification.
#[derive(Default)]
struct Seen {
    calls: Cell<u32>,
    new: RefCell<Vec<Value>>,
    old: RefCell<Vec<Value>>,
}

impl Seen {
    fn last_new(&self) -> Value {
        self.new.borrow().last().cloned().unwrap_or_default()
    }

    fn last_old(&self) -> Value {
        self.old.borrow().last().cloned().unwrap_or_default()
    }
}

/// Subscribe to `signal`, recording the value at `path` before and after.
fn watch(signal: &Signal, path: &'static [&'static str]) -> Rc<Seen> {
    let seen = Rc::new(Seen::default());
    let sink = Rc::clone(&seen);
    signal.on(move |this: &Signal, old: &Record| {
        sink.calls.set(sink.calls.get() + 1);
        sink.new
            .borrow_mut()
            .push(Value::from(this).path(path).unwrap_or_default());
        sink.old
            .borrow_mut()
            .push(old.path(path).unwrap_or_default());
    });
    seen
}

// ============================================================================
// Deferred writes
// ============================================================================

#[test]
fn simple_write_is_visible_after_settle() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 42 }).unwrap();

    signal.set("value", 1337).unwrap();
    assert_eq!(signal.get("value").unwrap(), 42);

    rt.update_all().unwrap();
    assert_eq!(signal.get("value").unwrap(), 1337);
}

#[test]
fn subscribe_before_write() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 42 }).unwrap();
    let seen = watch(&signal, &["value"]);

    signal.set("value", 1337).unwrap();
    rt.update_all().unwrap();

    assert_eq!(seen.last_new(), 1337);
    assert_eq!(seen.last_old(), 42);
}

#[test]
fn subscribe_after_write() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 42 }).unwrap();

    signal.set("value", 1337).unwrap();
    let seen = watch(&signal, &["value"]);
    rt.update_all().unwrap();

    assert_eq!(seen.last_new(), 1337);
    assert_eq!(seen.last_old(), 42);
}

#[test]
fn multiple_writes_propagate_once() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 42 }).unwrap();
    signal.set("value", 1).unwrap();

    let sum = Rc::new(Cell::new(0.0));
    let sum_clone = Rc::clone(&sum);
    let old_seen = Rc::new(RefCell::new(Value::Unset));
    let old_clone = Rc::clone(&old_seen);
    signal.on(move |this, old| {
        sum_clone.set(sum_clone.get() + this.get("value").unwrap().as_f64().unwrap());
        *old_clone.borrow_mut() = old.get("value").cloned().unwrap_or_default();
    });

    for v in [2, 3, 4] {
        signal.set("value", v).unwrap();
    }
    rt.update_all().unwrap();

    assert_eq!(sum.get(), 4.0);
    assert_eq!(*old_seen.borrow(), 42);
}

// ============================================================================
// Nesting and sharing
// ============================================================================

#[test]
fn nested_write_bubbles_once() {
    let rt = Runtime::new();
    let signal = rt
        .signal(record! { values: record! { value: 42 }, value: 64 })
        .unwrap();
    let seen = watch(&signal, &["values", "value"]);

    let values = signal.get("values").unwrap();
    let values = values.as_signal().unwrap();
    values.set("value", 1336).unwrap();
    values.set("value", 1337).unwrap();
    rt.update_all().unwrap();

    assert_eq!(seen.calls.get(), 1);
    assert_eq!(seen.last_new(), 1337);
    assert_eq!(seen.last_old(), 42);
}

#[test]
fn deep_nesting_reaches_the_root() {
    let rt = Runtime::new();
    let root = rt
        .signal(record! { a: record! { b: record! { c: 1 } } })
        .unwrap();
    let seen = watch(&root, &["a", "b", "c"]);

    let leaf = root.get("a").unwrap().get("b").unwrap();
    leaf.as_signal().unwrap().set("c", 2).unwrap();
    rt.update_all().unwrap();

    assert_eq!(seen.calls.get(), 1);
    assert_eq!(seen.last_new(), 2);
    assert_eq!(seen.last_old(), 1);
}

#[test]
fn shared_child_notifies_every_parent() {
    let rt = Runtime::new();
    let linked = rt.signal(record! { value: 1000 }).unwrap();
    let signal1 = rt.signal(record! { obj: &linked }).unwrap();
    let signal2 = rt.signal(record! { obj: &linked }).unwrap();
    let seen1 = watch(&signal1, &["obj", "value"]);
    let seen2 = watch(&signal2, &["obj", "value"]);

    linked.set("value", 1337).unwrap();
    rt.update_all().unwrap();

    assert_eq!(seen1.last_new(), 1337);
    assert_eq!(seen2.last_new(), 1337);
    assert_eq!(seen1.last_old(), 1000);
    assert_eq!(seen2.last_old(), 1000);
}

#[test]
fn replaced_child_stops_bubbling() {
    let rt = Runtime::new();
    let parent = rt.signal(record! { child: record! { x: 1 } }).unwrap();
    let old_child = parent.get("child").unwrap();
    parent.set("child", record! { x: 2 }).unwrap();
    rt.update_all().unwrap();

    let seen = watch(&parent, &["child", "x"]);
    old_child.as_signal().unwrap().set("x", 99).unwrap();
    rt.update_all().unwrap();
    assert_eq!(seen.calls.get(), 0);
    assert_eq!(parent.get("child").unwrap().get("x").unwrap(), 2);
}

// ============================================================================
// Value kinds
// ============================================================================

#[test]
fn list_values_are_replaced_whole() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { data: vec![1, 2, 3] }).unwrap();
    let seen = watch(&signal, &["data"]);

    signal.set("data", vec![4, 5, 6]).unwrap();
    rt.update_all().unwrap();

    assert_eq!(seen.last_new(), Value::from(vec![4, 5, 6]));
    assert_eq!(seen.last_old(), Value::from(vec![1, 2, 3]));
}

#[test]
fn methods_write_through_their_receiver() {
    let rt = Runtime::new();
    let signal = rt
        .signal(record! {
            foo: Method::new(|this, _| {
                this.set("value", 1337)?;
                Ok(Value::Unset)
            }),
            value: 42,
        })
        .unwrap();
    let seen = watch(&signal, &["value"]);

    signal.call("foo", &[]).unwrap();
    rt.update_all().unwrap();

    assert_eq!(seen.last_new(), 1337);
    assert_eq!(seen.last_old(), 42);
}

#[test]
fn method_errors_reach_the_caller() {
    let rt = Runtime::new();
    let signal = rt
        .signal(record! {
            fail: Method::new(|_, _| Err(FlowError::method("nope"))),
        })
        .unwrap();
    let err = signal.call("fail", &[]).unwrap_err();
    assert_eq!(err.to_string(), "nope");
}

// ============================================================================
// Linking
// ============================================================================

#[test]
fn link_fills_defaults_and_mirrors_writes() {
    let rt = Runtime::new();
    let base = rt.signal(record! { value: 42, value2: 48 }).unwrap();
    let child = base.link(record! { value: 1337 }).unwrap();
    let child_value = watch(&child, &["value"]);
    let child_value2 = watch(&child, &["value2"]);
    let base_value = watch(&base, &["value"]);

    child.set("value", 100).unwrap();
    rt.update_all().unwrap();

    assert_eq!(child_value.last_new(), 100);
    assert_eq!(base_value.last_new(), 100);
    assert_eq!(child_value2.last_new(), 48);
    assert_eq!(child_value.last_old(), 1337);
    assert_eq!(base_value.last_old(), 42);
    assert_eq!(child_value2.last_old(), 48);
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn values_resolve_before_data_flow() {
    let rt = Runtime::new();
    let signal1 = rt.signal(record! { value1: 42 }).unwrap();
    let signal2 = rt.signal(record! { value2: 1337 }).unwrap();

    let observed = Rc::new(RefCell::new(Vec::new()));

    let other = signal1.clone();
    let log = Rc::clone(&observed);
    signal2.on(move |_, old| {
        log.borrow_mut().push((
            "signal2",
            other.get("value1").unwrap(),
            old.get("value2").cloned().unwrap(),
        ));
    });
    let other = signal2.clone();
    let log = Rc::clone(&observed);
    signal1.on(move |_, old| {
        log.borrow_mut().push((
            "signal1",
            other.get("value2").unwrap(),
            old.get("value1").cloned().unwrap(),
        ));
    });

    signal1.set("value1", 10).unwrap();
    signal2.set("value2", 15).unwrap();
    rt.update_all().unwrap();

    let observed = observed.borrow();
    assert_eq!(observed.len(), 2);
    // Reverse enqueue order: signal2 was written last.
    assert_eq!(observed[0].0, "signal2");
    assert_eq!(observed[0].1, 10);
    assert_eq!(observed[0].2, 1337);
    assert_eq!(observed[1].0, "signal1");
    assert_eq!(observed[1].1, 15);
    assert_eq!(observed[1].2, 42);
}

#[test]
fn reads_mid_tick_see_committed_values() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { a: 1, b: 2 }).unwrap();
    signal.set("a", 10).unwrap();
    signal.set("b", 20).unwrap();
    assert_eq!(signal.snapshot(), record! { a: 1, b: 2 });

    rt.update().unwrap();
    assert_eq!(signal.snapshot(), record! { a: 10, b: 20 });
}

#[test]
fn callback_writes_settle_in_the_same_update_all() {
    let rt = Runtime::new();
    let source = rt.signal(record! { value: 0 }).unwrap();
    let mirror = rt.signal(record! { value: 0 }).unwrap();
    let doubled = rt.signal(record! { value: 0 }).unwrap();

    let target = mirror.clone();
    source.on(move |this, _| target.set("value", this.get("value").unwrap()));
    let target = doubled.clone();
    mirror.on(move |this, _| {
        let v = this.get("value").unwrap().as_f64().unwrap_or(0.0);
        target.set("value", v * 2.0)
    });

    let start = rt.epoch();
    source.set("value", 21).unwrap();
    rt.update_all().unwrap();

    assert_eq!(doubled.get("value").unwrap(), 42);
    assert_eq!(rt.epoch() - start, 3);
    assert_eq!(rt.pending(), 0);
}

#[test]
fn self_rewriting_subscriber_is_a_runaway_chain() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 0 }).unwrap();
    signal.on(|this, _| {
        let next = this.get("value").unwrap().as_f64().unwrap_or(0.0) + 1.0;
        this.set("value", next).unwrap();
    });
    signal.set("value", 1).unwrap();

    let err = rt.update_all().unwrap_err();
    assert!(matches!(err, FlowError::RunawayChain { limit: 1000 }));
    assert!(err.to_string().starts_with("too long update chain"));
}

#[test]
fn runaway_limit_follows_config() {
    let rt = Runtime::with_config(SchedulerConfig::new().with_max_ticks(3)).unwrap();
    let a = rt.signal(record! { n: 0 }).unwrap();
    let b = rt.signal(record! { n: 0 }).unwrap();
    let (to_b, to_a) = (b.clone(), a.clone());
    a.on(move |this, _| to_b.set("n", this.get("n").unwrap().as_f64().unwrap_or(0.0) + 1.0));
    b.on(move |this, _| to_a.set("n", this.get("n").unwrap().as_f64().unwrap_or(0.0) + 1.0));

    a.set("n", 1).unwrap();
    assert!(matches!(
        rt.update_all(),
        Err(FlowError::RunawayChain { limit: 3 })
    ));

    // The next settle gets a fresh budget.
    let _ = rt.update_all();
    assert!(a.get("n").unwrap().as_f64().unwrap() > 1.0);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn failing_subscribers_do_not_stop_others() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 0 }).unwrap();
    let after = Rc::new(Cell::new(0));

    signal.on_tagged("fallible", |_, _| -> Result<(), String> { Err("refused".into()) });
    signal.on(|_: &Signal, _: &Record| -> Result<(), String> { panic!("callback exploded") });
    let after_clone = Rc::clone(&after);
    signal.on(move |_, _| after_clone.set(after_clone.get() + 1));

    signal.set("value", 1).unwrap();
    let err = rt.update_all().unwrap_err();

    assert_eq!(after.get(), 1);
    let failures = err.subscriber_failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].tag.as_ref().map(|t| t.as_str()), Some("fallible"));
    assert_eq!(failures[0].message, "refused");
    assert!(failures[1].message.contains("callback exploded"));
    assert_eq!(signal.get("value").unwrap(), 1);
}

#[test]
fn failures_across_ticks_are_aggregated() {
    let rt = Runtime::new();
    let a = rt.signal(record! { v: 0 }).unwrap();
    let b = rt.signal(record! { v: 0 }).unwrap();
    let to_b = b.clone();
    a.on(move |this, _| -> Result<(), &'static str> {
        to_b.set("v", this.get("v").unwrap()).unwrap();
        Err("a failed")
    });
    b.on(|_, _| -> Result<(), &'static str> { Err("b failed") });

    a.set("v", 5).unwrap();
    let err = rt.update_all().unwrap_err();
    let messages: Vec<_> = err
        .subscriber_failures()
        .iter()
        .map(|f| f.message.as_str())
        .collect();
    assert_eq!(messages, vec!["a failed", "b failed"]);
    assert_eq!(b.get("v").unwrap(), 5);
}

#[test]
fn subscribers_run_in_registration_order() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 0 }).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    for i in 0..5 {
        let order = Rc::clone(&order);
        signal.on(move |_, _| order.borrow_mut().push(i));
    }
    signal.set("value", 1).unwrap();
    rt.update_all().unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn subscribing_from_a_callback_takes_effect_next_tick() {
    let rt = Runtime::new();
    let signal = rt.signal(record! { value: 0 }).unwrap();
    let late_calls = Rc::new(Cell::new(0));
    let late = Rc::clone(&late_calls);
    let registered = Rc::new(Cell::new(false));
    signal.on(move |this, _| {
        if !registered.replace(true) {
            let late = Rc::clone(&late);
            this.on(move |_, _| late.set(late.get() + 1));
        }
    });

    signal.set("value", 1).unwrap();
    rt.update_all().unwrap();
    assert_eq!(late_calls.get(), 0);

    signal.set("value", 2).unwrap();
    rt.update_all().unwrap();
    assert_eq!(late_calls.get(), 1);
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn dropping_a_tree_frees_every_node() {
    let rt = Runtime::new();
    {
        let root = rt
            .signal(record! { a: record! { b: record! { c: 1 } }, d: record! {} })
            .unwrap();
        let linked = root.link(record! { extra: 1 }).unwrap();
        linked.set("extra", 2).unwrap();
        rt.update_all().unwrap();
        assert_eq!(rt.live_signals(), 5);
    }
    rt.update_all().unwrap();
    assert_eq!(rt.live_signals(), 0);
    assert_eq!(rt.relay_count(), 0);
}
