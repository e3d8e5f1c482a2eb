#![forbid(unsafe_code)]

//! Two-component vectors as signals.
//!
//! `vec2d(x, y)` is a signal `{ x, y, add, sub }` where `add` and `sub` are
//! methods taking one vector-like argument (another vector signal or a
//! record with `x` and `y`). Both read the committed coordinates and stage
//! the result, so two calls between settles do not accumulate: the later
//! one wins.

use flow2d_signal::{FlowError, Method, Record, Result, Runtime, Signal, Value, record};

/// Create a vector on the thread's default runtime.
pub fn vec2d(x: f64, y: f64) -> Result<Vec2d> {
    Vec2d::new_in(&flow2d_signal::runtime(), x, y)
}

/// Handle to a vector signal.
#[derive(Debug, Clone)]
pub struct Vec2d {
    signal: Signal,
}

fn coordinates(value: &Value) -> Result<(f64, f64)> {
    let axis = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| FlowError::method(format!("expected a vector with numeric `{key}`")))
    };
    Ok((axis("x")?, axis("y")?))
}

fn apply(this: &Signal, args: &[Value], sign: f64) -> Result<Value> {
    let other = args
        .first()
        .ok_or_else(|| FlowError::method("expected one vector argument"))?;
    let (dx, dy) = coordinates(other)?;
    let (x, y) = coordinates(&Value::from(this))?;
    this.set("x", x + sign * dx)?;
    this.set("y", y + sign * dy)?;
    Ok(Value::Unset)
}

impl Vec2d {
    pub fn new_in(runtime: &Runtime, x: f64, y: f64) -> Result<Self> {
        let signal = runtime.signal(record! {
            x: x,
            y: y,
            add: Method::new(|this, args| apply(this, args, 1.0)),
            sub: Method::new(|this, args| apply(this, args, -1.0)),
        })?;
        Ok(Self { signal })
    }

    #[must_use]
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Committed x.
    #[must_use]
    pub fn x(&self) -> f64 {
        self.axis("x")
    }

    /// Committed y.
    #[must_use]
    pub fn y(&self) -> f64 {
        self.axis("y")
    }

    fn axis(&self, key: &str) -> f64 {
        self.signal
            .get(key)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or_default()
    }

    /// Stage `self + other`.
    pub fn add(&self, other: &Vec2d) -> Result<()> {
        self.signal.call("add", &[Value::from(&other.signal)]).map(drop)
    }

    /// Stage `self - other`.
    pub fn sub(&self, other: &Vec2d) -> Result<()> {
        self.signal.call("sub", &[Value::from(&other.signal)]).map(drop)
    }

    /// Stage both coordinates.
    pub fn set(&self, x: f64, y: f64) -> Result<()> {
        self.signal.set("x", x)?;
        self.signal.set("y", y)
    }

    /// Committed coordinates as a plain record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        record! { x: self.x(), y: self.y() }
    }
}
