#![forbid(unsafe_code)]

//! flow2d public facade crate.
//!
//! Re-exports the signal engine at the crate root and, with the default
//! `entity` feature, the entity layer under [`entity`].
//!
//! ```
//! use flow2d::prelude::*;
//!
//! let rt = Runtime::new();
//! let s = rt.signal(record! { value: 1 })?;
//! s.set("value", 2)?;
//! rt.update_all()?;
//! assert_eq!(s.get("value")?, 2);
//! # Ok::<(), FlowError>(())
//! ```

pub use flow2d_signal::*;

#[cfg(feature = "entity")]
pub use flow2d_entity as entity;

pub mod prelude {
    pub use flow2d_signal::{
        FlowError, Method, Record, Runtime, SchedulerConfig, Signal, SubscriptionHandle, Value,
        record,
    };

    #[cfg(feature = "entity")]
    pub use flow2d_entity::{Component, Entity, Vec2d, vec2d};
}
