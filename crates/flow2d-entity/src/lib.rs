#![forbid(unsafe_code)]

//! Entity, component and 2-D vector helpers for flow2d.
//!
//! Everything here is built on the public surface of [`flow2d_signal`]:
//! each helper is a signal with a fixed key set, so its writes are deferred
//! and batched like any other signal's.
//!
//! - [`Component`]: named signal with a `parent` reference.
//! - [`Entity`]: ordered component list plus a name lookup.
//! - [`Vec2d`] / [`vec2d`]: `{ x, y }` with `add` and `sub` methods.

pub mod component;
pub mod entity;
pub mod vec2d;

pub use component::Component;
pub use entity::Entity;
pub use vec2d::{Vec2d, vec2d};
