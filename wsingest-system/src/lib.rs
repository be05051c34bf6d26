//! Foundational system components for wsingest's tasks.
//!
//! This crate provides the two primitives the connector's lifecycle is built on:
//!
//!  - [`ShutdownSignal`]: a single-fire notification with any number of observers.
//!  - [`spawn`] and [`TaskHandle`]: supervised tasks whose completion, panic, or cancellation can
//!    be observed by the spawner.

#![warn(missing_docs)]

mod shutdown;
mod task;

pub use self::shutdown::*;
pub use self::task::*;
