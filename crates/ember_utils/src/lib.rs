//! General utilities for the Ember runtime crates.

#![warn(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod cmdline;
mod collections;
mod default;
mod delegate;
mod guid;
mod names;

#[macro_use]
mod alert;

pub mod paths;
pub mod task;

/// Helper to export the same types in the crate root and in the prelude.
macro_rules! pub_use {
    () => {
        pub use crate::{
            cmdline::*, collections::*, default::*, delegate::*, guid::*, names::*,
        };
    };
}
pub_use!();

/// The prelude.
pub mod prelude {
    pub_use!();
    pub use crate::{alert_if, alert_if_not, paths, task};
}

// Re-export for macro use and so that dependents share one version.
pub use {fxhash, hashbrown, once_cell, parking_lot, tracing};
