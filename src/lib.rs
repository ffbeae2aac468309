//! Gantry mid-end optimization library.
//!
//! This crate holds the sea-of-nodes intermediate representation of the
//! Gantry compiler together with its control-flow analyses and the
//! reassociation pass. Front-ends build a [`ir::Graph`] per procedure and
//! run [`optimize_reassociation`] on it.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use cranelift_entity as entity;
pub use crate::entity::packed_option;

/// A macro for defining cheap pass-internal trace logging.
///
/// Compiled out entirely in release builds unless the `trace-log` feature
/// is enabled, so hot loops may trace freely.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(any(feature = "trace-log", debug_assertions)) {
            ::log::trace!($($tt)*);
        }
    };
}

pub mod dominator_tree;
pub mod flowgraph;
pub mod ir;
pub mod loop_analysis;

mod eor_equality;
mod fx;
mod reassoc;
mod shannon;

pub use crate::reassoc::optimize_reassociation;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
