//! # Cache Routing
//!
//! Engine registration and selection for hypercache.
//!
//! The [`EngineSelector`] is the library's sole engine registry, with an
//! explicit lifecycle: [`EngineSelector::new`], [`EngineSelector::register`],
//! [`EngineSelector::shutdown`]. Selection prefers the configured engine
//! when it is available and otherwise ranks available engines by their
//! static performance level.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod selector;

pub use selector::{BenchmarkReport, EngineSelector};
