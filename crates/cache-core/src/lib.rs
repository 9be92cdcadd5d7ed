//! # Cache Core
//!
//! Core types, traits, and error handling for the hypercache engines.
//!
//! This crate provides the foundational types used throughout the library:
//! - The [`CacheEngine`] trait shared by every backend
//! - Validated domain types ([`CacheKey`], [`Entry`])
//! - Error types and the [`Lookup`] result model
//! - The payload serializer registry

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod entry;
pub mod error;
pub mod key;
pub mod serializer;

// Re-export commonly used types
pub use engine::{CacheEngine, Lookup, PerformanceLevel};
pub use entry::{epoch_secs, Entry, METADATA_OVERHEAD};
pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
pub use serializer::{JsonCodec, PayloadCodec, RawCodec, SerializerRegistry};
