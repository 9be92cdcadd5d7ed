//! # Cache Memory
//!
//! In-process cache engine with TTL and LRU eviction.
//!
//! The synchronous [`MemoryStore`] is the native core: a single-mutex map
//! with byte-budget accounting, batched LRU eviction, and periodic expired
//! sweeps. It is consumed directly by the C-ABI crate. [`MemoryEngine`]
//! adapts the store to the async [`cache_core::CacheEngine`] contract; its
//! operations never suspend.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod store;

pub use engine::MemoryEngine;
pub use store::{MemoryStats, MemoryStore};
