//! Integration tests for hypercache
//!
//! This crate provides cross-crate tests covering:
//! - The shared engine contract across memory and file backends
//! - End-to-end scenarios (LRU budgets, TTL sweeps, remember)
//! - Cluster routing and failover
//! - Environment-driven configuration
//! - Session locking over a shared facade

pub mod helpers;

pub use helpers::*;

#[cfg(test)]
mod cluster_tests;
#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod scenario_tests;
#[cfg(test)]
mod session_tests;
