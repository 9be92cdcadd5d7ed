//! # Cache Session
//!
//! Session persistence over the cache facade, with exclusive-write locking.
//!
//! The lock protocol turns the facade's atomic `add` into a mutual
//! exclusion primitive: a per-session lock key whose presence denotes
//! ownership and whose TTL equals the acquisition timeout, so abandoned
//! locks reclaim themselves.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod handler;
pub mod sid;

pub use handler::{SessionHandler, SessionRecord};
pub use sid::{create_sid, validate_id};
