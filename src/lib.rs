//! gpu-sentinel: a per-node health-inspection daemon for GPU compute
//! fleets.
//!
//! This crate is the generic Component Runtime and its supporting
//! primitives: the timeout/panic-containment harness, the native-handle
//! lifecycle, the checker/spec evaluation model, the result ring, the
//! async event poller, and the Prometheus metrics surface. How any given
//! piece of hardware is actually probed is deliberately out of scope —
//! concrete collectors and checkers plug into the traits defined here.

pub mod checker;
pub mod collector;
pub mod config;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod registry;
pub mod ring;
pub mod runtime;
pub mod snapshot;
pub mod version;

pub use error::{Error, Result};
