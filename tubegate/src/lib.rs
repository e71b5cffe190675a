//! tubegate library crate.
//!
//! Selects encoded variants of a remote media item, optionally muxes or
//! re-encodes them through an external transform process, and delivers the
//! bytes over HTTP or to disk. Exposed as a library for integration testing.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod transform;
pub mod utils;

pub use error::{Error, Result};
