//! Core framing, constants and error types.
//!
//! This module is always compiled. It has no runtime dependencies and can be
//! used on its own to build or inspect datagrams.

pub mod constants;
mod error;
mod frame;

pub use error::*;
pub use frame::*;
