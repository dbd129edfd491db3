//! Testing utilities and mock implementations
//!
//! In-memory stand-ins for the broker and the setpoint store.

pub mod mocks;

pub use mocks::*;
