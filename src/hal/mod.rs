//! Transport implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: in-memory link and simulated chain for tests and demos
//! - `serial`: USB/UART serial port via tokio-serial (requires `serial` feature)

pub mod mock;

#[cfg(feature = "serial")]
pub mod serial;

pub use mock::*;

#[cfg(feature = "serial")]
pub use serial::*;
