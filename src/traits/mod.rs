//! Trait definitions for the transport the engine drives.
//!
//! The engine talks to the chain through one line-oriented port. Anything
//! that can write a line and deliver inbound lines works: a USB serial
//! adapter, a TCP bridge, or the simulated chain used in tests.
//!
//! # Submodules
//!
//! - `port`: [`LinePort`], [`PortEvent`], [`Connection`] and [`Connector`]
//!
//! # Implementations
//!
//! - [`crate::hal::MockPort`]: in-memory port with a shared write log
//! - `crate::hal::SerialLinePort`: tokio-serial port (requires `serial` feature)

pub mod port;

pub use port::*;
