//! # led-chain
//!
//! Protocol engine for a daisy chain of servo/LED-driver boards behind a
//! round-robin master, reached over one serial line.
//!
//! ## Features
//!
//! - **Codec**: validated, unit-scaled commands encoded as `NNN,cmd[,value]`
//!   lines, and classification of whatever the master prints back
//! - **Discovery**: the chain length is learned on connect and on `reinit`,
//!   and every addressed command is checked against it
//! - **Protocol state machine**: one command in flight, a 2.5 s response
//!   window, explicit recovery and fault states
//! - **Dispatcher**: a single async worker owns the port; concurrent
//!   submissions get `busy` instead of interleaving on the wire
//! - **Demo sequencer**: cancellable scripted choreographies
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `commands` - Command, address and error types
//! - `codec` - Unit scaling, wire encoding and response decoding
//! - `registry` - Chain length learned by discovery
//! - `protocol` - Synchronous state machine driven by `now_ms`
//! - `dispatcher` - Async worker that owns the port and the machine
//! - `demo` - Scripted command sequences with cancellation
//! - `session` - Everything for one connection, the shells' entry point
//! - `traits` / `hal` - Port abstraction (mock for testing, tokio-serial for hardware)
//!
//! ## Example
//!
//! ```rust
//! use led_chain::hal::MockLink;
//! use led_chain::{ChainSession, Command, CommandKind, Config, DeviceAddress, EngineError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let link = MockLink::simulated(3);
//! let session = ChainSession::connect(Config::default(), link.clone()).unwrap();
//! session.ready().await.unwrap();
//!
//! // Half of the 2100 mA window on every LED
//! session.submit(Command::dac_all(1050)).await.unwrap();
//! assert_eq!(link.last_written().as_deref(), Some("000,dac,512"));
//!
//! // Device 5 does not exist on a chain of 3, so nothing is sent
//! let err = session
//!     .submit_command(CommandKind::Servo, DeviceAddress::device(5), Some(90))
//!     .await
//!     .unwrap_err();
//! assert!(matches!(err, EngineError::UnknownTarget { .. }));
//! assert_eq!(link.last_written().as_deref(), Some("000,dac,512"));
//! # });
//! ```

#![warn(missing_docs)]

/// Wire codec: unit scaling, line encoding and response classification.
pub mod codec;
/// Command, address, outcome and error types.
pub mod commands;
/// Configuration: port, timeouts and safety windows.
pub mod config;
/// Demo sequencer with cooperative cancellation.
pub mod demo;
/// Async command dispatcher owning the port.
pub mod dispatcher;
/// Timestamped event log of wire traffic and session activity.
pub mod events;
/// Port implementations: mock for testing, tokio-serial for hardware.
pub mod hal;
/// Synchronous protocol state machine.
pub mod protocol;
/// Chain registry populated by discovery.
pub mod registry;
/// Session facade over one connection.
pub mod session;
/// Port and connector traits.
pub mod traits;

/// HTTP API over a session (feature-gated).
#[cfg(feature = "web")]
pub mod services;

// Re-exports for convenience
pub use codec::{Codec, EncodedCommand, ParsedLine, UnitScale};
pub use commands::{
    Command, CommandKind, CommandOutcome, DeviceAddress, EngineError, InvalidReason,
};
pub use config::{Config, ConfigError, ProtocolConfig, SerialConfig, UnitRange, WebConfig};
pub use demo::{DemoError, DemoHandle, DemoPattern, DemoReport, DemoStep};
pub use dispatcher::DispatcherHandle;
pub use events::{Classification, EventLog, LineDirection, LogEvent};
pub use protocol::{ChainStatus, FaultReason, ProtocolStateMachine, SystemState};
pub use registry::ChainRegistry;
pub use session::{ChainSession, SessionError};
pub use traits::{Connection, Connector, LinePort, PortError, PortEvent};
