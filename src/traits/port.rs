//! Line-oriented transport abstraction.
//!
//! A port has two halves:
//!
//! | Half | Type | Direction |
//! |------|------|-----------|
//! | Writer | [`LinePort`] | engine to chain, one line per call |
//! | Events | `mpsc::Receiver<PortEvent>` | chain to engine, lines and errors |
//!
//! The writer is synchronous: implementations either write in place (mocks)
//! or hand the line to their own writer task (serial). The worker owns both
//! halves for the life of the connection.
//!
//! # Example
//!
//! ```rust
//! use led_chain::traits::{Connection, LinePort, PortError, PortEvent};
//! use tokio::sync::mpsc;
//!
//! struct Discard;
//!
//! impl LinePort for Discard {
//!     fn write_line(&mut self, _line: &str) -> Result<(), PortError> {
//!         Ok(())
//!     }
//!
//!     fn close(&mut self) {}
//! }
//!
//! let (_tx, rx) = mpsc::channel::<PortEvent>(8);
//! let conn = Connection::new(Discard, rx);
//! assert_eq!(conn.port.name(), "port");
//! ```

use tokio::sync::mpsc;

/// Capacity of a port's inbound event channel.
pub const PORT_EVENT_CAPACITY: usize = 64;

/// Port-level failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The port could not be opened.
    #[error("cannot open {port}: {reason}")]
    Open {
        /// Port name.
        port: String,
        /// Driver message.
        reason: String,
    },
    /// The port is closed.
    #[error("port closed")]
    Closed,
    /// A write failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// Something the port reports upward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortEvent {
    /// One inbound line, without its terminator.
    Line(String),
    /// The port failed; no more lines will follow.
    Error(String),
}

/// Writer half of a line-oriented port.
pub trait LinePort: Send {
    /// Write one line. The implementation appends the newline.
    fn write_line(&mut self, line: &str) -> Result<(), PortError>;

    /// Close the port. Further writes fail with [`PortError::Closed`].
    fn close(&mut self);

    /// Name for logs.
    fn name(&self) -> &str {
        "port"
    }
}

impl<P: LinePort + ?Sized> LinePort for Box<P> {
    fn write_line(&mut self, line: &str) -> Result<(), PortError> {
        (**self).write_line(line)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// An open port: writer plus inbound events.
pub struct Connection {
    /// Writer half.
    pub port: Box<dyn LinePort>,
    /// Inbound lines and errors.
    pub events: mpsc::Receiver<PortEvent>,
}

impl Connection {
    /// Bundle a writer with its event receiver.
    pub fn new(port: impl LinePort + 'static, events: mpsc::Receiver<PortEvent>) -> Self {
        Self {
            port: Box::new(port),
            events,
        }
    }
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port.name())
            .finish_non_exhaustive()
    }
}

/// Opens connections; called on connect and again on every reconnect.
pub trait Connector: Send + Sync {
    /// Open a fresh connection.
    fn open(&self) -> Result<Connection, PortError>;
}

impl<F> Connector for F
where
    F: Fn() -> Result<Connection, PortError> + Send + Sync,
{
    fn open(&self) -> Result<Connection, PortError> {
        self()
    }
}
