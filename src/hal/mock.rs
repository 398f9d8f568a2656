//! Mock transport for testing without hardware.
//!
//! This module provides an in-memory port and a simulated firmware peer,
//! enabling development and testing on desktop without a chain attached.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockLink`] | [`Connector`] | Opens [`MockPort`]s; shared write log, injection, failures |
//! | [`MockPort`] | [`LinePort`] | Writer half handed to the engine |
//! | [`SimulatedChain`] | [`Responder`] | Answers wire lines the way the firmware does |
//!
//! # Example
//!
//! ```rust
//! use led_chain::hal::{MockLink, SimulatedChain};
//! use led_chain::traits::{Connector, LinePort, PortEvent};
//!
//! # tokio_test_block(async {
//! let link = MockLink::new().with_responder(SimulatedChain::new(3));
//! let mut conn = link.open().unwrap();
//!
//! // The simulated master prints its banner on open
//! assert_eq!(
//!     conn.events.recv().await,
//!     Some(PortEvent::Line("Round Robin Master Started".into()))
//! );
//!
//! conn.port.write_line("000,status").unwrap();
//! assert_eq!(link.written(), vec!["000,status".to_string()]);
//! assert_eq!(
//!     conn.events.recv().await,
//!     Some(PortEvent::Line("Total devices: 3, Current State: READY".into()))
//! );
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! [`Connector`]: crate::traits::Connector
//! [`LinePort`]: crate::traits::LinePort

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::codec::parse_wire_line;
use crate::commands::CommandKind;
use crate::traits::{Connection, Connector, LinePort, PortError, PortEvent, PORT_EVENT_CAPACITY};

// ============================================================================
// Responder
// ============================================================================

/// Produces the peer's answer to one written line.
pub trait Responder: Send {
    /// Lines the peer prints in reply to `line`.
    fn respond(&mut self, line: &str) -> Vec<String>;

    /// Lines the peer prints when the port opens.
    fn banner(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Lets a test keep a handle on the responder it gave to a link.
impl<R: Responder> Responder for Arc<Mutex<R>> {
    fn respond(&mut self, line: &str) -> Vec<String> {
        match self.lock() {
            Ok(mut inner) => inner.respond(line),
            Err(_) => Vec::new(),
        }
    }

    fn banner(&self) -> Vec<String> {
        match self.lock() {
            Ok(inner) => inner.banner(),
            Err(_) => Vec::new(),
        }
    }
}

// ============================================================================
// Simulated Chain
// ============================================================================

/// Firmware model of a round-robin master plus `devices` slaves.
///
/// Public fields expose what the chain was told, for verification.
///
/// ```rust
/// use led_chain::hal::{Responder, SimulatedChain};
///
/// let mut chain = SimulatedChain::new(2);
/// assert_eq!(chain.respond("002,servo,767"), vec!["ACK".to_string()]);
/// assert_eq!(chain.servo_raw, vec![0, 767]);
///
/// assert_eq!(
///     chain.respond("003,servo,767"),
///     vec!["ERROR: Invalid device ID 003".to_string()]
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulatedChain {
    /// Chain length reported by discovery and status.
    pub devices: u16,
    /// Last raw servo value per device.
    pub servo_raw: Vec<u16>,
    /// Last raw DAC value per device.
    pub dac_raw: Vec<u16>,
    /// Number of lines received.
    pub lines_received: usize,
}

impl SimulatedChain {
    /// Chain of `devices` slaves, all outputs at zero.
    pub fn new(devices: u16) -> Self {
        let n = usize::from(devices);
        Self {
            devices,
            servo_raw: vec![0; n],
            dac_raw: vec![0; n],
            lines_received: 0,
        }
    }

    fn apply(values: &mut [u16], target: u16, raw: u16) {
        if target == 0 {
            values.iter_mut().for_each(|v| *v = raw);
        } else if let Some(v) = values.get_mut(usize::from(target) - 1) {
            *v = raw;
        }
    }
}

impl Responder for SimulatedChain {
    fn respond(&mut self, line: &str) -> Vec<String> {
        self.lines_received += 1;

        let Some(wire) = parse_wire_line(line) else {
            return vec![format!("ERROR: Unknown command: {}", line.trim())];
        };
        let target = wire.target.get();
        if target > self.devices {
            return vec![format!("ERROR: Invalid device ID {}", wire.target)];
        }

        match (wire.kind, wire.raw) {
            (CommandKind::Servo, Some(raw)) => {
                Self::apply(&mut self.servo_raw, target, raw);
                vec!["ACK".into()]
            }
            (CommandKind::Dac, Some(raw)) => {
                Self::apply(&mut self.dac_raw, target, raw);
                vec!["ACK".into()]
            }
            (CommandKind::Status, _) => vec![format!(
                "Total devices: {}, Current State: READY",
                self.devices
            )],
            (CommandKind::Reinit, _) => vec![
                "Reinitializing chain...".into(),
                format!("Initialization complete. Total devices: {}", self.devices),
            ],
            (CommandKind::Help, _) => vec![
                "Commands: servo, dac, status, reinit, help".into(),
                "OK".into(),
            ],
            _ => vec!["ERROR: Malformed command".into()],
        }
    }

    fn banner(&self) -> Vec<String> {
        vec!["Round Robin Master Started".into()]
    }
}

// ============================================================================
// Mock Link / Port
// ============================================================================

#[derive(Default)]
struct LinkState {
    written: Vec<String>,
    events: Option<mpsc::Sender<PortEvent>>,
    responder: Option<Box<dyn Responder>>,
    reply_delay: Option<Duration>,
    muted: bool,
    fail_writes: Option<String>,
    fail_next_open: Option<String>,
    opens: usize,
    closed: bool,
}

/// Test side of a mock serial link.
///
/// Acts as the [`Connector`]: every `open()` creates a fresh [`MockPort`]
/// and event channel, while the write log and responder survive reconnects.
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    /// Silent link: records writes, never answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link answered by the given simulated chain.
    pub fn simulated(devices: u16) -> Self {
        Self::new().with_responder(SimulatedChain::new(devices))
    }

    /// Answer every write through `responder`.
    pub fn with_responder(self, responder: impl Responder + 'static) -> Self {
        self.lock().responder = Some(Box::new(responder));
        self
    }

    /// Deliver answers after `delay` instead of immediately.
    pub fn with_reply_delay(self, delay: Duration) -> Self {
        self.lock().reply_delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        // A test that panicked while holding the lock has already failed.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every line written so far, across reconnects.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Number of lines written so far.
    pub fn write_count(&self) -> usize {
        self.lock().written.len()
    }

    /// Most recent line written.
    pub fn last_written(&self) -> Option<String> {
        self.lock().written.last().cloned()
    }

    /// Number of successful opens.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Whether the current port has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Stop (or resume) answering writes.
    pub fn mute(&self, muted: bool) {
        self.lock().muted = muted;
    }

    /// Make every write fail with `reason` (or succeed again with `None`).
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.lock().fail_writes = reason.map(Into::into);
    }

    /// Make the next `open()` fail with `reason`.
    pub fn fail_next_open(&self, reason: &str) {
        self.lock().fail_next_open = Some(reason.into());
    }

    /// Deliver an inbound line as if the chain printed it.
    pub fn inject(&self, line: &str) -> bool {
        self.send(PortEvent::Line(line.into()))
    }

    /// Report a port failure (e.g. cable pulled).
    pub fn fail(&self, reason: &str) -> bool {
        self.send(PortEvent::Error(reason.into()))
    }

    fn send(&self, event: PortEvent) -> bool {
        match &self.lock().events {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}

fn deliver(tx: &mpsc::Sender<PortEvent>, lines: Vec<String>, delay: Option<Duration>) {
    if lines.is_empty() {
        return;
    }
    match delay {
        Some(delay) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for line in lines {
                    if tx.send(PortEvent::Line(line)).await.is_err() {
                        break;
                    }
                }
            });
        }
        None => {
            for line in lines {
                let _ = tx.try_send(PortEvent::Line(line));
            }
        }
    }
}

impl Connector for MockLink {
    fn open(&self) -> Result<Connection, PortError> {
        let mut state = self.lock();
        if let Some(reason) = state.fail_next_open.take() {
            return Err(PortError::Open {
                port: "mock".into(),
                reason,
            });
        }

        let (tx, rx) = mpsc::channel(PORT_EVENT_CAPACITY);
        let banner = state
            .responder
            .as_ref()
            .map(|r| r.banner())
            .unwrap_or_default();
        deliver(&tx, banner, None);

        state.events = Some(tx);
        state.opens += 1;
        state.closed = false;
        drop(state);

        Ok(Connection::new(
            MockPort {
                link: self.clone(),
                closed: false,
            },
            rx,
        ))
    }
}

/// Writer half of a [`MockLink`].
pub struct MockPort {
    link: MockLink,
    closed: bool,
}

impl LinePort for MockPort {
    fn write_line(&mut self, line: &str) -> Result<(), PortError> {
        if self.closed {
            return Err(PortError::Closed);
        }
        let mut state = self.link.lock();
        if let Some(reason) = &state.fail_writes {
            return Err(PortError::Write(reason.clone()));
        }
        state.written.push(line.to_string());

        if state.muted {
            return Ok(());
        }
        let replies = match state.responder.as_mut() {
            Some(responder) => responder.respond(line),
            None => Vec::new(),
        };
        if let Some(tx) = &state.events {
            deliver(tx, replies, state.reply_delay);
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.link.lock();
            state.closed = true;
            state.events = None;
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_chain_applies_broadcast_to_every_device() {
        let mut chain = SimulatedChain::new(3);
        assert_eq!(chain.respond("000,dac,512"), vec!["ACK".to_string()]);
        assert_eq!(chain.dac_raw, vec![512, 512, 512]);
        assert_eq!(chain.lines_received, 1);
    }

    #[test]
    fn simulated_chain_answers_reinit_with_discovery() {
        let mut chain = SimulatedChain::new(4);
        let lines = chain.respond("000,reinit");
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Initialization complete. Total devices: 4")
        );
    }

    #[test]
    fn simulated_chain_rejects_garbage() {
        let mut chain = SimulatedChain::new(1);
        assert_eq!(
            chain.respond("hello"),
            vec!["ERROR: Unknown command: hello".to_string()]
        );
    }

    #[tokio::test]
    async fn closed_port_refuses_writes_and_drops_injections() {
        let link = MockLink::new();
        let mut conn = link.open().unwrap();
        conn.port.write_line("000,status").unwrap();
        conn.port.close();

        assert!(link.is_closed());
        assert_eq!(conn.port.write_line("000,status"), Err(PortError::Closed));
        assert!(!link.inject("ACK"));
        assert_eq!(link.write_count(), 1);
    }

    #[tokio::test]
    async fn write_log_survives_reopen() {
        let link = MockLink::simulated(2);
        let mut first = link.open().unwrap();
        first.port.write_line("000,status").unwrap();
        first.port.close();

        let mut second = link.open().unwrap();
        second.port.write_line("001,servo,767").unwrap();

        assert_eq!(link.opens(), 2);
        assert_eq!(link.written(), vec!["000,status", "001,servo,767"]);
    }

    #[tokio::test]
    async fn failing_open_and_writes() {
        let link = MockLink::new();
        link.fail_next_open("busy");
        assert!(matches!(link.open(), Err(PortError::Open { .. })));

        let mut conn = link.open().unwrap();
        link.fail_writes(Some("unplugged"));
        assert_eq!(
            conn.port.write_line("000,status"),
            Err(PortError::Write("unplugged".into()))
        );
        assert_eq!(link.write_count(), 0);
    }

    #[tokio::test]
    async fn muted_link_records_but_does_not_answer() {
        let link = MockLink::simulated(1);
        let mut conn = link.open().unwrap();
        // banner
        assert!(conn.events.recv().await.is_some());

        link.mute(true);
        conn.port.write_line("000,status").unwrap();
        assert!(conn.events.try_recv().is_err());
        assert_eq!(link.write_count(), 1);
    }
}
