//! Protocol state machine.
//!
//! Tracks the session lifecycle, the single pending command and the
//! discovery window. Like the rest of the core it is synchronous and takes
//! `now_ms` from the caller, so the same machine runs under tokio, under a
//! paused test clock, or in a plain loop.
//!
//! # States
//!
//! ```text
//! Disconnected    --connect-------------> Initializing
//! Initializing    --discovery report----> Ready
//! Initializing    --discovery timeout---> Fault
//! Ready           --admit---------------> Processing
//! Ready           --admit reinit--------> Initializing
//! Processing      --ack/status/error----> Ready
//! Processing      --command timeout-----> TimeoutRecovery --recover--> Ready
//! any             --transport error-----> Fault
//! any             --disconnect----------> Disconnected
//! ```
//!
//! Only `Ready` admits commands. `Processing` and `TimeoutRecovery` reject
//! with [`EngineError::Busy`]; every other state rejects with
//! [`EngineError::NotReady`].
//!
//! A command is pending exactly while the state is `Processing` or
//! `TimeoutRecovery`. A re-initialisation request waits on discovery
//! instead and is never the pending command.
//!
//! # Example
//!
//! ```rust
//! use led_chain::codec::{decode, Codec};
//! use led_chain::config::Config;
//! use led_chain::protocol::{Effect, ProtocolStateMachine, SystemState};
//! use led_chain::{Command, CommandOutcome};
//!
//! let config = Config::default();
//! let codec = Codec::from_config(&config);
//! let mut machine = ProtocolStateMachine::new(config.protocol.clone());
//!
//! machine.connect(0);
//! machine.on_line(&decode("Initialization complete. Total devices: 3"), 40);
//! assert_eq!(machine.state(), SystemState::Ready);
//!
//! let sent = machine.admit(&Command::servo_all(90), &codec, 100).unwrap();
//! assert_eq!(sent.line.as_str(), "000,servo,767");
//! assert_eq!(machine.state(), SystemState::Processing);
//!
//! match machine.on_line(&decode("ACK"), 150) {
//!     Effect::Resolved(r) => assert_eq!(r.result, Ok(CommandOutcome::Acknowledged)),
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(machine.state(), SystemState::Ready);
//! ```

use core::fmt;

use crate::codec::{describe_command, Codec, EncodedCommand, ParsedLine, WireLine};
use crate::commands::{Command, CommandKind, CommandOutcome, EngineError};
use crate::config::ProtocolConfig;
use crate::registry::ChainRegistry;

// ============================================================================
// States
// ============================================================================

/// Lifecycle state of one chain session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SystemState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport open, waiting for the discovery report.
    Initializing,
    /// Idle; accepts one command.
    Ready,
    /// One command in flight.
    Processing,
    /// The pending command timed out and is being reclaimed.
    TimeoutRecovery,
    /// Unrecoverable; needs a reconnect.
    Fault,
}

impl SystemState {
    /// Stable lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SystemState::Disconnected => "disconnected",
            SystemState::Initializing => "initializing",
            SystemState::Ready => "ready",
            SystemState::Processing => "processing",
            SystemState::TimeoutRecovery => "timeout_recovery",
            SystemState::Fault => "fault",
        }
    }

    /// Why a command submitted in this state is refused, if it is.
    pub const fn admission_error(&self) -> Option<EngineError> {
        match self {
            SystemState::Ready => None,
            SystemState::Processing | SystemState::TimeoutRecovery => Some(EngineError::Busy),
            other => Some(EngineError::NotReady(*other)),
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the session entered [`SystemState::Fault`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "reason", content = "detail", rename_all = "snake_case"))]
pub enum FaultReason {
    /// No discovery report within the discovery window.
    DiscoveryTimeout,
    /// The port failed or closed.
    Transport(String),
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultReason::DiscoveryTimeout => f.write_str("discovery timeout"),
            FaultReason::Transport(reason) => write!(f, "transport: {reason}"),
        }
    }
}

/// Snapshot of what an observer can see of the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainStatus {
    /// Current lifecycle state.
    pub state: SystemState,
    /// Known chain length.
    pub device_count: u16,
    /// Set while in [`SystemState::Fault`].
    pub fault: Option<FaultReason>,
}

// ============================================================================
// Pending command and effects
// ============================================================================

/// The single in-flight command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCommand {
    /// Submitted command.
    pub command: Command,
    /// Line that was written.
    pub line: WireLine,
    /// Raw wire value, for `Servo`/`Dac`.
    pub raw: Option<u16>,
    /// When it was admitted.
    pub sent_ms: u64,
    /// When it times out.
    pub deadline_ms: u64,
}

impl PendingCommand {
    /// Human-readable description of the command and its raw value.
    pub fn describe(&self) -> String {
        describe_command(&self.command, self.raw)
    }
}

/// A pending command reaching its one terminal outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// The command that was pending.
    pub pending: PendingCommand,
    /// How it ended.
    pub result: Result<CommandOutcome, EngineError>,
    /// Milliseconds from admission to resolution.
    pub elapsed_ms: u64,
}

/// What an inbound line or a clock tick did to the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// The pending command resolved (including a re-init finishing discovery).
    Resolved(Resolution),
    /// Discovery after connect completed with this chain length.
    Discovered(u16),
    /// Discovery after connect timed out; the session is faulted.
    DiscoveryFailed,
    /// The line did not apply to the current state.
    Stray,
}

// ============================================================================
// Machine
// ============================================================================

/// The protocol state machine and the chain registry it writes.
#[derive(Debug)]
pub struct ProtocolStateMachine {
    config: ProtocolConfig,
    state: SystemState,
    registry: ChainRegistry,
    pending: Option<PendingCommand>,
    reinit: Option<PendingCommand>,
    discovery_deadline: Option<u64>,
    fault: Option<FaultReason>,
}

impl ProtocolStateMachine {
    /// New machine in [`SystemState::Disconnected`].
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            state: SystemState::Disconnected,
            registry: ChainRegistry::new(),
            pending: None,
            reinit: None,
            discovery_deadline: None,
            fault: None,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> SystemState {
        self.state
    }

    /// Known chain length.
    #[inline]
    pub fn device_count(&self) -> u16 {
        self.registry.current_count()
    }

    /// The registry written by discovery.
    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// The in-flight command, if any.
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// The re-initialisation request waiting on discovery, if any.
    pub fn awaiting_discovery(&self) -> Option<&PendingCommand> {
        self.reinit.as_ref()
    }

    /// Fault reason while faulted.
    pub fn fault_reason(&self) -> Option<&FaultReason> {
        self.fault.as_ref()
    }

    /// Observer snapshot.
    pub fn status(&self) -> ChainStatus {
        ChainStatus {
            state: self.state,
            device_count: self.registry.current_count(),
            fault: self.fault.clone(),
        }
    }

    /// Earliest time at which [`poll`](Self::poll) has something to do.
    pub fn next_deadline(&self) -> Option<u64> {
        match self.state {
            SystemState::Processing => self.pending.as_ref().map(|p| p.deadline_ms),
            SystemState::Initializing => self.discovery_deadline,
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Transport became available: start discovery.
    ///
    /// Only valid from `Disconnected`; returns `false` and does nothing
    /// otherwise. A faulted session must [`disconnect`](Self::disconnect) first.
    pub fn connect(&mut self, now_ms: u64) -> bool {
        if self.state != SystemState::Disconnected {
            return false;
        }
        self.registry.reset();
        self.fault = None;
        self.begin_discovery(now_ms);
        true
    }

    /// Tear the session down. Returns the command that was in flight.
    pub fn disconnect(&mut self) -> Option<PendingCommand> {
        self.registry.reset();
        self.state = SystemState::Disconnected;
        self.discovery_deadline = None;
        self.fault = None;
        self.take_waiter()
    }

    /// Unrecoverable failure. Returns the command that was in flight.
    pub fn fault(&mut self, reason: FaultReason) -> Option<PendingCommand> {
        self.registry.reset();
        self.state = SystemState::Fault;
        self.discovery_deadline = None;
        self.fault = Some(reason);
        self.take_waiter()
    }

    /// Leave `TimeoutRecovery` once the timed-out command has been reported,
    /// releasing it.
    pub fn recover(&mut self) -> Option<PendingCommand> {
        if self.state != SystemState::TimeoutRecovery {
            return None;
        }
        self.state = SystemState::Ready;
        self.pending.take()
    }

    fn take_waiter(&mut self) -> Option<PendingCommand> {
        let pending = self.pending.take();
        let reinit = self.reinit.take();
        pending.or(reinit)
    }

    fn begin_discovery(&mut self, now_ms: u64) {
        self.state = SystemState::Initializing;
        self.discovery_deadline = Some(now_ms.saturating_add(self.config.discovery_timeout_ms));
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Admit `cmd` for transmission.
    ///
    /// On success the returned line must be written and the machine is in
    /// `Processing` (or `Initializing` for [`CommandKind::Reinit`], which
    /// resolves when discovery completes). On error nothing changed.
    pub fn admit(
        &mut self,
        cmd: &Command,
        codec: &Codec,
        now_ms: u64,
    ) -> Result<EncodedCommand, EngineError> {
        if let Some(err) = self.state.admission_error() {
            return Err(err);
        }
        let encoded = codec.encode(cmd, self.registry.current_count())?;

        let pending = PendingCommand {
            command: encoded.command,
            line: encoded.line.clone(),
            raw: encoded.raw,
            sent_ms: now_ms,
            deadline_ms: now_ms.saturating_add(self.config.command_timeout_ms),
        };

        if cmd.kind == CommandKind::Reinit {
            self.registry.reset();
            self.begin_discovery(now_ms);
            self.reinit = Some(PendingCommand {
                deadline_ms: now_ms.saturating_add(self.config.discovery_timeout_ms),
                ..pending
            });
        } else {
            self.state = SystemState::Processing;
            self.pending = Some(pending);
        }
        Ok(encoded)
    }

    /// Apply one decoded inbound line.
    pub fn on_line(&mut self, line: &ParsedLine, now_ms: u64) -> Effect {
        match self.state {
            SystemState::Initializing => self.on_discovery_line(line, now_ms),
            SystemState::Processing => {
                let result = match line {
                    ParsedLine::Ack => Ok(CommandOutcome::Acknowledged),
                    ParsedLine::StatusReport {
                        device_count,
                        state,
                    } => Ok(CommandOutcome::Status {
                        device_count: *device_count,
                        state: state.clone(),
                    }),
                    ParsedLine::ErrorReport(reason) => Err(EngineError::Rejected(reason.clone())),
                    ParsedLine::DiscoveryReport(_) | ParsedLine::Unrecognized(_) => {
                        return Effect::Stray
                    }
                };
                self.state = SystemState::Ready;
                match self.pending.take() {
                    Some(pending) => resolution(pending, result, now_ms),
                    None => Effect::Stray,
                }
            }
            _ => Effect::Stray,
        }
    }

    fn on_discovery_line(&mut self, line: &ParsedLine, now_ms: u64) -> Effect {
        let count = match line {
            ParsedLine::DiscoveryReport(n) => *n,
            ParsedLine::StatusReport {
                device_count: Some(n),
                ..
            } => *n,
            _ => return Effect::Stray,
        };
        self.registry.record_discovery(count);
        self.state = SystemState::Ready;
        self.discovery_deadline = None;

        match self.reinit.take() {
            Some(request) => resolution(
                request,
                Ok(CommandOutcome::Discovered {
                    device_count: count,
                }),
                now_ms,
            ),
            None => Effect::Discovered(count),
        }
    }

    /// Fire any expired deadline.
    ///
    /// A command timeout leaves the machine in `TimeoutRecovery`; call
    /// [`recover`](Self::recover) after reporting it.
    pub fn poll(&mut self, now_ms: u64) -> Option<Effect> {
        let deadline = self.next_deadline()?;
        if now_ms < deadline {
            return None;
        }
        match self.state {
            SystemState::Processing => {
                let pending = self.pending.clone()?;
                self.state = SystemState::TimeoutRecovery;
                Some(resolution(pending, Err(EngineError::TimedOut), now_ms))
            }
            SystemState::Initializing => {
                self.registry.reset();
                self.state = SystemState::Fault;
                self.discovery_deadline = None;
                self.fault = Some(FaultReason::DiscoveryTimeout);
                Some(match self.reinit.take() {
                    Some(request) => {
                        resolution(request, Err(EngineError::DiscoveryTimeout), now_ms)
                    }
                    None => Effect::DiscoveryFailed,
                })
            }
            _ => None,
        }
    }
}

fn resolution(
    pending: PendingCommand,
    result: Result<CommandOutcome, EngineError>,
    now_ms: u64,
) -> Effect {
    Effect::Resolved(Resolution {
        elapsed_ms: now_ms.saturating_sub(pending.sent_ms),
        pending,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::commands::DeviceAddress;
    use crate::config::Config;

    fn ready_machine(devices: u16) -> (ProtocolStateMachine, Codec) {
        let config = Config::default();
        let mut m = ProtocolStateMachine::new(config.protocol.clone());
        assert!(m.connect(0));
        let effect = m.on_line(&ParsedLine::DiscoveryReport(devices), 10);
        assert_eq!(effect, Effect::Discovered(devices));
        (m, Codec::from_config(&config))
    }

    fn resolved(effect: Effect) -> Resolution {
        match effect {
            Effect::Resolved(r) => r,
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    /// A command is pending exactly while processing or recovering.
    fn assert_pending_matches_state(m: &ProtocolStateMachine) {
        let in_flight = matches!(
            m.state(),
            SystemState::Processing | SystemState::TimeoutRecovery
        );
        assert_eq!(
            m.pending().is_some(),
            in_flight,
            "pending {:?} in state {:?}",
            m.pending(),
            m.state()
        );
    }

    #[test]
    fn starts_disconnected_and_refuses_commands() {
        let config = Config::default();
        let mut m = ProtocolStateMachine::new(config.protocol.clone());
        let codec = Codec::from_config(&config);
        assert_eq!(m.state(), SystemState::Disconnected);
        assert_eq!(
            m.admit(&Command::servo_all(90), &codec, 0),
            Err(EngineError::NotReady(SystemState::Disconnected))
        );
    }

    #[test]
    fn discovery_moves_to_ready_and_records_count() {
        let (m, _) = ready_machine(3);
        assert_eq!(m.state(), SystemState::Ready);
        assert_eq!(m.device_count(), 3);
        assert_eq!(m.registry().discoveries(), 1);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn status_report_with_count_completes_discovery() {
        let mut m = ProtocolStateMachine::new(ProtocolConfig::default());
        m.connect(0);
        let effect = m.on_line(&decode("Total devices: 2, Current State: READY"), 5);
        assert_eq!(effect, Effect::Discovered(2));
        assert_eq!(m.state(), SystemState::Ready);
    }

    #[test]
    fn initializing_ignores_lines_without_a_count() {
        let mut m = ProtocolStateMachine::new(ProtocolConfig::default());
        m.connect(0);
        assert_eq!(m.on_line(&ParsedLine::Ack, 5), Effect::Stray);
        assert_eq!(m.on_line(&decode("Current State: BOOT"), 6), Effect::Stray);
        assert_eq!(m.state(), SystemState::Initializing);
    }

    #[test]
    fn discovery_timeout_faults_session() {
        let mut m = ProtocolStateMachine::new(ProtocolConfig::default());
        m.connect(1_000);
        assert_eq!(m.next_deadline(), Some(11_000));
        assert_eq!(m.poll(10_999), None);
        assert_eq!(m.poll(11_000), Some(Effect::DiscoveryFailed));
        assert_eq!(m.state(), SystemState::Fault);
        assert_eq!(m.fault_reason(), Some(&FaultReason::DiscoveryTimeout));
    }

    #[test]
    fn admitted_command_is_resolved_by_ack() {
        let (mut m, codec) = ready_machine(4);
        let sent = m
            .admit(&Command::servo(DeviceAddress::device(2), 90), &codec, 100)
            .unwrap();
        assert_eq!(sent.line.as_str(), "002,servo,767");
        assert_eq!(m.state(), SystemState::Processing);
        assert_eq!(m.next_deadline(), Some(2_600));

        let r = resolved(m.on_line(&ParsedLine::Ack, 180));
        assert_eq!(r.result, Ok(CommandOutcome::Acknowledged));
        assert_eq!(r.elapsed_ms, 80);
        assert_eq!(m.state(), SystemState::Ready);
        assert!(m.pending().is_none());
    }

    #[test]
    fn second_command_while_processing_is_busy() {
        let (mut m, codec) = ready_machine(4);
        m.admit(&Command::servo_all(90), &codec, 0).unwrap();
        assert_eq!(
            m.admit(&Command::dac_all(100), &codec, 1),
            Err(EngineError::Busy)
        );
    }

    #[test]
    fn invalid_command_changes_nothing() {
        let (mut m, codec) = ready_machine(3);
        let err = m
            .admit(&Command::servo(DeviceAddress::device(4), 90), &codec, 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTarget { .. }));
        assert_eq!(m.state(), SystemState::Ready);
        assert!(m.pending().is_none());
    }

    #[test]
    fn error_report_rejects_pending() {
        let (mut m, codec) = ready_machine(1);
        m.admit(&Command::dac_all(500), &codec, 0).unwrap();
        let r = resolved(m.on_line(&decode("ERROR: dac fault"), 10));
        assert_eq!(r.result, Err(EngineError::Rejected("dac fault".into())));
        assert_eq!(m.state(), SystemState::Ready);
    }

    #[test]
    fn status_report_resolves_without_touching_registry() {
        let (mut m, codec) = ready_machine(3);
        m.admit(&Command::status(DeviceAddress::BROADCAST), &codec, 0)
            .unwrap();
        let r = resolved(m.on_line(&decode("Total devices: 7, Current State: READY"), 10));
        assert_eq!(
            r.result,
            Ok(CommandOutcome::Status {
                device_count: Some(7),
                state: "READY".into()
            })
        );
        assert_eq!(m.device_count(), 3);
    }

    #[test]
    fn unrecognized_and_discovery_lines_never_resolve_pending() {
        let (mut m, codec) = ready_machine(3);
        m.admit(&Command::servo_all(90), &codec, 0).unwrap();
        assert_eq!(m.on_line(&decode("Round Robin Master Started"), 5), Effect::Stray);
        assert_eq!(m.on_line(&ParsedLine::DiscoveryReport(9), 6), Effect::Stray);
        assert_eq!(m.state(), SystemState::Processing);
        assert_eq!(m.device_count(), 3);
    }

    #[test]
    fn timeout_passes_through_recovery_to_ready() {
        let (mut m, codec) = ready_machine(3);
        m.admit(&Command::servo_all(90), &codec, 0).unwrap();
        assert_eq!(m.poll(2_499), None);

        let r = resolved(m.poll(2_500).unwrap());
        assert_eq!(r.result, Err(EngineError::TimedOut));
        assert_eq!(m.state(), SystemState::TimeoutRecovery);
        assert_pending_matches_state(&m);
        assert_eq!(m.next_deadline(), None);
        assert_eq!(m.poll(5_000), None, "a timeout fires once");
        assert_eq!(
            m.admit(&Command::servo_all(90), &codec, 2_500),
            Err(EngineError::Busy)
        );

        let released = m.recover().unwrap();
        assert_eq!(released.line.as_str(), "000,servo,767");
        assert_eq!(m.state(), SystemState::Ready);
        assert_pending_matches_state(&m);
        assert_eq!(m.recover(), None);

        // A late answer is no longer applicable.
        assert_eq!(m.on_line(&ParsedLine::Ack, 2_600), Effect::Stray);
    }

    #[test]
    fn reinit_clears_registry_and_resolves_on_discovery() {
        let (mut m, codec) = ready_machine(3);
        let sent = m.admit(&Command::reinit(), &codec, 50).unwrap();
        assert_eq!(sent.line.as_str(), "000,reinit");
        assert_eq!(m.state(), SystemState::Initializing);
        assert_eq!(m.device_count(), 0);
        assert_pending_matches_state(&m);
        assert!(m.awaiting_discovery().is_some());

        let r = resolved(m.on_line(&ParsedLine::DiscoveryReport(5), 400));
        assert_eq!(r.result, Ok(CommandOutcome::Discovered { device_count: 5 }));
        assert_eq!(r.elapsed_ms, 350);
        assert_eq!(m.state(), SystemState::Ready);
        assert_pending_matches_state(&m);
        assert!(m.awaiting_discovery().is_none());
        assert_eq!(m.device_count(), 5);
        assert_eq!(m.registry().discoveries(), 2);
    }

    #[test]
    fn reinit_without_report_times_out_into_fault() {
        let (mut m, codec) = ready_machine(3);
        m.admit(&Command::reinit(), &codec, 0).unwrap();
        let r = resolved(m.poll(10_000).unwrap());
        assert_eq!(r.result, Err(EngineError::DiscoveryTimeout));
        assert_eq!(m.state(), SystemState::Fault);
        assert_pending_matches_state(&m);
        assert!(m.awaiting_discovery().is_none());
    }

    #[test]
    fn disconnect_during_reinit_releases_request() {
        let (mut m, codec) = ready_machine(3);
        m.admit(&Command::reinit(), &codec, 0).unwrap();
        let released = m.disconnect().unwrap();
        assert_eq!(released.command.kind, CommandKind::Reinit);
        assert_eq!(m.state(), SystemState::Disconnected);
        assert!(m.awaiting_discovery().is_none());
        assert_pending_matches_state(&m);
    }

    #[test]
    fn pending_tracks_state_through_a_full_cycle() {
        let (mut m, codec) = ready_machine(2);
        assert_pending_matches_state(&m);

        m.admit(&Command::servo_all(90), &codec, 0).unwrap();
        assert_pending_matches_state(&m);
        m.on_line(&ParsedLine::Ack, 5);
        assert_pending_matches_state(&m);

        m.admit(&Command::dac_all(700), &codec, 10).unwrap();
        m.poll(2_510).unwrap();
        assert_pending_matches_state(&m);
        m.recover();
        assert_pending_matches_state(&m);

        m.admit(&Command::servo_all(60), &codec, 3_000).unwrap();
        m.fault(FaultReason::Transport("gone".into()));
        assert_pending_matches_state(&m);
    }

    #[test]
    fn transport_fault_takes_pending_and_requires_reconnect() {
        let (mut m, codec) = ready_machine(3);
        m.admit(&Command::servo_all(90), &codec, 0).unwrap();
        let pending = m.fault(FaultReason::Transport("port closed".into()));
        assert!(pending.is_some());
        assert_eq!(m.state(), SystemState::Fault);
        assert_pending_matches_state(&m);
        assert_eq!(m.device_count(), 0);
        assert_eq!(m.next_deadline(), None);

        assert!(!m.connect(10));
        assert_eq!(m.disconnect(), None);
        assert!(m.connect(10));
        assert_eq!(m.state(), SystemState::Initializing);
        assert_eq!(m.fault_reason(), None);
    }
}
