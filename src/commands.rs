//! Command types, device addressing and the engine's error taxonomy.
//!
//! A [`Command`] is what the user (or a demo) wants the chain to do: a
//! [`CommandKind`], a [`DeviceAddress`] and, for `Servo`/`Dac`, a value in
//! the human unit (degrees or milliamps). The codec turns it into a wire
//! line; the dispatcher turns the peer's answer into a [`CommandOutcome`]
//! or an [`EngineError`].
//!
//! # Addressing
//!
//! Address `0` is broadcast and always valid. Addresses `1..=N` name one
//! discovered device, where `N` is the chain length reported by discovery.
//!
//! ```rust
//! use led_chain::{Command, DeviceAddress};
//!
//! let all = Command::servo_all(90);
//! assert!(all.target.is_broadcast());
//!
//! let one = Command::dac(DeviceAddress::device(2), 1050);
//! assert_eq!(one.target.to_string(), "002");
//! ```

use core::fmt;

use crate::protocol::SystemState;

// ============================================================================
// Command Kind
// ============================================================================

/// The command vocabulary understood by the firmware.
///
/// GPIO is reserved by the firmware but has no command here until the
/// firmware grows one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CommandKind {
    /// Move the servo to an angle (degrees).
    Servo,
    /// Drive the DAC/LED current (milliamps).
    Dac,
    /// Ask for a status report.
    Status,
    /// Re-run chain discovery.
    Reinit,
    /// Ask the firmware for its help text.
    Help,
}

impl CommandKind {
    /// Every kind, in wire-token order.
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Servo,
        CommandKind::Dac,
        CommandKind::Status,
        CommandKind::Reinit,
        CommandKind::Help,
    ];

    /// The lowercase token used on the wire.
    ///
    /// ```
    /// use led_chain::CommandKind;
    ///
    /// assert_eq!(CommandKind::Servo.as_str(), "servo");
    /// assert_eq!(CommandKind::Reinit.as_str(), "reinit");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Servo => "servo",
            CommandKind::Dac => "dac",
            CommandKind::Status => "status",
            CommandKind::Reinit => "reinit",
            CommandKind::Help => "help",
        }
    }

    /// Parse a command name from text input (trimmed, case-insensitive).
    ///
    /// ```
    /// use led_chain::CommandKind;
    ///
    /// assert_eq!(CommandKind::from_text(" DAC "), Some(CommandKind::Dac));
    /// assert_eq!(CommandKind::from_text("gpio"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
    }

    /// Whether this kind carries a value field on the wire.
    #[inline]
    pub const fn takes_value(&self) -> bool {
        matches!(self, CommandKind::Servo | CommandKind::Dac)
    }

    /// Human unit suffix for values of this kind.
    pub const fn unit(&self) -> &'static str {
        match self {
            CommandKind::Servo => "°",
            CommandKind::Dac => " mA",
            _ => "",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Device Address
// ============================================================================

/// Largest address the 3-digit wire field can carry.
pub const MAX_WIRE_ADDRESS: u16 = 999;

/// Address of one device in the chain, or broadcast.
///
/// Displays as the zero-padded 3-digit wire id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceAddress(u16);

impl DeviceAddress {
    /// Broadcast to every currently-known device.
    pub const BROADCAST: DeviceAddress = DeviceAddress(0);

    /// Address a single device (1-based chain position).
    #[inline]
    pub const fn device(position: u16) -> Self {
        Self(position)
    }

    /// Raw address value (`0` = broadcast).
    #[inline]
    pub const fn get(&self) -> u16 {
        self.0
    }

    /// Returns true for the broadcast address.
    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        self.0 == 0
    }
}

impl From<u16> for DeviceAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

// ============================================================================
// Command
// ============================================================================

/// A command addressed to the chain.
///
/// `value` is in the human unit: degrees for [`CommandKind::Servo`],
/// milliamps for [`CommandKind::Dac`], and `None` for everything else.
/// The codec owns the mapping to the 10-bit wire value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Command {
    /// What to do.
    pub kind: CommandKind,
    /// Who should do it.
    pub target: DeviceAddress,
    /// Human-unit value (`Servo`/`Dac` only).
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<u16>,
}

impl Command {
    /// Create a command from its parts without validation.
    pub const fn new(kind: CommandKind, target: DeviceAddress, value: Option<u16>) -> Self {
        Self {
            kind,
            target,
            value,
        }
    }

    /// Servo angle for a single device.
    pub const fn servo(target: DeviceAddress, degrees: u16) -> Self {
        Self::new(CommandKind::Servo, target, Some(degrees))
    }

    /// Servo angle for every device.
    pub const fn servo_all(degrees: u16) -> Self {
        Self::servo(DeviceAddress::BROADCAST, degrees)
    }

    /// DAC current for a single device.
    pub const fn dac(target: DeviceAddress, milliamps: u16) -> Self {
        Self::new(CommandKind::Dac, target, Some(milliamps))
    }

    /// DAC current for every device.
    pub const fn dac_all(milliamps: u16) -> Self {
        Self::dac(DeviceAddress::BROADCAST, milliamps)
    }

    /// Status request.
    pub const fn status(target: DeviceAddress) -> Self {
        Self::new(CommandKind::Status, target, None)
    }

    /// Chain re-initialisation (always broadcast).
    pub const fn reinit() -> Self {
        Self::new(CommandKind::Reinit, DeviceAddress::BROADCAST, None)
    }

    /// Firmware help text request.
    pub const fn help() -> Self {
        Self::new(CommandKind::Help, DeviceAddress::BROADCAST, None)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> ", self.kind)?;
        if self.target.is_broadcast() {
            f.write_str("ALL")?;
        } else {
            write!(f, "device {}", self.target)?;
        }
        match self.value {
            Some(v) => write!(f, ": {}{}", v, self.kind.unit()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Successful resolution of a submitted command.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "outcome", rename_all = "snake_case"))]
pub enum CommandOutcome {
    /// The firmware acknowledged the command.
    Acknowledged,

    /// The firmware answered with a status report.
    Status {
        /// Chain length reported alongside the state, if any.
        device_count: Option<u16>,
        /// Firmware state token (e.g. `READY`).
        state: String,
    },

    /// A re-initialisation completed discovery.
    Discovered {
        /// Newly discovered chain length.
        device_count: u16,
    },
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Acknowledged => f.write_str("acknowledged"),
            CommandOutcome::Status {
                device_count: Some(n),
                state,
            } => write!(f, "state {state}, {n} devices"),
            CommandOutcome::Status { state, .. } => write!(f, "state {state}"),
            CommandOutcome::Discovered { device_count } => {
                write!(f, "discovered {device_count} devices")
            }
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a command failed validation. Nothing is transmitted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    /// Value outside the configured safety window.
    #[error("{kind} value {value} outside {min}..={max}")]
    OutOfRange {
        /// Command kind the value was meant for.
        kind: CommandKind,
        /// Offending value (human unit).
        value: u16,
        /// Lower bound of the window.
        min: u16,
        /// Upper bound of the window.
        max: u16,
    },

    /// `Servo`/`Dac` submitted without a value.
    #[error("{0} requires a value")]
    MissingValue(CommandKind),

    /// A value was given to a command that takes none.
    #[error("{0} takes no value")]
    UnexpectedValue(CommandKind),

    /// Address does not fit the 3-digit wire field.
    #[error("address {0} does not fit the wire format")]
    AddressTooLarge(u16),
}

/// Every way a submission (or a session operation) can fail.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Validation failed; never transmitted.
    #[error("invalid command: {0}")]
    Invalid(#[from] InvalidReason),

    /// A command is already in flight.
    #[error("busy: another command is pending")]
    Busy,

    /// The chain cannot accept commands in its current state.
    #[error("not ready (state: {0})")]
    NotReady(SystemState),

    /// No response within the per-command timeout. The engine has recovered.
    #[error("command timed out")]
    TimedOut,

    /// Port-level failure; the session is faulted until reconnect.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Address beyond the discovered chain length.
    #[error("unknown target {address} (chain has {device_count} devices)")]
    UnknownTarget {
        /// Requested address.
        address: DeviceAddress,
        /// Chain length at submission time.
        device_count: u16,
    },

    /// Discovery did not report within the discovery window.
    #[error("no discovery report within the discovery timeout")]
    DiscoveryTimeout,

    /// The firmware answered the pending command with an error report.
    #[error("device reported error: {0}")]
    Rejected(String),

    /// The session worker has shut down.
    #[error("session disconnected")]
    Disconnected,
}

impl EngineError {
    /// Short machine-readable tag, used by the event log and the HTTP API.
    pub const fn tag(&self) -> &'static str {
        match self {
            EngineError::Invalid(_) => "invalid",
            EngineError::Busy => "busy",
            EngineError::NotReady(_) => "not_ready",
            EngineError::TimedOut => "timed_out",
            EngineError::TransportError(_) => "transport_error",
            EngineError::UnknownTarget { .. } => "unknown_target",
            EngineError::DiscoveryTimeout => "discovery_timeout",
            EngineError::Rejected(_) => "rejected",
            EngineError::Disconnected => "disconnected",
        }
    }

    /// Whether the session survives this error without a reconnect.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::TransportError(_)
                | EngineError::DiscoveryTimeout
                | EngineError::Disconnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tokens_round_trip_through_text() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_text(kind.as_str()), Some(kind));
        }
        assert_eq!(CommandKind::from_text("SERVO"), Some(CommandKind::Servo));
        assert_eq!(CommandKind::from_text(""), None);
    }

    #[test]
    fn only_servo_and_dac_take_values() {
        assert!(CommandKind::Servo.takes_value());
        assert!(CommandKind::Dac.takes_value());
        assert!(!CommandKind::Status.takes_value());
        assert!(!CommandKind::Reinit.takes_value());
        assert!(!CommandKind::Help.takes_value());
    }

    #[test]
    fn address_displays_zero_padded() {
        assert_eq!(DeviceAddress::BROADCAST.to_string(), "000");
        assert_eq!(DeviceAddress::device(7).to_string(), "007");
        assert_eq!(DeviceAddress::device(123).to_string(), "123");
    }

    #[test]
    fn command_display_is_human_readable() {
        assert_eq!(Command::servo_all(90).to_string(), "servo -> ALL: 90°");
        assert_eq!(
            Command::dac(DeviceAddress::device(2), 1050).to_string(),
            "dac -> device 002: 1050 mA"
        );
        assert_eq!(Command::reinit().to_string(), "reinit -> ALL");
    }

    #[test]
    fn outcome_display() {
        assert_eq!(CommandOutcome::Acknowledged.to_string(), "acknowledged");
        let status = CommandOutcome::Status {
            device_count: Some(3),
            state: "READY".into(),
        };
        assert_eq!(status.to_string(), "state READY, 3 devices");
        assert_eq!(
            CommandOutcome::Discovered { device_count: 2 }.to_string(),
            "discovered 2 devices"
        );
    }

    #[test]
    fn transport_and_discovery_errors_are_terminal() {
        assert!(EngineError::TimedOut.is_recoverable());
        assert!(EngineError::Busy.is_recoverable());
        assert!(!EngineError::TransportError("closed".into()).is_recoverable());
        assert!(!EngineError::DiscoveryTimeout.is_recoverable());
    }

    #[test]
    fn invalid_reason_converts_into_engine_error() {
        let err: EngineError = InvalidReason::MissingValue(CommandKind::Servo).into();
        assert_eq!(err.tag(), "invalid");
        assert_eq!(err.to_string(), "invalid command: servo requires a value");
    }
}
