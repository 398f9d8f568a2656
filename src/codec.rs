//! Wire codec: command encoding, inbound line classification and unit mapping.
//!
//! # Wire Format
//!
//! Outbound lines are `DDD,cmd[,value]`:
//!
//! ```text
//! 002,servo,767     servo on device 2, raw 767
//! 000,dac,512       DAC on every device, raw 512
//! 000,status        status request, no value field
//! ```
//!
//! `DDD` is the zero-padded device id (`000` = broadcast) and `value` is the
//! raw 10-bit integer `0..=1023`. The newline is added by the port.
//!
//! # Unit Mapping
//!
//! `raw = round(value * 1023 / full_scale)`, rounding halves up, where the
//! full scale is the configured window maximum. [`UnitScale::from_raw`] is the
//! inverse for display. The mapping is lossy when the full scale exceeds 1023,
//! but re-encoding a decoded value always gives back the same raw value.
//!
//! ```rust
//! use led_chain::codec::UnitScale;
//!
//! let servo = UnitScale::new(120);
//! assert_eq!(servo.to_raw(90), 767);
//!
//! let dac = UnitScale::new(2100);
//! assert_eq!(dac.to_raw(1050), 512);
//! ```
//!
//! # Inbound Lines
//!
//! [`decode`] classifies what the firmware prints. The grammar is pinned to
//! what the firmware emits:
//!
//! | Line | Result |
//! |------|--------|
//! | `ERROR: bad device` / `ERR ...` | [`ParsedLine::ErrorReport`] |
//! | `ACK` / `OK ...` | [`ParsedLine::Ack`] |
//! | `... Current State: READY` (+ optional `Total devices: N`) | [`ParsedLine::StatusReport`] |
//! | `Initialization complete. Total devices: 3` | [`ParsedLine::DiscoveryReport`] |
//! | `WARNING: Command timeout ...` | [`ParsedLine::ErrorReport`] |
//! | anything else | [`ParsedLine::Unrecognized`] |

use core::fmt::Write as _;

use crate::commands::{
    Command, CommandKind, DeviceAddress, EngineError, InvalidReason, MAX_WIRE_ADDRESS,
};
use crate::config::{Config, UnitRange};
use crate::events::Classification;

/// Largest raw value the 10-bit DAC/servo field carries.
pub const RAW_MAX: u16 = 1023;

/// Capacity of an encoded wire line (without the newline).
pub const WIRE_LINE_MAX: usize = 32;

/// An encoded outbound line.
pub type WireLine = heapless::String<WIRE_LINE_MAX>;

// ============================================================================
// Unit Scale
// ============================================================================

/// Linear mapping between a human unit and the raw 10-bit wire value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitScale {
    full_scale: u16,
}

impl UnitScale {
    /// Scale whose `full_scale` maps to [`RAW_MAX`]. A zero full scale is
    /// treated as one.
    pub const fn new(full_scale: u16) -> Self {
        Self {
            full_scale: if full_scale == 0 { 1 } else { full_scale },
        }
    }

    /// Value that maps to [`RAW_MAX`].
    pub const fn full_scale(&self) -> u16 {
        self.full_scale
    }

    /// Human value to raw, rounding halves up. Saturates at [`RAW_MAX`].
    pub fn to_raw(&self, value: u16) -> u16 {
        let fs = u32::from(self.full_scale);
        let raw = (u32::from(value) * u32::from(RAW_MAX) + fs / 2) / fs;
        raw.min(u32::from(RAW_MAX)) as u16
    }

    /// Raw to human value, rounding halves up.
    pub fn from_raw(&self, raw: u16) -> u16 {
        let raw = u32::from(raw.min(RAW_MAX));
        let max = u32::from(RAW_MAX);
        ((raw * u32::from(self.full_scale) + max / 2) / max) as u16
    }

    /// Percentage of full scale (0..=100, clamped) as a human value.
    pub fn percent_to_value(&self, percent: u8) -> u16 {
        let percent = u32::from(percent.min(100));
        ((percent * u32::from(self.full_scale) + 50) / 100) as u16
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// A validated command ready for transmission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedCommand {
    /// The command as submitted.
    pub command: Command,
    /// Raw wire value, for `Servo`/`Dac`.
    pub raw: Option<u16>,
    /// The line to write.
    pub line: WireLine,
}

impl EncodedCommand {
    /// Human-readable description, e.g. `servo -> device 002: 90° (raw 767)`.
    pub fn describe(&self) -> String {
        describe_command(&self.command, self.raw)
    }
}

/// Validating encoder bound to the configured safety windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    servo: UnitRange,
    dac: UnitRange,
}

impl Codec {
    /// Codec for the given servo (degrees) and DAC (mA) windows.
    pub const fn new(servo: UnitRange, dac: UnitRange) -> Self {
        Self { servo, dac }
    }

    /// Codec using the windows from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.servo, config.dac)
    }

    /// Accepted window for a value-carrying kind.
    pub fn range(&self, kind: CommandKind) -> Option<UnitRange> {
        match kind {
            CommandKind::Servo => Some(self.servo),
            CommandKind::Dac => Some(self.dac),
            _ => None,
        }
    }

    /// Unit scale for a value-carrying kind.
    pub fn scale(&self, kind: CommandKind) -> Option<UnitScale> {
        self.range(kind).map(|r| UnitScale::new(r.full_scale()))
    }

    /// Validate `cmd` against the windows and the current chain length.
    ///
    /// Returns the raw wire value for `Servo`/`Dac`, `None` otherwise.
    pub fn validate(&self, cmd: &Command, device_count: u16) -> Result<Option<u16>, EngineError> {
        let address = cmd.target.get();
        if !cmd.target.is_broadcast() && address > device_count {
            return Err(EngineError::UnknownTarget {
                address: cmd.target,
                device_count,
            });
        }
        if address > MAX_WIRE_ADDRESS {
            return Err(InvalidReason::AddressTooLarge(address).into());
        }

        match (self.range(cmd.kind), cmd.value) {
            (Some(range), Some(value)) => {
                if !range.contains(value) {
                    return Err(InvalidReason::OutOfRange {
                        kind: cmd.kind,
                        value,
                        min: range.min,
                        max: range.max,
                    }
                    .into());
                }
                Ok(Some(UnitScale::new(range.full_scale()).to_raw(value)))
            }
            (Some(_), None) => Err(InvalidReason::MissingValue(cmd.kind).into()),
            (None, Some(_)) => Err(InvalidReason::UnexpectedValue(cmd.kind).into()),
            (None, None) => Ok(None),
        }
    }

    /// Validate and encode `cmd` into its wire line.
    pub fn encode(&self, cmd: &Command, device_count: u16) -> Result<EncodedCommand, EngineError> {
        let raw = self.validate(cmd, device_count)?;
        let line = wire_line(cmd.target, cmd.kind, raw);
        Ok(EncodedCommand {
            command: *cmd,
            raw,
            line,
        })
    }

    /// Human value for a raw value echoed by the firmware.
    pub fn decode_raw(&self, kind: CommandKind, raw: u16) -> Option<u16> {
        self.scale(kind).map(|s| s.from_raw(raw))
    }
}

/// Human-readable description of a command and its raw wire value.
pub fn describe_command(cmd: &Command, raw: Option<u16>) -> String {
    match raw {
        Some(raw) => format!("{} (raw {})", cmd, raw),
        None => cmd.to_string(),
    }
}

/// Format a wire line without validation.
pub fn wire_line(target: DeviceAddress, kind: CommandKind, raw: Option<u16>) -> WireLine {
    let mut line = WireLine::new();
    // Longest line is "999,reinit" or "999,servo,1023"; both fit.
    let _ = match raw {
        Some(raw) => write!(line, "{},{},{}", target, kind, raw),
        None => write!(line, "{},{}", target, kind),
    };
    line
}

/// An outbound line parsed back into its fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireCommand {
    /// Device id field.
    pub target: DeviceAddress,
    /// Command token.
    pub kind: CommandKind,
    /// Raw value field, if present.
    pub raw: Option<u16>,
}

/// Parse an outbound `DDD,cmd[,value]` line (as echoed or as seen by a peer).
///
/// ```
/// use led_chain::codec::parse_wire_line;
/// use led_chain::{CommandKind, DeviceAddress};
///
/// let wire = parse_wire_line("002,servo,767").unwrap();
/// assert_eq!(wire.target, DeviceAddress::device(2));
/// assert_eq!(wire.kind, CommandKind::Servo);
/// assert_eq!(wire.raw, Some(767));
///
/// assert!(parse_wire_line("2,servo,767").is_none());
/// ```
pub fn parse_wire_line(line: &str) -> Option<WireCommand> {
    let mut fields = line.trim().split(',');
    let id = fields.next()?;
    if id.len() != 3 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let target = DeviceAddress::device(id.parse().ok()?);
    let token = fields.next()?;
    let kind = CommandKind::ALL.into_iter().find(|k| k.as_str() == token)?;
    let raw = match fields.next() {
        None | Some("") => None,
        Some(v) => {
            let raw: u16 = v.parse().ok()?;
            if raw > RAW_MAX {
                return None;
            }
            Some(raw)
        }
    };
    if fields.next().is_some() || kind.takes_value() != raw.is_some() {
        return None;
    }
    Some(WireCommand { target, kind, raw })
}

// ============================================================================
// Decoder
// ============================================================================

/// Classification of one inbound line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedLine {
    /// Command acknowledged.
    Ack,
    /// Firmware reported an error (free text reason).
    ErrorReport(String),
    /// Status report.
    StatusReport {
        /// Chain length, when the report carries one.
        device_count: Option<u16>,
        /// Firmware state token.
        state: String,
    },
    /// Discovery finished with this many devices.
    DiscoveryReport(u16),
    /// Anything else; logged and ignored.
    Unrecognized(String),
}

impl ParsedLine {
    /// Event-log classification of this line.
    pub fn classification(&self) -> Classification {
        match self {
            ParsedLine::Ack => Classification::Ack,
            ParsedLine::ErrorReport(_) => Classification::ErrorReport,
            ParsedLine::StatusReport { .. } => Classification::StatusReport,
            ParsedLine::DiscoveryReport(_) => Classification::DiscoveryReport,
            ParsedLine::Unrecognized(_) => Classification::Unrecognized,
        }
    }

    /// Whether this line can resolve a pending command.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            ParsedLine::Ack | ParsedLine::ErrorReport(_) | ParsedLine::StatusReport { .. }
        )
    }
}

const COUNT_KEYS: [&str; 2] = ["Total devices:", "Total Devices:"];
const STATE_KEY: &str = "Current State:";
const TIMEOUT_WARNING: &str = "WARNING: Command timeout";

/// Classify an inbound line. Never fails: malformed lines are
/// [`ParsedLine::Unrecognized`].
pub fn decode(line: &str) -> ParsedLine {
    let text = line.trim();
    if text.is_empty() {
        return ParsedLine::Unrecognized(String::new());
    }

    for prefix in ["ERROR", "ERR"] {
        if let Some(rest) = strip_token(text, prefix) {
            return ParsedLine::ErrorReport(reason(rest, text));
        }
    }
    if strip_token(text, "ACK").is_some() || strip_token(text, "OK").is_some() {
        return ParsedLine::Ack;
    }

    let count = field_after(text, &COUNT_KEYS).map(|v| v.parse::<u16>().ok());
    let state = field_after(text, &[STATE_KEY]).map(|v| (!v.is_empty()).then_some(v));

    // A key present without a usable token is a cut-off or garbled line.
    match (state, count) {
        (Some(None), _) | (_, Some(None)) => ParsedLine::Unrecognized(text.into()),
        (Some(Some(state)), Some(Some(n))) => ParsedLine::StatusReport {
            device_count: Some(n),
            state: state.into(),
        },
        (Some(Some(state)), None) => ParsedLine::StatusReport {
            device_count: None,
            state: state.into(),
        },
        (None, Some(Some(n))) => ParsedLine::DiscoveryReport(n),
        (None, None) if text.contains(TIMEOUT_WARNING) => ParsedLine::ErrorReport(text.into()),
        (None, None) => ParsedLine::Unrecognized(text.into()),
    }
}

/// Case-insensitive prefix match that ends on a token boundary.
fn strip_token<'a>(text: &'a str, token: &str) -> Option<&'a str> {
    let head = text.get(..token.len())?;
    if !head.eq_ignore_ascii_case(token) {
        return None;
    }
    let rest = &text[token.len()..];
    match rest.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => None,
        _ => Some(rest),
    }
}

fn reason(rest: &str, whole: &str) -> String {
    let rest = rest.trim_start_matches([':', '-', ' ']).trim();
    if rest.is_empty() {
        whole.into()
    } else {
        rest.into()
    }
}

/// The word following the first matching key, or `Some("")` when the key is
/// present but nothing usable follows it.
fn field_after<'a>(text: &'a str, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        let start = text.find(key)? + key.len();
        let rest = text[start..].trim_start();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        Some(&rest[..end])
    })
}
