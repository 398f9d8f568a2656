//! Engine configuration.
//!
//! The core has no hidden defaults: everything it needs (baud rate,
//! timeouts, safety windows) arrives through [`Config`]. `Default` gives
//! the values the firmware ships with.
//!
//! # Example
//!
//! ```rust
//! use led_chain::config::{Config, ProtocolConfig, SerialConfig, UnitRange};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.serial.baud_rate, 115_200);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_serial(SerialConfig::default().with_port("/dev/ttyACM0"))
//!     .with_protocol(ProtocolConfig::default().with_discovery_timeout_ms(5_000))
//!     .with_servo(UnitRange::new(45, 135));
//! assert!(config.validate().is_ok());
//! ```

use heapless::String as HString;

/// Maximum length for short config strings (port names)
pub const MAX_SHORT_STRING: usize = 64;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Create a ShortString from a &str, truncating on a char boundary if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let valid_end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= MAX_SHORT_STRING)
        .last()
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete engine configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Serial link settings
    pub serial: SerialConfig,
    /// Request/response timing
    pub protocol: ProtocolConfig,
    /// Servo safety window in degrees
    pub servo: UnitRange,
    /// DAC current window in milliamps
    pub dac: UnitRange,
    /// HTTP shell settings
    pub web: WebConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            protocol: ProtocolConfig::default(),
            servo: UnitRange::SERVO_DEFAULT,
            dac: UnitRange::DAC_DEFAULT,
            web: WebConfig::default(),
        }
    }
}

impl Config {
    /// Set serial configuration
    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    /// Set protocol timing
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the servo safety window
    pub fn with_servo(mut self, servo: UnitRange) -> Self {
        self.servo = servo;
        self
    }

    /// Set the DAC current window
    pub fn with_dac(mut self, dac: UnitRange) -> Self {
        self.dac = dac;
        self
    }

    /// Set web configuration
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.servo.check("servo")?;
        self.dac.check("dac")?;
        if self.protocol.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("command_timeout_ms"));
        }
        if self.protocol.discovery_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("discovery_timeout_ms"));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        Ok(())
    }
}

/// Rejected configuration values.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `min` above `max`.
    #[error("{0} range is inverted")]
    InvertedRange(&'static str),
    /// Full scale of zero cannot be mapped onto the wire.
    #[error("{0} range has a zero full scale")]
    ZeroFullScale(&'static str),
    /// A timeout of zero would fail every command.
    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
    /// Baud rate of zero.
    #[error("baud rate must be non-zero")]
    ZeroBaudRate,
}

// ============================================================================
// Serial Config
// ============================================================================

/// Serial link configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port path (e.g., "/dev/ttyACM0", "COM3")
    pub port: ShortString,
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: ShortString::new(),
            baud_rate: 115_200,
        }
    }
}

impl SerialConfig {
    /// Set the port path
    pub fn with_port(mut self, port: &str) -> Self {
        self.port = short_string(port);
        self
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }
}

// ============================================================================
// Protocol Config
// ============================================================================

/// Request/response timing
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolConfig {
    /// Per-command timeout in milliseconds
    pub command_timeout_ms: u64,
    /// Discovery window after connect/reinit in milliseconds
    pub discovery_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 2_500,
            discovery_timeout_ms: 10_000,
        }
    }
}

impl ProtocolConfig {
    /// Set the per-command timeout
    pub fn with_command_timeout_ms(mut self, ms: u64) -> Self {
        self.command_timeout_ms = ms;
        self
    }

    /// Set the discovery timeout
    pub fn with_discovery_timeout_ms(mut self, ms: u64) -> Self {
        self.discovery_timeout_ms = ms;
        self
    }
}

// ============================================================================
// Unit Range
// ============================================================================

/// Inclusive window of accepted human-unit values.
///
/// `max` doubles as the full scale that maps to raw `1023`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitRange {
    /// Lowest accepted value
    pub min: u16,
    /// Highest accepted value (full scale)
    pub max: u16,
}

impl UnitRange {
    /// Default servo window: 60°..=120°.
    pub const SERVO_DEFAULT: UnitRange = UnitRange { min: 60, max: 120 };

    /// Default DAC window: 0..=2100 mA.
    pub const DAC_DEFAULT: UnitRange = UnitRange { min: 0, max: 2100 };

    /// Create a window
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the window
    #[inline]
    pub const fn contains(&self, value: u16) -> bool {
        value >= self.min && value <= self.max
    }

    /// Value that maps to raw `1023`
    #[inline]
    pub const fn full_scale(&self) -> u16 {
        self.max
    }

    fn check(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.min > self.max {
            Err(ConfigError::InvertedRange(name))
        } else if self.max == 0 {
            Err(ConfigError::ZeroFullScale(name))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Web Config
// ============================================================================

/// HTTP shell configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WebConfig {
    /// Port to listen on
    pub port: u16,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_permissive: true,
        }
    }
}

impl WebConfig {
    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set CORS mode
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }
}
