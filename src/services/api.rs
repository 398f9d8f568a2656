//! API request and response types for the HTTP shell.

use serde::{Deserialize, Serialize};

use crate::codec::UnitScale;
use crate::commands::{Command, CommandKind, CommandOutcome, DeviceAddress};
use crate::config::Config;
use crate::events::LogEvent;
use crate::protocol::{ChainStatus, SystemState};

// ============================================================================
// Response Types
// ============================================================================

/// API response wrapper for consistent JSON structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (present when success=true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present when success=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error tag (e.g. `busy`, `unknown_target`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    /// Create an error response
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: None,
        }
    }

    /// Attach an error tag
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Session state response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResponse {
    /// Lifecycle state
    pub state: SystemState,
    /// Known chain length
    pub device_count: u16,
    /// Fault description while faulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Whether a demo is running
    pub demo_running: bool,
}

impl StateResponse {
    /// Build from a snapshot plus demo status
    pub fn new(status: &ChainStatus, demo_running: bool) -> Self {
        Self {
            state: status.state,
            device_count: status.device_count,
            fault: status.fault.as_ref().map(ToString::to_string),
            demo_running,
        }
    }
}

/// Command result response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Human-readable command description
    pub command: String,
    /// How the firmware answered
    pub outcome: CommandOutcome,
}

/// Demo start response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoResponse {
    /// Run id
    pub run: u64,
    /// Pattern name
    pub pattern: String,
}

/// Demo cancel response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Whether a run was active
    pub cancelled: bool,
}

/// Re-initialisation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinitResponse {
    /// Newly discovered chain length
    pub device_count: u16,
}

/// Event log response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogResponse {
    /// Events, oldest first
    pub events: Vec<LogEvent>,
}

// ============================================================================
// Request Types
// ============================================================================

/// POST /api/command body
///
/// `target` defaults to broadcast. DAC commands may give `percent` (0-100)
/// instead of `value`; it is mapped onto the configured current range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name (`servo`, `dac`, `status`, `reinit`, `help`)
    pub kind: String,
    /// Device address (0 = all)
    #[serde(default)]
    pub target: u16,
    /// Value in degrees or milliamps
    #[serde(default)]
    pub value: Option<u16>,
    /// DAC value as a percentage of full scale
    #[serde(default)]
    pub percent: Option<u8>,
}

impl CommandRequest {
    /// Resolve into a [`Command`]. `None` for an unknown kind.
    pub fn to_command(&self, config: &Config) -> Option<Command> {
        let kind = CommandKind::from_text(&self.kind)?;
        let value = match (kind, self.value, self.percent) {
            (_, Some(value), _) => Some(value),
            (CommandKind::Dac, None, Some(percent)) => {
                Some(UnitScale::new(config.dac.full_scale()).percent_to_value(percent))
            }
            _ => None,
        };
        Some(Command::new(kind, DeviceAddress::device(self.target), value))
    }
}

/// POST /api/demo/start body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoRequest {
    /// Builtin pattern id (1-3)
    pub pattern: u8,
}

/// GET /api/log query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    /// Maximum number of events (default 100)
    #[serde(default)]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_ok_omits_error_fields() {
        let json = serde_json::to_string(&ApiResponse::ok(ReinitResponse { device_count: 3 }))
            .unwrap();
        assert_eq!(json, r#"{"success":true,"data":{"device_count":3}}"#);
    }

    #[test]
    fn api_response_err_carries_code() {
        let response = ApiResponse::<()>::err("busy: another command is pending").with_code("busy");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""success":false"#));
        assert!(json.contains(r#""code":"busy""#));
    }

    #[test]
    fn command_request_defaults_to_broadcast() {
        let req: CommandRequest = serde_json::from_str(r#"{"kind": "servo", "value": 90}"#).unwrap();
        let cmd = req.to_command(&Config::default()).unwrap();
        assert_eq!(cmd, Command::servo_all(90));
    }

    #[test]
    fn command_request_maps_dac_percent() {
        let req: CommandRequest =
            serde_json::from_str(r#"{"kind": "dac", "target": 2, "percent": 50}"#).unwrap();
        let cmd = req.to_command(&Config::default()).unwrap();
        assert_eq!(cmd, Command::dac(DeviceAddress::device(2), 1050));
    }

    #[test]
    fn command_request_unknown_kind() {
        let req: CommandRequest = serde_json::from_str(r#"{"kind": "gpio"}"#).unwrap();
        assert!(req.to_command(&Config::default()).is_none());
    }

    #[test]
    fn state_response_describes_fault() {
        let status = ChainStatus {
            state: SystemState::Fault,
            device_count: 0,
            fault: Some(crate::protocol::FaultReason::DiscoveryTimeout),
        };
        let response = StateResponse::new(&status, false);
        assert_eq!(response.fault.as_deref(), Some("discovery timeout"));
    }
}
