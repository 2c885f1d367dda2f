use async_trait::async_trait;
use serde::Serialize;
use strum_macros::Display;

/// MAVLink command id of `MAV_CMD_PREFLIGHT_CALIBRATION`.
pub const CMD_PREFLIGHT_CALIBRATION: u16 = 241;
/// MAVLink command id of `MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN`.
pub const CMD_PREFLIGHT_REBOOT: u16 = 246;
/// MAVLink command id of `MAV_CMD_ACCELCAL_VEHICLE_POS`.
pub const CMD_ACCELCAL_VEHICLE_POS: u16 = 42429;

/// Send side of the telemetry transport.
///
/// Implementations encode and transmit the corresponding protocol message. A returned
/// `Ok` only means the message left the local side; delivery is never guaranteed.
#[async_trait]
pub trait FlightLink: Send + Sync {
    async fn send_request_all_parameters(&self) -> Result<(), LinkError>;
    async fn send_request_parameter_by_index(&self, index: u16) -> Result<(), LinkError>;
    async fn send_set_parameter(&self, name: &str, value: f32) -> Result<(), LinkError>;
    async fn send_calibration_start(&self, flags: CalibrationFlags) -> Result<(), LinkError>;
    /// Sends a calibration command with all flags zeroed, which cancels any running calibration.
    async fn send_calibration_cancel(&self) -> Result<(), LinkError>;
    /// Confirms the accelerometer position with its 1-based index.
    async fn send_position_confirm(&self, position: u8) -> Result<(), LinkError>;
    async fn send_reboot_command(&self) -> Result<(), LinkError>;
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum LinkError {
    Disconnected,
    SendFailed(String),
}

impl std::error::Error for LinkError {}

/// Parameters 1 to 7 of the preflight calibration command.
///
/// The numeric meaning of every slot belongs to the autopilot firmware; a value of zero
/// leaves the corresponding sensor alone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CalibrationFlags {
    pub gyro: u8,
    pub magnetometer: u8,
    pub ground_pressure: u8,
    pub radio: u8,
    pub accelerometer: u8,
    pub compass_motor: u8,
    pub esc: u8,
}

impl CalibrationFlags {
    /// All-zero flags, the universal cancel.
    pub const CANCEL: CalibrationFlags = CalibrationFlags {
        gyro: 0,
        magnetometer: 0,
        ground_pressure: 0,
        radio: 0,
        accelerometer: 0,
        compass_motor: 0,
        esc: 0,
    };

    pub fn is_cancel(&self) -> bool { *self == Self::CANCEL }
}

/// `MAV_SEVERITY` of a status text.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

/// `MAV_RESULT` of a command acknowledgement.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AckResult {
    Accepted,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
    InProgress,
    Cancelled,
}

impl AckResult {
    /// Whether the firmware refused or aborted the command.
    pub fn is_rejection(self) -> bool { !matches!(self, AckResult::Accepted | AckResult::InProgress) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandAck {
    pub command: u16,
    pub result: AckResult,
}

/// A decoded message delivered by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ParamValue { name: String, value: f32, index: u16, total: u16 },
    Heartbeat,
    ConnectionState(bool),
    StatusText { severity: Severity, text: String },
    CommandAck(CommandAck),
}
