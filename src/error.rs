use crate::calibration::CategoryId;
use crate::link::LinkError;
use std::fmt;

/// Errors surfaced by the calibration and synchronization core.
///
/// Connectivity and write problems of the parameter store are reported as boolean
/// results instead; abort conditions travel as [`AbortEvent`](crate::calibration::AbortEvent)s
/// and are mapped onto this taxonomy through
/// [`AbortReason::as_error`](crate::calibration::AbortReason::as_error).
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// The telemetry link reports no connection.
    NotConnected,
    /// The category is not part of this session (or the name does not parse).
    UnknownCategory(String),
    /// Another category is still in progress.
    SessionBusy(CategoryId),
    /// The category is not in progress.
    NotActive(CategoryId),
    /// Retry rounds were exhausted before all parameters arrived.
    SyncTimeout { received: usize, expected: usize },
    /// The vehicle was not moved into the requested position in time.
    StepComplianceTimeout,
    /// The whole calibration exceeded its time budget.
    SessionTimeout,
    /// Heartbeats or the connection were lost.
    LinkLost,
    InvalidPosition(u8),
    MagnitudeOutOfRange(f32),
    AxisMisaligned,
    /// Post-calibration verification failed. Never blocks a commit.
    VerificationFailed(String),
    Cancelled,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "vehicle not connected"),
            Self::UnknownCategory(name) => write!(f, "unknown calibration category '{name}'"),
            Self::SessionBusy(active) => write!(f, "calibration of {active} still in progress"),
            Self::NotActive(cat) => write!(f, "{cat} calibration is not in progress"),
            Self::SyncTimeout { received, expected } => {
                write!(f, "parameter sync gave up with {received}/{expected} parameters")
            }
            Self::StepComplianceTimeout => write!(f, "vehicle not placed in position in time"),
            Self::SessionTimeout => write!(f, "calibration took too long"),
            Self::LinkLost => write!(f, "telemetry link lost"),
            Self::InvalidPosition(pos) => write!(f, "invalid position {pos}"),
            Self::MagnitudeOutOfRange(mag) => {
                write!(f, "acceleration magnitude {mag:.2} m/s² out of range")
            }
            Self::AxisMisaligned => write!(f, "vehicle not aligned with the expected axis"),
            Self::VerificationFailed(why) => write!(f, "verification failed: {why}"),
            Self::Cancelled => write!(f, "calibration cancelled"),
        }
    }
}

impl std::error::Error for CalibrationError {}

impl From<LinkError> for CalibrationError {
    fn from(_: LinkError) -> Self { CalibrationError::LinkLost }
}
