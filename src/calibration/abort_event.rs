use super::category::CategoryId;
use crate::error::CalibrationError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use strum_macros::Display;

/// Why a running calibration was aborted.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AbortReason {
    HeartbeatLost,
    Timeout,
    UserNonCompliance,
    ConnectionLost,
    /// The firmware reported that the calibration failed.
    FirmwareFailure,
    /// The firmware refused the calibration command.
    CommandRejected,
    UserCancelled,
}

impl AbortReason {
    pub fn as_error(self) -> CalibrationError {
        match self {
            AbortReason::HeartbeatLost | AbortReason::ConnectionLost => CalibrationError::LinkLost,
            AbortReason::Timeout => CalibrationError::SessionTimeout,
            AbortReason::UserNonCompliance => CalibrationError::StepComplianceTimeout,
            AbortReason::FirmwareFailure | AbortReason::CommandRejected | AbortReason::UserCancelled => {
                CalibrationError::Cancelled
            }
        }
    }
}

/// Immutable record of one triggered abort.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbortEvent {
    reason: AbortReason,
    message: String,
    category: CategoryId,
    /// Arming of the monitor the event belongs to.
    run: u64,
    timestamp: DateTime<Utc>,
    /// Time since the monitor was armed.
    elapsed: Duration,
}

impl AbortEvent {
    pub fn new(
        reason: AbortReason,
        message: String,
        category: CategoryId,
        run: u64,
        elapsed: Duration,
    ) -> Self {
        Self { reason, message, category, run, timestamp: Utc::now(), elapsed }
    }

    pub fn reason(&self) -> AbortReason { self.reason }
    pub fn message(&self) -> &str { &self.message }
    pub fn category(&self) -> CategoryId { self.category }
    pub fn run(&self) -> u64 { self.run }
    pub fn timestamp(&self) -> DateTime<Utc> { self.timestamp }
    pub fn elapsed(&self) -> Duration { self.elapsed }
}

impl std::fmt::Display for AbortEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} calibration aborted after {:.1}s ({}): {}",
            self.category,
            self.elapsed.as_secs_f32(),
            self.reason,
            self.message
        )
    }
}
