mod abort_event;
mod abort_monitor;
mod calibration_session;
mod category;
mod orientation;
mod status_text;
mod verification;

pub use abort_event::{AbortEvent, AbortReason};
pub use abort_monitor::{AbortMonitor, MonitorState};
pub use calibration_session::{CalibrationSession, CommitReport, SessionEvent};
pub use category::{
    CATEGORY_PROFILES, CalibrationCategory, CalibrationStep, CategoryId, CategoryProfile,
    CategoryStatus, ParamBound, StepStatus,
};
pub use orientation::{
    AXIS_DOMINANCE, AccelPosition, GRAVITY, MAGNITUDE_TOLERANCE, ValidationFailure,
    ValidationReport, magnitude_bounds, validate,
};
pub use status_text::{StatusClass, classify};
pub use verification::{Verification, verify};

#[cfg(test)]
mod tests;
