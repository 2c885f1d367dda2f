mod link_common;
mod link_monitor;
mod link_router;

pub use link_common::{
    AckResult, CMD_ACCELCAL_VEHICLE_POS, CMD_PREFLIGHT_CALIBRATION, CMD_PREFLIGHT_REBOOT,
    CalibrationFlags, CommandAck, FlightLink, InboundMessage, LinkError, Severity,
};
pub use link_monitor::{LinkEvent, LinkMonitor};
pub use link_router::LinkRouter;
