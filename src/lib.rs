#![warn(clippy::shadow_reuse, clippy::shadow_same, clippy::builtin_type_shadow)]
//! Parameter synchronization and supervised sensor calibration for flight controllers
//! connected through a lossy telemetry link.

pub mod calibration;
pub mod config;
pub mod error;
pub mod keychain;
pub mod link;
mod logger;
pub mod parameters;
pub mod sim;
pub mod util;
