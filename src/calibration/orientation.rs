use crate::error::CalibrationError;
use crate::util::{Axis, Vec3D};
use serde::Serialize;
use strum_macros::{Display, EnumIter};

/// Nominal gravity in m/s².
pub const GRAVITY: f32 = 9.81;
/// Allowed relative deviation of the measured magnitude from [`GRAVITY`].
pub const MAGNITUDE_TOLERANCE: f32 = 0.15;
/// Share of [`GRAVITY`] the expected axis has to carry.
pub const AXIS_DOMINANCE: f32 = 0.70;

/// The six canonical vehicle orientations of a 6-point accelerometer calibration,
/// numbered 1 to 6 in the order the firmware asks for them.
#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccelPosition {
    Level = 1,
    Left = 2,
    Right = 3,
    NoseDown = 4,
    NoseUp = 5,
    Back = 6,
}

impl AccelPosition {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Self::Level),
            2 => Some(Self::Left),
            3 => Some(Self::Right),
            4 => Some(Self::NoseDown),
            5 => Some(Self::NoseUp),
            6 => Some(Self::Back),
            _ => None,
        }
    }

    /// 1-based index as sent in the position confirmation.
    pub fn index(self) -> u8 { self as u8 }

    /// The axis gravity has to load and whether its reading is positive.
    pub fn expected_axis(self) -> (Axis, bool) {
        match self {
            Self::Level => (Axis::Z, true),
            Self::Left => (Axis::Y, false),
            Self::Right => (Axis::Y, true),
            Self::NoseDown => (Axis::X, true),
            Self::NoseUp => (Axis::X, false),
            Self::Back => (Axis::Z, false),
        }
    }

    /// What the user has to do to reach this position.
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Level => "Place the vehicle level on a flat surface.",
            Self::Left => "Roll the vehicle onto its left side.",
            Self::Right => "Roll the vehicle onto its right side.",
            Self::NoseDown => "Tilt the vehicle so the nose points straight down.",
            Self::NoseUp => "Tilt the vehicle so the nose points straight up.",
            Self::Back => "Turn the vehicle upside down onto its back.",
        }
    }
}

/// Why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ValidationFailure {
    InvalidPosition,
    MagnitudeOutOfRange,
    AxisMisaligned { expected: Axis, positive: bool },
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub message: String,
    /// Measured magnitude in m/s², zero for an invalid position.
    pub magnitude: f32,
    pub failure: Option<ValidationFailure>,
}

impl ValidationReport {
    fn pass(position: AccelPosition, magnitude: f32) -> Self {
        Self {
            valid: true,
            message: format!("{position} position confirmed ({magnitude:.2} m/s²)."),
            magnitude,
            failure: None,
        }
    }

    fn fail(failure: ValidationFailure, message: String, magnitude: f32) -> Self {
        Self { valid: false, message, magnitude, failure: Some(failure) }
    }

    /// The matching [`CalibrationError`] for a rejected sample.
    pub fn as_error(&self, position: u8) -> Option<CalibrationError> {
        Some(match self.failure? {
            ValidationFailure::InvalidPosition => CalibrationError::InvalidPosition(position),
            ValidationFailure::MagnitudeOutOfRange => {
                CalibrationError::MagnitudeOutOfRange(self.magnitude)
            }
            ValidationFailure::AxisMisaligned { .. } => CalibrationError::AxisMisaligned,
        })
    }
}

/// Acceptable magnitude range `[lo, hi]` in m/s².
pub fn magnitude_bounds() -> (f32, f32) {
    (GRAVITY * (1.0 - MAGNITUDE_TOLERANCE), GRAVITY * (1.0 + MAGNITUDE_TOLERANCE))
}

/// Checks whether `sample` is a plausible resting reading for the 1-based `position`.
///
/// The magnitude has to be within ±15 % of gravity, otherwise the vehicle is moving and
/// the axis check is skipped. The expected axis then has to carry more than 70 % of
/// gravity with the right sign.
pub fn validate(position: u8, sample: &Vec3D<f32>) -> ValidationReport {
    let Some(pos) = AccelPosition::from_index(position) else {
        return ValidationReport::fail(
            ValidationFailure::InvalidPosition,
            format!("Invalid position {position}: expected a value between 1 and 6."),
            0.0,
        );
    };

    let magnitude = sample.abs();
    let (lo, hi) = magnitude_bounds();
    // Negated so that NaN readings fail as well.
    if !(lo..=hi).contains(&magnitude) {
        return ValidationReport::fail(
            ValidationFailure::MagnitudeOutOfRange,
            format!(
                "Measured acceleration {magnitude:.2} m/s² outside [{lo:.2}, {hi:.2}]. Hold the vehicle still."
            ),
            magnitude,
        );
    }

    let (axis, positive) = pos.expected_axis();
    let reading = sample.component(axis);
    let signed = if positive { reading } else { -reading };
    if signed > AXIS_DOMINANCE * GRAVITY {
        return ValidationReport::pass(pos, magnitude);
    }

    let sign = if positive { '+' } else { '-' };
    ValidationReport::fail(
        ValidationFailure::AxisMisaligned { expected: axis, positive },
        format!(
            "{pos}: expected gravity on {sign}{axis} (> {:.2} m/s²), measured {sample:.2}. {}",
            AXIS_DOMINANCE * GRAVITY,
            pos.instruction()
        ),
        magnitude,
    )
}
