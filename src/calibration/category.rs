use super::orientation::AccelPosition;
use crate::link::CalibrationFlags;
use serde::Serialize;
use std::{collections::HashMap, sync::LazyLock};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Sensor subsystems that can be calibrated.
#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum CategoryId {
    #[strum(to_string = "Accelerometer", serialize = "accel")]
    Accelerometer,
    #[strum(to_string = "Gyroscope", serialize = "gyro")]
    Gyroscope,
    #[strum(to_string = "Compass", serialize = "mag")]
    Compass,
    #[strum(to_string = "Barometer", serialize = "baro")]
    Barometer,
    #[strum(to_string = "LevelHorizon", serialize = "level")]
    LevelHorizon,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CategoryStatus {
    NotCalibrated,
    InProgress,
    Complete,
    Error,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Complete,
    Error,
}

/// Acceptance bound on one parameter written by the firmware after a calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamBound {
    /// `|value| <= limit`
    Abs(f32),
    /// `lo <= value <= hi`
    Range(f32, f32),
}

impl ParamBound {
    pub fn accepts(self, value: f32) -> bool {
        match self {
            ParamBound::Abs(limit) => value.abs() <= limit,
            ParamBound::Range(lo, hi) => (lo..=hi).contains(&value),
        }
    }
}

/// Static description of one calibration category.
#[derive(Debug, Clone)]
pub struct CategoryProfile {
    pub required: bool,
    /// `(label, instruction)` per step, in order.
    pub steps: Vec<(String, String)>,
    pub flags: CalibrationFlags,
    pub verification: Vec<(&'static str, ParamBound)>,
    pub reboot_required: bool,
}

fn single_step(label: &str, instruction: &str) -> Vec<(String, String)> {
    vec![(label.to_string(), instruction.to_string())]
}

/// Immutable profile table, keyed by category.
///
/// The calibration flags are the autopilot's preflight calibration contract and must
/// match the firmware the vehicle runs.
pub static CATEGORY_PROFILES: LazyLock<HashMap<CategoryId, CategoryProfile>> = LazyLock::new(|| {
    let accel_steps = AccelPosition::iter()
        .map(|pos| (pos.to_string(), pos.instruction().to_string()))
        .collect();
    HashMap::from([
        (CategoryId::Accelerometer, CategoryProfile {
            required: true,
            steps: accel_steps,
            flags: CalibrationFlags { accelerometer: 1, ..CalibrationFlags::CANCEL },
            verification: vec![
                ("INS_ACCOFFS_X", ParamBound::Abs(3.5)),
                ("INS_ACCOFFS_Y", ParamBound::Abs(3.5)),
                ("INS_ACCOFFS_Z", ParamBound::Abs(3.5)),
                ("INS_ACCSCAL_X", ParamBound::Range(0.8, 1.2)),
                ("INS_ACCSCAL_Y", ParamBound::Range(0.8, 1.2)),
                ("INS_ACCSCAL_Z", ParamBound::Range(0.8, 1.2)),
            ],
            reboot_required: true,
        }),
        (CategoryId::Gyroscope, CategoryProfile {
            required: true,
            steps: single_step("Gyroscope", "Keep the vehicle completely still."),
            flags: CalibrationFlags { gyro: 1, ..CalibrationFlags::CANCEL },
            verification: Vec::new(),
            reboot_required: false,
        }),
        (CategoryId::Compass, CategoryProfile {
            required: true,
            steps: single_step("Compass", "Rotate the vehicle around all axes until done."),
            flags: CalibrationFlags { magnetometer: 1, ..CalibrationFlags::CANCEL },
            verification: vec![
                ("COMPASS_OFS_X", ParamBound::Abs(1800.0)),
                ("COMPASS_OFS_Y", ParamBound::Abs(1800.0)),
                ("COMPASS_OFS_Z", ParamBound::Abs(1800.0)),
            ],
            reboot_required: true,
        }),
        (CategoryId::Barometer, CategoryProfile {
            required: false,
            steps: single_step("Barometer", "Keep the vehicle still and shielded from wind."),
            flags: CalibrationFlags { ground_pressure: 1, ..CalibrationFlags::CANCEL },
            verification: Vec::new(),
            reboot_required: false,
        }),
        (CategoryId::LevelHorizon, CategoryProfile {
            required: false,
            steps: single_step("Level", "Place the vehicle level in its flying attitude."),
            flags: CalibrationFlags { accelerometer: 2, ..CalibrationFlags::CANCEL },
            verification: vec![
                ("AHRS_TRIM_X", ParamBound::Abs(0.1745)),
                ("AHRS_TRIM_Y", ParamBound::Abs(0.1745)),
            ],
            reboot_required: false,
        }),
    ])
});

impl CategoryId {
    pub fn profile(self) -> &'static CategoryProfile {
        // Every variant has an entry.
        &CATEGORY_PROFILES[&self]
    }

    /// Whether the procedure walks through the six accelerometer positions.
    pub fn is_multi_position(self) -> bool { self == CategoryId::Accelerometer }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationStep {
    index: usize,
    label: String,
    instruction: String,
    status: StepStatus,
}

impl CalibrationStep {
    pub fn index(&self) -> usize { self.index }
    pub fn label(&self) -> &str { &self.label }
    pub fn instruction(&self) -> &str { &self.instruction }
    pub fn status(&self) -> StepStatus { self.status }
}

/// One category together with its step table.
///
/// Only the calibration session mutates it; callers receive clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationCategory {
    id: CategoryId,
    required: bool,
    steps: Vec<CalibrationStep>,
    status: CategoryStatus,
}

impl CalibrationCategory {
    pub fn new(id: CategoryId) -> Self {
        let profile = id.profile();
        let steps = profile
            .steps
            .iter()
            .enumerate()
            .map(|(index, (label, instruction))| CalibrationStep {
                index,
                label: label.clone(),
                instruction: instruction.clone(),
                status: StepStatus::NotStarted,
            })
            .collect();
        Self { id, required: profile.required, steps, status: CategoryStatus::NotCalibrated }
    }

    pub fn id(&self) -> CategoryId { self.id }
    pub fn is_required(&self) -> bool { self.required }
    pub fn steps(&self) -> &[CalibrationStep] { &self.steps }
    pub fn status(&self) -> CategoryStatus { self.status }

    /// Index of the step currently in progress.
    pub fn current_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::InProgress)
    }

    /// Resets all steps and activates the first one.
    pub(crate) fn begin(&mut self) {
        for step in &mut self.steps {
            step.status = StepStatus::NotStarted;
        }
        if let Some(first) = self.steps.first_mut() {
            first.status = StepStatus::InProgress;
        }
        self.status = CategoryStatus::InProgress;
    }

    /// Completes the active step and activates the next one.
    ///
    /// Returns `true` once no step remains and the category is complete.
    pub(crate) fn complete_step(&mut self) -> bool {
        let next = match self.current_step() {
            Some(i) => {
                self.steps[i].status = StepStatus::Complete;
                i + 1
            }
            None => 0,
        };
        match self.steps.get_mut(next) {
            Some(step) => {
                step.status = StepStatus::InProgress;
                false
            }
            None => {
                self.status = CategoryStatus::Complete;
                true
            }
        }
    }

    pub(crate) fn complete_all(&mut self) {
        for step in &mut self.steps {
            step.status = StepStatus::Complete;
        }
        self.status = CategoryStatus::Complete;
    }

    pub(crate) fn fail(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::InProgress {
                step.status = StepStatus::Error;
            }
        }
        self.status = CategoryStatus::Error;
    }
}
