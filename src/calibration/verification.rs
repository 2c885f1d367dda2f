use super::category::CategoryId;
use crate::error::CalibrationError;
use crate::parameters::ParameterStore;
use crate::{cal, warn};
use futures::future::join_all;
use serde::Serialize;

/// Outcome of the post-calibration check of one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Verification {
    /// All checked parameters are within bounds, or the category has no check.
    Verified,
    Failed(String),
}

impl Verification {
    pub fn is_verified(&self) -> bool { matches!(self, Verification::Verified) }

    /// The non-fatal [`CalibrationError::VerificationFailed`] for a failed check.
    pub fn as_error(&self) -> Option<CalibrationError> {
        match self {
            Verification::Verified => None,
            Verification::Failed(why) => Some(CalibrationError::VerificationFailed(why.clone())),
        }
    }
}

/// Reads back the parameters the firmware wrote for `category` and checks their bounds.
///
/// Reads go directly to the device so that stale snapshot values are never checked. A
/// read that gets no answer fails the verification.
pub async fn verify(store: &ParameterStore, category: CategoryId) -> Verification {
    let checks = &category.profile().verification;
    if checks.is_empty() {
        return Verification::Verified;
    }
    let reads = join_all(checks.iter().map(|(name, _)| store.fetch(name))).await;

    let mut problems = Vec::new();
    for ((name, bound), value) in checks.iter().zip(reads) {
        match value {
            None => problems.push(format!("{name} could not be read")),
            Some(v) if !bound.accepts(v) => problems.push(format!("{name} = {v} out of {bound:?}")),
            Some(_) => {}
        }
    }
    if problems.is_empty() {
        cal!("{category} calibration verified ({} parameters).", checks.len());
        Verification::Verified
    } else {
        let why = problems.join("; ");
        warn!("{category} verification failed: {why}");
        Verification::Failed(why)
    }
}
