use super::orientation::AccelPosition;
use regex::Regex;
use std::sync::LazyLock;

/// Meaning of a firmware status text during a calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// The firmware gave up on the calibration.
    Failure,
    /// The firmware finished the calibration.
    Success,
    /// Completion percentage.
    Progress(u8),
    /// Request to move the vehicle, with the position if one could be recognized.
    Instruction(Option<AccelPosition>),
    Other,
}

static FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcal(ibration)?\b.*\b(failed|fail|cancell?ed|timed\s*out|timeout)\b")
        .expect("static regex")
});
static SUCCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcal(ibration)?\b.*\b(successful|success|complete|completed|done)\b")
        .expect("static regex")
});
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})\s*%").expect("static regex"));
static PLACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bplace\s+vehicle\b(.*)").expect("static regex"));
static POSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(level|left|right|nose\s*down|nose\s*up|back)\b").expect("static regex")
});

/// Classifies one status text. Failures win over everything else.
pub fn classify(text: &str) -> StatusClass {
    if FAILURE_RE.is_match(text) {
        return StatusClass::Failure;
    }
    if SUCCESS_RE.is_match(text) {
        return StatusClass::Success;
    }
    if let Some(caps) = PLACE_RE.captures(text) {
        let rest = caps.get(1).map_or("", |m| m.as_str());
        return StatusClass::Instruction(parse_position(rest));
    }
    if let Some(percent) = PROGRESS_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .filter(|p| *p <= 100)
    {
        return StatusClass::Progress(percent);
    }
    StatusClass::Other
}

fn parse_position(text: &str) -> Option<AccelPosition> {
    let word = POSITION_RE.captures(text)?[1].to_ascii_lowercase();
    let word: String = word.split_whitespace().collect();
    match word.as_str() {
        "level" => Some(AccelPosition::Level),
        "left" => Some(AccelPosition::Left),
        "right" => Some(AccelPosition::Right),
        "nosedown" => Some(AccelPosition::NoseDown),
        "noseup" => Some(AccelPosition::NoseUp),
        "back" => Some(AccelPosition::Back),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_and_success() {
        assert_eq!(classify("Calibration FAILED"), StatusClass::Failure);
        assert_eq!(classify("Mag calibration timed out"), StatusClass::Failure);
        assert_eq!(classify("Calibration cancelled by GCS"), StatusClass::Failure);
        assert_eq!(classify("Calibration successful"), StatusClass::Success);
        assert_eq!(classify("Gyro cal complete"), StatusClass::Success);
    }

    #[test]
    fn test_progress_and_instruction() {
        assert_eq!(classify("Mag(0) 42%"), StatusClass::Progress(42));
        assert_eq!(classify("Mag(0) 420%"), StatusClass::Other);
        assert_eq!(
            classify("Place vehicle nose DOWN and press any key."),
            StatusClass::Instruction(Some(AccelPosition::NoseDown))
        );
        assert_eq!(
            classify("Place vehicle on its LEFT side and press any key."),
            StatusClass::Instruction(Some(AccelPosition::Left))
        );
        assert_eq!(classify("place vehicle somewhere"), StatusClass::Instruction(None));
        assert_eq!(classify("EKF3 IMU0 is using GPS"), StatusClass::Other);
    }
}
