use serde::Serialize;

/// Maximum length of a parameter id on the wire.
pub const PARAM_ID_LEN: usize = 16;

/// A named configuration value held by the flight controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    /// Normalized (upper-case) identifier.
    name: String,
    value: f32,
    /// Ordinal assigned by the device.
    index: u16,
    /// Whether the value was reported by the device during the current sync.
    received: bool,
}

impl Parameter {
    pub fn new(name: &str, value: f32, index: u16) -> Self {
        Self { name: normalize_name(name), value, index, received: true }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn value(&self) -> f32 { self.value }
    pub fn index(&self) -> u16 { self.index }
    pub fn is_received(&self) -> bool { self.received }
}

/// Canonical form of a parameter id: trailing NULs stripped, upper case, at most
/// [`PARAM_ID_LEN`] characters.
pub fn normalize_name(raw: &str) -> String {
    raw.trim_end_matches('\0').chars().take(PARAM_ID_LEN).collect::<String>().to_ascii_uppercase()
}

/// Whether `raw` fits into a parameter id without truncation.
pub fn is_valid_name(raw: &str) -> bool {
    let trimmed = raw.trim_end_matches('\0');
    !trimmed.is_empty() && trimmed.chars().count() <= PARAM_ID_LEN && trimmed.is_ascii()
}
