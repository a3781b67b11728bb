//! Pure input validators for phone numbers and names.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;

/// Maximum accepted name length. A name of exactly this length is rejected.
pub const MAX_NAME_LEN: usize = 50;

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{10,18}$").expect("phone pattern is valid"))
}

/// Check that a candidate phone number is 10 to 18 ASCII digits.
///
/// Syntactic check only; uniqueness against the profile store is the
/// engine's concern. Idempotent and side-effect free.
pub fn validate_phone_format(candidate: &str) -> Result<(), ValidationError> {
    if phone_pattern().is_match(candidate) {
        Ok(())
    } else {
        Err(ValidationError::BadPhoneFormat)
    }
}

/// Check that a first/last name is shorter than [`MAX_NAME_LEN`] characters.
pub fn validate_name_length(name: &str, field: &'static str) -> Result<(), ValidationError> {
    if name.chars().count() >= MAX_NAME_LEN {
        Err(ValidationError::NameTooLong { field })
    } else {
        Ok(())
    }
}
