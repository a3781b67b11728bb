//! Durable user profile model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's registration profile.
///
/// Keyed by the opaque `identity` of the chat participant. `phone_number`
/// is unique among registered profiles — the store enforces this with a
/// UNIQUE constraint. `accepted_agreement` and `is_registered` only ever
/// move from false to true; profiles are never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub accepted_agreement: bool,
    pub is_registered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Create an empty profile for a first-time identity.
    pub fn new(identity: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identity: identity.into(),
            phone_number: None,
            first_name: String::new(),
            last_name: String::new(),
            accepted_agreement: false,
            is_registered: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill in registration data and mark the profile registered.
    pub fn complete_registration(
        &mut self,
        phone_number: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) {
        self.phone_number = Some(phone_number.into());
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self.is_registered = true;
        self.updated_at = Utc::now();
    }
}
