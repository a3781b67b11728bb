//! `ProfileStore` trait — the async persistence seam consumed by the engine.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::profile::UserProfile;

/// Backend-agnostic profile store.
///
/// `upsert` must enforce phone-number uniqueness across profiles and report
/// a violation as [`DatabaseError::Constraint`], never as a fatal error.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Look up a profile by identity.
    async fn find_by_identity(&self, identity: &str)
        -> Result<Option<UserProfile>, DatabaseError>;

    /// Look up a profile by phone number.
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserProfile>, DatabaseError>;

    /// Insert or update a profile, keyed by identity.
    async fn upsert(&self, profile: &UserProfile) -> Result<(), DatabaseError>;
}
