//! libSQL backend — async `ProfileStore` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is safe for concurrent
//! async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::profile::UserProfile;
use crate::store::migrations;
use crate::store::traits::ProfileStore;

const PROFILE_COLUMNS: &str = "identity, phone_number, first_name, last_name, \
                               accepted_agreement, is_registered, created_at, updated_at";

/// libSQL profile store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Profile database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_one(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<UserProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                row_to_profile(&row).map_err(|e| DatabaseError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}

/// Parse an RFC 3339 datetime column, falling back to the epoch.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Map a libsql Row to a UserProfile. Column order matches PROFILE_COLUMNS.
fn row_to_profile(row: &libsql::Row) -> Result<UserProfile, libsql::Error> {
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;
    Ok(UserProfile {
        identity: row.get(0)?,
        phone_number: row.get(1).ok(),
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        accepted_agreement: row.get::<i64>(4)? != 0,
        is_registered: row.get::<i64>(5)? != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Classify a write failure: UNIQUE violations become `Constraint` so the
/// engine can translate them into a duplicate-phone reply.
fn classify_write_error(e: libsql::Error) -> DatabaseError {
    let text = e.to_string();
    if text.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(text)
    } else {
        DatabaseError::Query(text)
    }
}

#[async_trait]
impl ProfileStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn find_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<UserProfile>, DatabaseError> {
        self.query_one(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE identity = ?1"),
            params![identity],
        )
        .await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserProfile>, DatabaseError> {
        self.query_one(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE phone_number = ?1"),
            params![phone],
        )
        .await
    }

    async fn upsert(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO profiles (identity, phone_number, first_name, last_name, \
                 accepted_agreement, is_registered, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(identity) DO UPDATE SET
                     phone_number = excluded.phone_number,
                     first_name = excluded.first_name,
                     last_name = excluded.last_name,
                     accepted_agreement = excluded.accepted_agreement,
                     is_registered = excluded.is_registered,
                     updated_at = excluded.updated_at",
                params![
                    profile.identity.as_str(),
                    opt_text(profile.phone_number.as_deref()),
                    profile.first_name.as_str(),
                    profile.last_name.as_str(),
                    i64::from(profile.accepted_agreement),
                    i64::from(profile.is_registered),
                    profile.created_at.to_rfc3339(),
                    profile.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(classify_write_error)?;
        Ok(())
    }
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn find_missing_returns_none() {
        let store = store().await;
        assert!(store.find_by_identity("42").await.unwrap().is_none());
        assert!(store.find_by_phone("12345678901").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_then_find_roundtrip() {
        let store = store().await;
        let mut profile = UserProfile::new("42");
        profile.accepted_agreement = true;
        profile.complete_registration("12345678901", "Ivan", "Petrov");
        store.upsert(&profile).await.unwrap();

        let by_id = store.find_by_identity("42").await.unwrap().unwrap();
        assert_eq!(by_id.first_name, "Ivan");
        assert_eq!(by_id.phone_number.as_deref(), Some("12345678901"));
        assert!(by_id.is_registered);

        let by_phone = store.find_by_phone("12345678901").await.unwrap().unwrap();
        assert_eq!(by_phone.identity, "42");
    }

    #[tokio::test]
    async fn upsert_updates_in_place() {
        let store = store().await;
        let mut profile = UserProfile::new("42");
        profile.complete_registration("12345678901", "Ivan", "Petrov");
        store.upsert(&profile).await.unwrap();

        profile.first_name = "Pyotr".into();
        store.upsert(&profile).await.unwrap();

        let found = store.find_by_identity("42").await.unwrap().unwrap();
        assert_eq!(found.first_name, "Pyotr");
        assert_eq!(found.last_name, "Petrov");
    }

    #[tokio::test]
    async fn duplicate_phone_is_a_constraint_error() {
        let store = store().await;
        let mut first = UserProfile::new("42");
        first.complete_registration("12345678901", "Ivan", "Petrov");
        store.upsert(&first).await.unwrap();

        let mut second = UserProfile::new("43");
        second.complete_registration("12345678901", "Anna", "Ivanova");
        let err = store.upsert(&second).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unregistered_profiles_have_no_phone_conflict() {
        let store = store().await;
        // Two empty profiles (phone NULL) must coexist: the UNIQUE
        // constraint ignores NULLs.
        store.upsert(&UserProfile::new("42")).await.unwrap();
        store.upsert(&UserProfile::new("43")).await.unwrap();
        assert!(store.find_by_identity("43").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn local_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.db");
        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            let mut profile = UserProfile::new("42");
            profile.accepted_agreement = true;
            store.upsert(&profile).await.unwrap();
        }
        let store = LibSqlStore::new_local(&path).await.unwrap();
        let found = store.find_by_identity("42").await.unwrap().unwrap();
        assert!(found.accepted_agreement);
    }
}
