//! Per-user session state and the manager that keys it by identity.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

/// The step a user's conversation is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// No flow armed; the next /start decides where to go.
    Start,
    /// Agreement shown, waiting for accept/decline.
    AwaitingAgreement,
    /// Waiting for the platform's contact-share event.
    AwaitingContact,
    /// Contact consumed without a last name; waiting for it as free text.
    AwaitingLastNameFollowup,
    /// Waiting for `<phone> <first> <last>` as one free-text message.
    AwaitingFreeTextRegistration,
    /// Waiting for a replacement first name.
    AwaitingNameEdit,
    /// Waiting for a replacement last name.
    AwaitingLastNameEdit,
    /// Registered; edit callbacks are live.
    EditingOpen,
    /// User finished editing; edit events are ignored until restart.
    EditingClosed,
}

impl Default for Step {
    fn default() -> Self {
        Self::Start
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::AwaitingAgreement => "awaiting_agreement",
            Self::AwaitingContact => "awaiting_contact",
            Self::AwaitingLastNameFollowup => "awaiting_last_name_followup",
            Self::AwaitingFreeTextRegistration => "awaiting_free_text_registration",
            Self::AwaitingNameEdit => "awaiting_name_edit",
            Self::AwaitingLastNameEdit => "awaiting_last_name_edit",
            Self::EditingOpen => "editing_open",
            Self::EditingClosed => "editing_closed",
        };
        write!(f, "{s}")
    }
}

/// Ephemeral conversation state for one identity.
///
/// Reconstructed to this default whenever the process restarts or the user
/// re-issues /start; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// The step the next inbound event will be dispatched against.
    pub step: Step,
    /// Phone captured from a shared contact, buffered until registration
    /// completes.
    pub pending_phone_number: Option<String>,
    /// First name captured from a shared contact, buffered alongside the
    /// phone while the last-name followup is pending.
    pub pending_first_name: Option<String>,
    /// True from session start until the user finishes editing. Once false,
    /// edit-triggering events are ignored for the rest of the session.
    pub editing_enabled: bool,
    /// One-shot latch set when a contact-share event is consumed, so a
    /// redelivered copy is discarded without a reply.
    pub contact_consumed: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            step: Step::default(),
            pending_phone_number: None,
            pending_first_name: None,
            editing_enabled: true,
            contact_consumed: false,
        }
    }
}

impl SessionState {
    /// Drop buffered scratch fields (on /start or after a completed write).
    pub fn clear_pending(&mut self) {
        self.pending_phone_number = None;
        self.pending_first_name = None;
    }
}

/// In-memory session registry, keyed by identity.
///
/// Single-writer-per-identity discipline: only the engine call processing an
/// identity's current event mutates its session, serialized through
/// [`SessionManager::in_flight_lock`]. No cross-identity state is ever read.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionState>>,
    in_flight: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for an identity, or its safe default if absent.
    pub async fn get(&self, identity: &str) -> SessionState {
        self.sessions
            .read()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the session for an identity. A state equal to the default
    /// carries no information, so its entry is dropped instead of stored.
    pub async fn set(&self, identity: &str, state: SessionState) {
        let mut sessions = self.sessions.write().await;
        if state == SessionState::default() {
            sessions.remove(identity);
        } else {
            sessions.insert(identity.to_string(), state);
        }
    }

    /// The per-identity lock that serializes event processing.
    ///
    /// Distinct identities get distinct locks, so different users are
    /// handled concurrently while each user's events stay strictly ordered.
    pub async fn in_flight_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.in_flight.read().await.get(identity) {
            return Arc::clone(lock);
        }
        let mut map = self.in_flight.write().await;
        // An entry only the map references belongs to an identity with
        // nothing in flight; sweep those while holding the write lock.
        // Callers clone under the read lock, so a strong count of 1 here
        // cannot race with an acquisition.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            map.entry(identity.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
