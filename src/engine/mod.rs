//! Conversation engine — the per-user registration state machine.
//!
//! Every inbound event is dispatched against the identity's current
//! [`Step`]; the engine validates input, reads and writes the profile
//! store, emits the next prompts, and arms the next step. Validation and
//! store failures are translated into retry prompts here and never
//! propagate further.

pub mod messages;
pub mod router;

pub use router::EventRouter;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::channels::{CallbackTag, EventKind, InboundEvent, Reply};
use crate::config::RegistrationMode;
use crate::error::{DatabaseError, ValidationError};
use crate::profile::UserProfile;
use crate::session::{SessionManager, SessionState, Step};
use crate::store::ProfileStore;
use crate::validation::{validate_name_length, validate_phone_format};

/// Result of a registration write.
enum WriteOutcome {
    Written(UserProfile),
    DuplicatePhone,
    Failed,
}

/// The registration state machine.
pub struct ConversationEngine {
    store: Arc<dyn ProfileStore>,
    sessions: SessionManager,
    agreement_text: String,
    mode: RegistrationMode,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        agreement_text: impl Into<String>,
        mode: RegistrationMode,
    ) -> Self {
        Self {
            store,
            sessions: SessionManager::new(),
            agreement_text: agreement_text.into(),
            mode,
        }
    }

    /// Process one inbound event and return the replies to deliver.
    ///
    /// Events for the same identity are serialized through the session
    /// manager's per-identity lock; distinct identities run concurrently.
    pub async fn handle_event(&self, event: InboundEvent) -> Vec<Reply> {
        let lock = self.sessions.in_flight_lock(&event.identity).await;
        let _guard = lock.lock().await;

        let mut session = self.sessions.get(&event.identity).await;
        let replies = self.dispatch(&event, &mut session).await;
        self.sessions.set(&event.identity, session).await;
        replies
    }

    /// Snapshot of an identity's session (for tests and diagnostics).
    pub async fn session(&self, identity: &str) -> SessionState {
        self.sessions.get(identity).await
    }

    /// The step armed after the agreement is accepted, per input mode.
    fn registration_step(&self) -> Step {
        match self.mode {
            RegistrationMode::FreeText => Step::AwaitingFreeTextRegistration,
            RegistrationMode::Contact => Step::AwaitingContact,
        }
    }

    async fn dispatch(&self, event: &InboundEvent, session: &mut SessionState) -> Vec<Reply> {
        let identity = event.identity.as_str();
        match &event.kind {
            EventKind::StartCommand => self.on_start(identity, session).await,
            EventKind::Callback(tag) => self.on_callback(identity, *tag, session).await,
            EventKind::ContactShared {
                phone_number,
                first_name,
                last_name,
            } => {
                self.on_contact(
                    identity,
                    phone_number.as_deref(),
                    first_name,
                    last_name.as_deref(),
                    session,
                )
                .await
            }
            EventKind::FreeText(text) => self.on_free_text(identity, text, session).await,
        }
    }

    /// /start resets the session and branches on what the profile already
    /// holds: registered → profile card, accepted → registration prompt,
    /// otherwise the agreement.
    async fn on_start(&self, identity: &str, session: &mut SessionState) -> Vec<Reply> {
        *session = SessionState::default();
        info!(identity, "User started the bot");

        let profile = match self.store.find_by_identity(identity).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(identity, error = %e, "Profile lookup failed on start");
                return vec![Reply::text(identity, messages::STORE_FAILURE)];
            }
        };

        match profile {
            Some(profile) if profile.is_registered => {
                session.step = Step::EditingOpen;
                vec![messages::profile_card(identity, &profile)]
            }
            Some(profile) if profile.accepted_agreement => {
                session.step = self.registration_step();
                vec![messages::registration_prompt(identity, self.mode)]
            }
            _ => {
                session.step = Step::AwaitingAgreement;
                vec![messages::agreement(identity, &self.agreement_text)]
            }
        }
    }

    async fn on_callback(
        &self,
        identity: &str,
        tag: CallbackTag,
        session: &mut SessionState,
    ) -> Vec<Reply> {
        match tag {
            CallbackTag::Accept | CallbackTag::Decline => {
                if session.step != Step::AwaitingAgreement {
                    return self.stale_agreement_press(identity, session.step).await;
                }
                self.on_agreement_choice(identity, tag, session).await
            }
            CallbackTag::EditName | CallbackTag::EditLastName => {
                if !session.editing_enabled {
                    debug!(identity, tag = tag.as_str(), "Callback ignored: editing closed");
                    return Vec::new();
                }
                if session.step != Step::EditingOpen {
                    return protocol_ignore(identity, session.step, tag.as_str());
                }
                let (step, prompt) = match tag {
                    CallbackTag::EditName => (Step::AwaitingNameEdit, messages::ASK_NEW_FIRST_NAME),
                    _ => (Step::AwaitingLastNameEdit, messages::ASK_NEW_LAST_NAME),
                };
                self.arm_edit(identity, session, step, prompt).await
            }
            CallbackTag::FinishEditing => {
                if !session.editing_enabled {
                    debug!(identity, "Callback ignored: editing closed");
                    return Vec::new();
                }
                if session.step != Step::EditingOpen {
                    return protocol_ignore(identity, session.step, "finish_editing");
                }
                session.editing_enabled = false;
                session.step = Step::EditingClosed;
                info!(identity, "User finished editing");
                vec![Reply::text(identity, messages::EDITING_FINISHED)]
            }
        }
    }

    /// An agreement button pressed outside the agreement step. When the
    /// acceptance is already on record the user is told so again; anything
    /// else is a stray press and stays silent.
    async fn stale_agreement_press(&self, identity: &str, step: Step) -> Vec<Reply> {
        match self.store.find_by_identity(identity).await {
            Ok(Some(profile)) if profile.accepted_agreement => {
                vec![Reply::text(identity, messages::ALREADY_ACCEPTED)]
            }
            Ok(_) => protocol_ignore(identity, step, "agreement callback"),
            Err(e) => {
                warn!(identity, error = %e, "Profile lookup failed for agreement callback");
                Vec::new()
            }
        }
    }

    async fn on_agreement_choice(
        &self,
        identity: &str,
        tag: CallbackTag,
        session: &mut SessionState,
    ) -> Vec<Reply> {
        let mut profile = match self.store.find_by_identity(identity).await {
            Ok(Some(profile)) => profile,
            Ok(None) => UserProfile::new(identity),
            Err(e) => {
                warn!(identity, error = %e, "Profile lookup failed during agreement");
                return vec![Reply::text(identity, messages::STORE_FAILURE)];
            }
        };

        if profile.accepted_agreement {
            return vec![Reply::text(identity, messages::ALREADY_ACCEPTED)];
        }

        match tag {
            CallbackTag::Accept => {
                profile.accepted_agreement = true;
                profile.updated_at = Utc::now();
                if let Err(e) = self.store.upsert(&profile).await {
                    warn!(identity, error = %e, "Failed to persist agreement acceptance");
                    return vec![Reply::text(identity, messages::STORE_FAILURE)];
                }
                info!(identity, "Agreement accepted");
                session.step = self.registration_step();
                vec![
                    Reply::text(identity, messages::ACCEPTED),
                    messages::registration_prompt(identity, self.mode),
                ]
            }
            CallbackTag::Decline => {
                session.step = Step::Start;
                info!(identity, "Agreement declined");
                vec![Reply::text(identity, messages::DECLINED)]
            }
            _ => unreachable!("only agreement callbacks reach here"),
        }
    }

    /// Arm a name-edit step, but only for identities that have a profile.
    /// No profile → explicit no-op, matching the decline/ignore policy.
    async fn arm_edit(
        &self,
        identity: &str,
        session: &mut SessionState,
        step: Step,
        prompt: &str,
    ) -> Vec<Reply> {
        match self.store.find_by_identity(identity).await {
            Ok(Some(_)) => {
                session.step = step;
                vec![Reply::text(identity, prompt)]
            }
            Ok(None) => {
                debug!(identity, "Edit callback ignored: no profile");
                Vec::new()
            }
            Err(e) => {
                warn!(identity, error = %e, "Profile lookup failed for edit");
                vec![Reply::text(identity, messages::STORE_FAILURE)]
            }
        }
    }

    async fn on_contact(
        &self,
        identity: &str,
        phone_number: Option<&str>,
        first_name: &str,
        last_name: Option<&str>,
        session: &mut SessionState,
    ) -> Vec<Reply> {
        // Redelivered contact events are discarded entirely: no state
        // change, no reply.
        if session.contact_consumed {
            debug!(identity, "Duplicate contact event discarded");
            return Vec::new();
        }

        if session.step != Step::AwaitingContact {
            return protocol_ignore(identity, session.step, "contact share");
        }

        let Some(phone) = phone_number else {
            return vec![messages::validation_failure(
                identity,
                &ValidationError::MissingContact,
                self.mode,
            )];
        };

        // The platform supplied the number, so the digit-format rule is
        // skipped; name lengths and uniqueness still apply.
        if let Err(e) = validate_name_length(first_name, "First name") {
            return vec![messages::validation_failure(identity, &e, self.mode)];
        }
        if let Some(last) = last_name {
            if let Err(e) = validate_name_length(last, "Last name") {
                return vec![messages::validation_failure(identity, &e, self.mode)];
            }
        }
        if let Some(reply) = self.phone_conflict_reply(identity, phone).await {
            return vec![reply];
        }

        match last_name {
            Some(last) => match self.persist_registration(identity, phone, first_name, last).await {
                WriteOutcome::Written(profile) => {
                    session.contact_consumed = true;
                    session.clear_pending();
                    session.step = Step::EditingOpen;
                    vec![messages::profile_card(identity, &profile)]
                }
                WriteOutcome::DuplicatePhone => vec![messages::validation_failure(
                    identity,
                    &ValidationError::DuplicatePhone,
                    self.mode,
                )],
                WriteOutcome::Failed => vec![messages::store_failure(identity, self.mode)],
            },
            None => {
                // Contact accepted but the platform has no last name for
                // this user; buffer what we have and ask for the rest.
                session.contact_consumed = true;
                session.pending_phone_number = Some(phone.to_string());
                session.pending_first_name = Some(first_name.to_string());
                session.step = Step::AwaitingLastNameFollowup;
                vec![Reply::text(identity, messages::ASK_LAST_NAME)]
            }
        }
    }

    async fn on_free_text(
        &self,
        identity: &str,
        text: &str,
        session: &mut SessionState,
    ) -> Vec<Reply> {
        match session.step {
            Step::AwaitingFreeTextRegistration | Step::AwaitingContact => {
                self.on_free_text_registration(identity, text, session).await
            }
            Step::AwaitingLastNameFollowup => {
                self.on_last_name_followup(identity, text, session).await
            }
            Step::AwaitingNameEdit => {
                self.on_name_edit(identity, text, session, NameField::First)
                    .await
            }
            Step::AwaitingLastNameEdit => {
                self.on_name_edit(identity, text, session, NameField::Last)
                    .await
            }
            step => protocol_ignore(identity, step, "free text"),
        }
    }

    /// `<phone> <first> <last>` in one message. Any failure re-arms the
    /// same step so the user can retry; there is no attempt cutoff.
    async fn on_free_text_registration(
        &self,
        identity: &str,
        text: &str,
        session: &mut SessionState,
    ) -> Vec<Reply> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let [phone, first, last] = tokens.as_slice() else {
            return vec![messages::malformed_registration(identity, self.mode)];
        };

        if let Err(e) = validate_phone_format(phone) {
            return vec![messages::validation_failure(
                identity,
                &e,
                RegistrationMode::FreeText,
            )];
        }
        if let Err(e) = validate_name_length(first, "First name")
            .and_then(|()| validate_name_length(last, "Last name"))
        {
            return vec![messages::validation_failure(
                identity,
                &e,
                RegistrationMode::FreeText,
            )];
        }
        if let Some(reply) = self.phone_conflict_reply(identity, phone).await {
            return vec![reply];
        }

        match self.persist_registration(identity, phone, first, last).await {
            WriteOutcome::Written(profile) => {
                session.clear_pending();
                session.step = Step::EditingOpen;
                vec![messages::profile_card(identity, &profile)]
            }
            WriteOutcome::DuplicatePhone => vec![messages::validation_failure(
                identity,
                &ValidationError::DuplicatePhone,
                RegistrationMode::FreeText,
            )],
            WriteOutcome::Failed => {
                vec![messages::store_failure(identity, RegistrationMode::FreeText)]
            }
        }
    }

    /// The free-text last name completing a contact registration.
    async fn on_last_name_followup(
        &self,
        identity: &str,
        text: &str,
        session: &mut SessionState,
    ) -> Vec<Reply> {
        let last = text.trim();
        if let Err(e) = validate_name_length(last, "Last name") {
            return vec![messages::validation_failure(identity, &e, RegistrationMode::Contact)];
        }

        let (Some(phone), Some(first)) = (
            session.pending_phone_number.clone(),
            session.pending_first_name.clone(),
        ) else {
            // Scratch fields lost (process restart mid-flow). Re-arm the
            // contact step rather than guessing.
            warn!(identity, "Last-name followup with no buffered contact; re-arming");
            session.contact_consumed = false;
            session.step = Step::AwaitingContact;
            return vec![messages::registration_prompt(identity, RegistrationMode::Contact)];
        };

        match self.persist_registration(identity, &phone, &first, last).await {
            WriteOutcome::Written(profile) => {
                session.clear_pending();
                session.step = Step::EditingOpen;
                vec![messages::profile_card(identity, &profile)]
            }
            WriteOutcome::DuplicatePhone => {
                // Someone else claimed the number while we were waiting.
                // The buffered contact is useless now; start the contact
                // step over.
                session.clear_pending();
                session.contact_consumed = false;
                session.step = Step::AwaitingContact;
                vec![messages::validation_failure(
                    identity,
                    &ValidationError::DuplicatePhone,
                    RegistrationMode::Contact,
                )]
            }
            WriteOutcome::Failed => vec![messages::store_failure(identity, RegistrationMode::Contact)],
        }
    }

    async fn on_name_edit(
        &self,
        identity: &str,
        text: &str,
        session: &mut SessionState,
        field: NameField,
    ) -> Vec<Reply> {
        let name = text.trim();
        if let Err(e) = validate_name_length(name, field.label()) {
            return vec![Reply::text(identity, e.to_string())];
        }

        let mut profile = match self.store.find_by_identity(identity).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                debug!(identity, "Name edit ignored: no profile");
                return Vec::new();
            }
            Err(e) => {
                warn!(identity, error = %e, "Profile lookup failed for name edit");
                return vec![Reply::text(identity, messages::STORE_FAILURE)];
            }
        };

        match field {
            NameField::First => profile.first_name = name.to_string(),
            NameField::Last => profile.last_name = name.to_string(),
        }
        profile.updated_at = Utc::now();

        if let Err(e) = self.store.upsert(&profile).await {
            warn!(identity, error = %e, "Failed to persist name edit");
            return vec![Reply::text(identity, messages::STORE_FAILURE)];
        }

        info!(identity, field = field.label(), "Profile name updated");
        session.step = Step::EditingOpen;
        vec![messages::profile_card(identity, &profile)]
    }

    /// Check whether another registered identity already owns this phone.
    /// Returns the reply to send if so (or if the lookup itself failed).
    async fn phone_conflict_reply(&self, identity: &str, phone: &str) -> Option<Reply> {
        match self.store.find_by_phone(phone).await {
            Ok(Some(owner)) if owner.is_registered && owner.identity != identity => {
                Some(messages::validation_failure(
                    identity,
                    &ValidationError::DuplicatePhone,
                    self.mode,
                ))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(identity, error = %e, "Phone uniqueness lookup failed");
                Some(messages::store_failure(identity, self.mode))
            }
        }
    }

    /// Write the completed registration. The store's UNIQUE constraint is
    /// the authority on phone uniqueness under concurrent writers; a
    /// constraint violation is reported as a duplicate, not a fault.
    async fn persist_registration(
        &self,
        identity: &str,
        phone: &str,
        first: &str,
        last: &str,
    ) -> WriteOutcome {
        let mut profile = match self.store.find_by_identity(identity).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                // Reaching a registration step implies the agreement was
                // accepted; keep that invariant if the row went missing.
                let mut profile = UserProfile::new(identity);
                profile.accepted_agreement = true;
                profile
            }
            Err(e) => {
                warn!(identity, error = %e, "Profile lookup failed during registration");
                return WriteOutcome::Failed;
            }
        };

        profile.complete_registration(phone, first, last);

        match self.store.upsert(&profile).await {
            Ok(()) => {
                info!(identity, "User registered successfully");
                WriteOutcome::Written(profile)
            }
            Err(DatabaseError::Constraint(reason)) => {
                info!(identity, %reason, "Registration rejected: duplicate phone");
                WriteOutcome::DuplicatePhone
            }
            Err(e) => {
                warn!(identity, error = %e, "Failed to persist registration");
                WriteOutcome::Failed
            }
        }
    }
}

/// Field selector for the two name-edit steps.
#[derive(Debug, Clone, Copy)]
enum NameField {
    First,
    Last,
}

impl NameField {
    fn label(&self) -> &'static str {
        match self {
            Self::First => "First name",
            Self::Last => "Last name",
        }
    }
}

/// An event arrived in a state that does not accept it. Logged for
/// operator visibility, no user-facing reply.
fn protocol_ignore(identity: &str, step: Step, what: &str) -> Vec<Reply> {
    debug!(identity, %step, what, "Event not valid for current step; ignoring");
    Vec::new()
}
