//! User-facing reply texts and the choice sets that accompany them.

use crate::channels::{Choice, Reply};
use crate::config::RegistrationMode;
use crate::error::ValidationError;
use crate::profile::UserProfile;

pub const ACCEPTED: &str = "Accepted!";
pub const DECLINED: &str = "You declined registration.";
pub const ALREADY_ACCEPTED: &str = "You have already accepted the agreement.";
pub const ASK_LAST_NAME: &str = "Your contact has no last name. Please send it as a message:";
pub const ASK_NEW_FIRST_NAME: &str = "Enter a new first name:";
pub const ASK_NEW_LAST_NAME: &str = "Enter a new last name:";
pub const EDITING_FINISHED: &str = "Registration complete.";
pub const STORE_FAILURE: &str =
    "Something went wrong while saving your data. Please try again.";

pub const FREE_TEXT_HINT: &str =
    "To register, send your phone number, first name and last name separated by spaces.";
pub const CONTACT_HINT: &str = "To register, share your contact with the button below.";

/// The agreement prompt with accept/decline choices.
pub fn agreement(identity: &str, agreement_text: &str) -> Reply {
    Reply::text(identity, agreement_text)
        .with_choices(vec![Choice::Accept, Choice::Decline])
}

/// The registration prompt for the configured input mode.
pub fn registration_prompt(identity: &str, mode: RegistrationMode) -> Reply {
    match mode {
        RegistrationMode::FreeText => Reply::text(identity, FREE_TEXT_HINT),
        RegistrationMode::Contact => {
            Reply::text(identity, CONTACT_HINT).with_choices(vec![Choice::ShareContact])
        }
    }
}

/// The profile card with the edit choices.
pub fn profile_card(identity: &str, profile: &UserProfile) -> Reply {
    let text = format!(
        "Your account:\nFirst name: {}\nLast name: {}",
        profile.first_name, profile.last_name
    );
    Reply::text(identity, text).with_choices(vec![
        Choice::EditName,
        Choice::EditLastName,
        Choice::FinishEditing,
    ])
}

/// A validation failure, with the retry hint for the step being re-armed.
pub fn validation_failure(
    identity: &str,
    error: &ValidationError,
    mode: RegistrationMode,
) -> Reply {
    let hint = match mode {
        RegistrationMode::FreeText => FREE_TEXT_HINT,
        RegistrationMode::Contact => CONTACT_HINT,
    };
    let reply = Reply::text(identity, format!("{error}\n{hint}"));
    match mode {
        RegistrationMode::Contact => reply.with_choices(vec![Choice::ShareContact]),
        RegistrationMode::FreeText => reply,
    }
}

/// A malformed free-text registration message (token count ≠ 3), with the
/// hint for the configured input mode.
pub fn malformed_registration(identity: &str, mode: RegistrationMode) -> Reply {
    let hint = match mode {
        RegistrationMode::FreeText => FREE_TEXT_HINT,
        RegistrationMode::Contact => CONTACT_HINT,
    };
    let reply = Reply::text(identity, format!("That doesn't look right.\n{hint}"));
    match mode {
        RegistrationMode::Contact => reply.with_choices(vec![Choice::ShareContact]),
        RegistrationMode::FreeText => reply,
    }
}

/// A failed durable write during registration, with the retry prompt.
pub fn store_failure(identity: &str, mode: RegistrationMode) -> Reply {
    let hint = match mode {
        RegistrationMode::FreeText => FREE_TEXT_HINT,
        RegistrationMode::Contact => CONTACT_HINT,
    };
    Reply::text(identity, format!("{STORE_FAILURE}\n{hint}"))
}
