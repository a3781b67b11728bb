//! End-to-end tests for the registration conversation.
//!
//! Each test drives a real [`ConversationEngine`] over an in-memory
//! libsql store and asserts on the replies and the persisted rows.

use std::sync::Arc;

use signup_bot::channels::{CallbackTag, Choice, EventKind, InboundEvent};
use signup_bot::config::RegistrationMode;
use signup_bot::engine::ConversationEngine;
use signup_bot::session::Step;
use signup_bot::store::{LibSqlStore, ProfileStore};

const AGREEMENT: &str = "By continuing you agree to the terms.";

async fn setup(mode: RegistrationMode) -> (Arc<LibSqlStore>, ConversationEngine) {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let engine = ConversationEngine::new(store.clone(), AGREEMENT, mode);
    (store, engine)
}

fn start(identity: &str) -> InboundEvent {
    InboundEvent::new(identity, EventKind::StartCommand)
}

fn callback(identity: &str, tag: CallbackTag) -> InboundEvent {
    InboundEvent::new(identity, EventKind::Callback(tag))
}

fn text(identity: &str, body: &str) -> InboundEvent {
    InboundEvent::new(identity, EventKind::FreeText(body.to_string()))
}

/// Run a user through /start + accept so the registration step is armed.
async fn accept_agreement(engine: &ConversationEngine, identity: &str) {
    engine.handle_event(start(identity)).await;
    engine
        .handle_event(callback(identity, CallbackTag::Accept))
        .await;
}

/// Register a user end to end via the free-text form.
async fn register(engine: &ConversationEngine, identity: &str, phone: &str) {
    accept_agreement(engine, identity).await;
    engine
        .handle_event(text(identity, &format!("{phone} Ivan Petrov")))
        .await;
}

#[tokio::test]
async fn fresh_start_walks_through_agreement() {
    let (_store, engine) = setup(RegistrationMode::Contact).await;

    let replies = engine.handle_event(start("100")).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains(AGREEMENT));
    assert_eq!(replies[0].choices, vec![Choice::Accept, Choice::Decline]);

    let replies = engine.handle_event(callback("100", CallbackTag::Accept)).await;
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[1].choices, vec![Choice::ShareContact]);
    assert_eq!(engine.session("100").await.step, Step::AwaitingContact);
}

#[tokio::test]
async fn free_text_registration_persists_profile() {
    let (store, engine) = setup(RegistrationMode::FreeText).await;
    accept_agreement(&engine, "100").await;

    let replies = engine
        .handle_event(text("100", "12345678901 Ivan Petrov"))
        .await;

    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("First name: Ivan"));
    assert!(replies[0].text.contains("Last name: Petrov"));
    assert_eq!(
        replies[0].choices,
        vec![Choice::EditName, Choice::EditLastName, Choice::FinishEditing]
    );
    assert_eq!(engine.session("100").await.step, Step::EditingOpen);

    let profile = store.find_by_identity("100").await.unwrap().unwrap();
    assert!(profile.is_registered);
    assert!(profile.accepted_agreement);
    assert_eq!(profile.phone_number.as_deref(), Some("12345678901"));
    assert_eq!(profile.first_name, "Ivan");
    assert_eq!(profile.last_name, "Petrov");
}

#[tokio::test]
async fn short_phone_is_rejected_and_retry_succeeds() {
    let (store, engine) = setup(RegistrationMode::FreeText).await;
    accept_agreement(&engine, "100").await;

    let replies = engine.handle_event(text("100", "123456789 Ivan Petrov")).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("10 to 18 digits"));
    assert_eq!(
        engine.session("100").await.step,
        Step::AwaitingFreeTextRegistration
    );
    let profile = store.find_by_identity("100").await.unwrap().unwrap();
    assert!(!profile.is_registered);

    let replies = engine.handle_event(text("100", "1234567890 Ivan Petrov")).await;
    assert!(replies[0].text.starts_with("Your account:"));
}

#[tokio::test]
async fn malformed_free_text_keeps_step_armed() {
    let (_store, engine) = setup(RegistrationMode::FreeText).await;
    accept_agreement(&engine, "100").await;

    let replies = engine.handle_event(text("100", "just hello")).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].choices.is_empty());
    assert_eq!(
        engine.session("100").await.step,
        Step::AwaitingFreeTextRegistration
    );
}

#[tokio::test]
async fn malformed_text_in_contact_mode_reoffers_contact_button() {
    let (_store, engine) = setup(RegistrationMode::Contact).await;
    accept_agreement(&engine, "100").await;

    let replies = engine.handle_event(text("100", "just hello")).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("share your contact"));
    assert_eq!(replies[0].choices, vec![Choice::ShareContact]);
    assert_eq!(engine.session("100").await.step, Step::AwaitingContact);
}

#[tokio::test]
async fn repeated_agreement_press_reports_already_accepted() {
    let (_store, engine) = setup(RegistrationMode::Contact).await;
    accept_agreement(&engine, "100").await;

    // A second press of either button after the step moved on still gets
    // an answer instead of silence.
    for tag in [CallbackTag::Accept, CallbackTag::Decline] {
        let replies = engine.handle_event(callback("100", tag)).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, "You have already accepted the agreement.");
        assert_eq!(engine.session("100").await.step, Step::AwaitingContact);
    }
}

#[tokio::test]
async fn agreement_press_without_profile_stays_silent() {
    let (_store, engine) = setup(RegistrationMode::Contact).await;

    let replies = engine.handle_event(callback("100", CallbackTag::Accept)).await;
    assert!(replies.is_empty());
    assert_eq!(engine.session("100").await.step, Step::Start);
}

#[tokio::test]
async fn name_length_boundary() {
    let (_store, engine) = setup(RegistrationMode::FreeText).await;
    accept_agreement(&engine, "100").await;

    let long_name = "a".repeat(50);
    let replies = engine
        .handle_event(text("100", &format!("12345678901 {long_name} Petrov")))
        .await;
    assert!(replies[0].text.contains("shorter than 50 characters"));

    let ok_name = "a".repeat(49);
    let replies = engine
        .handle_event(text("100", &format!("12345678901 {ok_name} Petrov")))
        .await;
    assert!(replies[0].text.starts_with("Your account:"));
}

#[tokio::test]
async fn name_edit_window_opens_and_closes() {
    let (store, engine) = setup(RegistrationMode::FreeText).await;
    register(&engine, "100", "12345678901").await;

    let replies = engine
        .handle_event(callback("100", CallbackTag::EditName))
        .await;
    assert_eq!(replies[0].text, "Enter a new first name:");
    assert_eq!(engine.session("100").await.step, Step::AwaitingNameEdit);

    let replies = engine.handle_event(text("100", "Maria")).await;
    assert!(replies[0].text.contains("First name: Maria"));
    assert_eq!(engine.session("100").await.step, Step::EditingOpen);

    let profile = store.find_by_identity("100").await.unwrap().unwrap();
    assert_eq!(profile.first_name, "Maria");
    assert_eq!(profile.last_name, "Petrov");

    // Close the window; edit callbacks become silent no-ops.
    let replies = engine
        .handle_event(callback("100", CallbackTag::FinishEditing))
        .await;
    assert_eq!(replies[0].text, "Registration complete.");

    let replies = engine
        .handle_event(callback("100", CallbackTag::EditLastName))
        .await;
    assert!(replies.is_empty());
    assert_eq!(engine.session("100").await.step, Step::EditingClosed);
}

#[tokio::test]
async fn overlong_edit_is_rejected_and_step_stays() {
    let (store, engine) = setup(RegistrationMode::FreeText).await;
    register(&engine, "100", "12345678901").await;
    engine
        .handle_event(callback("100", CallbackTag::EditLastName))
        .await;

    let replies = engine.handle_event(text("100", &"x".repeat(80))).await;
    assert!(replies[0].text.contains("shorter than 50 characters"));
    assert_eq!(engine.session("100").await.step, Step::AwaitingLastNameEdit);

    let profile = store.find_by_identity("100").await.unwrap().unwrap();
    assert_eq!(profile.last_name, "Petrov");
}

#[tokio::test]
async fn restart_shows_profile_card_for_registered_user() {
    let (_store, engine) = setup(RegistrationMode::FreeText).await;
    register(&engine, "100", "12345678901").await;

    let replies = engine.handle_event(start("100")).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.starts_with("Your account:"));
    assert_eq!(engine.session("100").await.step, Step::EditingOpen);
}

#[tokio::test]
async fn duplicate_phone_rejected_for_second_identity() {
    let (store, engine) = setup(RegistrationMode::FreeText).await;
    register(&engine, "100", "12345678901").await;

    accept_agreement(&engine, "200").await;
    let replies = engine
        .handle_event(text("200", "12345678901 Anna Sidorova"))
        .await;

    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("already registered"));
    assert_eq!(
        engine.session("200").await.step,
        Step::AwaitingFreeTextRegistration
    );
    assert!(!store.find_by_identity("200").await.unwrap().unwrap().is_registered);

    // The same number still belongs to the first user.
    let owner = store.find_by_phone("12345678901").await.unwrap().unwrap();
    assert_eq!(owner.identity, "100");
}

#[tokio::test]
async fn concurrent_same_phone_has_single_winner() {
    let (store, engine) = setup(RegistrationMode::FreeText).await;
    let engine = Arc::new(engine);
    accept_agreement(&engine, "100").await;
    accept_agreement(&engine, "200").await;

    let a = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.handle_event(text("100", "12345678901 Ivan Petrov")).await })
    };
    let b = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine.handle_event(text("200", "12345678901 Anna Sidorova")).await
        })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let cards = [&a, &b]
        .iter()
        .filter(|r| r[0].text.starts_with("Your account:"))
        .count();
    let duplicates = [&a, &b]
        .iter()
        .filter(|r| r[0].text.contains("already registered"))
        .count();
    assert_eq!(cards, 1);
    assert_eq!(duplicates, 1);

    let owner = store.find_by_phone("12345678901").await.unwrap().unwrap();
    assert!(owner.identity == "100" || owner.identity == "200");
}

#[tokio::test]
async fn contact_followup_flow_registers() {
    let (store, engine) = setup(RegistrationMode::Contact).await;
    accept_agreement(&engine, "100").await;

    let replies = engine
        .handle_event(InboundEvent::new(
            "100",
            EventKind::ContactShared {
                phone_number: Some("12345678901".to_string()),
                first_name: "Ivan".to_string(),
                last_name: None,
            },
        ))
        .await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("no last name"));

    let replies = engine.handle_event(text("100", "Petrov")).await;
    assert!(replies[0].text.starts_with("Your account:"));

    let profile = store.find_by_identity("100").await.unwrap().unwrap();
    assert!(profile.is_registered);
    assert_eq!(profile.first_name, "Ivan");
    assert_eq!(profile.last_name, "Petrov");
}

#[tokio::test]
async fn stray_text_outside_any_step_is_silent() {
    let (_store, engine) = setup(RegistrationMode::Contact).await;

    let replies = engine.handle_event(text("100", "hello there")).await;
    assert!(replies.is_empty());
    assert_eq!(engine.session("100").await.step, Step::Start);
}
