//! Channel abstraction: inbound events, outbound replies, and the
//! transport trait that carries both.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A callback button the user pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackTag {
    Accept,
    Decline,
    EditName,
    EditLastName,
    FinishEditing,
}

impl CallbackTag {
    /// Parse a channel-native callback payload.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "accept" => Some(Self::Accept),
            "decline" => Some(Self::Decline),
            "edit_name" => Some(Self::EditName),
            "edit_last_name" => Some(Self::EditLastName),
            "finish_editing" => Some(Self::FinishEditing),
            _ => None,
        }
    }

    /// The wire string rendered into a button's callback payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::EditName => "edit_name",
            Self::EditLastName => "edit_last_name",
            Self::FinishEditing => "finish_editing",
        }
    }
}

/// What kind of inbound event arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The start command (`/start`).
    StartCommand,
    /// A callback button press.
    Callback(CallbackTag),
    /// The platform's contact-sharing primitive.
    ContactShared {
        /// Phone number from the contact payload, if any.
        phone_number: Option<String>,
        /// First name supplied by the platform.
        first_name: String,
        /// Last name supplied by the platform, if the user has one set.
        last_name: Option<String>,
    },
    /// A plain text message.
    FreeText(String),
}

/// An inbound event, tagged with the identity it belongs to.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Opaque, stable identifier of the chat participant.
    pub identity: String,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(identity: impl Into<String>, kind: EventKind) -> Self {
        Self {
            identity: identity.into(),
            kind,
        }
    }
}

/// A labeled action offered alongside a reply. The transport renders these
/// with its native UI primitives; the engine only deals in the logical set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Accept,
    Decline,
    EditName,
    EditLastName,
    FinishEditing,
    /// Ask the platform to offer its contact-sharing button.
    ShareContact,
}

impl Choice {
    /// Human-readable button label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accept => "Accept",
            Self::Decline => "Decline",
            Self::EditName => "Edit first name",
            Self::EditLastName => "Edit last name",
            Self::FinishEditing => "Finish editing",
            Self::ShareContact => "Share my contact",
        }
    }

    /// The callback tag a press of this button produces, if any.
    /// `ShareContact` produces a contact event instead.
    pub fn callback(&self) -> Option<CallbackTag> {
        match self {
            Self::Accept => Some(CallbackTag::Accept),
            Self::Decline => Some(CallbackTag::Decline),
            Self::EditName => Some(CallbackTag::EditName),
            Self::EditLastName => Some(CallbackTag::EditLastName),
            Self::FinishEditing => Some(CallbackTag::FinishEditing),
            Self::ShareContact => None,
        }
    }
}

/// An outbound prompt for one identity.
#[derive(Debug, Clone)]
pub struct Reply {
    pub identity: String,
    pub text: String,
    /// Ordered choice set, empty for plain messages.
    pub choices: Vec<Choice>,
}

impl Reply {
    pub fn text(identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            text: text.into(),
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }
}

/// Stream of inbound events produced by a channel.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// A transport that delivers inbound events and carries replies back.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Start listening and return the event stream.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Deliver a reply to the user it addresses.
    async fn respond(&self, reply: &Reply) -> Result<(), ChannelError>;

    /// Verify the channel can reach its backing service.
    async fn health_check(&self) -> Result<(), ChannelError>;

    /// Shut the channel down.
    async fn shutdown(&self) -> Result<(), ChannelError>;
}
