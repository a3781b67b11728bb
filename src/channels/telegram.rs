//! Telegram channel — long-polls the Bot API for updates.
//!
//! Parses messages, shared contacts, and callback-query button presses into
//! [`InboundEvent`]s, and renders the engine's logical choice sets as inline
//! keyboards (callbacks) or a reply keyboard with `request_contact`.

use async_trait::async_trait;

use crate::channels::{
    CallbackTag, Channel, Choice, EventKind, EventStream, InboundEvent, Reply,
};
use crate::error::ChannelError;

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Build the `reply_markup` value for a choice set.
    ///
    /// `ShareContact` becomes a one-time reply keyboard with
    /// `request_contact`; everything else becomes inline-keyboard rows of
    /// two buttons.
    fn reply_markup(choices: &[Choice]) -> Option<serde_json::Value> {
        if choices.is_empty() {
            return None;
        }

        if choices.contains(&Choice::ShareContact) {
            return Some(serde_json::json!({
                "keyboard": [[{
                    "text": Choice::ShareContact.label(),
                    "request_contact": true
                }]],
                "resize_keyboard": true,
                "one_time_keyboard": true
            }));
        }

        let buttons: Vec<serde_json::Value> = choices
            .iter()
            .filter_map(|c| {
                c.callback().map(|tag| {
                    serde_json::json!({
                        "text": c.label(),
                        "callback_data": tag.as_str()
                    })
                })
            })
            .collect();
        let rows: Vec<Vec<serde_json::Value>> =
            buttons.chunks(2).map(|chunk| chunk.to_vec()).collect();

        Some(serde_json::json!({ "inline_keyboard": rows }))
    }
}

/// Parse one Telegram update into an event, if it is one we handle.
/// Returns the event plus the callback query id to acknowledge, if any.
fn parse_update(update: &serde_json::Value) -> Option<(InboundEvent, Option<String>)> {
    if let Some(callback) = update.get("callback_query") {
        let identity = callback
            .get("from")
            .and_then(|f| f.get("id"))
            .and_then(serde_json::Value::as_i64)?
            .to_string();
        let callback_id = callback
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from);
        let data = callback.get("data").and_then(|v| v.as_str())?;
        let tag = CallbackTag::parse(data)?;
        return Some((
            InboundEvent::new(identity, EventKind::Callback(tag)),
            callback_id,
        ));
    }

    let message = update.get("message")?;
    let identity = message
        .get("from")
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)?
        .to_string();

    if let Some(contact) = message.get("contact") {
        let phone_number = contact
            .get("phone_number")
            .and_then(|v| v.as_str())
            .map(String::from);
        let first_name = contact
            .get("first_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let last_name = contact
            .get("last_name")
            .and_then(|v| v.as_str())
            .map(String::from);
        return Some((
            InboundEvent::new(
                identity,
                EventKind::ContactShared {
                    phone_number,
                    first_name,
                    last_name,
                },
            ),
            None,
        ));
    }

    let text = message.get("text").and_then(|v| v.as_str())?;
    let kind = if text.trim() == "/start" {
        EventKind::StartCommand
    } else {
        EventKind::FreeText(text.to_string())
    };
    Some((InboundEvent::new(identity, kind), None))
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for updates...");

            loop {
                let url = format!("https://api.telegram.org/bot{bot_token}/getUpdates");
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                    for update in results {
                        if let Some(uid) =
                            update.get("update_id").and_then(serde_json::Value::as_i64)
                        {
                            offset = uid + 1;
                        }

                        let Some((event, callback_id)) = parse_update(update) else {
                            continue;
                        };

                        // Acknowledge button presses so the client stops
                        // showing a spinner.
                        if let Some(id) = callback_id {
                            let _ = client
                                .post(format!(
                                    "https://api.telegram.org/bot{bot_token}/answerCallbackQuery"
                                ))
                                .json(&serde_json::json!({ "callback_query_id": id }))
                                .send()
                                .await;
                        }

                        if tx.send(event).is_err() {
                            tracing::info!("Telegram listener channel closed");
                            return;
                        }
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(&self, reply: &Reply) -> Result<(), ChannelError> {
        // Private chats: the chat id equals the user id.
        let mut body = serde_json::json!({
            "chat_id": reply.identity,
            "text": reply.text,
        });
        if let Some(markup) = Self::reply_markup(&reply.choices) {
            body["reply_markup"] = markup;
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_api_url() {
        let ch = TelegramChannel::new("123:ABC".into());
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn parse_start_command() {
        let update = serde_json::json!({
            "update_id": 1,
            "message": { "from": { "id": 42 }, "text": "/start" }
        });
        let (event, callback_id) = parse_update(&update).unwrap();
        assert_eq!(event.identity, "42");
        assert_eq!(event.kind, EventKind::StartCommand);
        assert!(callback_id.is_none());
    }

    #[test]
    fn parse_free_text() {
        let update = serde_json::json!({
            "update_id": 1,
            "message": { "from": { "id": 42 }, "text": "12345678901 Ivan Petrov" }
        });
        let (event, _) = parse_update(&update).unwrap();
        assert_eq!(
            event.kind,
            EventKind::FreeText("12345678901 Ivan Petrov".into())
        );
    }

    #[test]
    fn parse_contact_with_last_name() {
        let update = serde_json::json!({
            "update_id": 1,
            "message": {
                "from": { "id": 42 },
                "contact": {
                    "phone_number": "12345678901",
                    "first_name": "Ivan",
                    "last_name": "Petrov"
                }
            }
        });
        let (event, _) = parse_update(&update).unwrap();
        assert_eq!(
            event.kind,
            EventKind::ContactShared {
                phone_number: Some("12345678901".into()),
                first_name: "Ivan".into(),
                last_name: Some("Petrov".into()),
            }
        );
    }

    #[test]
    fn parse_contact_without_phone() {
        let update = serde_json::json!({
            "update_id": 1,
            "message": {
                "from": { "id": 42 },
                "contact": { "first_name": "Ivan" }
            }
        });
        let (event, _) = parse_update(&update).unwrap();
        assert_eq!(
            event.kind,
            EventKind::ContactShared {
                phone_number: None,
                first_name: "Ivan".into(),
                last_name: None,
            }
        );
    }

    #[test]
    fn parse_callback_query() {
        let update = serde_json::json!({
            "update_id": 1,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 42 },
                "data": "edit_name"
            }
        });
        let (event, callback_id) = parse_update(&update).unwrap();
        assert_eq!(event.kind, EventKind::Callback(CallbackTag::EditName));
        assert_eq!(callback_id.as_deref(), Some("cb-1"));
    }

    #[test]
    fn parse_unknown_callback_is_dropped() {
        let update = serde_json::json!({
            "update_id": 1,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 42 },
                "data": "definitely_not_ours"
            }
        });
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn parse_ignores_non_text_messages() {
        let update = serde_json::json!({
            "update_id": 1,
            "message": { "from": { "id": 42 }, "sticker": {} }
        });
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn reply_markup_inline_keyboard_rows_of_two() {
        let markup = TelegramChannel::reply_markup(&[
            Choice::EditName,
            Choice::EditLastName,
            Choice::FinishEditing,
        ])
        .unwrap();
        let rows = markup["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_array().unwrap().len(), 2);
        assert_eq!(rows[1].as_array().unwrap().len(), 1);
        assert_eq!(rows[0][0]["callback_data"], "edit_name");
    }

    #[test]
    fn reply_markup_contact_request() {
        let markup = TelegramChannel::reply_markup(&[Choice::ShareContact]).unwrap();
        assert_eq!(markup["keyboard"][0][0]["request_contact"], true);
        assert_eq!(markup["one_time_keyboard"], true);
    }

    #[test]
    fn reply_markup_empty_for_plain_message() {
        assert!(TelegramChannel::reply_markup(&[]).is_none());
    }
}
