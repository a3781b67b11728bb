//! CLI channel — stdin/stdout REPL for local testing.
//!
//! Button presses become slash commands (`/accept`, `/edit_name`, ...) and a
//! shared contact is simulated with `/contact <phone> <first> [last]`.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{
    CallbackTag, Channel, EventKind, EventStream, InboundEvent, Reply,
};
use crate::error::ChannelError;

const CLI_IDENTITY: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Map one input line to an event, or None for lines we don't handle.
fn parse_line(line: &str) -> Option<EventKind> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix("/contact") {
        let mut parts = rest.split_whitespace();
        let phone_number = parts.next().map(String::from);
        let first_name = parts.next().unwrap_or_default().to_string();
        let last_name = parts.next().map(String::from);
        return Some(EventKind::ContactShared {
            phone_number,
            first_name,
            last_name,
        });
    }

    match line {
        "/start" => Some(EventKind::StartCommand),
        cmd if cmd.starts_with('/') => {
            CallbackTag::parse(&cmd[1..]).map(EventKind::Callback)
        }
        text => Some(EventKind::FreeText(text.to_string())),
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(kind) = parse_line(&line) else {
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(InboundEvent::new(CLI_IDENTITY, kind)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(&self, reply: &Reply) -> Result<(), ChannelError> {
        println!("\n{}", reply.text);
        if !reply.choices.is_empty() {
            let labels: Vec<String> = reply
                .choices
                .iter()
                .map(|c| match c.callback() {
                    Some(tag) => format!("[/{}]", tag.as_str()),
                    None => format!("[{}]", c.label()),
                })
                .collect();
            println!("{}", labels.join(" "));
        }
        println!();
        eprint!("> ");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
