use std::sync::Arc;

use signup_bot::channels::{Channel, CliChannel, TelegramChannel};
use signup_bot::config::{BotConfig, RegistrationMode};
use signup_bot::engine::{ConversationEngine, EventRouter};
use signup_bot::store::{LibSqlStore, ProfileStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration: {}", e);
        std::process::exit(1);
    });

    eprintln!("📝 Signup Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   Registration mode: {}",
        match config.registration_mode {
            RegistrationMode::FreeText => "free text",
            RegistrationMode::Contact => "contact share",
        }
    );

    let agreement_text = config.load_agreement().unwrap_or_else(|e| {
        eprintln!(
            "Error: could not read agreement at {}: {}",
            config.agreement_path.display(),
            e
        );
        std::process::exit(1);
    });

    let store: Arc<dyn ProfileStore> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    let engine = Arc::new(ConversationEngine::new(
        store,
        agreement_text,
        config.registration_mode,
    ));

    let channel: Arc<dyn Channel> = match config.telegram_token {
        Some(token) => {
            eprintln!("   Channel: telegram\n");
            Arc::new(TelegramChannel::new(token))
        }
        None => {
            eprintln!("   Channel: cli (set TELEGRAM_BOT_TOKEN to go live)");
            eprintln!("   Type /start to begin. Ctrl-D to exit.\n");
            Arc::new(CliChannel::new())
        }
    };

    channel.health_check().await?;
    let mut events = channel.start().await?;
    tracing::info!(channel = channel.name(), "Bot started");

    // One worker per identity keeps each user's events in arrival order
    // while distinct users never block each other.
    let router = EventRouter::new(Arc::clone(&engine), Arc::clone(&channel));

    use futures::StreamExt;
    while let Some(event) = events.next().await {
        router.route(event).await;
    }

    channel.shutdown().await?;
    Ok(())
}
