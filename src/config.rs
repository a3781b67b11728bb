//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// How a new user supplies their phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// One free-text message: `<phone> <first name> <last name>`.
    FreeText,
    /// The platform's native contact-sharing button.
    Contact,
}

impl Default for RegistrationMode {
    fn default() -> Self {
        Self::Contact
    }
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Path to the profile database file.
    pub db_path: PathBuf,
    /// Path to the agreement text shown before registration.
    pub agreement_path: PathBuf,
    /// Telegram bot token. When absent the bot runs CLI-only.
    pub telegram_token: Option<String>,
    /// Registration input mode.
    pub registration_mode: RegistrationMode,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/signup-bot.db"),
            agreement_path: PathBuf::from("./agreement.txt"),
            telegram_token: None,
            registration_mode: RegistrationMode::default(),
        }
    }
}

impl BotConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// `SIGNUP_BOT_DB_PATH`, `SIGNUP_BOT_AGREEMENT_PATH`, `TELEGRAM_BOT_TOKEN`,
    /// `SIGNUP_BOT_REGISTRATION_MODE` (`free_text` | `contact`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SIGNUP_BOT_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SIGNUP_BOT_AGREEMENT_PATH") {
            config.agreement_path = PathBuf::from(path);
        }
        config.telegram_token = std::env::var("TELEGRAM_BOT_TOKEN").ok();

        if let Ok(mode) = std::env::var("SIGNUP_BOT_REGISTRATION_MODE") {
            config.registration_mode = match mode.as_str() {
                "free_text" => RegistrationMode::FreeText,
                "contact" => RegistrationMode::Contact,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "SIGNUP_BOT_REGISTRATION_MODE".to_string(),
                        message: format!("expected 'free_text' or 'contact', got '{other}'"),
                    });
                }
            };
        }

        Ok(config)
    }

    /// Load the agreement text blob. Relayed verbatim to users.
    pub fn load_agreement(&self) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(&self.agreement_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BotConfig::default();
        assert_eq!(config.registration_mode, RegistrationMode::Contact);
        assert!(config.telegram_token.is_none());
    }

    #[test]
    fn load_agreement_missing_file() {
        let config = BotConfig {
            agreement_path: PathBuf::from("/nonexistent/agreement.txt"),
            ..BotConfig::default()
        };
        assert!(config.load_agreement().is_err());
    }
}
