use secrecy::SecretString;
use std::path::{Path, PathBuf};

use super::verification::DEFAULT_WEB_PORT;

/// Process-level settings read from the environment
pub struct BotSettings {
    pub discord_token: SecretString,
    pub state_path: PathBuf,
    pub web_bind: String,
    pub web_port: u16,
    pub log_level: tracing::Level,
}

impl BotSettings {
    /// Read settings from environment variables. Returns `None` if
    /// `DISCORD_TOKEN` is missing.
    pub fn from_env() -> Option<Self> {
        let discord_token = std::env::var("DISCORD_TOKEN").ok()?;

        Some(Self {
            discord_token: SecretString::from(discord_token),
            state_path: std::env::var("STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("state")),
            web_bind: std::env::var("WEB_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: std::env::var("WEB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WEB_PORT),
            log_level: std::env::var("LOG_LEVEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(tracing::Level::INFO),
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_file("verifier_config.json")
    }

    pub fn verified_members_file(&self) -> PathBuf {
        self.state_file("verified_members.json")
    }

    pub fn incorrect_answers_file(&self) -> PathBuf {
        self.state_file("incorrect_answers.json")
    }

    fn state_file(&self, name: &str) -> PathBuf {
        Path::new(&self.state_path).join(name)
    }
}
