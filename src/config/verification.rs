use poise::serenity_prelude::{GuildId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum length accepted for the token signing secret
pub const MIN_SECRET_LENGTH: usize = 32;

/// Port the callback server binds when none is configured
pub const DEFAULT_WEB_PORT: u16 = 8080;

/// A verification question and the answers that pass it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub answers: Vec<String>,
}

impl Question {
    /// Build a question, dropping blank and duplicate answers while keeping
    /// their order
    pub fn new(prompt: impl Into<String>, answers: impl IntoIterator<Item = String>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for answer in answers {
            let answer = answer.trim().to_string();
            if !answer.is_empty() && !unique.contains(&answer) {
                unique.push(answer);
            }
        }
        Self {
            prompt: prompt.into().trim().to_string(),
            answers: unique,
        }
    }

    /// A question with no prompt or no answers cannot be asked
    pub fn is_usable(&self) -> bool {
        !self.prompt.is_empty() && !self.answers.is_empty()
    }
}

/// Split a comma-separated answer list as typed in a command
pub fn parse_answer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings shared by every guild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalVerificationConfig {
    /// Fallback question for guilds without an override
    pub question: Option<Question>,

    /// HMAC secret for verification tokens
    pub jwt_secret: Option<String>,

    /// Callback server port; `None` means the process default
    pub port: Option<u16>,

    /// Base URL the verification link points at
    pub verification_url: Option<String>,
}

impl GlobalVerificationConfig {
    pub fn has_valid_secret(&self) -> bool {
        self.jwt_secret
            .as_deref()
            .map(|s| s.len() >= MIN_SECRET_LENGTH)
            .unwrap_or(false)
    }
}

/// Per-guild verification settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildVerificationConfig {
    pub role_id: Option<RoleId>,
    pub kick_on_fail: bool,
    pub verification_enabled: bool,
    pub verify_on_join: bool,

    /// Overrides the global question when set
    pub question: Option<Question>,
}

impl GuildVerificationConfig {
    /// Role granted by verification, if verification is switched on here
    pub fn active_role(&self) -> Option<RoleId> {
        if self.verification_enabled {
            self.role_id
        } else {
            None
        }
    }
}

/// The persisted configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Schema version
    pub version: u32,

    pub global: GlobalVerificationConfig,

    /// Guild ID (as string) -> settings
    pub guilds: HashMap<String, GuildVerificationConfig>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            version: 1,
            global: GlobalVerificationConfig::default(),
            guilds: HashMap::new(),
        }
    }
}

impl VerifierConfig {
    /// Settings for a guild, defaults if it was never configured
    pub fn guild(&self, guild_id: GuildId) -> GuildVerificationConfig {
        self.guilds
            .get(&guild_id.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub fn guild_mut(&mut self, guild_id: GuildId) -> &mut GuildVerificationConfig {
        self.guilds.entry(guild_id.to_string()).or_default()
    }

    /// Problems that keep verification from working in a guild
    pub fn warnings(&self, guild_id: GuildId) -> Vec<String> {
        let guild = self.guild(guild_id);
        let mut warnings = Vec::new();

        if !self.global.has_valid_secret() {
            warnings.push("⚠️ JWT secret not configured or too short".to_string());
        }
        let has_question = guild.question.as_ref().is_some_and(Question::is_usable)
            || self.global.question.as_ref().is_some_and(Question::is_usable);
        if !has_question {
            warnings.push("⚠️ Verification question not set".to_string());
        }
        if guild.role_id.is_none() {
            warnings.push("⚠️ Verified role not set".to_string());
        }
        if !self.has_verification_url() {
            warnings.push("⚠️ Verification URL not set".to_string());
        }

        warnings
    }

    /// Problems that affect every guild, reported at startup
    pub fn global_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.global.has_valid_secret() {
            warnings.push("JWT secret not configured or too short; run /verifyset setsecret".to_string());
        }
        if !self.has_verification_url() {
            warnings.push("Verification URL not set; run /verifyset url".to_string());
        }
        warnings
    }

    fn has_verification_url(&self) -> bool {
        self.global
            .verification_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}
