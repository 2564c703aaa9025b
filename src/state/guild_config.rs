use poise::serenity_prelude::{GuildId, RoleId};
use std::path::Path;

use super::store::JsonStore;
use crate::config::{
    GlobalVerificationConfig, GuildVerificationConfig, Question, VerifierConfig,
    MIN_SECRET_LENGTH,
};
use crate::error::{BotError, Result};
use crate::verification::question::{clear_guild_question, resolve_question, ClearOverride, ResolvedQuestion};

/// Persisted global and per-guild verification settings
pub struct ConfigStore {
    store: JsonStore<VerifierConfig>,
}

impl ConfigStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: JsonStore::open(path).await?,
        })
    }

    pub fn in_memory(config: VerifierConfig) -> Self {
        Self {
            store: JsonStore::in_memory(config),
        }
    }

    pub async fn snapshot(&self) -> VerifierConfig {
        self.store.snapshot().await
    }

    pub async fn global(&self) -> GlobalVerificationConfig {
        self.store.read(|c| c.global.clone()).await
    }

    pub async fn guild(&self, guild_id: GuildId) -> GuildVerificationConfig {
        self.store.read(|c| c.guild(guild_id)).await
    }

    pub async fn resolve_question(&self, guild_id: GuildId) -> ResolvedQuestion {
        self.store.read(|c| resolve_question(c, guild_id)).await
    }

    pub async fn update_guild<R>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut GuildVerificationConfig) -> R,
    ) -> Result<R> {
        self.store.update(|c| f(c.guild_mut(guild_id))).await
    }

    pub async fn set_role(&self, guild_id: GuildId, role_id: Option<RoleId>) -> Result<()> {
        self.update_guild(guild_id, |g| g.role_id = role_id).await
    }

    pub async fn set_guild_question(&self, guild_id: GuildId, question: Question) -> Result<()> {
        validate_question(&question)?;
        self.update_guild(guild_id, |g| g.question = Some(question))
            .await
    }

    /// Remove the guild override, refusing if no global fallback exists
    pub async fn clear_guild_question(&self, guild_id: GuildId) -> Result<ClearOverride> {
        self.store
            .update(|c| clear_guild_question(c, guild_id))
            .await
    }

    pub async fn set_global_question(&self, question: Question) -> Result<()> {
        validate_question(&question)?;
        self.store
            .update(|c| c.global.question = Some(question))
            .await
    }

    /// Returns whether a global question was set
    pub async fn clear_global_question(&self) -> Result<bool> {
        self.store
            .update(|c| c.global.question.take().is_some())
            .await
    }

    pub async fn set_secret(&self, secret: &str) -> Result<()> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(BotError::ConfigValidation {
                message: format!(
                    "JWT secret must be at least {} characters long",
                    MIN_SECRET_LENGTH
                ),
            });
        }
        let secret = secret.to_string();
        self.store
            .update(|c| c.global.jwt_secret = Some(secret))
            .await
    }

    pub async fn set_port(&self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(BotError::ConfigValidation {
                message: "Port must be between 1 and 65535".to_string(),
            });
        }
        self.store.update(|c| c.global.port = Some(port)).await
    }

    pub async fn set_verification_url(&self, url: &str) -> Result<()> {
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(BotError::ConfigValidation {
                message: "URL must start with http:// or https://".to_string(),
            });
        }
        let url = url.to_string();
        self.store
            .update(|c| c.global.verification_url = Some(url))
            .await
    }
}

fn validate_question(question: &Question) -> Result<()> {
    if !question.is_usable() {
        return Err(BotError::ConfigValidation {
            message: "A question needs a prompt and at least one answer".to_string(),
        });
    }
    Ok(())
}
