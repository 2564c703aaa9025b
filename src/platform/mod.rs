//! What the verifier needs from the chat platform.
//!
//! Everything Discord-specific sits behind [`Platform`] so the challenge flow
//! and callback server can be driven without a gateway connection.

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod discord;
#[cfg(test)]
pub mod mock;

pub use discord::DiscordPlatform;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform refused (DMs closed, missing permission, role hierarchy)
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Discord API error: {message}")]
    Discord { message: String },
}

impl PlatformError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, PlatformError::Forbidden { .. })
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[async_trait]
pub trait Platform: Send + Sync {
    async fn send_dm(&self, user_id: UserId, content: &str) -> PlatformResult<()>;

    async fn send_channel(&self, channel_id: ChannelId, content: &str) -> PlatformResult<()>;

    /// Next direct message from `user_id`, `None` on timeout
    async fn await_dm_reply(&self, user_id: UserId, timeout: Duration) -> PlatformResult<Option<String>>;

    async fn guild_exists(&self, guild_id: GuildId) -> bool;

    /// Roles the user holds in the guild, `None` if they are not a member
    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> PlatformResult<Option<Vec<RoleId>>>;

    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> PlatformResult<()>;

    async fn remove_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> PlatformResult<()>;

    /// Whether the bot holds the kick permission in the guild
    async fn can_kick(&self, guild_id: GuildId) -> bool;

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> PlatformResult<()>;

    /// Every guild the bot is in
    fn guilds(&self) -> Vec<GuildId>;
}

pub type SharedPlatform = Arc<dyn Platform>;
