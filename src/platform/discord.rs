use async_trait::async_trait;
use poise::serenity_prelude::{self as serenity, ChannelId, GuildId, RoleId, UserId};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Platform, PlatformError, PlatformResult};

/// [`Platform`] backed by a live serenity client
#[derive(Clone)]
pub struct DiscordPlatform {
    ctx: serenity::Context,
}

impl DiscordPlatform {
    pub fn new(ctx: serenity::Context) -> Self {
        Self { ctx }
    }
}

/// Map serenity failures onto the cases the verifier distinguishes
fn classify(err: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(http_err) = &err {
        match http_err.status_code().map(|s| s.as_u16()) {
            Some(403) => {
                return PlatformError::Forbidden {
                    message: err.to_string(),
                }
            }
            Some(404) => {
                return PlatformError::NotFound {
                    message: err.to_string(),
                }
            }
            _ => {}
        }
    }
    PlatformError::Discord {
        message: err.to_string(),
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn send_dm(&self, user_id: UserId, content: &str) -> PlatformResult<()> {
        let dm_channel = user_id
            .create_dm_channel(&self.ctx)
            .await
            .map_err(classify)?;
        dm_channel
            .send_message(&self.ctx, serenity::CreateMessage::new().content(content))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn send_channel(&self, channel_id: ChannelId, content: &str) -> PlatformResult<()> {
        channel_id
            .say(&self.ctx.http, content)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn await_dm_reply(
        &self,
        user_id: UserId,
        timeout: Duration,
    ) -> PlatformResult<Option<String>> {
        let reply = serenity::MessageCollector::new(self.ctx.shard.clone())
            .author_id(user_id)
            .filter(|m| m.guild_id.is_none())
            .timeout(timeout)
            .await;
        Ok(reply.map(|m| m.content))
    }

    async fn guild_exists(&self, guild_id: GuildId) -> bool {
        if self.ctx.cache.guild(guild_id).is_some() {
            return true;
        }
        guild_id.to_partial_guild(&self.ctx.http).await.is_ok()
    }

    async fn member_roles(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> PlatformResult<Option<Vec<RoleId>>> {
        match guild_id.member(&self.ctx, user_id).await {
            Ok(member) => Ok(Some(member.roles)),
            Err(e) => match classify(e) {
                PlatformError::NotFound { .. } => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> PlatformResult<()> {
        self.ctx
            .http
            .add_member_role(guild_id, user_id, role_id, Some("Verification completed"))
            .await
            .map_err(classify)
    }

    async fn remove_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> PlatformResult<()> {
        self.ctx
            .http
            .remove_member_role(guild_id, user_id, role_id, Some("Verification removed"))
            .await
            .map_err(classify)
    }

    async fn can_kick(&self, guild_id: GuildId) -> bool {
        let guild = match guild_id.to_partial_guild(&self.ctx.http).await {
            Ok(g) => g,
            Err(e) => {
                warn!("Failed to fetch guild {}: {}", guild_id, e);
                return false;
            }
        };
        let bot_id = self.ctx.cache.current_user().id;
        let bot_member = match guild.member(&self.ctx.http, bot_id).await {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to get bot member in guild {}: {}", guild_id, e);
                return false;
            }
        };

        #[allow(deprecated)]
        let permissions = guild.member_permissions(&bot_member);
        debug!("Bot permissions in guild {}: {:?}", guild_id, permissions);
        permissions.kick_members()
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> PlatformResult<()> {
        guild_id
            .kick_with_reason(&self.ctx.http, user_id, reason)
            .await
            .map_err(classify)
    }

    fn guilds(&self) -> Vec<GuildId> {
        self.ctx.cache.guilds()
    }
}
