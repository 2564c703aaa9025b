use poise::serenity_prelude::{self as serenity, ChannelId, GuildId, RoleId, UserId};
use tracing::{debug, error, info};

use crate::config::GuildVerificationConfig;
use crate::managers::{RoleManager, SharedVerificationManager};
use crate::platform::SharedPlatform;
use crate::verification::{run_challenge, ChallengeRequest};
use crate::{Data, Error};

/// What to do with a member who just joined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAction {
    Ignore,
    /// Already verified elsewhere; hand out this guild's role
    RestoreRole(RoleId),
    Challenge,
}

pub fn join_action(config: &GuildVerificationConfig, already_verified: bool) -> JoinAction {
    if !config.verification_enabled || !config.verify_on_join {
        return JoinAction::Ignore;
    }
    match (already_verified, config.role_id) {
        (true, Some(role_id)) => JoinAction::RestoreRole(role_id),
        (true, None) => JoinAction::Ignore,
        (false, _) => JoinAction::Challenge,
    }
}

/// Handle a new guild member
pub async fn handle_member_add(
    ctx: &serenity::Context,
    new_member: &serenity::Member,
    data: &Data,
) -> Result<(), Error> {
    info!(
        "New member joined: {} in guild {}",
        new_member.user.name, new_member.guild_id
    );

    // Guidance goes to the system channel if the member's DMs are closed
    let fallback_channel = ctx
        .cache
        .guild(new_member.guild_id)
        .and_then(|guild| guild.system_channel_id);

    on_member_join(
        data.verification_manager.clone(),
        data.platform.clone(),
        new_member.user.id,
        new_member.user.name.clone(),
        new_member.guild_id,
        fallback_channel,
    )
    .await;
    Ok(())
}

/// Restore the role for returning members, or start a challenge in the
/// background for new ones
pub async fn on_member_join(
    manager: SharedVerificationManager,
    platform: SharedPlatform,
    user_id: UserId,
    username: String,
    guild_id: GuildId,
    fallback_channel: Option<ChannelId>,
) -> JoinAction {
    let config = manager.config().guild(guild_id).await;
    let action = join_action(&config, manager.is_verified(user_id).await);
    debug!("Join action for user {} in guild {}: {:?}", user_id, guild_id, action);

    match action {
        JoinAction::Ignore => {}
        JoinAction::RestoreRole(role_id) => {
            info!("Returning verified user {} joined guild {}", user_id, guild_id);
            if let Err(e) = RoleManager::new(platform.as_ref())
                .assign_role_to_user(guild_id, user_id, role_id)
                .await
            {
                error!(
                    "Failed to restore verified role for {} in guild {}: {}. Bot requires 'Manage Roles' and a role above the verified role.",
                    user_id, guild_id, e
                );
            }
        }
        JoinAction::Challenge => {
            let request = ChallengeRequest {
                user_id,
                username,
                guild_id,
                fallback_channel,
            };
            tokio::spawn(async move {
                match run_challenge(&manager, platform.as_ref(), request).await {
                    Some(report) => info!(
                        "Join challenge for user {} in guild {} ended as {:?}",
                        user_id, guild_id, report.state
                    ),
                    None => info!(
                        "User {} joined guild {} with a challenge already running",
                        user_id, guild_id
                    ),
                }
            });
        }
    }
    action
}
