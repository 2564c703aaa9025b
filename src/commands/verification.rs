use tracing::{error, info};

use crate::managers::{RoleGrant, RoleManager};
use crate::messages;
use crate::verification::{run_challenge, ChallengeRequest};
use crate::{Context, Error};

async fn reply(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(content)
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Start the verification process
///
/// The bot sends you a question by direct message. Answer it correctly to
/// receive a verification link.
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn verify(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let user_id = ctx.author().id;
    let data = ctx.data();
    let manager = &data.verification_manager;

    let guild_config = manager.config().guild(guild_id).await;
    if !guild_config.verification_enabled {
        reply(ctx, "Verification is not enabled in this server.").await?;
        return Ok(());
    }

    // Check if already verified
    if manager.is_verified(user_id).await {
        if let Some(role_id) = guild_config.role_id {
            match RoleManager::new(data.platform.as_ref())
                .assign_role_to_user(guild_id, user_id, role_id)
                .await
            {
                Ok(RoleGrant::Granted) => {
                    reply(ctx, "You are already verified! Your verified role has been restored.").await?;
                    return Ok(());
                }
                Ok(RoleGrant::AlreadyHeld) => {}
                Err(e) => error!("Failed to restore verified role for {}: {}", user_id, e),
            }
        }
        reply(ctx, "You are already verified!").await?;
        return Ok(());
    }

    if manager.is_pending(user_id) {
        reply(ctx, messages::already_pending_message()).await?;
        return Ok(());
    }

    reply(
        ctx,
        "**Verification Process Started**\n\nI've sent you a private message with the verification question.",
    )
    .await?;

    let request = ChallengeRequest {
        user_id,
        username: ctx.author().name.clone(),
        guild_id,
        fallback_channel: Some(ctx.channel_id()),
    };
    let manager = data.verification_manager.clone();
    let platform = data.platform.clone();
    tokio::spawn(async move {
        match run_challenge(&manager, platform.as_ref(), request).await {
            Some(report) => info!(
                "Challenge for user {} in guild {} ended as {:?}",
                user_id, guild_id, report.state
            ),
            None => info!("User {} already had a challenge running", user_id),
        }
    });

    Ok(())
}

/// Remove your verification
///
/// Deletes your verified record and removes the verified role in every
/// server that uses verification.
#[poise::command(prefix_command, slash_command)]
pub async fn unverify(ctx: Context<'_>) -> Result<(), Error> {
    let user_id = ctx.author().id;
    let data = ctx.data();

    let (removed, sweep) = data
        .verification_manager
        .unverify(data.platform.as_ref(), user_id)
        .await?;

    let mut content = match removed {
        Some(_) => "You have been unverified.".to_string(),
        None => "You were not verified.".to_string(),
    };
    if !sweep.changed.is_empty() {
        content.push_str(&format!(
            " The verified role was removed in {} server(s).",
            sweep.changed.len()
        ));
    }
    if !sweep.failed.is_empty() {
        content.push_str(&format!(
            " I could not remove it in {} server(s); please ask an admin there.",
            sweep.failed.len()
        ));
    }

    reply(ctx, content).await
}
