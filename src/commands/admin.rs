use poise::serenity_prelude::{self as serenity, GuildId, Mentionable, UserId};
use std::num::NonZeroU64;
use tracing::{error, info, warn};

use super::confirm::{ask_confirmation, Confirmation};
use crate::config::{parse_answer_list, Question};
use crate::managers::RoleManager;
use crate::verification::question::ClearOverride;
use crate::{Context, Error};

/// Discord rejects messages over 2000 characters
const CHUNK_LIMIT: usize = 1900;

const DEFAULT_WRONG_ANSWER_LIMIT: usize = 10;
const MAX_WRONG_ANSWER_LIMIT: usize = 50;

async fn reply(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(content)
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

fn guild_of(ctx: &Context<'_>) -> Result<GuildId, Error> {
    ctx.guild_id()
        .ok_or_else(|| "This command can only be used in a server".into())
}

const MAX_ORIGINALS_SHOWN: usize = 5;
const MAX_ORIGINAL_CHARS: usize = 40;

/// Join lines into messages no longer than `limit` characters. Lines longer
/// than `limit` are split on character boundaries.
pub fn chunk_lines(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for piece in lines.iter().flat_map(|line| split_chars(line, limit)) {
        let piece_len = piece.chars().count();
        if current_len > 0 && current_len + 1 + piece_len > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(piece);
        current_len += piece_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_chars(line: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut rest = line;
    loop {
        match rest.char_indices().nth(limit) {
            Some((at, _)) => {
                let (head, tail) = rest.split_at(at);
                pieces.push(head);
                rest = tail;
            }
            None => {
                pieces.push(rest);
                return pieces;
            }
        }
    }
}

/// Short, bounded rendering of the raw forms behind a ledger entry
fn preview_originals<'a>(originals: impl ExactSizeIterator<Item = &'a String>) -> String {
    let total = originals.len();
    let mut shown: Vec<String> = originals
        .take(MAX_ORIGINALS_SHOWN)
        .map(|o| {
            if o.chars().count() > MAX_ORIGINAL_CHARS {
                let cut: String = o.chars().take(MAX_ORIGINAL_CHARS).collect();
                format!("{}…", cut)
            } else {
                o.clone()
            }
        })
        .collect();
    if total > MAX_ORIGINALS_SHOWN {
        shown.push(format!("+{} more", total - MAX_ORIGINALS_SHOWN));
    }
    shown.join(", ")
}

async fn send_chunked(ctx: Context<'_>, lines: &[String]) -> Result<(), Error> {
    for chunk in chunk_lines(lines, CHUNK_LIMIT) {
        reply(ctx, chunk).await?;
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "enabled"
    } else {
        "disabled"
    }
}

/// Configure question-based verification
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_CHANNELS",
    default_member_permissions = "MANAGE_CHANNELS",
    subcommands(
        "verified_role",
        "clear_role",
        "question",
        "clear_question",
        "global_question",
        "clear_global_question",
        "show_question",
        "set_kick_on_fail",
        "verify_on_join",
        "set_enabled",
        "set_secret",
        "set_port",
        "set_url",
        "status",
        "check_user",
        "view_members",
        "add_member",
        "remove_member",
        "kick_member",
        "unverify_all",
        "wrong_answers",
        "clear_wrong_answers",
        "forget_user"
    ),
    subcommand_required
)]
pub async fn verifyset(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the role granted on verification
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "verifiedrole")]
pub async fn verified_role(
    ctx: Context<'_>,
    #[description = "Role to grant verified members"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.data()
        .verification_manager
        .config()
        .set_role(guild_id, Some(role.id))
        .await?;
    info!("Verified role for guild {} set to {}", guild_id, role.id);
    reply(ctx, format!("Verified role set to {}.", role.mention())).await
}

/// Stop granting a role on verification
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "clearrole")]
pub async fn clear_role(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.data()
        .verification_manager
        .config()
        .set_role(guild_id, None)
        .await?;
    reply(ctx, "Verified role cleared.").await
}

/// Set this server's verification question
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS")]
pub async fn question(
    ctx: Context<'_>,
    #[description = "The question to ask"] question: String,
    #[description = "Accepted answers, separated by commas"] answers: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let question = Question::new(question, parse_answer_list(&answers));
    if !question.is_usable() {
        return reply(ctx, "Please give a question and at least one answer.").await;
    }

    let count = question.answers.len();
    ctx.data()
        .verification_manager
        .config()
        .set_guild_question(guild_id, question)
        .await?;
    reply(ctx, format!("Question set for this server with {} accepted answer(s).", count)).await
}

/// Remove this server's question override
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "clearquestion")]
pub async fn clear_question(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let outcome = ctx
        .data()
        .verification_manager
        .config()
        .clear_guild_question(guild_id)
        .await?;

    let content = match outcome {
        ClearOverride::Cleared => "Server question cleared. The global question will be used.",
        ClearOverride::NoOverride => "This server has no question of its own.",
        ClearOverride::NoGlobalFallback => {
            "No global question is set, so clearing would leave this server without a question. Nothing was changed."
        }
    };
    reply(ctx, content).await
}

/// Set the question used by servers without their own
#[poise::command(slash_command, prefix_command, owners_only, rename = "globalquestion")]
pub async fn global_question(
    ctx: Context<'_>,
    #[description = "The question to ask"] question: String,
    #[description = "Accepted answers, separated by commas"] answers: String,
) -> Result<(), Error> {
    let question = Question::new(question, parse_answer_list(&answers));
    if !question.is_usable() {
        return reply(ctx, "Please give a question and at least one answer.").await;
    }

    let count = question.answers.len();
    ctx.data()
        .verification_manager
        .config()
        .set_global_question(question)
        .await?;
    reply(ctx, format!("Global question set with {} accepted answer(s).", count)).await
}

/// Remove the global question
#[poise::command(slash_command, prefix_command, owners_only, rename = "clearglobalquestion")]
pub async fn clear_global_question(ctx: Context<'_>) -> Result<(), Error> {
    let cleared = ctx
        .data()
        .verification_manager
        .config()
        .clear_global_question()
        .await?;
    if cleared {
        reply(ctx, "Global question cleared.").await
    } else {
        reply(ctx, "No global question was set.").await
    }
}

/// Show the question this server asks
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "showquestion")]
pub async fn show_question(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let resolved = ctx
        .data()
        .verification_manager
        .config()
        .resolve_question(guild_id)
        .await;

    match resolved.usable() {
        Some(question) => {
            reply(
                ctx,
                format!(
                    "**Question** ({}): {}\n**Accepted answers:** {}",
                    resolved.source,
                    question.prompt,
                    question.answers.join(", ")
                ),
            )
            .await
        }
        None => reply(ctx, "No verification question is set for this server.").await,
    }
}

/// Kick members who answer wrong
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "setkickonfail")]
pub async fn set_kick_on_fail(
    ctx: Context<'_>,
    #[description = "Kick on a wrong answer"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let data = ctx.data();
    data.verification_manager
        .config()
        .update_guild(guild_id, |g| g.kick_on_fail = enabled)
        .await?;

    let mut content = format!("Kick on failed verification {}.", on_off(enabled));
    if enabled && !data.platform.can_kick(guild_id).await {
        content.push_str("\n⚠️ I don't have the Kick Members permission here, so members will only be told to contact an admin.");
    }
    reply(ctx, content).await
}

/// Ask new members the question when they join
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "verifyonjoin")]
pub async fn verify_on_join(
    ctx: Context<'_>,
    #[description = "Challenge members on join"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.data()
        .verification_manager
        .config()
        .update_guild(guild_id, |g| g.verify_on_join = enabled)
        .await?;
    reply(ctx, format!("Verification on join {}.", on_off(enabled))).await
}

/// Turn verification on or off for this server
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "enabled")]
pub async fn set_enabled(
    ctx: Context<'_>,
    #[description = "Enable verification"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let manager = &ctx.data().verification_manager;
    manager
        .config()
        .update_guild(guild_id, |g| g.verification_enabled = enabled)
        .await?;

    let mut content = format!("Verification {}.", on_off(enabled));
    if enabled {
        let warnings = manager.config().snapshot().await.warnings(guild_id);
        if !warnings.is_empty() {
            content.push('\n');
            content.push_str(&warnings.join("\n"));
        }
    }
    reply(ctx, content).await
}

/// Set the token signing secret (at least 32 characters)
#[poise::command(slash_command, prefix_command, owners_only, rename = "setsecret")]
pub async fn set_secret(
    ctx: Context<'_>,
    #[description = "Shared secret, at least 32 characters"] secret: String,
) -> Result<(), Error> {
    if let poise::Context::Prefix(prefix) = ctx {
        if let Err(e) = prefix.msg.delete(ctx.http()).await {
            warn!("Could not delete message containing the secret: {}", e);
        }
    }

    match ctx
        .data()
        .verification_manager
        .config()
        .set_secret(secret.trim())
        .await
    {
        Ok(()) => {
            info!("JWT secret updated by {}", ctx.author().name);
            reply(ctx, "Secret updated.").await
        }
        Err(e) => reply(ctx, e.to_string()).await,
    }
}

/// Move the callback server to another port
#[poise::command(slash_command, prefix_command, owners_only, rename = "setport")]
pub async fn set_port(
    ctx: Context<'_>,
    #[description = "Port for the callback server"] port: u16,
) -> Result<(), Error> {
    let data = ctx.data();
    if port == 0 {
        return reply(ctx, "Port must be between 1 and 65535").await;
    }

    if let Err(e) = data.web_server.start(port).await {
        error!("Failed to move web server to port {}: {}", port, e);
        let current = match data.web_server.port().await {
            Some(current) => format!(" Still listening on {}.", current),
            None => String::new(),
        };
        return reply(
            ctx,
            format!("Could not listen on port {}: {}.{} Port not saved.", port, e, current),
        )
        .await;
    }

    match data.verification_manager.config().set_port(port).await {
        Ok(()) => reply(ctx, format!("Callback server restarted on port {}.", port)).await,
        Err(e) => reply(ctx, format!("Listening on port {}, but saving it failed: {}", port, e)).await,
    }
}

/// Set the base URL of the external verification page
#[poise::command(slash_command, prefix_command, owners_only, rename = "url")]
pub async fn set_url(
    ctx: Context<'_>,
    #[description = "Verification page URL"] url: String,
) -> Result<(), Error> {
    match ctx
        .data()
        .verification_manager
        .config()
        .set_verification_url(&url)
        .await
    {
        Ok(()) => reply(ctx, format!("Verification URL set to <{}>.", url.trim())).await,
        Err(e) => reply(ctx, e.to_string()).await,
    }
}

/// Show the verification settings for this server
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let data = ctx.data();
    let manager = &data.verification_manager;
    let config = manager.config().snapshot().await;
    let guild = config.guild(guild_id);
    let resolved = manager.config().resolve_question(guild_id).await;

    let role = guild
        .role_id
        .map(|r| r.mention().to_string())
        .unwrap_or_else(|| "Not set".to_string());
    let question = resolved
        .usable()
        .map(|q| format!("{} ({})", q.prompt, resolved.source))
        .unwrap_or_else(|| "Not set".to_string());
    let port = match data.web_server.port().await {
        Some(port) => format!("{} (listening)", port),
        None => "Not listening".to_string(),
    };
    let url = config
        .global
        .verification_url
        .clone()
        .unwrap_or_else(|| "Not set".to_string());

    let mut embed = serenity::CreateEmbed::new()
        .title("Verification Status")
        .field("Enabled", on_off(guild.verification_enabled), true)
        .field("Verify on join", on_off(guild.verify_on_join), true)
        .field("Kick on fail", on_off(guild.kick_on_fail), true)
        .field("Verified role", role, true)
        .field(
            "Secret",
            if config.global.has_valid_secret() { "Set" } else { "Not set" },
            true,
        )
        .field("Port", port, true)
        .field("Question", question, false)
        .field("Verification URL", url, false)
        .field(
            "Verified members",
            manager.members().count().await.to_string(),
            true,
        )
        .color(0x3498db);

    let warnings = config.warnings(guild_id);
    if !warnings.is_empty() {
        embed = embed.field("Warnings", warnings.join("\n"), false).color(0xe67e22);
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Check whether a user is verified
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "checkuser")]
pub async fn check_user(
    ctx: Context<'_>,
    #[description = "User to check"] user: serenity::User,
) -> Result<(), Error> {
    match ctx.data().verification_manager.members().get(user.id).await {
        Some(member_id) => {
            reply(
                ctx,
                format!("{} is verified with member ID `{}`.", user.mention(), member_id),
            )
            .await
        }
        None => reply(ctx, format!("{} is not verified.", user.mention())).await,
    }
}

/// List every verified member
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "viewmembers")]
pub async fn view_members(ctx: Context<'_>) -> Result<(), Error> {
    let members = ctx.data().verification_manager.members().get_all().await;
    if members.is_empty() {
        return reply(ctx, "No verified members.").await;
    }

    let mut lines = vec![format!("**Verified members ({})**", members.len())];
    lines.extend(
        members
            .iter()
            .map(|(user_id, member_id)| format!("{} ({}): `{}`", user_id.mention(), user_id, member_id)),
    );
    send_chunked(ctx, &lines).await
}

/// Record a user as verified by hand
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "addmember")]
pub async fn add_member(
    ctx: Context<'_>,
    #[description = "User to verify"] user: serenity::User,
    #[description = "External member ID"] member_id: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let member_id = member_id.trim().to_string();
    if member_id.is_empty() {
        return reply(ctx, "Please give a member ID.").await;
    }

    let data = ctx.data();
    let manager = &data.verification_manager;
    let previous = manager.members().set(user.id, &member_id).await?;
    info!(
        "{} manually verified user {} as {}",
        ctx.author().name,
        user.id,
        member_id
    );

    let mut content = match previous {
        Some(old) if old != member_id => format!(
            "{} is now verified as `{}` (was `{}`).",
            user.mention(),
            member_id,
            old
        ),
        _ => format!("{} is now verified as `{}`.", user.mention(), member_id),
    };

    if let Some(role_id) = manager.config().guild(guild_id).await.role_id {
        if let Err(e) = RoleManager::new(data.platform.as_ref())
            .assign_role_to_user(guild_id, user.id, role_id)
            .await
        {
            warn!("Failed to give verified role to {}: {}", user.id, e);
            content.push_str(&format!("\n⚠️ Could not grant the verified role: {}", e));
        }
    }
    reply(ctx, content).await
}

/// Remove a user's verified record
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "removemember")]
pub async fn remove_member(
    ctx: Context<'_>,
    #[description = "User to remove"] user: serenity::User,
) -> Result<(), Error> {
    let removed = ctx
        .data()
        .verification_manager
        .members()
        .delete(user.id)
        .await?;
    match removed {
        Some(member_id) => {
            info!("{} removed verified user {}", ctx.author().name, user.id);
            reply(
                ctx,
                format!("Removed {} (member ID `{}`).", user.mention(), member_id),
            )
            .await
        }
        None => reply(ctx, format!("{} was not verified.", user.mention())).await,
    }
}

/// Kick a member and clear their verification
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "KICK_MEMBERS", rename = "kickmember")]
pub async fn kick_member(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
    #[description = "Reason shown in the audit log"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let data = ctx.data();
    let reason = reason.unwrap_or_else(|| "Verification revoked".to_string());

    if let Err(e) = data.platform.kick(guild_id, user.id, &reason).await {
        return reply(ctx, format!("Could not kick {}: {}", user.mention(), e)).await;
    }
    let removed = data.verification_manager.members().delete(user.id).await?;
    info!(
        "{} kicked {} from guild {} and cleared verification",
        ctx.author().name,
        user.id,
        guild_id
    );

    let suffix = if removed.is_some() {
        " and cleared their verification"
    } else {
        ""
    };
    reply(ctx, format!("Kicked {}{}.", user.mention(), suffix)).await
}

/// Unverify every member
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "unverifyall")]
pub async fn unverify_all(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let count = data.verification_manager.members().count().await;
    if count == 0 {
        return reply(ctx, "No verified members.").await;
    }

    let prompt = format!(
        "This removes **{}** verified member record(s) and their verified roles in every server. Continue?",
        count
    );
    if ask_confirmation(ctx, &prompt).await? != Confirmation::Confirmed {
        return Ok(());
    }

    let manager = &data.verification_manager;
    let cleared = manager.members().clear().await?;
    let config = manager.config().snapshot().await;
    let roles = RoleManager::new(data.platform.as_ref());

    let mut role_failures = 0;
    for user in cleared.keys() {
        let Some(user_id) = user.parse::<NonZeroU64>().ok().map(UserId::from) else {
            continue;
        };
        role_failures += roles.revoke_everywhere(&config, user_id).await.failed.len();
    }
    info!(
        "{} unverified all {} members ({} role removal failures)",
        ctx.author().name,
        cleared.len(),
        role_failures
    );

    let mut content = format!("Unverified {} member(s).", cleared.len());
    if role_failures > 0 {
        content.push_str(&format!(
            " {} role removal(s) failed; check the logs.",
            role_failures
        ));
    }
    reply(ctx, content).await
}

/// Show the most common wrong answers
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "wronganswers")]
pub async fn wrong_answers(
    ctx: Context<'_>,
    #[description = "How many entries to show (default 10)"] limit: Option<u32>,
) -> Result<(), Error> {
    let limit = limit
        .map(|l| l as usize)
        .unwrap_or(DEFAULT_WRONG_ANSWER_LIMIT)
        .clamp(1, MAX_WRONG_ANSWER_LIMIT);
    let entries = ctx.data().verification_manager.ledger().list(limit).await;
    if entries.is_empty() {
        return reply(ctx, "No wrong answers recorded.").await;
    }

    let mut lines = vec![format!("**Top {} wrong answers**", entries.len())];
    for (normalized, entry) in &entries {
        lines.push(format!(
            "`{}` x{} from {} user(s), last seen {} (typed as: {})",
            normalized,
            entry.count,
            entry.responders.len(),
            entry.last_seen.format("%Y-%m-%d %H:%M UTC"),
            preview_originals(entry.originals.iter())
        ));
    }
    send_chunked(ctx, &lines).await
}

/// Delete every recorded wrong answer
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_CHANNELS", rename = "clearwronganswers")]
pub async fn clear_wrong_answers(ctx: Context<'_>) -> Result<(), Error> {
    let manager = &ctx.data().verification_manager;
    let count = manager.ledger().len().await;
    if count == 0 {
        return reply(ctx, "No wrong answers recorded.").await;
    }

    let prompt = format!("This deletes **{}** recorded wrong answer(s). Continue?", count);
    if ask_confirmation(ctx, &prompt).await? != Confirmation::Confirmed {
        return Ok(());
    }

    let removed = manager.ledger().clear().await?;
    info!("{} cleared {} wrong answers", ctx.author().name, removed);
    reply(ctx, format!("Cleared {} wrong answer(s).", removed)).await
}

/// Erase everything stored about a user
#[poise::command(slash_command, prefix_command, owners_only, rename = "forgetuser")]
pub async fn forget_user(
    ctx: Context<'_>,
    #[description = "Discord user ID"] user_id: String,
) -> Result<(), Error> {
    let Some(user_id) = user_id
        .trim()
        .parse::<NonZeroU64>()
        .ok()
        .map(UserId::from)
    else {
        return reply(ctx, "That is not a valid user ID.").await;
    };

    let erased = ctx
        .data()
        .verification_manager
        .delete_user_data(user_id)
        .await?;
    reply(
        ctx,
        format!(
            "Erased data for {}: member record {}, removed from {} wrong-answer entr(ies).",
            user_id,
            if erased.member_id.is_some() { "deleted" } else { "not found" },
            erased.responder_entries
        ),
    )
    .await
}
