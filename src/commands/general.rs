use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    let listening = match ctx.data().web_server.port().await {
        Some(port) => format!("callback server on port {}", port),
        None => "callback server not running".to_string(),
    };
    ctx.send(poise::CreateReply::default()
        .content(format!("Pong! Bot is working ({}).", listening))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Bot Commands")
        .description("Available commands:")
        .field("/ping", "Check if the bot is running", false)
        .field("/verify", "Answer the verification question to get a verification link", false)
        .field("/unverify", "Remove your verification in every server", false)
        .field("/verifyset status", "Show this server's verification settings (Admin)", false)
        .field("/verifyset question", "Set this server's question and accepted answers (Admin)", false)
        .field("/verifyset verifiedrole", "Set the role granted on verification (Admin)", false)
        .field("/verifyset enabled", "Turn verification on or off (Admin)", false)
        .field("/verifyset wronganswers", "Show the most common wrong answers (Admin)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
