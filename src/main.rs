use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Discord bot that verifies members with a question and a signed web link
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the verifier's JSON state files (overrides STATE_PATH)
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Callback server port used when none is persisted (overrides WEB_PORT)
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn or error (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<tracing::Level>,

    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Specific guild ID to sync commands to (for testing)
    #[arg(long)]
    guild_id: Option<u64>,
}

mod commands;
mod config;
mod error;
mod events;
mod managers;
mod messages;
mod platform;
mod state;
mod verification;
mod web;

use commands::{help, ping, unverify, verify, verifyset};
use config::BotSettings;
use events::handle_member_add;
use managers::{create_shared_verification_manager, SharedVerificationManager, VerificationManager};
use platform::{DiscordPlatform, SharedPlatform};
use verification::RecordOrdering;
use web::{AppState, WebServer};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub verification_manager: SharedVerificationManager,
    pub platform: SharedPlatform,
    pub web_server: Arc<WebServer>,
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = handle_member_add(ctx, new_member, data).await {
                error!("Failed to handle new member: {}", e);
            }
        }
        serenity::FullEvent::GuildCreate { guild, .. } => {
            info!("Serving guild: {} ({})", guild.name, guild.id);
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let Some(mut settings) = BotSettings::from_env() else {
        anyhow::bail!("Missing DISCORD_TOKEN environment variable");
    };
    if let Some(path) = args.state_path {
        settings.state_path = path;
    }
    if let Some(port) = args.port {
        settings.web_port = port;
    }
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            settings.log_level,
        ))
        .init();

    // Ensure state directory exists
    tokio::fs::create_dir_all(&settings.state_path).await?;

    info!("Loading verifier state from {}...", settings.state_path.display());
    let verification_manager = create_shared_verification_manager(VerificationManager::load(&settings).await?);

    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id;
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }
    if let Some(gid) = target_guild_id {
        info!("--guild-id: Targeting specific guild {}", gid);
    }

    let web_bind = settings.web_bind.clone();
    let default_port = settings.web_port;

    // Build framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ping(), help(), verify(), unverify(), verifyset()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' completed for {}",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                            let _ = ctx.say(format!("Could not read the command arguments: {}", error)).await;
                        }
                        poise::FrameworkError::MissingBotPermissions { missing_permissions, ctx, .. } => {
                            error!("Bot missing permissions for '{}': {:?}", ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say(format!("Bot is missing permissions: {:?}", missing_permissions)).await;
                        }
                        poise::FrameworkError::MissingUserPermissions { missing_permissions, ctx, .. } => {
                            error!("User {} missing permissions for '{}': {:?}", ctx.author().name, ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say("You don't have permission to use this command.").await;
                        }
                        poise::FrameworkError::NotAnOwner { ctx, .. } => {
                            error!("User {} tried to use owner command '{}'", ctx.author().name, ctx.command().qualified_name);
                            let _ = ctx.say("Only the bot owner can change global settings.").await;
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                            let _ = ctx.say("This command can only be used in a server.").await;
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let verification_manager = verification_manager.clone();

            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                // Determine which guilds to register commands for
                let guilds_to_register: Vec<serenity::GuildId> = if let Some(gid) = target_guild_id {
                    vec![serenity::GuildId::new(gid)]
                } else {
                    ready.guilds.iter().map(|g| g.id).collect()
                };

                if guild_commands {
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        ).await {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        } else {
                            info!("Successfully registered {} commands for guild {}",
                                  framework.options().commands.len(), guild_id);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                let platform: SharedPlatform = Arc::new(DiscordPlatform::new(ctx.clone()));

                // Start the callback server on the persisted port if one was set
                let web_server = Arc::new(WebServer::new(
                    AppState {
                        verification_manager: verification_manager.clone(),
                        platform: platform.clone(),
                        ordering: RecordOrdering::default(),
                    },
                    web_bind,
                ));
                let port = verification_manager
                    .config()
                    .global()
                    .await
                    .port
                    .unwrap_or(default_port);
                if let Err(e) = web_server.start(port).await {
                    error!("Failed to start verification callback server on port {}: {}", port, e);
                    warn!("Use /verifyset setport to start it on another port");
                }

                for warning in verification_manager
                    .config()
                    .snapshot()
                    .await
                    .global_warnings()
                {
                    warn!("{}", warning);
                }

                Ok(Data {
                    verification_manager,
                    platform,
                    web_server,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MEMBERS;

    info!("Requesting privileged intents: [\"MESSAGE_CONTENT\", \"GUILD_MEMBERS\"]");

    let mut client = serenity::ClientBuilder::new(settings.discord_token.expose_secret(), intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    if let Err(e) = client.start().await {
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("MESSAGE_CONTENT and GUILD_MEMBERS must be enabled in the Discord Developer Portal");
            error!("Go to https://discord.com/developers/applications -> Your App -> Bot -> Privileged Gateway Intents");
            return Err(anyhow::anyhow!(
                "Disallowed gateway intents. Enable MESSAGE_CONTENT and GUILD_MEMBERS in the Discord Developer Portal"
            ));
        }
        return Err(e.into());
    }
    warn!("Bot ended.");

    Ok(())
}
