use poise::serenity_prelude as serenity;
use std::time::Duration;
use tracing::{info, warn};

use crate::{Context, Error};

/// How long destructive commands wait for a button press
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Cancelled,
    TimedOut,
}

/// Show Confirm/Cancel buttons to the invoking user and wait for a click.
/// Anything other than Confirm within the timeout means "do nothing".
pub async fn ask_confirmation(ctx: Context<'_>, prompt: &str) -> Result<Confirmation, Error> {
    let confirm_id = format!("{}_confirm", ctx.id());
    let cancel_id = format!("{}_cancel", ctx.id());

    let buttons = vec![
        serenity::CreateButton::new(confirm_id.clone())
            .label("Confirm")
            .style(serenity::ButtonStyle::Danger),
        serenity::CreateButton::new(cancel_id)
            .label("Cancel")
            .style(serenity::ButtonStyle::Secondary),
    ];

    let reply = ctx
        .send(
            poise::CreateReply::default()
                .content(prompt)
                .components(vec![serenity::CreateActionRow::Buttons(buttons)])
                .ephemeral(true),
        )
        .await?;

    // Wait for button interaction
    let message = reply.message().await?;
    let interaction = message
        .await_component_interaction(ctx.serenity_context().shard.clone())
        .author_id(ctx.author().id)
        .timeout(CONFIRM_TIMEOUT)
        .await;

    let outcome = match &interaction {
        Some(i) if i.data.custom_id == confirm_id => Confirmation::Confirmed,
        Some(_) => Confirmation::Cancelled,
        None => Confirmation::TimedOut,
    };
    let status = match outcome {
        Confirmation::Confirmed => "Confirmed, working on it...",
        Confirmation::Cancelled => "Cancelled. Nothing was changed.",
        Confirmation::TimedOut => "Timed out. Nothing was changed.",
    };

    match interaction {
        Some(interaction) => {
            if let Err(e) = interaction
                .create_response(
                    ctx.http(),
                    serenity::CreateInteractionResponse::UpdateMessage(
                        serenity::CreateInteractionResponseMessage::new()
                            .content(status)
                            .components(vec![]),
                    ),
                )
                .await
            {
                warn!("Failed to acknowledge confirmation button: {}", e);
            }
        }
        None => {
            reply
                .edit(
                    ctx,
                    poise::CreateReply::default()
                        .content(status)
                        .components(vec![]),
                )
                .await?;
        }
    }

    info!(
        "Confirmation for '{}' by {}: {:?}",
        ctx.command().qualified_name,
        ctx.author().name,
        outcome
    );
    Ok(outcome)
}
