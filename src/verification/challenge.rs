//! Question-and-answer challenge run over direct messages.
//!
//! ```text
//! Idle ──► AwaitingAnswer ──► Passed | Failed | TimedOut | Misconfigured | Undeliverable
//!   └────► Misconfigured | Undeliverable
//! ```
//!
//! Every run ends in exactly one terminal state.

use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::answer::{answer_matches, normalize_answer};
use super::question::QuestionSource;
use super::token::TokenCodec;
use crate::managers::VerificationManager;
use crate::messages;
use crate::platform::Platform;

/// How long the user has to answer
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(90);

/// Command users are told to run to start over
pub const RESTART_COMMAND: &str = "/verify";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misconfiguration {
    NoRole,
    NoQuestion,
    NoSecret,
    NoVerificationUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeState {
    Idle,
    AwaitingAnswer { source: QuestionSource },
    Passed { verification_url: String },
    Failed { normalized: String, kicked: bool },
    TimedOut,
    Misconfigured(Misconfiguration),
    /// The question could not be delivered
    Undeliverable,
}

impl ChallengeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ChallengeState::Idle | ChallengeState::AwaitingAnswer { .. }
        )
    }

    fn can_become(&self, next: &ChallengeState) -> bool {
        match (self, next) {
            (ChallengeState::Idle, ChallengeState::AwaitingAnswer { .. })
            | (ChallengeState::Idle, ChallengeState::Misconfigured(_))
            | (ChallengeState::Idle, ChallengeState::Undeliverable) => true,
            (ChallengeState::AwaitingAnswer { .. }, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Who is being challenged, and for which guild
#[derive(Debug, Clone)]
pub struct ChallengeRequest {
    pub user_id: UserId,
    pub username: String,
    pub guild_id: GuildId,
    /// Where to post guidance if the user's DMs are closed
    pub fallback_channel: Option<ChannelId>,
}

/// Final state of a challenge plus every state it passed through
#[derive(Debug, Clone)]
pub struct ChallengeReport {
    pub state: ChallengeState,
    pub trail: Vec<ChallengeState>,
}

/// Run a challenge unless one is already in flight for this user, in which
/// case `None` is returned and nothing is sent.
pub async fn run_challenge(
    manager: &VerificationManager,
    platform: &dyn Platform,
    request: ChallengeRequest,
) -> Option<ChallengeReport> {
    let _slot = manager.begin_challenge(request.user_id, request.guild_id)?;
    let mut flow = ChallengeFlow::new(manager, platform, request);
    flow.run().await;
    Some(flow.into_report())
}

pub struct ChallengeFlow<'a> {
    manager: &'a VerificationManager,
    platform: &'a dyn Platform,
    request: ChallengeRequest,
    state: ChallengeState,
    trail: Vec<ChallengeState>,
}

impl<'a> ChallengeFlow<'a> {
    pub fn new(manager: &'a VerificationManager, platform: &'a dyn Platform, request: ChallengeRequest) -> Self {
        Self {
            manager,
            platform,
            request,
            state: ChallengeState::Idle,
            trail: vec![ChallengeState::Idle],
        }
    }

    pub fn into_report(self) -> ChallengeReport {
        ChallengeReport {
            state: self.state,
            trail: self.trail,
        }
    }

    fn transition(&mut self, next: ChallengeState) {
        debug_assert!(
            self.state.can_become(&next),
            "illegal challenge transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            "Challenge for user {} in guild {}: {:?} -> {:?}",
            self.request.user_id, self.request.guild_id, self.state, next
        );
        self.trail.push(next.clone());
        self.state = next;
    }

    /// Drive the challenge to a terminal state
    pub async fn run(&mut self) -> &ChallengeState {
        let user_id = self.request.user_id;
        let guild_id = self.request.guild_id;

        if self.manager.config().guild(guild_id).await.role_id.is_none() {
            warn!("Guild {} has verification enabled but no verified role", guild_id);
            self.notify(messages::no_role_message()).await;
            self.transition(ChallengeState::Misconfigured(Misconfiguration::NoRole));
            return &self.state;
        }

        let resolved = self.manager.config().resolve_question(guild_id).await;
        let Some(question) = resolved.usable().cloned() else {
            warn!("Guild {} has verification enabled but no question", guild_id);
            self.notify(messages::no_question_message()).await;
            self.transition(ChallengeState::Misconfigured(Misconfiguration::NoQuestion));
            return &self.state;
        };

        let intro = format!(
            "{}\n\n{}",
            messages::welcome_message(ANSWER_TIMEOUT.as_secs()),
            messages::question_message(&question.prompt)
        );
        if let Err(e) = self.platform.send_dm(user_id, &intro).await {
            if e.is_forbidden() {
                info!("User {} has DMs closed, posting help in fallback channel", user_id);
                self.post_forbidden_help().await;
            } else {
                error!("Failed to send verification question to user {}: {}", user_id, e);
            }
            self.transition(ChallengeState::Undeliverable);
            return &self.state;
        }
        self.transition(ChallengeState::AwaitingAnswer {
            source: resolved.source,
        });

        let reply = match self.platform.await_dm_reply(user_id, ANSWER_TIMEOUT).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed waiting for reply from user {}: {}", user_id, e);
                None
            }
        };
        let Some(reply) = reply else {
            info!("Verification for user {} in guild {} timed out", user_id, guild_id);
            self.notify(&messages::timeout_message(RESTART_COMMAND)).await;
            self.transition(ChallengeState::TimedOut);
            return &self.state;
        };

        if answer_matches(&reply, &question.answers) {
            self.on_correct().await;
        } else {
            self.on_incorrect(&reply).await;
        }
        &self.state
    }

    async fn on_correct(&mut self) {
        let user_id = self.request.user_id;
        let global = self.manager.config().global().await;

        let codec = match TokenCodec::from_secret(global.jwt_secret.as_deref()) {
            Ok(codec) => codec,
            Err(e) => {
                error!("Cannot issue verification token: {}", e);
                self.notify(messages::not_configured_message()).await;
                self.transition(ChallengeState::Misconfigured(Misconfiguration::NoSecret));
                return;
            }
        };
        let Some(base_url) = global.verification_url.filter(|u| !u.trim().is_empty()) else {
            error!("Cannot send verification link: verification URL is not set");
            self.notify(messages::not_configured_message()).await;
            self.transition(ChallengeState::Misconfigured(
                Misconfiguration::NoVerificationUrl,
            ));
            return;
        };

        let token = match codec.issue(user_id, &self.request.username, self.request.guild_id, None) {
            Ok(token) => token,
            Err(e) => {
                error!("Failed to sign verification token for user {}: {}", user_id, e);
                self.notify(messages::not_configured_message()).await;
                self.transition(ChallengeState::Misconfigured(Misconfiguration::NoSecret));
                return;
            }
        };

        let link = verification_link(&base_url, &token);
        match self
            .platform
            .send_dm(user_id, &messages::verification_link_message(&link))
            .await
        {
            Ok(()) => {
                info!(
                    "User {} answered correctly in guild {}, link sent",
                    user_id, self.request.guild_id
                );
                self.transition(ChallengeState::Passed {
                    verification_url: link,
                });
            }
            Err(e) => {
                error!("Failed to send verification link to user {}: {}", user_id, e);
                self.transition(ChallengeState::Undeliverable);
            }
        }
    }

    async fn on_incorrect(&mut self, reply: &str) {
        let user_id = self.request.user_id;
        let guild_id = self.request.guild_id;
        let normalized = normalize_answer(reply);

        if let Err(e) = self
            .manager
            .ledger()
            .record(user_id, guild_id, reply, &normalized)
            .await
        {
            error!("Failed to record incorrect answer: {}", e);
        }

        let guild_config = self.manager.config().guild(guild_id).await;
        let mut kicked = false;
        if guild_config.kick_on_fail && self.platform.can_kick(guild_id).await {
            match self
                .platform
                .kick(guild_id, user_id, "Failed verification question")
                .await
            {
                Ok(()) => {
                    info!("Kicked user {} from guild {} after a wrong answer", user_id, guild_id);
                    kicked = true;
                    self.notify(messages::incorrect_kicked_message()).await;
                }
                Err(e) => {
                    error!("Failed to kick user {} from guild {}: {}", user_id, guild_id, e);
                    self.notify(messages::incorrect_contact_admin_message()).await;
                }
            }
        } else {
            if guild_config.kick_on_fail {
                warn!("kick_on_fail is set for guild {} but the bot cannot kick", guild_id);
            }
            self.notify(messages::incorrect_contact_admin_message()).await;
        }

        self.transition(ChallengeState::Failed { normalized, kicked });
    }

    /// DM the user, falling back to the guild channel if DMs are closed
    async fn notify(&self, content: &str) {
        match self.platform.send_dm(self.request.user_id, content).await {
            Ok(()) => {}
            Err(e) if e.is_forbidden() => self.post_forbidden_help().await,
            Err(e) => warn!("Failed to DM user {}: {}", self.request.user_id, e),
        }
    }

    async fn post_forbidden_help(&self) {
        let Some(channel_id) = self.request.fallback_channel else {
            warn!(
                "No fallback channel to reach user {} in guild {}",
                self.request.user_id, self.request.guild_id
            );
            return;
        };
        let mention = format!("<@{}>", self.request.user_id);
        if let Err(e) = self
            .platform
            .send_channel(channel_id, &messages::forbidden_help(&mention))
            .await
        {
            warn!("Failed to post DM help in channel {}: {}", channel_id, e);
        }
    }
}

/// Append the token as the `jwt` query parameter
pub fn verification_link(base_url: &str, token: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{}{}jwt={}", base_url, separator, urlencoding::encode(token))
}
