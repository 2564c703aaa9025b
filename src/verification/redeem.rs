//! Redeeming a verification token handed back by the external site.

use poise::serenity_prelude::{GuildId, UserId};
use serde::Deserialize;
use std::num::NonZeroU64;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::TokenError;
use crate::managers::role_manager::{RoleGrant, RoleManager, RoleSweep};
use crate::managers::VerificationManager;
use crate::messages;
use crate::platform::Platform;

/// Fields accepted from the callback body or query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
}

impl CallbackPayload {
    /// Fill fields missing here from `other`
    pub fn or(self, other: CallbackPayload) -> CallbackPayload {
        CallbackPayload {
            jwt: non_empty(self.jwt).or_else(|| non_empty(other.jwt)),
            member_id: non_empty(self.member_id).or_else(|| non_empty(other.member_id)),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Whether the member record is written before or after the role is granted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordOrdering {
    /// Record first. A role failure leaves the user recorded but roleless.
    #[default]
    RecordFirst,
    /// Grant the role first. A role failure leaves nothing recorded.
    RoleFirst,
}

#[derive(Error, Debug)]
pub enum RedeemError {
    #[error("Missing JWT token")]
    MissingToken,

    #[error("Request body is not valid JSON: {reason}")]
    MalformedBody { reason: String },

    #[error("JWT token has expired")]
    Expired,

    #[error("Invalid JWT token")]
    InvalidToken,

    #[error("JWT secret not configured")]
    SecretNotConfigured,

    #[error("Invalid {field} in JWT payload")]
    MalformedId { field: &'static str },

    #[error("Guild not found")]
    GuildNotFound,

    #[error("Member not found")]
    MemberNotFound,

    #[error("Missing member_id")]
    MissingMemberId,

    #[error("Verification role not configured")]
    RoleNotConfigured,

    #[error("Server error: {message}")]
    Internal { message: String },
}

impl From<TokenError> for RedeemError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::MissingSecret => RedeemError::SecretNotConfigured,
            TokenError::Expired => RedeemError::Expired,
            TokenError::Invalid { .. } => RedeemError::InvalidToken,
        }
    }
}

impl From<crate::error::BotError> for RedeemError {
    fn from(err: crate::error::BotError) -> Self {
        RedeemError::Internal {
            message: err.to_string(),
        }
    }
}

/// A completed redemption
#[derive(Debug, Clone)]
pub struct Redemption {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub member_id: String,
    /// Member ID this user was recorded with before, if any
    pub previous_member_id: Option<String>,
    pub role_granted: RoleGrant,
    pub propagation: RoleSweep,
}

fn parse_id(raw: &str, field: &'static str) -> Result<NonZeroU64, RedeemError> {
    raw.trim()
        .parse::<NonZeroU64>()
        .map_err(|_| RedeemError::MalformedId { field })
}

/// Check the token, record the user and hand out the verified role in the
/// originating guild and every other enabled guild they are in.
///
/// Redeeming the same valid token twice is harmless: the record is
/// rewritten and roles the user holds are left alone.
pub async fn redeem(
    manager: &VerificationManager,
    platform: &dyn Platform,
    payload: CallbackPayload,
    ordering: RecordOrdering,
) -> Result<Redemption, RedeemError> {
    let token = non_empty(payload.jwt).ok_or(RedeemError::MissingToken)?;

    let codec = manager.token_codec().await.map_err(|e| {
        error!("Rejecting callback: {}", e);
        RedeemError::from(e)
    })?;
    let claims = codec.verify(&token).map_err(|e| {
        warn!("Rejecting callback: {}", e);
        RedeemError::from(e)
    })?;

    let user_id = UserId::from(parse_id(&claims.user_id, "user_id")?);
    let guild_id = GuildId::from(parse_id(&claims.guild_id, "guild_id")?);
    info!(
        "Redeeming token {} for user {} in guild {}",
        claims.jti.as_deref().unwrap_or("-"),
        user_id,
        guild_id
    );

    if !platform.guild_exists(guild_id).await {
        return Err(RedeemError::GuildNotFound);
    }
    let roles = platform
        .member_roles(guild_id, user_id)
        .await
        .map_err(|e| RedeemError::Internal {
            message: e.to_string(),
        })?
        .ok_or(RedeemError::MemberNotFound)?;

    let member_id = non_empty(claims.member_id)
        .or_else(|| non_empty(payload.member_id))
        .ok_or(RedeemError::MissingMemberId)?;

    let guild_config = manager.config().guild(guild_id).await;
    let role_manager = RoleManager::new(platform);

    let (previous_member_id, role_granted) = match ordering {
        RecordOrdering::RecordFirst => {
            let previous = manager.members().set(user_id, &member_id).await?;
            let role_id = guild_config.role_id.ok_or(RedeemError::RoleNotConfigured)?;
            let grant = grant(&role_manager, guild_id, user_id, role_id, &roles).await?;
            (previous, grant)
        }
        RecordOrdering::RoleFirst => {
            let role_id = guild_config.role_id.ok_or(RedeemError::RoleNotConfigured)?;
            let grant = grant(&role_manager, guild_id, user_id, role_id, &roles).await?;
            let previous = manager.members().set(user_id, &member_id).await?;
            (previous, grant)
        }
    };

    let config = manager.config().snapshot().await;
    let propagation = role_manager.propagate(&config, user_id, Some(guild_id)).await;
    if !propagation.is_clean() {
        warn!(
            "Verified role could not be propagated to {} guild(s) for user {}",
            propagation.failed.len(),
            user_id
        );
    }

    if let Err(e) = platform
        .send_dm(user_id, &messages::verified_message(&member_id))
        .await
    {
        warn!("Failed to send verification confirmation to user {}: {}", user_id, e);
    }

    info!("User {} verified as member {}", user_id, member_id);
    Ok(Redemption {
        user_id,
        guild_id,
        member_id,
        previous_member_id,
        role_granted,
        propagation,
    })
}

async fn grant(
    role_manager: &RoleManager<'_>,
    guild_id: GuildId,
    user_id: UserId,
    role_id: poise::serenity_prelude::RoleId,
    current_roles: &[poise::serenity_prelude::RoleId],
) -> Result<RoleGrant, RedeemError> {
    if current_roles.contains(&role_id) {
        return Ok(RoleGrant::AlreadyHeld);
    }
    role_manager
        .assign_role_to_user(guild_id, user_id, role_id)
        .await
        .map_err(|e| {
            error!("Failed to grant verified role to user {}: {}", user_id, e);
            RedeemError::Internal {
                message: e.to_string(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuildVerificationConfig, VerifierConfig};
    use crate::platform::mock::MockPlatform;
    use crate::verification::{TokenCodec, VerificationClaims};
    use chrono::Utc;
    use poise::serenity_prelude::RoleId;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const GUILD: GuildId = GuildId::new(100);
    const USER: UserId = UserId::new(200);
    const ROLE: RoleId = RoleId::new(300);

    fn config() -> VerifierConfig {
        let mut config = VerifierConfig::default();
        config.global.jwt_secret = Some(SECRET.to_string());
        *config.guild_mut(GUILD) = GuildVerificationConfig {
            role_id: Some(ROLE),
            verification_enabled: true,
            ..Default::default()
        };
        config
    }

    fn setup(config: VerifierConfig) -> (VerificationManager, MockPlatform) {
        let platform = MockPlatform::new();
        platform.add_member(GUILD, USER, vec![]);
        (VerificationManager::in_memory(config), platform)
    }

    fn token(member_id: Option<&str>) -> String {
        TokenCodec::from_secret(Some(SECRET))
            .unwrap()
            .issue(USER, "alice", GUILD, member_id)
            .unwrap()
    }

    fn payload(jwt: String) -> CallbackPayload {
        CallbackPayload {
            jwt: Some(jwt),
            member_id: None,
        }
    }

    #[tokio::test]
    async fn test_redeem_records_and_grants() {
        let (manager, platform) = setup(config());

        let redemption = redeem(&manager, &platform, payload(token(Some("M-42"))), RecordOrdering::RecordFirst)
            .await
            .unwrap();
        assert_eq!(redemption.member_id, "M-42");
        assert_eq!(redemption.role_granted, RoleGrant::Granted);
        assert_eq!(manager.members().get(USER).await.as_deref(), Some("M-42"));
        assert_eq!(platform.roles_of(GUILD, USER), Some(vec![ROLE]));
        assert!(platform.dms_to(USER)[0].contains("M-42"));
    }

    #[tokio::test]
    async fn test_redeem_twice_is_harmless() {
        let (manager, platform) = setup(config());
        let jwt = token(Some("M-42"));

        redeem(&manager, &platform, payload(jwt.clone()), RecordOrdering::RecordFirst)
            .await
            .unwrap();
        let second = redeem(&manager, &platform, payload(jwt), RecordOrdering::RecordFirst)
            .await
            .unwrap();
        assert_eq!(second.role_granted, RoleGrant::AlreadyHeld);
        assert_eq!(second.previous_member_id.as_deref(), Some("M-42"));
        assert_eq!(platform.roles_of(GUILD, USER), Some(vec![ROLE]));
        assert_eq!(manager.members().count().await, 1);
    }

    #[tokio::test]
    async fn test_member_id_from_request_when_claim_absent() {
        let (manager, platform) = setup(config());
        let request = CallbackPayload {
            jwt: Some(token(None)),
            member_id: Some(" M-7 ".to_string()),
        };

        let redemption = redeem(&manager, &platform, request, RecordOrdering::RecordFirst)
            .await
            .unwrap();
        assert_eq!(redemption.member_id, "M-7");
    }

    #[tokio::test]
    async fn test_missing_member_id() {
        let (manager, platform) = setup(config());
        let err = redeem(&manager, &platform, payload(token(None)), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::MissingMemberId));
        assert_eq!(manager.members().count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_token_changes_nothing() {
        let (manager, platform) = setup(config());
        let codec = TokenCodec::from_secret(Some(SECRET)).unwrap();
        let past = Utc::now().timestamp() - 3600;
        let jwt = codec
            .issue_at(USER, "alice", GUILD, Some("M-42"), past)
            .unwrap();

        let err = redeem(&manager, &platform, payload(jwt), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::Expired));
        assert_eq!(manager.members().count().await, 0);
        assert_eq!(platform.roles_of(GUILD, USER), Some(vec![]));
    }

    #[tokio::test]
    async fn test_token_from_other_secret_is_invalid() {
        let (manager, platform) = setup(config());
        let jwt = TokenCodec::from_secret(Some("another-secret-another-secret-1234"))
            .unwrap()
            .issue(USER, "alice", GUILD, Some("M-42"))
            .unwrap();

        let err = redeem(&manager, &platform, payload(jwt), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::InvalidToken));
    }

    #[tokio::test]
    async fn test_missing_token_and_secret() {
        let (manager, platform) = setup(config());
        let err = redeem(&manager, &platform, CallbackPayload::default(), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::MissingToken));

        let mut unsigned = config();
        unsigned.global.jwt_secret = None;
        let (manager, platform) = setup(unsigned);
        let err = redeem(&manager, &platform, payload(token(Some("M"))), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::SecretNotConfigured));
    }

    #[tokio::test]
    async fn test_malformed_ids() {
        let (manager, platform) = setup(config());
        let codec = TokenCodec::from_secret(Some(SECRET)).unwrap();
        let now = Utc::now().timestamp();
        let jwt = codec
            .sign(&VerificationClaims {
                user_id: "not-a-number".to_string(),
                username: String::new(),
                guild_id: GUILD.to_string(),
                member_id: Some("M".to_string()),
                iat: now,
                exp: now + 60,
                jti: None,
            })
            .unwrap();

        let err = redeem(&manager, &platform, payload(jwt), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::MalformedId { field: "user_id" }));
    }

    #[tokio::test]
    async fn test_unknown_guild_and_member() {
        let platform = MockPlatform::new();
        let manager = VerificationManager::in_memory(config());
        let err = redeem(&manager, &platform, payload(token(Some("M"))), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::GuildNotFound));

        platform.add_guild(GUILD);
        let err = redeem(&manager, &platform, payload(token(Some("M"))), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::MemberNotFound));
    }

    #[tokio::test]
    async fn test_missing_role_with_record_first_keeps_record() {
        let mut cfg = config();
        cfg.guild_mut(GUILD).role_id = None;
        let (manager, platform) = setup(cfg);

        let err = redeem(&manager, &platform, payload(token(Some("M-42"))), RecordOrdering::RecordFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::RoleNotConfigured));
        assert!(manager.is_verified(USER).await);
    }

    #[tokio::test]
    async fn test_missing_role_with_role_first_writes_nothing() {
        let mut cfg = config();
        cfg.guild_mut(GUILD).role_id = None;
        let (manager, platform) = setup(cfg);

        let err = redeem(&manager, &platform, payload(token(Some("M-42"))), RecordOrdering::RoleFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::RoleNotConfigured));
        assert!(!manager.is_verified(USER).await);
    }

    #[tokio::test]
    async fn test_role_failure_with_role_first_writes_nothing() {
        let (manager, platform) = setup(config());
        platform.forbid_roles(GUILD);

        let err = redeem(&manager, &platform, payload(token(Some("M-42"))), RecordOrdering::RoleFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemError::Internal { .. }));
        assert!(!manager.is_verified(USER).await);
    }

    #[tokio::test]
    async fn test_propagates_to_other_enabled_guilds() {
        let other = GuildId::new(101);
        let broken = GuildId::new(102);
        let mut cfg = config();
        *cfg.guild_mut(other) = GuildVerificationConfig {
            role_id: Some(RoleId::new(301)),
            verification_enabled: true,
            ..Default::default()
        };
        *cfg.guild_mut(broken) = GuildVerificationConfig {
            role_id: Some(RoleId::new(302)),
            verification_enabled: true,
            ..Default::default()
        };
        let (manager, platform) = setup(cfg);
        platform.add_member(other, USER, vec![]);
        platform.add_member(broken, USER, vec![]);
        platform.forbid_roles(broken);

        let redemption = redeem(&manager, &platform, payload(token(Some("M-42"))), RecordOrdering::RecordFirst)
            .await
            .unwrap();
        assert_eq!(redemption.propagation.changed, vec![other]);
        assert_eq!(redemption.propagation.failed[0].0, broken);
        assert_eq!(platform.roles_of(other, USER), Some(vec![RoleId::new(301)]));
    }

    #[test]
    fn test_payload_merge_prefers_body() {
        let body = CallbackPayload {
            jwt: Some("body".to_string()),
            member_id: Some("  ".to_string()),
        };
        let query = CallbackPayload {
            jwt: Some("query".to_string()),
            member_id: Some("M-1".to_string()),
        };
        let merged = body.or(query);
        assert_eq!(merged.jwt.as_deref(), Some("body"));
        assert_eq!(merged.member_id.as_deref(), Some("M-1"));
    }
}
