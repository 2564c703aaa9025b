use dashmap::DashMap;
use poise::serenity_prelude::{GuildId, UserId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{BotSettings, VerifierConfig};
use crate::error::{Result, TokenError};
use crate::managers::role_manager::{RoleManager, RoleSweep};
use crate::platform::Platform;
use crate::state::{ConfigStore, IncorrectAnswerLedger, VerifiedMemberStore};
use crate::verification::TokenCodec;

/// Owns the persisted verifier state and the set of users with a challenge
/// in flight
pub struct VerificationManager {
    config: ConfigStore,
    members: VerifiedMemberStore,
    ledger: IncorrectAnswerLedger,

    /// Users with an active challenge (user_id -> guild it was started for)
    pending: DashMap<UserId, GuildId>,
}

impl VerificationManager {
    pub fn new(config: ConfigStore, members: VerifiedMemberStore, ledger: IncorrectAnswerLedger) -> Self {
        Self {
            config,
            members,
            ledger,
            pending: DashMap::new(),
        }
    }

    /// Load all three state files from the configured state directory
    pub async fn load(settings: &BotSettings) -> Result<Self> {
        let config = ConfigStore::open(settings.config_file()).await?;
        let members = VerifiedMemberStore::open(settings.verified_members_file()).await?;
        let ledger = IncorrectAnswerLedger::open(settings.incorrect_answers_file()).await?;

        info!(
            "Loaded verifier state from {} ({} verified members, {} distinct wrong answers)",
            settings.state_path.display(),
            members.count().await,
            ledger.len().await
        );
        Ok(Self::new(config, members, ledger))
    }

    /// Manager with nothing on disk
    pub fn in_memory(config: VerifierConfig) -> Self {
        Self::new(
            ConfigStore::in_memory(config),
            VerifiedMemberStore::in_memory(),
            IncorrectAnswerLedger::in_memory(),
        )
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn members(&self) -> &VerifiedMemberStore {
        &self.members
    }

    pub fn ledger(&self) -> &IncorrectAnswerLedger {
        &self.ledger
    }

    /// Codec for the currently configured secret
    pub async fn token_codec(&self) -> std::result::Result<TokenCodec, TokenError> {
        let global = self.config.global().await;
        TokenCodec::from_secret(global.jwt_secret.as_deref())
    }

    pub async fn is_verified(&self, user_id: UserId) -> bool {
        self.members.is_verified(user_id).await
    }

    /// Claim the single challenge slot for a user. Returns `None` while
    /// another challenge for the same user is still running; the slot is
    /// released when the guard drops.
    pub fn begin_challenge(&self, user_id: UserId, guild_id: GuildId) -> Option<PendingChallenge<'_>> {
        match self.pending.entry(user_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                debug!(
                    "User {} already has a challenge running for guild {}",
                    user_id,
                    existing.get()
                );
                None
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(guild_id);
                debug!("Started challenge for user {} in guild {}", user_id, guild_id);
                Some(PendingChallenge {
                    pending: &self.pending,
                    user_id,
                })
            }
        }
    }

    pub fn is_pending(&self, user_id: UserId) -> bool {
        self.pending.contains_key(&user_id)
    }

    /// Drop the user's verified record and take the verified role away in
    /// every enabled guild. Returns the member ID that was removed.
    pub async fn unverify(
        &self,
        platform: &dyn Platform,
        user_id: UserId,
    ) -> Result<(Option<String>, RoleSweep)> {
        let removed = self.members.delete(user_id).await?;
        let config = self.config.snapshot().await;
        let sweep = RoleManager::new(platform).revoke_everywhere(&config, user_id).await;
        info!(
            "Unverified user {} (record removed: {}, roles removed in {} guild(s))",
            user_id,
            removed.is_some(),
            sweep.changed.len()
        );
        Ok((removed, sweep))
    }

    /// Erase everything stored about a user. Safe to call for unknown users.
    pub async fn delete_user_data(&self, user_id: UserId) -> Result<ErasedData> {
        let member_id = self.members.delete(user_id).await?;
        let responder_entries = self.ledger.forget_user(user_id).await?;
        info!(
            "Erased data for user {} (member record: {}, ledger entries touched: {})",
            user_id,
            member_id.is_some(),
            responder_entries
        );
        Ok(ErasedData {
            member_id,
            responder_entries,
        })
    }
}

/// Releases a user's challenge slot on drop
pub struct PendingChallenge<'a> {
    pending: &'a DashMap<UserId, GuildId>,
    user_id: UserId,
}

impl Drop for PendingChallenge<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.user_id);
    }
}

/// What [`VerificationManager::delete_user_data`] removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasedData {
    pub member_id: Option<String>,
    pub responder_entries: usize,
}

/// Shared verification manager type
pub type SharedVerificationManager = Arc<VerificationManager>;

pub fn create_shared_verification_manager(manager: VerificationManager) -> SharedVerificationManager {
    Arc::new(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuildVerificationConfig;
    use crate::platform::mock::MockPlatform;
    use crate::verification::normalize_answer;
    use poise::serenity_prelude::RoleId;

    #[test]
    fn test_single_challenge_per_user() {
        let manager = VerificationManager::in_memory(VerifierConfig::default());
        let user = UserId::new(7);

        let guard = manager.begin_challenge(user, GuildId::new(1));
        assert!(guard.is_some());
        assert!(manager.is_pending(user));
        assert!(manager.begin_challenge(user, GuildId::new(2)).is_none());

        drop(guard);
        assert!(!manager.is_pending(user));
        assert!(manager.begin_challenge(user, GuildId::new(2)).is_some());
    }

    #[tokio::test]
    async fn test_token_codec_needs_secret() {
        let manager = VerificationManager::in_memory(VerifierConfig::default());
        assert_eq!(
            manager.token_codec().await.unwrap_err(),
            TokenError::MissingSecret
        );

        manager
            .config()
            .set_secret("0123456789abcdef0123456789abcdef")
            .await
            .unwrap();
        assert!(manager.token_codec().await.is_ok());
    }

    #[tokio::test]
    async fn test_unverify_removes_record_and_roles() {
        let mut config = VerifierConfig::default();
        let (guild, user, role) = (GuildId::new(1), UserId::new(5), RoleId::new(9));
        *config.guild_mut(guild) = GuildVerificationConfig {
            role_id: Some(role),
            verification_enabled: true,
            ..Default::default()
        };
        let manager = VerificationManager::in_memory(config);
        let platform = MockPlatform::new();
        platform.add_member(guild, user, vec![role]);
        manager.members().set(user, "M-1").await.unwrap();

        let (removed, sweep) = manager.unverify(&platform, user).await.unwrap();
        assert_eq!(removed.as_deref(), Some("M-1"));
        assert_eq!(sweep.changed, vec![guild]);
        assert!(!manager.is_verified(user).await);
        assert_eq!(platform.roles_of(guild, user), Some(vec![]));
    }

    #[tokio::test]
    async fn test_delete_user_data_is_idempotent() {
        let manager = VerificationManager::in_memory(VerifierConfig::default());
        let (user, other) = (UserId::new(5), UserId::new(6));
        let guild = GuildId::new(1);
        manager.members().set(user, "M-1").await.unwrap();
        manager
            .ledger()
            .record(user, guild, "Five", &normalize_answer("Five"))
            .await
            .unwrap();
        manager
            .ledger()
            .record(other, guild, "five", &normalize_answer("five"))
            .await
            .unwrap();

        let erased = manager.delete_user_data(user).await.unwrap();
        assert_eq!(erased.member_id.as_deref(), Some("M-1"));
        assert_eq!(erased.responder_entries, 1);
        assert!(!manager.is_verified(user).await);

        let entries = manager.ledger().list(10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.count, 2);
        assert_eq!(entries[0].1.responders.len(), 1);

        let again = manager.delete_user_data(user).await.unwrap();
        assert_eq!(
            again,
            ErasedData {
                member_id: None,
                responder_entries: 0
            }
        );
    }
}
