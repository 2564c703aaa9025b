use poise::serenity_prelude::{GuildId, RoleId, UserId};
use tracing::{debug, info, warn};

use crate::config::VerifierConfig;
use crate::platform::{Platform, PlatformError, PlatformResult};

/// What happened when the verified role was requested for a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleGrant {
    Granted,
    AlreadyHeld,
}

/// Per-guild outcome of a cross-guild role sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoleSweep {
    pub changed: Vec<GuildId>,
    pub unchanged: Vec<GuildId>,
    pub failed: Vec<(GuildId, PlatformError)>,
}

impl RoleSweep {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Assigns and removes the configured verified role through a [`Platform`]
pub struct RoleManager<'a> {
    platform: &'a dyn Platform,
}

impl<'a> RoleManager<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Add `role_id` unless the member already has it
    pub async fn assign_role_to_user(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<RoleGrant> {
        let roles = self
            .platform
            .member_roles(guild_id, user_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound {
                message: format!("User {} is not a member of guild {}", user_id, guild_id),
            })?;

        if roles.contains(&role_id) {
            debug!("User {} already has role {} in guild {}", user_id, role_id, guild_id);
            return Ok(RoleGrant::AlreadyHeld);
        }

        self.platform.add_role(guild_id, user_id, role_id).await?;
        info!("Assigned role {} to user {} in guild {}", role_id, user_id, guild_id);
        Ok(RoleGrant::Granted)
    }

    /// Give the verified role in every other guild that has verification
    /// enabled and a role configured, where the user is a member. Failures
    /// are logged and skipped.
    pub async fn propagate(
        &self,
        config: &VerifierConfig,
        user_id: UserId,
        skip: Option<GuildId>,
    ) -> RoleSweep {
        let mut sweep = RoleSweep::default();

        for guild_id in self.platform.guilds() {
            if Some(guild_id) == skip {
                continue;
            }
            let Some(role_id) = config.guild(guild_id).active_role() else {
                continue;
            };

            match self.platform.member_roles(guild_id, user_id).await {
                Ok(Some(roles)) if roles.contains(&role_id) => sweep.unchanged.push(guild_id),
                Ok(Some(_)) => match self.platform.add_role(guild_id, user_id, role_id).await {
                    Ok(()) => {
                        info!("Propagated verified role to user {} in guild {}", user_id, guild_id);
                        sweep.changed.push(guild_id);
                    }
                    Err(e) => {
                        warn!(
                            "Failed to add verified role for user {} in guild {}: {}",
                            user_id, guild_id, e
                        );
                        sweep.failed.push((guild_id, e));
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to fetch member {} in guild {}: {}", user_id, guild_id, e);
                    sweep.failed.push((guild_id, e));
                }
            }
        }

        sweep
    }

    /// Remove the verified role from the user in every guild with
    /// verification enabled
    pub async fn revoke_everywhere(&self, config: &VerifierConfig, user_id: UserId) -> RoleSweep {
        let mut sweep = RoleSweep::default();

        for guild_id in self.platform.guilds() {
            let Some(role_id) = config.guild(guild_id).active_role() else {
                continue;
            };

            match self.platform.member_roles(guild_id, user_id).await {
                Ok(Some(roles)) if roles.contains(&role_id) => {
                    match self.platform.remove_role(guild_id, user_id, role_id).await {
                        Ok(()) => {
                            info!("Removed verified role from user {} in guild {}", user_id, guild_id);
                            sweep.changed.push(guild_id);
                        }
                        Err(e) => {
                            warn!(
                                "Failed to remove verified role for user {} in guild {}: {}",
                                user_id, guild_id, e
                            );
                            sweep.failed.push((guild_id, e));
                        }
                    }
                }
                Ok(Some(_)) => sweep.unchanged.push(guild_id),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to fetch member {} in guild {}: {}", user_id, guild_id, e);
                    sweep.failed.push((guild_id, e));
                }
            }
        }

        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuildVerificationConfig;
    use crate::platform::mock::MockPlatform;

    fn enabled(role: u64) -> GuildVerificationConfig {
        GuildVerificationConfig {
            role_id: Some(RoleId::new(role)),
            verification_enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_assign_skips_held_role() {
        let platform = MockPlatform::new();
        let (guild, user, role) = (GuildId::new(1), UserId::new(5), RoleId::new(9));
        platform.add_member(guild, user, vec![role]);

        let roles = RoleManager::new(&platform);
        assert_eq!(
            roles.assign_role_to_user(guild, user, role).await.unwrap(),
            RoleGrant::AlreadyHeld
        );
    }

    #[tokio::test]
    async fn test_assign_requires_membership() {
        let platform = MockPlatform::new();
        platform.add_guild(GuildId::new(1));

        let roles = RoleManager::new(&platform);
        let err = roles
            .assign_role_to_user(GuildId::new(1), UserId::new(5), RoleId::new(9))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_propagate_continues_past_failures() {
        let platform = MockPlatform::new();
        let user = UserId::new(5);
        let (g1, g2, g3, g4) = (GuildId::new(1), GuildId::new(2), GuildId::new(3), GuildId::new(4));
        platform.add_member(g1, user, vec![]);
        platform.add_member(g2, user, vec![]);
        platform.add_member(g3, user, vec![]);
        platform.add_guild(g4);
        platform.forbid_roles(g2);

        let mut config = VerifierConfig::default();
        *config.guild_mut(g1) = enabled(10);
        *config.guild_mut(g2) = enabled(20);
        *config.guild_mut(g3) = GuildVerificationConfig {
            verification_enabled: false,
            ..enabled(30)
        };
        *config.guild_mut(g4) = enabled(40);

        let sweep = RoleManager::new(&platform).propagate(&config, user, None).await;
        assert_eq!(sweep.changed, vec![g1]);
        assert_eq!(sweep.failed.len(), 1);
        assert_eq!(sweep.failed[0].0, g2);
        assert_eq!(platform.roles_of(g1, user), Some(vec![RoleId::new(10)]));
        assert_eq!(platform.roles_of(g3, user), Some(vec![]));
    }

    #[tokio::test]
    async fn test_revoke_everywhere() {
        let platform = MockPlatform::new();
        let user = UserId::new(5);
        let (g1, g2) = (GuildId::new(1), GuildId::new(2));
        platform.add_member(g1, user, vec![RoleId::new(10), RoleId::new(99)]);
        platform.add_member(g2, user, vec![]);

        let mut config = VerifierConfig::default();
        *config.guild_mut(g1) = enabled(10);
        *config.guild_mut(g2) = enabled(20);

        let sweep = RoleManager::new(&platform).revoke_everywhere(&config, user).await;
        assert_eq!(sweep.changed, vec![g1]);
        assert_eq!(sweep.unchanged, vec![g2]);
        assert!(sweep.is_clean());
        assert_eq!(platform.roles_of(g1, user), Some(vec![RoleId::new(99)]));
    }
}
