//! Scripted in-memory platform for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use super::{Platform, PlatformError, PlatformResult};

#[derive(Default)]
struct MockState {
    guilds: Vec<GuildId>,
    members: HashMap<(GuildId, UserId), Vec<RoleId>>,
    /// Queued DM replies per user; `None` simulates a timeout
    replies: HashMap<UserId, VecDeque<Option<String>>>,
    dm_forbidden: HashSet<UserId>,
    role_forbidden: HashSet<GuildId>,
    kick_allowed: HashSet<GuildId>,
    /// Kick permission is reported but the kick itself is rejected
    kick_rejected: HashSet<GuildId>,
    dms: Vec<(UserId, String)>,
    channel_messages: Vec<(ChannelId, String)>,
    kicked: Vec<(GuildId, UserId)>,
}

#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guild(&self, guild_id: GuildId) {
        let mut state = self.state.lock();
        if !state.guilds.contains(&guild_id) {
            state.guilds.push(guild_id);
        }
    }

    pub fn add_member(&self, guild_id: GuildId, user_id: UserId, roles: Vec<RoleId>) {
        self.add_guild(guild_id);
        self.state.lock().members.insert((guild_id, user_id), roles);
    }

    pub fn script_reply(&self, user_id: UserId, reply: Option<&str>) {
        self.state
            .lock()
            .replies
            .entry(user_id)
            .or_default()
            .push_back(reply.map(str::to_string));
    }

    pub fn forbid_dms(&self, user_id: UserId) {
        self.state.lock().dm_forbidden.insert(user_id);
    }

    pub fn forbid_roles(&self, guild_id: GuildId) {
        self.state.lock().role_forbidden.insert(guild_id);
    }

    pub fn allow_kick(&self, guild_id: GuildId) {
        self.state.lock().kick_allowed.insert(guild_id);
    }

    pub fn reject_kicks(&self, guild_id: GuildId) {
        let mut state = self.state.lock();
        state.kick_allowed.insert(guild_id);
        state.kick_rejected.insert(guild_id);
    }

    pub fn dms_to(&self, user_id: UserId) -> Vec<String> {
        self.state
            .lock()
            .dms
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn channel_messages(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().channel_messages.clone()
    }

    pub fn roles_of(&self, guild_id: GuildId, user_id: UserId) -> Option<Vec<RoleId>> {
        self.state.lock().members.get(&(guild_id, user_id)).cloned()
    }

    pub fn kicked(&self) -> Vec<(GuildId, UserId)> {
        self.state.lock().kicked.clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn send_dm(&self, user_id: UserId, content: &str) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if state.dm_forbidden.contains(&user_id) {
            return Err(PlatformError::Forbidden {
                message: "Cannot send messages to this user".to_string(),
            });
        }
        state.dms.push((user_id, content.to_string()));
        Ok(())
    }

    async fn send_channel(&self, channel_id: ChannelId, content: &str) -> PlatformResult<()> {
        self.state
            .lock()
            .channel_messages
            .push((channel_id, content.to_string()));
        Ok(())
    }

    async fn await_dm_reply(&self, user_id: UserId, _timeout: Duration) -> PlatformResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .replies
            .get_mut(&user_id)
            .and_then(VecDeque::pop_front)
            .flatten())
    }

    async fn guild_exists(&self, guild_id: GuildId) -> bool {
        self.state.lock().guilds.contains(&guild_id)
    }

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> PlatformResult<Option<Vec<RoleId>>> {
        Ok(self.roles_of(guild_id, user_id))
    }

    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if state.role_forbidden.contains(&guild_id) {
            return Err(PlatformError::Forbidden {
                message: "Missing Permissions".to_string(),
            });
        }
        let roles = state
            .members
            .get_mut(&(guild_id, user_id))
            .ok_or_else(|| PlatformError::NotFound {
                message: "Unknown Member".to_string(),
            })?;
        if !roles.contains(&role_id) {
            roles.push(role_id);
        }
        Ok(())
    }

    async fn remove_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if state.role_forbidden.contains(&guild_id) {
            return Err(PlatformError::Forbidden {
                message: "Missing Permissions".to_string(),
            });
        }
        if let Some(roles) = state.members.get_mut(&(guild_id, user_id)) {
            roles.retain(|r| *r != role_id);
        }
        Ok(())
    }

    async fn can_kick(&self, guild_id: GuildId) -> bool {
        self.state.lock().kick_allowed.contains(&guild_id)
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, _reason: &str) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if !state.kick_allowed.contains(&guild_id) || state.kick_rejected.contains(&guild_id) {
            return Err(PlatformError::Forbidden {
                message: "Missing Permissions".to_string(),
            });
        }
        state.members.remove(&(guild_id, user_id));
        state.kicked.push((guild_id, user_id));
        Ok(())
    }

    fn guilds(&self) -> Vec<GuildId> {
        self.state.lock().guilds.clone()
    }
}
