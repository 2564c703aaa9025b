use poise::serenity_prelude::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::store::JsonStore;
use crate::error::Result;

/// Global record of verified users: Discord user ID -> external member ID
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifiedMembers {
    /// Schema version for migrations
    pub version: u32,

    /// Last update timestamp
    pub last_updated: u64,

    /// Map of Discord ID (as string) to member ID
    pub members: BTreeMap<String, String>,
}

impl Default for VerifiedMembers {
    fn default() -> Self {
        Self {
            version: 1,
            last_updated: current_timestamp(),
            members: BTreeMap::new(),
        }
    }
}

/// The single source of truth for "is this user verified", shared by every
/// guild
pub struct VerifiedMemberStore {
    store: JsonStore<VerifiedMembers>,
}

impl VerifiedMemberStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: JsonStore::open(path).await?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: JsonStore::in_memory(VerifiedMembers::default()),
        }
    }

    pub async fn get_all(&self) -> BTreeMap<UserId, String> {
        self.store
            .read(|db| {
                db.members
                    .iter()
                    .filter_map(|(user, member)| {
                        let id = user.parse::<u64>().ok().filter(|id| *id != 0)?;
                        Some((UserId::new(id), member.clone()))
                    })
                    .collect()
            })
            .await
    }

    pub async fn get(&self, user_id: UserId) -> Option<String> {
        self.store
            .read(|db| db.members.get(&user_id.to_string()).cloned())
            .await
    }

    pub async fn is_verified(&self, user_id: UserId) -> bool {
        self.get(user_id).await.is_some()
    }

    pub async fn count(&self) -> usize {
        self.store.read(|db| db.members.len()).await
    }

    /// Record a mapping, returning the member ID it replaced
    pub async fn set(&self, user_id: UserId, member_id: &str) -> Result<Option<String>> {
        self.store
            .update(|db| {
                db.last_updated = current_timestamp();
                db.members.insert(user_id.to_string(), member_id.to_string())
            })
            .await
    }

    /// Remove a mapping. Removing a user with no record is a no-op.
    pub async fn delete(&self, user_id: UserId) -> Result<Option<String>> {
        self.store
            .update(|db| {
                let removed = db.members.remove(&user_id.to_string());
                if removed.is_some() {
                    db.last_updated = current_timestamp();
                }
                removed
            })
            .await
    }

    /// Remove every mapping, returning what was removed
    pub async fn clear(&self) -> Result<BTreeMap<String, String>> {
        self.store
            .update(|db| {
                db.last_updated = current_timestamp();
                std::mem::take(&mut db.members)
            })
            .await
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::temp_state_path;

    #[tokio::test]
    async fn test_set_overwrites_previous_mapping() {
        let store = VerifiedMemberStore::in_memory();
        let user = UserId::new(5);

        assert_eq!(store.set(user, "M1").await.unwrap(), None);
        assert_eq!(store.set(user, "M2").await.unwrap(), Some("M1".to_string()));
        assert_eq!(store.get(user).await.as_deref(), Some("M2"));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = VerifiedMemberStore::in_memory();
        let user = UserId::new(5);
        store.set(user, "M1").await.unwrap();

        assert_eq!(store.delete(user).await.unwrap(), Some("M1".to_string()));
        assert_eq!(store.delete(user).await.unwrap(), None);
        assert!(!store.is_verified(user).await);
    }

    #[tokio::test]
    async fn test_clear_returns_removed() {
        let store = VerifiedMemberStore::in_memory();
        store.set(UserId::new(1), "A").await.unwrap();
        store.set(UserId::new(2), "B").await.unwrap();

        let removed = store.clear().await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_survives_reload() {
        let path = temp_state_path("verified_members.json");
        {
            let store = VerifiedMemberStore::open(&path).await.unwrap();
            store.set(UserId::new(77), "M77").await.unwrap();
        }
        let store = VerifiedMemberStore::open(&path).await.unwrap();
        let all = store.get_all().await;
        assert_eq!(all.get(&UserId::new(77)).map(String::as_str), Some("M77"));
    }
}
