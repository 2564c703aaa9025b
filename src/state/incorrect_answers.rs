use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use super::store::JsonStore;
use crate::error::Result;

/// Who gave a wrong answer, and where
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Responder {
    pub user_id: UserId,
    pub guild_id: GuildId,
}

/// Aggregate for one normalized wrong answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncorrectAnswerEntry {
    pub count: u64,
    /// Every raw form seen for this normalized answer
    pub originals: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub responders: BTreeSet<Responder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncorrectAnswers {
    pub version: u32,
    /// Normalized answer -> aggregate
    pub entries: HashMap<String, IncorrectAnswerEntry>,
}

impl Default for IncorrectAnswers {
    fn default() -> Self {
        Self {
            version: 1,
            entries: HashMap::new(),
        }
    }
}

/// Append-only log of wrong answers grouped by normalized text. Entries are
/// never pruned automatically.
pub struct IncorrectAnswerLedger {
    store: JsonStore<IncorrectAnswers>,
}

impl IncorrectAnswerLedger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: JsonStore::open(path).await?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: JsonStore::in_memory(IncorrectAnswers::default()),
        }
    }

    pub async fn record(
        &self,
        user_id: UserId,
        guild_id: GuildId,
        original: &str,
        normalized: &str,
    ) -> Result<u64> {
        self.record_at(user_id, guild_id, original, normalized, Utc::now())
            .await
    }

    /// Upsert the entry for `normalized`, returning its new count
    pub async fn record_at(
        &self,
        user_id: UserId,
        guild_id: GuildId,
        original: &str,
        normalized: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.store
            .update(|ledger| {
                let entry = ledger
                    .entries
                    .entry(normalized.to_string())
                    .or_insert_with(|| IncorrectAnswerEntry {
                        count: 0,
                        originals: BTreeSet::new(),
                        first_seen: now,
                        last_seen: now,
                        responders: BTreeSet::new(),
                    });
                entry.count += 1;
                entry.originals.insert(original.to_string());
                entry.responders.insert(Responder { user_id, guild_id });
                if now > entry.last_seen {
                    entry.last_seen = now;
                }
                entry.count
            })
            .await
    }

    /// Entries ordered by count, then most recent, descending
    pub async fn list(&self, limit: usize) -> Vec<(String, IncorrectAnswerEntry)> {
        let mut entries: Vec<(String, IncorrectAnswerEntry)> = self
            .store
            .read(|ledger| {
                ledger
                    .entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .await;

        entries.sort_by(|(ka, a), (kb, b)| {
            b.count
                .cmp(&a.count)
                .then(b.last_seen.cmp(&a.last_seen))
                .then(ka.cmp(kb))
        });
        entries.truncate(limit);
        entries
    }

    pub async fn len(&self) -> usize {
        self.store.read(|ledger| ledger.entries.len()).await
    }

    /// Empty the ledger, returning how many entries were removed
    pub async fn clear(&self) -> Result<usize> {
        self.store
            .update(|ledger| {
                let removed = ledger.entries.len();
                ledger.entries.clear();
                removed
            })
            .await
    }

    /// Drop a user's responder pairs. Counts are left as they are.
    pub async fn forget_user(&self, user_id: UserId) -> Result<usize> {
        self.store
            .update(|ledger| {
                let mut removed = 0;
                for entry in ledger.entries.values_mut() {
                    let before = entry.responders.len();
                    entry.responders.retain(|r| r.user_id != user_id);
                    removed += before - entry.responders.len();
                }
                removed
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::normalize_answer;
    use chrono::Duration;

    async fn record(ledger: &IncorrectAnswerLedger, user: u64, guild: u64, raw: &str, at: i64) {
        let now = DateTime::from_timestamp(1_700_000_000 + at, 0).unwrap();
        ledger
            .record_at(
                UserId::new(user),
                GuildId::new(guild),
                raw,
                &normalize_answer(raw),
                now,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_same_user_two_guilds_groups_by_normalized_form() {
        let ledger = IncorrectAnswerLedger::in_memory();
        record(&ledger, 1, 10, "Five", 0).await;
        record(&ledger, 1, 20, "five!", 1).await;
        record(&ledger, 1, 20, "Five", 2).await;

        let entries = ledger.list(10).await;
        assert_eq!(entries.len(), 1);
        let (key, entry) = &entries[0];
        assert_eq!(key, "five");
        assert_eq!(entry.count, 3);
        assert_eq!(entry.originals.len(), 2);
        assert_eq!(entry.responders.len(), 2);
        assert!(entry.last_seen > entry.first_seen);
    }

    #[tokio::test]
    async fn test_same_user_same_guild_is_one_responder() {
        let ledger = IncorrectAnswerLedger::in_memory();
        for i in 0..3 {
            record(&ledger, 1, 10, "FIVE", i).await;
        }

        let (_, entry) = &ledger.list(10).await[0];
        assert_eq!(entry.count, 3);
        assert_eq!(entry.originals.len(), 1);
        assert_eq!(entry.responders.len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_count_then_recency() {
        let ledger = IncorrectAnswerLedger::in_memory();
        record(&ledger, 1, 10, "a", 0).await;
        record(&ledger, 2, 10, "b", 5).await;
        record(&ledger, 3, 10, "c", 1).await;
        record(&ledger, 3, 10, "c", 2).await;

        let keys: Vec<String> = ledger.list(10).await.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["c", "b", "a"]);

        assert_eq!(ledger.list(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_timestamp_keeps_latest() {
        let ledger = IncorrectAnswerLedger::in_memory();
        record(&ledger, 1, 10, "x", 10).await;
        record(&ledger, 1, 10, "x", 0).await;

        let (_, entry) = &ledger.list(1).await[0];
        let expected = DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::seconds(10);
        assert_eq!(entry.last_seen, expected);
    }

    #[tokio::test]
    async fn test_clear_and_forget() {
        let ledger = IncorrectAnswerLedger::in_memory();
        record(&ledger, 1, 10, "x", 0).await;
        record(&ledger, 2, 10, "x", 1).await;

        assert_eq!(ledger.forget_user(UserId::new(1)).await.unwrap(), 1);
        let (_, entry) = &ledger.list(1).await[0];
        assert_eq!(entry.count, 2);
        assert_eq!(entry.responders.len(), 1);

        assert_eq!(ledger.clear().await.unwrap(), 1);
        assert_eq!(ledger.len().await, 0);
    }
}
