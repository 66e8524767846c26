use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::error::StateResult;
use super::store::{StateStore, resolve_range};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process store with the same semantics as the Redis backend.
///
/// Intended for tests and single-process embedding. Sets are ordered so that
/// reads are deterministic.
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, Entry>,
    sets: DashMap<String, BTreeSet<String>>,
    lists: DashMap<String, VecDeque<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live plain values (not sets or lists).
    pub fn value_count(&self) -> usize {
        let now = Instant::now();
        self.values.iter().filter(|e| e.is_live(now)).count()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StateResult<()> {
        self.values.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .values
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> StateResult<()> {
        self.values.remove(key);
        self.sets.remove(key);
        self.lists.remove(key);
        Ok(())
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> StateResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.sets
            .entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> StateResult<()> {
        // Take the write guard in its own statement so it is released before
        // `remove_if` locks the same shard.
        let now_empty = match self.sets.get_mut(key) {
            Some(mut set) => {
                set.remove(member);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sets.remove_if(key, |_, set| set.is_empty());
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StateResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn is_set_member(&self, key: &str, member: &str) -> StateResult<bool> {
        Ok(self.sets.get(key).is_some_and(|set| set.contains(member)))
    }

    async fn push_list(&self, key: &str, items: &[String]) -> StateResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut list = self.lists.entry(key.to_string()).or_default();
        for item in items {
            list.push_front(item.clone());
        }
        Ok(())
    }

    async fn trim_list(&self, key: &str, start: isize, stop: isize) -> StateResult<()> {
        let emptied = match self.lists.get_mut(key) {
            Some(mut list) => match resolve_range(list.len(), start, stop) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                    list.is_empty()
                }
                None => true,
            },
            None => false,
        };
        if emptied {
            self.lists.remove(key);
        }
        Ok(())
    }

    async fn range_list(&self, key: &str, start: isize, stop: isize) -> StateResult<Vec<String>> {
        let Some(list) = self.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<bool> {
        let now = Instant::now();
        let mut entry = self.values.entry(key.to_string()).or_insert(Entry {
            value: Vec::new(),
            expires_at: Some(now),
        });
        if entry.is_live(now) {
            return Ok(false);
        }
        *entry = Entry {
            value: value.to_vec(),
            expires_at: Some(now + ttl),
        };
        Ok(true)
    }
}
