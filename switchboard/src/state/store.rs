use std::time::Duration;

use async_trait::async_trait;

use super::error::StateResult;

/// Key-value backing store shared by every gateway and worker process.
///
/// The store never interprets values. There is no transaction support: every
/// call is an independent command and concurrent writers race (last writer
/// wins per key).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Write a value. `ttl` of `None` keeps the key until deleted.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StateResult<()>;

    /// Read a value. `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> StateResult<()>;

    /// Add members to a set. Empty input is a no-op.
    async fn add_to_set(&self, key: &str, members: &[String]) -> StateResult<()>;

    async fn remove_from_set(&self, key: &str, member: &str) -> StateResult<()>;

    /// All members of a set; empty if the set does not exist.
    async fn set_members(&self, key: &str) -> StateResult<Vec<String>>;

    async fn is_set_member(&self, key: &str, member: &str) -> StateResult<bool>;

    /// Push items onto the head of a list. Empty input is a no-op.
    async fn push_list(&self, key: &str, items: &[String]) -> StateResult<()>;

    /// Keep only the inclusive index range `start..=stop` of a list.
    async fn trim_list(&self, key: &str, start: isize, stop: isize) -> StateResult<()>;

    /// Read the inclusive index range `start..=stop`; negative indices count
    /// from the tail (`-1` is the last item).
    async fn range_list(&self, key: &str, start: isize, stop: isize) -> StateResult<Vec<String>>;

    /// Write a value only if the key is absent. Returns true if written.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<bool>;
}

/// Resolve redis-style inclusive list indices against a list length.
/// Returns `None` when the range selects nothing.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}
