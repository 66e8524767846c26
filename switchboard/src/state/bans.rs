//! Ban list backfill.
//!
//! The gateway only announces bans as they happen, so the banned-user set of a
//! guild is seeded once from the REST API. Seeding is gated on the bot being
//! allowed to read bans and is recorded in the initialized-guilds set so later
//! runs skip the upstream call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::SharedState;
use super::error::{StateError, StateResult};
use super::models::{Ban, User};

/// Attempts per scheduled backfill, first run included.
const BAN_INIT_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Largest page the bans endpoint returns.
const BAN_PAGE_LIMIT: usize = 1000;

/// Source of a guild's complete ban list.
#[async_trait]
pub trait UpstreamBans: Send + Sync {
    /// Every ban of the guild. `NotFound` when the guild or the ban list is
    /// not accessible.
    async fn guild_bans(&self, guild_id: &str) -> StateResult<Vec<Ban>>;
}

/// `UpstreamBans` over the platform's REST API.
pub struct RestBans {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Deserialize)]
struct BanPageEntry {
    user: BanUser,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct BanUser {
    id: String,
    #[serde(default)]
    username: String,
}

impl RestBans {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn page(&self, guild_id: &str, after: Option<&str>) -> StateResult<Vec<BanPageEntry>> {
        let url = format!("{}/guilds/{}/bans", self.api_base, guild_id);
        let mut query = vec![("limit", BAN_PAGE_LIMIT.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .query(&query)
            .send()
            .await
            .map_err(|e| StateError::Upstream(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
            return Err(StateError::NotFound);
        }
        if !status.is_success() {
            return Err(StateError::Upstream(format!(
                "GET {url} returned {status}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| StateError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl UpstreamBans for RestBans {
    async fn guild_bans(&self, guild_id: &str) -> StateResult<Vec<Ban>> {
        let mut bans = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self.page(guild_id, after.as_deref()).await?;
            let full = page.len() >= BAN_PAGE_LIMIT;
            after = page.last().map(|entry| entry.user.id.clone());
            bans.extend(page.into_iter().map(|entry| Ban {
                user: User {
                    id: entry.user.id,
                    username: entry.user.username,
                    ..Default::default()
                },
                reason: entry.reason,
            }));
            if !full || after.is_none() {
                return Ok(bans);
            }
        }
    }
}

/// Exponential backoff with up to 50% random jitter.
fn backoff(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY_MS * (1 << attempt.min(5));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

impl SharedState {
    /// Seed the banned-user set of a guild, once.
    ///
    /// Without ban permission the set is cleared and the guild marked
    /// uninitialized, so a later permission grant triggers a fresh backfill.
    pub async fn initialize_guild_bans(
        &self,
        guild_id: &str,
        bot_user_id: &str,
        upstream: &dyn UpstreamBans,
    ) -> StateResult<()> {
        let banned_key = self.keys.guild_banned_user_ids(guild_id);
        let initialized_key = self.keys.ban_initialized_guild_ids();

        if !self.bot_can_read_bans(bot_user_id, guild_id).await? {
            self.store.delete(&banned_key).await?;
            self.store
                .remove_from_set(&initialized_key, guild_id)
                .await?;
            debug!(%guild_id, "bot cannot read bans, ban list cleared");
            return Ok(());
        }

        if self.store.is_set_member(&initialized_key, guild_id).await? {
            return Ok(());
        }

        self.store.delete(&banned_key).await?;
        let bans = upstream.guild_bans(guild_id).await?;
        let user_ids: Vec<String> = bans.into_iter().map(|ban| ban.user.id).collect();
        self.store.add_to_set(&banned_key, &user_ids).await?;
        self.store
            .add_to_set(&initialized_key, &[guild_id.to_string()])
            .await?;

        info!(%guild_id, bans = user_ids.len(), "ban list initialized");
        Ok(())
    }

    /// Run [`Self::initialize_guild_bans`] in the background with bounded
    /// retries. Returns immediately; failures are only logged.
    pub fn schedule_ban_initializer(&self, guild_id: &str, bot_user_id: &str) {
        let Some(upstream) = self.bans.clone() else {
            debug!(%guild_id, "no upstream ban client configured, skipping ban backfill");
            return;
        };
        if bot_user_id.is_empty() {
            return;
        }

        let state = self.clone();
        let guild_id = guild_id.to_string();
        let bot_user_id = bot_user_id.to_string();
        self.tasks.spawn(move |cancel| async move {
            run_ban_initializer(state, upstream, guild_id, bot_user_id, cancel).await;
        });
    }
}

async fn run_ban_initializer(
    state: SharedState,
    upstream: Arc<dyn UpstreamBans>,
    guild_id: String,
    bot_user_id: String,
    cancel: tokio_util::sync::CancellationToken,
) {
    for attempt in 0..BAN_INIT_ATTEMPTS {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = state.initialize_guild_bans(&guild_id, &bot_user_id, upstream.as_ref()) => result,
        };

        match result {
            Ok(()) => return,
            Err(StateError::NotFound) => {
                debug!(%guild_id, "ban backfill skipped, guild or ban list not found");
                return;
            }
            Err(e) if e.is_transient() && attempt + 1 < BAN_INIT_ATTEMPTS => {
                let delay = backoff(attempt);
                warn!(
                    %guild_id,
                    error = %e,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "ban backfill failed, will retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                warn!(%guild_id, error = %e, "ban backfill failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::engine::permissions::Permissions;
    use crate::state::keys::KeyCodec;
    use crate::state::memory::MemoryStore;
    use crate::state::models::{Guild, Member, Role};

    /// Counts calls and returns a fixed ban list, failing the first
    /// `failures` calls with a transient error.
    struct FakeBans {
        calls: AtomicUsize,
        failures: usize,
        banned: Vec<&'static str>,
    }

    impl FakeBans {
        fn new(banned: Vec<&'static str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures: 0,
                banned,
            }
        }
    }

    #[async_trait]
    impl UpstreamBans for FakeBans {
        async fn guild_bans(&self, _guild_id: &str) -> StateResult<Vec<Ban>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(StateError::Upstream("flaky".into()));
            }
            Ok(self
                .banned
                .iter()
                .map(|id| Ban {
                    user: User {
                        id: id.to_string(),
                        ..Default::default()
                    },
                    reason: None,
                })
                .collect())
        }
    }

    async fn state_with_bot(bot_permissions: Permissions) -> SharedState {
        let state = SharedState::new(Arc::new(MemoryStore::new()), KeyCodec::default());
        let guild = Guild {
            id: "g".into(),
            owner_id: "owner".into(),
            roles: Some(vec![
                Role {
                    id: "g".into(),
                    ..Default::default()
                },
                Role {
                    id: "bot-role".into(),
                    permissions: bot_permissions.bits(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        state
            .write_object(&state.keys.guild("g"), &guild)
            .await
            .unwrap();
        let member = Member {
            guild_id: "g".into(),
            user: User {
                id: "bot".into(),
                bot: true,
                ..Default::default()
            },
            roles: vec!["bot-role".into()],
            ..Default::default()
        };
        state
            .write_object(&state.keys.member("g", "bot"), &member)
            .await
            .unwrap();
        state
    }

    #[test]
    fn test_backoff_grows_with_jitter_bounds() {
        for attempt in 0..3 {
            let base = RETRY_BASE_DELAY_MS * (1 << attempt);
            let delay = backoff(attempt).as_millis() as u64;
            assert!(delay >= base && delay <= base + base / 2);
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let state = state_with_bot(Permissions::BAN_MEMBERS).await;
        let upstream = FakeBans::new(vec!["b1", "b2"]);

        state.initialize_guild_bans("g", "bot", &upstream).await.unwrap();
        state.initialize_guild_bans("g", "bot", &upstream).await.unwrap();

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            state.guild_banned_user_ids("g").await.unwrap(),
            vec!["b1", "b2"]
        );
    }

    #[tokio::test]
    async fn test_without_permission_clears_and_skips_upstream() {
        let state = state_with_bot(Permissions::BAN_MEMBERS).await;
        let upstream = FakeBans::new(vec!["b1"]);
        state.initialize_guild_bans("g", "bot", &upstream).await.unwrap();

        // Permission revoked
        let mut guild = state.guild("g").await.unwrap();
        if let Some(roles) = guild.roles.as_mut() {
            roles[1].permissions = 0;
        }
        state
            .write_object(&state.keys.guild("g"), &guild)
            .await
            .unwrap();

        state.initialize_guild_bans("g", "bot", &upstream).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert!(state.guild_banned_user_ids("g").await.unwrap().is_empty());
        assert!(
            !state
                .store()
                .is_set_member(&state.keys.ban_initialized_guild_ids(), "g")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_administrator_can_read_bans() {
        let state = state_with_bot(Permissions::ADMINISTRATOR).await;
        let upstream = FakeBans::new(vec!["b1"]);
        state.initialize_guild_bans("g", "bot", &upstream).await.unwrap();
        assert_eq!(state.guild_banned_user_ids("g").await.unwrap(), vec!["b1"]);
    }

    #[tokio::test]
    async fn test_scheduled_run_retries_transient_failures() {
        let upstream = Arc::new(FakeBans {
            failures: 1,
            ..FakeBans::new(vec!["b1"])
        });
        let state = state_with_bot(Permissions::BAN_MEMBERS)
            .await
            .with_upstream_bans(upstream.clone());

        state.schedule_ban_initializer("g", "bot");
        state.tasks().idle().await;

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.guild_banned_user_ids("g").await.unwrap(), vec!["b1"]);
    }

    #[tokio::test]
    async fn test_schedule_without_upstream_is_noop() {
        let state = state_with_bot(Permissions::BAN_MEMBERS).await;
        state.schedule_ban_initializer("g", "bot");
        assert!(state.tasks().is_empty());
    }
}
