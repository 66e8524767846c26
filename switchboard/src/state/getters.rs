use std::sync::LazyLock;

use regex::Regex;

use crate::engine::permissions::{Permissions, member_channel_permissions, member_permissions};

use super::SharedState;
use super::error::{StateError, StateResult};
use super::models::{Channel, ChannelType, Emoji, Guild, Member, Message, Presence, Role, User};

static USER_MENTION: LazyLock<Regex> = LazyLock::new(|| mention_regex("@!?"));
static CHANNEL_MENTION: LazyLock<Regex> = LazyLock::new(|| mention_regex("#"));
static ROLE_MENTION: LazyLock<Regex> = LazyLock::new(|| mention_regex("@&"));

/// `<{opener}id>` or a bare id.
fn mention_regex(opener: &str) -> Regex {
    Regex::new(&format!(r"^(?:<{opener}([0-9]+)>|([0-9]+))$"))
        .expect("mention pattern is valid")
}

/// Extract the id from a mention such as `<@!123>`, or accept a bare id.
fn mention_id<'a>(pattern: &Regex, text: &'a str) -> Option<&'a str> {
    let captures = pattern.captures(text.trim())?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str())
}

impl SharedState {
    // ── Direct lookups ──────────────────────────────────────────

    pub async fn guild(&self, guild_id: &str) -> StateResult<Guild> {
        self.read_object(&self.keys.guild(guild_id)).await
    }

    pub async fn channel(&self, channel_id: &str) -> StateResult<Channel> {
        self.read_object(&self.keys.channel(channel_id)).await
    }

    pub async fn member(&self, guild_id: &str, user_id: &str) -> StateResult<Member> {
        self.read_object(&self.keys.member(guild_id, user_id)).await
    }

    pub async fn user(&self, user_id: &str) -> StateResult<User> {
        self.read_object(&self.keys.user(user_id)).await
    }

    // ── Lookups inside a guild ──────────────────────────────────

    pub async fn role(&self, guild_id: &str, role_id: &str) -> StateResult<Role> {
        self.guild(guild_id)
            .await?
            .roles
            .unwrap_or_default()
            .into_iter()
            .find(|r| r.id == role_id)
            .ok_or(StateError::NotFound)
    }

    pub async fn emoji(&self, guild_id: &str, emoji_id: &str) -> StateResult<Emoji> {
        self.guild(guild_id)
            .await?
            .emojis
            .unwrap_or_default()
            .into_iter()
            .find(|e| e.id == emoji_id)
            .ok_or(StateError::NotFound)
    }

    pub async fn presence(&self, guild_id: &str, user_id: &str) -> StateResult<Presence> {
        self.guild(guild_id)
            .await?
            .presences
            .unwrap_or_default()
            .into_iter()
            .find(|p| p.user.id == user_id)
            .ok_or(StateError::NotFound)
    }

    // ── Indices ─────────────────────────────────────────────────

    pub async fn all_guild_ids(&self) -> StateResult<Vec<String>> {
        self.store.set_members(&self.keys.all_guild_ids()).await
    }

    pub async fn all_channel_ids(&self) -> StateResult<Vec<String>> {
        self.store.set_members(&self.keys.all_channel_ids()).await
    }

    pub async fn all_user_ids(&self) -> StateResult<Vec<String>> {
        self.store.set_members(&self.keys.all_user_ids()).await
    }

    pub async fn guild_user_ids(&self, guild_id: &str) -> StateResult<Vec<String>> {
        self.store
            .set_members(&self.keys.guild_user_ids(guild_id))
            .await
    }

    /// Banned user ids. Only populated while the bot can read the guild's bans.
    pub async fn guild_banned_user_ids(&self, guild_id: &str) -> StateResult<Vec<String>> {
        self.store
            .set_members(&self.keys.guild_banned_user_ids(guild_id))
            .await
    }

    /// One of the bots present in the guild.
    pub async fn bot_id_for_guild(&self, guild_id: &str) -> StateResult<String> {
        self.store
            .set_members(&self.keys.guild_bot_ids(guild_id))
            .await?
            .into_iter()
            .next()
            .ok_or(StateError::NotFound)
    }

    pub async fn is_member(&self, guild_id: &str, user_id: &str) -> StateResult<bool> {
        self.store
            .is_set_member(&self.keys.guild_user_ids(guild_id), user_id)
            .await
    }

    // ── Permissions ─────────────────────────────────────────────

    /// Effective permissions of a user in a channel, overwrites included.
    pub async fn user_channel_permissions(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> StateResult<Permissions> {
        let channel = self.channel(channel_id).await?;
        let guild = self.guild(&channel.guild_id).await?;
        if user_id == guild.owner_id {
            return Ok(Permissions::all());
        }
        let member = self.member(&guild.id, user_id).await?;
        Ok(member_channel_permissions(&guild, &channel, &member))
    }

    /// Guild-wide permissions of a user.
    pub async fn user_permissions(&self, user_id: &str, guild_id: &str) -> StateResult<Permissions> {
        let guild = self.guild(guild_id).await?;
        if user_id == guild.owner_id {
            return Ok(Permissions::all());
        }
        let member = self.member(&guild.id, user_id).await?;
        Ok(member_permissions(&guild, &member))
    }

    // ── Messages ────────────────────────────────────────────────

    /// Recently cached messages of a channel, newest first.
    pub async fn channel_messages(&self, channel_id: &str) -> StateResult<Vec<Message>> {
        let encoded = self
            .store
            .range_list(&self.keys.channel_messages(channel_id), 0, -1)
            .await?;
        encoded
            .iter()
            .map(|m| serde_json::from_str(m).map_err(StateError::from))
            .collect()
    }

    // ── Mentions ────────────────────────────────────────────────

    /// Resolve `<@id>`, `<@!id>` or a bare id to a cached user.
    pub async fn user_from_mention(&self, text: &str) -> StateResult<User> {
        let id = mention_id(&USER_MENTION, text).ok_or(StateError::NotFound)?;
        self.user(id).await
    }

    /// Resolve `<#id>` or a bare id to a channel of `guild_id` with the
    /// expected kind.
    pub async fn channel_from_mention(
        &self,
        guild_id: &str,
        text: &str,
        expected: ChannelType,
    ) -> StateResult<Channel> {
        let id = mention_id(&CHANNEL_MENTION, text).ok_or(StateError::NotFound)?;
        let channel = self.channel(id).await?;
        if channel.guild_id != guild_id {
            return Err(StateError::WrongServer);
        }
        if channel.kind != expected {
            return Err(StateError::WrongType);
        }
        Ok(channel)
    }

    /// Resolve `<@&id>` or a bare id to a role of `guild_id`.
    pub async fn role_from_mention(&self, guild_id: &str, text: &str) -> StateResult<Role> {
        let id = mention_id(&ROLE_MENTION, text).ok_or(StateError::NotFound)?;
        self.role(guild_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::state::keys::KeyCodec;
    use crate::state::memory::MemoryStore;

    #[test]
    fn test_mention_id() {
        assert_eq!(mention_id(&USER_MENTION, "<@123>"), Some("123"));
        assert_eq!(mention_id(&USER_MENTION, "<@!123>"), Some("123"));
        assert_eq!(mention_id(&USER_MENTION, " 123 "), Some("123"));
        assert_eq!(mention_id(&CHANNEL_MENTION, "<#55>"), Some("55"));
        assert_eq!(mention_id(&ROLE_MENTION, "<@&9>"), Some("9"));
        assert_eq!(mention_id(&USER_MENTION, "<@&9>"), None);
        assert_eq!(mention_id(&USER_MENTION, "<#9>"), None);
        assert_eq!(mention_id(&USER_MENTION, "bob"), None);
        assert_eq!(mention_id(&USER_MENTION, "<@>"), None);
        assert_eq!(mention_id(&USER_MENTION, "<@12>x"), None);
    }

    async fn seeded() -> SharedState {
        let state = SharedState::new(Arc::new(MemoryStore::new()), KeyCodec::default());
        let guild = Guild {
            id: "1".into(),
            owner_id: "100".into(),
            roles: Some(vec![
                Role {
                    id: "1".into(),
                    permissions: Permissions::VIEW_CHANNEL.bits(),
                    ..Default::default()
                },
                Role {
                    id: "7".into(),
                    name: "mods".into(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        state
            .write_object(&state.keys.guild("1"), &guild)
            .await
            .unwrap();
        for channel in [
            Channel {
                id: "10".into(),
                guild_id: "1".into(),
                ..Default::default()
            },
            Channel {
                id: "11".into(),
                guild_id: "1".into(),
                kind: ChannelType::GuildVoice,
                ..Default::default()
            },
            Channel {
                id: "20".into(),
                guild_id: "2".into(),
                ..Default::default()
            },
        ] {
            state
                .write_object(&state.keys.channel(&channel.id), &channel)
                .await
                .unwrap();
        }
        state
            .write_object(
                &state.keys.user("5"),
                &User {
                    id: "5".into(),
                    username: "alice".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_lookups_not_found() {
        let state = seeded().await;
        assert!(matches!(state.guild("nope").await, Err(StateError::NotFound)));
        assert!(matches!(
            state.role("1", "nope").await,
            Err(StateError::NotFound)
        ));
        assert!(matches!(
            state.bot_id_for_guild("1").await,
            Err(StateError::NotFound)
        ));
        assert!(state.all_guild_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owner_has_all_permissions_without_member_record() {
        let state = seeded().await;
        assert_eq!(
            state.user_permissions("100", "1").await.unwrap(),
            Permissions::all()
        );
        assert_eq!(
            state.user_channel_permissions("100", "10").await.unwrap(),
            Permissions::all()
        );
        assert!(matches!(
            state.user_permissions("5", "1").await,
            Err(StateError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_user_from_mention() {
        let state = seeded().await;
        assert_eq!(state.user_from_mention("<@!5>").await.unwrap().username, "alice");
        assert!(matches!(
            state.user_from_mention("alice").await,
            Err(StateError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_channel_from_mention_checks_guild_and_kind() {
        let state = seeded().await;
        assert_eq!(
            state
                .channel_from_mention("1", "<#10>", ChannelType::GuildText)
                .await
                .unwrap()
                .id,
            "10"
        );
        assert!(matches!(
            state
                .channel_from_mention("1", "<#20>", ChannelType::GuildText)
                .await,
            Err(StateError::WrongServer)
        ));
        assert!(matches!(
            state
                .channel_from_mention("1", "11", ChannelType::GuildText)
                .await,
            Err(StateError::WrongType)
        ));
    }

    #[tokio::test]
    async fn test_role_from_mention() {
        let state = seeded().await;
        assert_eq!(
            state.role_from_mention("1", "<@&7>").await.unwrap().name,
            "mods"
        );
        assert!(matches!(
            state.role_from_mention("1", "<@&8>").await,
            Err(StateError::NotFound)
        ));
    }
}
