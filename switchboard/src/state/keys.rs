/// Default key namespace shared by every process of one bot deployment.
pub const DEFAULT_NAMESPACE: &str = "project-d";

/// Deterministic key names for every cached entity and index.
///
/// All keys live under `<namespace>:state:`, except deduplication markers
/// which live under `<namespace>:gateway:`.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    namespace: String,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyCodec {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn state(&self, suffix: &str) -> String {
        format!("{}:state:{}", self.namespace, suffix)
    }

    // ── Entity records ──────────────────────────────────────────

    pub fn guild(&self, guild_id: &str) -> String {
        self.state(&format!("guild-{guild_id}"))
    }

    pub fn member(&self, guild_id: &str, user_id: &str) -> String {
        self.state(&format!("guild-{guild_id}:member-{user_id}"))
    }

    pub fn channel(&self, channel_id: &str) -> String {
        self.state(&format!("channel-{channel_id}"))
    }

    pub fn user(&self, user_id: &str) -> String {
        self.state(&format!("user-{user_id}"))
    }

    pub fn channel_messages(&self, channel_id: &str) -> String {
        self.state(&format!("channel-{channel_id}:messages"))
    }

    // ── Index sets ──────────────────────────────────────────────

    pub fn all_guild_ids(&self) -> String {
        self.state("guild-ids")
    }

    pub fn all_user_ids(&self) -> String {
        self.state("user-ids")
    }

    pub fn all_channel_ids(&self) -> String {
        self.state("channel-ids")
    }

    pub fn guild_user_ids(&self, guild_id: &str) -> String {
        self.state(&format!("user-ids:{guild_id}"))
    }

    pub fn guild_bot_ids(&self, guild_id: &str) -> String {
        self.state(&format!("guild-{guild_id}:bot-ids"))
    }

    pub fn guild_banned_user_ids(&self, guild_id: &str) -> String {
        self.state(&format!("guild-{guild_id}:banned-userids"))
    }

    pub fn ban_initialized_guild_ids(&self) -> String {
        self.state("banned-userids-initialized-guild-ids")
    }

    // ── Gateway ─────────────────────────────────────────────────

    /// Deduplication marker for one event as seen by one consumer `source`.
    pub fn gateway_event(&self, kind: &str, digest: &str, source: &str) -> String {
        format!(
            "{}:gateway:event-{}-{}:{}",
            self.namespace, kind, digest, source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_keys() {
        let keys = KeyCodec::default();
        assert_eq!(keys.guild("1"), "project-d:state:guild-1");
        assert_eq!(keys.member("1", "2"), "project-d:state:guild-1:member-2");
        assert_eq!(keys.channel("3"), "project-d:state:channel-3");
        assert_eq!(keys.user("4"), "project-d:state:user-4");
        assert_eq!(
            keys.channel_messages("3"),
            "project-d:state:channel-3:messages"
        );
    }

    #[test]
    fn test_index_keys() {
        let keys = KeyCodec::new("bot");
        assert_eq!(keys.all_guild_ids(), "bot:state:guild-ids");
        assert_eq!(keys.all_user_ids(), "bot:state:user-ids");
        assert_eq!(keys.all_channel_ids(), "bot:state:channel-ids");
        assert_eq!(keys.guild_user_ids("9"), "bot:state:user-ids:9");
        assert_eq!(keys.guild_bot_ids("9"), "bot:state:guild-9:bot-ids");
        assert_eq!(
            keys.guild_banned_user_ids("9"),
            "bot:state:guild-9:banned-userids"
        );
        assert_eq!(
            keys.ban_initialized_guild_ids(),
            "bot:state:banned-userids-initialized-guild-ids"
        );
    }

    #[test]
    fn test_gateway_event_key() {
        let keys = KeyCodec::default();
        assert_eq!(
            keys.gateway_event("GUILD_CREATE", "abc", "worker-1"),
            "project-d:gateway:event-GUILD_CREATE-abc:worker-1"
        );
    }
}
