use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PrefixConfig;
use crate::routing::args::{get_message_arguments, prefixes_for};
use crate::state::models::{Channel, Emoji, Guild, Member, Message, Presence, Role, User};

/// Every gateway event kind the core consumes, by its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Ready,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,
    GuildMembersChunk,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,
    GuildEmojisUpdate,
    GuildBanAdd,
    GuildBanRemove,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    ChannelPinsUpdate,
    PresenceUpdate,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageReactionAdd,
    MessageReactionRemove,
    MessageReactionRemoveAll,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Ready => "READY",
            EventKind::GuildCreate => "GUILD_CREATE",
            EventKind::GuildUpdate => "GUILD_UPDATE",
            EventKind::GuildDelete => "GUILD_DELETE",
            EventKind::GuildMemberAdd => "GUILD_MEMBER_ADD",
            EventKind::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            EventKind::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            EventKind::GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
            EventKind::GuildRoleCreate => "GUILD_ROLE_CREATE",
            EventKind::GuildRoleUpdate => "GUILD_ROLE_UPDATE",
            EventKind::GuildRoleDelete => "GUILD_ROLE_DELETE",
            EventKind::GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
            EventKind::GuildBanAdd => "GUILD_BAN_ADD",
            EventKind::GuildBanRemove => "GUILD_BAN_REMOVE",
            EventKind::ChannelCreate => "CHANNEL_CREATE",
            EventKind::ChannelUpdate => "CHANNEL_UPDATE",
            EventKind::ChannelDelete => "CHANNEL_DELETE",
            EventKind::ChannelPinsUpdate => "CHANNEL_PINS_UPDATE",
            EventKind::PresenceUpdate => "PRESENCE_UPDATE",
            EventKind::MessageCreate => "MESSAGE_CREATE",
            EventKind::MessageUpdate => "MESSAGE_UPDATE",
            EventKind::MessageDelete => "MESSAGE_DELETE",
            EventKind::MessageReactionAdd => "MESSAGE_REACTION_ADD",
            EventKind::MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
            EventKind::MessageReactionRemoveAll => "MESSAGE_REACTION_REMOVE_ALL",
        }
    }

    /// Kinds that carry message content, author and prefix.
    pub fn is_message(self) -> bool {
        matches!(self, EventKind::MessageCreate | EventKind::MessageUpdate)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ready {
    pub user: User,
    pub session_id: String,
    pub guilds: Vec<Guild>,
    pub private_channels: Vec<Channel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPins {
    pub channel_id: String,
    pub guild_id: String,
    pub last_pin_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageRef {
    pub id: String,
    pub channel_id: String,
    pub guild_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reaction {
    pub user_id: String,
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub emoji: Emoji,
}

/// A gateway dispatch, as `{"t": "<KIND>", "d": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEvent {
    Ready(Ready),
    GuildCreate(Guild),
    GuildUpdate(Guild),
    GuildDelete(Guild),
    GuildMemberAdd(Member),
    GuildMemberUpdate(Member),
    GuildMemberRemove(Member),
    GuildMembersChunk {
        guild_id: String,
        #[serde(default)]
        members: Vec<Member>,
    },
    GuildRoleCreate {
        guild_id: String,
        role: Role,
    },
    GuildRoleUpdate {
        guild_id: String,
        role: Role,
    },
    GuildRoleDelete {
        guild_id: String,
        role_id: String,
    },
    GuildEmojisUpdate {
        guild_id: String,
        #[serde(default)]
        emojis: Vec<Emoji>,
    },
    GuildBanAdd {
        guild_id: String,
        user: User,
    },
    GuildBanRemove {
        guild_id: String,
        user: User,
    },
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    ChannelPinsUpdate(ChannelPins),
    PresenceUpdate {
        #[serde(default)]
        guild_id: String,
        #[serde(flatten)]
        presence: Presence,
    },
    MessageCreate(Message),
    MessageUpdate(Message),
    MessageDelete(MessageRef),
    MessageReactionAdd(Reaction),
    MessageReactionRemove(Reaction),
    MessageReactionRemoveAll(Reaction),
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::Ready(_) => EventKind::Ready,
            GatewayEvent::GuildCreate(_) => EventKind::GuildCreate,
            GatewayEvent::GuildUpdate(_) => EventKind::GuildUpdate,
            GatewayEvent::GuildDelete(_) => EventKind::GuildDelete,
            GatewayEvent::GuildMemberAdd(_) => EventKind::GuildMemberAdd,
            GatewayEvent::GuildMemberUpdate(_) => EventKind::GuildMemberUpdate,
            GatewayEvent::GuildMemberRemove(_) => EventKind::GuildMemberRemove,
            GatewayEvent::GuildMembersChunk { .. } => EventKind::GuildMembersChunk,
            GatewayEvent::GuildRoleCreate { .. } => EventKind::GuildRoleCreate,
            GatewayEvent::GuildRoleUpdate { .. } => EventKind::GuildRoleUpdate,
            GatewayEvent::GuildRoleDelete { .. } => EventKind::GuildRoleDelete,
            GatewayEvent::GuildEmojisUpdate { .. } => EventKind::GuildEmojisUpdate,
            GatewayEvent::GuildBanAdd { .. } => EventKind::GuildBanAdd,
            GatewayEvent::GuildBanRemove { .. } => EventKind::GuildBanRemove,
            GatewayEvent::ChannelCreate(_) => EventKind::ChannelCreate,
            GatewayEvent::ChannelUpdate(_) => EventKind::ChannelUpdate,
            GatewayEvent::ChannelDelete(_) => EventKind::ChannelDelete,
            GatewayEvent::ChannelPinsUpdate(_) => EventKind::ChannelPinsUpdate,
            GatewayEvent::PresenceUpdate { .. } => EventKind::PresenceUpdate,
            GatewayEvent::MessageCreate(_) => EventKind::MessageCreate,
            GatewayEvent::MessageUpdate(_) => EventKind::MessageUpdate,
            GatewayEvent::MessageDelete(_) => EventKind::MessageDelete,
            GatewayEvent::MessageReactionAdd(_) => EventKind::MessageReactionAdd,
            GatewayEvent::MessageReactionRemove(_) => EventKind::MessageReactionRemove,
            GatewayEvent::MessageReactionRemoveAll(_) => EventKind::MessageReactionRemoveAll,
        }
    }

    /// The message for create/update events.
    pub fn message(&self) -> Option<&Message> {
        match self {
            GatewayEvent::MessageCreate(message) | GatewayEvent::MessageUpdate(message) => {
                Some(message)
            }
            _ => None,
        }
    }

    /// Guild the event belongs to, when it carries one.
    pub fn guild_id(&self) -> Option<&str> {
        let id = match self {
            GatewayEvent::Ready(_) => return None,
            GatewayEvent::GuildCreate(guild)
            | GatewayEvent::GuildUpdate(guild)
            | GatewayEvent::GuildDelete(guild) => &guild.id,
            GatewayEvent::GuildMemberAdd(member)
            | GatewayEvent::GuildMemberUpdate(member)
            | GatewayEvent::GuildMemberRemove(member) => &member.guild_id,
            GatewayEvent::GuildMembersChunk { guild_id, .. }
            | GatewayEvent::GuildRoleCreate { guild_id, .. }
            | GatewayEvent::GuildRoleUpdate { guild_id, .. }
            | GatewayEvent::GuildRoleDelete { guild_id, .. }
            | GatewayEvent::GuildEmojisUpdate { guild_id, .. }
            | GatewayEvent::GuildBanAdd { guild_id, .. }
            | GatewayEvent::GuildBanRemove { guild_id, .. }
            | GatewayEvent::PresenceUpdate { guild_id, .. } => guild_id,
            GatewayEvent::ChannelCreate(channel)
            | GatewayEvent::ChannelUpdate(channel)
            | GatewayEvent::ChannelDelete(channel) => &channel.guild_id,
            GatewayEvent::ChannelPinsUpdate(pins) => &pins.guild_id,
            GatewayEvent::MessageCreate(message) | GatewayEvent::MessageUpdate(message) => {
                &message.guild_id
            }
            GatewayEvent::MessageDelete(message) => &message.guild_id,
            GatewayEvent::MessageReactionAdd(reaction)
            | GatewayEvent::MessageReactionRemove(reaction)
            | GatewayEvent::MessageReactionRemoveAll(reaction) => &reaction.guild_id,
        };
        (!id.is_empty()).then_some(id.as_str())
    }
}

/// An event plus the routing context handed to downstream destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContainer {
    pub kind: EventKind,
    /// Deduplication key.
    pub key: String,
    pub received_at: DateTime<Utc>,
    pub gateway_started: DateTime<Utc>,
    /// Command prefix found at the start of the message, empty if none.
    pub prefix: String,
    pub args: Vec<String>,
    pub bot_user_id: String,
    pub event: GatewayEvent,
}

impl EventContainer {
    /// Wrap an event. Message create/update events get their prefix and
    /// arguments resolved against the bot id and prefix configuration.
    pub fn new(
        event: GatewayEvent,
        key: impl Into<String>,
        bot_user_id: impl Into<String>,
        gateway_started: DateTime<Utc>,
        prefixes: &PrefixConfig,
    ) -> Self {
        let bot_user_id = bot_user_id.into();
        let (args, prefix) = match event.message() {
            Some(message) => {
                let candidates = prefixes_for(prefixes, &bot_user_id, &message.guild_id);
                get_message_arguments(&message.content, &candidates)
            }
            None => (Vec::new(), String::new()),
        };
        Self {
            kind: event.kind(),
            key: key.into(),
            received_at: Utc::now(),
            gateway_started,
            prefix,
            args,
            bot_user_id,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names_match_serde() {
        for kind in [
            EventKind::GuildCreate,
            EventKind::GuildMembersChunk,
            EventKind::MessageReactionRemoveAll,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn test_deserialize_tagged_event() {
        let event: GatewayEvent = serde_json::from_str(
            r#"{"t":"GUILD_ROLE_CREATE","d":{"guild_id":"g","role":{"id":"r","permissions":4}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::GuildRoleCreate);
        assert_eq!(event.guild_id(), Some("g"));
    }

    #[test]
    fn test_presence_update_is_flattened() {
        let event: GatewayEvent = serde_json::from_str(
            r#"{"t":"PRESENCE_UPDATE","d":{"guild_id":"g","user":{"id":"u"},"status":"idle"}}"#,
        )
        .unwrap();
        match event {
            GatewayEvent::PresenceUpdate { guild_id, presence } => {
                assert_eq!(guild_id, "g");
                assert_eq!(presence.user.id, "u");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_dm_message_has_no_guild() {
        let event = GatewayEvent::MessageCreate(Message {
            channel_id: "c".into(),
            content: "hi".into(),
            ..Default::default()
        });
        assert_eq!(event.guild_id(), None);
        assert!(event.kind().is_message());
        assert!(!EventKind::MessageDelete.is_message());
    }

    #[test]
    fn test_container_resolves_prefix_and_args() {
        let event = GatewayEvent::MessageCreate(Message {
            guild_id: "g".into(),
            content: "/ping  \"a b\" c".into(),
            ..Default::default()
        });
        let container =
            EventContainer::new(event, "k", "bot", Utc::now(), &PrefixConfig::default());
        assert_eq!(container.kind, EventKind::MessageCreate);
        assert_eq!(container.prefix, "/");
        assert_eq!(container.args, vec!["ping", "a b", "c"]);
    }

    #[test]
    fn test_container_non_message_has_no_args() {
        let event = GatewayEvent::GuildDelete(Guild {
            id: "g".into(),
            ..Default::default()
        });
        let container =
            EventContainer::new(event, "k", "bot", Utc::now(), &PrefixConfig::default());
        assert!(container.prefix.is_empty());
        assert!(container.args.is_empty());
    }
}
