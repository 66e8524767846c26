use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::permissions::Permissions;

/// A global user record, independent of any guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub username: String,
    pub discriminator: String,
    pub avatar: String,
    pub bot: bool,
}

/// The guild-scoped identity of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Member {
    pub guild_id: String,
    pub user: User,
    pub nick: String,
    pub roles: Vec<String>,
    /// Omitted by partial updates; carried over from the cached record.
    pub joined_at: Option<DateTime<Utc>>,
}

/// A guild role. Only ever stored inside its guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub color: u32,
    pub position: i32,
    /// Raw permission bits in the upstream layout.
    pub permissions: u64,
    pub managed: bool,
    pub mentionable: bool,
    pub hoist: bool,
}

impl Role {
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(self.permissions)
    }
}

/// A custom guild emoji. Only ever stored inside its guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Emoji {
    pub id: String,
    pub name: String,
    pub roles: Vec<String>,
    pub managed: bool,
    pub require_colons: bool,
    pub animated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub url: Option<String>,
}

/// A user's status within one guild. Updates are partial: absent fields keep
/// their cached value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Presence {
    pub user: User,
    pub status: Option<Status>,
    pub nick: String,
    pub roles: Vec<String>,
    pub game: Option<Activity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceState {
    pub user_id: String,
    pub channel_id: String,
    pub session_id: String,
    pub mute: bool,
    pub deaf: bool,
}

/// Upstream channel type codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChannelType {
    #[default]
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
}

impl ChannelType {
    /// Direct-message channels are not part of any guild.
    pub fn is_private(self) -> bool {
        matches!(self, ChannelType::Dm | ChannelType::GroupDm)
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::GuildText),
            1 => Ok(Self::Dm),
            2 => Ok(Self::GuildVoice),
            3 => Ok(Self::GroupDm),
            4 => Ok(Self::GuildCategory),
            other => Err(format!("unknown channel type {other}")),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(kind: ChannelType) -> Self {
        match kind {
            ChannelType::GuildText => 0,
            ChannelType::Dm => 1,
            ChannelType::GuildVoice => 2,
            ChannelType::GroupDm => 3,
            ChannelType::GuildCategory => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteType {
    #[default]
    Role,
    Member,
}

/// A channel-level allow/deny pair for a role (or @everyone) or one member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionOverwrite {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OverwriteType,
    pub allow: u64,
    pub deny: u64,
}

impl PermissionOverwrite {
    pub fn allow(&self) -> Permissions {
        Permissions::from_bits_truncate(self.allow)
    }

    pub fn deny(&self) -> Permissions {
        Permissions::from_bits_truncate(self.deny)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub author: User,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    /// Empty for direct-message channels.
    pub guild_id: String,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    pub name: String,
    pub topic: String,
    pub position: i32,
    /// `None` when the payload omitted the field; `Some(vec![])` clears.
    pub permission_overwrites: Option<Vec<PermissionOverwrite>>,
    /// Carried over between updates; not authoritative.
    pub messages: Option<Vec<Message>>,
    pub last_pin_timestamp: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn permission_overwrites(&self) -> &[PermissionOverwrite] {
        self.permission_overwrites.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub member_count: u64,
    pub unavailable: bool,
    // Embedded lists are `None` when an update omits them, which keeps the
    // cached list; an explicit empty list replaces it.
    pub channels: Option<Vec<Channel>>,
    pub roles: Option<Vec<Role>>,
    pub emojis: Option<Vec<Emoji>>,
    pub members: Option<Vec<Member>>,
    pub presences: Option<Vec<Presence>>,
    pub voice_states: Option<Vec<VoiceState>>,
}

impl Guild {
    pub fn channels(&self) -> &[Channel] {
        self.channels.as_deref().unwrap_or_default()
    }

    pub fn roles(&self) -> &[Role] {
        self.roles.as_deref().unwrap_or_default()
    }

    pub fn emojis(&self) -> &[Emoji] {
        self.emojis.as_deref().unwrap_or_default()
    }

    pub fn members(&self) -> &[Member] {
        self.members.as_deref().unwrap_or_default()
    }

    pub fn presences(&self) -> &[Presence] {
        self.presences.as_deref().unwrap_or_default()
    }

    /// The @everyone role shares its id with the guild.
    pub fn everyone_role(&self) -> Option<&Role> {
        self.roles().iter().find(|r| r.id == self.id)
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.members().iter().any(|m| m.user.id == user_id)
    }
}

/// One entry of a guild's ban list as returned by the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ban {
    pub user: User,
    pub reason: Option<String>,
}
