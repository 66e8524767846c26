//! Mutation handlers: fold one gateway event into the shared state.
//!
//! Every handler runs under the process-wide handler lock and follows the same
//! shape: read the cached record, merge the event in, write the whole record
//! back. The first failing store call aborts the handler.

use tracing::debug;

use crate::engine::events::{ChannelPins, GatewayEvent, Ready};
use crate::engine::permissions::Permissions;

use super::SharedState;
use super::error::{StateError, StateResult};
use super::merge::{carry_over, overwrite_present};
use super::models::{Channel, Emoji, Guild, Member, Message, Presence, Role, Status, User};

/// Map a cache miss to `None`, keep every other error.
fn found<T>(result: StateResult<T>) -> StateResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StateError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

impl SharedState {
    /// Apply one gateway event. `bot_user_id` is the id of the bot whose
    /// gateway received the event.
    pub async fn apply(&self, bot_user_id: &str, event: &GatewayEvent) -> StateResult<()> {
        let _guard = self.lock.lock().await;

        match event {
            GatewayEvent::Ready(ready) => self.on_ready(bot_user_id, ready).await,
            GatewayEvent::GuildCreate(guild) | GatewayEvent::GuildUpdate(guild) => {
                self.guild_add(bot_user_id, guild).await
            }
            GatewayEvent::GuildDelete(guild) => self.guild_remove(guild).await,
            GatewayEvent::GuildMemberAdd(member) | GatewayEvent::GuildMemberUpdate(member) => {
                self.member_add(member).await
            }
            GatewayEvent::GuildMembersChunk { guild_id, members } => {
                for member in members {
                    let mut member = member.clone();
                    member.guild_id = guild_id.clone();
                    self.member_add(&member).await?;
                }
                Ok(())
            }
            GatewayEvent::GuildMemberRemove(member) => self.member_remove(member).await,
            GatewayEvent::GuildRoleCreate { guild_id, role }
            | GatewayEvent::GuildRoleUpdate { guild_id, role } => {
                self.role_add(bot_user_id, guild_id, role).await
            }
            GatewayEvent::GuildRoleDelete { guild_id, role_id } => {
                self.role_remove(bot_user_id, guild_id, role_id).await
            }
            GatewayEvent::GuildEmojisUpdate { guild_id, emojis } => {
                self.emojis_add(guild_id, emojis).await
            }
            GatewayEvent::ChannelCreate(channel) | GatewayEvent::ChannelUpdate(channel) => {
                self.channel_add(channel).await
            }
            GatewayEvent::ChannelDelete(channel) => self.channel_remove(channel).await,
            GatewayEvent::ChannelPinsUpdate(pins) => self.channel_pins_update(pins).await,
            GatewayEvent::PresenceUpdate { guild_id, presence } => {
                self.presence_add(guild_id, presence).await
            }
            GatewayEvent::GuildBanAdd { guild_id, user } => {
                self.ban_add(bot_user_id, guild_id, user).await
            }
            GatewayEvent::GuildBanRemove { guild_id, user } => {
                self.ban_remove(bot_user_id, guild_id, user).await
            }
            GatewayEvent::MessageCreate(message) => self.message_create(message).await,
            GatewayEvent::MessageUpdate(_)
            | GatewayEvent::MessageDelete(_)
            | GatewayEvent::MessageReactionAdd(_)
            | GatewayEvent::MessageReactionRemove(_)
            | GatewayEvent::MessageReactionRemoveAll(_) => Ok(()),
        }
    }

    async fn on_ready(&self, bot_user_id: &str, ready: &Ready) -> StateResult<()> {
        self.write_object(&self.keys.user(&ready.user.id), &ready.user)
            .await?;

        for guild in &ready.guilds {
            let mut guild = guild.clone();
            fill_guild_ids(&mut guild);

            self.write_object(&self.keys.guild(&guild.id), &guild).await?;
            self.store
                .add_to_set(&self.keys.all_guild_ids(), std::slice::from_ref(&guild.id))
                .await?;
            self.store_guild_children(&guild).await?;
            self.add_bot_id(&guild.id, bot_user_id).await?;
        }

        let mut channel_ids = Vec::with_capacity(ready.private_channels.len());
        for channel in &ready.private_channels {
            self.write_object(&self.keys.channel(&channel.id), channel)
                .await?;
            channel_ids.push(channel.id.clone());
        }
        self.store
            .add_to_set(&self.keys.all_channel_ids(), &channel_ids)
            .await?;

        debug!(
            guilds = ready.guilds.len(),
            private_channels = ready.private_channels.len(),
            "ready snapshot cached"
        );
        Ok(())
    }

    async fn guild_add(&self, bot_user_id: &str, guild: &Guild) -> StateResult<()> {
        let mut guild = guild.clone();
        fill_guild_ids(&mut guild);

        self.store_guild_children(&guild).await?;

        if let Some(previous) = found(self.guild(&guild.id).await)? {
            let members_carried = guild.members.is_none();
            carry_over(&mut guild.roles, previous.roles);
            carry_over(&mut guild.emojis, previous.emojis);
            carry_over(&mut guild.members, previous.members);
            carry_over(&mut guild.presences, previous.presences);
            carry_over(&mut guild.channels, previous.channels);
            carry_over(&mut guild.voice_states, previous.voice_states);
            if members_carried {
                guild.member_count = previous.member_count;
            }
        }

        self.write_object(&self.keys.guild(&guild.id), &guild).await?;
        self.store
            .add_to_set(&self.keys.all_guild_ids(), std::slice::from_ref(&guild.id))
            .await?;
        self.add_bot_id(&guild.id, bot_user_id).await?;

        self.schedule_ban_initializer(&guild.id, bot_user_id);
        Ok(())
    }

    /// Store the channels and members embedded in a guild payload, with their
    /// users, and index them.
    async fn store_guild_children(&self, guild: &Guild) -> StateResult<()> {
        let mut channel_ids = Vec::with_capacity(guild.channels().len());
        for channel in guild.channels() {
            self.write_object(&self.keys.channel(&channel.id), channel)
                .await?;
            channel_ids.push(channel.id.clone());
        }
        self.store
            .add_to_set(&self.keys.all_channel_ids(), &channel_ids)
            .await?;

        let mut user_ids = Vec::with_capacity(guild.members().len());
        for member in guild.members() {
            self.write_object(&self.keys.member(&guild.id, &member.user.id), member)
                .await?;
            self.write_object(&self.keys.user(&member.user.id), &member.user)
                .await?;
            user_ids.push(member.user.id.clone());
        }
        self.store
            .add_to_set(&self.keys.all_user_ids(), &user_ids)
            .await?;
        self.store
            .add_to_set(&self.keys.guild_user_ids(&guild.id), &user_ids)
            .await?;
        Ok(())
    }

    async fn add_bot_id(&self, guild_id: &str, bot_user_id: &str) -> StateResult<()> {
        if bot_user_id.is_empty() {
            return Ok(());
        }
        self.store
            .add_to_set(&self.keys.guild_bot_ids(guild_id), &[bot_user_id.to_string()])
            .await
    }

    async fn guild_remove(&self, guild: &Guild) -> StateResult<()> {
        let channels = match found(self.guild(&guild.id).await)? {
            Some(cached) => cached.channels.unwrap_or_default(),
            None => guild.channels().to_vec(),
        };

        self.delete_object(&self.keys.guild(&guild.id)).await?;
        self.store
            .remove_from_set(&self.keys.all_guild_ids(), &guild.id)
            .await?;

        for channel in &channels {
            self.delete_object(&self.keys.channel(&channel.id)).await?;
            self.store
                .remove_from_set(&self.keys.all_channel_ids(), &channel.id)
                .await?;
        }

        let user_ids_key = self.keys.guild_user_ids(&guild.id);
        for user_id in self.store.set_members(&user_ids_key).await? {
            self.delete_object(&self.keys.member(&guild.id, &user_id))
                .await?;
        }
        self.store.delete(&user_ids_key).await?;
        self.store.delete(&self.keys.guild_bot_ids(&guild.id)).await?;
        self.store
            .delete(&self.keys.guild_banned_user_ids(&guild.id))
            .await?;
        self.store
            .remove_from_set(&self.keys.ban_initialized_guild_ids(), &guild.id)
            .await?;

        debug!(guild_id = %guild.id, channels = channels.len(), "guild removed from state");
        Ok(())
    }

    async fn member_add(&self, member: &Member) -> StateResult<()> {
        let mut guild = self.guild(&member.guild_id).await?;
        let mut member = member.clone();

        if let Some(previous) = found(self.member(&member.guild_id, &member.user.id).await)? {
            carry_over(&mut member.joined_at, previous.joined_at);
        }

        let members = guild.members.get_or_insert_with(Vec::new);
        match members.iter_mut().find(|m| m.user.id == member.user.id) {
            Some(embedded) => *embedded = member.clone(),
            None => members.push(member.clone()),
        }
        guild.member_count = members.len() as u64;

        self.write_object(&self.keys.guild(&guild.id), &guild).await?;
        self.write_object(&self.keys.member(&guild.id, &member.user.id), &member)
            .await?;
        self.write_object(&self.keys.user(&member.user.id), &member.user)
            .await?;

        let user_id = std::slice::from_ref(&member.user.id);
        self.store
            .add_to_set(&self.keys.all_user_ids(), user_id)
            .await?;
        self.store
            .add_to_set(&self.keys.guild_user_ids(&guild.id), user_id)
            .await?;
        Ok(())
    }

    async fn member_remove(&self, member: &Member) -> StateResult<()> {
        let mut guild = self.guild(&member.guild_id).await?;
        let user_id = &member.user.id;

        self.delete_object(&self.keys.member(&guild.id, user_id))
            .await?;
        self.store
            .remove_from_set(&self.keys.guild_user_ids(&guild.id), user_id)
            .await?;

        let mut member_elsewhere = false;
        for other in self.all_guild_ids().await? {
            if other == guild.id {
                continue;
            }
            if self.is_member(&other, user_id).await? {
                member_elsewhere = true;
                break;
            }
        }
        if !member_elsewhere {
            self.delete_object(&self.keys.user(user_id)).await?;
            self.store
                .remove_from_set(&self.keys.all_user_ids(), user_id)
                .await?;
        }

        let members = guild.members.get_or_insert_with(Vec::new);
        members.retain(|m| m.user.id != *user_id);
        guild.member_count = members.len() as u64;
        self.write_object(&self.keys.guild(&guild.id), &guild).await
    }

    async fn role_add(&self, bot_user_id: &str, guild_id: &str, role: &Role) -> StateResult<()> {
        let mut guild = self.guild(guild_id).await?;
        let roles = guild.roles.get_or_insert_with(Vec::new);
        match roles.iter_mut().find(|r| r.id == role.id) {
            Some(cached) => *cached = role.clone(),
            None => roles.push(role.clone()),
        }
        self.write_object(&self.keys.guild(&guild.id), &guild).await?;

        if role
            .permissions()
            .intersects(Permissions::BAN_MEMBERS | Permissions::ADMINISTRATOR)
        {
            self.schedule_ban_initializer(guild_id, bot_user_id);
        }
        Ok(())
    }

    async fn role_remove(&self, bot_user_id: &str, guild_id: &str, role_id: &str) -> StateResult<()> {
        let mut guild = self.guild(guild_id).await?;
        if let Some(roles) = guild.roles.as_mut() {
            roles.retain(|r| r.id != role_id);
        }
        self.write_object(&self.keys.guild(&guild.id), &guild).await?;

        // The removed role may have been what granted ban access
        self.schedule_ban_initializer(guild_id, bot_user_id);
        Ok(())
    }

    async fn emoji_add(&self, guild_id: &str, emoji: &Emoji) -> StateResult<()> {
        let mut guild = self.guild(guild_id).await?;
        let emojis = guild.emojis.get_or_insert_with(Vec::new);
        match emojis.iter_mut().find(|e| e.id == emoji.id) {
            Some(cached) => *cached = emoji.clone(),
            None => emojis.push(emoji.clone()),
        }
        self.write_object(&self.keys.guild(&guild.id), &guild).await
    }

    async fn emojis_add(&self, guild_id: &str, emojis: &[Emoji]) -> StateResult<()> {
        for emoji in emojis {
            self.emoji_add(guild_id, emoji).await?;
        }
        Ok(())
    }

    async fn channel_add(&self, channel: &Channel) -> StateResult<()> {
        let mut channel = channel.clone();

        if let Some(previous) = found(self.channel(&channel.id).await)? {
            carry_over(&mut channel.messages, previous.messages);
            carry_over(
                &mut channel.permission_overwrites,
                previous.permission_overwrites,
            );
            carry_over(&mut channel.last_pin_timestamp, previous.last_pin_timestamp);
        }

        if !channel.kind.is_private() {
            let mut guild = self.guild(&channel.guild_id).await?;
            let channels = guild.channels.get_or_insert_with(Vec::new);
            match channels.iter_mut().find(|c| c.id == channel.id) {
                Some(cached) => *cached = channel.clone(),
                None => channels.push(channel.clone()),
            }
            self.write_object(&self.keys.guild(&guild.id), &guild).await?;
        }

        self.write_object(&self.keys.channel(&channel.id), &channel)
            .await?;
        self.store
            .add_to_set(
                &self.keys.all_channel_ids(),
                std::slice::from_ref(&channel.id),
            )
            .await
    }

    async fn channel_remove(&self, channel: &Channel) -> StateResult<()> {
        let previous = self.channel(&channel.id).await?;

        if !previous.kind.is_private() {
            let mut guild = self.guild(&previous.guild_id).await?;
            if let Some(channels) = guild.channels.as_mut() {
                channels.retain(|c| c.id != channel.id);
            }
            self.write_object(&self.keys.guild(&guild.id), &guild).await?;
        }

        self.delete_object(&self.keys.channel(&channel.id)).await?;
        self.store
            .delete(&self.keys.channel_messages(&channel.id))
            .await?;
        self.store
            .remove_from_set(&self.keys.all_channel_ids(), &channel.id)
            .await
    }

    async fn channel_pins_update(&self, pins: &ChannelPins) -> StateResult<()> {
        let mut channel = self.channel(&pins.channel_id).await?;
        channel.last_pin_timestamp = pins.last_pin_timestamp;
        self.write_object(&self.keys.channel(&channel.id), &channel)
            .await
    }

    async fn presence_add(&self, guild_id: &str, presence: &Presence) -> StateResult<()> {
        let mut guild = self.guild(guild_id).await?;

        let presences = guild.presences.get_or_insert_with(Vec::new);
        match presences.iter_mut().find(|p| p.user.id == presence.user.id) {
            Some(cached) => merge_presence(cached, presence),
            None => presences.push(presence.clone()),
        }
        self.write_object(&self.keys.guild(&guild.id), &guild).await?;

        if presence.status == Some(Status::Offline) {
            return Ok(());
        }

        let member = match found(self.member(guild_id, &presence.user.id).await)? {
            Some(mut member) => {
                overwrite_present(&mut member.nick, presence.nick.clone());
                overwrite_present(&mut member.user.username, presence.user.username.clone());
                // presences carry the full role list
                member.roles = presence.roles.clone();
                member
            }
            // A user coming online that we have not seen as a member yet
            None => {
                let mut user = found(self.user(&presence.user.id).await)?
                    .unwrap_or_else(|| presence.user.clone());
                merge_user(&mut user, &presence.user);
                Member {
                    guild_id: guild_id.to_string(),
                    user,
                    nick: presence.nick.clone(),
                    roles: presence.roles.clone(),
                    joined_at: None,
                }
            }
        };
        self.member_add(&member).await
    }

    /// Whether the bot may read the guild's ban list. A bot that is not a
    /// cached member of the guild may not.
    pub(crate) async fn bot_can_read_bans(&self, bot_user_id: &str, guild_id: &str) -> StateResult<bool> {
        match found(self.user_permissions(bot_user_id, guild_id).await)? {
            Some(perms) => Ok(perms.contains(Permissions::BAN_MEMBERS)),
            None => Ok(false),
        }
    }

    async fn ban_add(&self, bot_user_id: &str, guild_id: &str, user: &User) -> StateResult<()> {
        if !self.bot_can_read_bans(bot_user_id, guild_id).await? {
            debug!(%guild_id, "no ban permission, ignoring ban add");
            return Ok(());
        }
        self.store
            .add_to_set(
                &self.keys.guild_banned_user_ids(guild_id),
                std::slice::from_ref(&user.id),
            )
            .await
    }

    async fn ban_remove(&self, bot_user_id: &str, guild_id: &str, user: &User) -> StateResult<()> {
        if !self.bot_can_read_bans(bot_user_id, guild_id).await? {
            debug!(%guild_id, "no ban permission, ignoring ban remove");
            return Ok(());
        }
        self.store
            .remove_from_set(&self.keys.guild_banned_user_ids(guild_id), &user.id)
            .await
    }

    async fn message_create(&self, message: &Message) -> StateResult<()> {
        if self.max_channel_messages == 0 {
            return Ok(());
        }
        let key = self.keys.channel_messages(&message.channel_id);
        let encoded = serde_json::to_string(message)?;
        self.store.push_list(&key, &[encoded]).await?;
        let stop = isize::try_from(self.max_channel_messages - 1).unwrap_or(isize::MAX);
        self.store.trim_list(&key, 0, stop).await
    }
}

/// Fill in the guild id on embedded channels and members, which some
/// payloads omit.
fn fill_guild_ids(guild: &mut Guild) {
    for channel in guild.channels.iter_mut().flatten() {
        if channel.guild_id.is_empty() {
            channel.guild_id = guild.id.clone();
        }
    }
    for member in guild.members.iter_mut().flatten() {
        if member.guild_id.is_empty() {
            member.guild_id = guild.id.clone();
        }
    }
}

fn merge_user(cached: &mut User, incoming: &User) {
    overwrite_present(&mut cached.username, incoming.username.clone());
    overwrite_present(&mut cached.discriminator, incoming.discriminator.clone());
    overwrite_present(&mut cached.avatar, incoming.avatar.clone());
}

/// Partial presence update: roles and activity always replace, everything
/// else only when present.
fn merge_presence(cached: &mut Presence, incoming: &Presence) {
    cached.game = incoming.game.clone();
    cached.roles = incoming.roles.clone();
    overwrite_present(&mut cached.status, incoming.status);
    overwrite_present(&mut cached.nick, incoming.nick.clone());
    merge_user(&mut cached.user, &incoming.user);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::Activity;

    #[test]
    fn test_merge_presence_keeps_blank_fields() {
        let mut cached = Presence {
            user: User {
                id: "u".into(),
                username: "alice".into(),
                avatar: "a1".into(),
                ..Default::default()
            },
            status: Some(Status::Online),
            nick: "Al".into(),
            roles: vec!["r1".into()],
            game: Some(Activity {
                name: "chess".into(),
                ..Default::default()
            }),
        };
        let incoming = Presence {
            user: User {
                id: "u".into(),
                avatar: "a2".into(),
                ..Default::default()
            },
            status: Some(Status::Idle),
            ..Default::default()
        };
        merge_presence(&mut cached, &incoming);
        assert_eq!(cached.user.username, "alice");
        assert_eq!(cached.user.avatar, "a2");
        assert_eq!(cached.nick, "Al");
        assert_eq!(cached.status, Some(Status::Idle));
        // Always replaced
        assert!(cached.roles.is_empty());
        assert!(cached.game.is_none());
    }

    #[test]
    fn test_fill_guild_ids() {
        let mut guild = Guild {
            id: "g".into(),
            channels: Some(vec![Channel {
                id: "c".into(),
                ..Default::default()
            }]),
            members: Some(vec![Member::default()]),
            ..Default::default()
        };
        fill_guild_ids(&mut guild);
        assert_eq!(guild.channels()[0].guild_id, "g");
        assert_eq!(guild.members()[0].guild_id, "g");
    }
}
