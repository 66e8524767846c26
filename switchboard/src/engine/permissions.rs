use bitflags::bitflags;

use crate::state::models::{Channel, Guild, Member, OverwriteType, PermissionOverwrite};

bitflags! {
    /// Permission bitfield for roles and channel overwrites.
    /// Bit positions match the upstream platform; records store the raw `u64`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        // ── General ──
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS          = 1 << 1;
        const BAN_MEMBERS           = 1 << 2;
        const ADMINISTRATOR         = 1 << 3;
        const MANAGE_CHANNELS       = 1 << 4;
        const MANAGE_GUILD          = 1 << 5;
        const ADD_REACTIONS         = 1 << 6;
        const VIEW_AUDIT_LOG        = 1 << 7;
        const PRIORITY_SPEAKER      = 1 << 8;

        // ── Channel text ──
        const VIEW_CHANNEL          = 1 << 10;
        const SEND_MESSAGES         = 1 << 11;
        const SEND_TTS_MESSAGES     = 1 << 12;
        const MANAGE_MESSAGES       = 1 << 13;
        const EMBED_LINKS           = 1 << 14;
        const ATTACH_FILES          = 1 << 15;
        const READ_MESSAGE_HISTORY  = 1 << 16;
        const MENTION_EVERYONE      = 1 << 17;
        const USE_EXTERNAL_EMOJIS   = 1 << 18;

        // ── Voice ──
        const CONNECT               = 1 << 20;
        const SPEAK                 = 1 << 21;
        const MUTE_MEMBERS          = 1 << 22;
        const DEAFEN_MEMBERS        = 1 << 23;
        const MOVE_MEMBERS          = 1 << 24;
        const USE_VAD               = 1 << 25;

        // ── Management ──
        const CHANGE_NICKNAME       = 1 << 26;
        const MANAGE_NICKNAMES      = 1 << 27;
        const MANAGE_ROLES          = 1 << 28;
        const MANAGE_WEBHOOKS       = 1 << 29;
        const MANAGE_EMOJIS         = 1 << 30;
    }
}

/// Every text-channel permission.
pub const ALL_TEXT: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::SEND_MESSAGES)
    .union(Permissions::SEND_TTS_MESSAGES)
    .union(Permissions::MANAGE_MESSAGES)
    .union(Permissions::EMBED_LINKS)
    .union(Permissions::ATTACH_FILES)
    .union(Permissions::READ_MESSAGE_HISTORY)
    .union(Permissions::MENTION_EVERYONE);

/// Every voice-channel permission.
pub const ALL_VOICE: Permissions = Permissions::CONNECT
    .union(Permissions::SPEAK)
    .union(Permissions::MUTE_MEMBERS)
    .union(Permissions::DEAFEN_MEMBERS)
    .union(Permissions::MOVE_MEMBERS)
    .union(Permissions::USE_VAD)
    .union(Permissions::PRIORITY_SPEAKER);

/// Every permission that can be granted at channel scope.
pub const ALL_CHANNEL: Permissions = ALL_TEXT
    .union(ALL_VOICE)
    .union(Permissions::CREATE_INSTANT_INVITE)
    .union(Permissions::MANAGE_ROLES)
    .union(Permissions::MANAGE_CHANNELS)
    .union(Permissions::ADD_REACTIONS)
    .union(Permissions::VIEW_AUDIT_LOG);

/// Lets the bot read a guild's ban list.
pub const BAN_READ: Permissions = Permissions::BAN_MEMBERS;

/// Compute a user's effective permissions, in a guild or in one of its channels.
///
/// Resolution order (mirrors the upstream platform):
///   1. Guild owner gets all permissions unconditionally.
///   2. Start with the `@everyone` role's permissions.
///   3. OR in all the user's assigned role permissions.
///   4. If ADMINISTRATOR is set, grant all permissions.
///   5. Without channel overwrites (guild scope), stop here.
///   6. Apply the `@everyone` channel overwrite (deny, then allow).
///   7. OR together the deny and allow of every overwrite for a held role;
///      apply the combined deny, then the combined allow.
///   8. Apply the member-specific overwrite (deny, then allow).
///   9. If ADMINISTRATOR survived the overwrites, grant every channel permission.
pub fn compute_effective_permissions(
    base_everyone: Permissions,
    user_role_permissions: &[(String, Permissions)],
    channel_overwrites: Option<&[PermissionOverwrite]>,
    everyone_role_id: &str,
    user_id: &str,
    is_owner: bool,
) -> Permissions {
    if is_owner {
        return Permissions::all();
    }

    // Step 2-3: base = @everyone perms | all user role perms
    let mut perms = base_everyone;
    for (_role_id, role_perms) in user_role_permissions {
        perms |= *role_perms;
    }

    // Step 4: admin bypass
    if perms.contains(Permissions::ADMINISTRATOR) {
        perms |= Permissions::all();
    }

    let Some(overwrites) = channel_overwrites else {
        return perms;
    };

    // Step 6: @everyone channel overwrite
    if let Some(ow) = overwrites.iter().find(|ow| ow.id == everyone_role_id) {
        perms &= !ow.deny();
        perms |= ow.allow();
    }

    // Step 7: role overwrites, denies before allows
    let mut role_deny = Permissions::empty();
    let mut role_allow = Permissions::empty();
    for ow in overwrites {
        if ow.kind == OverwriteType::Role
            && ow.id != everyone_role_id
            && user_role_permissions.iter().any(|(id, _)| *id == ow.id)
        {
            role_deny |= ow.deny();
            role_allow |= ow.allow();
        }
    }
    perms &= !role_deny;
    perms |= role_allow;

    // Step 8: member overwrite
    if let Some(ow) = overwrites
        .iter()
        .find(|ow| ow.kind == OverwriteType::Member && ow.id == user_id)
    {
        perms &= !ow.deny();
        perms |= ow.allow();
    }

    // Step 9
    if perms.contains(Permissions::ADMINISTRATOR) {
        perms |= ALL_CHANNEL;
    }

    perms
}

/// Role id and permissions for every role of the guild the member holds.
fn held_roles(guild: &Guild, member: &Member) -> Vec<(String, Permissions)> {
    guild
        .roles()
        .iter()
        .filter(|role| member.roles.contains(&role.id))
        .map(|role| (role.id.clone(), role.permissions()))
        .collect()
}

fn everyone_permissions(guild: &Guild) -> Permissions {
    guild
        .everyone_role()
        .map(|role| role.permissions())
        .unwrap_or_else(Permissions::empty)
}

/// Guild-scope permissions for a cached member.
pub fn member_permissions(guild: &Guild, member: &Member) -> Permissions {
    compute_effective_permissions(
        everyone_permissions(guild),
        &held_roles(guild, member),
        None,
        &guild.id,
        &member.user.id,
        member.user.id == guild.owner_id,
    )
}

/// Channel-scope permissions for a cached member.
pub fn member_channel_permissions(guild: &Guild, channel: &Channel, member: &Member) -> Permissions {
    compute_effective_permissions(
        everyone_permissions(guild),
        &held_roles(guild, member),
        Some(channel.permission_overwrites()),
        &guild.id,
        &member.user.id,
        member.user.id == guild.owner_id,
    )
}
