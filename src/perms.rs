//! Permission computation: guild base + roles + channel overwrites, and
//! application-command permission resolution on top of it.

use crate::model::{
    AppCommand, ChannelId, CommandPermissionType, CommandPermissions, ComputedPerms, Guild,
    GuildId, OverwriteType, Permissions, RoleId, UserId,
};

/// Recompute permissions for every channel of a guild.
///
/// Owner and administrators saturate every channel. Otherwise the base is
/// the `@everyone` role ORed with each held role; per channel the
/// `@everyone` overwrite applies first (deny then allow), then the union of
/// role overwrites, then the user-specific overwrite.
pub fn compute_guild_permissions(guild: &mut Guild, my_roles: &[RoleId], my_id: UserId) {
    let admin = guild.owned
        || my_roles.iter().any(|role_id| {
            guild
                .role(*role_id)
                .map(|r| r.permissions.contains(Permissions::ADMINISTRATOR))
                .unwrap_or(false)
        });
    guild.admin = admin;

    if admin {
        for channel in &mut guild.channels {
            channel.perms = Some(ComputedPerms::all());
        }
        return;
    }

    let mut base = guild.base_permissions;
    for role_id in my_roles {
        if let Some(role) = guild.roles.iter().find(|r| r.id == *role_id) {
            base |= role.permissions;
        }
    }

    let everyone = guild.id.everyone_role();
    for channel in &mut guild.channels {
        let mut permissions = base;

        // @everyone overwrite, denied then allowed
        if let Some(overwrite) = channel
            .permission_overwrites
            .iter()
            .find(|o| o.kind == OverwriteType::Role && o.id == everyone.0)
        {
            permissions = (permissions & !overwrite.deny) | overwrite.allow;
        }

        // union of role overwrites, denied then allowed
        let mut allow = Permissions::empty();
        let mut deny = Permissions::empty();
        for overwrite in &channel.permission_overwrites {
            if overwrite.kind == OverwriteType::Role
                && overwrite.id != everyone.0
                && my_roles.contains(&RoleId(overwrite.id))
            {
                allow |= overwrite.allow;
                deny |= overwrite.deny;
            }
        }
        permissions = (permissions & !deny) | allow;

        // user-specific overwrite last
        if let Some(overwrite) = channel
            .permission_overwrites
            .iter()
            .find(|o| o.kind == OverwriteType::Member && o.id == my_id.0)
        {
            permissions = (permissions & !overwrite.deny) | overwrite.allow;
        }

        channel.perms = Some(ComputedPerms::from_bits(permissions));
    }
}

/// Application-command permission overrides collected for one guild.
#[derive(Debug, Clone, Default)]
pub struct AppPermissionIndex {
    /// Keyed by command ID.
    pub commands: Vec<CommandPermissions>,
    /// Keyed by application ID, applied when the command has no entry.
    pub applications: Vec<CommandPermissions>,
}

/// Resolve whether each command can be executed in the given channel.
///
/// Channel overrides apply first, then user overrides, then role overrides,
/// command-level before app-level at each step; finally
/// `default_member_permissions` must be a subset of the user's computed
/// channel permissions. Administrators bypass everything.
pub fn compute_command_permissions(
    commands: &[AppCommand],
    index: &AppPermissionIndex,
    channel_id: ChannelId,
    guild_id: GuildId,
    my_roles: &[RoleId],
    my_id: UserId,
    admin: bool,
    channel_perms: Permissions,
) -> Vec<bool> {
    if admin {
        return vec![true; commands.len()];
    }

    commands
        .iter()
        .map(|command| {
            let command_perms = index
                .commands
                .iter()
                .find(|p| p.id == command.id.0)
                .map(|p| p.permissions.as_slice())
                .unwrap_or(&[]);
            let app_perms = index
                .applications
                .iter()
                .find(|p| p.id == command.application_id.0)
                .map(|p| p.permissions.as_slice())
                .unwrap_or(&[]);

            if command_perms.is_empty() && app_perms.is_empty() {
                return default_permission_check(command, channel_perms);
            }

            // channel overrides: the guild ID stands in for "all channels"
            let channel_rule = |perms: &[crate::model::CommandPermissionEntry]| {
                perms
                    .iter()
                    .find(|e| {
                        e.kind == CommandPermissionType::Channel
                            && (e.id == channel_id.0 || e.id == guild_id.0)
                    })
                    .map(|e| e.permission)
            };
            if let Some(false) = channel_rule(command_perms).or_else(|| channel_rule(app_perms)) {
                return false;
            }

            // user overrides, command level first
            let user_rule = |perms: &[crate::model::CommandPermissionEntry]| {
                perms
                    .iter()
                    .find(|e| e.kind == CommandPermissionType::User && e.id == my_id.0)
                    .map(|e| e.permission)
            };
            if let Some(allowed) = user_rule(command_perms) {
                return allowed;
            }

            // role overrides: the guild ID stands in for @everyone
            let role_rule = |perms: &[crate::model::CommandPermissionEntry]| {
                perms
                    .iter()
                    .find(|e| {
                        e.kind == CommandPermissionType::Role
                            && (my_roles.contains(&RoleId(e.id)) || e.id == guild_id.0)
                    })
                    .map(|e| e.permission)
            };
            if let Some(allowed) = role_rule(command_perms) {
                return allowed;
            }

            if let Some(false) = user_rule(app_perms) {
                return false;
            }
            if let Some(false) = role_rule(app_perms) {
                return false;
            }

            default_permission_check(command, channel_perms)
        })
        .collect()
}

fn default_permission_check(command: &AppCommand, channel_perms: Permissions) -> bool {
    match command.default_member_permissions {
        None => true,
        Some(required) if required.is_empty() => false, // admins only
        Some(required) => channel_perms.contains(required),
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Channel, ChannelType, CommandPermissionEntry, GuildPayload, PermissionOverwrite,
    };

    use super::*;

    fn test_guild(owner: UserId) -> Guild {
        let payload: GuildPayload = serde_json::from_value(serde_json::json!({
            "id": "100",
            "name": "testers",
            "owner_id": owner.0.to_string(),
            "features": [],
            "roles": [
                {"id": "100", "name": "@everyone", "color": 0, "position": 0,
                 "permissions": "1024"},
                {"id": "101", "name": "writer", "color": 0, "position": 1,
                 "permissions": "2048"},
                {"id": "102", "name": "boss", "color": 0, "position": 2,
                 "permissions": "8"},
            ],
            "channels": [
                {"id": "200", "type": 0, "name": "general", "position": 0,
                 "permission_overwrites": []},
                {"id": "201", "type": 0, "name": "secret", "position": 1,
                 "permission_overwrites": [
                     {"id": "100", "type": 0, "allow": "0", "deny": "1024"},
                 ]},
            ],
        }))
        .unwrap();
        Guild::from_payload(payload, UserId(1), false)
    }

    #[test]
    fn owner_and_admin_saturate() {
        let mut guild = test_guild(UserId(1));
        compute_guild_permissions(&mut guild, &[], UserId(1));
        assert!(guild.admin);
        for channel in &guild.channels {
            let perms = channel.perms.unwrap();
            assert!(perms.permitted && perms.allow_write && perms.allow_attach && perms.allow_manage);
        }

        let mut guild = test_guild(UserId(9));
        compute_guild_permissions(&mut guild, &[RoleId(102)], UserId(1));
        assert!(guild.admin);
    }

    #[test]
    fn everyone_deny_hides_channel() {
        let mut guild = test_guild(UserId(9));
        compute_guild_permissions(&mut guild, &[RoleId(101)], UserId(1));
        assert!(!guild.admin);

        let general = guild.channel(ChannelId(200)).unwrap().perms.unwrap();
        assert!(general.permitted);
        assert!(general.allow_write);
        assert!(!general.allow_manage);

        let secret = guild.channel(ChannelId(201)).unwrap().perms.unwrap();
        assert!(!secret.permitted);
    }

    #[test]
    fn member_overwrite_beats_role_deny() {
        let mut guild = test_guild(UserId(9));
        guild
            .channel_mut(ChannelId(201))
            .unwrap()
            .permission_overwrites
            .push(PermissionOverwrite {
                id: 1,
                kind: OverwriteType::Member,
                allow: Permissions::VIEW_CHANNEL,
                deny: Permissions::empty(),
            });
        compute_guild_permissions(&mut guild, &[], UserId(1));
        assert!(guild.channel(ChannelId(201)).unwrap().perms.unwrap().permitted);
    }

    fn command(id: u64, app: u64, default: Option<Permissions>) -> AppCommand {
        serde_json::from_value::<AppCommand>(serde_json::json!({
            "id": id.to_string(),
            "application_id": app.to_string(),
            "name": "cmd",
            "default_member_permissions": default.map(|p| p.bits().to_string()),
        }))
        .unwrap()
    }

    #[test]
    fn command_permission_layers() {
        let commands = vec![
            command(1, 10, None),
            command(2, 10, Some(Permissions::MANAGE_MESSAGES)),
        ];
        let mut index = AppPermissionIndex::default();
        index.commands.push(CommandPermissions {
            id: 1,
            permissions: vec![CommandPermissionEntry {
                id: 5, // my user id
                kind: CommandPermissionType::User,
                permission: false,
            }],
        });

        let allowed = compute_command_permissions(
            &commands,
            &index,
            ChannelId(200),
            GuildId(100),
            &[],
            UserId(5),
            false,
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
        );
        // command 1 denied by user override; command 2 lacks MANAGE_MESSAGES
        assert_eq!(allowed, vec![false, false]);

        let allowed_admin = compute_command_permissions(
            &commands,
            &index,
            ChannelId(200),
            GuildId(100),
            &[],
            UserId(5),
            true,
            Permissions::empty(),
        );
        assert_eq!(allowed_admin, vec![true, true]);
    }

    #[test]
    fn textual_channel_helper() {
        let channel: Channel = serde_json::from_value(serde_json::json!({
            "id": "1", "type": 0, "name": "x", "position": 0,
        }))
        .unwrap();
        assert_eq!(channel.kind, ChannelType::Text);
        assert!(channel.is_textual());
    }
}
