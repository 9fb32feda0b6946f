//! Application-command catalogs and interactions.

use serde_json::{json, Value};

use crate::model::{
    AppCommand, ApplicationId, ChannelId, CommandPermissions, GuildId,
};

use super::{RestClient, RestResult};

/// Interaction request types the engine sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InteractionType {
    Command = 2,
    Autocomplete = 4,
}

fn attach_app_names(commands: &mut [AppCommand], applications: &[Value]) {
    for command in commands {
        command.app_name = applications
            .iter()
            .find(|app| {
                app.get("id")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<u64>().ok())
                    == Some(command.application_id.0)
            })
            .and_then(|app| app.get("name"))
            .and_then(Value::as_str)
            .map(str::to_owned);
    }
}

/// REST methods for application commands.
pub trait InteractionExt {
    /// The user's personal command catalog, with application names
    /// resolved.
    async fn get_my_commands(&self) -> RestResult<Vec<AppCommand>>;

    /// A guild's command catalog.
    async fn get_guild_commands(&self, guild: GuildId) -> RestResult<Vec<AppCommand>>;

    /// Command permission overrides declared in a guild.
    async fn get_command_permissions(&self, guild: GuildId)
        -> RestResult<Vec<CommandPermissions>>;

    /// Fire an interaction: a command execution or an autocomplete probe.
    /// The response (for autocomplete, the `choices`) arrives back over
    /// the gateway, correlated by `nonce`.
    async fn send_interaction(
        &self,
        kind: InteractionType,
        application_id: ApplicationId,
        guild: Option<GuildId>,
        channel: ChannelId,
        session_id: &str,
        nonce: &str,
        data: Value,
    ) -> RestResult<()>;
}

impl InteractionExt for RestClient {
    async fn get_my_commands(&self) -> RestResult<Vec<AppCommand>> {
        let index: Value = self
            .get_json("/users/@me/application-command-index")
            .await?;
        let applications = index
            .get("applications")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut commands: Vec<AppCommand> = index
            .get("application_commands")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(|c| serde_json::from_value(c.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        attach_app_names(&mut commands, &applications);
        Ok(commands)
    }

    async fn get_guild_commands(&self, guild: GuildId) -> RestResult<Vec<AppCommand>> {
        let index: Value = self
            .get_json(&format!("/guilds/{}/application-command-index", guild))
            .await?;
        let applications = index
            .get("applications")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut commands: Vec<AppCommand> = index
            .get("application_commands")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(|c| serde_json::from_value(c.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        attach_app_names(&mut commands, &applications);
        for command in &mut commands {
            command.guild_id.get_or_insert(guild);
        }
        Ok(commands)
    }

    async fn get_command_permissions(
        &self,
        guild: GuildId,
    ) -> RestResult<Vec<CommandPermissions>> {
        self.get_json(&format!(
            "/guilds/{}/commands/permissions",
            guild
        ))
        .await
    }

    async fn send_interaction(
        &self,
        kind: InteractionType,
        application_id: ApplicationId,
        guild: Option<GuildId>,
        channel: ChannelId,
        session_id: &str,
        nonce: &str,
        data: Value,
    ) -> RestResult<()> {
        let body = json!({
            "type": kind as u8,
            "application_id": application_id,
            "guild_id": guild,
            "channel_id": channel,
            "session_id": session_id,
            "nonce": nonce,
            "data": data,
        });
        self.post_json("/interactions", body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_names_resolve_by_application_id() {
        let mut commands: Vec<AppCommand> = vec![serde_json::from_value(json!({
            "id": "1",
            "application_id": "500",
            "name": "play",
        }))
        .unwrap()];
        let applications = vec![json!({"id": "500", "name": "My App"})];
        attach_app_names(&mut commands, &applications);
        assert_eq!(commands[0].app_name.as_deref(), Some("My App"));
    }

    #[test]
    fn interaction_types_match_wire_values() {
        assert_eq!(InteractionType::Command as u8, 2);
        assert_eq!(InteractionType::Autocomplete as u8, 4);
    }
}
