use serde::Deserialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::{ApplicationId, CommandId, Permissions};

/// An application command, invocable from the editor as `/app command ...`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppCommand {
    pub id: CommandId,
    pub application_id: ApplicationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Command version, echoed back in interaction payloads.
    #[serde(default)]
    pub version: Option<String>,
    /// Name of the owning application, filled in from the application
    /// index when the catalog is assembled.
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    /// Required user permission set; `None` means everyone, zero means
    /// administrators only.
    #[serde(default)]
    pub default_member_permissions: Option<Permissions>,
    #[serde(default)]
    pub dm_permission: Option<bool>,
    /// Guild the command is scoped to; `None` for global commands.
    #[serde(default)]
    pub guild_id: Option<super::GuildId>,
}

/// An option, subcommand or group of an application command.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    #[serde(rename = "type")]
    pub kind: CommandOptionType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// If set, the service suggests values through autocomplete
    /// interactions while the option is being typed.
    #[serde(default)]
    pub autocomplete: bool,
    #[serde(default)]
    pub choices: Vec<CommandChoice>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

/// Value types an option may take.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CommandOptionType {
    SubCommand = 1,
    SubCommandGroup = 2,
    String = 3,
    Integer = 4,
    Boolean = 5,
    User = 6,
    Channel = 7,
    Role = 8,
    Mentionable = 9,
    Number = 10,
    Attachment = 11,
}

impl CommandOptionType {
    /// Short human label for the assist list.
    pub fn label(&self) -> &'static str {
        match self {
            CommandOptionType::SubCommand => "subcommand",
            CommandOptionType::SubCommandGroup => "group",
            CommandOptionType::String => "string",
            CommandOptionType::Integer => "integer",
            CommandOptionType::Boolean => "True/False",
            CommandOptionType::User => "user ID",
            CommandOptionType::Channel => "channel ID",
            CommandOptionType::Role => "role ID",
            CommandOptionType::Mentionable => "mentionable ID",
            CommandOptionType::Number => "number",
            CommandOptionType::Attachment => "attachment",
        }
    }
}

/// A fixed choice declared on an option.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandChoice {
    pub name: String,
    pub value: serde_json::Value,
}

/// Command-level or application-level permission overrides for one guild.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandPermissions {
    /// Command ID, or application ID for app-wide entries.
    #[serde(deserialize_with = "crate::serial::deserialize_id")]
    pub id: u64,
    #[serde(default)]
    pub permissions: Vec<CommandPermissionEntry>,
}

/// One override row: a role, user, or channel is allowed or denied.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandPermissionEntry {
    #[serde(deserialize_with = "crate::serial::deserialize_id")]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: CommandPermissionType,
    pub permission: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CommandPermissionType {
    Role = 1,
    User = 2,
    Channel = 3,
}
