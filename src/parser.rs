//! Grammars typed into the editor: message-search queries, application
//! (slash) commands, and built-in client commands.

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{json, Value};

use crate::model::{
    AppCommand, ApplicationId, Channel, CommandOption, CommandOptionType, MessageId, Role,
    SNOWFLAKE_EPOCH,
};

fn patterns() -> &'static Patterns {
    use std::sync::OnceLock;
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(Patterns::new)
}

struct Patterns {
    from: Regex,
    mentions: Regex,
    has: Regex,
    before: Regex,
    after: Regex,
    in_channel: Regex,
    pinned: Regex,
    profile: Regex,
    channel: Regex,
    command_argument: Regex,
    setting: Regex,
}

impl Patterns {
    fn new() -> Patterns {
        Patterns {
            from: Regex::new(r"from:<@(\d+)>").unwrap(),
            mentions: Regex::new(r"mentions:<@(\d+)>").unwrap(),
            has: Regex::new(r"has:(link|embed|file|video|image|sound|sticker)").unwrap(),
            before: Regex::new(r"before:(\d{4}-\d{2}-\d{2})").unwrap(),
            after: Regex::new(r"after:(\d{4}-\d{2}-\d{2})").unwrap(),
            in_channel: Regex::new(r"in:<#(\d+)>").unwrap(),
            pinned: Regex::new(r"pinned:(true|false)").unwrap(),
            profile: Regex::new(r"<@(\d+)>").unwrap(),
            channel: Regex::new(r"<#(\d+)>").unwrap(),
            command_argument: Regex::new(r#"--(\S+?)=(\w+|"[^"]+")?"#).unwrap(),
            setting: Regex::new(r"(\w+) ?= ?(.+)").unwrap(),
        }
    }
}

/// Convert a date to the smallest (or largest) snowflake of that day.
pub fn date_to_snowflake(date: &str, day_end: bool) -> Option<MessageId> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let mut seconds = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp() as u64;
    if day_end {
        seconds += 86_399;
    }
    let ms = seconds.checked_sub(SNOWFLAKE_EPOCH)?.checked_mul(1000)?;
    Some(MessageId(ms << 22))
}

/// A parsed message-search query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub content: String,
    pub channel_ids: Vec<u64>,
    pub author_ids: Vec<u64>,
    pub mentions: Vec<u64>,
    pub has: Vec<String>,
    pub max_id: Option<MessageId>,
    pub min_id: Option<MessageId>,
    pub pinned: Option<bool>,
}

/// Parse the search grammar:
/// `from:<@ID> mentions:<@ID> has:link before:2015-01-01 after:2015-01-01
/// in:<#ID> pinned:true free text`.
pub fn parse_search(text: &str) -> SearchQuery {
    let p = patterns();
    let mut query = SearchQuery::default();
    let mut remaining = text.to_owned();

    fn strip(regex: &Regex, remaining: &mut String, mut f: impl FnMut(&str)) {
        let collected: Vec<(String, String)> = regex
            .captures_iter(remaining)
            .map(|c| (c[0].to_owned(), c[1].to_owned()))
            .collect();
        for (whole, capture) in collected {
            *remaining = remaining.replace(&whole, "");
            f(&capture);
        }
    }

    strip(&p.from, &mut remaining, |id| {
        if let Ok(id) = id.parse() {
            query.author_ids.push(id);
        }
    });
    strip(&p.mentions, &mut remaining, |id| {
        if let Ok(id) = id.parse() {
            query.mentions.push(id);
        }
    });
    strip(&p.has, &mut remaining, |has| {
        query.has.push(has.to_owned());
    });
    strip(&p.before, &mut remaining, |date| {
        query.max_id = date_to_snowflake(date, false);
    });
    strip(&p.after, &mut remaining, |date| {
        query.min_id = date_to_snowflake(date, true);
    });
    strip(&p.in_channel, &mut remaining, |id| {
        if let Ok(id) = id.parse() {
            query.channel_ids.push(id);
        }
    });
    strip(&p.pinned, &mut remaining, |v| {
        query.pinned = Some(v == "true");
    });

    query.content = remaining.split_whitespace().collect::<Vec<_>>().join(" ");
    query
}

/// An app command invocation, ready to become an interaction payload.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub application_id: ApplicationId,
    /// The `data` object of the interaction request.
    pub data: Value,
    /// An `attachment`-typed option was supplied; an upload must accompany
    /// the interaction.
    pub needs_attachment: bool,
}

fn app_token(command: &AppCommand) -> String {
    command
        .app_name
        .as_deref()
        .unwrap_or("app")
        .to_lowercase()
        .replace(' ', "_")
}

/// Whether the text is the valid start of a known, permitted app command.
pub fn is_command_start(text: &str, commands: &[AppCommand], permitted: &[bool]) -> bool {
    let Some(app_name) = text.split(' ').next().and_then(|w| w.strip_prefix('/')) else {
        return false;
    };
    if app_name.is_empty() {
        return false;
    }
    commands
        .iter()
        .enumerate()
        .any(|(i, c)| permitted.get(i).copied().unwrap_or(true) && app_token(c) == app_name)
}

fn verify_option_value(
    value: &str,
    kind: CommandOptionType,
    roles: &[Role],
    channels: &[Channel],
) -> bool {
    let p = patterns();
    match kind {
        CommandOptionType::SubCommand | CommandOptionType::SubCommandGroup => false,
        CommandOptionType::String => {
            !p.profile.is_match(value) && !p.channel.is_match(value)
        }
        CommandOptionType::Integer => value.parse::<i64>().is_ok(),
        CommandOptionType::Boolean => matches!(value.to_lowercase().as_str(), "true" | "false"),
        CommandOptionType::User | CommandOptionType::Mentionable => p.profile.is_match(value),
        CommandOptionType::Channel => p
            .channel
            .captures(value)
            .and_then(|c| c[1].parse::<u64>().ok())
            .map(|id| channels.iter().any(|ch| ch.id.0 == id))
            .unwrap_or(false),
        CommandOptionType::Role => p
            .profile
            .captures(value)
            .and_then(|c| c[1].parse::<u64>().ok())
            .map(|id| roles.iter().any(|r| r.id.0 == id))
            .unwrap_or(false),
        CommandOptionType::Number => value.parse::<f64>().is_ok(),
        CommandOptionType::Attachment => true,
    }
}

/// Parse `/app command [group] [sub] --name=value ...` against the command
/// catalog. In `autocomplete` mode option values are not validated and the
/// last option is marked focused.
pub fn parse_app_command(
    text: &str,
    commands: &[AppCommand],
    permitted: &[bool],
    roles: &[Role],
    channels: &[Channel],
    dm: bool,
    autocomplete: bool,
) -> Option<ParsedCommand> {
    let p = patterns();
    let mut words = text.split(' ');
    let app_name = words.next()?.strip_prefix('/')?;
    if app_name.is_empty() {
        return None;
    }
    let command_name = words.next()?;
    if command_name.starts_with("--") {
        return None;
    }

    let (_, command) = commands.iter().enumerate().find(|(i, c)| {
        permitted.get(*i).copied().unwrap_or(true)
            && app_token(c) == app_name
            && c.name == command_name
    })?;
    if dm && command.guild_id.is_none() && command.dm_permission == Some(false) {
        return None;
    }

    let take_name = |words: &mut std::str::Split<'_, char>| -> Option<String> {
        words
            .next()
            .filter(|w| !w.starts_with("--") && !w.is_empty())
            .map(str::to_owned)
    };
    let first_sub = take_name(&mut words);
    let second_sub = first_sub.as_ref().and_then(|_| take_name(&mut words));

    let mut option_values: Vec<(String, String)> = Vec::new();
    for capture in p.command_argument.captures_iter(text) {
        let value = capture
            .get(2)
            .map(|m| m.as_str().trim_matches('"').to_owned())
            .unwrap_or_default();
        option_values.push((capture[1].to_owned(), value));
    }

    // resolve subcommand / group nesting
    let mut context_options: &[CommandOption] = &command.options;
    let mut subcommand: Option<&CommandOption> = None;
    let mut group: Option<&CommandOption> = None;
    if let Some(name) = first_sub.as_deref() {
        for option in context_options {
            match option.kind {
                CommandOptionType::SubCommand if option.name == name => {
                    subcommand = Some(option);
                    context_options = &option.options;
                    break;
                }
                CommandOptionType::SubCommandGroup if option.name == name => {
                    group = Some(option);
                    break;
                }
                _ => {}
            }
        }
    }
    if let (Some(g), Some(name)) = (group, second_sub.as_deref()) {
        for option in &g.options {
            if option.kind == CommandOptionType::SubCommand && option.name == name {
                subcommand = Some(option);
                context_options = &option.options;
                break;
            }
        }
    }
    if group.is_some() && subcommand.is_none() {
        // cannot invoke a bare group
        return None;
    }

    // assemble and verify options
    let mut needs_attachment = false;
    let mut options: Vec<Value> = Vec::new();
    let total = option_values.len();
    for (index, (name, value)) in option_values.iter().enumerate() {
        let declared = context_options.iter().find(|o| &o.name == name)?;
        let value = if declared.kind == CommandOptionType::Attachment {
            needs_attachment = true;
            Value::from(0)
        } else {
            if !autocomplete && !verify_option_value(value, declared.kind, roles, channels) {
                return None;
            }
            Value::from(value.as_str())
        };
        let mut option = json!({
            "type": declared.kind,
            "name": declared.name,
            "value": value,
        });
        if autocomplete && index == total - 1 {
            option["focused"] = Value::Bool(true);
        }
        options.push(option);
    }

    if !autocomplete {
        for declared in context_options {
            if declared.required && !option_values.iter().any(|(n, _)| n == &declared.name) {
                return None;
            }
        }
    }

    // wrap into subcommand / group envelopes
    let mut options = options;
    if let Some(sub) = subcommand {
        let mut envelope = json!({"type": sub.kind, "name": sub.name});
        if !options.is_empty() {
            envelope["options"] = Value::Array(options);
        }
        options = vec![envelope];
    }
    if let Some(g) = group {
        let mut envelope = json!({"type": g.kind, "name": g.name});
        envelope["options"] = Value::Array(options);
        options = vec![envelope];
    }

    Some(ParsedCommand {
        application_id: command.application_id,
        data: json!({
            "version": command.version,
            "id": command.id,
            "name": command.name,
            "type": 1,
            "options": options,
            "attachments": [],
        }),
        needs_attachment,
    })
}

/// A built-in client command typed at the prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Set { key: String, value: String },
    Bottom,
    GoReply,
    Download { num: Option<usize> },
    OpenLink { num: Option<usize> },
    Play { num: Option<usize> },
    Cancel,
    CopyMessage,
    Upload { path: String },
    Spoil,
    Profile,
    Summaries,
    Hide,
    Search { query: String },
    GotoMention,
    Status { status: String },
    MemberList,
    React { text: String },
    ShowReactions,
    Goto { target: String },
    ViewProfilePicture,
    ToggleMute,
    ToggleTab,
    SwitchTab { num: usize },
    MarkAsRead,
    MarkAsUnread,
    Vote { num: usize },
    ShowPinned,
    PinMessage,
    SetNotifications { value: String },
    ToggleThread,
    StartCall,
    AcceptCall,
    LeaveCall,
    RejectCall,
    ToggleCallMute,
    Block { user: String },
    Unblock { user: String },
    GenerateInvite,
    Quit,
    Unknown,
}

/// Parse the client-command grammar. Unknown input maps to
/// [`ClientCommand::Unknown`] instead of failing.
pub fn parse_client_command(text: &str) -> ClientCommand {
    let text = text.trim();
    let lower = text.to_lowercase();
    let arg = |text: &str| -> Option<String> {
        text.split_once(' ').map(|(_, rest)| rest.trim().to_owned())
    };
    let num_arg = |text: &str| -> Option<usize> { arg(text)?.parse().ok() };

    if lower.starts_with("set ") {
        if let Some(capture) = patterns().setting.captures(&text[4..]) {
            return ClientCommand::Set {
                key: capture[1].to_owned(),
                value: capture[2].trim().to_owned(),
            };
        }
        return ClientCommand::Unknown;
    }

    match lower.split(' ').next().unwrap_or_default() {
        "bottom" => ClientCommand::Bottom,
        "go_reply" => ClientCommand::GoReply,
        "download" => ClientCommand::Download { num: num_arg(text) },
        "open_link" => ClientCommand::OpenLink { num: num_arg(text) },
        "play" => ClientCommand::Play { num: num_arg(text) },
        "cancel" => ClientCommand::Cancel,
        "copy_message" => ClientCommand::CopyMessage,
        "upload" => match arg(text) {
            Some(path) => ClientCommand::Upload { path },
            None => ClientCommand::Unknown,
        },
        "spoil" => ClientCommand::Spoil,
        "profile" => ClientCommand::Profile,
        "summaries" => ClientCommand::Summaries,
        "hide" => ClientCommand::Hide,
        "search" => ClientCommand::Search {
            query: arg(text).unwrap_or_default(),
        },
        "goto_mention" => ClientCommand::GotoMention,
        "status" => match arg(text) {
            Some(status)
                if matches!(status.as_str(), "online" | "idle" | "dnd" | "invisible") =>
            {
                ClientCommand::Status { status }
            }
            _ => ClientCommand::Unknown,
        },
        "member_list" => ClientCommand::MemberList,
        "react" => match arg(text) {
            Some(text) => ClientCommand::React { text },
            None => ClientCommand::Unknown,
        },
        "show_reactions" => ClientCommand::ShowReactions,
        "goto" => match arg(text) {
            Some(target) => ClientCommand::Goto { target },
            None => ClientCommand::Unknown,
        },
        "view_pfp" => ClientCommand::ViewProfilePicture,
        "toggle_mute" => ClientCommand::ToggleMute,
        "toggle_tab" => ClientCommand::ToggleTab,
        "switch_tab" => match num_arg(text) {
            Some(num) => ClientCommand::SwitchTab { num },
            None => ClientCommand::Unknown,
        },
        "mark_as_read" => ClientCommand::MarkAsRead,
        "mark_as_unread" => ClientCommand::MarkAsUnread,
        "vote" => match num_arg(text) {
            Some(num) => ClientCommand::Vote { num },
            None => ClientCommand::Unknown,
        },
        "show_pinned" => ClientCommand::ShowPinned,
        "pin_message" => ClientCommand::PinMessage,
        "set_notifications" => match arg(text) {
            Some(value) => ClientCommand::SetNotifications { value },
            None => ClientCommand::Unknown,
        },
        "toggle_thread" => ClientCommand::ToggleThread,
        "start_call" => ClientCommand::StartCall,
        "accept_call" => ClientCommand::AcceptCall,
        "leave_call" => ClientCommand::LeaveCall,
        "reject_call" => ClientCommand::RejectCall,
        "toggle_call_mute" => ClientCommand::ToggleCallMute,
        "block" => match arg(text) {
            Some(user) => ClientCommand::Block { user },
            None => ClientCommand::Unknown,
        },
        "unblock" => match arg(text) {
            Some(user) => ClientCommand::Unblock { user },
            None => ClientCommand::Unknown,
        },
        "generate_invite" => ClientCommand::GenerateInvite,
        "quit" => ClientCommand::Quit,
        _ => ClientCommand::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_grammar_extracts_filters() {
        let query = parse_search(
            "from:<@111> release notes has:link in:<#222> before:2024-03-01 pinned:true",
        );
        assert_eq!(query.author_ids, vec![111]);
        assert_eq!(query.channel_ids, vec![222]);
        assert_eq!(query.has, vec!["link".to_owned()]);
        assert_eq!(query.pinned, Some(true));
        assert!(query.max_id.is_some());
        assert_eq!(query.content, "release notes");
    }

    #[test]
    fn date_snowflake_bounds() {
        let start = date_to_snowflake("2016-01-01", false).unwrap();
        let end = date_to_snowflake("2016-01-01", true).unwrap();
        assert!(end > start);
        // before the epoch there is no snowflake
        assert!(date_to_snowflake("2014-12-31", false).is_none());
    }

    fn catalog() -> Vec<AppCommand> {
        vec![serde_json::from_value(serde_json::json!({
            "id": "900",
            "application_id": "500",
            "name": "foo",
            "app_name": "myapp",
            "version": "901",
            "options": [
                {"type": 3, "name": "bar", "description": "", "autocomplete": true},
                {"type": 4, "name": "count", "description": ""},
            ],
        }))
        .unwrap()]
    }

    #[test]
    fn app_command_parses_options() {
        let commands = catalog();
        let parsed = parse_app_command(
            "/myapp foo --bar=hello --count=3",
            &commands,
            &[true],
            &[],
            &[],
            false,
            false,
        )
        .unwrap();
        assert_eq!(parsed.application_id, ApplicationId(500));
        let options = parsed.data["options"].as_array().unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0]["name"], "bar");
        assert!(!parsed.needs_attachment);
    }

    #[test]
    fn app_command_rejects_bad_option_type() {
        let commands = catalog();
        assert!(parse_app_command(
            "/myapp foo --count=notanumber",
            &commands,
            &[true],
            &[],
            &[],
            false,
            false,
        )
        .is_none());
    }

    #[test]
    fn autocomplete_marks_last_option_focused() {
        let commands = catalog();
        let parsed = parse_app_command(
            "/myapp foo --bar=he",
            &commands,
            &[true],
            &[],
            &[],
            false,
            true,
        )
        .unwrap();
        let options = parsed.data["options"].as_array().unwrap();
        assert_eq!(options.last().unwrap()["focused"], true);
    }

    #[test]
    fn unpermitted_command_is_invisible() {
        let commands = catalog();
        assert!(!is_command_start("/myapp foo", &commands, &[false]));
        assert!(is_command_start("/myapp foo", &commands, &[true]));
    }

    #[test]
    fn client_commands_parse() {
        assert_eq!(
            parse_client_command("set theme = dark"),
            ClientCommand::Set {
                key: "theme".into(),
                value: "dark".into()
            }
        );
        assert_eq!(
            parse_client_command("download 3"),
            ClientCommand::Download { num: Some(3) }
        );
        assert_eq!(parse_client_command("bottom"), ClientCommand::Bottom);
        assert_eq!(
            parse_client_command("status idle"),
            ClientCommand::Status {
                status: "idle".into()
            }
        );
        assert_eq!(parse_client_command("status away"), ClientCommand::Unknown);
        assert_eq!(parse_client_command("frobnicate"), ClientCommand::Unknown);
    }
}
