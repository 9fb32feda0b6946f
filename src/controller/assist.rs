//! The assist pipeline: candidate assembly per assist kind, ranked with
//! the fuzzy scorer, plus the autocomplete-interaction throttle.

use std::time::{Duration, Instant};

use crate::model::{CommandOptionType, GuildId, Member};
use crate::search::{Ranked, DEFAULT_SCORE_CUTOFF};
use crate::state::Store;

use super::actions::AssistEntry;

/// Score boosts for the global channel search: DMs above guilds above
/// guild channels.
const DM_BOOST: u64 = 4;
const GUILD_BOOST: u64 = 2;

/// A small table of frequently used standard emojis; guild emojis rank
/// first, these fill in behind them.
const STANDARD_EMOJIS: &[(&str, &str)] = &[
    ("grinning", "😀"),
    ("smile", "😄"),
    ("joy", "😂"),
    ("rofl", "🤣"),
    ("wink", "😉"),
    ("blush", "😊"),
    ("heart_eyes", "😍"),
    ("thinking", "🤔"),
    ("upside_down", "🙃"),
    ("sob", "😭"),
    ("angry", "😠"),
    ("skull", "💀"),
    ("fire", "🔥"),
    ("sparkles", "✨"),
    ("tada", "🎉"),
    ("heart", "❤️"),
    ("broken_heart", "💔"),
    ("thumbsup", "👍"),
    ("thumbsdown", "👎"),
    ("clap", "👏"),
    ("wave", "👋"),
    ("pray", "🙏"),
    ("eyes", "👀"),
    ("shrug", "🤷"),
    ("facepalm", "🤦"),
    ("rocket", "🚀"),
    ("star", "⭐"),
    ("check", "✅"),
    ("x", "❌"),
    ("warning", "⚠️"),
    ("zzz", "💤"),
    ("crab", "🦀"),
];

/// Rank channels of one guild (or across guilds and DMs when `guild_id`
/// is `None`).
pub fn assist_channels(
    store: &Store,
    guild_id: Option<GuildId>,
    query: &str,
    include_categories: bool,
    limit: usize,
) -> Vec<AssistEntry> {
    let mut ranked: Ranked<String> = Ranked::new(limit, DEFAULT_SCORE_CUTOFF);
    match guild_id {
        Some(guild_id) => {
            if let Some(guild) = store.guild(guild_id) {
                for channel in &guild.channels {
                    if channel.hidden {
                        continue;
                    }
                    if !include_categories
                        && channel.kind == crate::model::ChannelType::Category
                    {
                        continue;
                    }
                    ranked.offer(
                        query,
                        1,
                        channel.display_name().to_owned(),
                        channel.id.to_string(),
                    );
                }
            }
        }
        None => {
            for dm in &store.dms {
                ranked.offer(query, DM_BOOST, dm.derived_name(), dm.id.to_string());
            }
            for guild in &store.guilds {
                ranked.offer(query, GUILD_BOOST, guild.name.clone(), guild.id.to_string());
                for channel in &guild.channels {
                    if channel.hidden {
                        continue;
                    }
                    ranked.offer(
                        query,
                        1,
                        format!("{} ({})", channel.display_name(), guild.name),
                        channel.id.to_string(),
                    );
                }
            }
        }
    }
    into_entries(ranked)
}

/// Rank usernames and roles: roles come first, then the asynchronous
/// member-query results the gateway returned for this prefix.
pub fn assist_usernames(
    store: &Store,
    guild_id: Option<GuildId>,
    query: &str,
    query_results: &[Member],
    limit: usize,
) -> Vec<AssistEntry> {
    let mut ranked: Ranked<String> = Ranked::new(limit, DEFAULT_SCORE_CUTOFF);
    if let Some(guild) = guild_id.and_then(|id| store.guild(id)) {
        for role in &guild.roles {
            ranked.offer(
                query,
                GUILD_BOOST,
                format!("@{}", role.name),
                role.id.mention(),
            );
        }
    }
    for member in query_results {
        if let Some(user) = &member.user {
            let label = member.display_name().unwrap_or(&user.name);
            ranked.offer(query, 1, format!("@{}", label), user.id.mention());
        }
    }
    into_entries(ranked)
}

/// Rank emojis: the current guild's first (all guilds when premium), the
/// standard table behind them.
pub fn assist_emojis(
    store: &Store,
    guild_id: Option<GuildId>,
    query: &str,
    limit: usize,
) -> Vec<AssistEntry> {
    let premium = store.premium();
    let mut ranked: Ranked<String> = Ranked::new(limit, DEFAULT_SCORE_CUTOFF);
    for guild in &store.guilds {
        if !premium && Some(guild.id) != guild_id {
            continue;
        }
        for emoji in &guild.emojis {
            ranked.offer(
                query,
                GUILD_BOOST,
                format!(":{}:", emoji.name),
                format!("<:{}:{}>", emoji.name, emoji.id),
            );
        }
    }
    for (name, glyph) in STANDARD_EMOJIS {
        ranked.offer(query, 1, format!(":{}:", name), (*glyph).to_owned());
    }
    into_entries(ranked)
}

/// Rank stickers; other guilds' stickers only for premium accounts.
pub fn assist_stickers(
    store: &Store,
    guild_id: Option<GuildId>,
    query: &str,
    limit: usize,
) -> Vec<AssistEntry> {
    let premium = store.premium();
    let mut ranked: Ranked<String> = Ranked::new(limit, DEFAULT_SCORE_CUTOFF);
    for guild in &store.guilds {
        if !premium && Some(guild.id) != guild_id {
            continue;
        }
        for sticker in &guild.stickers {
            ranked.offer(
                query,
                1,
                format!(";{};", sticker.name),
                sticker.id.to_string(),
            );
        }
    }
    into_entries(ranked)
}

/// Built-in client command index for assist kind 5.
pub const CLIENT_COMMAND_INDEX: &[&str] = &[
    "set",
    "bottom",
    "go_reply",
    "download",
    "open_link",
    "play",
    "cancel",
    "copy_message",
    "upload",
    "spoil",
    "profile",
    "summaries",
    "hide",
    "search",
    "goto_mention",
    "status",
    "member_list",
    "react",
    "show_reactions",
    "goto",
    "view_pfp",
    "toggle_mute",
    "toggle_tab",
    "switch_tab",
    "mark_as_read",
    "mark_as_unread",
    "vote",
    "show_pinned",
    "pin_message",
    "set_notifications",
    "toggle_thread",
    "start_call",
    "accept_call",
    "leave_call",
    "reject_call",
    "toggle_call_mute",
    "block",
    "unblock",
    "generate_invite",
    "quit",
];

pub fn assist_client_commands(query: &str, limit: usize) -> Vec<AssistEntry> {
    let mut ranked: Ranked<String> = Ranked::new(limit, DEFAULT_SCORE_CUTOFF);
    for command in CLIENT_COMMAND_INDEX {
        ranked.offer(query, 1, (*command).to_owned(), (*command).to_owned());
    }
    into_entries(ranked)
}

/// The outcome of app-command assist: ranked rows, plus whether the option
/// under the cursor wants a server-side autocomplete interaction.
#[derive(Debug, Default)]
pub struct AppCommandAssist {
    pub entries: Vec<AssistEntry>,
    pub wants_autocomplete: bool,
}

/// Hierarchical app-command completion over the editor line:
/// app → command → subcommand/group → subcommand → option/choice.
pub fn assist_app_commands(store: &Store, line: &str, limit: usize) -> AppCommandAssist {
    let mut result = AppCommandAssist::default();
    let commands: Vec<&crate::model::AppCommand> = store
        .my_commands
        .iter()
        .chain(store.guild_commands.iter())
        .collect();

    let stripped = match line.strip_prefix('/') {
        Some(stripped) => stripped,
        None => return result,
    };
    let words: Vec<&str> = stripped.split(' ').collect();
    let mut ranked: Ranked<String> = Ranked::new(limit, 0);

    match words.len() {
        0 => {}
        1 => {
            // completing the app name
            let query = words[0];
            let mut seen: Vec<String> = Vec::new();
            for command in &commands {
                let app = command
                    .app_name
                    .as_deref()
                    .unwrap_or("app")
                    .to_lowercase()
                    .replace(' ', "_");
                if seen.contains(&app) {
                    continue;
                }
                seen.push(app.clone());
                ranked.offer(query, 1, app.clone(), format!("/{} ", app));
            }
        }
        2 => {
            // completing the command name under an app
            let app = words[0].to_lowercase();
            let query = words[1];
            for command in &commands {
                let token = command
                    .app_name
                    .as_deref()
                    .unwrap_or("app")
                    .to_lowercase()
                    .replace(' ', "_");
                if token != app {
                    continue;
                }
                ranked.offer(
                    query,
                    1,
                    format!("{}: {}", command.name, command.description),
                    command.name.clone(),
                );
            }
        }
        _ => {
            // inside the command: subcommands, groups, then options
            let app = words[0].to_lowercase();
            let Some(command) = commands.iter().find(|c| {
                c.app_name
                    .as_deref()
                    .unwrap_or("app")
                    .to_lowercase()
                    .replace(' ', "_")
                    == app
                    && c.name == words[1]
            }) else {
                result.entries = into_entries(ranked);
                return result;
            };

            // walk into subcommand nesting as far as the words name it
            let mut options: &[crate::model::CommandOption] = &command.options;
            let mut depth = 2;
            while depth < words.len() {
                let word = words[depth];
                if word.starts_with("--") {
                    break;
                }
                match options.iter().find(|o| {
                    o.name == word
                        && matches!(
                            o.kind,
                            CommandOptionType::SubCommand | CommandOptionType::SubCommandGroup
                        )
                }) {
                    Some(nested) => {
                        options = &nested.options;
                        depth += 1;
                    }
                    None => break,
                }
            }

            let last = words.last().copied().unwrap_or_default();
            if let Some(value_query) = last
                .strip_prefix("--")
                .and_then(|opt| opt.split_once('='))
            {
                // completing an option value: fixed choices or autocomplete
                let (option_name, typed) = value_query;
                if let Some(option) = options.iter().find(|o| o.name == option_name) {
                    if option.autocomplete {
                        result.wants_autocomplete = true;
                    }
                    for choice in &option.choices {
                        ranked.offer(
                            typed,
                            1,
                            choice.name.clone(),
                            choice.value.to_string(),
                        );
                    }
                }
            } else if let Some(option_query) = last.strip_prefix("--") {
                for option in options {
                    if matches!(
                        option.kind,
                        CommandOptionType::SubCommand | CommandOptionType::SubCommandGroup
                    ) {
                        continue;
                    }
                    ranked.offer(
                        option_query,
                        1,
                        format!("--{} ({})", option.name, option.kind.label()),
                        format!("--{}=", option.name),
                    );
                }
            } else {
                // completing a subcommand or group name
                for option in options {
                    if matches!(
                        option.kind,
                        CommandOptionType::SubCommand | CommandOptionType::SubCommandGroup
                    ) {
                        ranked.offer(
                            last,
                            1,
                            format!("{} ({})", option.name, option.kind.label()),
                            option.name.clone(),
                        );
                    }
                }
            }
        }
    }

    result.entries = into_entries(ranked);
    result
}

/// Complete filesystem paths for the attach prompt.
pub fn assist_paths(prefix: &str, limit: usize) -> Vec<AssistEntry> {
    let expanded = if let Some(rest) = prefix.strip_prefix("~/") {
        match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home, rest),
            Err(_) => prefix.to_owned(),
        }
    } else {
        prefix.to_owned()
    };

    let (dir, partial) = match expanded.rsplit_once('/') {
        Some((dir, partial)) => (dir.to_owned(), partial.to_owned()),
        None => (".".to_owned(), expanded),
    };

    let mut entries = Vec::new();
    let Ok(listing) = std::fs::read_dir(&dir) else {
        return entries;
    };
    for entry in listing.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&partial) {
            continue;
        }
        let path = format!("{}/{}", dir, name);
        entries.push(AssistEntry {
            label: name,
            insert: path,
            score: 0,
        });
        if entries.len() >= limit {
            break;
        }
    }
    entries.sort_by(|a, b| a.label.cmp(&b.label));
    entries
}

fn into_entries(ranked: Ranked<String>) -> Vec<AssistEntry> {
    ranked
        .into_sorted()
        .into_iter()
        .map(|scored| AssistEntry {
            label: scored.label,
            insert: scored.value,
            score: scored.score,
        })
        .collect()
}

/// Throttles autocomplete interactions: at most one per interval, with a
/// trailing-edge send after the final keystroke.
pub struct AutocompleteThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Option<String>,
}

impl AutocompleteThrottle {
    pub fn new(interval: Duration) -> AutocompleteThrottle {
        AutocompleteThrottle {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    /// Ask to send an autocomplete for `line`. Returns the line when the
    /// window allows sending now; otherwise holds it for the trailing
    /// edge, replacing any earlier held line.
    pub fn request(&mut self, line: String, now: Instant) -> Option<String> {
        let ready = self
            .last_sent
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true);
        if ready {
            self.last_sent = Some(now);
            self.pending = None;
            Some(line)
        } else {
            self.pending = Some(line);
            None
        }
    }

    /// Trailing edge: release the held line once the window reopens.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        if self.pending.is_none() {
            return None;
        }
        let ready = self
            .last_sent
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true);
        if ready {
            self.last_sent = Some(now);
            self.pending.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_commands() -> Store {
        let mut store = Store::new(false, 100, 4);
        store.my_commands = vec![serde_json::from_value(serde_json::json!({
            "id": "900",
            "application_id": "500",
            "name": "foo",
            "description": "does foo",
            "app_name": "myapp",
            "options": [
                {"type": 3, "name": "bar", "description": "", "autocomplete": true},
                {"type": 4, "name": "count", "description": ""},
            ],
        }))
        .unwrap()];
        store
    }

    #[test]
    fn app_command_depths() {
        let store = store_with_commands();

        let apps = assist_app_commands(&store, "/my", 10);
        assert_eq!(apps.entries.len(), 1);
        assert_eq!(apps.entries[0].insert, "/myapp ");

        let commands = assist_app_commands(&store, "/myapp f", 10);
        assert_eq!(commands.entries[0].insert, "foo");

        let options = assist_app_commands(&store, "/myapp foo --", 10);
        assert_eq!(options.entries.len(), 2);
        assert!(options.entries.iter().any(|e| e.insert == "--bar="));

        // scenario: option with autocomplete declared
        let value = assist_app_commands(&store, "/myapp foo --bar=", 10);
        assert!(value.wants_autocomplete);

        let plain = assist_app_commands(&store, "/myapp foo --count=3", 10);
        assert!(!plain.wants_autocomplete);
    }

    #[test]
    fn autocomplete_throttle_trailing_edge() {
        let mut throttle = AutocompleteThrottle::new(Duration::from_secs(2));
        let start = Instant::now();

        // first request passes immediately
        assert_eq!(throttle.request("a".into(), start), Some("a".into()));
        // inside the window: held
        assert_eq!(throttle.request("ab".into(), start + Duration::from_millis(500)), None);
        assert_eq!(
            throttle.request("abc".into(), start + Duration::from_millis(900)),
            None
        );
        // nothing released early
        assert_eq!(throttle.poll(start + Duration::from_secs(1)), None);
        // trailing edge releases only the newest held line
        assert_eq!(
            throttle.poll(start + Duration::from_secs(3)),
            Some("abc".into())
        );
        assert_eq!(throttle.poll(start + Duration::from_secs(3)), None);
    }

    #[test]
    fn client_command_assist_ranks() {
        let results = assist_client_commands("mark", 10);
        assert!(!results.is_empty());
        assert!(results[0].label.starts_with("mark"));
    }

    #[test]
    fn emoji_assist_prefers_guild_emojis() {
        let mut store = Store::new(false, 100, 4);
        store.ingest_ready(
            serde_json::from_value(serde_json::json!({
                "v": 9,
                "session_id": "s",
                "user": {"id": "1", "username": "me"},
                "guilds": [{
                    "id": "100",
                    "properties": {"name": "g", "owner_id": "2", "features": []},
                    "channels": [],
                    "roles": [],
                    "threads": [],
                    "emojis": [{"id": "7", "name": "fire_custom", "available": true}],
                    "stickers": [],
                }],
                "private_channels": [],
                "users": [],
                "read_state": {"entries": []},
                "user_guild_settings": {"entries": []},
                "relationships": [],
            }))
            .unwrap(),
        );
        let results = assist_emojis(&store, Some(GuildId(100)), "fire", 10);
        assert!(results.len() >= 2);
        assert_eq!(results[0].label, ":fire_custom:");
    }
}
