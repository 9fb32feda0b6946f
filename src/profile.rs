//! Per-profile persisted state: last location, collapsed folders, hidden
//! channels, summaries and command history, each its own JSON document.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ChannelId, GuildId, Summary};
use crate::Result;

/// The profiles file: which profile is selected and the known accounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profiles {
    pub selected: String,
    pub profiles: Vec<ProfileEntry>,
}

/// One stored account. The token may be empty when it lives in the OS
/// keyring instead; resolving that is the platform shim's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub name: String,
    #[serde(default)]
    pub token: String,
    /// Last-used time, seconds since the epoch.
    #[serde(default)]
    pub time: u64,
}

impl Profiles {
    pub fn selected_entry(&self) -> Option<&ProfileEntry> {
        self.profiles
            .iter()
            .find(|p| p.name == self.selected)
            .or_else(|| self.profiles.first())
    }
}

/// The main per-profile state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub last_guild_id: Option<GuildId>,
    pub last_channel_id: Option<ChannelId>,
    pub muted: bool,
    /// Collapsed tree entries (guilds, categories, folders).
    pub collapsed: Vec<u64>,
    /// User-renamed guild folders.
    pub folder_names: Vec<String>,
}

/// Disk layout for one profile's persisted files.
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// State under the platform config directory, namespaced by profile.
    pub fn for_profile(profile: &str) -> Option<ProfileStore> {
        let dirs = directories::ProjectDirs::from("", "", "backchat")?;
        Some(ProfileStore {
            dir: dirs.config_dir().join(profile),
        })
    }

    /// A store rooted at an explicit directory (tests, portable installs).
    pub fn at(dir: impl Into<PathBuf>) -> ProfileStore {
        ProfileStore { dir: dir.into() }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn read_json<T: serde::de::DeserializeOwned + Default>(&self, file: &str) -> T {
        match fs::read(self.path(file)) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(self.path(file), bytes)?;
        debug!(file, "persisted");
        Ok(())
    }

    pub fn load_state(&self) -> PersistedState {
        self.read_json("state.json")
    }

    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        self.write_json("state.json", state)
    }

    pub fn load_hidden_channels(&self) -> Vec<ChannelId> {
        self.read_json("hidden_channels.json")
    }

    pub fn save_hidden_channels(&self, channels: &[ChannelId]) -> Result<()> {
        self.write_json("hidden_channels.json", &channels)
    }

    pub fn load_summaries(&self) -> Vec<(ChannelId, Vec<Summary>)> {
        self.read_json("summaries.json")
    }

    pub fn save_summaries(&self, summaries: &[(ChannelId, Vec<Summary>)]) -> Result<()> {
        self.write_json("summaries.json", &summaries)
    }

    pub fn load_command_history(&self) -> Vec<String> {
        self.read_json("command_history.json")
    }

    pub fn save_command_history(&self, history: &[String]) -> Result<()> {
        self.write_json("command_history.json", &history)
    }
}

/// Load the profiles file from the shared (non-profile) directory.
pub fn load_profiles() -> Profiles {
    let Some(dirs) = directories::ProjectDirs::from("", "", "backchat") else {
        return Profiles::default();
    };
    read_profiles_file(&dirs.config_dir().join("profiles.json"))
}

fn read_profiles_file(path: &Path) -> Profiles {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Profiles::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::at(dir.path());

        // missing files load as defaults
        assert_eq!(store.load_state(), PersistedState::default());
        assert!(store.load_command_history().is_empty());

        let state = PersistedState {
            last_guild_id: Some(GuildId(100)),
            last_channel_id: Some(ChannelId(200)),
            muted: false,
            collapsed: vec![100],
            folder_names: vec!["work".to_owned()],
        };
        store.save_state(&state).unwrap();
        assert_eq!(store.load_state(), state);

        store
            .save_command_history(&["search foo".to_owned()])
            .unwrap();
        assert_eq!(store.load_command_history(), vec!["search foo".to_owned()]);
    }

    #[test]
    fn corrupt_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::at(dir.path());
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("state.json"), b"{not json").unwrap();
        assert_eq!(store.load_state(), PersistedState::default());
    }

    #[test]
    fn profiles_pick_selected_then_first() {
        let profiles = Profiles {
            selected: "b".to_owned(),
            profiles: vec![
                ProfileEntry {
                    name: "a".to_owned(),
                    token: "t1".to_owned(),
                    time: 0,
                },
                ProfileEntry {
                    name: "b".to_owned(),
                    token: "t2".to_owned(),
                    time: 0,
                },
            ],
        };
        assert_eq!(profiles.selected_entry().unwrap().token, "t2");

        let fallback = Profiles {
            selected: "missing".to_owned(),
            ..profiles
        };
        assert_eq!(fallback.selected_entry().unwrap().token, "t1");
    }
}
