use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::entity::CollectionKind;
use crate::state::{AppState, MAX_TEMPLATES};

const SETTINGS_DIR: &str = "crcon_terminal";
const SETTINGS_FILE: &str = "settings.json";
const SETTINGS_VERSION: u32 = 1;

/// Small last-writer-wins preferences. Anything with another version is dropped.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub sort_keys: HashMap<String, String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub templates: Vec<String>,
}

impl Settings {
    pub fn from_state(state: &AppState) -> Self {
        let sort_keys = CollectionKind::ALL
            .iter()
            .map(|kind| {
                (
                    kind.storage_key().to_string(),
                    state.view(*kind).options.sort_key.clone(),
                )
            })
            .filter(|(_, key)| !key.is_empty())
            .collect();
        Self {
            version: SETTINGS_VERSION,
            sort_keys,
            page_size: Some(state.page_size),
            templates: state.templates.clone(),
        }
    }

    pub fn apply_to(&self, state: &mut AppState) {
        for kind in CollectionKind::ALL {
            if let Some(key) = self.sort_keys.get(kind.storage_key()) {
                state.view_mut(kind).options.sort_key = key.clone();
            }
        }
        if let Some(size) = self.page_size.filter(|s| *s > 0) {
            state.page_size = size;
            for kind in CollectionKind::ALL {
                let view = state.view_mut(kind);
                if view.filter.page_size.is_some() {
                    view.filter.page_size = Some(size);
                }
            }
        }
        state.templates = self.templates.iter().take(MAX_TEMPLATES).cloned().collect();
    }
}

pub fn load_into_state(state: &mut AppState) {
    let Some(path) = settings_path() else {
        return;
    };
    if let Some(settings) = load_settings_file(&path) {
        settings.apply_to(state);
    }
}

pub fn save_from_state(state: &AppState) -> Result<()> {
    let Some(path) = settings_path() else {
        return Ok(());
    };
    save_settings_file(&path, &Settings::from_state(state))
}

pub fn load_settings_file(path: &Path) -> Option<Settings> {
    let raw = fs::read_to_string(path).ok()?;
    let settings = serde_json::from_str::<Settings>(&raw).ok()?;
    if settings.version != SETTINGS_VERSION {
        return None;
    }
    Some(settings)
}

pub fn save_settings_file(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("create settings dir")?;
    }
    let mut settings = settings.clone();
    settings.version = SETTINGS_VERSION;
    let json = serde_json::to_string_pretty(&settings).context("serialize settings")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).context("write settings")?;
    fs::rename(&tmp, path).context("swap settings")?;
    Ok(())
}

fn settings_path() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CONFIG_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(SETTINGS_DIR).join(SETTINGS_FILE));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(SETTINGS_DIR)
            .join(SETTINGS_FILE),
    )
}
