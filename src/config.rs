//! Process settings.
//!
//! Loaded from a JSON file; a missing file is created with defaults so that
//! a first run leaves an editable template behind. A few values can be
//! overridden from the environment.

use crate::error::{LinkerError, Result};
use crate::index::FullTitleFormat;
use crate::render::LinkBase;
use crate::resolver::{CollapsePolicy, ProbeMode, ResolverOptions, SubstringFallback};
use crate::session::ChoiceSurface;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings file name under the config directory
const SETTINGS_FILE: &str = "settings.json";

/// Directory name under the platform config dir
const APP_DIR: &str = "cardlink";

pub const ENV_CATALOG: &str = "CARDLINK_CATALOG";
pub const ENV_BASE_IMAGE_URL: &str = "CARDLINK_BASE_IMAGE_URL";
pub const ENV_BASE_WIKI_URL: &str = "CARDLINK_BASE_WIKI_URL";
pub const ENV_MAX_REQUESTS_PER_MESSAGE: &str = "CARDLINK_MAX_REQUESTS_PER_MESSAGE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Path of the TSV catalog
    pub card_file_path: PathBuf,

    /// Prefix for relative image references
    pub base_image_url: String,

    /// Prefix for relative reference-page links
    pub base_wiki_url: String,

    /// Requests served from one message; the rest are ignored
    pub max_requests_per_message: usize,

    /// Largest menu offered, further capped by the choice surface
    pub max_candidates: usize,

    pub choice_surface: ChoiceSurface,

    pub probe_mode: ProbeMode,

    pub substring_fallback: SubstringFallback,

    pub collapse_policy: CollapsePolicy,

    pub full_title_format: FullTitleFormat,

    /// Remembered user picks
    pub recent_capacity: usize,

    /// Seconds an unanswered menu stays live
    pub session_ttl_secs: u64,

    /// How long message events wait for a running reload
    pub reload_defer_ms: u64,

    /// Treat `<x>` as a plain-text request
    pub angle_brackets: bool,

    /// Serve messages written by other bots; anyone may answer their menus
    pub relay_bots: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            card_file_path: PathBuf::from("cards.tsv"),
            base_image_url: String::new(),
            base_wiki_url: String::new(),
            max_requests_per_message: 5,
            max_candidates: 25,
            choice_surface: ChoiceSurface::default(),
            probe_mode: ProbeMode::default(),
            substring_fallback: SubstringFallback::default(),
            collapse_policy: CollapsePolicy::default(),
            full_title_format: FullTitleFormat::default(),
            recent_capacity: crate::cache::DEFAULT_CAPACITY,
            session_ttl_secs: 600,
            reload_defer_ms: 3000,
            angle_brackets: false,
            relay_bots: false,
        }
    }
}

impl Settings {
    /// Default settings location: `<config dir>/cardlink/settings.json`
    pub fn default_path() -> Result<PathBuf> {
        let config = dirs::config_dir().ok_or(LinkerError::NoConfigDir)?;
        Ok(config.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Load settings, writing a default file first if none exists.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Settings file {:?} does not exist, creating it", path);
            Settings::default().store(path)?;
        }
        let content = fs::read_to_string(path).map_err(|e| LinkerError::SettingsRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings = serde_json::from_str(&content)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let write_err = |e: std::io::Error| LinkerError::SettingsWrite {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(write_err)
    }

    /// Apply `CARDLINK_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(ENV_CATALOG).filter(|v| !v.is_empty()) {
            self.card_file_path = PathBuf::from(path);
        }
        if let Some(url) = lookup(ENV_BASE_IMAGE_URL) {
            self.base_image_url = url;
        }
        if let Some(url) = lookup(ENV_BASE_WIKI_URL) {
            self.base_wiki_url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_REQUESTS_PER_MESSAGE) {
            match raw.trim().parse::<usize>() {
                Ok(cap) if cap > 0 => self.max_requests_per_message = cap,
                _ => warn!(
                    "Ignoring {}={:?}, expected a positive number",
                    ENV_MAX_REQUESTS_PER_MESSAGE, raw
                ),
            }
        }
        self
    }

    /// Menu size after the choice surface's own limit
    pub fn menu_cap(&self) -> usize {
        self.max_candidates.min(self.choice_surface.capacity()).max(1)
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            probe_mode: self.probe_mode,
            substring_fallback: self.substring_fallback,
            collapse_policy: self.collapse_policy,
            max_candidates: self.menu_cap(),
            recent_capacity: self.recent_capacity,
        }
    }

    pub fn link_base(&self) -> LinkBase {
        LinkBase {
            image: self.base_image_url.clone(),
            wiki: self.base_wiki_url.clone(),
        }
    }

    pub fn reload_defer(&self) -> Duration {
        Duration::from_millis(self.reload_defer_ms)
    }
}
