//! Error types shared by the engine and the binary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkerError>;

#[derive(Error, Debug)]
pub enum LinkerError {
    #[error("Failed to read card catalog from {path}: {source}")]
    CatalogRead { path: PathBuf, source: io::Error },

    #[error("Card catalog not found at {0}")]
    CatalogNotFound(PathBuf),

    #[error("Failed to read settings from {path}: {source}")]
    SettingsRead { path: PathBuf, source: io::Error },

    #[error("Failed to write settings to {path}: {source}")]
    SettingsWrite { path: PathBuf, source: io::Error },

    #[error("Failed to parse settings: {0}")]
    SettingsParse(#[from] serde_json::Error),

    #[error("Config directory not found")]
    NoConfigDir,

    #[error("Event dispatcher is no longer running")]
    DispatcherClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
