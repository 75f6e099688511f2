//! Card catalog rows and where they come from.
//!
//! # Format
//! Tab-separated, one card per line, header line first. Columns:
//! `id, image, wiki, collector, display name, title, subtitle, suffix,
//! nicknames, personas`. Trailing columns may be absent.

use crate::error::{LinkerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// Card Record
// ============================================================================

/// One printed card as described by a catalog row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,

    pub image_url: String,

    /// Reference page for the card
    pub wiki_url: String,

    /// Catalog-unique collector code (e.g. `SER004`)
    pub collector_info: String,

    pub display_name: String,

    pub title: String,

    #[serde(default)]
    pub subtitle: String,

    /// Distinguishes reprints and variants that share a title
    #[serde(default)]
    pub title_suffix: String,

    /// Raw comma-separated aliases
    #[serde(default)]
    pub nicknames: String,

    /// Raw comma-separated alternate identities
    #[serde(default)]
    pub personas: String,
}

impl CardRecord {
    /// Parse a single TSV line. Fields are trimmed, missing columns are empty.
    pub fn from_tsv_line(line: &str) -> Self {
        let mut fields = line.split('\t').map(str::trim);
        let mut next = || fields.next().unwrap_or_default().to_string();

        let id = next();
        let image_url = next();
        let wiki_url = next();
        let collector_info = next();
        let display_name = next();
        let title = next();
        let subtitle = next();
        let title_suffix = next();
        let nicknames = next();
        let personas = next();

        let display_name = if display_name.is_empty() {
            compose_display_name(&title, &subtitle)
        } else {
            display_name
        };

        Self {
            id,
            image_url,
            wiki_url,
            collector_info,
            display_name,
            title,
            subtitle,
            title_suffix,
            nicknames,
            personas,
        }
    }

    /// Comma-separated nickname entries, blanks removed
    pub fn nickname_list(&self) -> impl Iterator<Item = &str> {
        split_list(&self.nicknames)
    }

    pub fn persona_list(&self) -> impl Iterator<Item = &str> {
        split_list(&self.personas)
    }

    pub fn has_suffix(&self) -> bool {
        !self.title_suffix.trim().is_empty()
    }
}

fn compose_display_name(title: &str, subtitle: &str) -> String {
    if subtitle.is_empty() {
        title.to_string()
    } else {
        format!("{}, {}", title, subtitle)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

/// Parse a whole catalog. The first line is a header and is skipped, as are
/// blank lines. Validity is checked later by the index builder.
pub fn parse_catalog(text: &str) -> Vec<CardRecord> {
    let rows: Vec<CardRecord> = text
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(CardRecord::from_tsv_line)
        .collect();
    debug!("Parsed {} catalog rows", rows.len());
    rows
}

// ============================================================================
// Catalog Sources
// ============================================================================

/// Where catalog text comes from. Implementations own all I/O.
pub trait CatalogSource: Send + Sync {
    /// Human-readable origin, used in logs
    fn describe(&self) -> String;

    fn fetch(&self) -> Result<String>;
}

/// Catalog stored in a local TSV file
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<String> {
        if !self.path.exists() {
            return Err(LinkerError::CatalogNotFound(self.path.clone()));
        }
        fs::read_to_string(&self.path).map_err(|e| LinkerError::CatalogRead {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// Catalog text held in memory; handy for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    text: String,
}

impl StaticSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl CatalogSource for StaticSource {
    fn describe(&self) -> String {
        "<in-memory catalog>".to_string()
    }

    fn fetch(&self) -> Result<String> {
        Ok(self.text.clone())
    }
}
