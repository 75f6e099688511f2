//! Priority-ordered lookup tables built from a card catalog.
//!
//! # Mental model
//!
//! * A [`CatalogIndex`] is an immutable snapshot: cards plus six keyed tables.
//! * Building never touches a published snapshot; [`CatalogHandle`] swaps a
//!   finished one in with `ArcSwap`, so readers see either the old tables or
//!   the new ones and never a half-built mix.
//! * Record identity is the card's position in the snapshot. A card appears
//!   at most once under any key.
//!
//! # Invariants
//!
//! * `TableKind::CollectorInfo` maps every key to exactly one card.
//! * A row whose collector code is already taken contributes no keys at all.

use crate::catalog::CardRecord;
use crate::normalize::{abbreviate, normalize, split_alias};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Position of a card inside its snapshot
pub type CardIdx = usize;

// ============================================================================
// Tables
// ============================================================================

/// The lookup tables, in probe priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    CollectorInfo,
    FullTitle,
    Title,
    Subtitle,
    Nickname,
    Persona,
}

impl TableKind {
    /// Probe order used by the resolver
    pub const PRIORITY: [TableKind; 6] = [
        TableKind::CollectorInfo,
        TableKind::FullTitle,
        TableKind::Title,
        TableKind::Subtitle,
        TableKind::Nickname,
        TableKind::Persona,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::CollectorInfo => "collector-info",
            TableKind::FullTitle => "full-title",
            TableKind::Title => "title",
            TableKind::Subtitle => "subtitle",
            TableKind::Nickname => "nickname",
            TableKind::Persona => "persona",
        }
    }
}

/// How title, subtitle and suffix are joined into the full-title key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FullTitleFormat {
    /// `"{title}{suffix}"`
    #[default]
    Concatenated,
    /// `"{title}, {subtitle} {suffix}"`, absent parts omitted
    Subtitled,
}

impl FullTitleFormat {
    pub fn compose(&self, card: &CardRecord) -> String {
        match self {
            FullTitleFormat::Concatenated => format!("{}{}", card.title, card.title_suffix),
            FullTitleFormat::Subtitled => {
                let mut full = card.title.clone();
                if !card.subtitle.is_empty() {
                    full.push_str(", ");
                    full.push_str(&card.subtitle);
                }
                if !card.title_suffix.is_empty() {
                    full.push(' ');
                    full.push_str(&card.title_suffix);
                }
                full
            }
        }
    }
}

// ============================================================================
// Build Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingId,
    MissingCollectorInfo,
    DuplicateCollectorInfo { existing_id: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingId => write!(f, "missing card id"),
            SkipReason::MissingCollectorInfo => write!(f, "missing collector code"),
            SkipReason::DuplicateCollectorInfo { existing_id } => {
                write!(f, "collector code already registered by '{}'", existing_id)
            }
        }
    }
}

/// A catalog row that was not indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// Zero-based position among the data rows
    pub row: usize,
    pub id: String,
    pub collector_info: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub indexed: usize,
    pub skipped: Vec<SkippedRow>,
}

// ============================================================================
// Catalog Index
// ============================================================================

/// Immutable snapshot of every lookup table
#[derive(Debug, Default)]
pub struct CatalogIndex {
    cards: Vec<Arc<CardRecord>>,
    tables: [HashMap<String, Vec<CardIdx>>; 6],
    /// Reload generation this snapshot was published under; 0 at startup
    generation: u64,
}

impl CatalogIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from catalog rows, in catalog order.
    pub fn build(rows: Vec<CardRecord>, format: FullTitleFormat) -> (Self, BuildReport) {
        let mut index = Self::default();
        let mut report = BuildReport::default();

        for (row, card) in rows.into_iter().enumerate() {
            let collector_key = normalize(&card.collector_info);

            let reason = if card.id.trim().is_empty() {
                Some(SkipReason::MissingId)
            } else if collector_key.is_empty() {
                Some(SkipReason::MissingCollectorInfo)
            } else {
                index
                    .lookup(TableKind::CollectorInfo, &collector_key)
                    .first()
                    .map(|&existing| SkipReason::DuplicateCollectorInfo {
                        existing_id: index.cards[existing].id.clone(),
                    })
            };

            if let Some(reason) = reason {
                warn!(
                    "Skipping catalog row {} (id '{}', collector '{}'): {}",
                    row, card.id, card.collector_info, reason
                );
                report.skipped.push(SkippedRow {
                    row,
                    id: card.id,
                    collector_info: card.collector_info,
                    reason,
                });
                continue;
            }

            index.insert_card(card, collector_key, format);
            report.indexed += 1;
        }

        info!(
            "Built card index: {} cards, {} rows skipped",
            report.indexed,
            report.skipped.len()
        );
        (index, report)
    }

    fn insert_card(&mut self, card: CardRecord, collector_key: String, format: FullTitleFormat) {
        let idx = self.cards.len();

        self.insert(TableKind::CollectorInfo, collector_key, idx);
        self.insert(TableKind::Title, normalize(&card.title), idx);
        self.insert(TableKind::Subtitle, normalize(&card.subtitle), idx);
        self.insert(TableKind::FullTitle, normalize(&format.compose(&card)), idx);

        let abbreviation_source = if card.subtitle.is_empty() {
            &card.title
        } else {
            &card.subtitle
        };
        self.insert(TableKind::Nickname, abbreviate(abbreviation_source), idx);

        if let Some((name, alias)) = split_alias(&card.title) {
            self.insert(TableKind::Nickname, normalize(name), idx);
            self.insert(TableKind::Nickname, normalize(alias), idx);
        }

        let nicknames: Vec<String> = card.nickname_list().map(normalize).collect();
        for nickname in nicknames {
            self.insert(TableKind::Nickname, nickname, idx);
        }
        let personas: Vec<String> = card.persona_list().map(normalize).collect();
        for persona in personas {
            self.insert(TableKind::Persona, persona, idx);
        }

        self.cards.push(Arc::new(card));
    }

    fn insert(&mut self, table: TableKind, key: String, idx: CardIdx) {
        if key.is_empty() {
            return;
        }
        let entry = self.tables[table.slot()].entry(key).or_default();
        // all keys of one card are inserted before the next card
        if entry.last() != Some(&idx) {
            entry.push(idx);
        }
    }

    /// Cards stored under an already-normalized key
    pub fn lookup(&self, table: TableKind, key: &str) -> &[CardIdx] {
        self.tables[table.slot()]
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn table(&self, table: TableKind) -> &HashMap<String, Vec<CardIdx>> {
        &self.tables[table.slot()]
    }

    pub fn card(&self, idx: CardIdx) -> &Arc<CardRecord> {
        &self.cards[idx]
    }

    pub fn cards(&self) -> &[Arc<CardRecord>] {
        &self.cards
    }

    /// Exact collector-code lookup; the code is normalized first
    pub fn by_collector(&self, code: &str) -> Option<&Arc<CardRecord>> {
        self.lookup(TableKind::CollectorInfo, &normalize(code))
            .first()
            .map(|&idx| &self.cards[idx])
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ============================================================================
// Snapshot Publication
// ============================================================================

/// Holds the live snapshot and coordinates reloads
pub struct CatalogHandle {
    current: ArcSwap<CatalogIndex>,
    /// Generation of the most recently requested reload
    requested: AtomicU64,
    /// Generation of the snapshot currently published
    published: AtomicU64,
    in_flight: AtomicUsize,
}

impl CatalogHandle {
    pub fn new(index: CatalogIndex) -> Self {
        Self {
            current: ArcSwap::from_pointee(index),
            requested: AtomicU64::new(0),
            published: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Pin the current snapshot. The pinned tables stay valid across swaps.
    pub fn load(&self) -> Arc<CatalogIndex> {
        self.current.load_full()
    }

    /// Announce a reload. Any earlier reload still building is superseded.
    pub fn begin_reload(&self) -> ReloadTicket<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let generation = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        ReloadTicket {
            handle: self,
            generation,
        }
    }

    pub fn is_reloading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn generation(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

/// Proof that a reload was announced. Dropping it without publishing
/// abandons the reload.
pub struct ReloadTicket<'a> {
    handle: &'a CatalogHandle,
    generation: u64,
}

impl ReloadTicket<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_superseded(&self) -> bool {
        self.handle.requested.load(Ordering::SeqCst) != self.generation
    }

    /// Swap the finished snapshot in, unless a newer reload was requested in
    /// the meantime. Returns whether the snapshot went live.
    pub fn publish(self, mut index: CatalogIndex) -> bool {
        if self.is_superseded() {
            info!(
                "Discarding card index generation {}: superseded by a newer reload",
                self.generation
            );
            return false;
        }
        index.generation = self.generation;
        self.handle.current.store(Arc::new(index));
        self.handle.published.store(self.generation, Ordering::SeqCst);
        true
    }
}

impl Drop for ReloadTicket<'_> {
    fn drop(&mut self) {
        self.handle.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
