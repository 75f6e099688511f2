//! Query resolution against a catalog snapshot.
//!
//! A query is normalized once, checked against the recent-selection cache,
//! then probed table by table in [`TableKind::PRIORITY`] order. Multiple
//! hits go through the configured [`CollapsePolicy`] before they are
//! reported as ambiguous.

use crate::cache::RecentSelectionCache;
use crate::catalog::CardRecord;
use crate::index::{CardIdx, CatalogIndex, TableKind};
use crate::normalize::normalize;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Queries this short never trigger a substring scan
const MIN_SUBSTRING_QUERY: usize = 3;

// ============================================================================
// Policies
// ============================================================================

/// How the priority tables are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMode {
    /// The first table with any hit wins outright
    #[default]
    FirstHit,
    /// Hits from every table are merged
    Union,
}

/// When substring containment is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubstringFallback {
    Never,
    /// Only when no table has an exact hit
    #[default]
    WhenNoExactHit,
    /// Merge substring hits into exact hits
    Always,
}

/// Rules that merge candidates a user could not tell apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollapsePolicy {
    /// Shared title first: the single unsuffixed printing wins, otherwise the
    /// group collapses when every display name matches
    #[default]
    TitleThenDisplayName,
    /// Collapse whenever every display name matches
    DisplayNameOnly,
}

impl CollapsePolicy {
    /// The card standing in for all of `cards`, if they are interchangeable
    pub fn collapse<'a>(&self, cards: &'a [Arc<CardRecord>]) -> Option<&'a Arc<CardRecord>> {
        let first = cards.first()?;
        match self {
            CollapsePolicy::TitleThenDisplayName => {
                if !cards.iter().all(|c| c.title == first.title) {
                    return None;
                }
                let unsuffixed: Vec<&Arc<CardRecord>> =
                    cards.iter().filter(|c| !c.has_suffix()).collect();
                if let [only] = unsuffixed.as_slice() {
                    return Some(*only);
                }
                let pool = if unsuffixed.is_empty() {
                    cards.iter().collect()
                } else {
                    unsuffixed
                };
                same_display_name(&pool).then(|| pool[0])
            }
            CollapsePolicy::DisplayNameOnly => {
                let pool: Vec<&Arc<CardRecord>> = cards.iter().collect();
                same_display_name(&pool).then_some(first)
            }
        }
    }
}

fn same_display_name(cards: &[&Arc<CardRecord>]) -> bool {
    match cards.first() {
        Some(first) => cards.iter().all(|c| c.display_name == first.display_name),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    pub probe_mode: ProbeMode,
    pub substring_fallback: SubstringFallback,
    pub collapse_policy: CollapsePolicy,
    /// Largest candidate list handed to a menu
    pub max_candidates: usize,
    pub recent_capacity: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            probe_mode: ProbeMode::default(),
            substring_fallback: SubstringFallback::default(),
            collapse_policy: CollapsePolicy::default(),
            max_candidates: 25,
            recent_capacity: crate::cache::DEFAULT_CAPACITY,
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Candidates offered for a choice, in presentation order
#[derive(Debug, Clone)]
pub struct Candidates {
    pub cards: Vec<Arc<CardRecord>>,
    /// Number of candidates before truncation
    pub total: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    NotFound,
    Single(Arc<CardRecord>),
    Ambiguous(Candidates),
}

impl Resolution {
    pub fn as_single(&self) -> Option<&Arc<CardRecord>> {
        match self {
            Resolution::Single(card) => Some(card),
            _ => None,
        }
    }
}

pub struct Resolver {
    options: ResolverOptions,
    recent: Mutex<RecentSelectionCache>,
}

impl Resolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            recent: Mutex::new(RecentSelectionCache::new(options.recent_capacity)),
            options,
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn resolve(&self, index: &CatalogIndex, raw_query: &str) -> Resolution {
        let key = normalize(raw_query);
        if key.is_empty() {
            return Resolution::NotFound;
        }

        if let Some(card) = self.recent.lock().get(&key) {
            debug!("Query '{}' answered from recent selections", key);
            return Resolution::Single(card);
        }

        let hits: Vec<Arc<CardRecord>> = self
            .candidates(index, &key)
            .into_iter()
            .map(|idx| index.card(idx).clone())
            .collect();

        match hits.len() {
            0 => Resolution::NotFound,
            1 => Resolution::Single(hits[0].clone()),
            total => {
                if let Some(card) = self.options.collapse_policy.collapse(&hits) {
                    debug!("Collapsed {} candidates for '{}' to {}", total, key, card.collector_info);
                    return Resolution::Single(card.clone());
                }
                let mut cards = hits;
                cards.truncate(self.options.max_candidates);
                Resolution::Ambiguous(Candidates {
                    truncated: cards.len() < total,
                    total,
                    cards,
                })
            }
        }
    }

    /// Record a user's pick so the same query resolves directly next time
    pub fn remember(&self, raw_query: &str, card: Arc<CardRecord>) {
        self.recent.lock().insert(normalize(raw_query), card);
    }

    pub fn recall(&self, raw_query: &str) -> Option<Arc<CardRecord>> {
        self.recent.lock().get(&normalize(raw_query))
    }

    /// Drop every remembered pick; used when the catalog is replaced
    pub fn forget_all(&self) {
        self.recent.lock().clear();
    }

    /// Candidate positions for an already-normalized key, before collapsing
    pub fn candidates(&self, index: &CatalogIndex, key: &str) -> Vec<CardIdx> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        match self.options.probe_mode {
            ProbeMode::FirstHit => {
                if let Some(table) = TableKind::PRIORITY
                    .into_iter()
                    .find(|&table| !index.lookup(table, key).is_empty())
                {
                    debug!("Query '{}' hit the {} table", key, table.as_str());
                    extend_unique(&mut found, &mut seen, index.lookup(table, key).iter().copied());
                }
            }
            ProbeMode::Union => {
                let merged: BTreeSet<CardIdx> = TableKind::PRIORITY
                    .into_iter()
                    .flat_map(|table| index.lookup(table, key).iter().copied())
                    .collect();
                extend_unique(&mut found, &mut seen, merged);
            }
        }

        let scan = match self.options.substring_fallback {
            SubstringFallback::Never => false,
            SubstringFallback::WhenNoExactHit => found.is_empty(),
            SubstringFallback::Always => true,
        };
        if scan && key.chars().count() >= MIN_SUBSTRING_QUERY {
            let partial = substring_hits(index, key);
            debug!("Substring scan for '{}' matched {} cards", key, partial.len());
            extend_unique(&mut found, &mut seen, partial);
        }

        found
    }
}

fn extend_unique(
    found: &mut Vec<CardIdx>,
    seen: &mut HashSet<CardIdx>,
    items: impl IntoIterator<Item = CardIdx>,
) {
    for idx in items {
        if seen.insert(idx) {
            found.push(idx);
        }
    }
}

/// Every card stored under a key that contains `key`, in catalog order
fn substring_hits(index: &CatalogIndex, key: &str) -> BTreeSet<CardIdx> {
    TableKind::PRIORITY
        .par_iter()
        .flat_map(|&table| {
            index
                .table(table)
                .par_iter()
                .filter(|(candidate, _)| candidate.contains(key))
                .flat_map_iter(|(_, cards)| cards.iter().copied())
        })
        .collect()
}
