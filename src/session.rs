//! Interactive disambiguation sessions.
//!
//! # Lifecycle
//!
//! `open` → awaiting a choice → one of:
//! * resolved: an authorized actor picked a valid label;
//! * superseded: a new trigger arrived on the same message;
//! * expired: no valid pick within the TTL.
//!
//! Terminal sessions are removed from the table. Choices aimed at a session
//! that is missing, expired or owned by someone else are ignored without any
//! user-visible feedback.

use crate::catalog::CardRecord;
use crate::normalize::normalize;
use crate::trigger::RequestKind;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Reaction glyphs offered on a menu. Platforms cap reactions at 20.
pub const GLYPHS: [&str; 20] = [
    ":one:",
    ":two:",
    ":three:",
    ":four:",
    ":five:",
    ":six:",
    ":seven:",
    ":eight:",
    ":nine:",
    ":regional_indicator_a:",
    ":regional_indicator_b:",
    ":regional_indicator_c:",
    ":regional_indicator_d:",
    ":regional_indicator_e:",
    ":regional_indicator_f:",
    ":regional_indicator_g:",
    ":regional_indicator_h:",
    ":regional_indicator_i:",
    ":regional_indicator_j:",
    ":regional_indicator_k:",
];

/// Option limit of a structured select menu
pub const MENU_OPTIONS: usize = 25;

/// Upper bound for configured session lifetimes (one year)
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

// ============================================================================
// Identities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who may complete a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requester {
    User(UserId),
    /// Requests relayed by bots can be completed by anyone
    Anyone,
}

/// The identity acting on a menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user: UserId,
    /// Owner or moderator of the surrounding channel
    pub is_admin: bool,
}

// ============================================================================
// Choice Surfaces
// ============================================================================

/// How candidates are offered and how a pick comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChoiceSurface {
    /// Emoji reactions on the menu message
    #[default]
    Glyph,
    /// Structured select menu whose option values are collector codes
    Menu,
}

/// A submitted pick, as decoded by the platform adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceInput {
    /// Reaction name, e.g. `:two:`
    Glyph(String),
    /// Selected option value (a collector code)
    MenuValue(String),
}

impl ChoiceSurface {
    /// Most candidates this surface can label
    pub fn capacity(&self) -> usize {
        match self {
            ChoiceSurface::Glyph => GLYPHS.len(),
            ChoiceSurface::Menu => MENU_OPTIONS,
        }
    }

    /// One label per card, index-aligned. Callers truncate to `capacity`.
    pub fn labels(&self, cards: &[Arc<CardRecord>]) -> Vec<String> {
        match self {
            ChoiceSurface::Glyph => GLYPHS
                .iter()
                .take(cards.len())
                .map(|glyph| glyph.to_string())
                .collect(),
            ChoiceSurface::Menu => cards.iter().map(|card| card.collector_info.clone()).collect(),
        }
    }

    /// Candidate position picked by `input`, if it names one of `labels`
    fn decode(&self, input: &ChoiceInput, labels: &[String]) -> Option<usize> {
        match (self, input) {
            (ChoiceSurface::Glyph, ChoiceInput::Glyph(name)) => {
                let name = name.trim();
                labels.iter().position(|label| label == name)
            }
            (ChoiceSurface::Menu, ChoiceInput::MenuValue(value)) => {
                let value = normalize(value);
                labels.iter().position(|label| normalize(label) == value)
            }
            _ => None,
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingChoice,
    Resolved,
    Superseded,
    Expired,
}

/// Everything needed to open a session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub requester: Requester,
    pub trigger_message: MessageId,
    /// Author of the message the trigger replied to
    pub replied_to: Option<UserId>,
    pub original_query: String,
    pub kind: RequestKind,
    pub candidates: Vec<Arc<CardRecord>>,
    /// Generation of the catalog snapshot the candidates came from
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct DisambiguationSession {
    pub id: SessionId,
    pub requester: Requester,
    pub trigger_message: MessageId,
    pub replied_to: Option<UserId>,
    pub original_query: String,
    pub kind: RequestKind,
    pub surface: ChoiceSurface,
    pub candidates: Vec<Arc<CardRecord>>,
    pub labels: Vec<String>,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

impl DisambiguationSession {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }
}

/// The one authorization rule for completing a session.
pub fn is_authorized(session: &DisambiguationSession, actor: &Actor) -> bool {
    if actor.is_admin {
        return true;
    }
    let is_requester = match session.requester {
        Requester::Anyone => true,
        Requester::User(user) => user == actor.user,
    };
    is_requester || session.replied_to == Some(actor.user)
}

/// Why a choice did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    UnknownSession,
    Expired,
    Unauthorized,
    UnknownLabel,
}

#[derive(Debug, Clone)]
pub enum ChoiceOutcome {
    Resolved {
        session: DisambiguationSession,
        card: Arc<CardRecord>,
    },
    Ignored(Ignored),
}

#[derive(Default)]
struct SessionTable {
    live: HashMap<SessionId, DisambiguationSession>,
    by_trigger: HashMap<MessageId, Vec<SessionId>>,
}

impl SessionTable {
    fn insert(&mut self, session: DisambiguationSession) {
        self.by_trigger
            .entry(session.trigger_message)
            .or_default()
            .push(session.id);
        self.live.insert(session.id, session);
    }

    fn retire(&mut self, trigger: MessageId) -> usize {
        let ids = self.by_trigger.remove(&trigger).unwrap_or_default();
        for id in &ids {
            self.live.remove(id);
            debug!("Session {} superseded", id);
        }
        ids.len()
    }

    fn remove(&mut self, id: SessionId) -> Option<DisambiguationSession> {
        let session = self.live.remove(&id)?;
        if let Some(ids) = self.by_trigger.get_mut(&session.trigger_message) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_trigger.remove(&session.trigger_message);
            }
        }
        Some(session)
    }
}

/// Live sessions, keyed by id and by trigger message
pub struct SessionManager {
    surface: ChoiceSurface,
    ttl: Duration,
    next_id: AtomicU64,
    table: Mutex<SessionTable>,
}

impl SessionManager {
    pub fn new(surface: ChoiceSurface, ttl_secs: u64) -> Self {
        Self {
            surface,
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            next_id: AtomicU64::new(1),
            table: Mutex::new(SessionTable::default()),
        }
    }

    pub fn surface(&self) -> ChoiceSurface {
        self.surface
    }

    pub fn open(&self, request: SessionRequest) -> DisambiguationSession {
        self.open_at(Utc::now(), request)
    }

    /// Start a session. Candidates beyond the surface capacity are dropped.
    pub fn open_at(&self, now: DateTime<Utc>, request: SessionRequest) -> DisambiguationSession {
        let session = self.build(now, request);
        self.table.lock().insert(session.clone());
        session
    }

    /// Retire every outstanding session on `trigger` and open one session
    /// per request, as a single step. All requests are filed under `trigger`.
    pub fn replace(&self, trigger: MessageId, requests: Vec<SessionRequest>) -> Vec<DisambiguationSession> {
        self.replace_at(Utc::now(), trigger, requests)
    }

    pub fn replace_at(
        &self,
        now: DateTime<Utc>,
        trigger: MessageId,
        requests: Vec<SessionRequest>,
    ) -> Vec<DisambiguationSession> {
        let mut table = self.table.lock();
        let superseded = table.retire(trigger);
        if superseded > 0 {
            debug!("Message {:?} re-triggered, {} menus superseded", trigger, superseded);
        }

        requests
            .into_iter()
            .map(|mut request| {
                request.trigger_message = trigger;
                let session = self.build(now, request);
                table.insert(session.clone());
                session
            })
            .collect()
    }

    fn build(&self, now: DateTime<Utc>, request: SessionRequest) -> DisambiguationSession {
        let mut candidates = request.candidates;
        candidates.truncate(self.surface.capacity());
        let labels = self.surface.labels(&candidates);

        let session = DisambiguationSession {
            id: SessionId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            requester: request.requester,
            trigger_message: request.trigger_message,
            replied_to: request.replied_to,
            original_query: request.original_query,
            kind: request.kind,
            surface: self.surface,
            candidates,
            labels,
            generation: request.generation,
            created_at: now,
        };
        debug!(
            "Opened session {} for '{}' with {} candidates",
            session.id,
            session.original_query,
            session.candidates.len()
        );
        session
    }

    /// Retire every outstanding session on `trigger`. Returns how many.
    pub fn supersede(&self, trigger: MessageId) -> usize {
        self.table.lock().retire(trigger)
    }

    pub fn choose(&self, id: SessionId, actor: &Actor, input: &ChoiceInput) -> ChoiceOutcome {
        self.choose_at(Utc::now(), id, actor, input)
    }

    /// Apply a pick. Only an authorized, valid pick removes the session.
    pub fn choose_at(
        &self,
        now: DateTime<Utc>,
        id: SessionId,
        actor: &Actor,
        input: &ChoiceInput,
    ) -> ChoiceOutcome {
        let mut table = self.table.lock();
        let Some(session) = table.live.get(&id) else {
            return ChoiceOutcome::Ignored(Ignored::UnknownSession);
        };

        if session.is_expired(now, self.ttl) {
            table.remove(id);
            return ChoiceOutcome::Ignored(Ignored::Expired);
        }
        if !is_authorized(session, actor) {
            return ChoiceOutcome::Ignored(Ignored::Unauthorized);
        }
        let Some(position) = session.surface.decode(input, &session.labels) else {
            return ChoiceOutcome::Ignored(Ignored::UnknownLabel);
        };

        let card = session.candidates[position].clone();
        match table.remove(id) {
            Some(session) => ChoiceOutcome::Resolved { session, card },
            None => ChoiceOutcome::Ignored(Ignored::UnknownSession),
        }
    }

    /// Current state of a live session; `None` once it reached a terminal state
    pub fn state_at(&self, now: DateTime<Utc>, id: SessionId) -> Option<SessionState> {
        let table = self.table.lock();
        let session = table.live.get(&id)?;
        if session.is_expired(now, self.ttl) {
            Some(SessionState::Expired)
        } else {
            Some(SessionState::AwaitingChoice)
        }
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.state_at(Utc::now(), id)
    }

    pub fn get(&self, id: SessionId) -> Option<DisambiguationSession> {
        self.table.lock().live.get(&id).cloned()
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut table = self.table.lock();
        let expired: Vec<SessionId> = table
            .live
            .values()
            .filter(|session| session.is_expired(now, self.ttl))
            .map(|session| session.id)
            .collect();
        for id in &expired {
            table.remove(*id);
        }
        if !expired.is_empty() {
            debug!("Purged {} expired sessions", expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.table.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::card;

    const REQUESTER: UserId = UserId(1);
    const REPLIED_TO: UserId = UserId(2);
    const STRANGER: UserId = UserId(3);

    fn request(trigger: u64, count: usize) -> SessionRequest {
        SessionRequest {
            requester: Requester::User(REQUESTER),
            trigger_message: MessageId(trigger),
            replied_to: Some(REPLIED_TO),
            original_query: "Han Solo".to_string(),
            kind: RequestKind::Image,
            candidates: (0..count)
                .map(|n| Arc::new(card(&format!("HS{n}"), &format!("HS{n:03}"), "Han Solo", "", "(V)")))
                .collect(),
            generation: 0,
        }
    }

    fn user(id: UserId) -> Actor {
        Actor {
            user: id,
            is_admin: false,
        }
    }

    #[test]
    fn test_glyph_labels_are_index_aligned_and_capped() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 600);
        let session = manager.open(request(10, 30));
        assert_eq!(session.candidates.len(), 20);
        assert_eq!(session.labels.len(), 20);
        assert_eq!(session.labels[0], ":one:");
        assert_eq!(session.labels[19], ":regional_indicator_k:");
    }

    #[test]
    fn test_menu_labels_are_distinct_collector_codes() {
        let manager = SessionManager::new(ChoiceSurface::Menu, 600);
        let session = manager.open(request(10, 30));
        assert_eq!(session.labels.len(), 25);
        let distinct: std::collections::HashSet<&String> = session.labels.iter().collect();
        assert_eq!(distinct.len(), 25);
        assert_eq!(session.labels[1], "HS001");
    }

    #[test]
    fn test_authorized_pick_resolves_and_removes_session() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 600);
        let session = manager.open(request(10, 2));

        let outcome = manager.choose(session.id, &user(REQUESTER), &ChoiceInput::Glyph(":two:".to_string()));
        match outcome {
            ChoiceOutcome::Resolved { card, .. } => assert_eq!(card.id, "HS1"),
            other => panic!("expected resolution, got {:?}", other),
        }
        assert!(manager.state(session.id).is_none());
        assert!(matches!(
            manager.choose(session.id, &user(REQUESTER), &ChoiceInput::Glyph(":one:".to_string())),
            ChoiceOutcome::Ignored(Ignored::UnknownSession)
        ));
    }

    #[test]
    fn test_authorization_rule() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 600);
        let session = manager.open(request(10, 2));

        assert!(is_authorized(&session, &user(REQUESTER)));
        assert!(is_authorized(&session, &user(REPLIED_TO)));
        assert!(is_authorized(&session, &Actor { user: STRANGER, is_admin: true }));
        assert!(!is_authorized(&session, &user(STRANGER)));

        let open_to_all = DisambiguationSession {
            requester: Requester::Anyone,
            ..session
        };
        assert!(is_authorized(&open_to_all, &user(STRANGER)));
    }

    #[test]
    fn test_stranger_pick_leaves_session_waiting() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 600);
        let session = manager.open(request(10, 2));

        let outcome = manager.choose(session.id, &user(STRANGER), &ChoiceInput::Glyph(":one:".to_string()));
        assert!(matches!(outcome, ChoiceOutcome::Ignored(Ignored::Unauthorized)));
        assert_eq!(manager.state(session.id), Some(SessionState::AwaitingChoice));
    }

    #[test]
    fn test_unknown_or_mismatched_labels_are_ignored() {
        let manager = SessionManager::new(ChoiceSurface::Menu, 600);
        let session = manager.open(request(10, 2));

        let wrong_kind = manager.choose(session.id, &user(REQUESTER), &ChoiceInput::Glyph(":one:".to_string()));
        assert!(matches!(wrong_kind, ChoiceOutcome::Ignored(Ignored::UnknownLabel)));

        let picked = manager.choose(session.id, &user(REQUESTER), &ChoiceInput::MenuValue("hs001".to_string()));
        assert!(matches!(picked, ChoiceOutcome::Resolved { ref card, .. } if card.id == "HS1"));
    }

    #[test]
    fn test_new_trigger_supersedes_outstanding_sessions() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 600);
        let first = manager.open(request(10, 2));
        let second = manager.open(request(10, 3));
        let other = manager.open(request(11, 2));

        assert_eq!(manager.supersede(MessageId(10)), 2);
        assert!(manager.get(first.id).is_none());
        assert!(manager.get(second.id).is_none());
        assert!(manager.get(other.id).is_some());
        assert_eq!(manager.supersede(MessageId(10)), 0);
    }

    #[test]
    fn test_replace_retires_and_opens_in_one_step() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 600);
        let first = manager.replace(MessageId(7), vec![request(7, 2), request(7, 3)]);
        assert_eq!(first.len(), 2);
        let other = manager.open(request(8, 2));

        let second = manager.replace(MessageId(7), vec![request(7, 2)]);
        assert!(first.iter().all(|session| manager.get(session.id).is_none()));
        assert!(manager.get(second[0].id).is_some());
        assert!(manager.get(other.id).is_some());

        assert!(manager.replace(MessageId(7), Vec::new()).is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_concurrent_retriggers_leave_one_menu() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 600);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        manager.replace(MessageId(7), vec![request(7, 2)]);
                    }
                });
            }
        });
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.supersede(MessageId(7)), 1);
    }

    #[test]
    fn test_expired_sessions_ignore_picks_and_purge() {
        let manager = SessionManager::new(ChoiceSurface::Glyph, 60);
        let start = Utc::now();
        let stale = manager.open_at(start, request(10, 2));
        let fresh = manager.open_at(start + Duration::seconds(50), request(11, 2));
        let later = start + Duration::seconds(90);

        assert_eq!(manager.state_at(later, stale.id), Some(SessionState::Expired));
        let outcome = manager.choose_at(later, stale.id, &user(REQUESTER), &ChoiceInput::Glyph(":one:".to_string()));
        assert!(matches!(outcome, ChoiceOutcome::Ignored(Ignored::Expired)));
        assert!(manager.get(stale.id).is_none());

        assert_eq!(manager.purge_expired_at(start + Duration::seconds(200)), 1);
        assert!(manager.get(fresh.id).is_none());
        assert!(manager.is_empty());
    }
}
