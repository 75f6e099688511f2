//! The card linker core: typed events in, reply descriptions out.
//!
//! The engine never talks to a chat platform. An adapter turns platform
//! callbacks into [`InboundEvent`]s and sends the returned [`Response`]s.

use crate::catalog::{parse_catalog, CardRecord, CatalogSource};
use crate::config::Settings;
use crate::error::Result;
use crate::index::{BuildReport, CatalogHandle, CatalogIndex};
use crate::render::{self, LinkBase};
use crate::resolver::{Resolution, Resolver};
use crate::session::{
    Actor, ChoiceInput, ChoiceOutcome, MessageId, Requester, SessionId, SessionManager,
    SessionRequest, UserId,
};
use crate::trigger::{extract_requests, RequestKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// Events
// ============================================================================

/// A chat message that may contain card requests
#[derive(Debug, Clone)]
pub struct MessageTriggered {
    pub message: MessageId,
    pub author: UserId,
    pub author_is_bot: bool,
    /// Author of the message this one replies to
    pub replied_to: Option<UserId>,
    pub content: String,
}

/// A pick made on a disambiguation menu
#[derive(Debug, Clone)]
pub struct ChoiceSubmitted {
    pub session: SessionId,
    pub actor: Actor,
    pub input: ChoiceInput,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    MessageTriggered(MessageTriggered),
    ChoiceSubmitted(ChoiceSubmitted),
    ReloadRequested,
}

// ============================================================================
// Responses
// ============================================================================

/// Content to send; delivery belongs to the adapter
#[derive(Debug, Clone)]
pub enum Response {
    /// Reply to `reply_to` with a single card
    Card {
        reply_to: MessageId,
        kind: RequestKind,
        card: Arc<CardRecord>,
        text: String,
    },
    NotFound {
        reply_to: MessageId,
        query: String,
        text: String,
    },
    /// Reply with a menu and register `labels` on it
    Menu {
        reply_to: MessageId,
        session: SessionId,
        labels: Vec<String>,
        text: String,
    },
    /// Replace the menu of `session` with the chosen card
    Resolved {
        session: SessionId,
        card: Arc<CardRecord>,
        text: String,
    },
    Reloaded {
        elapsed: Duration,
        report: BuildReport,
        text: String,
    },
    ReloadFailed {
        text: String,
    },
}

impl Response {
    pub fn text(&self) -> &str {
        match self {
            Response::Card { text, .. }
            | Response::NotFound { text, .. }
            | Response::Menu { text, .. }
            | Response::Resolved { text, .. }
            | Response::Reloaded { text, .. }
            | Response::ReloadFailed { text } => text,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    settings: Settings,
    source: Box<dyn CatalogSource>,
    catalog: CatalogHandle,
    resolver: Resolver,
    sessions: SessionManager,
    links: LinkBase,
}

impl Engine {
    /// Load the catalog and build the first index. An unreadable catalog is
    /// fatal at startup.
    pub fn start(settings: Settings, source: Box<dyn CatalogSource>) -> Result<(Self, BuildReport)> {
        info!("Loading card catalog from {}", source.describe());
        let text = source.fetch()?;
        let (index, report) = CatalogIndex::build(parse_catalog(&text), settings.full_title_format);

        let engine = Self {
            catalog: CatalogHandle::new(index),
            resolver: Resolver::new(settings.resolver_options()),
            sessions: SessionManager::new(settings.choice_surface, settings.session_ttl_secs),
            links: settings.link_base(),
            source,
            settings,
        };
        Ok((engine, report))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> Arc<CatalogIndex> {
        self.catalog.load()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn is_reloading(&self) -> bool {
        self.catalog.is_reloading()
    }

    /// Resolve one query against the live snapshot
    pub fn resolve(&self, query: &str) -> Resolution {
        self.resolver.resolve(&self.catalog.load(), query)
    }

    pub fn recall(&self, query: &str) -> Option<Arc<CardRecord>> {
        self.resolver.recall(query)
    }

    pub fn handle(&self, event: &InboundEvent) -> Vec<Response> {
        match event {
            InboundEvent::MessageTriggered(message) => self.handle_message(message),
            InboundEvent::ChoiceSubmitted(choice) => self.handle_choice(choice).into_iter().collect(),
            InboundEvent::ReloadRequested => vec![self.reload()],
        }
    }

    /// Answer every card request in a message, in order of appearance.
    pub fn handle_message(&self, message: &MessageTriggered) -> Vec<Response> {
        if message.author_is_bot && !self.settings.relay_bots {
            return Vec::new();
        }

        let mut requests = extract_requests(&message.content, self.settings.angle_brackets);
        if requests.is_empty() {
            return Vec::new();
        }
        if requests.len() > self.settings.max_requests_per_message {
            debug!(
                "Message {:?} has {} requests, serving the first {}",
                message.message,
                requests.len(),
                self.settings.max_requests_per_message
            );
            requests.truncate(self.settings.max_requests_per_message);
        }

        let requester = if message.author_is_bot {
            Requester::Anyone
        } else {
            Requester::User(message.author)
        };

        // one snapshot for the whole message
        let snapshot = self.catalog.load();
        let resolved: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let resolution = self.resolver.resolve(&snapshot, &request.query);
                (request, resolution)
            })
            .collect();

        let menus: Vec<SessionRequest> = resolved
            .iter()
            .filter_map(|(request, resolution)| match resolution {
                Resolution::Ambiguous(candidates) => Some(SessionRequest {
                    requester,
                    trigger_message: message.message,
                    replied_to: message.replied_to,
                    original_query: request.query.clone(),
                    kind: request.kind,
                    candidates: candidates.cards.clone(),
                    generation: snapshot.generation(),
                }),
                _ => None,
            })
            .collect();

        self.sessions.purge_expired();
        let mut opened = self.sessions.replace(message.message, menus).into_iter();

        resolved
            .into_iter()
            .filter_map(|(request, resolution)| {
                let response = match resolution {
                    Resolution::NotFound => Response::NotFound {
                        reply_to: message.message,
                        text: render::not_found_reply(&request.query),
                        query: request.query,
                    },
                    Resolution::Single(card) => Response::Card {
                        reply_to: message.message,
                        kind: request.kind,
                        text: render::card_reply(&card, request.kind, &self.links),
                        card,
                    },
                    Resolution::Ambiguous(candidates) => {
                        // sessions come back in request order
                        let session = opened.next()?;
                        Response::Menu {
                            reply_to: message.message,
                            session: session.id,
                            text: render::menu_reply(&session, candidates.total),
                            labels: session.labels,
                        }
                    }
                };
                Some(response)
            })
            .collect()
    }

    /// Complete a menu. Anything but an authorized, valid pick on a live
    /// session produces no response.
    pub fn handle_choice(&self, choice: &ChoiceSubmitted) -> Option<Response> {
        match self.sessions.choose(choice.session, &choice.actor, &choice.input) {
            ChoiceOutcome::Resolved { session, card } => {
                info!(
                    "Session {} resolved to {} by {:?}",
                    session.id, card.collector_info, choice.actor.user
                );

                // candidates from an older snapshot are re-read from the live one
                let live = self.catalog.load();
                let card = if session.generation == live.generation() {
                    card
                } else {
                    match live.by_collector(&card.collector_info) {
                        Some(current) => current.clone(),
                        None => {
                            warn!(
                                "Card {} picked on session {} is gone after a reload",
                                card.collector_info, session.id
                            );
                            return Some(Response::NotFound {
                                reply_to: session.trigger_message,
                                text: render::not_found_reply(&session.original_query),
                                query: session.original_query,
                            });
                        }
                    }
                };

                self.resolver.remember(&session.original_query, card.clone());
                Some(Response::Resolved {
                    session: session.id,
                    text: render::card_reply(&card, session.kind, &self.links),
                    card,
                })
            }
            ChoiceOutcome::Ignored(reason) => {
                debug!("Choice on session {} ignored: {:?}", choice.session, reason);
                None
            }
        }
    }

    /// Re-read the catalog and swap in a fresh index. The previous snapshot
    /// keeps serving until the new one is complete.
    pub fn reload(&self) -> Response {
        let started = Instant::now();
        let ticket = self.catalog.begin_reload();
        info!("Rebuilding card index (generation {})", ticket.generation());

        let text = match self.source.fetch() {
            Ok(text) => text,
            Err(e) => {
                warn!("Card catalog reload failed: {}", e);
                return Response::ReloadFailed {
                    text: render::reload_failed_reply(&e.to_string()),
                };
            }
        };

        let (index, report) = CatalogIndex::build(parse_catalog(&text), self.settings.full_title_format);
        if index.is_empty() {
            warn!("Reloaded catalog has no valid cards, keeping the previous index");
            return Response::ReloadFailed {
                text: render::reload_failed_reply("the catalog contains no valid cards"),
            };
        }

        if !ticket.publish(index) {
            return Response::ReloadFailed {
                text: render::reload_failed_reply("a newer rebuild was requested"),
            };
        }
        self.resolver.forget_all();

        let elapsed = started.elapsed();
        info!("Card index rebuilt in {:?}", elapsed);
        Response::Reloaded {
            text: render::reload_reply(elapsed, &report),
            elapsed,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticSource;
    use crate::error::LinkerError;
    use crate::session::{ChoiceSurface, SessionState};
    use crate::test_support::SAMPLE_CATALOG;
    use parking_lot::Mutex;

    const REQUESTER: UserId = UserId(100);

    /// Catalog source whose text can be swapped between reloads
    struct SwappableSource(Mutex<String>);

    impl CatalogSource for Arc<SwappableSource> {
        fn describe(&self) -> String {
            "swappable".to_string()
        }

        fn fetch(&self) -> Result<String> {
            Ok(self.0.lock().clone())
        }
    }

    fn engine_with(settings: Settings) -> Engine {
        Engine::start(settings, Box::new(StaticSource::new(SAMPLE_CATALOG)))
            .unwrap()
            .0
    }

    fn message(id: u64, content: &str) -> MessageTriggered {
        MessageTriggered {
            message: MessageId(id),
            author: REQUESTER,
            author_is_bot: false,
            replied_to: None,
            content: content.to_string(),
        }
    }

    fn pick(session: SessionId, user: UserId, input: ChoiceInput) -> ChoiceSubmitted {
        ChoiceSubmitted {
            session,
            actor: Actor { user, is_admin: false },
            input,
        }
    }

    #[test]
    fn test_title_and_collector_code_reply_with_image() {
        let engine = engine_with(Settings::default());

        for query in ["[Ben Kenobi]", "[ser004]"] {
            let responses = engine.handle_message(&message(1, query));
            assert_eq!(responses.len(), 1);
            match &responses[0] {
                Response::Card { card, text, kind, .. } => {
                    assert_eq!(card.id, "SER004");
                    assert_eq!(*kind, RequestKind::Image);
                    assert_eq!(text, "img/SER004.png");
                }
                other => panic!("expected a card, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_card_gets_fixed_reply() {
        let engine = engine_with(Settings::default());
        let responses = engine.handle_message(&message(1, "{Jar Jar Binks}"));
        match &responses[0] {
            Response::NotFound { query, text, .. } => {
                assert_eq!(query, "Jar Jar Binks");
                assert!(text.contains("`Jar Jar Binks`, is not used by the Alliance"));
            }
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_query_full_round_trip() {
        let engine = engine_with(Settings::default());
        let responses = engine.handle_message(&message(1, "[Han Solo]"));

        let (session, labels) = match &responses[0] {
            Response::Menu { session, labels, text, .. } => {
                assert!(text.contains(":one: : •Han Solo (V) (HS001)"));
                assert!(text.contains(":two: : •Han Solo (AI) (HS002)"));
                (*session, labels.clone())
            }
            other => panic!("expected a menu, got {:?}", other),
        };
        assert_eq!(labels, vec![":one:", ":two:"]);

        let resolved = engine.handle_choice(&pick(session, REQUESTER, ChoiceInput::Glyph(labels[1].clone())));
        match resolved {
            Some(Response::Resolved { card, text, .. }) => {
                assert_eq!(card.id, "HS002");
                assert_eq!(text, "img/HS002.png");
            }
            other => panic!("expected resolution, got {:?}", other),
        }
        assert_eq!(engine.recall("Han Solo").map(|c| c.id.clone()), Some("HS002".to_string()));

        // the pick sticks for the next identical request
        let again = engine.handle_message(&message(2, "[han solo]"));
        assert!(matches!(&again[0], Response::Card { card, .. } if card.id == "HS002"));
    }

    #[test]
    fn test_unauthorized_pick_is_silent() {
        let engine = engine_with(Settings::default());
        let responses = engine.handle_message(&message(1, "[Han Solo]"));
        let Response::Menu { session, .. } = &responses[0] else {
            panic!("expected a menu");
        };

        let outcome = engine.handle_choice(&pick(*session, UserId(999), ChoiceInput::Glyph(":one:".to_string())));
        assert!(outcome.is_none());
        assert_eq!(engine.sessions().state(*session), Some(SessionState::AwaitingChoice));
    }

    #[test]
    fn test_menu_surface_accepts_collector_codes() {
        let engine = engine_with(Settings {
            choice_surface: ChoiceSurface::Menu,
            ..Settings::default()
        });
        let responses = engine.handle_message(&message(1, "{Han Solo}"));
        let Response::Menu { session, labels, .. } = &responses[0] else {
            panic!("expected a menu");
        };
        assert_eq!(labels, &vec!["HS001".to_string(), "HS002".to_string()]);

        let resolved = engine.handle_choice(&pick(*session, REQUESTER, ChoiceInput::MenuValue("HS001".to_string())));
        match resolved {
            Some(Response::Resolved { text, .. }) => {
                assert_eq!(text, "Information about Han Solo is available at: https://wiki.example/HS001")
            }
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_retrigger_supersedes_menu() {
        let engine = engine_with(Settings::default());
        let first = engine.handle_message(&message(1, "[Han Solo]"));
        let Response::Menu { session, .. } = &first[0] else {
            panic!("expected a menu");
        };

        engine.handle_message(&message(1, "[Han Solo] again"));
        let late = engine.handle_choice(&pick(*session, REQUESTER, ChoiceInput::Glyph(":one:".to_string())));
        assert!(late.is_none());
    }

    #[test]
    fn test_request_cap_and_bot_messages() {
        let engine = engine_with(Settings {
            max_requests_per_message: 2,
            ..Settings::default()
        });
        let responses = engine.handle_message(&message(1, "[Ben Kenobi] [Luke Skywalker] [Vader]"));
        assert_eq!(responses.len(), 2);

        let from_bot = MessageTriggered {
            author_is_bot: true,
            ..message(2, "[Ben Kenobi]")
        };
        assert!(engine.handle_message(&from_bot).is_empty());

        let relaying = engine_with(Settings {
            relay_bots: true,
            ..Settings::default()
        });
        let responses = relaying.handle_message(&MessageTriggered {
            author_is_bot: true,
            ..message(3, "[Han Solo]")
        });
        let Response::Menu { session, .. } = &responses[0] else {
            panic!("expected a menu");
        };
        let anyone = relaying.handle_choice(&pick(*session, UserId(5), ChoiceInput::Glyph(":one:".to_string())));
        assert!(matches!(anyone, Some(Response::Resolved { .. })));
    }

    #[test]
    fn test_reload_swaps_catalog_and_clears_picks() {
        let source = Arc::new(SwappableSource(Mutex::new(SAMPLE_CATALOG.to_string())));
        let (engine, report) = Engine::start(Settings::default(), Box::new(source.clone())).unwrap();
        assert_eq!(report.indexed, 9);

        let han = engine.catalog().by_collector("HS001").cloned().unwrap();
        engine.resolver.remember("Han Solo", han);

        source
            .0
            .lock()
            .push_str("LS099\timg/LS099.png\twiki/LS099\tLS099\tLeia\tLeia Organa\t\t\t\t\nDUP\timg\twiki\tls099\tDup\tDup\n");
        match engine.reload() {
            Response::Reloaded { report, text, .. } => {
                assert_eq!(report.indexed, 10);
                assert_eq!(report.skipped.len(), 1);
                assert!(text.contains("1 rows skipped"));
            }
            other => panic!("expected a reload, got {:?}", other),
        }
        assert!(engine.recall("Han Solo").is_none());
        assert!(engine.resolve("Leia Organa").as_single().is_some());
        assert!(!engine.is_reloading());
    }

    fn open_han_solo_menu(engine: &Engine) -> (SessionId, Vec<String>) {
        let responses = engine.handle_message(&message(1, "[Han Solo]"));
        match &responses[0] {
            Response::Menu { session, labels, .. } => (*session, labels.clone()),
            other => panic!("expected a menu, got {:?}", other),
        }
    }

    #[test]
    fn test_pick_after_reload_uses_live_record() {
        let source = Arc::new(SwappableSource(Mutex::new(SAMPLE_CATALOG.to_string())));
        let (engine, _) = Engine::start(Settings::default(), Box::new(source.clone())).unwrap();
        let (session, labels) = open_han_solo_menu(&engine);

        *source.0.lock() = SAMPLE_CATALOG.replace("img/HS002.png", "img/HS002-new.png");
        assert!(matches!(engine.reload(), Response::Reloaded { .. }));

        let resolved = engine.handle_choice(&pick(session, REQUESTER, ChoiceInput::Glyph(labels[1].clone())));
        match resolved {
            Some(Response::Resolved { card, text, .. }) => {
                assert_eq!(card.image_url, "img/HS002-new.png");
                assert_eq!(text, "img/HS002-new.png");
            }
            other => panic!("expected resolution, got {:?}", other),
        }

        let remembered = engine.recall("Han Solo").unwrap();
        assert_eq!(remembered.image_url, "img/HS002-new.png");
        let live = engine.resolve("Han Solo");
        assert_eq!(live.as_single().map(|c| c.image_url.as_str()), Some("img/HS002-new.png"));
    }

    #[test]
    fn test_pick_of_card_removed_by_reload_is_not_remembered() {
        let source = Arc::new(SwappableSource(Mutex::new(SAMPLE_CATALOG.to_string())));
        let (engine, _) = Engine::start(Settings::default(), Box::new(source.clone())).unwrap();
        let (session, labels) = open_han_solo_menu(&engine);

        let without_hs002: String = SAMPLE_CATALOG
            .lines()
            .filter(|line| !line.starts_with("HS002"))
            .map(|line| format!("{}\n", line))
            .collect();
        *source.0.lock() = without_hs002;
        assert!(matches!(engine.reload(), Response::Reloaded { .. }));

        let resolved = engine.handle_choice(&pick(session, REQUESTER, ChoiceInput::Glyph(labels[1].clone())));
        match resolved {
            Some(Response::NotFound { query, .. }) => assert_eq!(query, "Han Solo"),
            other => panic!("expected not found, got {:?}", other),
        }
        assert!(engine.recall("Han Solo").is_none());
        assert!(engine.catalog().by_collector("HS002").is_none());
    }

    #[test]
    fn test_thirty_candidates_fill_one_menu_with_notice() {
        let mut catalog = String::from("ID\tImageURL\tWikiURL\tCollInfo\tDisplayName\tTitle\tSubtitle\tTitleSuffix\tNicknames\tPersonas\n");
        for n in 0..30 {
            catalog.push_str(&format!(
                "ST{n:02}\timg/ST{n:02}.png\thttps://wiki.example/ST{n:02}\tST{n:02}\t•Stormtrooper ({n})\tStormtrooper\t\t({n})\t\t\n"
            ));
        }
        let settings = Settings {
            choice_surface: ChoiceSurface::Menu,
            ..Settings::default()
        };
        let (engine, report) = Engine::start(settings, Box::new(StaticSource::new(catalog))).unwrap();
        assert_eq!(report.indexed, 30);

        let responses = engine.handle_message(&message(1, "[Stormtrooper]"));
        let Response::Menu { labels, text, .. } = &responses[0] else {
            panic!("expected a menu, got {:?}", responses[0]);
        };

        assert_eq!(labels.len(), 25);
        let distinct: std::collections::HashSet<&String> = labels.iter().collect();
        assert_eq!(distinct.len(), 25);
        assert_eq!(text.lines().filter(|line| line.starts_with('\t')).count(), 25);
        assert!(text.contains("Maximum menu limit reached. 5 more cards were found"));
    }

    #[test]
    fn test_failed_reload_keeps_previous_index() {
        let source = Arc::new(SwappableSource(Mutex::new(SAMPLE_CATALOG.to_string())));
        let (engine, _) = Engine::start(Settings::default(), Box::new(source.clone())).unwrap();

        *source.0.lock() = "header only\n".to_string();
        assert!(matches!(engine.reload(), Response::ReloadFailed { .. }));
        assert_eq!(engine.catalog().len(), 9);
    }

    #[test]
    fn test_unreadable_catalog_is_fatal() {
        let source = crate::catalog::FileSource::new("/no/such/catalog.tsv");
        let started = Engine::start(Settings::default(), Box::new(source));
        assert!(matches!(started, Err(LinkerError::CatalogNotFound(_))));
    }
}
