//! Outbound message text.

use crate::catalog::CardRecord;
use crate::index::BuildReport;
use crate::session::{ChoiceSurface, DisambiguationSession};
use crate::trigger::RequestKind;
use std::fmt::Write;
use std::time::Duration;

/// URL prefixes for catalogs that store relative references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkBase {
    pub image: String,
    pub wiki: String,
}

impl LinkBase {
    pub fn image_url(&self, card: &CardRecord) -> String {
        join_url(&self.image, &card.image_url)
    }

    pub fn wiki_url(&self, card: &CardRecord) -> String {
        join_url(&self.wiki, &card.wiki_url)
    }
}

fn join_url(base: &str, reference: &str) -> String {
    if base.is_empty() || reference.contains("://") {
        return reference.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        reference.trim_start_matches('/')
    )
}

/// The reply for a single card
pub fn card_reply(card: &CardRecord, kind: RequestKind, base: &LinkBase) -> String {
    match kind {
        RequestKind::Image => base.image_url(card),
        RequestKind::Wiki => format!(
            "Information about {} is available at: {}",
            card.title,
            base.wiki_url(card)
        ),
        RequestKind::Text => format!("{} ({})", card.display_name, card.collector_info),
    }
}

pub fn not_found_reply(query: &str) -> String {
    format!(
        "Sir, I am fluent in 6 million forms of communication. This signal, `{}`, is not used by the Alliance.",
        query
    )
}

/// Menu listing: one labelled line per candidate and a notice when the
/// resolver found more than fit.
pub fn menu_reply(session: &DisambiguationSession, total: usize) -> String {
    let mut text = format!(
        "Found multiple potential candidates for {} `{}`.\n",
        session.kind.describe(),
        session.original_query
    );
    text.push_str(match session.surface {
        ChoiceSurface::Glyph => "React with the option you'd like to display:\n\n",
        ChoiceSurface::Menu => "Pick the option you'd like to display from the menu:\n\n",
    });

    for (label, card) in session.labels.iter().zip(&session.candidates) {
        // :one: : •Ben Kenobi (SER004)
        let _ = writeln!(text, "\t{} : {} ({})", label, card.display_name, card.collector_info);
    }

    let hidden = total.saturating_sub(session.candidates.len());
    if hidden > 0 {
        let _ = write!(
            text,
            "\nMaximum menu limit reached. {} more cards were found; try a more specific search.\n",
            hidden
        );
    }
    text
}

pub fn reload_reply(elapsed: Duration, report: &BuildReport) -> String {
    let mut text = format!(
        "Completed card definition rebuild in {:.2} seconds. {} cards indexed.",
        elapsed.as_secs_f64(),
        report.indexed
    );
    if !report.skipped.is_empty() {
        let _ = write!(text, " {} rows skipped.", report.skipped.len());
    }
    text.push_str(" It's ready to go!");
    text
}

pub fn reload_failed_reply(error: &str) -> String {
    format!("Card definition rebuild failed, keeping the previous catalog: {}", error)
}
