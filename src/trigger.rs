//! Bracketed card requests inside chat text.
//!
//! | Syntax    | Request |
//! |-----------|---------|
//! | `[[x]]`   | card image |
//! | `[x]`     | card image |
//! | `{x}`     | reference page link |
//! | `<x>`     | plain text (opt-in) |
//!
//! Tokens that start with `@` are user mentions and are never requests.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // leftmost-first alternation: `[[` wins over `[` at the same position
    static ref RE_TRIGGER: Regex = Regex::new(
        r"\[\[([^@\]][^\]]*?)\]\]|\[([^@\[\]][^\[\]]*?)\]|\{([^@}][^}]*?)\}|<([^@>][^>]*?)>"
    )
    .unwrap();
}

/// What the requester wants to see for a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Image,
    Wiki,
    Text,
}

impl RequestKind {
    /// Noun used in menus ("card image", "card wiki page", ...)
    pub fn describe(&self) -> &'static str {
        match self {
            RequestKind::Image => "card image",
            RequestKind::Wiki => "card wiki page",
            RequestKind::Text => "card details",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub kind: RequestKind,
    /// Token text as typed, without brackets
    pub query: String,
}

/// Every request in `text`, in the order it appears
pub fn extract_requests(text: &str, angle_brackets: bool) -> Vec<TriggerRequest> {
    RE_TRIGGER
        .captures_iter(text)
        .filter_map(|caps| {
            let (kind, token) = if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                (RequestKind::Image, m)
            } else if let Some(m) = caps.get(3) {
                (RequestKind::Wiki, m)
            } else {
                let m = caps.get(4)?;
                if !angle_brackets {
                    return None;
                }
                (RequestKind::Text, m)
            };
            let query = token.as_str().trim();
            if query.is_empty() {
                return None;
            }
            Some(TriggerRequest {
                kind,
                query: query.to_string(),
            })
        })
        .collect()
}
