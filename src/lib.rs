//! cardlink - resolves free-text card references in chat messages to
//! entries of a tab-separated card catalog.
//!
//! Queries are normalized and probed against six lookup tables built from
//! the catalog (collector code, full title, title, subtitle, nickname,
//! persona), with a substring scan as fallback. Ambiguous answers become
//! disambiguation sessions that the requester settles by picking a glyph
//! or a menu entry.
//!
//! The [`engine::Engine`] consumes typed events and returns replies to
//! send; [`dispatch::Dispatcher`] runs it behind a tokio channel.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod index;
pub mod normalize;
pub mod render;
pub mod resolver;
pub mod session;
pub mod trigger;

#[cfg(test)]
mod test_support;

pub use catalog::{CardRecord, CatalogSource, FileSource, StaticSource};
pub use config::Settings;
pub use dispatch::{DispatchHandle, Dispatcher};
pub use engine::{ChoiceSubmitted, Engine, InboundEvent, MessageTriggered, Response};
pub use error::{LinkerError, Result};
pub use index::{BuildReport, CatalogHandle, CatalogIndex};
pub use resolver::{Resolution, Resolver, ResolverOptions};
pub use session::{ChoiceInput, ChoiceSurface, SessionManager};
