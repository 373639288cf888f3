//! # Aventura Core
//!
//! The turn orchestration core of the Aventura interactive storyteller.
//! For each user input it retrieves long-term context from a summarized
//! chapter archive, selects relevant world-model entries through a tiered
//! policy, streams a narrator generation, classifies the passage into
//! structured state deltas, and applies those deltas while opportunistically
//! closing new chapters.
//!
//! All cross-component signalling goes through the typed [`bus::EventBus`];
//! the UI, persistence, and media layers subscribe to events and never call
//! into the core directly. LLM providers are reached through the companion
//! `aventura-provider` crate.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aventura_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(provider::OpenAiProvider::from_env()?);
//!     let bus = Arc::new(EventBus::new());
//!     bus.subscribe(EventKind::SentenceComplete, |event| {
//!         if let CoreEvent::SentenceComplete { text } = event {
//!             println!("{text}");
//!         }
//!         Ok(())
//!     });
//!
//!     let mut coordinator =
//!         TurnCoordinator::new(provider, bus, StoryConfig::default())?;
//!     coordinator.process_input("I open the door.").await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod chapters;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod entries;
pub mod events;
pub mod id;
pub mod narrator;
pub mod sentence;
pub mod story;
pub mod suggestions;
pub mod testing;
pub mod world;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bus::{EventBus, SubscriptionId};
    pub use crate::chapters::{Chapter, ChapterEngine, ChapterMetadata};
    pub use crate::classifier::{ClassificationResult, ClassifierError};
    pub use crate::config::{
        ConfigError, EntryConfig, InjectionScope, MemoryConfig, ModelRole, QualityTier,
        RoleModels, StoryConfig, StoryMode,
    };
    pub use crate::coordinator::{CancelHandle, TurnCoordinator, TurnError, TurnPhase, TurnReport};
    pub use crate::entries::EntryEngine;
    pub use crate::events::{CoreEvent, EventKind};
    pub use crate::id::{ArcId, ChapterId, EntryId, MessageId};
    pub use crate::story::{EntryRole, StoryEntry, StoryLog};
    pub use crate::suggestions::{Suggestion, SuggestionKind};
    pub use crate::world::{Entry, EntryState, EntryType, InjectionMode, InjectionPolicy};
}

/// Rough token estimate used for prompt budgeting (one token per four
/// characters).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}
