//! Transcript storage abstraction.
//!
//! The [`TranscriptStore`] trait is the whole persistence contract of the
//! chat: an append-only, ordered log of [`Turn`]s that can be read in full
//! or wiped in full. There is no update or delete-by-id operation;
//! persisted turns are immutable.
//!
//! # Backends
//!
//! | Backend | Used by |
//! |---------|---------|
//! | [`SqliteTranscriptStore`] | the HTTP server and local `nexus chat` |
//! | [`HttpTranscriptStore`] | `nexus chat --remote`, talking to `/api/messages` |
//! | [`InMemoryTranscriptStore`] | tests and embedding |
//!
//! Implementations must be `Send + Sync` so a single store can be shared
//! between the controller and axum handlers behind an `Arc`.
//!
//! # Concurrency
//!
//! Stores do no locking across clients. Two controllers sharing one store
//! see last-write-wins behavior when `clear_all` races an `append_turn`.

pub mod http;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{Role, Turn};

pub use http::HttpTranscriptStore;
pub use memory::InMemoryTranscriptStore;
pub use sqlite::SqliteTranscriptStore;

/// Append-only transcript of the single conversation.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// All turns, ascending by append order.
    async fn list_turns(&self) -> Result<Vec<Turn>, StorageError>;

    /// Append one turn. Content is stored as given.
    async fn append_turn(&self, role: Role, content: &str) -> Result<(), StorageError>;

    /// Delete every turn unconditionally.
    async fn clear_all(&self) -> Result<(), StorageError>;
}
