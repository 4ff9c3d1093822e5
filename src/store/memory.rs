//! In-memory [`TranscriptStore`] for tests and embedding.
//!
//! A `Vec<Turn>` behind `std::sync::RwLock`. Failure injection lets tests
//! exercise the controller's storage-failure paths without a broken disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{Role, Turn};

use super::TranscriptStore;

#[derive(Default)]
pub struct InMemoryTranscriptStore {
    turns: RwLock<Vec<Turn>>,
    fail_writes: AtomicBool,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing turns.
    pub fn with_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns: RwLock::new(turns),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `append_turn` and `clear_all` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                status: 500,
                message: "in-memory store is read-only".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn list_turns(&self) -> Result<Vec<Turn>, StorageError> {
        let turns = self.turns.read().unwrap_or_else(PoisonError::into_inner);
        Ok(turns.clone())
    }

    async fn append_turn(&self, role: Role, content: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut turns = self.turns.write().unwrap_or_else(PoisonError::into_inner);
        turns.push(Turn::new(role, content));
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut turns = self.turns.write().unwrap_or_else(PoisonError::into_inner);
        turns.clear();
        Ok(())
    }
}
