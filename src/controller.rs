//! Session controller: drives one conversation turn at a time.
//!
//! The controller owns the live [`Turn`] list and the current
//! [`AgentConfig`], runs a [`CompletionSession`] per user message, and
//! commits the finished turn pair to a [`TranscriptStore`].
//!
//! # Turn lifecycle
//!
//! ```text
//! Idle ─▶ UserSubmitted ─▶ AwaitingStream ─▶ Streaming ─▶ Completed ─▶ Idle
//!                                  │              │
//!                                  └──────────────┴─────▶ Failed ─▶ Idle
//!
//! Idle ─▶ Syncing ─▶ Idle        (load, clear_all)
//! ```
//!
//! Only one turn may be outside `Idle` at a time. The guard lives here, not
//! in whatever renders the conversation: a second [`submit`] while a turn is
//! active is rejected without touching any state.
//!
//! [`load`] and [`clear_all`] hold the controller in `Syncing` while they
//! wait on the store, so no turn can start against a conversation that is
//! about to be replaced or wiped. They are refused with
//! [`SyncError::Busy`] while a turn is running.
//!
//! # Consistency model
//!
//! The in-memory conversation is the source of truth for the running
//! session; the store is best-effort durability, reconciled only when
//! [`load`] runs. The user turn is shown before it is persisted, and a store
//! failure never rolls it back or interrupts the stream. Store failures are
//! logged and reported in [`TurnOutcome::storage_errors`], never rendered as
//! chat messages. Provider failures, on the other hand, become a visible
//! model message that is never persisted.
//!
//! # Observing progress
//!
//! Every visible change publishes a [`Snapshot`] on a `tokio::sync::watch`
//! channel. Each snapshot carries the full cumulative text of the reply so
//! far, so a renderer that only sees the latest value still shows the right
//! content.
//!
//! [`submit`]: SessionController::submit
//! [`load`]: SessionController::load
//! [`clear_all`]: SessionController::clear_all

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::credential::CredentialSource;
use crate::error::{CompletionError, StorageError};
use crate::models::{AgentConfig, Role, Turn};
use crate::provider::CompletionProvider;
use crate::session::CompletionSession;
use crate::store::TranscriptStore;

/// Where the current turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    UserSubmitted,
    AwaitingStream,
    Streaming,
    Completed,
    Failed,
    /// `load` or `clear_all` is waiting on the store.
    Syncing,
}

impl TurnPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, TurnPhase::Idle)
    }
}

/// What a renderer needs to draw the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub turns: Vec<Turn>,
    pub phase: TurnPhase,
}

/// Why a submission or clear was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The input was empty or whitespace only.
    Empty,
    /// Another turn is still in progress.
    Busy,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnResult {
    /// Nothing happened.
    Rejected(Rejection),
    /// The reply streamed to the end.
    Completed { reply: String },
    /// The reply failed. `partial` holds whatever arrived before the failure.
    Failed {
        error: CompletionError,
        partial: String,
    },
}

/// Result of [`SessionController::submit`].
#[derive(Debug)]
pub struct TurnOutcome {
    pub result: TurnResult,
    /// Store writes that failed during the turn. They did not affect the
    /// visible conversation.
    pub storage_errors: Vec<StorageError>,
}

impl TurnOutcome {
    fn rejected(reason: Rejection) -> Self {
        Self {
            result: TurnResult::Rejected(reason),
            storage_errors: Vec::new(),
        }
    }
}

struct ControllerState {
    turns: Vec<Turn>,
    phase: TurnPhase,
    agent: AgentConfig,
}

/// Orchestrates the conversation between a store and a provider.
pub struct SessionController {
    store: Arc<dyn TranscriptStore>,
    provider: Arc<dyn CompletionProvider>,
    credentials: CredentialSource,
    state: Mutex<ControllerState>,
    updates: watch::Sender<Snapshot>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        provider: Arc<dyn CompletionProvider>,
        credentials: CredentialSource,
        agent: AgentConfig,
    ) -> Self {
        let (updates, _) = watch::channel(Snapshot {
            turns: Vec::new(),
            phase: TurnPhase::Idle,
        });
        Self {
            store,
            provider,
            credentials,
            state: Mutex::new(ControllerState {
                turns: Vec::new(),
                phase: TurnPhase::Idle,
                agent,
            }),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ControllerState) {
        self.updates.send_replace(Snapshot {
            turns: state.turns.clone(),
            phase: state.phase,
        });
    }

    /// Move from `Idle` to `phase`, or report that something else holds the
    /// controller. The returned guard puts the controller back to `Idle`
    /// when dropped, including when the caller's future is cancelled.
    fn claim(&self, phase: TurnPhase) -> Option<IdleOnDrop<'_>> {
        let mut state = self.lock();
        if !state.phase.is_idle() {
            debug!(phase = ?state.phase, requested = ?phase, "controller busy");
            return None;
        }
        state.phase = phase;
        self.publish(&state);
        Some(IdleOnDrop { controller: self })
    }

    /// Apply `f` to the state and publish the result.
    fn update<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.publish(&state);
        result
    }

    /// Replace the conversation with the store's transcript.
    ///
    /// On a store failure the conversation is left empty and the error is
    /// returned so the caller can show an error state. Refused while a turn
    /// is running.
    pub async fn load(&self) -> Result<usize, SyncError> {
        let _idle = self.claim(TurnPhase::Syncing).ok_or(SyncError::Busy)?;

        match self.store.list_turns().await {
            Ok(turns) => {
                let count = turns.len();
                self.update(|state| state.turns = turns);
                info!(turns = count, "loaded transcript");
                Ok(count)
            }
            Err(err) => {
                warn!(error = %err, "failed to load transcript");
                self.update(|state| state.turns.clear());
                Err(SyncError::Storage(err))
            }
        }
    }

    /// Run one full turn for `input`.
    ///
    /// Resolves once the reply has finished streaming (or failed) and the
    /// controller is back to [`TurnPhase::Idle`].
    pub async fn submit(&self, input: &str) -> TurnOutcome {
        if input.trim().is_empty() {
            return TurnOutcome::rejected(Rejection::Empty);
        }

        // Claim the turn and show the user message before anything async.
        let Some(_idle) = self.claim(TurnPhase::UserSubmitted) else {
            return TurnOutcome::rejected(Rejection::Busy);
        };
        let (history, agent) = self.update(|state| {
            let history: Vec<Turn> = state
                .turns
                .iter()
                .filter(|turn| !turn.ephemeral)
                .cloned()
                .collect();
            state.turns.push(Turn::user(input));
            (history, state.agent.clone())
        });

        let mut storage_errors = Vec::new();
        if let Err(err) = self.store.append_turn(Role::User, input).await {
            warn!(error = %err, "failed to persist user turn; keeping it in the conversation");
            storage_errors.push(err);
        }

        let placeholder = self.update(|state| {
            state.turns.push(Turn::model(""));
            state.phase = TurnPhase::AwaitingStream;
            state.turns.len() - 1
        });

        let result = match self.stream_reply(placeholder, &history, input, &agent).await {
            Ok(reply) => {
                self.commit_reply(placeholder, &reply, &mut storage_errors)
                    .await;
                TurnResult::Completed { reply }
            }
            Err((error, partial)) => {
                self.show_failure(placeholder, &error, &partial);
                TurnResult::Failed { error, partial }
            }
        };

        TurnOutcome {
            result,
            storage_errors,
        }
    }

    /// Stream the reply into the placeholder turn.
    ///
    /// On failure returns the error together with the text received so far.
    async fn stream_reply(
        &self,
        placeholder: usize,
        history: &[Turn],
        input: &str,
        agent: &AgentConfig,
    ) -> Result<String, (CompletionError, String)> {
        let mut session = CompletionSession::open(
            self.provider.clone(),
            &self.credentials,
            history,
            input,
            agent,
        )
        .map_err(|err| (err, String::new()))?;

        let mut reply = String::new();
        while let Some(fragment) = session.next_fragment().await {
            match fragment {
                Ok(text) => {
                    reply.push_str(&text);
                    self.update(|state| {
                        state.phase = TurnPhase::Streaming;
                        if let Some(turn) = state.turns.get_mut(placeholder) {
                            turn.content.clone_from(&reply);
                        }
                    });
                }
                Err(err) => return Err((err, reply)),
            }
        }
        Ok(reply)
    }

    async fn commit_reply(
        &self,
        placeholder: usize,
        reply: &str,
        storage_errors: &mut Vec<StorageError>,
    ) {
        self.update(|state| state.phase = TurnPhase::Completed);

        if reply.is_empty() {
            debug!("provider returned an empty reply; not persisting it");
            self.update(|state| {
                if let Some(turn) = state.turns.get_mut(placeholder) {
                    turn.ephemeral = true;
                }
            });
            return;
        }

        if let Err(err) = self.store.append_turn(Role::Model, reply).await {
            warn!(error = %err, "failed to persist model turn");
            storage_errors.push(err);
        }
    }

    fn show_failure(&self, placeholder: usize, error: &CompletionError, partial: &str) {
        let message = format_failure(error);
        self.update(|state| {
            state.phase = TurnPhase::Failed;
            let Some(turn) = state.turns.get_mut(placeholder) else {
                state.turns.push(Turn::ephemeral_model(message));
                return;
            };
            turn.ephemeral = true;
            if partial.is_empty() {
                turn.content = message;
            } else {
                // keep the partial text and add the error below it
                state.turns.push(Turn::ephemeral_model(message));
            }
        });
    }

    /// Wipe the store and the conversation.
    ///
    /// The conversation is emptied even when the store call fails; the
    /// failure is logged and returned. Refused while a turn is active.
    pub async fn clear_all(&self) -> Result<(), SyncError> {
        let _idle = self.claim(TurnPhase::Syncing).ok_or(SyncError::Busy)?;

        let stored = self.store.clear_all().await;
        self.update(|state| state.turns.clear());

        match stored {
            Ok(()) => {
                info!("cleared conversation");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to clear stored transcript; conversation cleared anyway");
                Err(SyncError::Storage(err))
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            turns: state.turns.clone(),
            phase: state.phase,
        }
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.lock().turns.clone()
    }

    pub fn phase(&self) -> TurnPhase {
        self.lock().phase
    }

    /// Receive a [`Snapshot`] after every visible change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    pub fn agent(&self) -> AgentConfig {
        self.lock().agent.clone()
    }

    /// Replace the agent settings. Takes effect from the next turn.
    pub fn set_agent(&self, agent: AgentConfig) {
        self.lock().agent = agent;
    }

    /// Edit the agent settings in place. Temperature is clamped to `[0, 1]`.
    pub fn update_agent(&self, f: impl FnOnce(&mut AgentConfig)) {
        let mut state = self.lock();
        f(&mut state.agent);
        state.agent.temperature = crate::models::clamp_temperature(state.agent.temperature);
    }
}

/// Returns the controller to `Idle` when a claimed operation ends.
struct IdleOnDrop<'a> {
    controller: &'a SessionController,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.controller.update(|state| state.phase = TurnPhase::Idle);
    }
}

/// Failure of [`SessionController::load`] and [`SessionController::clear_all`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a reply is still streaming")]
    Busy,
    #[error("transcript store failed: {0}")]
    Storage(StorageError),
}

/// Chat copy shown in place of a reply when a turn fails.
pub fn format_failure(error: &CompletionError) -> String {
    match error {
        CompletionError::MissingCredential { .. } => format!("**Error:** {error}"),
        CompletionError::Provider(message) => format!(
            "**Error:** {message}\n\nThe reply was not saved. Send your message again to retry."
        ),
    }
}
