//! [`TranscriptStore`] backed by a running `nexus serve` instance.
//!
//! Speaks the `/api/messages` surface exposed by [`crate::server`]:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `list_turns` | `GET /api/messages` |
//! | `append_turn` | `POST /api/messages` with `{role, content}` |
//! | `clear_all` | `DELETE /api/messages` |
//!
//! Non-success responses are turned into [`StorageError::Status`] carrying
//! the server's `{error}` message when one is present.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::models::{Role, Turn};

use super::TranscriptStore;

pub struct HttpTranscriptStore {
    client: Client,
    messages_url: String,
}

#[derive(Serialize)]
struct AppendBody<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpTranscriptStore {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            messages_url: format!("{}/api/messages", base_url.trim_end_matches('/')),
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.error)
        .unwrap_or(body);
    Err(StorageError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl TranscriptStore for HttpTranscriptStore {
    async fn list_turns(&self) -> Result<Vec<Turn>, StorageError> {
        let response = self.client.get(&self.messages_url).send().await?;
        let turns = ensure_success(response).await?.json::<Vec<Turn>>().await?;
        Ok(turns)
    }

    async fn append_turn(&self, role: Role, content: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .post(&self.messages_url)
            .json(&AppendBody { role, content })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let response = self.client.delete(&self.messages_url).send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}
