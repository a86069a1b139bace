//! HTTP client for the assistant backend.
//!
//! The generation endpoint is opaque: the client ships the message plus
//! recent history and gets text back. Prompting, model choice and retrieval
//! all live server-side.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::ChatMessage;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// One history turn as the backend expects it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry<'a> {
    role: &'a str,
    content: &'a str,
}

/// Request body for the generation endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_context: Option<&'a str>,
    chat_history: Vec<HistoryEntry<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Response body from the generation endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponse {
    pub response: String,
    #[serde(default)]
    pub tokens_used: Option<u32>,
}

pub struct AssistantClient {
    base_url: String,
    client: reqwest::Client,
}

impl AssistantClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Ask for a reply to `message`, given the conversation so far.
    ///
    /// `history` is trimmed to the last 20 turns; older context is the
    /// backend's problem, not the wire's.
    pub async fn generate(
        &self,
        message: &str,
        history: &[ChatMessage],
        file_context: Option<&str>,
        max_tokens: Option<u32>,
    ) -> Result<AssistantResponse, SyncError> {
        if message.trim().is_empty() {
            return Err(SyncError::Validation("message must not be empty".into()));
        }

        let recent = history.iter().rev().take(20).rev();
        let body = GenerateRequest {
            message,
            file_context,
            chat_history: recent
                .map(|m| HistoryEntry {
                    role: m.kind.as_str(),
                    content: &m.message,
                })
                .collect(),
            max_tokens,
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("assistant request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transient(format!(
                "assistant returned {status}: {body}"
            )));
        }

        response
            .json::<AssistantResponse>()
            .await
            .map_err(|e| SyncError::Transient(format!("assistant response malformed: {e}")))
    }
}
