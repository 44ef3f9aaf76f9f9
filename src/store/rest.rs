//! Persistence through the existing challenge CRUD backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::openai::truncate_snippet;
use crate::error::{ProofAndFitError, Result};
use crate::fingerprint::Fingerprint;
use crate::schemas::AcceptedItem;
use crate::store::traits::{
    ChallengeRecord, PersistedId, PersistenceError, PersistenceGateway, RequestContext,
};

pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct CreateChallengeBody<'a> {
    #[serde(flatten)]
    challenge: &'a ChallengeRecord,
    correct_answer: &'a str,
    answer_explanation: &'a str,
}

#[derive(Deserialize)]
struct CreatedChallenge {
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct ListedChallenge {
    #[serde(default)]
    content_hash: Option<String>,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ProofAndFitError::Config {
                message: format!("Failed to build reqwest client with timeout: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn url(&self) -> String {
        format!("{}/challenges", self.base_url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn http_err(e: reqwest::Error) -> PersistenceError {
    PersistenceError::Http(e.to_string())
}

/// The backend reports an existing content hash as a 400 with this wording
fn is_duplicate_response(status: StatusCode, body: &str) -> bool {
    (status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT)
        && body.to_lowercase().contains("already exists")
}

#[async_trait]
impl PersistenceGateway for RestStore {
    async fn save(
        &self,
        item: &AcceptedItem,
        ctx: &RequestContext,
    ) -> std::result::Result<PersistedId, PersistenceError> {
        let challenge = ChallengeRecord::from_accepted(item, ctx);
        let body = CreateChallengeBody {
            challenge: &challenge,
            correct_answer: &item.item.correct_answer,
            answer_explanation: &item.item.correct_answer,
        };

        let response = self
            .authorized(self.client.post(self.url()))
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if is_duplicate_response(status, &text) {
                return Err(PersistenceError::Duplicate(item.fingerprint.clone()));
            }
            return Err(PersistenceError::Http(format!(
                "{} {}",
                status,
                truncate_snippet(text.trim(), 300)
            )));
        }

        let created: CreatedChallenge = response.json().await.map_err(http_err)?;
        let id = match created.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        debug!("Backend stored challenge {} ({})", id, item.fingerprint.short());
        Ok(id)
    }

    async fn list_existing_fingerprints(
        &self,
    ) -> std::result::Result<Vec<Fingerprint>, PersistenceError> {
        let response = self
            .authorized(self.client.get(self.url()))
            .send()
            .await
            .map_err(http_err)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PersistenceError::Http(format!(
                "backend has no challenge listing route at {}",
                self.url()
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PersistenceError::Http(format!(
                "{} {}",
                status,
                truncate_snippet(text.trim(), 300)
            )));
        }
        let listed: Vec<ListedChallenge> = response.json().await.map_err(http_err)?;
        Ok(listed
            .into_iter()
            .filter_map(|c| c.content_hash)
            .filter(|h| !h.trim().is_empty())
            .map(Fingerprint::from)
            .collect())
    }

    fn backend(&self) -> &str {
        "rest"
    }
}
