use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::schemas::AcceptedItem;

pub type PersistedId = String;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("a similar challenge already exists (content hash {0})")]
    Duplicate(Fingerprint),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("http error: {0}")]
    Http(String),
}

/// Who the challenges are being generated for
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub job_post_id: Option<String>,
    pub created_by_user_id: Option<String>,
    pub created_by_admin: bool,
}

/// Challenge row as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub title: String,
    pub description: String,
    pub difficulty: String,
    pub challenge_type: String,
    pub skills: Vec<String>,
    pub estimated_time_minutes: u32,
    pub evaluation_criteria: Vec<String>,
    pub content_hash: String,
    pub is_ai_generated: bool,
    pub created_by_admin: bool,
    pub job_post_id: Option<String>,
    pub created_by_user_id: Option<String>,
}

/// Answer key kept apart from the candidate-visible challenge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKeyRecord {
    /// Set once the owning challenge has been stored
    pub challenge_id: Option<PersistedId>,
    pub correct_answer: String,
    pub explanation: String,
    pub evaluation_rubric: Vec<String>,
}

impl ChallengeRecord {
    pub fn from_accepted(item: &AcceptedItem, ctx: &RequestContext) -> Self {
        Self {
            title: item.item.title.clone(),
            description: item.item.description.clone(),
            difficulty: item.difficulty(),
            challenge_type: item.challenge_type(),
            skills: item.skills(),
            estimated_time_minutes: item.estimated_minutes(),
            evaluation_criteria: item.evaluation_criteria(),
            content_hash: item.fingerprint.as_str().to_string(),
            is_ai_generated: true,
            created_by_admin: ctx.created_by_admin,
            job_post_id: ctx.job_post_id.clone(),
            created_by_user_id: ctx.created_by_user_id.clone(),
        }
    }
}

impl AnswerKeyRecord {
    pub fn from_accepted(item: &AcceptedItem) -> Self {
        Self {
            challenge_id: None,
            correct_answer: item.item.correct_answer.clone(),
            explanation: item.item.correct_answer.clone(),
            evaluation_rubric: item.evaluation_criteria(),
        }
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Store one accepted challenge together with its answer key
    async fn save(
        &self,
        item: &AcceptedItem,
        ctx: &RequestContext,
    ) -> Result<PersistedId, PersistenceError>;

    /// Content hashes of every stored challenge, oldest first
    async fn list_existing_fingerprints(&self) -> Result<Vec<Fingerprint>, PersistenceError>;

    /// Backend label for logs
    fn backend(&self) -> &str;
}
