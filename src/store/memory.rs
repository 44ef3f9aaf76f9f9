// In-process store used by --dry-run and tests

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::schemas::AcceptedItem;
use crate::store::traits::{
    AnswerKeyRecord, ChallengeRecord, PersistedId, PersistenceError, PersistenceGateway,
    RequestContext,
};

#[derive(Debug, Clone)]
pub struct StoredChallenge {
    pub id: PersistedId,
    pub challenge: ChallengeRecord,
    pub answer_key: AnswerKeyRecord,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredChallenge>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate content hashes, e.g. challenges created elsewhere
    pub fn with_existing<I>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        let rows = fingerprints
            .into_iter()
            .map(|fp| StoredChallenge {
                id: Uuid::new_v4().to_string(),
                challenge: ChallengeRecord {
                    title: String::new(),
                    description: String::new(),
                    difficulty: String::new(),
                    challenge_type: String::new(),
                    skills: Vec::new(),
                    estimated_time_minutes: 0,
                    evaluation_criteria: Vec::new(),
                    content_hash: fp.into_string(),
                    is_ai_generated: false,
                    created_by_admin: false,
                    job_post_id: None,
                    created_by_user_id: None,
                },
                answer_key: AnswerKeyRecord {
                    challenge_id: None,
                    correct_answer: String::new(),
                    explanation: String::new(),
                    evaluation_rubric: Vec::new(),
                },
            })
            .collect();
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub async fn challenges(&self) -> Vec<StoredChallenge> {
        self.rows.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn save(
        &self,
        item: &AcceptedItem,
        ctx: &RequestContext,
    ) -> Result<PersistedId, PersistenceError> {
        let mut rows = self.rows.lock().await;
        if rows
            .iter()
            .any(|r| r.challenge.content_hash == item.fingerprint.as_str())
        {
            return Err(PersistenceError::Duplicate(item.fingerprint.clone()));
        }
        let id = Uuid::new_v4().to_string();
        let mut answer_key = AnswerKeyRecord::from_accepted(item);
        answer_key.challenge_id = Some(id.clone());
        rows.push(StoredChallenge {
            id: id.clone(),
            challenge: ChallengeRecord::from_accepted(item, ctx),
            answer_key,
        });
        Ok(id)
    }

    async fn list_existing_fingerprints(&self) -> Result<Vec<Fingerprint>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .map(|r| Fingerprint::from(r.challenge.content_hash.as_str()))
            .collect())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}
