//! SQLite-backed challenge store.
//!
//! Challenges and answer keys live in separate tables so the answer key can
//! be withheld from anything that lists challenges. `content_hash` carries a
//! UNIQUE constraint, which is the final guard against duplicates when two
//! batches race against the same database.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::schemas::AcceptedItem;
use crate::store::traits::{
    AnswerKeyRecord, ChallengeRecord, PersistedId, PersistenceError, PersistenceGateway,
    RequestContext,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS challenges (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    difficulty TEXT NOT NULL,
    challenge_type TEXT NOT NULL,
    skills TEXT NOT NULL,
    estimated_time_minutes INTEGER NOT NULL,
    evaluation_criteria TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    is_ai_generated INTEGER NOT NULL DEFAULT 1,
    created_by_admin INTEGER NOT NULL DEFAULT 0,
    job_post_id TEXT,
    created_by_user_id TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE TABLE IF NOT EXISTS ai_challenge_answer_keys (
    challenge_id TEXT PRIMARY KEY REFERENCES challenges(id) ON DELETE CASCADE,
    correct_answer TEXT NOT NULL,
    explanation TEXT NOT NULL,
    evaluation_rubric TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_challenges_job_post ON challenges(job_post_id);
";

/// Row summary for listing; never includes the answer key
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeSummary {
    pub id: String,
    pub title: String,
    pub difficulty: String,
    pub challenge_type: String,
    pub content_hash: String,
    pub job_post_id: Option<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn storage_err(e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Storage(e.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA journal_mode=WAL;")
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run blocking SQLite work off the async executor
    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| PersistenceError::Storage(format!("sqlite task failed: {}", e)))?
    }

    /// Most recent challenges first
    pub async fn list_challenges(
        &self,
        limit: usize,
    ) -> Result<Vec<ChallengeSummary>, PersistenceError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, difficulty, challenge_type, content_hash, job_post_id, created_at
                     FROM challenges ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(ChallengeSummary {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        difficulty: row.get(2)?,
                        challenge_type: row.get(3)?,
                        content_hash: row.get(4)?,
                        job_post_id: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
    }

    pub async fn answer_key(
        &self,
        challenge_id: &str,
    ) -> Result<Option<AnswerKeyRecord>, PersistenceError> {
        let id = challenge_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT correct_answer, explanation, evaluation_rubric
                 FROM ai_challenge_answer_keys WHERE challenge_id = ?1",
                params![id],
                |row| {
                    let rubric: String = row.get(2)?;
                    Ok(AnswerKeyRecord {
                        challenge_id: Some(id.clone()),
                        correct_answer: row.get(0)?,
                        explanation: row.get(1)?,
                        evaluation_rubric: serde_json::from_str(&rubric).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map_err(storage_err)
        })
        .await
    }
}

fn insert_challenge(
    conn: &mut Connection,
    id: &str,
    challenge: &ChallengeRecord,
    answer_key: &AnswerKeyRecord,
) -> Result<(), rusqlite::Error> {
    let skills = serde_json::to_string(&challenge.skills).unwrap_or_else(|_| "[]".to_string());
    let criteria =
        serde_json::to_string(&challenge.evaluation_criteria).unwrap_or_else(|_| "[]".to_string());
    let rubric =
        serde_json::to_string(&answer_key.evaluation_rubric).unwrap_or_else(|_| "[]".to_string());

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO challenges (id, title, description, difficulty, challenge_type, skills,
             estimated_time_minutes, evaluation_criteria, content_hash, is_ai_generated,
             created_by_admin, job_post_id, created_by_user_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            challenge.title,
            challenge.description,
            challenge.difficulty,
            challenge.challenge_type,
            skills,
            challenge.estimated_time_minutes,
            criteria,
            challenge.content_hash,
            challenge.is_ai_generated,
            challenge.created_by_admin,
            challenge.job_post_id,
            challenge.created_by_user_id,
        ],
    )?;
    // Answer key only when there is an answer to keep
    if !answer_key.correct_answer.trim().is_empty() {
        tx.execute(
            "INSERT INTO ai_challenge_answer_keys (challenge_id, correct_answer, explanation, evaluation_rubric)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, answer_key.correct_answer, answer_key.explanation, rubric],
        )?;
    }
    tx.commit()
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn save(
        &self,
        item: &AcceptedItem,
        ctx: &RequestContext,
    ) -> Result<PersistedId, PersistenceError> {
        let challenge = ChallengeRecord::from_accepted(item, ctx);
        let answer_key = AnswerKeyRecord::from_accepted(item);
        let fingerprint = item.fingerprint.clone();
        let id = Uuid::new_v4().to_string();

        self.with_conn(move |conn| match insert_challenge(conn, &id, &challenge, &answer_key) {
            Ok(()) => {
                debug!("Stored challenge {} ({})", id, fingerprint.short());
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(PersistenceError::Duplicate(fingerprint)),
            Err(e) => Err(storage_err(e)),
        })
        .await
    }

    async fn list_existing_fingerprints(&self) -> Result<Vec<Fingerprint>, PersistenceError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT content_hash FROM challenges ORDER BY created_at ASC, rowid ASC")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for hash in rows {
                let hash = hash.map_err(storage_err)?;
                if !hash.trim().is_empty() {
                    out.push(Fingerprint::from(hash));
                }
            }
            Ok(out)
        })
        .await
    }

    fn backend(&self) -> &str {
        "sqlite"
    }
}
