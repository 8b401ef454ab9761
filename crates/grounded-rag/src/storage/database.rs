//! SQLite store for interactions, evaluation records, user feedback and the
//! ingested-document registry
//!
//! Evaluation records are append-only: the schema rejects updates and deletes.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    AnswerOutcome, Document, EvaluationRecord, Interaction, MetricScore, UserFeedback,
};

/// Persists evaluation scores and the user feedback attached to them
pub trait FeedbackStore: Send + Sync {
    /// Store a record; fails with `AlreadyEvaluated` if one exists for the interaction
    fn save(&self, record: &EvaluationRecord) -> Result<()>;

    /// Fetch the record of an interaction, or `NotFound`
    fn get(&self, interaction_id: Uuid) -> Result<EvaluationRecord>;

    /// Attach a rating (1-5) and optional comment to an existing interaction
    fn append_user_feedback(
        &self,
        interaction_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<UserFeedback>;

    /// Feedback for an interaction, oldest first
    fn feedback_for(&self, interaction_id: Uuid) -> Result<Vec<UserFeedback>>;
}

/// Registry row for an ingested document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub source_path: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Row counts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub documents: usize,
    pub interactions: usize,
    pub evaluations: usize,
    pub feedback: usize,
}

/// SQLite-backed store
pub struct RagDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl RagDatabase {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                source_path TEXT NOT NULL UNIQUE,
                content_hash TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_category ON documents(category);

            CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                contexts_json TEXT NOT NULL,
                sources_json TEXT NOT NULL,
                outcome TEXT NOT NULL,
                category_filter TEXT,
                generation_model TEXT,
                embedding_model TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_created_at ON interactions(created_at);

            CREATE TABLE IF NOT EXISTS evaluations (
                interaction_id TEXT PRIMARY KEY REFERENCES interactions(id),
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                contexts_json TEXT NOT NULL,
                ground_truth TEXT,
                faithfulness REAL,
                answer_relevancy REAL,
                context_recall REAL,
                context_precision REAL,
                judge TEXT NOT NULL,
                judge_trace_json TEXT NOT NULL,
                evaluated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_evaluations_evaluated_at ON evaluations(evaluated_at);

            CREATE TRIGGER IF NOT EXISTS evaluations_immutable_update
            BEFORE UPDATE ON evaluations
            BEGIN
                SELECT RAISE(ABORT, 'evaluation records are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS evaluations_immutable_delete
            BEFORE DELETE ON evaluations
            BEGIN
                SELECT RAISE(ABORT, 'evaluation records are immutable');
            END;

            CREATE TABLE IF NOT EXISTS user_feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                interaction_id TEXT NOT NULL REFERENCES interactions(id),
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_user_feedback_interaction ON user_feedback(interaction_id);
            CREATE INDEX IF NOT EXISTS idx_user_feedback_created_at ON user_feedback(created_at);
        "#,
        )
        .map_err(|e| Error::storage(format!("Failed to run migrations: {}", e)))?;

        tracing::debug!("Database migrations complete");
        Ok(())
    }

    // ==================== Documents ====================

    /// Insert or replace the registry row of a document
    pub fn upsert_document(&self, document: &Document, chunk_count: usize) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO documents (id, title, category, source_path, content_hash, chunk_count, ingested_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                category = excluded.category,
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                ingested_at = excluded.ingested_at
            "#,
            params![
                document.id.to_string(),
                document.title,
                document.category,
                document.source_path,
                document.content_hash,
                chunk_count as i64,
                timestamp(&document.ingested_at),
            ],
        )
        .map_err(|e| Error::storage(format!("Failed to upsert document: {}", e)))?;
        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, title, category, source_path, content_hash, chunk_count, ingested_at
             FROM documents WHERE id = ?1",
            params![id.to_string()],
            row_to_document,
        )
        .optional()
        .map_err(|e| Error::storage(format!("Failed to get document: {}", e)))
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, category, source_path, content_hash, chunk_count, ingested_at
                 FROM documents ORDER BY source_path",
            )
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let records = stmt
            .query_map([], row_to_document)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage(format!("Failed to list documents: {}", e)))?;
        Ok(records)
    }

    /// Remove a document from the registry, returning whether it existed
    pub fn delete_document(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])
            .map_err(|e| Error::storage(format!("Failed to delete document: {}", e)))?;
        Ok(deleted > 0)
    }

    // ==================== Interactions ====================

    pub fn save_interaction(&self, interaction: &Interaction) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO interactions (
                id, question, answer, contexts_json, sources_json, outcome, category_filter,
                generation_model, embedding_model, response_time_ms, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                interaction.id.to_string(),
                interaction.question,
                interaction.answer,
                serde_json::to_string(&interaction.contexts)?,
                serde_json::to_string(&interaction.sources)?,
                interaction.outcome.as_str(),
                interaction.category_filter,
                interaction.generation_model,
                interaction.embedding_model,
                interaction.response_time_ms as i64,
                timestamp(&interaction.created_at),
            ],
        )
        .map_err(|e| Error::storage(format!("Failed to save interaction: {}", e)))?;
        Ok(())
    }

    pub fn get_interaction(&self, id: Uuid) -> Result<Interaction> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_INTERACTION),
            params![id.to_string()],
            row_to_interaction,
        )
        .optional()
        .map_err(|e| Error::storage(format!("Failed to get interaction: {}", e)))?
        .ok_or_else(|| Error::not_found(format!("interaction {}", id)))
    }

    /// Most recent interactions, newest first
    pub fn list_recent_interactions(&self, limit: usize) -> Result<Vec<Interaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY created_at DESC LIMIT ?1", SELECT_INTERACTION))
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let interactions = stmt
            .query_map(params![limit as i64], row_to_interaction)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage(format!("Failed to list interactions: {}", e)))?;
        Ok(interactions)
    }

    /// Newest interactions without an evaluation record that have context to score
    pub fn unevaluated_interactions(&self, limit: usize) -> Result<Vec<Interaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE outcome != ?1
                   AND id NOT IN (SELECT interaction_id FROM evaluations)
                 ORDER BY created_at DESC LIMIT ?2",
                SELECT_INTERACTION
            ))
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let interactions = stmt
            .query_map(
                params![AnswerOutcome::InsufficientContext.as_str(), limit as i64],
                row_to_interaction,
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage(format!("Failed to list interactions: {}", e)))?;
        Ok(interactions)
    }

    // ==================== Evaluations ====================

    /// Record of an interaction, if it has been evaluated
    pub fn find_evaluation(&self, interaction_id: Uuid) -> Result<Option<EvaluationRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{} WHERE interaction_id = ?1", SELECT_EVALUATION),
            params![interaction_id.to_string()],
            row_to_evaluation,
        )
        .optional()
        .map_err(|e| Error::storage(format!("Failed to get evaluation: {}", e)))
    }

    /// Records evaluated in `[since, until)`, oldest first
    pub fn evaluations_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EvaluationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE evaluated_at >= ?1 AND evaluated_at < ?2 ORDER BY evaluated_at",
                SELECT_EVALUATION
            ))
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let records = stmt
            .query_map(params![timestamp(&since), timestamp(&until)], row_to_evaluation)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage(format!("Failed to list evaluations: {}", e)))?;
        Ok(records)
    }

    /// Feedback created in `[since, until)`, oldest first
    pub fn feedback_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UserFeedback>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT interaction_id, rating, comment, created_at FROM user_feedback
                 WHERE created_at >= ?1 AND created_at < ?2 ORDER BY created_at, id",
            )
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let feedback = stmt
            .query_map(params![timestamp(&since), timestamp(&until)], row_to_feedback)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage(format!("Failed to list feedback: {}", e)))?;
        Ok(feedback)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| Error::storage(format!("Failed to count {}: {}", table, e)))
        };
        Ok(StoreStats {
            documents: count("documents")?,
            interactions: count("interactions")?,
            evaluations: count("evaluations")?,
            feedback: count("user_feedback")?,
        })
    }

    fn interaction_exists(conn: &Connection, id: Uuid) -> Result<bool> {
        conn.query_row(
            "SELECT 1 FROM interactions WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(|e| Error::storage(format!("Failed to look up interaction: {}", e)))
    }
}

impl FeedbackStore for RagDatabase {
    fn save(&self, record: &EvaluationRecord) -> Result<()> {
        let conn = self.conn.lock();

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM evaluations WHERE interaction_id = ?1",
                params![record.interaction_id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| Error::storage(format!("Failed to look up evaluation: {}", e)))?
            .is_some();
        if exists {
            return Err(Error::AlreadyEvaluated(record.interaction_id));
        }
        if !Self::interaction_exists(&conn, record.interaction_id)? {
            return Err(Error::not_found(format!("interaction {}", record.interaction_id)));
        }

        conn.execute(
            r#"
            INSERT INTO evaluations (
                interaction_id, question, answer, contexts_json, ground_truth, faithfulness,
                answer_relevancy, context_recall, context_precision, judge, judge_trace_json,
                evaluated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.interaction_id.to_string(),
                record.question,
                record.answer,
                serde_json::to_string(&record.retrieved_contexts)?,
                record.ground_truth,
                record.faithfulness.value().map(f64::from),
                record.answer_relevancy.value().map(f64::from),
                record.context_recall.value().map(f64::from),
                record.context_precision.value().map(f64::from),
                record.judge,
                serde_json::to_string(&record.judge_trace)?,
                timestamp(&record.evaluated_at),
            ],
        )
        .map_err(|e| Error::storage(format!("Failed to save evaluation: {}", e)))?;

        tracing::debug!("Saved evaluation for interaction {}", record.interaction_id);
        Ok(())
    }

    fn get(&self, interaction_id: Uuid) -> Result<EvaluationRecord> {
        self.find_evaluation(interaction_id)?
            .ok_or_else(|| Error::not_found(format!("evaluation for interaction {}", interaction_id)))
    }

    fn append_user_feedback(
        &self,
        interaction_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<UserFeedback> {
        let feedback = UserFeedback::new(interaction_id, rating, comment)?;

        let conn = self.conn.lock();
        if !Self::interaction_exists(&conn, interaction_id)? {
            return Err(Error::not_found(format!("interaction {}", interaction_id)));
        }

        conn.execute(
            "INSERT INTO user_feedback (interaction_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                interaction_id.to_string(),
                feedback.rating as i64,
                feedback.comment,
                timestamp(&feedback.created_at),
            ],
        )
        .map_err(|e| Error::storage(format!("Failed to save feedback: {}", e)))?;
        Ok(feedback)
    }

    fn feedback_for(&self, interaction_id: Uuid) -> Result<Vec<UserFeedback>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT interaction_id, rating, comment, created_at FROM user_feedback
                 WHERE interaction_id = ?1 ORDER BY id",
            )
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let feedback = stmt
            .query_map(params![interaction_id.to_string()], row_to_feedback)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage(format!("Failed to list feedback: {}", e)))?;
        Ok(feedback)
    }
}

const SELECT_INTERACTION: &str = "SELECT id, question, answer, contexts_json, sources_json, outcome, \
     category_filter, generation_model, embedding_model, response_time_ms, created_at FROM interactions";

const SELECT_EVALUATION: &str = "SELECT interaction_id, question, answer, contexts_json, ground_truth, \
     faithfulness, answer_relevancy, context_recall, context_precision, judge, judge_trace_json, \
     evaluated_at FROM evaluations";

/// Fixed-width UTC timestamps so text comparison orders them
fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_id(value: &str) -> Uuid {
    Uuid::parse_str(value).unwrap_or_default()
}

fn metric(value: Option<f64>) -> MetricScore {
    match value {
        Some(v) => MetricScore::score(v as f32),
        None => MetricScore::NotApplicable,
    }
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<DocumentRecord> {
    let id: String = row.get(0)?;
    let chunk_count: i64 = row.get(5)?;
    let ingested_at: String = row.get(6)?;
    Ok(DocumentRecord {
        id: parse_id(&id),
        title: row.get(1)?,
        category: row.get(2)?,
        source_path: row.get(3)?,
        content_hash: row.get(4)?,
        chunk_count: chunk_count as usize,
        ingested_at: parse_timestamp(&ingested_at),
    })
}

fn row_to_interaction(row: &rusqlite::Row) -> rusqlite::Result<Interaction> {
    let id: String = row.get(0)?;
    let contexts_json: String = row.get(3)?;
    let sources_json: String = row.get(4)?;
    let outcome: String = row.get(5)?;
    let response_time_ms: i64 = row.get(9)?;
    let created_at: String = row.get(10)?;

    Ok(Interaction {
        id: parse_id(&id),
        question: row.get(1)?,
        answer: row.get(2)?,
        contexts: serde_json::from_str(&contexts_json).unwrap_or_default(),
        sources: serde_json::from_str(&sources_json).unwrap_or_default(),
        outcome: AnswerOutcome::parse(&outcome).unwrap_or(AnswerOutcome::Answered),
        category_filter: row.get(6)?,
        generation_model: row.get(7)?,
        embedding_model: row.get(8)?,
        response_time_ms: response_time_ms as u64,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_evaluation(row: &rusqlite::Row) -> rusqlite::Result<EvaluationRecord> {
    let interaction_id: String = row.get(0)?;
    let contexts_json: String = row.get(3)?;
    let trace_json: String = row.get(10)?;
    let evaluated_at: String = row.get(11)?;

    Ok(EvaluationRecord {
        interaction_id: parse_id(&interaction_id),
        question: row.get(1)?,
        answer: row.get(2)?,
        retrieved_contexts: serde_json::from_str(&contexts_json).unwrap_or_default(),
        ground_truth: row.get(4)?,
        faithfulness: metric(row.get(5)?),
        answer_relevancy: metric(row.get(6)?),
        context_recall: metric(row.get(7)?),
        context_precision: metric(row.get(8)?),
        judge: row.get(9)?,
        judge_trace: serde_json::from_str(&trace_json).unwrap_or_default(),
        evaluated_at: parse_timestamp(&evaluated_at),
    })
}

fn row_to_feedback(row: &rusqlite::Row) -> rusqlite::Result<UserFeedback> {
    let interaction_id: String = row.get(0)?;
    let rating: i64 = row.get(1)?;
    let created_at: String = row.get(3)?;
    Ok(UserFeedback {
        interaction_id: parse_id(&interaction_id),
        rating: rating as u8,
        comment: row.get(2)?,
        created_at: parse_timestamp(&created_at),
    })
}
