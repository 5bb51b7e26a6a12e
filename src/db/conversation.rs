//! Conversation history repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::emotion::Emotion;
use crate::memory::{DialogueContext, MemoryStore};
use crate::{Error, Result};

/// SQLite-backed dialogue history capped at a fixed number of rows
#[derive(Clone)]
pub struct ConversationRepo {
    pool: DbPool,
    cap: usize,
}

impl ConversationRepo {
    /// Create a repository keeping at most `cap` records
    #[must_use]
    pub fn new(pool: DbPool, cap: usize) -> Self {
        Self {
            pool,
            cap: cap.max(1),
        }
    }

    /// Insert a record and delete the oldest rows beyond the cap
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, context: &DialogueContext) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO conversations (session_id, user_text, reply_text, emotion, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                context.session_id.to_string(),
                context.user_text,
                context.reply_text,
                context.emotion.as_str(),
                context.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        let evicted = conn
            .execute(
                "DELETE FROM conversations WHERE id NOT IN
                 (SELECT id FROM conversations ORDER BY id DESC LIMIT ?1)",
                [i64::try_from(self.cap).unwrap_or(i64::MAX)],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if evicted > 0 {
            tracing::debug!(evicted, cap = self.cap, "conversation history trimmed");
        }

        Ok(())
    }

    /// Up to `limit` most recent records, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_recent(&self, limit: usize) -> Result<Vec<DialogueContext>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT session_id, user_text, reply_text, emotion, created_at
                 FROM conversations ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut records = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(DialogueContext {
                    session_id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                    user_text: row.get(1)?,
                    reply_text: row.get(2)?,
                    emotion: Emotion::parse(&row.get::<_, String>(3)?).unwrap_or(Emotion::Neutral),
                    timestamp: parse_datetime(&row.get::<_, String>(4)?),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        records.reverse();
        Ok(records)
    }

    /// Records for one session, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_session(&self, session_id: Uuid) -> Result<Vec<DialogueContext>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT user_text, reply_text, emotion, created_at
                 FROM conversations WHERE session_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let records = stmt
            .query_map([session_id.to_string()], |row| {
                Ok(DialogueContext {
                    session_id,
                    user_text: row.get(0)?,
                    reply_text: row.get(1)?,
                    emotion: Emotion::parse(&row.get::<_, String>(2)?).unwrap_or(Emotion::Neutral),
                    timestamp: parse_datetime(&row.get::<_, String>(3)?),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(records)
    }

    /// Number of stored records
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<usize> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl MemoryStore for ConversationRepo {
    async fn append(&self, context: DialogueContext) -> Result<()> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.insert(&context))
            .await
            .map_err(|e| Error::Database(format!("history task failed: {e}")))?
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DialogueContext>> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.list_recent(limit))
            .await
            .map_err(|e| Error::Database(format!("history task failed: {e}")))?
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn context(session: Uuid, n: usize) -> DialogueContext {
        DialogueContext::new(session, format!("q{n}"), format!("a{n}"), Emotion::Happy)
    }

    #[test]
    fn test_insert_and_list() {
        let repo = ConversationRepo::new(init_memory().unwrap(), 10);
        let session = Uuid::new_v4();

        repo.insert(&context(session, 1)).unwrap();
        repo.insert(&context(session, 2)).unwrap();

        let records = repo.list_session(session).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_text, "q1");
        assert_eq!(records[1].reply_text, "a2");
        assert_eq!(records[1].emotion, Emotion::Happy);
    }

    #[test]
    fn test_cap_deletes_oldest() {
        let repo = ConversationRepo::new(init_memory().unwrap(), 3);
        let session = Uuid::new_v4();

        for n in 0..7 {
            repo.insert(&context(session, n)).unwrap();
        }

        assert_eq!(repo.count().unwrap(), 3);
        let recent = repo.list_recent(10).unwrap();
        let users: Vec<&str> = recent.iter().map(|c| c.user_text.as_str()).collect();
        assert_eq!(users, vec!["q4", "q5", "q6"]);
    }

    #[test]
    fn test_sessions_kept_apart() {
        let repo = ConversationRepo::new(init_memory().unwrap(), 10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        repo.insert(&context(a, 1)).unwrap();
        repo.insert(&context(b, 2)).unwrap();

        assert_eq!(repo.list_session(a).unwrap().len(), 1);
        assert_eq!(repo.list_session(b).unwrap()[0].session_id, b);
    }

    #[tokio::test]
    async fn test_memory_store_impl() {
        let repo = ConversationRepo::new(init_memory().unwrap(), 2);
        let session = Uuid::new_v4();

        for n in 0..3 {
            repo.append(context(session, n)).await.unwrap();
        }

        let recent = repo.recent(5).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_text, "q1");
    }
}
