//! Conversation memory
//!
//! Every completed turn is recorded as a [`DialogueContext`]. Stores keep a
//! bounded history and evict the oldest records beyond their cap.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;
use crate::emotion::Emotion;

/// One completed conversation turn
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueContext {
    /// Session the turn belongs to
    pub session_id: Uuid,
    pub user_text: String,
    pub reply_text: String,
    /// Emotion detected in the reply
    pub emotion: Emotion,
    pub timestamp: DateTime<Utc>,
}

impl DialogueContext {
    /// Record stamped with the current time
    #[must_use]
    pub fn new(
        session_id: Uuid,
        user_text: impl Into<String>,
        reply_text: impl Into<String>,
        emotion: Emotion,
    ) -> Self {
        Self {
            session_id,
            user_text: user_text.into(),
            reply_text: reply_text.into(),
            emotion,
            timestamp: Utc::now(),
        }
    }
}

/// Persistence collaborator for dialogue history
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append a record, evicting the oldest beyond the cap
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be stored
    async fn append(&self, context: DialogueContext) -> Result<()>;

    /// Up to `limit` most recent records, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the history cannot be read
    async fn recent(&self, limit: usize) -> Result<Vec<DialogueContext>>;
}

/// Process-local bounded history
pub struct InMemoryHistory {
    cap: usize,
    records: Mutex<VecDeque<DialogueContext>>,
}

impl InMemoryHistory {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            records: Mutex::new(VecDeque::with_capacity(cap.max(1))),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MemoryStore for InMemoryHistory {
    async fn append(&self, context: DialogueContext) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push_back(context);
        while records.len() > self.cap {
            records.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DialogueContext>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = records.len().saturating_sub(limit);
        Ok(records.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_evicts_oldest() {
        let history = InMemoryHistory::new(3);
        let session = Uuid::new_v4();

        for i in 0..5 {
            history
                .append(DialogueContext::new(session, format!("q{i}"), format!("a{i}"), Emotion::Neutral))
                .await
                .unwrap();
        }

        assert_eq!(history.len(), 3);
        let recent = history.recent(10).await.unwrap();
        let users: Vec<&str> = recent.iter().map(|c| c.user_text.as_str()).collect();
        assert_eq!(users, vec!["q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn test_recent_limit() {
        let history = InMemoryHistory::new(10);
        let session = Uuid::new_v4();
        for i in 0..4 {
            history
                .append(DialogueContext::new(session, format!("q{i}"), "a", Emotion::Happy))
                .await
                .unwrap();
        }

        let recent = history.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].user_text, "q3");
    }
}
