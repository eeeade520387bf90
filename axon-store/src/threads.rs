//! Conversation threads and messages. All reads are owner-scoped.

use crate::db::Store;
use crate::error::StoreError;
use axon_core::{ChatRole, NewMessage, OwnerId, Thread, ThreadId, ThreadMessage, ToolCallId};
use chrono::{DateTime, Utc};

#[derive(Debug, sqlx::FromRow)]
struct ThreadRow {
    id: i64,
    owner_id: String,
    title: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ThreadRow> for Thread {
    fn from(row: ThreadRow) -> Self {
        Thread {
            id: ThreadId::from(row.id),
            owner_id: OwnerId::new(row.owner_id),
            title: row.title,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    thread_id: i64,
    #[sqlx(try_from = "String")]
    role: ChatRole,
    content: String,
    tool_calls: Option<String>,
    tool_call_id: Option<String>,
    sent_at: DateTime<Utc>,
    internal: bool,
}

impl MessageRow {
    fn into_message(self) -> Result<ThreadMessage, StoreError> {
        let tool_calls = match self.tool_calls {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(ThreadMessage {
            id: self.id,
            thread_id: ThreadId::from(self.thread_id),
            role: self.role,
            content: self.content,
            tool_calls,
            tool_call_id: self.tool_call_id.map(ToolCallId::new),
            sent_at: self.sent_at,
            internal: self.internal,
        })
    }
}

impl Store {
    /// Create a thread owned by `owner`.
    pub async fn create_thread(
        &self,
        owner: &OwnerId,
        title: Option<&str>,
    ) -> Result<Thread, StoreError> {
        let row: ThreadRow = sqlx::query_as(
            "INSERT INTO threads (owner_id, title, created_at)
             VALUES (?, ?, ?)
             RETURNING id, owner_id, title, created_at",
        )
        .bind(owner.as_str())
        .bind(title)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    /// Fetch a thread, visible only to its owner.
    pub async fn get_thread(
        &self,
        thread_id: ThreadId,
        owner: &OwnerId,
    ) -> Result<Thread, StoreError> {
        let row: Option<ThreadRow> = sqlx::query_as(
            "SELECT id, owner_id, title, created_at
             FROM threads WHERE id = ? AND owner_id = ?",
        )
        .bind(thread_id.as_i64())
        .bind(owner.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))
    }

    /// List the owner's threads, newest first.
    pub async fn list_threads(&self, owner: &OwnerId) -> Result<Vec<Thread>, StoreError> {
        let rows: Vec<ThreadRow> = sqlx::query_as(
            "SELECT id, owner_id, title, created_at
             FROM threads WHERE owner_id = ? ORDER BY id DESC",
        )
        .bind(owner.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Append a message to a thread.
    pub async fn append_message(
        &self,
        thread_id: ThreadId,
        message: &NewMessage,
    ) -> Result<ThreadMessage, StoreError> {
        let tool_calls = message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let row: MessageRow = sqlx::query_as(
            "INSERT INTO thread_messages
                 (thread_id, role, content, tool_calls, tool_call_id, sent_at, internal)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, thread_id, role, content, tool_calls, tool_call_id, sent_at, internal",
        )
        .bind(thread_id.as_i64())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(tool_calls)
        .bind(message.tool_call_id.as_ref().map(|id| id.as_str()))
        .bind(Utc::now())
        .bind(message.internal)
        .fetch_one(self.pool())
        .await?;
        row.into_message()
    }

    /// Messages of a thread in send order. `include_internal` exposes
    /// orchestration-only messages; end-user views pass `false`.
    pub async fn list_messages(
        &self,
        thread_id: ThreadId,
        owner: &OwnerId,
        include_internal: bool,
    ) -> Result<Vec<ThreadMessage>, StoreError> {
        // Owner scoping rides on the thread row.
        self.get_thread(thread_id, owner).await?;
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, thread_id, role, content, tool_calls, tool_call_id, sent_at, internal
             FROM thread_messages
             WHERE thread_id = ? AND (? OR internal = 0)
             ORDER BY id ASC",
        )
        .bind(thread_id.as_i64())
        .bind(include_internal)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Full history for context assembly, internal messages included.
    /// Not owner-checked: the engine already holds the run.
    pub async fn thread_history(
        &self,
        thread_id: ThreadId,
    ) -> Result<Vec<ThreadMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, thread_id, role, content, tool_calls, tool_call_id, sent_at, internal
             FROM thread_messages WHERE thread_id = ? ORDER BY id ASC",
        )
        .bind(thread_id.as_i64())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::ToolCallRequest;
    use serde_json::json;

    #[tokio::test]
    async fn owner_scoping_hides_foreign_threads() {
        let store = Store::connect_in_memory().await.unwrap();
        let alice = OwnerId::new("alice");
        let bob = OwnerId::new("bob");
        let thread = store.create_thread(&alice, Some("ops")).await.unwrap();

        assert!(store.get_thread(thread.id, &alice).await.is_ok());
        assert!(matches!(
            store.get_thread(thread.id, &bob).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list_threads(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_calls_survive_the_round_trip() {
        let store = Store::connect_in_memory().await.unwrap();
        let owner = OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();

        let calls = vec![
            ToolCallRequest {
                id: ToolCallId::new("tc-1"),
                name: "spawn_worker".into(),
                args: json!({"task": "a"}),
            },
            ToolCallRequest {
                id: ToolCallId::new("tc-2"),
                name: "spawn_worker".into(),
                args: json!({"task": "b"}),
            },
        ];
        store
            .append_message(thread.id, &NewMessage::assistant("", Some(calls.clone())))
            .await
            .unwrap();

        let history = store.thread_history(thread.id).await.unwrap();
        let stored = history[0].tool_calls.as_ref().unwrap();
        assert_eq!(stored.len(), calls.len());
        assert_eq!(stored[0].id, calls[0].id);
        assert_eq!(stored[1].id, calls[1].id);
    }

    #[tokio::test]
    async fn internal_messages_hidden_from_user_views() {
        let store = Store::connect_in_memory().await.unwrap();
        let owner = OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();

        store
            .append_message(thread.id, &NewMessage::user("hello"))
            .await
            .unwrap();
        store
            .append_message(
                thread.id,
                &NewMessage::tool_reply(ToolCallId::new("tc-1"), "plumbing"),
            )
            .await
            .unwrap();

        let visible = store.list_messages(thread.id, &owner, false).await.unwrap();
        assert_eq!(visible.len(), 1);
        let all = store.list_messages(thread.id, &owner, true).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
