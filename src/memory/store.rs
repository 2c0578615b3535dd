//! Checkpoint storage
//!
//! Persists each thread's `ConversationState` between graph steps so a
//! conversation can be resumed by thread identifier. Every checkpoint
//! carries a SHA-256 hash of its turn sequence, checked on load.

use crate::error::OrchestrationError;
use crate::models::{ConversationState, Turn};
use crate::Result;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

/// Trait for checkpoint persistence
#[async_trait::async_trait]
pub trait Checkpointer: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>>;
    async fn save(&self, state: &ConversationState) -> Result<()>;
    /// Drop a thread. Returns whether it existed.
    async fn delete(&self, thread_id: &str) -> Result<bool>;
}

#[derive(Clone)]
struct Checkpoint {
    state: ConversationState,
    history_hash: String,
}

/// In-memory checkpointer for development and tests
pub struct InMemoryCheckpointer {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        let checkpoints = self.checkpoints.read().await;

        let Some(checkpoint) = checkpoints.get(thread_id) else {
            return Ok(None);
        };

        verify_history_hash(&checkpoint.state, &checkpoint.history_hash)?;
        Ok(Some(checkpoint.state.clone()))
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let history_hash = compute_history_hash(&state.turns);
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(
            state.thread_id.clone(),
            Checkpoint {
                state: state.clone(),
                history_hash,
            },
        );
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let mut checkpoints = self.checkpoints.write().await;
        Ok(checkpoints.remove(thread_id).is_some())
    }
}

/// Postgres-backed checkpointer. The state is stored as serialized JSON text.
pub struct PostgresCheckpointer {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresCheckpointer {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_checkpoints (
                      thread_id TEXT PRIMARY KEY,
                      state TEXT NOT NULL,
                      history_hash TEXT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize checkpoint schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Checkpointer for PostgresCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT state, history_hash FROM conversation_checkpoints WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to load checkpoint: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row
            .try_get("state")
            .map_err(|e| OrchestrationError::DatabaseError(e.to_string()))?;
        let history_hash: String = row
            .try_get("history_hash")
            .map_err(|e| OrchestrationError::DatabaseError(e.to_string()))?;

        let state: ConversationState = serde_json::from_str(&raw)?;
        verify_history_hash(&state, &history_hash)?;

        Ok(Some(state))
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        self.ensure_schema().await?;

        let raw = serde_json::to_string(state)?;
        let history_hash = compute_history_hash(&state.turns);

        sqlx::query(
            r#"
            INSERT INTO conversation_checkpoints (thread_id, state, history_hash, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (thread_id)
            DO UPDATE SET state = EXCLUDED.state,
                          history_hash = EXCLUDED.history_hash,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&state.thread_id)
        .bind(raw)
        .bind(history_hash)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to save checkpoint: {}", e))
        })?;

        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM conversation_checkpoints WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Failed to delete checkpoint: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

/// Postgres when a database URL is given and usable, otherwise in-memory.
pub fn build_checkpointer(database_url: Option<&str>) -> Arc<dyn Checkpointer> {
    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
        {
            Ok(pool) => {
                info!("Checkpoint backend: postgres");
                return Arc::new(PostgresCheckpointer::new(pool));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres checkpoint backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Checkpoint backend: in-memory");
    Arc::new(InMemoryCheckpointer::new())
}

/// SHA-256 of the serialized turn sequence, hex encoded
pub fn compute_history_hash(turns: &[Turn]) -> String {
    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), turns).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

fn verify_history_hash(state: &ConversationState, expected: &str) -> Result<()> {
    if compute_history_hash(&state.turns) == expected {
        Ok(())
    } else {
        Err(OrchestrationError::StateError(format!(
            "Checkpoint for thread {} failed integrity check",
            state.thread_id
        )))
    }
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateUpdate;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_save_and_resume() {
        let store = InMemoryCheckpointer::new();
        assert!(store.load("t1").await.unwrap().is_none());

        let mut state = ConversationState::new("t1");
        state.apply(StateUpdate::turn(Turn::user("What is my balance?")));
        assert_ok!(store.save(&state).await);

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.turns, state.turns);
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let store = InMemoryCheckpointer::new();
        store.save(&ConversationState::new("t2")).await.unwrap();

        assert!(store.delete("t2").await.unwrap());
        assert!(!store.delete("t2").await.unwrap());
        assert!(store.load("t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tampered_checkpoint_rejected() {
        let store = InMemoryCheckpointer::new();
        let mut state = ConversationState::new("t3");
        state.apply(StateUpdate::turn(Turn::user("hola")));
        store.save(&state).await.unwrap();

        {
            let mut checkpoints = store.checkpoints.write().await;
            let checkpoint = checkpoints.get_mut("t3").unwrap();
            checkpoint.state.turns.push(Turn::assistant("injected"));
        }

        let result = store.load("t3").await;
        assert!(matches!(result, Err(OrchestrationError::StateError(_))));
    }

    #[test]
    fn test_history_hash_is_stable() {
        let turns = vec![Turn::user("a"), Turn::assistant("b")];
        let h1 = compute_history_hash(&turns);
        let h2 = compute_history_hash(&turns.clone());
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, compute_history_hash(&turns[..1]));
    }
}
