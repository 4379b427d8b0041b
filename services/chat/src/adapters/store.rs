//! services/chat/src/adapters/store.rs
//!
//! This module contains the document store adapter, the concrete
//! implementation of the `DocumentStore` port. Documents live in a single
//! PostgreSQL JSONB table; change notification is an in-process watch hub
//! that publishes the full post-image snapshot after every successful
//! write.

use async_trait::async_trait;
use carechat_core::ports::{DocumentStore, PortError, PortResult, Subscription};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the per-document broadcast ring and of each subscriber's
/// snapshot channel. A lagging subscriber loses intermediate snapshots but
/// always sees a later full snapshot, which the wholesale-replacement
/// consumers tolerate.
const WATCH_BUFFER: usize = 16;

/// Routes post-write snapshots to the subscribers of each document.
struct WatchHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl WatchHub {
    fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, doc_id: &str) -> broadcast::Sender<Value> {
        let mut channels = self.channels.lock().expect("watch hub lock poisoned");
        channels
            .entry(doc_id.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_BUFFER).0)
            .clone()
    }

    fn publish(&self, doc_id: &str, snapshot: Value) {
        let channels = self.channels.lock().expect("watch hub lock poisoned");
        if let Some(tx) = channels.get(doc_id) {
            // Err only means no live subscriber for this document.
            let _ = tx.send(snapshot);
        }
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter backed by a PostgreSQL JSONB table.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    hub: std::sync::Arc<WatchHub>,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hub: std::sync::Arc::new(WatchHub::new()),
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn read(&self, doc_id: &str) -> PortResult<Option<Value>> {
        let doc: Option<Value> =
            sqlx::query_scalar("SELECT doc FROM documents WHERE doc_id = $1")
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(doc)
    }

    async fn write(&self, doc_id: &str, doc: Value) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO documents (doc_id, doc) VALUES ($1, $2)
             ON CONFLICT (doc_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = now()",
        )
        .bind(doc_id)
        .bind(&doc)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(doc_id, "document written");
        self.hub.publish(doc_id, doc);
        Ok(())
    }

    async fn append(&self, doc_id: &str, array_field: &str, item: Value) -> PortResult<()> {
        // Single atomic statement so concurrent appends interleave without
        // losing items; returns the post-image for the watch hub.
        let doc: Value = sqlx::query_scalar(
            "INSERT INTO documents (doc_id, doc)
             VALUES ($1, jsonb_build_object($2::text, jsonb_build_array($3::jsonb)))
             ON CONFLICT (doc_id) DO UPDATE
               SET doc = jsonb_set(
                     documents.doc,
                     ARRAY[$2::text],
                     COALESCE(documents.doc -> $2::text, '[]'::jsonb) || $3::jsonb
                   ),
                   updated_at = now()
             RETURNING doc",
        )
        .bind(doc_id)
        .bind(array_field)
        .bind(&item)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(doc_id, array_field, "item appended");
        self.hub.publish(doc_id, doc);
        Ok(())
    }

    async fn watch(&self, doc_id: &str) -> PortResult<Subscription> {
        let mut source = self.hub.sender_for(doc_id).subscribe();
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();

        let forwarder_cancel = cancel.clone();
        let forwarder_doc = doc_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forwarder_cancel.cancelled() => break,
                    received = source.recv() => match received {
                        Ok(snapshot) => {
                            if tx.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(doc_id = %forwarder_doc, skipped, "watch lagged, skipping to latest snapshot");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(doc_id = %forwarder_doc, "watch forwarder stopped");
        });

        Ok(Subscription::new(rx, cancel))
    }
}
