//! Background ingestion: a small worker pool fed by a bounded channel, with
//! a write-once ledger of everything enqueued.
//!
//! `enqueue` persists the `async_operations` row before the job is handed to
//! a worker, so the record survives a crash even if the work never starts.
//! There is no cancellation; completion is observed through the ledger plus
//! the fact store itself.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{self, JoinHandle};

use crate::config::TasksConfig;
use crate::db::Pool;
use crate::error::{MemoryError, Result};
use crate::memory::ingest::Ingestor;
use crate::memory::types::{AsyncOperation, IngestItem};

struct Job {
    operation_id: String,
    agent_id: String,
    items: Vec<IngestItem>,
    document_id: Option<String>,
}

pub struct TaskQueue {
    pool: Pool,
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    /// Spawn the worker pool. Each worker pulls jobs off a shared receiver
    /// and runs them through the ingestion pipeline.
    pub fn start(pool: Pool, ingestor: Arc<Ingestor>, cfg: &TasksConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..cfg.workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let ingestor = ingestor.clone();
                tokio::spawn(run_worker(worker_id, rx, ingestor))
            })
            .collect();

        Self {
            pool,
            tx: Some(tx),
            workers,
        }
    }

    /// Record the operation and hand it to a worker. Returns the operation
    /// id once the ledger row is durable and the job is queued.
    pub async fn enqueue(
        &self,
        agent_id: &str,
        task_type: &str,
        items: Vec<IngestItem>,
        document_id: Option<String>,
    ) -> Result<String> {
        let tx = self.tx.as_ref().ok_or(MemoryError::TaskQueueClosed)?;

        let operation = AsyncOperation {
            id: uuid::Uuid::now_v7().to_string(),
            agent_id: agent_id.to_string(),
            task_type: task_type.to_string(),
            items_count: items.len() as u32,
            document_id: document_id.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let conn = self.pool.acquire().await?;
        let row = operation.clone();
        task::spawn_blocking(move || insert_operation(&conn, &row)).await??;

        let job = Job {
            operation_id: operation.id.clone(),
            agent_id: operation.agent_id.clone(),
            items,
            document_id,
        };
        // The ledger row outlives a failed send; a recorded operation that
        // never ran is the same state a crash before pickup leaves behind.
        tx.send(job).await.map_err(|_| MemoryError::TaskQueueClosed)?;

        tracing::debug!(
            agent = agent_id,
            operation = %operation.id,
            task_type,
            "operation queued"
        );
        Ok(operation.id)
    }

    pub async fn get_operation(&self, operation_id: &str) -> Result<AsyncOperation> {
        let conn = self.pool.acquire().await?;
        let id = operation_id.to_string();
        task::spawn_blocking(move || get_operation(&conn, &id)).await?
    }

    pub async fn list_operations(&self, agent_id: &str, limit: u32) -> Result<Vec<AsyncOperation>> {
        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        task::spawn_blocking(move || list_operations(&conn, &agent, limit)).await?
    }

    /// Close the queue and wait for in-flight jobs to finish. Workers drain
    /// whatever is already queued before exiting.
    pub async fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("task worker join failed: {e}");
            }
        }
    }
}

async fn run_worker(worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, ingestor: Arc<Ingestor>) {
    loop {
        // Hold the lock only while waiting, not while running the job.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else { break };

        tracing::info!(
            worker = worker_id,
            operation = %job.operation_id,
            agent = %job.agent_id,
            "background ingest started"
        );
        match ingestor
            .ingest(&job.agent_id, job.items, job.document_id)
            .await
        {
            Ok(report) => tracing::info!(
                worker = worker_id,
                operation = %job.operation_id,
                facts = report.facts_created,
                links = report.links_created,
                failed = report.items_failed,
                "background ingest finished"
            ),
            Err(e) => tracing::error!(
                worker = worker_id,
                operation = %job.operation_id,
                "background ingest failed: {e}"
            ),
        }
    }
    tracing::debug!(worker = worker_id, "task worker stopped");
}

fn insert_operation(conn: &Connection, op: &AsyncOperation) -> Result<()> {
    conn.execute(
        "INSERT INTO async_operations (id, agent_id, task_type, items_count, document_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            op.id,
            op.agent_id,
            op.task_type,
            op.items_count,
            op.document_id,
            op.created_at
        ],
    )?;
    Ok(())
}

pub fn get_operation(conn: &Connection, operation_id: &str) -> Result<AsyncOperation> {
    conn.query_row(
        "SELECT id, agent_id, task_type, items_count, document_id, created_at \
         FROM async_operations WHERE id = ?1",
        params![operation_id],
        row_to_operation,
    )
    .optional()?
    .ok_or_else(|| MemoryError::NotFound {
        kind: "operation",
        id: operation_id.to_string(),
    })
}

/// Ledger rows for one agent, most recent first.
pub fn list_operations(conn: &Connection, agent_id: &str, limit: u32) -> Result<Vec<AsyncOperation>> {
    let mut stmt = conn.prepare(
        "SELECT id, agent_id, task_type, items_count, document_id, created_at \
         FROM async_operations WHERE agent_id = ?1 \
         ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let ops = stmt
        .query_map(params![agent_id, limit], row_to_operation)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ops)
}

fn row_to_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<AsyncOperation> {
    Ok(AsyncOperation {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        task_type: row.get(2)?,
        items_count: row.get(3)?,
        document_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}
