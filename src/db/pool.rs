//! Bounded SQLite connection pool.
//!
//! SQLite connections are cheap but not free, and WAL mode tolerates one
//! writer at a time, so the pool keeps between `pool_min_size` and
//! `pool_max_size` connections open. Acquisition at the cap waits on a
//! semaphore instead of failing. Connections hand out as RAII guards that
//! return to the idle set on drop.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{MemoryError, Result};

/// Cloneable handle to the shared pool.
#[derive(Clone)]
pub struct Pool {
    path: Arc<PathBuf>,
    idle: Arc<Mutex<Vec<Connection>>>,
    permits: Arc<Semaphore>,
}

impl Pool {
    /// Open a pool against the database at `path`.
    ///
    /// The first connection runs schema init and migrations; `min_size - 1`
    /// further connections are opened eagerly, the rest lazily up to
    /// `max_size`.
    pub fn open(path: impl AsRef<Path>, min_size: usize, max_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let max_size = max_size.max(1);
        let min_size = min_size.clamp(1, max_size);

        let first = super::open_database(&path)?;
        let mut idle = Vec::with_capacity(min_size);
        idle.push(first);
        for _ in 1..min_size {
            idle.push(super::open_connection(&path)?);
        }

        tracing::debug!(
            path = %path.display(),
            min = min_size,
            max = max_size,
            "connection pool ready"
        );

        Ok(Self {
            path: Arc::new(path),
            idle: Arc::new(Mutex::new(idle)),
            permits: Arc::new(Semaphore::new(max_size)),
        })
    }

    /// Acquire a connection, waiting if all `max_size` are checked out.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| MemoryError::StoreUnavailable {
                detail: "connection pool closed".into(),
            })?;

        let existing = self
            .idle
            .lock()
            .map_err(|_| MemoryError::Internal("pool mutex poisoned".into()))?
            .pop();

        let conn = match existing {
            Some(conn) => conn,
            // The permit guarantees total checked-out + idle stays under max.
            None => super::open_connection(self.path.as_ref())?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Path of the underlying database file.
    pub fn db_path(&self) -> &Path {
        self.path.as_ref()
    }
}

/// RAII guard around a checked-out connection.
pub struct PooledConnection {
    conn: Option<Connection>,
    idle: Arc<Mutex<Vec<Connection>>>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // On a poisoned mutex the connection is dropped; a later acquire
            // reopens one under the same permit accounting.
            if let Ok(mut idle) = self.idle.lock() {
                idle.push(conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pool(max: usize) -> (Pool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("pool.db"), 1, max).unwrap();
        (pool, dir)
    }

    #[tokio::test]
    async fn acquire_and_query() {
        let (pool, _dir) = temp_pool(2);
        let conn = pool.acquire().await.unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn connections_return_to_idle_set() {
        let (pool, _dir) = temp_pool(1);
        {
            let _conn = pool.acquire().await.unwrap();
        }
        // Second acquire must succeed because the first guard was dropped.
        let _conn = pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn acquire_blocks_at_capacity() {
        let (pool, _dir) = temp_pool(1);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _conn = pool.acquire().await.unwrap();
            })
        };

        // The waiter cannot finish while the only connection is held.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resume after release")
            .unwrap();
    }

    #[tokio::test]
    async fn pool_is_send_across_blocking_tasks() {
        let (pool, _dir) = temp_pool(2);
        let conn = pool.acquire().await.unwrap();
        let count: i64 = tokio::task::spawn_blocking(move || {
            conn.query_row("SELECT COUNT(*) FROM agents", [], |r| r.get(0))
                .unwrap()
        })
        .await
        .unwrap();
        assert_eq!(count, 0);
    }
}
