//! Bounded connection pool.
//!
//! At most `max_size` connections are checked out at once (a tokio semaphore). Idle
//! connections are pinged before reuse and replaced through the `Connector` when the
//! ping fails. A `PooledConnection` returns its connection to the idle list on drop;
//! callers are expected to have committed or rolled back by then.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, DbError};

pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Conn, DbError>> + Send;
}

struct PoolInner<K: Connector> {
    connector: K,
    idle: parking_lot::Mutex<Vec<K::Conn>>,
    permits: Arc<Semaphore>,
    max_size: usize,
}

pub struct Pool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for Pool<K> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<K: Connector> Pool<K> {
    pub fn new(connector: K, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                connector,
                idle: parking_lot::Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(max_size)),
                max_size,
            }),
        }
    }

    pub fn max_size(&self) -> usize { self.inner.max_size }

    pub fn idle_count(&self) -> usize { self.inner.idle.lock().len() }

    pub fn connector(&self) -> &K { &self.inner.connector }

    /// Check out a live connection, waiting while the pool is exhausted.
    pub async fn get(&self) -> Result<PooledConnection<K>, DbError> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DbError::Connection("connection pool closed".into()))?;
        let reused = self.inner.idle.lock().pop();
        let conn = match reused {
            Some(mut conn) => match conn.ping().await {
                Ok(()) => conn,
                Err(e) => {
                    warn!(target: "datastore::pool", error = %e, "idle connection failed validation; reconnecting");
                    self.inner.connector.connect().await?
                }
            },
            None => {
                debug!(target: "datastore::pool", "opening new connection");
                self.inner.connector.connect().await?
            }
        };
        Ok(PooledConnection { conn: Some(conn), pool: self.inner.clone(), _permit: permit })
    }
}

pub struct PooledConnection<K: Connector> {
    conn: Option<K::Conn>,
    pool: Arc<PoolInner<K>>,
    _permit: OwnedSemaphorePermit,
}

impl<K: Connector> Deref for PooledConnection<K> {
    type Target = K::Conn;
    fn deref(&self) -> &K::Conn { self.conn.as_ref().expect("connection present until drop") }
}

impl<K: Connector> DerefMut for PooledConnection<K> {
    fn deref_mut(&mut self) -> &mut K::Conn { self.conn.as_mut().expect("connection present until drop") }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().push(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryDatabase;
    use std::time::Duration;

    #[tokio::test]
    async fn reuses_idle_connections() {
        let db = MemoryDatabase::new();
        let pool = Pool::new(db.connector(), 2);
        drop(pool.get().await.unwrap());
        drop(pool.get().await.unwrap());
        assert_eq!(db.connections_opened(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn broken_idle_connection_is_replaced() {
        let db = MemoryDatabase::new();
        let pool = Pool::new(db.connector(), 1);
        {
            let mut c = pool.get().await.unwrap();
            c.disconnect();
        }
        let mut c = pool.get().await.unwrap();
        c.ping().await.unwrap();
        assert_eq!(db.connections_opened(), 2);
    }

    #[tokio::test]
    async fn checkout_is_bounded() {
        let db = MemoryDatabase::new();
        let pool = Pool::new(db.connector(), 1);
        let held = pool.get().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(50), pool.get()).await;
        assert!(waiting.is_err());
        drop(held);
        assert!(tokio::time::timeout(Duration::from_millis(500), pool.get()).await.is_ok());
    }
}
