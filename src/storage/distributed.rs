//! Redis-backed session store.
//!
//! Redis owns expiry natively: values are written with a `PX` TTL and every
//! read runs `GET` + `PEXPIRE` inside one `MULTI`/`EXEC` transaction, so other
//! clients never observe the read without the refresh (or a refresh that
//! recreates a key another client just deleted; `PEXPIRE` on a missing key is
//! a no-op).

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use redis::{Client, Connection, RedisError};

use super::{SessionStore, StoreError};
use crate::tokens::SessionId;

/// Prefix keeping session keys apart from anything else in the same database
const KEY_PREFIX: &str = "sid:";

/// Upper bound on idle connections kept for reuse
const MAX_IDLE_CONNECTIONS: usize = 16;

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub struct RedisStore {
    client: Client,
    idle: Mutex<Vec<Connection>>,
    io_timeout: Duration,
    ttl: Duration,
}

impl RedisStore {
    /// Create a store for the server at `url` (e.g. `redis://cache:6379/`).
    ///
    /// No connection is made until the first operation.
    pub fn open(url: &str, ttl: Duration, io_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            idle: Mutex::new(Vec::new()),
            io_timeout,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn checkout(&self) -> Result<Connection, StoreError> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        if let Some(conn) = reused {
            return Ok(conn);
        }

        let conn = self.client.get_connection_with_timeout(self.io_timeout)?;
        conn.set_read_timeout(Some(self.io_timeout))?;
        conn.set_write_timeout(Some(self.io_timeout))?;
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    /// Run `op` on a pooled connection. Connections that hit a transport
    /// error are dropped instead of being returned to the pool.
    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut conn = match self.checkout() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to connect to Redis session store");
                return Err(e);
            }
        };
        match op(&mut conn) {
            Ok(value) => {
                self.checkin(conn);
                Ok(value)
            }
            Err(e) => {
                if !is_broken(&e) {
                    self.checkin(conn);
                }
                tracing::warn!(error = %e, "Redis session store operation failed");
                Err(e.into())
            }
        }
    }
}

fn is_broken(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_timeout() || e.is_connection_refusal()
}

fn redis_key(id: &SessionId) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Redis rejects a zero TTL, so sub-millisecond durations round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl SessionStore for RedisStore {
    fn save_raw(&self, id: &SessionId, blob: Vec<u8>) -> Result<(), StoreError> {
        let key = redis_key(id);
        let ttl = ttl_millis(self.ttl);
        self.with_connection(|conn| {
            redis::cmd("SET")
                .arg(&key)
                .arg(blob)
                .arg("PX")
                .arg(ttl)
                .query::<()>(conn)
        })
    }

    fn get_raw(&self, id: &SessionId) -> Result<Vec<u8>, StoreError> {
        let key = redis_key(id);
        let ttl = ttl_millis(self.ttl);
        let (blob, _refreshed): (Option<Vec<u8>>, i64) = self.with_connection(|conn| {
            redis::pipe()
                .atomic()
                .cmd("GET")
                .arg(&key)
                .cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl)
                .query(conn)
        })?;
        blob.ok_or(StoreError::NotFound)
    }

    fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let key = redis_key(id);
        self.with_connection(|conn| redis::cmd("DEL").arg(&key).query::<i64>(conn))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
