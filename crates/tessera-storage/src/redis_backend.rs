//! Redis storage backend.
//!
//! Talks to any server implementing the Redis protocol through a single
//! multiplexed connection. Hash writes that carry an expiry are pipelined
//! as a `MULTI`/`EXEC` transaction so the record never outlives its token
//! by more than the skew window.

use std::collections::VecDeque;

use futures::stream::StreamExt;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::{KeyStream, StorageBackend, StorageError};

/// A storage backend speaking the Redis protocol.
///
/// The underlying multiplexed connection is cheap to clone; every operation
/// clones it so the backend itself can be shared behind an `Arc` without
/// interior locking.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379/0`) and
    /// verify the connection with a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connect`] if the URL does not parse, the
    /// connection cannot be established, or the ping fails.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let connect_err = |reason: String| StorageError::Connect {
            url: url.to_owned(),
            reason,
        };

        let client = redis::Client::open(url).map_err(|e| connect_err(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        debug!(url, "connected to redis backend");
        Ok(Self { conn })
    }

    fn command_err(
        command: &'static str,
        key: &str,
        e: &redis::RedisError,
    ) -> StorageError {
        StorageError::Command {
            command,
            key: key.to_owned(),
            reason: e.to_string(),
        }
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedisBackend {
    async fn put_fields(
        &self,
        key: &str,
        fields: &[(&str, Vec<u8>)],
        expire_at: Option<i64>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        {
            let hset = pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                hset.arg(*field).arg(value.as_slice());
            }
            hset.ignore();
        }
        if let Some(at) = expire_at {
            pipe.cmd("EXPIREAT").arg(key).arg(at).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Self::command_err("HSET", key, &e))
    }

    async fn get_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let mut conn = self.conn.clone();
        redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_err("HMGET", key, &e))
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.conn.clone();
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_err("HGET", key, &e))
    }

    async fn put_field(&self, key: &str, field: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value.as_slice())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Self::command_err("HSET", key, &e))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let n: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_err("EXISTS", key, &e))?;
        Ok(n > 0)
    }

    async fn delete(&self, key: &str) -> Result<u64, StorageError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_err("DEL", key, &e))
    }

    async fn scan(&self, pattern: &str, page_size: u64) -> Result<KeyStream, StorageError> {
        struct Cursor {
            conn: MultiplexedConnection,
            pattern: String,
            page_size: u64,
            cursor: u64,
            buffer: VecDeque<String>,
            done: bool,
        }

        let state = Cursor {
            conn: self.conn.clone(),
            pattern: pattern.to_owned(),
            page_size,
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::try_unfold(state, |mut st| async move {
            loop {
                if let Some(key) = st.buffer.pop_front() {
                    return Ok(Some((key, st)));
                }
                if st.done {
                    return Ok(None);
                }

                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(st.cursor)
                    .arg("MATCH")
                    .arg(&st.pattern)
                    .arg("COUNT")
                    .arg(st.page_size)
                    .query_async(&mut st.conn)
                    .await
                    .map_err(|e| StorageError::Scan {
                        pattern: st.pattern.clone(),
                        reason: e.to_string(),
                    })?;

                st.cursor = next;
                st.done = next == 0;
                st.buffer.extend(keys);
            }
        });

        Ok(stream.boxed())
    }
}
