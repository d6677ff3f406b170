//! Plain command and subscriber connections to a Redis server.

use std::fmt;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{PubSubMessage, StoreError};
use crate::local_cache::Value;

fn client(addr: &str) -> Result<redis::Client, StoreError> {
    Ok(redis::Client::open(format!("redis://{addr}/"))?)
}

/// Multiplexed command connection; clones share one socket.
#[derive(Clone)]
pub struct RedisClient {
    addr: String,
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let conn = client(addr)?.get_multiplexed_async_connection().await?;
        tracing::debug!(addr, "connected");
        Ok(Self {
            addr: addr.to_string(),
            conn,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let value = conn.get::<_, Option<String>>(key).await?;
        Ok(value.map(Value::from))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.publish::<_, _, u64>(channel, message).await?)
    }

    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
        Ok(())
    }
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

type MessageStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// Dedicated connection in subscriber mode.
pub struct RedisSubscriber {
    channel: String,
    messages: MessageStream,
}

impl RedisSubscriber {
    /// Connects and subscribes; returns once the server confirmed the
    /// subscription.
    pub async fn connect(addr: &str, channel: &str) -> Result<Self, StoreError> {
        let mut pubsub = client(addr)?.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tracing::debug!(addr, channel, "subscribed");
        Ok(Self {
            channel: channel.to_string(),
            messages: Box::pin(pubsub.into_on_message()),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next published message; `None` when the connection closed.
    ///
    /// Payloads are decoded lossily: a message that is not UTF-8 is still a
    /// message, and judging it is up to the receiver.
    pub async fn next_message(&mut self) -> Result<Option<PubSubMessage>, StoreError> {
        let Some(msg) = self.messages.next().await else {
            return Ok(None);
        };
        Ok(Some(PubSubMessage {
            channel: msg.get_channel_name().to_string(),
            payload: String::from_utf8_lossy(msg.get_payload_bytes()).into_owned(),
        }))
    }
}

impl fmt::Debug for RedisSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSubscriber")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
