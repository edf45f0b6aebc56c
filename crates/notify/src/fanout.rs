//! Cross-instance delivery over Redis pub/sub.
//!
//! Every delivery is published as an [`Envelope`] on a shared channel.
//! Each instance replays envelopes from other instances to its own sockets.
//! Presence is mirrored into `vetline:presence:{user}` keys with a TTL.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::HubEvent;
use crate::hub::NotificationHub;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Envelope encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Who a published event is for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    User(String),
    Room(String),
}

/// A delivery as seen on the shared channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Instance that published the envelope
    pub origin: String,
    pub target: Target,
    pub event: HubEvent,
}

pub struct RedisFanout {
    client: redis::Client,
    publisher: MultiplexedConnection,
    channel: String,
    presence_ttl: Duration,
    instance_id: String,
}

impl RedisFanout {
    pub async fn connect(
        url: &str,
        channel: impl Into<String>,
        presence_ttl: Duration,
    ) -> Result<Self, FanoutError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        let instance_id = uuid::Uuid::new_v4().to_string();
        let channel = channel.into();

        info!(channel = %channel, instance_id = %instance_id, "Connected notification fan-out");

        Ok(Self {
            client,
            publisher,
            channel,
            presence_ttl,
            instance_id,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn presence_ttl(&self) -> Duration {
        self.presence_ttl
    }

    fn presence_key(user_id: &str) -> String {
        format!("vetline:presence:{}", user_id)
    }

    pub async fn publish(&self, envelope: &Envelope) -> Result<(), FanoutError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.publisher.clone();
        redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn mark_online(&self, user_id: &str) -> Result<(), FanoutError> {
        let mut conn = self.publisher.clone();
        redis::cmd("SET")
            .arg(Self::presence_key(user_id))
            .arg(&self.instance_id)
            .arg("PX")
            .arg(self.presence_ttl.as_millis() as u64)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn mark_offline(&self, user_id: &str) -> Result<(), FanoutError> {
        let mut conn = self.publisher.clone();
        redis::cmd("DEL")
            .arg(Self::presence_key(user_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Whether any instance currently holds a socket for `user_id`
    pub async fn is_online(&self, user_id: &str) -> Result<bool, FanoutError> {
        let mut conn = self.publisher.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::presence_key(user_id))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    /// Replay envelopes from other instances into `hub`, resubscribing after failures.
    pub fn spawn_subscriber(self: &Arc<Self>, hub: Arc<NotificationHub>) -> JoinHandle<()> {
        let fanout = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match fanout.run_subscription(&hub).await {
                    Ok(()) => warn!(channel = %fanout.channel, "Fan-out subscription closed"),
                    Err(e) => warn!(channel = %fanout.channel, error = %e, "Fan-out subscription failed"),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
    }

    async fn run_subscription(&self, hub: &NotificationHub) -> Result<(), FanoutError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(&self.channel).await?;
        debug!(channel = %self.channel, "Subscribed to fan-out channel");

        let mut messages = std::pin::pin!(pubsub.on_message());
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Unreadable fan-out payload");
                    continue;
                }
            };
            match serde_json::from_str::<Envelope>(&payload) {
                Ok(envelope) => {
                    hub.apply_remote(envelope);
                }
                Err(e) => warn!(error = %e, "Malformed fan-out envelope"),
            }
        }
        Ok(())
    }
}
