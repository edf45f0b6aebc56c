//! Presence map, case rooms and point-to-point delivery.
//!
//! Each connected identity owns one bounded channel. Delivery never waits:
//! a full channel drops the event and an absent identity receives nothing.
//! Clients that miss pushes catch up through polling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vetline_core::{Caller, Role};

use crate::events::{room_name, HubEvent};
use crate::fanout::{Envelope, RedisFanout, Target};

/// A live connection's delivery channel
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub connection_id: u64,
    pub role: Role,
    pub sender: mpsc::Sender<HubEvent>,
    pub connected_at: DateTime<Utc>,
}

/// Receiving side handed to the socket task on connect
#[derive(Debug)]
pub struct Subscription {
    pub user_id: String,
    pub connection_id: u64,
    pub receiver: mpsc::Receiver<HubEvent>,
}

pub struct NotificationHub {
    instance_id: String,
    presence: DashMap<String, PresenceEntry>,
    /// Room name -> member identities
    rooms: DashMap<String, HashSet<String>>,
    capacity: usize,
    next_connection: AtomicU64,
    fanout: Option<Arc<RedisFanout>>,
}

impl NotificationHub {
    /// Process-local hub with `capacity` buffered events per connection
    pub fn new(capacity: usize) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            presence: DashMap::new(),
            rooms: DashMap::new(),
            capacity: capacity.max(1),
            next_connection: AtomicU64::new(1),
            fanout: None,
        }
    }

    /// Hub that mirrors deliveries and presence through Redis
    pub fn with_fanout(capacity: usize, fanout: Arc<RedisFanout>) -> Self {
        Self {
            instance_id: fanout.instance_id().to_string(),
            fanout: Some(fanout),
            ..Self::new(capacity)
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn fanout(&self) -> Option<&Arc<RedisFanout>> {
        self.fanout.as_ref()
    }

    /// Register a connection for `caller`, replacing any previous one.
    pub fn connect(&self, caller: &Caller) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);

        let previous = self.presence.insert(
            caller.user_id.clone(),
            PresenceEntry {
                connection_id,
                role: caller.role,
                sender,
                connected_at: Utc::now(),
            },
        );
        debug!(
            user_id = %caller.user_id,
            connection_id,
            replaced = previous.is_some(),
            "Client connected"
        );

        if let Some(fanout) = &self.fanout {
            let fanout = Arc::clone(fanout);
            let user_id = caller.user_id.clone();
            tokio::spawn(async move {
                if let Err(e) = fanout.mark_online(&user_id).await {
                    warn!(user_id = %user_id, error = %e, "Failed to publish presence");
                }
            });
        }

        Subscription {
            user_id: caller.user_id.clone(),
            connection_id,
            receiver,
        }
    }

    /// Drop the presence entry if it still belongs to `connection_id`.
    ///
    /// Returns `false` when a newer connection has taken over.
    pub fn disconnect(&self, user_id: &str, connection_id: u64) -> bool {
        let removed = self
            .presence
            .remove_if(user_id, |_, entry| entry.connection_id == connection_id)
            .is_some();
        if !removed {
            return false;
        }

        self.rooms.retain(|_, members| {
            members.remove(user_id);
            !members.is_empty()
        });
        debug!(user_id, connection_id, "Client disconnected");

        if let Some(fanout) = &self.fanout {
            let fanout = Arc::clone(fanout);
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = fanout.mark_offline(&user_id).await {
                    warn!(user_id = %user_id, error = %e, "Failed to clear presence");
                }
            });
        }
        true
    }

    /// Whether `user_id` has a socket on this instance
    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.contains_key(user_id)
    }

    /// Whether `user_id` has a socket on this or any other instance
    pub async fn is_reachable(&self, user_id: &str) -> bool {
        if self.is_online(user_id) {
            return true;
        }
        match &self.fanout {
            Some(fanout) => fanout.is_online(user_id).await.unwrap_or_else(|e| {
                warn!(user_id, error = %e, "Presence lookup failed");
                false
            }),
            None => false,
        }
    }

    pub fn online_count(&self) -> usize {
        self.presence.len()
    }

    pub fn presence(&self, user_id: &str) -> Option<PresenceEntry> {
        self.presence.get(user_id).map(|entry| entry.clone())
    }

    /// Add a connected identity to a case room. Returns `false` if not connected.
    pub fn join_room(&self, user_id: &str, case_id: &str) -> bool {
        if !self.is_online(user_id) {
            return false;
        }
        self.rooms
            .entry(room_name(case_id))
            .or_default()
            .insert(user_id.to_string());
        debug!(user_id, case_id, "Joined case room");
        true
    }

    pub fn leave_room(&self, user_id: &str, case_id: &str) -> bool {
        let room = room_name(case_id);
        let removed = match self.rooms.get_mut(&room) {
            Some(mut members) => members.remove(user_id),
            None => false,
        };
        self.rooms.remove_if(&room, |_, members| members.is_empty());
        removed
    }

    /// Members of a case room, sorted
    pub fn room_members(&self, case_id: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .rooms
            .get(&room_name(case_id))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    fn deliver_local(&self, user_id: &str, event: HubEvent) -> bool {
        let (connection_id, sender) = match self.presence.get(user_id) {
            Some(entry) => (entry.connection_id, entry.sender.clone()),
            None => return false,
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(user_id, event = event.name(), "Delivery channel full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                // the socket task is gone; release presence and rooms with it
                self.disconnect(user_id, connection_id);
                false
            }
        }
    }

    fn deliver_room_local(&self, room: &str, event: &HubEvent) -> usize {
        let members: Vec<String> = match self.rooms.get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };
        members
            .iter()
            .filter(|member| self.deliver_local(member, event.clone()))
            .count()
    }

    async fn publish(&self, target: Target, event: &HubEvent) {
        if let Some(fanout) = &self.fanout {
            let envelope = Envelope {
                origin: self.instance_id.clone(),
                target,
                event: event.clone(),
            };
            if let Err(e) = fanout.publish(&envelope).await {
                warn!(event = event.name(), error = %e, "Fan-out publish failed");
            }
        }
    }

    /// Deliver to one identity. Returns whether a local socket accepted it.
    pub async fn send_to(&self, user_id: &str, event: HubEvent) -> bool {
        self.publish(Target::User(user_id.to_string()), &event).await;
        self.deliver_local(user_id, event)
    }

    /// Deliver to every member of a case room. Returns local deliveries.
    pub async fn broadcast_room(&self, case_id: &str, event: HubEvent) -> usize {
        let room = room_name(case_id);
        self.publish(Target::Room(room.clone()), &event).await;
        self.deliver_room_local(&room, &event)
    }

    /// Deliver to every responder connected to this instance for which
    /// `event_for` yields an event. Returns local deliveries.
    pub fn broadcast_responders<F>(&self, event_for: F) -> usize
    where
        F: Fn(&str) -> Option<HubEvent>,
    {
        let targets: Vec<(String, HubEvent)> = self
            .presence
            .iter()
            .filter(|entry| entry.role == Role::Responder)
            .filter_map(|entry| event_for(entry.key()).map(|event| (entry.key().clone(), event)))
            .collect();
        targets
            .into_iter()
            .filter(|(user_id, event)| self.deliver_local(user_id, event.clone()))
            .count()
    }

    /// Replay an envelope published by another instance. Returns local deliveries.
    pub fn apply_remote(&self, envelope: Envelope) -> usize {
        if envelope.origin == self.instance_id {
            return 0;
        }
        match envelope.target {
            Target::User(user_id) => usize::from(self.deliver_local(&user_id, envelope.event)),
            Target::Room(room) => self.deliver_room_local(&room, &envelope.event),
        }
    }

    /// Periodically re-publish presence of local connections so the TTL keys stay alive.
    pub fn spawn_presence_refresher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let fanout = Arc::clone(self.fanout.as_ref()?);
        let hub = Arc::clone(self);
        let every = (fanout.presence_ttl() / 2).max(Duration::from_secs(1));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let users: Vec<String> = hub.presence.iter().map(|e| e.key().clone()).collect();
                for user_id in users {
                    if let Err(e) = fanout.mark_online(&user_id).await {
                        warn!(user_id = %user_id, error = %e, "Presence refresh failed");
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(case_id: &str) -> HubEvent {
        HubEvent::DistressCancelled {
            distress_id: case_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_to_connected_user() {
        let hub = NotificationHub::new(8);
        let mut sub = hub.connect(&Caller::reporter("alice"));

        assert!(hub.send_to("alice", cancelled("c1")).await);
        assert_eq!(sub.receiver.recv().await, Some(cancelled("c1")));

        assert!(!hub.send_to("bob", cancelled("c1")).await);
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_new_connection() {
        let hub = NotificationHub::new(8);
        let old = hub.connect(&Caller::responder("vet-a"));
        let mut new = hub.connect(&Caller::responder("vet-a"));

        assert!(!hub.disconnect("vet-a", old.connection_id));
        assert!(hub.is_online("vet-a"));
        assert!(hub.send_to("vet-a", cancelled("c1")).await);
        assert!(new.receiver.recv().await.is_some());

        assert!(hub.disconnect("vet-a", new.connection_id));
        assert!(!hub.is_online("vet-a"));
    }

    #[tokio::test]
    async fn test_full_channel_drops() {
        let hub = NotificationHub::new(1);
        let mut sub = hub.connect(&Caller::reporter("alice"));

        assert!(hub.send_to("alice", cancelled("c1")).await);
        assert!(!hub.send_to("alice", cancelled("c2")).await);

        assert_eq!(sub.receiver.recv().await, Some(cancelled("c1")));
        assert!(sub.receiver.try_recv().is_err());
        assert!(hub.is_online("alice"));
    }

    #[tokio::test]
    async fn test_closed_receiver_clears_presence_and_rooms() {
        let hub = NotificationHub::new(4);
        let sub = hub.connect(&Caller::reporter("alice"));
        assert!(hub.join_room("alice", "c1"));
        drop(sub);

        assert!(!hub.send_to("alice", cancelled("c1")).await);
        assert!(!hub.is_online("alice"));
        assert!(hub.room_members("c1").is_empty());

        // reconnecting does not bring back the old membership
        let mut again = hub.connect(&Caller::reporter("alice"));
        assert_eq!(hub.broadcast_room("c1", cancelled("c1")).await, 0);
        assert!(again.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rooms() {
        let hub = NotificationHub::new(8);
        let mut alice = hub.connect(&Caller::reporter("alice"));
        let mut vet = hub.connect(&Caller::responder("vet-a"));
        let _other = hub.connect(&Caller::responder("vet-b"));

        assert!(!hub.join_room("ghost", "c1"));
        assert!(hub.join_room("alice", "c1"));
        assert!(hub.join_room("vet-a", "c1"));
        assert_eq!(hub.room_members("c1"), vec!["alice", "vet-a"]);

        assert_eq!(hub.broadcast_room("c1", cancelled("c1")).await, 2);
        assert!(alice.receiver.recv().await.is_some());
        assert!(vet.receiver.recv().await.is_some());

        assert!(hub.leave_room("alice", "c1"));
        assert!(!hub.leave_room("alice", "c1"));
        assert_eq!(hub.broadcast_room("c1", cancelled("c1")).await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_all_rooms() {
        let hub = NotificationHub::new(8);
        let sub = hub.connect(&Caller::reporter("alice"));
        hub.join_room("alice", "c1");
        hub.join_room("alice", "c2");

        hub.disconnect("alice", sub.connection_id);
        assert!(hub.room_members("c1").is_empty());
        assert!(hub.room_members("c2").is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_responders_selects_recipients() {
        let hub = NotificationHub::new(8);
        let _reporter = hub.connect(&Caller::reporter("alice"));
        let mut a = hub.connect(&Caller::responder("vet-a"));
        let mut b = hub.connect(&Caller::responder("vet-b"));

        let delivered =
            hub.broadcast_responders(|id| (id == "vet-a").then(|| cancelled("c1")));
        assert_eq!(delivered, 1);
        assert_eq!(a.receiver.try_recv().ok(), Some(cancelled("c1")));
        assert!(b.receiver.try_recv().is_err());

        // reporters never match, whatever the selector says
        assert_eq!(hub.broadcast_responders(|id| Some(cancelled(id))), 2);
        assert_eq!(b.receiver.try_recv().ok(), Some(cancelled("vet-b")));
    }

    #[tokio::test]
    async fn test_apply_remote_skips_own_envelopes() {
        let hub = NotificationHub::new(8);
        let mut sub = hub.connect(&Caller::reporter("alice"));
        hub.join_room("alice", "c1");

        let own = Envelope {
            origin: hub.instance_id().to_string(),
            target: Target::User("alice".to_string()),
            event: cancelled("c1"),
        };
        assert_eq!(hub.apply_remote(own), 0);

        let remote_room = Envelope {
            origin: "other-node".to_string(),
            target: Target::Room(room_name("c1")),
            event: cancelled("c1"),
        };
        assert_eq!(hub.apply_remote(remote_room), 1);
        assert_eq!(sub.receiver.recv().await, Some(cancelled("c1")));
    }

    #[tokio::test]
    async fn test_reachability_without_fanout_is_local() {
        let hub = NotificationHub::new(8);
        let _sub = hub.connect(&Caller::responder("vet-a"));
        assert!(hub.is_reachable("vet-a").await);
        assert!(!hub.is_reachable("vet-b").await);
        assert!(hub.presence("vet-a").is_some_and(|p| p.role == Role::Responder));
    }
}
