//! Push delivery for Vetline.
//!
//! [`NotificationHub`] tracks which identities hold a live socket, groups
//! them into per-case rooms and delivers [`HubEvent`]s best-effort. With a
//! [`RedisFanout`] attached, deliveries and presence are shared across
//! instances.

pub mod events;
pub mod fanout;
pub mod hub;

pub use events::{room_name, HubEvent};
pub use fanout::{Envelope, FanoutError, RedisFanout, Target};
pub use hub::{NotificationHub, PresenceEntry, Subscription};
