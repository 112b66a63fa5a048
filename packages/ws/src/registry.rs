//! Tracking of active subscription entries.
//!
//! The registry is the client-side source of truth for what the server should
//! consider subscribed: the union of every live entry's uids, per resource
//! type. [`SubscriptionRegistry::remove`] computes the uids orphaned by a
//! removal so a uid still wanted by another entry is never unsubscribed
//! prematurely, and [`SubscriptionRegistry::replay_frames`] re-syncs the
//! server after a reconnect.

use std::collections::BTreeSet;
use std::sync::Arc;

use modelboard_models::ResourceType;
use serde_json::Value;

use crate::models::OutboundMessage;

/// Callback invoked with an entity payload when a matching event arrives.
pub type ResourceCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle identifying a subscription entry for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A single consumer's interest in a set of entities.
struct SubscriptionEntry {
    id: SubscriptionId,
    resource_type: ResourceType,
    uids: BTreeSet<String>,
    callback: ResourceCallback,
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("uids", &self.uids)
            .finish_non_exhaustive()
    }
}

/// All active subscription entries, in insertion order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<SubscriptionEntry>,
    next_id: u64,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Adds an entry and returns its id along with the `subscribe` frame to
    /// send for it.
    pub fn add(
        &mut self,
        resource_type: ResourceType,
        uids: impl IntoIterator<Item = String>,
        callback: ResourceCallback,
    ) -> (SubscriptionId, OutboundMessage) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let uids: BTreeSet<String> = uids.into_iter().collect();
        let frame = OutboundMessage::subscribe(resource_type, uids.iter().cloned().collect());

        self.entries.push(SubscriptionEntry {
            id,
            resource_type,
            uids,
            callback,
        });

        (id, frame)
    }

    /// Removes an entry and returns the `unsubscribe` frame for the uids no
    /// longer referenced by any remaining entry of the same resource type.
    ///
    /// Returns `None` if the id is unknown or every removed uid is still
    /// wanted by another entry.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<OutboundMessage> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let removed = self.entries.remove(index);

        let still_wanted = self.uid_union(removed.resource_type);
        let orphaned: Vec<String> = removed
            .uids
            .into_iter()
            .filter(|uid| !still_wanted.contains(uid.as_str()))
            .collect();

        if orphaned.is_empty() {
            None
        } else {
            Some(OutboundMessage::unsubscribe(
                removed.resource_type,
                orphaned,
            ))
        }
    }

    /// Returns one `subscribe` frame per live entry, in insertion order.
    ///
    /// Sent after every reconnect so server-side state matches client-side
    /// intent after a connection reset.
    #[must_use]
    pub fn replay_frames(&self) -> Vec<OutboundMessage> {
        self.entries
            .iter()
            .map(|entry| {
                OutboundMessage::subscribe(
                    entry.resource_type,
                    entry.uids.iter().cloned().collect(),
                )
            })
            .collect()
    }

    /// Returns the callbacks registered for the given entity, in insertion
    /// order.
    #[must_use]
    pub fn matching_callbacks(
        &self,
        resource_type: ResourceType,
        uid: &str,
    ) -> Vec<ResourceCallback> {
        self.entries
            .iter()
            .filter(|entry| entry.resource_type == resource_type && entry.uids.contains(uid))
            .map(|entry| entry.callback.clone())
            .collect()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn uid_union(&self, resource_type: ResourceType) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.resource_type == resource_type)
            .flat_map(|entry| entry.uids.iter().map(String::as_str))
            .collect()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}
