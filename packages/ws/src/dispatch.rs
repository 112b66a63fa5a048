//! Routing of inbound events to registered callbacks.

use std::sync::RwLock;

use modelboard_models::ResourceEvent;

use crate::registry::SubscriptionRegistry;

/// Invokes every callback registered for the event's resource type and uid,
/// in registry insertion order, passing the raw entity payload.
///
/// Events without a `uid`, or whose uid matches no entry, are dropped.
///
/// # Panics
///
/// * If the registry `RwLock` is poisoned
pub fn dispatch_event(registry: &RwLock<SubscriptionRegistry>, event: &ResourceEvent) {
    let Some(uid) = event.uid() else {
        log::trace!(
            "Dropping {} event without a uid",
            event.resource_type
        );
        return;
    };

    // Callbacks are cloned out so the lock is not held while they run and a
    // callback may subscribe or unsubscribe without deadlocking.
    let callbacks = registry
        .read()
        .unwrap()
        .matching_callbacks(event.resource_type, uid);

    if callbacks.is_empty() {
        log::trace!("No subscribers for {} uid={uid}", event.resource_type);
        return;
    }

    log::trace!(
        "Dispatching {} uid={uid} to {} subscriber(s)",
        event.resource_type,
        callbacks.len()
    );

    for callback in callbacks {
        callback(&event.payload);
    }
}
