use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tracks which chats have a turn in flight.
///
/// At most one turn per chat runs at a time; a [`TurnLease`] is held by the
/// producer task and releases the chat when dropped.
#[derive(Default)]
pub struct TurnRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for TurnRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TurnRegistry({} active)", lock(&self.active).len())
    }
}

impl TurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `chat_id`. Returns `None` if a turn is already running there.
    pub fn try_begin(&self, chat_id: &str) -> Option<TurnLease> {
        lock(&self.active).insert(chat_id.to_owned()).then(|| TurnLease {
            chat_id: chat_id.to_owned(),
            active: Arc::clone(&self.active),
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, chat_id: &str) -> bool {
        lock(&self.active).contains(chat_id)
    }
}

/// Proof that the holder owns the single in-flight turn of a chat.
#[derive(Debug)]
pub struct TurnLease {
    chat_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl TurnLease {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Drop for TurnLease {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.chat_id);
    }
}

// A panic while holding the set cannot leave it half-updated.
fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_turn_on_same_chat_is_refused() {
        let registry = TurnRegistry::new();
        let lease = registry.try_begin("a").expect("first lease");
        assert!(registry.try_begin("a").is_none());
        assert!(registry.try_begin("b").is_some(), "other chats are independent");
        assert_eq!(lease.chat_id(), "a");
    }

    #[test]
    fn dropping_the_lease_releases_the_chat() {
        let registry = TurnRegistry::new();
        let lease = registry.try_begin("a").unwrap();
        assert!(registry.is_active("a"));
        drop(lease);
        assert!(!registry.is_active("a"));
        assert!(registry.try_begin("a").is_some());
    }
}
