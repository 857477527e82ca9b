//! Per-conversation turn serialization.
//!
//! Two turns on the same conversation would race on its working context
//! and transcript, so each turn holds its conversation's lock from the
//! first read to the last write. Different conversations never contend.

use std::collections::HashMap;
use std::sync::Arc;

use forgepilot_core::message::ConversationId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Held until the guard is dropped.
    pub async fn acquire(&self, id: &ConversationId) -> OwnedMutexGuard<()> {
        self.lock_for(id).await.lock_owned().await
    }

    /// Exclusive access to `id` if nobody holds it right now.
    pub async fn try_acquire(&self, id: &ConversationId) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(id).await.try_lock_owned().ok()
    }

    async fn lock_for(&self, id: &ConversationId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Forget locks nobody holds or waits on
        locks.retain(|key, lock| key == id || Arc::strong_count(lock) > 1);
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Whether a turn is currently running on `id`.
    pub async fn is_busy(&self, id: &ConversationId) -> bool {
        let locks = self.locks.lock().await;
        locks.get(id).is_some_and(|lock| lock.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_conversation_is_serialized() {
        let locks = Arc::new(ConversationLocks::new());
        let id = ConversationId::from("c1");

        let guard = locks.acquire(&id).await;
        assert!(locks.is_busy(&id).await);

        let waiter = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_busy(&id).await);
    }

    #[tokio::test]
    async fn try_acquire_refuses_a_held_conversation() {
        let locks = ConversationLocks::new();
        let id = ConversationId::from("c1");

        let held = locks.acquire(&id).await;
        assert!(locks.try_acquire(&id).await.is_none());
        drop(held);

        let guard = locks.try_acquire(&id).await;
        assert!(guard.is_some());
        assert!(locks.is_busy(&id).await);
    }

    #[tokio::test]
    async fn different_conversations_do_not_contend() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire(&ConversationId::from("a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&ConversationId::from("b")),
        )
        .await;
        assert!(b.is_ok());
    }
}
