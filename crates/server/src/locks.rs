use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per contact: turns for the same contact run one at a time,
/// different contacts run concurrently.
#[derive(Clone, Default)]
pub struct ContactLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ContactLocks {
    pub async fn acquire(&self, contact_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            locks.retain(|key, lock| key == contact_id || Arc::strong_count(lock) > 1);
            locks.entry(contact_id.to_owned()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::ContactLocks;

    #[tokio::test]
    async fn same_contact_is_serialized() {
        let locks = ContactLocks::default();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("wa-1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_contacts_do_not_block() {
        let locks = ContactLocks::default();
        let _first = locks.acquire("wa-1").await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.acquire("wa-2")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = ContactLocks::default();
        drop(locks.acquire("wa-1").await);
        drop(locks.acquire("wa-2").await);
        assert_eq!(locks.len().await, 1);
    }
}
