use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct ObligationLocks {
    slots: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ObligationLocks {
    pub async fn acquire(&self, obligation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(obligation_id).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn forget(&self, obligation_id: Uuid) {
        self.slots.lock().await.remove(&obligation_id);
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_obligation_is_exclusive_and_others_are_not() {
        let locks = Arc::new(ObligationLocks::default());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let held = locks.acquire(first).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(first).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let _other = locks.acquire(second).await;
        assert_eq!(locks.len().await, 2);

        drop(held);
        contender.await.unwrap();

        locks.forget(first).await;
        assert_eq!(locks.len().await, 1);
    }
}
