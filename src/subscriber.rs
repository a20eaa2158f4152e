use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Notifies an external consumer that one or more databases changed, without
/// ever blocking the publisher and without growing unbounded under a slow
/// consumer. Publishers insert into the dirty set and post a single,
/// non-blocking wake-up; the consumer drains the whole set on each wake-up.
pub struct Subscriber {
    dirty: Mutex<HashSet<String>>,
    notify: Notify,
}

impl Subscriber {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            dirty: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        })
    }

    /// Marks `name` dirty and wakes the consumer. Cheap: O(1) insert plus, at
    /// most, one non-blocking notify permit.
    pub(crate) fn mark_dirty(&self, name: &str) {
        let mut dirty = self.dirty.lock();
        dirty.insert(name.to_string());
        drop(dirty);
        self.notify.notify_one();
    }

    /// Waits for at least one dirty database, then returns.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Drains and returns the current dirty set, resetting it to empty.
    pub fn dirty_set(&self) -> HashSet<String> {
        std::mem::take(&mut *self.dirty.lock())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn coalesces_bursts_into_one_wakeup() {
        let sub = Subscriber::new();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let sub = Arc::clone(&sub);
            handles.push(tokio::spawn(async move {
                sub.mark_dirty("x");
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // At least one wake-up must have been posted; draining it should not
        // hang.
        tokio::time::timeout(std::time::Duration::from_secs(1), sub.notified())
            .await
            .expect("expected a wake-up");

        let set = sub.dirty_set();
        assert_eq!(set, HashSet::from(["x".to_string()]));
        assert!(sub.dirty_set().is_empty());
    }
}
