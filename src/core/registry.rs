//! # Subscription registry: pending queue plus active list.
//!
//! Shared between a [`Listener`](crate::Listener) and its background loop.
//!
//! ```text
//! subscribe() ──► push_pending() ──► pending (FIFO) ──► next_pending()  (loop only)
//!                                        │
//!                         declared ok ─► promote() ──► active (insertion order)
//! ```
//!
//! ## Rules
//! - A subscription is in exactly one of `pending` / `active` at any time.
//! - `next_pending` peeks; the head stays queued until `promote` moves it.
//!   A failed declaration therefore leaves it at the head for the next session.
//! - Any number of callers may push; only the listener loop peeks and promotes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::subscription::Subscription;

#[derive(Default)]
struct Lists {
    pending: VecDeque<Arc<Subscription>>,
    active: Vec<Arc<Subscription>>,
}

/// Pending and active subscriptions of one listener.
#[derive(Default)]
pub(crate) struct Registry {
    lists: Mutex<Lists>,
    notify: Notify,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends to the pending queue and wakes the loop.
    pub(crate) fn push_pending(&self, sub: Arc<Subscription>) {
        self.lock().pending.push_back(sub);
        self.notify.notify_one();
    }

    /// Appends several subscriptions, preserving their order.
    pub(crate) fn extend_pending(&self, subs: impl IntoIterator<Item = Arc<Subscription>>) {
        let mut lists = self.lock();
        let before = lists.pending.len();
        lists.pending.extend(subs);
        let added = lists.pending.len() > before;
        drop(lists);
        if added {
            self.notify.notify_one();
        }
    }

    /// Waits until the pending queue is non-empty and returns its head.
    pub(crate) async fn next_pending(&self) -> Arc<Subscription> {
        loop {
            let notified = self.notify.notified();
            let head = self.lock().pending.front().cloned();
            if let Some(head) = head {
                return head;
            }
            notified.await;
        }
    }

    /// Moves `sub` from the head of pending to the end of active.
    ///
    /// Returns `false` if `sub` is not the pending head.
    pub(crate) fn promote(&self, sub: &Arc<Subscription>) -> bool {
        let mut lists = self.lock();
        match lists.pending.front() {
            Some(head) if Arc::ptr_eq(head, sub) => {
                if let Some(head) = lists.pending.pop_front() {
                    lists.active.push(head);
                }
                true
            }
            _ => false,
        }
    }

    pub(crate) fn pending(&self) -> Vec<Arc<Subscription>> {
        self.lock().pending.iter().cloned().collect()
    }

    pub(crate) fn active(&self) -> Vec<Arc<Subscription>> {
        self.lock().active.clone()
    }

    /// True when there is nothing to listen for.
    pub(crate) fn is_empty(&self) -> bool {
        let lists = self.lock();
        lists.pending.is_empty() && lists.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionSpec;
    use std::time::Duration;

    fn sub(routing: &str) -> Arc<Subscription> {
        Subscription::new(SubscriptionSpec::new("ex", routing))
    }

    #[tokio::test]
    async fn head_stays_pending_until_promoted() {
        let reg = Registry::new();
        let a = sub("a");
        let b = sub("b");
        reg.push_pending(Arc::clone(&a));
        reg.push_pending(Arc::clone(&b));

        let head = reg.next_pending().await;
        assert!(Arc::ptr_eq(&head, &a));
        assert_eq!(reg.pending().len(), 2);

        assert!(!reg.promote(&b));
        assert!(reg.promote(&a));
        assert_eq!(reg.pending().len(), 1);
        assert_eq!(reg.active().len(), 1);
        assert!(Arc::ptr_eq(&reg.next_pending().await, &b));
    }

    #[tokio::test]
    async fn next_pending_wakes_on_push() {
        let reg = Registry::new();
        assert!(reg.is_empty());

        let waiter = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.next_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        reg.push_pending(sub("late"));

        let head = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.routing(), "late");
    }
}
