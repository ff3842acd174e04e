//! Serialization scopes used by the coordinator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

use mtp_core::{GlobalId, LedgerId};

type Key = (GlobalId, LedgerId);
type Slots = HashMap<Key, Arc<tokio::sync::Mutex<()>>>;

/// Per-(GlobalID, LedgerID) mutual exclusion for bookkeeping writes.
///
/// Unrelated accounts never contend. Guards must not be held across a
/// ledger adapter call. A slot lives only while someone holds or waits for
/// it, so the map is bounded by the number of in-flight bookings.
#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: Arc<Mutex<Slots>>,
}

/// Held scopes; released on drop.
#[derive(Debug)]
pub struct AccountGuards {
    slots: Arc<Mutex<Slots>>,
    guards: Vec<(Key, OwnedMutexGuard<()>)>,
}

fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    match slots.lock() {
        Ok(slots) => slots,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: Key) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock_slots(&self.slots).entry(key).or_default())
    }

    /// Acquire every scope in `keys`. Keys are taken in sorted order so two
    /// callers locking the same pair of accounts cannot deadlock.
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = Key>) -> AccountGuards {
        let mut keys: Vec<_> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut held = AccountGuards {
            slots: Arc::clone(&self.slots),
            guards: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let guard = self.slot(key).lock_owned().await;
            held.guards.push((key, guard));
        }
        held
    }

    /// Number of account scopes currently tracked.
    pub fn tracked(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

impl Drop for AccountGuards {
    fn drop(&mut self) {
        let released: Vec<Key> = self.guards.drain(..).map(|(key, _guard)| key).collect();
        let mut slots = lock_slots(&self.slots);
        for key in released {
            // Only the map still refers to it: nobody holds or awaits the slot.
            if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_account_is_serialized_other_accounts_are_not() {
        let locks = Arc::new(AccountLocks::new());
        let alice = (GlobalId::new(1), LedgerId::new(2));
        let bob = (GlobalId::new(2), LedgerId::new(2));

        let held = locks.lock_all([alice]).await;

        // A different account is free.
        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock_all([bob])).await;
        assert!(other.is_ok());

        let contended = tokio::time::timeout(Duration::from_millis(50), locks.lock_all([bob, alice])).await;
        assert!(contended.is_err());

        drop(held);
        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.lock_all([bob, alice])).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn released_scopes_are_forgotten() {
        let locks = Arc::new(AccountLocks::new());
        for id in 1..=50 {
            let _held = locks.lock_all([(GlobalId::new(id), LedgerId::new(2))]).await;
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn scope_with_a_waiter_is_kept_until_the_waiter_is_done() {
        let locks = Arc::new(AccountLocks::new());
        let alice = (GlobalId::new(1), LedgerId::new(2));

        let held = locks.lock_all([alice]).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _held = locks.lock_all([alice]).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        assert_eq!(locks.tracked(), 1, "the waiter still needs the slot");

        waiter.await.unwrap();
        assert_eq!(locks.tracked(), 0);
    }
}
