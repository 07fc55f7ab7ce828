//! Prepaid balance accounting.
//!
//! One balance per conversation, denominated in sats. Debits are conditional
//! atomic subtractions: a debit that would overdraw the balance is rejected
//! and leaves it untouched. Mutations serialize per conversation key, not
//! globally, so unrelated conversations never contend.
//!
//! The storage behind the ledger is pluggable through [`BalanceStore`],
//! whose single primitive is the atomic conditional update; a document store
//! with conditional writes or a relational row update both satisfy it.
//! [`MemoryBalanceStore`] is the in-process implementation.

use crate::types::ConversationId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Result of a debit attempt. Never an error: insufficient funds is an
/// expected outcome the caller turns into a "fund required" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebitOutcome {
    /// Whether the debit was applied
    pub ok: bool,

    /// Balance after the call (unchanged when `ok` is false)
    pub remaining: u64,
}

/// Predicate over the current balance, deciding whether a mutation applies.
pub type BalancePredicate<'a> = &'a (dyn Fn(u64) -> bool + Send + Sync);

/// Mutation producing the new balance from the current one.
pub type BalanceMutation<'a> = &'a (dyn Fn(u64) -> u64 + Send + Sync);

/// Storage abstraction for per-conversation balances.
///
/// `update_if` must be atomic per key: between the predicate evaluation and
/// the mutation no other writer may observe or change the balance.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Returns the balance for `key`, creating the record on first contact.
    async fn get(&self, key: &ConversationId) -> u64;

    /// Applies `mutation` if `predicate` holds for the current balance.
    ///
    /// Returns `(applied, resulting_balance)`.
    async fn update_if(
        &self,
        key: &ConversationId,
        predicate: BalancePredicate<'_>,
        mutation: BalanceMutation<'_>,
    ) -> (bool, u64);
}

/// In-process balance store.
///
/// Each conversation owns its own mutex; the outer map lock is only taken to
/// locate or create an entry, never held across a balance mutation.
pub struct MemoryBalanceStore {
    entries: RwLock<HashMap<ConversationId, Arc<Mutex<u64>>>>,
    provision_default: u64,
}

impl MemoryBalanceStore {
    /// Creates a store where unknown conversations start at zero.
    pub fn new() -> Self {
        Self::with_provisioned_default(0)
    }

    /// Creates a store that seeds each conversation's first record with
    /// `sats` (applied exactly once, at record creation).
    pub fn with_provisioned_default(sats: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            provision_default: sats,
        }
    }

    async fn entry(&self, key: &ConversationId) -> Arc<Mutex<u64>> {
        if let Some(entry) = self.entries.read().await.get(key) {
            return entry.clone();
        }
        let mut entries = self.entries.write().await;
        entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(self.provision_default)))
            .clone()
    }
}

impl Default for MemoryBalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn get(&self, key: &ConversationId) -> u64 {
        *self.entry(key).await.lock().await
    }

    async fn update_if(
        &self,
        key: &ConversationId,
        predicate: BalancePredicate<'_>,
        mutation: BalanceMutation<'_>,
    ) -> (bool, u64) {
        let entry = self.entry(key).await;
        let mut balance = entry.lock().await;
        if predicate(*balance) {
            *balance = mutation(*balance);
            (true, *balance)
        } else {
            (false, *balance)
        }
    }
}

/// The prepaid ledger: debits on usage, credits on confirmed payment.
pub struct BalanceLedger {
    store: Arc<dyn BalanceStore>,
}

impl BalanceLedger {
    /// Creates a ledger over the given store.
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self { store }
    }

    /// Creates a ledger over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBalanceStore::new()))
    }

    /// Returns the balance for a conversation; 0 for ids never seen.
    pub async fn get_balance(&self, conversation: &ConversationId) -> u64 {
        self.store.get(conversation).await
    }

    /// Atomically reduces the balance if and only if it covers `amount`.
    pub async fn debit(&self, conversation: &ConversationId, amount: u64) -> DebitOutcome {
        let (ok, remaining) = self
            .store
            .update_if(conversation, &|balance| balance >= amount, &|balance| {
                balance - amount
            })
            .await;
        debug!(conversation = %conversation, amount, ok, remaining, "debit");
        DebitOutcome { ok, remaining }
    }

    /// Atomically increases the balance. Always succeeds; returns the new
    /// balance.
    pub async fn credit(&self, conversation: &ConversationId, amount: u64) -> u64 {
        let (_, balance) = self
            .store
            .update_if(conversation, &|_| true, &|balance| {
                balance.saturating_add(amount)
            })
            .await;
        debug!(conversation = %conversation, amount, balance, "credit");
        balance
    }
}
