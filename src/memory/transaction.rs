//! Batched transaction nodes with commit/rollback lifecycle.

use crate::memory::error::ConfigError;
use crate::memory::slab::Slab;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle to an arena-owned transaction node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxRef(u32);

/// Handle to an arena-owned batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchRef(u32);

/// Lifecycle state of a [`TxRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Open, admits `commit`/`rollback`.
    Pending,
    /// Terminal: committed successfully.
    Committed,
    /// Terminal: rolled back.
    RolledBack,
    /// Terminal: failed outside the commit/rollback path.
    Failed,
}

struct TransactionNode {
    id: String,
    status: TransactionStatus,
    parent_batch: BatchRef,
    next: Option<TxRef>,
    prev: Option<TxRef>,
    #[allow(dead_code)]
    data: Vec<u8>,
}

struct BatchNode {
    capacity: usize,
    used: usize,
    first: Option<TxRef>,
    last: Option<TxRef>,
}

/// Configuration for a [`TransactionAllocator`]. All counts must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Maximum number of live transactions across all batches.
    pub max_transactions: usize,
    /// Maximum number of live batches.
    pub max_batches: usize,
    /// Transactions per batch.
    pub batch_size: usize,
    /// Size in bytes of each transaction's opaque tail payload.
    pub transaction_data_size: usize,
    /// Whether `rollback` is a legal transition (reserved for callers that
    /// want to disable it entirely; validated but not yet load-bearing on
    /// any operation below).
    pub enable_rollback: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            max_transactions: 1_000_000,
            max_batches: 1_000,
            batch_size: 1_000,
            transaction_data_size: 256,
            enable_rollback: true,
        }
    }
}

impl TransactionConfig {
    /// Validates that every count is non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_transactions == 0 {
            return Err(ConfigError::zero("max_transactions"));
        }
        if self.max_batches == 0 {
            return Err(ConfigError::zero("max_batches"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::zero("batch_size"));
        }
        Ok(())
    }
}

/// Occupancy/usage snapshot returned by [`TransactionAllocator::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransactionStats {
    /// Currently live transactions.
    pub active_transactions: usize,
    /// Currently live batches.
    pub active_batches: usize,
    /// Approximate bytes in use.
    pub total_memory_used: usize,
    /// High-water mark of `active_transactions`.
    pub peak_transactions: usize,
    /// Count of `rollback` calls that succeeded.
    pub rollbacks: usize,
    /// Count of batches ever allocated.
    pub batch_allocations: usize,
    /// (Σ batch.used / Σ batch.capacity) across active batches, or 0.0 if none.
    pub batch_utilization: f64,
}

/// Batched transaction allocator. Every mutating method takes `&mut self`;
/// the coordinator holds a single `Mutex<TransactionAllocator>` around it
/// (SPEC_FULL.md §5, "Rust lock granularity").
pub struct TransactionAllocator {
    config: TransactionConfig,
    transactions: Slab<TransactionNode>,
    batches: Slab<BatchNode>,
    active_batches: Vec<BatchRef>,
    transaction_map: HashMap<String, TxRef>,
    peak_transactions: usize,
    rollbacks: usize,
    batch_allocations: usize,
}

impl TransactionAllocator {
    /// Builds a `TransactionAllocator`, failing if any count is zero.
    pub fn new(config: TransactionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(TransactionAllocator {
            transactions: Slab::with_capacity(config.max_transactions),
            batches: Slab::with_capacity(config.max_batches),
            active_batches: Vec::new(),
            transaction_map: HashMap::new(),
            peak_transactions: 0,
            rollbacks: 0,
            batch_allocations: 0,
            config,
        })
    }

    /// Allocates a new batch with room for `batch_size` transactions, or
    /// `None` at batch capacity. `begin_transaction` calls this on demand;
    /// exposed directly since SPEC_FULL.md §6 names it on the testable
    /// external surface.
    pub fn allocate_batch(&mut self) -> Option<BatchRef> {
        let idx = self.batches.try_insert(BatchNode {
            capacity: self.config.batch_size,
            used: 0,
            first: None,
            last: None,
        })?;
        let batch = BatchRef(idx);
        self.active_batches.push(batch);
        self.batch_allocations += 1;
        Some(batch)
    }

    /// Releases a batch and drops it from the active-batch list. Callers are
    /// responsible for having already ended every transaction it held —
    /// `end()` calls this itself once a batch drains to zero.
    pub fn deallocate_batch(&mut self, batch: BatchRef) {
        self.active_batches.retain(|b| *b != batch);
        self.batches.remove(batch.0);
    }

    fn find_batch_with_space(&self) -> Option<BatchRef> {
        self.active_batches
            .iter()
            .copied()
            .find(|b| self.batches.get(b.0).is_some_and(|n| n.used < n.capacity))
    }

    /// Finds or allocates a batch with room, allocates a transaction node,
    /// links it to the batch tail. Returns `None` if transaction capacity is
    /// exhausted or no batch is available/allocatable.
    pub fn begin_transaction(&mut self) -> Option<TxRef> {
        if self.transactions.len() >= self.config.max_transactions {
            return None;
        }
        let batch = match self.find_batch_with_space() {
            Some(b) => b,
            None => self.allocate_batch()?,
        };

        let old_last = self.batches.get(batch.0)?.last;
        let idx = self.transactions.try_insert(TransactionNode {
            id: String::new(),
            status: TransactionStatus::Pending,
            parent_batch: batch,
            next: None,
            prev: old_last,
            data: vec![0u8; self.config.transaction_data_size],
        })?;
        let tx = TxRef(idx);

        if let Some(prev) = old_last {
            if let Some(prev_node) = self.transactions.get_mut(prev.0) {
                prev_node.next = Some(tx);
            }
        }
        let batch_node = self.batches.get_mut(batch.0).expect("batch exists");
        if batch_node.used == 0 {
            batch_node.first = Some(tx);
        }
        batch_node.last = Some(tx);
        batch_node.used += 1;

        self.peak_transactions = self.peak_transactions.max(self.transactions.len());
        Some(tx)
    }

    fn validate_pending(&self, tx: TxRef) -> bool {
        match self.transactions.get(tx.0) {
            Some(node) => {
                self.active_batches.contains(&node.parent_batch) && node.status == TransactionStatus::Pending
            }
            None => false,
        }
    }

    /// Transitions `tx` from Pending to Committed. Returns `false` (no state
    /// change) if `tx` is unknown, its batch is gone, or it is not Pending.
    pub fn commit(&mut self, tx: TxRef) -> bool {
        if !self.validate_pending(tx) {
            return false;
        }
        self.transactions.get_mut(tx.0).unwrap().status = TransactionStatus::Committed;
        true
    }

    /// Transitions `tx` from Pending to RolledBack, bumping `rollbacks`.
    pub fn rollback(&mut self, tx: TxRef) -> bool {
        if !self.validate_pending(tx) {
            return false;
        }
        self.transactions.get_mut(tx.0).unwrap().status = TransactionStatus::RolledBack;
        self.rollbacks += 1;
        true
    }

    /// Unregisters `tx`'s id, unlinks it from its batch, releases its
    /// storage and (if the batch is now empty) the batch's storage.
    pub fn end(&mut self, tx: TxRef) {
        let node = match self.transactions.get(tx.0) {
            Some(n) => n,
            None => return,
        };
        let (batch, prev, next) = (node.parent_batch, node.prev, node.next);
        if !node.id.is_empty() {
            self.transaction_map.remove(&node.id.clone());
        }

        if let Some(p) = prev {
            if let Some(pn) = self.transactions.get_mut(p.0) {
                pn.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(nn) = self.transactions.get_mut(n.0) {
                nn.prev = prev;
            }
        }

        let batch_empty = if let Some(batch_node) = self.batches.get_mut(batch.0) {
            if batch_node.first == Some(tx) {
                batch_node.first = next;
            }
            if batch_node.last == Some(tx) {
                batch_node.last = prev;
            }
            batch_node.used = batch_node.used.saturating_sub(1);
            batch_node.used == 0
        } else {
            false
        };

        self.transactions.remove(tx.0);
        if batch_empty {
            self.deallocate_batch(batch);
        }
    }

    /// Sets `tx.id` and inserts the reverse lookup entry.
    pub fn register_transaction(&mut self, id: impl Into<String>, tx: TxRef) {
        let id = id.into();
        if let Some(node) = self.transactions.get_mut(tx.0) {
            node.id = id.clone();
        }
        self.transaction_map.insert(id, tx);
    }

    /// Removes the reverse lookup entry for `id`.
    pub fn unregister_transaction(&mut self, id: &str) {
        self.transaction_map.remove(id);
    }

    /// Looks up the transaction registered under `id`.
    pub fn find_transaction(&self, id: &str) -> Option<TxRef> {
        self.transaction_map.get(id).copied()
    }

    /// Occupancy/usage snapshot.
    pub fn stats(&self) -> TransactionStats {
        let (used_sum, cap_sum) = self.active_batches.iter().fold((0usize, 0usize), |(u, c), b| {
            match self.batches.get(b.0) {
                Some(n) => (u + n.used, c + n.capacity),
                None => (u, c),
            }
        });
        let batch_utilization = if cap_sum == 0 {
            0.0
        } else {
            used_sum as f64 / cap_sum as f64
        };
        TransactionStats {
            active_transactions: self.transactions.len(),
            active_batches: self.batches.len(),
            total_memory_used: self.transactions.len() * self.config.transaction_data_size,
            peak_transactions: self.peak_transactions,
            rollbacks: self.rollbacks,
            batch_allocations: self.batch_allocations,
            batch_utilization,
        }
    }

    /// Ends every transaction and releases every batch; zeroes counters.
    pub fn reset(&mut self) {
        let ids: Vec<TxRef> = {
            let mut ids = Vec::new();
            for batch in self.active_batches.clone() {
                let mut cursor = self.batches.get(batch.0).and_then(|b| b.first);
                while let Some(tx) = cursor {
                    cursor = self.transactions.get(tx.0).and_then(|n| n.next);
                    ids.push(tx);
                }
            }
            ids
        };
        for tx in ids {
            self.end(tx);
        }
        self.active_batches.clear();
        self.transaction_map.clear();
        self.peak_transactions = 0;
        self.rollbacks = 0;
        self.batch_allocations = 0;
    }

    /// True iff both transaction and batch capacity remain.
    pub fn has_capacity(&self) -> bool {
        self.transactions.len() < self.config.max_transactions
            && (self.batches.len() < self.config.max_batches || self.find_batch_with_space().is_some())
    }
}

impl Drop for TransactionAllocator {
    fn drop(&mut self) {
        if !self.transactions.is_empty() {
            tracing::warn!(
                active_transactions = self.transactions.len(),
                "TransactionAllocator dropped with transactions still pending"
            );
        }
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_begin_register_commit_end() {
        let mut txs = TransactionAllocator::new(TransactionConfig::default()).unwrap();
        let tx = txs.begin_transaction().unwrap();
        txs.register_transaction("T1", tx);
        assert!(txs.commit(tx));
        txs.end(tx);

        assert_eq!(txs.stats().active_transactions, 0);
        assert_eq!(txs.find_transaction("T1"), None);
    }

    #[test]
    fn allocate_batch_and_deallocate_batch_are_directly_usable() {
        let mut txs = TransactionAllocator::new(TransactionConfig::default()).unwrap();
        let batch = txs.allocate_batch().unwrap();
        assert_eq!(txs.stats().active_batches, 1);
        txs.deallocate_batch(batch);
        assert_eq!(txs.stats().active_batches, 0);
    }

    #[test]
    fn committing_a_rolled_back_transaction_fails() {
        let mut txs = TransactionAllocator::new(TransactionConfig::default()).unwrap();
        let tx = txs.begin_transaction().unwrap();
        assert!(txs.rollback(tx));
        assert!(!txs.commit(tx));
    }

    #[test]
    fn batch_unlink_correctly_advances_first_and_last() {
        let mut txs = TransactionAllocator::new(TransactionConfig {
            batch_size: 3,
            ..TransactionConfig::default()
        })
        .unwrap();
        let a = txs.begin_transaction().unwrap();
        let b = txs.begin_transaction().unwrap();
        let c = txs.begin_transaction().unwrap();
        assert_eq!(txs.stats().active_transactions, 3);

        // End the middle transaction first: head/tail must be unaffected.
        txs.end(b);
        assert_eq!(txs.stats().active_transactions, 2);

        // End the (former) head: batch.first must actually advance.
        txs.end(a);
        assert_eq!(txs.stats().active_transactions, 1);

        // End the last remaining transaction: batch becomes empty and is released.
        txs.end(c);
        assert_eq!(txs.stats().active_transactions, 0);
        assert_eq!(txs.stats().active_batches, 0);
    }

    #[test]
    fn sum_of_batch_used_equals_active_transactions() {
        let mut txs = TransactionAllocator::new(TransactionConfig {
            batch_size: 2,
            ..TransactionConfig::default()
        })
        .unwrap();
        for _ in 0..5 {
            txs.begin_transaction().unwrap();
        }
        let stats = txs.stats();
        assert_eq!(stats.active_transactions, 5);
        assert!(stats.batch_utilization > 0.0);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut txs = TransactionAllocator::new(TransactionConfig::default()).unwrap();
        let tx = txs.begin_transaction().unwrap();
        txs.register_transaction("T1", tx);
        txs.reset();
        txs.reset();
        assert_eq!(txs.stats().active_transactions, 0);
        assert_eq!(txs.find_transaction("T1"), None);
    }
}
