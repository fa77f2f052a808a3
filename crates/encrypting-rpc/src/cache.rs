use std::{
    collections::HashMap,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use alloy_consensus::{
    TxEnvelope,
    transaction::Transaction,
};
use alloy_primitives::{
    Address,
    B256,
};
use parking_lot::Mutex;

use crate::{
    error::Result,
    sender_recovery::recover_sender,
    validation::{
        competing_gas_price,
        is_cancellation,
    },
};

/// Logical intent of a submission: one sender, one nonce, and whether the
/// transaction voids that nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub sender: Address,
    pub nonce: u64,
    pub is_cancellation: bool,
}

impl CacheKey {
    pub fn with_sender(envelope: &TxEnvelope, sender: Address) -> Self {
        Self {
            sender,
            nonce: envelope.nonce(),
            is_cancellation: is_cancellation(envelope, sender),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// `None` marks a tombstone that the next sweep purges.
    pub transaction: Option<TxEnvelope>,
    pub last_action_time: Instant,
}

/// Outcome of arbitrating a new submission against the held candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub key: CacheKey,
    pub should_send_now: bool,
    pub cache_changed: bool,
    /// Hash of the candidate held once the decision is applied.
    pub held_hash: B256,
}

/// Live candidate handed to the sweep.
#[derive(Clone, Debug)]
pub struct CandidateSnapshot {
    pub key: CacheKey,
    pub transaction: TxEnvelope,
    pub last_action_time: Instant,
}

/// Holds at most one candidate per [`CacheKey`].
///
/// Every operation takes the single map lock for its whole duration, which
/// totally orders decisions for a key. The lock is never held across I/O.
#[derive(Clone, Debug, Default)]
pub struct RaceCache {
    entries: Arc<Mutex<HashMap<CacheKey, CacheEntry>>>,
}

impl RaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `transaction` is sent now, replaces the held candidate
    /// for a later resend, or is dropped.
    pub fn decide(&self, transaction: &TxEnvelope, now: Instant) -> Result<Decision> {
        Ok(self.decide_with_sender(transaction, recover_sender(transaction)?, now))
    }

    /// [`Self::decide`] for a transaction whose sender is already known.
    pub fn decide_with_sender(
        &self,
        transaction: &TxEnvelope,
        sender: Address,
        now: Instant,
    ) -> Decision {
        let key = CacheKey::with_sender(transaction, sender);
        let mut entries = self.entries.lock();

        let entry = entries.entry(key).or_insert_with(|| CacheEntry {
            transaction: None,
            last_action_time: now,
        });

        let Some(held) = entry.transaction.as_ref() else {
            entry.transaction = Some(transaction.clone());
            entry.last_action_time = now;
            metrics::counter!("encrypting_rpc_cache_decision_total", "decision" => "send")
                .increment(1);
            return Decision {
                key,
                should_send_now: true,
                cache_changed: true,
                held_hash: *transaction.tx_hash(),
            };
        };

        let new_price = competing_gas_price(transaction);
        let held_price = competing_gas_price(held);

        if new_price > held_price {
            entry.transaction = Some(transaction.clone());
            metrics::counter!("encrypting_rpc_cache_decision_total", "decision" => "replace")
                .increment(1);
            return Decision {
                key,
                should_send_now: false,
                cache_changed: true,
                held_hash: *transaction.tx_hash(),
            };
        }

        metrics::counter!("encrypting_rpc_cache_decision_total", "decision" => "drop").increment(1);
        Decision {
            key,
            should_send_now: false,
            cache_changed: new_price != held_price,
            held_hash: *held.tx_hash(),
        }
    }

    /// Live candidates at this instant. Tombstones are not included.
    pub fn snapshot(&self) -> Vec<CandidateSnapshot> {
        self.entries
            .lock()
            .iter()
            .filter_map(|(key, entry)| {
                entry.transaction.as_ref().map(|transaction| {
                    CandidateSnapshot {
                        key: *key,
                        transaction: transaction.clone(),
                        last_action_time: entry.last_action_time,
                    }
                })
            })
            .collect()
    }

    /// Drops every tombstone. Returns how many were purged.
    pub fn purge_tombstones(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.transaction.is_some());
        before - entries.len()
    }

    /// Records a resend attempt of `resent`. The timestamp is only refreshed
    /// while `resent` is still the held candidate: a replacement that arrived
    /// meanwhile was never sent and stays due.
    pub fn mark_resent(&self, key: &CacheKey, resent: &B256, now: Instant) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(CacheEntry {
                transaction: Some(held),
                last_action_time,
            }) if held.tx_hash() == resent => {
                *last_action_time = now;
                true
            }
            _ => false,
        }
    }

    /// Turns the entry into a placeholder purged by the next sweep. A later
    /// submission for the key is accepted as if it were the first.
    pub fn tombstone(&self, key: &CacheKey) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.transaction = None;
        }
    }

    /// Removes the entry once its nonce has been consumed on chain.
    pub fn evict(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CandidateSnapshot {
    pub fn is_due(&self, now: Instant, debounce: Duration) -> bool {
        now.saturating_duration_since(self.last_action_time) >= debounce
    }
}
