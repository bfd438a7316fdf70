use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use twinblob_types::Timestamp;

use crate::backoff::BackoffPolicy;
use crate::obligation::{LeasedObligation, Obligation, ObligationKey, ObligationKind};

/// Settings shared by every journal implementation.
#[derive(Clone, Debug)]
pub struct JournalSettings {
    pub backoff: BackoffPolicy,
    /// How long a drained obligation stays hidden from other workers.
    pub lease_timeout: Duration,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            lease_timeout: Duration::from_secs(60),
        }
    }
}

/// A change to the obligation set, as written to the journal log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// A new obligation, superseding whatever it cancels.
    Appended(Obligation),
    /// The obligation `seq` under `key` was delivered.
    Delivered { key: ObligationKey, seq: u64 },
    /// The obligation failed an attempt; carries its updated retry state.
    Failed(Obligation),
}

/// Result of planning an append.
#[derive(Debug)]
pub(crate) enum AppendPlan {
    /// An equivalent obligation is already pending.
    Coalesced(Obligation),
    /// A new obligation that must be committed with [`JournalState::apply`].
    New(Obligation),
}

#[derive(Clone, Copy, Debug)]
struct Lease {
    seq: u64,
    lease_id: u64,
    expires_at: Timestamp,
}

/// The obligation set and its leases, without any persistence.
///
/// Invariants:
/// - at most one pending obligation per [`ObligationKey`];
/// - at most one lease per key, so a key never has two attempts in flight;
/// - no pending obligation is covered by a wipe with a larger `seq` (wipes
///   cancel what they cover when appended).
pub(crate) struct JournalState {
    by_seq: BTreeMap<u64, Obligation>,
    by_key: HashMap<ObligationKey, u64>,
    leases: HashMap<ObligationKey, Lease>,
    next_seq: u64,
    next_lease_id: u64,
    settings: JournalSettings,
}

impl JournalState {
    pub(crate) fn new(settings: JournalSettings) -> Self {
        Self {
            by_seq: BTreeMap::new(),
            by_key: HashMap::new(),
            leases: HashMap::new(),
            next_seq: 1,
            next_lease_id: 1,
            settings,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.by_seq.len()
    }

    pub(crate) fn leased(&self) -> usize {
        self.leases.len()
    }

    pub(crate) fn get(&self, key: &ObligationKey) -> Option<&Obligation> {
        self.by_key.get(key).and_then(|seq| self.by_seq.get(seq))
    }

    /// Pending obligations in `seq` order.
    pub(crate) fn pending(&self) -> Vec<Obligation> {
        self.by_seq.values().cloned().collect()
    }

    /// Decide what appending `kind` means, assigning a `seq` if it is new.
    pub(crate) fn plan_append(&mut self, kind: ObligationKind, now: Timestamp) -> AppendPlan {
        let key = kind.key();
        if let Some(existing) = self.get(&key) {
            if existing.kind == kind && !self.cancels_later_work(&key, existing.seq) {
                return AppendPlan::Coalesced(existing.clone());
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        AppendPlan::New(Obligation::new(seq, kind, now))
    }

    /// A repeated wipe must be re-appended if work it covers was queued
    /// after the pending one.
    fn cancels_later_work(&self, key: &ObligationKey, seq: u64) -> bool {
        self.by_seq
            .range(seq + 1..)
            .any(|(_, ob)| key.covers(&ob.key()))
    }

    /// Insert an obligation, removing the pending obligation under the same
    /// key and, for wipes, everything the wipe covers. Returns the removed
    /// obligations.
    pub(crate) fn apply(&mut self, obligation: Obligation) -> Vec<Obligation> {
        let key = obligation.key();
        let mut removed = Vec::new();

        if let Some(seq) = self.by_key.remove(&key) {
            removed.extend(self.by_seq.remove(&seq));
        }
        if obligation.kind.is_wipe() {
            let covered: Vec<u64> = self
                .by_seq
                .values()
                .filter(|ob| key.covers(&ob.key()))
                .map(|ob| ob.seq)
                .collect();
            for seq in covered {
                if let Some(ob) = self.by_seq.remove(&seq) {
                    self.by_key.remove(&ob.key());
                    removed.push(ob);
                }
            }
        }

        for ob in &removed {
            debug!(seq = ob.seq, superseded_by = obligation.seq, obligation = %ob.kind, "obligation superseded");
        }

        self.next_seq = self.next_seq.max(obligation.seq + 1);
        self.by_key.insert(key, obligation.seq);
        self.by_seq.insert(obligation.seq, obligation);
        removed
    }

    /// Replay one log record into the state.
    pub(crate) fn replay(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Appended(ob) => {
                self.apply(ob);
            }
            JournalRecord::Delivered { key, seq } => {
                self.remove_if_current(&key, seq);
            }
            JournalRecord::Failed(ob) => {
                if let Some(current) = self.by_seq.get_mut(&ob.seq) {
                    *current = ob;
                }
            }
        }
    }

    /// Records reproducing the live obligation set, used for compaction.
    pub(crate) fn snapshot(&self) -> Vec<JournalRecord> {
        self.by_seq
            .values()
            .cloned()
            .map(JournalRecord::Appended)
            .collect()
    }

    /// Lease up to `limit` eligible obligations, in `seq` order.
    pub(crate) fn drain_ready(&mut self, now: Timestamp, limit: usize) -> Vec<LeasedObligation> {
        self.expire_leases(now);

        let mut drained = Vec::new();
        let candidates: Vec<u64> = self
            .by_seq
            .values()
            .filter(|ob| ob.is_ready(now))
            .map(|ob| ob.seq)
            .collect();

        for seq in candidates {
            if drained.len() >= limit {
                break;
            }
            let Some(ob) = self.by_seq.get(&seq) else {
                continue;
            };
            if self.is_blocked(ob) {
                continue;
            }
            let lease = Lease {
                seq,
                lease_id: self.next_lease_id,
                expires_at: now.plus(self.settings.lease_timeout),
            };
            self.next_lease_id += 1;
            self.leases.insert(ob.key(), lease);
            drained.push(LeasedObligation {
                obligation: ob.clone(),
                lease_id: lease.lease_id,
                expires_at: lease.expires_at,
            });
        }
        drained
    }

    fn expire_leases(&mut self, now: Timestamp) {
        let expired: Vec<ObligationKey> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(lease) = self.leases.remove(&key) {
                warn!(%key, seq = lease.seq, lease_id = lease.lease_id, "lease expired; obligation eligible again");
            }
        }
    }

    fn is_blocked(&self, ob: &Obligation) -> bool {
        let key = ob.key();
        if self.leases.contains_key(&key) {
            return true;
        }
        // Work queued behind a pending wipe waits for the wipe.
        let behind_wipe = self
            .by_seq
            .range(..ob.seq)
            .any(|(_, earlier)| earlier.key().covers(&key));
        if behind_wipe {
            return true;
        }
        // A wipe waits for in-flight work it covers.
        ob.kind.is_wipe() && self.leases.keys().any(|leased| key.covers(leased))
    }

    /// Release the lease and drop the obligation if it is still current.
    /// Returns `true` if the obligation was removed.
    pub(crate) fn mark_delivered(&mut self, leased: &LeasedObligation) -> bool {
        let key = leased.obligation.key();
        self.release(&key, leased.lease_id);
        self.remove_if_current(&key, leased.obligation.seq)
    }

    /// Release the lease and push the obligation's next attempt back.
    /// Returns the updated obligation, or `None` if the lease was stale or
    /// the obligation has been superseded.
    pub(crate) fn mark_failed(
        &mut self,
        leased: &LeasedObligation,
        error: &str,
        now: Timestamp,
    ) -> Option<Obligation> {
        let key = leased.obligation.key();
        if !self.release(&key, leased.lease_id) {
            warn!(%key, seq = leased.obligation.seq, "failure reported on a stale lease; ignored");
            return None;
        }
        let ob = self.by_seq.get_mut(&leased.obligation.seq)?;
        ob.attempt_count = ob.attempt_count.saturating_add(1);
        ob.last_error = Some(error.to_string());
        ob.next_attempt_at = now.plus(self.settings.backoff.delay_for(ob.attempt_count));
        Some(ob.clone())
    }

    fn release(&mut self, key: &ObligationKey, lease_id: u64) -> bool {
        match self.leases.get(key) {
            Some(lease) if lease.lease_id == lease_id => {
                self.leases.remove(key);
                true
            }
            _ => false,
        }
    }

    fn remove_if_current(&mut self, key: &ObligationKey, seq: u64) -> bool {
        if self.by_key.get(key) != Some(&seq) {
            return false;
        }
        self.by_key.remove(key);
        self.by_seq.remove(&seq).is_some()
    }
}
