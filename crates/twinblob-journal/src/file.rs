use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};
use twinblob_types::Timestamp;

use crate::error::Result;
use crate::obligation::{LeasedObligation, Obligation, ObligationKey, ObligationKind};
use crate::state::{AppendPlan, JournalRecord, JournalSettings, JournalState};
use crate::traits::ObligationJournal;
use crate::wal::{SyncMode, WriteAheadLog};

/// Durability settings of a [`FileJournal`].
#[derive(Clone, Debug)]
pub struct FileJournalConfig {
    pub sync_mode: SyncMode,
    /// Minimum number of log records before compaction is considered.
    pub compaction_threshold: usize,
}

impl Default for FileJournalConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            compaction_threshold: 1024,
        }
    }
}

struct Inner {
    state: JournalState,
    wal: WriteAheadLog<JournalRecord>,
    /// Records currently in the log file.
    records: usize,
}

/// Journal backed by a single write-ahead log file.
///
/// Every change is logged before it is acknowledged, and the log is replayed
/// on [`open`](Self::open). Leases are not persisted: after a restart no
/// obligation is in flight.
pub struct FileJournal {
    inner: Mutex<Inner>,
    compaction_threshold: usize,
    lease_timeout: Duration,
}

impl FileJournal {
    /// Open the journal at `path`, replaying any existing log.
    pub fn open(path: &Path, settings: JournalSettings, config: FileJournalConfig) -> Result<Self> {
        let wal = WriteAheadLog::open(path, config.sync_mode)?;
        let lease_timeout = settings.lease_timeout;
        let mut state = JournalState::new(settings);
        let recovered = wal.recover()?;
        let records = recovered.len();
        for record in recovered {
            state.replay(record);
        }
        info!(
            path = %path.display(),
            records,
            pending = state.len(),
            "journal recovered"
        );

        let journal = Self {
            inner: Mutex::new(Inner { state, wal, records }),
            compaction_threshold: config.compaction_threshold,
            lease_timeout,
        };
        {
            let mut inner = journal.inner.lock()?;
            journal.maybe_compact(&mut inner);
        }
        Ok(journal)
    }

    /// Rewrite the log so it holds exactly the pending obligations.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        Self::compact_locked(&mut inner)
    }

    /// Number of records in the log file.
    pub fn record_count(&self) -> Result<usize> {
        Ok(self.inner.lock()?.records)
    }

    fn compact_locked(inner: &mut Inner) -> Result<()> {
        let before = inner.records;
        let snapshot = inner.state.snapshot();
        inner.wal.rewrite(&snapshot)?;
        inner.records = snapshot.len();
        info!(before, after = inner.records, "journal compacted");
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut Inner) {
        let live = inner.state.len();
        if inner.records <= self.compaction_threshold || inner.records <= live.saturating_mul(2) {
            return;
        }
        // The triggering change is already durable; a failed compaction only
        // leaves a longer log behind.
        if let Err(e) = Self::compact_locked(inner) {
            warn!(error = %e, "journal compaction failed");
        }
    }

    fn log(&self, inner: &mut Inner, record: &JournalRecord) -> Result<()> {
        inner.wal.append(record)?;
        inner.records += 1;
        self.maybe_compact(inner);
        Ok(())
    }
}

impl ObligationJournal for FileJournal {
    fn append(&self, kind: ObligationKind, now: Timestamp) -> Result<Obligation> {
        let mut inner = self.inner.lock()?;
        match inner.state.plan_append(kind, now) {
            AppendPlan::Coalesced(existing) => {
                debug!(seq = existing.seq, obligation = %existing.kind, "obligation coalesced");
                Ok(existing)
            }
            AppendPlan::New(ob) => {
                // Logged first: an append that fails never becomes visible.
                inner.wal.append(&JournalRecord::Appended(ob.clone()))?;
                inner.records += 1;
                inner.state.apply(ob.clone());
                debug!(seq = ob.seq, obligation = %ob.kind, "obligation appended");
                self.maybe_compact(&mut inner);
                Ok(ob)
            }
        }
    }

    fn drain_ready(&self, now: Timestamp, limit: usize) -> Result<Vec<LeasedObligation>> {
        Ok(self.inner.lock()?.state.drain_ready(now, limit))
    }

    fn mark_delivered(&self, leased: &LeasedObligation) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if inner.state.mark_delivered(leased) {
            let record = JournalRecord::Delivered {
                key: leased.obligation.key(),
                seq: leased.obligation.seq,
            };
            self.log(&mut inner, &record)?;
        }
        Ok(())
    }

    fn mark_failed(&self, leased: &LeasedObligation, error: &str, now: Timestamp) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if let Some(updated) = inner.state.mark_failed(leased, error, now) {
            self.log(&mut inner, &JournalRecord::Failed(updated))?;
        }
        Ok(())
    }

    fn pending(&self) -> Result<Vec<Obligation>> {
        Ok(self.inner.lock()?.state.pending())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.lock()?.state.len())
    }

    fn get(&self, key: &ObligationKey) -> Result<Option<Obligation>> {
        Ok(self.inner.lock()?.state.get(key).cloned())
    }

    fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("FileJournal");
        if let Ok(inner) = self.inner.lock() {
            s.field("path", &inner.wal.path())
                .field("pending", &inner.state.len())
                .field("records", &inner.records);
        }
        s.finish()
    }
}
