use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;
use twinblob_types::Timestamp;

use crate::error::Result;
use crate::obligation::{LeasedObligation, Obligation, ObligationKey, ObligationKind};
use crate::state::{AppendPlan, JournalSettings, JournalState};
use crate::traits::ObligationJournal;

/// Process-local journal. Obligations are lost when the process exits.
pub struct InMemoryJournal {
    state: Mutex<JournalState>,
    lease_timeout: Duration,
}

impl InMemoryJournal {
    pub fn new(settings: JournalSettings) -> Self {
        Self {
            lease_timeout: settings.lease_timeout,
            state: Mutex::new(JournalState::new(settings)),
        }
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new(JournalSettings::default())
    }
}

impl ObligationJournal for InMemoryJournal {
    fn append(&self, kind: ObligationKind, now: Timestamp) -> Result<Obligation> {
        let mut state = self.state.lock()?;
        match state.plan_append(kind, now) {
            AppendPlan::Coalesced(existing) => {
                debug!(seq = existing.seq, obligation = %existing.kind, "obligation coalesced");
                Ok(existing)
            }
            AppendPlan::New(ob) => {
                debug!(seq = ob.seq, obligation = %ob.kind, "obligation appended");
                state.apply(ob.clone());
                Ok(ob)
            }
        }
    }

    fn drain_ready(&self, now: Timestamp, limit: usize) -> Result<Vec<LeasedObligation>> {
        Ok(self.state.lock()?.drain_ready(now, limit))
    }

    fn mark_delivered(&self, leased: &LeasedObligation) -> Result<()> {
        self.state.lock()?.mark_delivered(leased);
        Ok(())
    }

    fn mark_failed(&self, leased: &LeasedObligation, error: &str, now: Timestamp) -> Result<()> {
        self.state.lock()?.mark_failed(leased, error, now);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<Obligation>> {
        Ok(self.state.lock()?.pending())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.state.lock()?.len())
    }

    fn get(&self, key: &ObligationKey) -> Result<Option<Obligation>> {
        Ok(self.state.lock()?.get(key).cloned())
    }

    fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }
}

impl std::fmt::Debug for InMemoryJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.len().unwrap_or_default();
        f.debug_struct("InMemoryJournal")
            .field("pending", &pending)
            .finish()
    }
}
