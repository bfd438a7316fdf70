use std::sync::Arc;

use tokio::task;
use twinblob_journal::{JournalError, ObligationJournal};

/// Run `f` against the journal on the blocking pool.
///
/// A file journal writes (and may fsync) under its lock, which must not
/// stall the runtime's worker threads.
pub(crate) async fn run<T, F>(journal: &Arc<dyn ObligationJournal>, f: F) -> twinblob_journal::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ObligationJournal) -> twinblob_journal::Result<T> + Send + 'static,
{
    let journal = Arc::clone(journal);
    task::spawn_blocking(move || f(journal.as_ref()))
        .await
        .map_err(map_join_error)?
}

fn map_join_error(err: task::JoinError) -> JournalError {
    JournalError::Io(std::io::Error::other(format!("journal task failed: {err}")))
}
