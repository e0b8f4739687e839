use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error;
use crate::plan::{Plan, PlanKind, SyncAction, SyncItem};
use crate::progress::{ItemProgress, Progress};

/// Error type for scheduler runs that keeps the summary of the work done before it stopped.
///
/// Per-item failures never end up here, they are logged and counted in the summary. Only a
/// cancelled run or a failure of the scheduler itself is reported as an error.
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: error::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: error::Error, summary: Summary) -> Self {
        Error { source, summary }
    }

    pub fn is_canceled(&self) -> bool {
        self.source.is_canceled()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_transferred: u64,
    pub files_matched: usize,
    pub files_transferred: usize,
    pub files_skipped: usize,
    pub directories_created: usize,
    /// `MKD` answered 550, the directory was already there
    pub directories_existing: usize,
    pub files_removed: usize,
    pub directories_removed: usize,
    pub items_failed: usize,
    pub items_canceled: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            files_matched: self.files_matched + other.files_matched,
            files_transferred: self.files_transferred + other.files_transferred,
            files_skipped: self.files_skipped + other.files_skipped,
            directories_created: self.directories_created + other.directories_created,
            directories_existing: self.directories_existing + other.directories_existing,
            files_removed: self.files_removed + other.files_removed,
            directories_removed: self.directories_removed + other.directories_removed,
            items_failed: self.items_failed + other.items_failed,
            items_canceled: self.items_canceled + other.items_canceled,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files matched: {}\n\
            bytes transferred: {}\n\
            files transferred: {}\n\
            files skipped (newer at destination): {}\n\
            directories created: {}\n\
            directories existing: {}\n\
            files removed: {}\n\
            directories removed: {}\n\
            failed: {}\n\
            canceled: {}",
            self.files_matched,
            bytesize::ByteSize(self.bytes_transferred),
            self.files_transferred,
            self.files_skipped,
            self.directories_created,
            self.directories_existing,
            self.files_removed,
            self.directories_removed,
            self.items_failed,
            self.items_canceled,
        )
    }
}

/// Runs planned items with a bounded number of them in flight.
#[derive(Debug, Clone)]
pub struct TransferScheduler {
    gate: throttle::AdmissionGate,
    /// verb used in failure log lines of file transfers ("Sending", "Retrieving")
    transfer_verb: &'static str,
}

impl TransferScheduler {
    pub fn new(limit: usize, transfer_verb: &'static str) -> Self {
        Self {
            gate: throttle::AdmissionGate::new(limit),
            transfer_verb,
        }
    }

    pub fn gate(&self) -> &throttle::AdmissionGate {
        &self.gate
    }

    /// Execute `items` with at most `limit` actions running at once.
    ///
    /// The loop waits on the gate before spawning each item, so a full gate stalls admission
    /// instead of queueing tasks. `action` returns the number of bytes it moved. Items tagged
    /// [`SyncAction::SkipNewer`] are counted without running anything.
    ///
    /// Once `cancel` fires no further item is admitted; items already running are joined and
    /// the run ends with [`error::Error::OperationCanceled`] carrying the partial summary.
    pub async fn execute<A, Fut>(
        &self,
        items: Vec<SyncItem>,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
        action: A,
    ) -> Result<Summary, Error>
    where
        A: Fn(SyncItem, ItemProgress, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, error::Error>> + Send + 'static,
    {
        let summary = self
            .execute_shared(items, progress, cancel, &Arc::new(action))
            .await?;
        Ok(summary)
    }

    /// Execute a whole plan phase by phase, see [`Plan::into_phases`]. A phase starts only
    /// after every item of the previous one has finished.
    #[instrument(skip_all, fields(items = plan.len()))]
    pub async fn execute_plan<A, Fut>(
        &self,
        plan: Plan,
        kind: PlanKind,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
        action: A,
    ) -> Result<Summary, Error>
    where
        A: Fn(SyncItem, ItemProgress, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, error::Error>> + Send + 'static,
    {
        let action = Arc::new(action);
        let mut summary = Summary::default();
        for (index, phase) in plan.into_phases(kind).into_iter().enumerate() {
            tracing::debug!("phase {}: {} items", index, phase.len());
            match self.execute_shared(phase, progress, cancel, &action).await {
                Ok(phase_summary) => summary = summary + phase_summary,
                Err(error) => {
                    return Err(Error::new(error.source, summary + error.summary));
                }
            }
        }
        Ok(summary)
    }

    async fn execute_shared<A, Fut>(
        &self,
        items: Vec<SyncItem>,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
        action: &Arc<A>,
    ) -> Result<Summary, Error>
    where
        A: Fn(SyncItem, ItemProgress, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, error::Error>> + Send + 'static,
    {
        let mut join_set = tokio::task::JoinSet::new();
        let mut summary = Summary::default();
        for item in items {
            if item.action == SyncAction::SkipNewer {
                tracing::debug!(
                    "skipping {:?}, destination copy is newer",
                    item.relative_path
                );
                progress.files_skipped.inc();
                summary.files_skipped += 1;
                continue;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = self.gate.acquire() => permit,
            };
            while let Some(res) = join_set.try_join_next() {
                summary = summary + self.settle(res, progress);
            }
            let item_progress = ItemProgress::new(progress.clone(), item.weight());
            let action = action.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = action(item.clone(), item_progress.clone(), cancel).await;
                (item, item_progress, outcome)
            });
        }
        while let Some(res) = join_set.join_next().await {
            summary = summary + self.settle(res, progress);
        }
        if cancel.is_cancelled() {
            tracing::info!("run canceled");
            return Err(Error::new(error::Error::OperationCanceled, summary));
        }
        Ok(summary)
    }

    fn settle(
        &self,
        res: Result<(SyncItem, ItemProgress, Result<u64, error::Error>), tokio::task::JoinError>,
        progress: &Progress,
    ) -> Summary {
        let (item, item_progress, outcome) = match res {
            Ok(joined) => joined,
            Err(join_error) => {
                tracing::error!("transfer task failed: {}", join_error);
                progress.items_failed.inc();
                return Summary {
                    items_failed: 1,
                    ..Default::default()
                };
            }
        };
        match outcome {
            Ok(bytes) => {
                item_progress.complete();
                succeeded(&item, bytes, progress)
            }
            Err(error::Error::Protocol(err))
                if item.action == SyncAction::CreateDir && err.is_file_unavailable() =>
            {
                tracing::debug!("directory {:?} already exists", item.relative_path);
                item_progress.complete();
                progress.directories_existing.inc();
                Summary {
                    directories_existing: 1,
                    ..Default::default()
                }
            }
            Err(err) if err.is_canceled() => {
                tracing::debug!("{:?} canceled", item.relative_path);
                Summary {
                    items_canceled: 1,
                    ..Default::default()
                }
            }
            Err(err) => {
                tracing::error!(
                    "{} {} failed: {}",
                    self.verb(item.action),
                    item.relative_path,
                    err.item_description()
                );
                progress.items_failed.inc();
                Summary {
                    items_failed: 1,
                    ..Default::default()
                }
            }
        }
    }

    fn verb(&self, action: SyncAction) -> &'static str {
        match action {
            SyncAction::Transfer | SyncAction::SkipNewer => self.transfer_verb,
            SyncAction::CreateDir => "Creating",
            SyncAction::Delete => "Deleting",
        }
    }
}

fn succeeded(item: &SyncItem, bytes: u64, progress: &Progress) -> Summary {
    match item.action {
        SyncAction::Transfer => {
            progress.files_transferred.inc();
            Summary {
                files_transferred: 1,
                bytes_transferred: bytes,
                ..Default::default()
            }
        }
        SyncAction::CreateDir => {
            progress.directories_created.inc();
            Summary {
                directories_created: 1,
                ..Default::default()
            }
        }
        SyncAction::Delete if item.entry.is_dir() => {
            progress.directories_removed.inc();
            Summary {
                directories_removed: 1,
                ..Default::default()
            }
        }
        SyncAction::Delete => {
            progress.files_removed.inc();
            Summary {
                files_removed: 1,
                ..Default::default()
            }
        }
        SyncAction::SkipNewer => Summary::default(),
    }
}
