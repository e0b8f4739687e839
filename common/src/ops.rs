//! Put, get and delete runs built from the walker, the planner and the scheduler

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{CredentialDefaults, Endpoint, ResourceDefaults, SyncConfig, resolve_endpoint};
use crate::entry::{self, Entry};
use crate::error::Error as SyncError;
use crate::local;
use crate::mask::Mask;
use crate::plan::{self, DestinationIndex, PlanKind, SyncAction, SyncItem};
use crate::progress::{ItemProgress, Progress};
use crate::transfer::{Error, Summary, TransferScheduler};
use crate::transport::{self, RequestOptions, Transport, abortable};
use crate::walk;

fn fail(source: SyncError) -> Error {
    Error::new(source, Summary::default())
}

/// A configured connection to one server and the settings of the runs made through it.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    options: RequestOptions,
    config: SyncConfig,
    mask: Mask,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("config", &self.config)
            .finish()
    }
}

impl Session {
    /// Validate `config` and resolve its endpoint overrides against the stored server
    /// resource and credentials. Every request of the session goes out with the resolved
    /// endpoint, transfer mode and transfer behavior.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SyncConfig,
        resource: Option<&ResourceDefaults>,
        credentials: Option<&CredentialDefaults>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let mask = config.mask()?;
        let endpoint = resolve_endpoint(&config.endpoint, resource, credentials)?;
        tracing::debug!("resolved endpoint {:?}", endpoint);
        let options = RequestOptions {
            endpoint,
            transfer_mode: config.transfer_mode,
            transfer_behavior: config.transfer_behavior,
        };
        Ok(Self {
            transport,
            options,
            config,
            mask,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.options.endpoint
    }

    fn remote_path(&self, relative_path: &str) -> String {
        entry::join(&self.config.server_path, relative_path)
    }

    fn log_request(&self, path: &str) {
        if self.config.verbose {
            tracing::debug!(
                "Requesting \"{}\" from {} in {} mode as user \"{}\"...",
                path,
                self.options.endpoint.host,
                self.options.transfer_mode,
                self.options.endpoint.user
            );
        }
    }

    /// Walk the remote tree under the configured server path.
    async fn remote_tree(
        &self,
        missing_root_is_empty: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Entry>, SyncError> {
        let gate = throttle::AdmissionGate::new(self.config.max_concurrent_listings);
        let root = self.config.server_path.clone();
        let tolerate = self.config.tolerate_date_errors;
        walk::walk(
            &root,
            |path| {
                let root = root.clone();
                async move {
                    self.log_request(&path);
                    let listed = walk::list_remote_directory(
                        self.transport.as_ref(),
                        &path,
                        &self.options,
                        tolerate,
                    )
                    .await;
                    match listed {
                        Err(SyncError::Protocol(err))
                            if missing_root_is_empty && path == root && err.is_file_unavailable() =>
                        {
                            tracing::debug!("remote directory {:?} does not exist yet", root);
                            Ok(Vec::new())
                        }
                        other => other,
                    }
                }
            },
            cancel,
            &gate,
        )
        .await
    }

    fn log_skipped(
        &self,
        items: &[SyncItem],
        verb: &str,
        index: &DestinationIndex,
        sides: (&str, &str),
    ) {
        if !self.config.verbose {
            return;
        }
        for item in items.iter().filter(|item| item.action == SyncAction::SkipNewer) {
            let destination_modified = index
                .get(&item.relative_path)
                .map_or_else(|| "?".to_string(), |modified| modified.to_string());
            tracing::debug!(
                "Not {} \"{}\": {} file was last modified at {}, but {} file was last modified at {}",
                verb,
                item.entry.full_path,
                sides.0,
                item.entry.last_modified,
                sides.1,
                destination_modified,
            );
        }
    }

    /// Upload the local tree under `local_root` into the server path.
    ///
    /// Directories are created first, parents before children; an `MKD` answered with 550 is
    /// taken to mean the directory exists. Files are then sent with bounded concurrency.
    /// Cancellation abandons the requests in flight, not only the byte copies.
    #[instrument(skip(self, progress, cancel))]
    pub async fn put(
        &self,
        local_root: &Path,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
    ) -> Result<Summary, Error> {
        tracing::debug!("Retrieving local file listing...");
        let local_entries = local::list_recursive(local_root, &self.mask)
            .await
            .map_err(fail)?;
        let index = if self.config.only_newer {
            tracing::debug!("Retrieving file listing...");
            let remote = self.remote_tree(true, cancel).await.map_err(fail)?;
            DestinationIndex::from_entries(&remote, &self.config.server_path, &self.mask)
        } else {
            DestinationIndex::default()
        };
        let plan = plan::plan(
            &local_entries,
            &local::to_slash(local_root),
            Some(&index),
            &self.mask,
            self.config.only_newer,
            PlanKind::Transfer,
        );
        tracing::info!("File mask matched {} files.", plan.matched_files);
        self.log_skipped(&plan.items, "sending", &index, ("local", "remote"));
        progress.add_total(plan.total_weight());
        let matched = plan.matched_files;
        let session = Arc::new(self.clone());
        let local_root = local_root.to_path_buf();
        let scheduler = TransferScheduler::new(self.config.max_concurrent_transfers, "Sending");
        let summary = scheduler
            .execute_plan(
                plan,
                PlanKind::Transfer,
                progress,
                cancel,
                move |item, item_progress, cancel| {
                    let session = session.clone();
                    let local_root = local_root.clone();
                    async move {
                        session
                            .put_item(&local_root, item, item_progress, cancel)
                            .await
                    }
                },
            )
            .await
            .map_err(|err| {
                Error::new(
                    err.source,
                    Summary {
                        files_matched: matched,
                        ..err.summary
                    },
                )
            })?;
        Ok(Summary {
            files_matched: matched,
            ..summary
        })
    }

    async fn put_item(
        &self,
        local_root: &Path,
        item: SyncItem,
        item_progress: ItemProgress,
        cancel: CancellationToken,
    ) -> Result<u64, SyncError> {
        let remote_path = self.remote_path(&item.relative_path);
        self.log_request(&remote_path);
        match item.action {
            SyncAction::CreateDir => {
                abortable(
                    &cancel,
                    self.transport.make_directory(&remote_path, &self.options),
                )
                .await?;
                Ok(0)
            }
            SyncAction::Transfer => {
                let local_path = local_root.join(&item.relative_path);
                let mut file = tokio::fs::File::open(&local_path)
                    .await
                    .map_err(|err| SyncError::io(local::to_slash(&local_path), err))?;
                let mut channel = abortable(
                    &cancel,
                    self.transport.open_upload(&remote_path, &self.options),
                )
                .await?;
                let sent = transport::copy_with_progress(
                    &mut file,
                    &mut channel,
                    &cancel,
                    &remote_path,
                    |bytes| item_progress.update(bytes),
                )
                .await?;
                abortable(&cancel, channel.finalize()).await?;
                Ok(sent)
            }
            SyncAction::SkipNewer | SyncAction::Delete => Ok(0),
        }
    }

    /// Download the remote tree under the server path into `local_root`.
    #[instrument(skip(self, progress, cancel))]
    pub async fn get(
        &self,
        local_root: &Path,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
    ) -> Result<Summary, Error> {
        tracing::debug!("Retrieving remote file listing...");
        let remote = self.remote_tree(false, cancel).await.map_err(fail)?;
        let index = if self.config.only_newer && local_root.exists() {
            tracing::debug!("Retrieving local file listing...");
            let local_entries = local::list_recursive(local_root, &self.mask)
                .await
                .map_err(fail)?;
            DestinationIndex::from_entries(&local_entries, &local::to_slash(local_root), &self.mask)
        } else {
            DestinationIndex::default()
        };
        let plan = plan::plan(
            &remote,
            &self.config.server_path,
            Some(&index),
            &self.mask,
            self.config.only_newer,
            PlanKind::Transfer,
        );
        tracing::info!(
            "File mask matched {} of {} files.",
            plan.matched_files,
            plan.total_files
        );
        self.log_skipped(&plan.items, "requesting", &index, ("remote", "local"));
        tokio::fs::create_dir_all(local_root)
            .await
            .map_err(|err| fail(SyncError::io(local::to_slash(local_root), err)))?;
        progress.add_total(plan.total_weight());
        let matched = plan.matched_files;
        let session = Arc::new(self.clone());
        let local_root = local_root.to_path_buf();
        let scheduler = TransferScheduler::new(self.config.max_concurrent_transfers, "Retrieving");
        let summary = scheduler
            .execute_plan(
                plan,
                PlanKind::Transfer,
                progress,
                cancel,
                move |item, item_progress, cancel| {
                    let session = session.clone();
                    let local_root = local_root.clone();
                    async move {
                        session
                            .get_item(&local_root, item, item_progress, cancel)
                            .await
                    }
                },
            )
            .await
            .map_err(|err| {
                Error::new(
                    err.source,
                    Summary {
                        files_matched: matched,
                        ..err.summary
                    },
                )
            })?;
        Ok(Summary {
            files_matched: matched,
            ..summary
        })
    }

    async fn get_item(
        &self,
        local_root: &Path,
        item: SyncItem,
        item_progress: ItemProgress,
        cancel: CancellationToken,
    ) -> Result<u64, SyncError> {
        let local_path: PathBuf = local_root.join(&item.relative_path);
        match item.action {
            SyncAction::CreateDir => {
                tokio::fs::create_dir_all(&local_path)
                    .await
                    .map_err(|err| SyncError::io(local::to_slash(&local_path), err))?;
                Ok(0)
            }
            SyncAction::Transfer => {
                self.log_request(&item.entry.full_path);
                let mut channel = abortable(
                    &cancel,
                    self.transport.open_download(&item.entry.full_path, &self.options),
                )
                .await?;
                let mut file = tokio::fs::File::create(&local_path)
                    .await
                    .map_err(|err| SyncError::io(local::to_slash(&local_path), err))?;
                let received = transport::copy_with_progress(
                    &mut channel,
                    &mut file,
                    &cancel,
                    &item.entry.full_path,
                    |bytes| item_progress.update(bytes),
                )
                .await?;
                Ok(received)
            }
            SyncAction::SkipNewer | SyncAction::Delete => Ok(0),
        }
    }

    /// Remove everything the mask selects under the server path, contents before containers.
    #[instrument(skip(self, progress, cancel))]
    pub async fn delete(
        &self,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
    ) -> Result<Summary, Error> {
        tracing::debug!("Retrieving remote file listing...");
        let remote = self.remote_tree(false, cancel).await.map_err(fail)?;
        let plan = plan::plan(
            &remote,
            &self.config.server_path,
            None,
            &self.mask,
            false,
            PlanKind::Delete,
        );
        tracing::info!(
            "File mask matched {} of {} files.",
            plan.matched_files,
            plan.total_files
        );
        progress.add_total(plan.total_weight());
        let matched = plan.matched_files;
        let session = Arc::new(self.clone());
        let scheduler = TransferScheduler::new(self.config.max_concurrent_transfers, "Deleting");
        let summary = scheduler
            .execute_plan(
                plan,
                PlanKind::Delete,
                progress,
                cancel,
                move |item, _, cancel| {
                    let session = session.clone();
                    async move {
                        session.log_request(&item.entry.full_path);
                        let request = session.transport.delete(
                            &item.entry.full_path,
                            item.entry.is_dir(),
                            &session.options,
                        );
                        abortable(&cancel, request).await.map(|()| 0)
                    }
                },
            )
            .await
            .map_err(|err| {
                Error::new(
                    err.source,
                    Summary {
                        files_matched: matched,
                        ..err.summary
                    },
                )
            })?;
        Ok(Summary {
            files_matched: matched,
            ..summary
        })
    }
}
