//! Breadth-first expansion of a remote directory tree
//!
//! Every directory discovered at one depth is listed concurrently, then the walk moves on to
//! the next depth with everything those listings returned. The number of sequential round
//! trips is bounded by the depth of the tree, the number of listings in flight by the gate.
//! Only entries strictly below the directory they were listed from are kept, so a listing
//! that names an ancestor (`..`, an absolute path) cannot send the walk around in circles.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::entry::{self, Entry};
use crate::error::Error;
use crate::listing;
use crate::transport::{RequestOptions, Transport};

/// Walk the tree under `root`, returning every entry below it in level order.
///
/// `list_one` lists a single directory and returns its parsed entries. The first failing
/// listing aborts the whole walk and drops the listings still in flight; cancellation does
/// the same and yields [`Error::OperationCanceled`].
#[instrument(skip(list_one, cancel, gate))]
pub async fn walk<F, Fut>(
    root: &str,
    list_one: F,
    cancel: &CancellationToken,
    gate: &throttle::AdmissionGate,
) -> Result<Vec<Entry>, Error>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Vec<Entry>, Error>>,
{
    let mut tree = Vec::new();
    let mut level = vec![entry::normalize_root(root)];
    let mut depth = 0;
    while !level.is_empty() {
        tracing::debug!("listing {} directories at depth {}", level.len(), depth);
        let listed = std::mem::take(&mut level);
        let listings = listed.iter().cloned().map(|path| {
            let list_one = &list_one;
            async move {
                let _permit = gate.acquire().await;
                list_one(path).await
            }
        });
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::OperationCanceled),
            results = futures::future::try_join_all(listings) => results?,
        };
        for (directory, entries) in listed.iter().zip(results) {
            for entry in entries {
                if !is_below(&entry.full_path, directory) {
                    tracing::warn!(
                        "ignoring {:?} listed in {:?}, it is not inside that directory",
                        entry.full_path,
                        directory
                    );
                    continue;
                }
                if entry.is_dir() {
                    level.push(entry.full_path.clone());
                }
                tree.push(entry);
            }
        }
        depth += 1;
    }
    tracing::debug!("walk of {:?} found {} entries", root, tree.len());
    Ok(tree)
}

fn is_below(path: &str, directory: &str) -> bool {
    path.strip_prefix(directory.trim_end_matches('/'))
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
}

/// List and parse one remote directory through `transport`.
pub async fn list_remote_directory(
    transport: &dyn Transport,
    path: &str,
    options: &RequestOptions,
    tolerate_date_errors: bool,
) -> Result<Vec<Entry>, Error> {
    let lines = transport.list_directory(path, options).await?;
    listing::parse_listing(&lines, path, tolerate_date_errors)
}

/// Walk a remote tree, listing every directory through `transport`.
pub async fn walk_remote(
    transport: &dyn Transport,
    root: &str,
    options: &RequestOptions,
    tolerate_date_errors: bool,
    cancel: &CancellationToken,
    gate: &throttle::AdmissionGate,
) -> Result<Vec<Entry>, Error> {
    walk(
        root,
        |path| async move {
            list_remote_directory(transport, &path, options, tolerate_date_errors).await
        },
        cancel,
        gate,
    )
    .await
}
