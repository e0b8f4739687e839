//! Local file tree enumeration, producing entries shaped like parsed remote ones
//!
//! Paths use forward slashes on every platform so local and remote relative paths compare
//! equal. Symbolic links are followed; entries whose metadata cannot be read (dangling links,
//! races with deletion) are skipped with a warning rather than failing the run.

use std::path::Path;

use anyhow::Context;
use async_recursion::async_recursion;
use chrono::{DateTime, Utc};

use crate::entry::{self, Attributes, Entry};
use crate::error::Error;
use crate::mask::{Mask, MaskResult};

/// Forward-slash form of a local path.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// All entries under `base` that `mask` selects, relative paths checked against `base`.
/// Directories excluded by the mask are not descended into.
pub async fn list_recursive(base: &Path, mask: &Mask) -> Result<Vec<Entry>, Error> {
    let metadata = tokio::fs::metadata(base)
        .await
        .map_err(|err| Error::io(to_slash(base), err))?;
    if !metadata.is_dir() {
        return Err(Error::Config(anyhow::anyhow!(
            "local path {:?} is not a directory",
            base
        )));
    }
    let root = to_slash(base);
    let mut entries = Vec::new();
    list_directory(base, &root, mask, &mut entries).await?;
    tracing::debug!("found {} local entries under {:?}", entries.len(), base);
    Ok(entries)
}

#[async_recursion]
async fn list_directory(
    dir: &Path,
    root: &str,
    mask: &Mask,
    entries: &mut Vec<Entry>,
) -> Result<(), Error> {
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| Error::io(to_slash(dir), err))?;
    let mut children = Vec::new();
    while let Some(child) = read_dir
        .next_entry()
        .await
        .map_err(|err| Error::io(to_slash(dir), err))?
    {
        children.push(child.path());
    }
    drop(read_dir);
    children.sort();
    let mut subdirectories = Vec::new();
    for path in children {
        let metadata = match tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("failed reading metadata from {:?}", &path))
        {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!("skipping: {:#}", err);
                continue;
            }
        };
        let full_path = to_slash(&path);
        let relative = entry::relative_path(&full_path, root);
        match mask.check(&relative, metadata.is_dir()) {
            MaskResult::Included => {}
            MaskResult::Traverse => {
                subdirectories.push(path);
                continue;
            }
            MaskResult::ExcludedByPattern(pattern) => {
                tracing::trace!("{:?} excluded by {:?}", relative, pattern);
                continue;
            }
            MaskResult::ExcludedByDefault => continue,
        }
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let attributes = Attributes {
            hidden: path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.')),
            read_only: metadata.permissions().readonly(),
        };
        if metadata.is_dir() {
            entries.push(Entry::directory(&full_path, last_modified).with_attributes(attributes));
            subdirectories.push(path);
        } else {
            entries.push(
                Entry::file(&full_path, metadata.len(), last_modified).with_attributes(attributes),
            );
        }
    }
    for subdirectory in subdirectories {
        list_directory(&subdirectory, root, mask, entries).await?;
    }
    Ok(())
}
