//! Asset Writer
//!
//! Persists the non-JS outputs of a nested compile. Each file is written to a
//! temporary sibling and renamed into place, so an interrupted build leaves
//! either the old file or the complete new one at the final path.

use futures::future::try_join_all;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::error::{ExtractError, Result};
use crate::host::OutputFile;

/// Writes all assets of `file` concurrently; fails if any single write fails.
pub async fn write_assets(file: &str, assets: &[OutputFile]) -> Result<usize> {
    if assets.is_empty() {
        return Ok(0);
    }

    try_join_all(assets.iter().map(|asset| write_asset(file, asset))).await?;
    debug!(file, count = assets.len(), "assets written");
    Ok(assets.len())
}

async fn write_asset(file: &str, asset: &OutputFile) -> Result<()> {
    let path = asset.path.clone();
    let asset_error = |source: io::Error| ExtractError::AssetWrite {
        file: file.to_string(),
        path: path.clone(),
        source,
    };

    let dir = parent_dir(&path);
    tokio::fs::create_dir_all(&dir).await.map_err(asset_error)?;

    let contents = asset.contents.clone();
    let target = path.clone();
    tokio::task::spawn_blocking(move || persist(&dir, &target, &contents))
        .await
        .map_err(|join| asset_error(io::Error::new(io::ErrorKind::Other, join)))?
        .map_err(asset_error)?;

    trace!(path = %path.display(), bytes = asset.contents.len(), "asset written");
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn persist(dir: &Path, target: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|err| err.error)?;
    Ok(())
}
