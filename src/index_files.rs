use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Single-file index kept next to the store files.
pub const INDEX_FILE: &str = "index.db";

/// Directory holding the secondary index files.
pub const INDEX_DIR: &str = "index";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexCopy {
    pub files: u64,
    pub bytes: u64,
}

/// Copies `index.db` and the `index/` tree from `source_dir` into `target_dir`.
///
/// Missing entries are skipped. The copied indexes reference node ids, so they
/// are only valid when the copy kept node ids stable.
pub fn copy_index_files(source_dir: &Path, target_dir: &Path) -> Result<IndexCopy> {
    let mut copied = IndexCopy::default();

    let index_file = source_dir.join(INDEX_FILE);
    if index_file.is_file() {
        fs::create_dir_all(target_dir)
            .with_context(|| format!("Failed to create directory: {:?}", target_dir))?;
        copy_file(&index_file, &target_dir.join(INDEX_FILE), &mut copied)?;
    }

    let index_dir = source_dir.join(INDEX_DIR);
    if index_dir.is_dir() {
        copy_dir(&index_dir, &target_dir.join(INDEX_DIR), &mut copied)?;
    }

    info!(files = copied.files, bytes = copied.bytes, "Index files copied");
    Ok(copied)
}

fn copy_dir(from: &Path, to: &Path, copied: &mut IndexCopy) -> Result<()> {
    fs::create_dir_all(to).with_context(|| format!("Failed to create directory: {:?}", to))?;
    let entries =
        fs::read_dir(from).with_context(|| format!("Failed to read directory: {:?}", from))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in: {:?}", from))?;
        let path = entry.path();
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&path, &dest, copied)?;
        } else {
            copy_file(&path, &dest, copied)?;
        }
    }
    Ok(())
}

fn copy_file(from: &Path, to: &Path, copied: &mut IndexCopy) -> Result<()> {
    let bytes =
        fs::copy(from, to).with_context(|| format!("Failed to copy {:?} to {:?}", from, to))?;
    debug!(from = ?from, bytes, "Copied index file");
    copied.files += 1;
    copied.bytes += bytes;
    Ok(())
}
