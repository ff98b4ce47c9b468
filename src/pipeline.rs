//! End-to-end copy: token setup, node phase, id map barrier, relationship phase.

use crate::cancel::Cancellation;
use crate::config::{CopyConfig, CopyFilters};
use crate::consumer::{drain, load_node, load_relationship};
use crate::error::CopyError;
use crate::errorlog::ErrorLog;
use crate::idmap::{id_map_path, IdMap, NodeIdMap};
use crate::index_files::{copy_index_files, IndexCopy};
use crate::model::{EntityKind, TokenCategory};
use crate::phase::{run_phase, PhaseSettings};
use crate::scan::{NodeScanner, RelationshipScanner};
use crate::stats::PhaseStats;
use crate::store::{create_target, open_source, SourceReader, TargetWriter};
use crate::tokens::TokenTables;
use anyhow::{bail, Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Plain values the copy core runs with.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub filters: CopyFilters,
    pub keep_node_ids: bool,
    pub threads: usize,
    pub phase: PhaseSettings,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            filters: CopyFilters::default(),
            keep_node_ids: true,
            threads: crate::config::default_threads(),
            phase: PhaseSettings::default(),
        }
    }
}

impl CopyOptions {
    pub fn from_config(config: &CopyConfig) -> Self {
        Self {
            filters: config.filters(),
            keep_node_ids: config.keep_node_ids,
            threads: config.threads,
            phase: PhaseSettings {
                batch_size: config.batch_size,
                queue_capacity: config.queue_capacity,
                max_in_flight: config.max_in_flight,
                ..PhaseSettings::default()
            },
        }
    }
}

/// What a successful copy did, written out by `--report`.
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub nodes: PhaseStats,
    pub relationships: PhaseStats,
    pub keep_node_ids: bool,
    pub id_map_entries: usize,
    pub error_log_entries: u64,
    pub index_files_copied: u64,
    pub elapsed_secs: f64,
}

impl CopyReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Failed to create report: {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).context("Failed to write report")?;
        Ok(())
    }
}

/// Result of [`copy_store`]: the report plus the frozen id correspondence.
#[derive(Debug)]
pub struct CopyOutcome {
    pub report: CopyReport,
    pub id_map: IdMap,
}

fn build_pool(threads: usize) -> Result<ThreadPool, CopyError> {
    ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|idx| format!("storecopy-scan-{idx}"))
        .build()
        .map_err(|e| CopyError::setup_msg(format!("cannot build scan worker pool: {e}")))
}

/// Copies every entity of `source` that survives the filters into `target`.
///
/// The target is closed only after both phases succeeded. On failure the
/// first cause is returned and the target is left as is.
pub fn copy_store(
    source: &dyn SourceReader,
    target: &mut dyn TargetWriter,
    options: &CopyOptions,
    error_log: &ErrorLog,
) -> Result<CopyOutcome, CopyError> {
    let started = Instant::now();
    let tokens = TokenTables::build(source, target, &options.filters)?;
    let rel_type_names = source
        .all_tokens(TokenCategory::RelationshipType)
        .map_err(|e| CopyError::setup("cannot read relationship types from source", e))?;
    let pool = build_pool(options.threads)?;
    let cancel = Cancellation::new();
    let keep_node_ids = options.keep_node_ids;

    let node_map = NodeIdMap::new();
    let node_run = {
        let scanner = NodeScanner::new(source, &tokens);
        let target = &mut *target;
        let node_map = &node_map;
        let cancel_ref = &cancel;
        run_phase(&scanner, &pool, &options.phase, &cancel, error_log, move |queue, progress| {
            drain(queue, cancel_ref, EntityKind::Node, progress, error_log, |node| {
                load_node(&mut *target, node_map, keep_node_ids, error_log, node)
            })
        })
    };
    let nodes = node_run.into_result().map_err(|(_, err)| {
        error_log.flush();
        err
    })?;

    let id_map = node_map.freeze();
    info!(entries = id_map.len(), "Node id map frozen");

    let rel_run = {
        let scanner = RelationshipScanner::new(source, &tokens, &id_map, rel_type_names);
        let target = &mut *target;
        let cancel_ref = &cancel;
        run_phase(&scanner, &pool, &options.phase, &cancel, error_log, move |queue, progress| {
            let kind = EntityKind::Relationship;
            drain(queue, cancel_ref, kind, progress, error_log, |rel| {
                load_relationship(&mut *target, error_log, rel)
            })
        })
    };
    let relationships = rel_run.into_result().map_err(|(_, err)| {
        error_log.flush();
        err
    })?;

    target.close().map_err(CopyError::Close)?;
    error_log.flush();

    Ok(CopyOutcome {
        report: CopyReport {
            nodes,
            relationships,
            keep_node_ids,
            id_map_entries: id_map.len(),
            error_log_entries: error_log.entries(),
            index_files_copied: 0,
            elapsed_secs: started.elapsed().as_secs_f64(),
        },
        id_map,
    })
}

/// Prepares the target directory: an existing one is an error unless `overwrite` is set.
pub fn prepare_target_dir(target_dir: &Path, overwrite: bool) -> Result<()> {
    if target_dir.exists() {
        if !overwrite {
            bail!(
                "Target directory already exists: {:?} (use --overwrite to replace it)",
                target_dir
            );
        }
        info!("Removing existing target directory: {:?}", target_dir);
        fs::remove_dir_all(target_dir)
            .with_context(|| format!("Failed to remove target directory: {:?}", target_dir))?;
    }
    fs::create_dir_all(target_dir)
        .with_context(|| format!("Failed to create target directory: {:?}", target_dir))
}

/// Resolves `path` to an absolute path with symlinks and `.`/`..` resolved as
/// far as the path exists on disk.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute =
        std::path::absolute(path).with_context(|| format!("Failed to resolve path: {:?}", path))?;
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => {
                resolved.push(other);
                if let Ok(real) = fs::canonicalize(&resolved) {
                    resolved = real;
                }
            }
        }
    }
    Ok(resolved)
}

/// Fails when the target directory is the source store, or one contains the other.
pub fn check_distinct_stores(source_dir: &Path, target_dir: &Path) -> Result<()> {
    let source = resolve_path(source_dir)?;
    let target = resolve_path(target_dir)?;
    if source == target {
        bail!(
            "Source and target must be different directories: {:?} and {:?} are both {:?}",
            source_dir,
            target_dir,
            source
        );
    }
    if target.starts_with(&source) {
        bail!("Target directory {:?} is inside the source store {:?}", target_dir, source_dir);
    }
    if source.starts_with(&target) {
        bail!("Source store {:?} is inside the target directory {:?}", source_dir, target_dir);
    }
    Ok(())
}

/// Options for a directory-level copy. Phase summaries are always printed;
/// `interactive` only controls the progress bars.
fn run_options(config: &CopyConfig, interactive: bool) -> CopyOptions {
    let mut options = CopyOptions::from_config(config);
    options.phase.show_progress = interactive;
    options.phase.print_summary = true;
    options
}

/// Runs a configured copy between two store directories.
///
/// `interactive` turns on progress bars.
pub fn run_copy(config: &CopyConfig, interactive: bool) -> Result<CopyReport> {
    config.validate()?;
    let (Some(source_dir), Some(target_dir)) =
        (config.source_dir.as_deref(), config.target_dir.as_deref())
    else {
        bail!("Source and target directories are required");
    };

    if !source_dir.exists() {
        let message = format!("source store does not exist: {}", source_dir.display());
        return Err(CopyError::setup_msg(message).into());
    }
    check_distinct_stores(source_dir, target_dir)?;
    prepare_target_dir(target_dir, config.overwrite)?;

    let source = open_source(source_dir).map_err(|e| {
        CopyError::setup(format!("cannot open source store {}", source_dir.display()), e)
    })?;
    let mut target = create_target(target_dir, config.target_format).map_err(|e| {
        CopyError::setup(format!("cannot create target store {}", target_dir.display()), e)
    })?;

    let log_dir = config.error_log_dir().unwrap_or(target_dir);
    let error_log = ErrorLog::create(log_dir)
        .with_context(|| format!("Failed to open error log in {:?}", log_dir))?;

    let options = run_options(config, interactive);

    info!(
        source = ?source_dir,
        target = ?target_dir,
        keep_node_ids = options.keep_node_ids,
        threads = options.threads,
        batch_size = options.phase.batch_size,
        "Starting store copy"
    );

    let outcome = match copy_store(source.as_ref(), target.as_mut(), &options, &error_log) {
        Ok(outcome) => outcome,
        Err(err) => {
            let log = error_log.path().map(|p| p.display().to_string()).unwrap_or_default();
            return Err(anyhow::Error::new(err).context(format!("Store copy failed, see {log}")));
        }
    };
    let mut report = outcome.report;

    if config.keep_node_ids {
        let copied: IndexCopy = copy_index_files(source_dir, target_dir)?;
        report.index_files_copied = copied.files;
    } else {
        warn!("Node ids were reassigned, index files are not copied");
    }

    if config.persist_id_map {
        outcome.id_map.save(&id_map_path(target_dir))?;
    }

    Ok(report)
}
