use crate::error::CopyError;
use crate::store::StoreFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ids per shard; one shard is scanned end-to-end by one worker
pub const BATCH_SIZE: u64 = 500_000;

/// Capacity of the queue between scan workers and the bulk loader
pub const QUEUE_CAPACITY: usize = 100_000;

/// Shard tasks submitted but not yet resolved before the dispatcher waits
pub const MAX_IN_FLIGHT_SHARDS: usize = 25;

/// Bounded wait of a producer on a full queue before it re-checks cancellation
pub const OFFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded wait of the consumer on an empty queue before it re-checks cancellation
pub const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress update interval (tick every N ids)
pub const OUTPUT_BATCH: u64 = 10_000;

/// Reader flush interval (flush every N ids)
pub const FLUSH_INTERVAL: u64 = 500_000;

pub const ERROR_LOG_FILE: &str = "store-copy.log";

pub const ID_MAP_FILE: &str = "id-map.bin";

pub const ID_MAP_VERSION: u32 = 1;

pub const SNAPSHOT_FILE: &str = "graph.snapshot";

pub const SNAPSHOT_MAGIC: [u8; 8] = *b"GRAPHSNP";

/// Default number of scan threads: half the cores, at least one.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

/// Splits a comma-separated name list, trimming blanks.
pub fn split_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Names to drop from the copy. Matching against store tokens is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFilters {
    pub ignore_rel_types: BTreeSet<String>,
    pub ignore_properties: BTreeSet<String>,
    pub ignore_labels: BTreeSet<String>,
    /// Nodes carrying any of these labels are not copied at all.
    pub delete_nodes_with_labels: BTreeSet<String>,
}

impl CopyFilters {
    pub fn is_empty(&self) -> bool {
        self.ignore_rel_types.is_empty()
            && self.ignore_properties.is_empty()
            && self.ignore_labels.is_empty()
            && self.delete_nodes_with_labels.is_empty()
    }
}

/// Run configuration as read from a TOML file and overridden on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    pub source_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    pub rel_types_to_ignore: Vec<String>,
    pub properties_to_ignore: Vec<String>,
    pub labels_to_ignore: Vec<String>,
    pub labels_to_delete: Vec<String>,
    pub keep_node_ids: bool,
    pub batch_size: u64,
    pub queue_capacity: usize,
    pub threads: usize,
    pub max_in_flight: usize,
    pub log_dir: Option<PathBuf>,
    pub target_format: StoreFormat,
    pub persist_id_map: bool,
    pub overwrite: bool,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            source_dir: None,
            target_dir: None,
            rel_types_to_ignore: Vec::new(),
            properties_to_ignore: Vec::new(),
            labels_to_ignore: Vec::new(),
            labels_to_delete: Vec::new(),
            keep_node_ids: true,
            batch_size: BATCH_SIZE,
            queue_capacity: QUEUE_CAPACITY,
            threads: default_threads(),
            max_in_flight: MAX_IN_FLIGHT_SHARDS,
            log_dir: None,
            target_format: StoreFormat::default(),
            persist_id_map: false,
            overwrite: false,
        }
    }
}

impl CopyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CopyError> {
        toml::from_str(text).map_err(|e| CopyError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, CopyError> {
        let text = fs::read_to_string(path)
            .map_err(|e| CopyError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn filters(&self) -> CopyFilters {
        let collect = |names: &[String]| -> BTreeSet<String> {
            names
                .iter()
                .flat_map(|n| split_names(n))
                .collect()
        };
        CopyFilters {
            ignore_rel_types: collect(&self.rel_types_to_ignore),
            ignore_properties: collect(&self.properties_to_ignore),
            ignore_labels: collect(&self.labels_to_ignore),
            delete_nodes_with_labels: collect(&self.labels_to_delete),
        }
    }

    /// Directory for the per-record error log, defaulting to the target store.
    pub fn error_log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref().or(self.target_dir.as_deref())
    }

    pub fn validate(&self) -> Result<(), CopyError> {
        let mut problems = Vec::new();
        if self.source_dir.is_none() {
            problems.push("source store directory missing");
        }
        if self.target_dir.is_none() {
            problems.push("target store directory missing");
        }
        if self.batch_size == 0 {
            problems.push("batch_size must be positive");
        }
        if self.queue_capacity == 0 {
            problems.push("queue_capacity must be positive");
        }
        if self.threads == 0 {
            problems.push("threads must be positive");
        }
        if self.max_in_flight == 0 {
            problems.push("max_in_flight must be positive");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CopyError::Config(problems.join("; ")))
        }
    }
}
