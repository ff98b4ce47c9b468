use crate::config::{ID_MAP_FILE, ID_MAP_VERSION};
use crate::model::GraphRecordId;
use anyhow::{bail, Context, Result};
use bincode::Options;
use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Source node id -> target node id, filled while the node phase runs.
///
/// Only the bulk consumer inserts, and only after the target accepted the node.
#[derive(Debug, Default)]
pub struct NodeIdMap {
    map: DashMap<GraphRecordId, GraphRecordId, FxBuildHasher>,
}

impl NodeIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: GraphRecordId, target: GraphRecordId) {
        self.map.insert(source, target);
    }

    pub fn get(&self, source: GraphRecordId) -> Option<GraphRecordId> {
        self.map.get(&source).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Ends the build step. The returned map is read-only.
    pub fn freeze(self) -> IdMap {
        let mut map = FxHashMap::with_capacity_and_hasher(self.map.len(), FxBuildHasher);
        map.extend(self.map);
        IdMap { map }
    }
}

/// Frozen id correspondence consulted by the relationship phase.
///
/// A missing entry means the node was not found, filtered out, or never
/// created in the target.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdMap {
    map: FxHashMap<GraphRecordId, GraphRecordId>,
}

#[derive(Serialize)]
struct IdMapSer<'a> {
    version: u32,
    entries: &'a FxHashMap<GraphRecordId, GraphRecordId>,
}

#[derive(Deserialize)]
struct IdMapDe {
    version: u32,
    entries: FxHashMap<GraphRecordId, GraphRecordId>,
}

pub fn id_map_path(target_dir: &Path) -> PathBuf {
    target_dir.join(ID_MAP_FILE)
}

impl IdMap {
    pub fn get(&self, source: GraphRecordId) -> Option<GraphRecordId> {
        self.map.get(&source).copied()
    }

    pub fn contains(&self, source: GraphRecordId) -> bool {
        self.map.contains_key(&source)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Entries ordered by source id.
    pub fn sorted_entries(&self) -> Vec<(GraphRecordId, GraphRecordId)> {
        let mut entries: Vec<_> = self.map.iter().map(|(s, t)| (*s, *t)).collect();
        entries.sort_unstable();
        entries
    }

    /// Writes the map to `path` via a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let tmp_path = path.with_extension("bin.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp id map file: {:?}", tmp_path))?;
        let mut writer = BufWriter::new(file);

        bincode::DefaultOptions::new()
            .serialize_into(
                &mut writer,
                &IdMapSer {
                    version: ID_MAP_VERSION,
                    entries: &self.map,
                },
            )
            .context("Failed to serialize id map")?;
        writer.flush().context("Failed to flush id map")?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename temp id map file to: {:?}", path))?;

        info!(entries = self.map.len(), path = ?path, "Id map saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Id map file does not exist: {:?}", path);
        }
        let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let file = File::open(path).with_context(|| format!("Failed to open id map: {:?}", path))?;
        let reader = BufReader::new(file);

        let decoded: IdMapDe = bincode::DefaultOptions::new()
            .with_limit(file_size.saturating_add(1024))
            .deserialize_from(reader)
            .context("Failed to deserialize id map")?;

        if decoded.version != ID_MAP_VERSION {
            bail!(
                "Id map version mismatch: file has {}, expected {}",
                decoded.version,
                ID_MAP_VERSION
            );
        }
        Ok(Self {
            map: decoded.entries,
        })
    }
}

impl FromIterator<(GraphRecordId, GraphRecordId)> for IdMap {
    fn from_iter<I: IntoIterator<Item = (GraphRecordId, GraphRecordId)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}
