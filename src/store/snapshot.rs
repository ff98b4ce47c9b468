//! File-backed store: one bincode snapshot per store directory.
//!
//! Two revisions of the format are understood. Revision 1 keys labels, types
//! and property keys by name on every record; revision 2 stores token ids and
//! the three token catalogs. Readers detect the revision from the header.

use super::memory::{MemoryGraph, TokenCatalog};
use super::TargetWriter;
use crate::config::{SNAPSHOT_FILE, SNAPSHOT_MAGIC};
use crate::error::StoreError;
use crate::model::{
    GraphRecordId, NodeRecord, Properties, PropertyValue, RelationshipRecord, TokenCategory,
    TokenId,
};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFormat {
    V1,
    #[default]
    V2,
}

impl StoreFormat {
    fn version(self) -> u32 {
        match self {
            StoreFormat::V1 => 1,
            StoreFormat::V2 => 2,
        }
    }

    fn from_version(version: u32) -> Option<Self> {
        match version {
            1 => Some(StoreFormat::V1),
            2 => Some(StoreFormat::V2),
            _ => None,
        }
    }
}

impl fmt::Display for StoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version())
    }
}

impl FromStr for StoreFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(StoreFormat::V1),
            "v2" | "2" => Ok(StoreFormat::V2),
            other => Err(format!("unknown store format '{other}' (expected v1 or v2)")),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotHeader {
    magic: [u8; 8],
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct NamedNode {
    labels: Vec<String>,
    properties: Vec<(String, PropertyValue)>,
}

#[derive(Serialize, Deserialize)]
struct NamedRelationship {
    start_node: GraphRecordId,
    end_node: GraphRecordId,
    rel_type: String,
    properties: Vec<(String, PropertyValue)>,
}

/// Revision 1 payload: name-keyed records, no catalogs.
#[derive(Serialize, Deserialize)]
struct NamedGraph {
    nodes: Vec<Option<NamedNode>>,
    relationships: Vec<Option<NamedRelationship>>,
}

pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Reads the revision of the snapshot in `dir` without loading its payload.
pub fn detect_format(dir: &Path) -> Result<StoreFormat, StoreError> {
    let path = snapshot_path(dir);
    let file = File::open(&path)?;
    let header = read_header(&mut BufReader::new(file), &path)?;
    StoreFormat::from_version(header.version)
        .ok_or_else(|| {
            StoreError::Format(format!("unsupported snapshot revision {}", header.version))
        })
}

/// Loads the snapshot in `dir`, converting older revisions into the in-memory model.
pub fn open_snapshot(dir: &Path) -> Result<MemoryGraph, StoreError> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Err(StoreError::Format(format!("no snapshot found at {}", path.display())));
    }

    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let mut reader = BufReader::with_capacity(256 * 1024, File::open(&path)?);
    let header = read_header(&mut reader, &path)?;
    let options = bincode::DefaultOptions::new().with_limit(file_size.saturating_add(1024));

    let graph: MemoryGraph = match StoreFormat::from_version(header.version) {
        Some(StoreFormat::V2) => options
            .deserialize_from(&mut reader)
            .map_err(|e| StoreError::Format(format!("corrupt revision 2 snapshot: {e}")))?,
        Some(StoreFormat::V1) => {
            let named: NamedGraph = options
                .deserialize_from(&mut reader)
                .map_err(|e| StoreError::Format(format!("corrupt revision 1 snapshot: {e}")))?;
            from_named(named)
        }
        None => {
            return Err(StoreError::Format(format!(
                "unsupported snapshot revision {}",
                header.version
            )))
        }
    };

    info!(
        path = ?path,
        revision = header.version,
        "Snapshot loaded"
    );
    Ok(graph)
}

/// Writes `graph` into `dir` in the requested revision, atomically via rename.
pub fn save_snapshot(
    graph: &MemoryGraph,
    dir: &Path,
    format: StoreFormat,
) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    let path = snapshot_path(dir);
    let tmp_path = path.with_extension("snapshot.tmp");

    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    let header = SnapshotHeader {
        magic: SNAPSHOT_MAGIC,
        version: format.version(),
    };
    bincode::DefaultOptions::new()
        .serialize_into(&mut writer, &header)
        .map_err(|e| StoreError::Format(e.to_string()))?;

    let options = bincode::DefaultOptions::new();
    match format {
        StoreFormat::V2 => options.serialize_into(&mut writer, graph),
        StoreFormat::V1 => options.serialize_into(&mut writer, &to_named(graph)),
    }
    .map_err(|e| StoreError::Format(format!("failed to serialize snapshot: {e}")))?;

    writer
        .into_inner()
        .map_err(|e| StoreError::Io(e.into_error()))?
        .sync_all()?;
    fs::rename(&tmp_path, &path)?;

    debug!(path = ?path, revision = format.version(), "Snapshot saved");
    Ok(())
}

fn read_header(reader: &mut BufReader<File>, path: &Path) -> Result<SnapshotHeader, StoreError> {
    let header: SnapshotHeader = bincode::DefaultOptions::new()
        .with_limit(64)
        .deserialize_from(reader)
        .map_err(|e| {
            StoreError::Format(format!("unreadable snapshot header in {}: {e}", path.display()))
        })?;
    if header.magic != SNAPSHOT_MAGIC {
        return Err(StoreError::Format(format!(
            "{} is not a store snapshot",
            path.display()
        )));
    }
    Ok(header)
}

fn intern_named(
    catalogs: &mut [TokenCatalog; 3],
    props: Vec<(String, PropertyValue)>,
) -> Properties {
    props
        .into_iter()
        .map(|(key, value)| {
            (
                catalogs[TokenCategory::PropertyKey.index()].get_or_create(&key),
                value,
            )
        })
        .collect()
}

fn from_named(named: NamedGraph) -> MemoryGraph {
    let mut catalogs: [TokenCatalog; 3] = Default::default();

    let nodes = named
        .nodes
        .into_iter()
        .enumerate()
        .map(|(id, slot)| {
            slot.map(|node| NodeRecord {
                id: id as GraphRecordId,
                labels: node
                    .labels
                    .iter()
                    .map(|l| catalogs[TokenCategory::Label.index()].get_or_create(l))
                    .collect(),
                properties: intern_named(&mut catalogs, node.properties),
            })
        })
        .collect();

    let relationships = named
        .relationships
        .into_iter()
        .enumerate()
        .map(|(id, slot)| {
            slot.map(|rel| RelationshipRecord {
                id: id as GraphRecordId,
                start_node: rel.start_node,
                end_node: rel.end_node,
                rel_type: catalogs[TokenCategory::RelationshipType.index()]
                    .get_or_create(&rel.rel_type),
                properties: intern_named(&mut catalogs, rel.properties),
            })
        })
        .collect();

    MemoryGraph::from_parts(catalogs, nodes, relationships)
}

fn to_named(graph: &MemoryGraph) -> NamedGraph {
    let name_of = |category: TokenCategory, id: TokenId| {
        graph
            .token_name(category, id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{id}"))
    };
    let named_properties = |props: &Properties| {
        props
            .iter()
            .map(|(key, value)| (name_of(TokenCategory::PropertyKey, *key), value.clone()))
            .collect()
    };

    NamedGraph {
        nodes: graph
            .node_slots()
            .iter()
            .map(|slot| {
                slot.as_ref().map(|node| NamedNode {
                    labels: node
                        .labels
                        .iter()
                        .map(|l| name_of(TokenCategory::Label, *l))
                        .collect(),
                    properties: named_properties(&node.properties),
                })
            })
            .collect(),
        relationships: graph
            .relationship_slots()
            .iter()
            .map(|slot| {
                slot.as_ref().map(|rel| NamedRelationship {
                    start_node: rel.start_node,
                    end_node: rel.end_node,
                    rel_type: name_of(TokenCategory::RelationshipType, rel.rel_type),
                    properties: named_properties(&rel.properties),
                })
            })
            .collect(),
    }
}

/// Bulk loader for snapshot stores: accumulates in memory, persists on `close`.
pub struct SnapshotWriter {
    dir: PathBuf,
    format: StoreFormat,
    graph: MemoryGraph,
    closed: bool,
}

impl SnapshotWriter {
    pub fn create(dir: &Path, format: StoreFormat) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            format,
            graph: MemoryGraph::new(),
            closed: false,
        })
    }

    pub fn graph(&self) -> &MemoryGraph {
        &self.graph
    }
}

impl TargetWriter for SnapshotWriter {
    fn ensure_token(&mut self, category: TokenCategory, name: &str) -> Result<TokenId, StoreError> {
        self.graph.ensure_token(category, name)
    }

    fn create_node(
        &mut self,
        id: Option<GraphRecordId>,
        labels: Vec<TokenId>,
        properties: Properties,
    ) -> Result<GraphRecordId, StoreError> {
        self.graph.create_node(id, labels, properties)
    }

    fn create_relationship(
        &mut self,
        start_node: GraphRecordId,
        end_node: GraphRecordId,
        rel_type: TokenId,
        properties: Properties,
    ) -> Result<GraphRecordId, StoreError> {
        self.graph
            .create_relationship(start_node, end_node, rel_type, properties)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        save_snapshot(&self.graph, &self.dir, self.format)?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SourceReader;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_graph() -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(&["Person"], vec![("name", "Ada".into())]);
        let gone = graph.add_node(&["Person"], vec![]);
        let b = graph.add_node(&["Person", "Admin"], vec![("name", "Bob".into())]);
        graph.add_relationship(a, b, "KNOWS", vec![("since", 2001i64.into())]);
        graph.delete_node(gone);
        graph
    }

    #[test]
    fn revision_2_roundtrip_is_exact() {
        let dir = TempDir::new().unwrap();
        let graph = sample_graph();
        save_snapshot(&graph, dir.path(), StoreFormat::V2).unwrap();

        assert_eq!(detect_format(dir.path()).unwrap(), StoreFormat::V2);
        assert_eq!(open_snapshot(dir.path()).unwrap(), graph);
    }

    #[test]
    fn revision_1_keeps_names_and_gaps() {
        let dir = TempDir::new().unwrap();
        let graph = sample_graph();
        save_snapshot(&graph, dir.path(), StoreFormat::V1).unwrap();

        assert_eq!(detect_format(dir.path()).unwrap(), StoreFormat::V1);
        let loaded = open_snapshot(dir.path()).unwrap();
        assert_eq!(loaded.node_count(), 2);
        assert!(loaded.read_node(1).unwrap_err().is_not_in_use());
        assert_eq!(loaded.label_names(2), vec!["Person", "Admin"]);

        let rel = loaded.relationship(0).unwrap();
        assert_eq!(
            loaded.token_name(TokenCategory::RelationshipType, rel.rel_type),
            Some("KNOWS")
        );
    }

    #[test]
    fn missing_snapshot_is_format_error() {
        let dir = TempDir::new().unwrap();
        let err = open_snapshot(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Format(_)));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut file = File::create(snapshot_path(dir.path())).unwrap();
        file.write_all(b"definitely not a snapshot file").unwrap();

        let err = open_snapshot(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a store snapshot"));
    }

    #[test]
    fn writer_persists_only_on_close() {
        let dir = TempDir::new().unwrap();
        let mut writer = SnapshotWriter::create(dir.path(), StoreFormat::V2).unwrap();
        let label = writer.ensure_token(TokenCategory::Label, "Person").unwrap();
        writer.create_node(Some(0), vec![label], vec![]).unwrap();
        assert!(!snapshot_path(dir.path()).exists());

        writer.close().unwrap();
        writer.close().unwrap();
        let loaded = open_snapshot(dir.path()).unwrap();
        assert_eq!(loaded.label_names(0), vec!["Person"]);
    }

    #[test]
    fn format_parses_from_str() {
        assert_eq!("v1".parse::<StoreFormat>().unwrap(), StoreFormat::V1);
        assert_eq!("2".parse::<StoreFormat>().unwrap(), StoreFormat::V2);
        assert!("v3".parse::<StoreFormat>().is_err());
    }
}
