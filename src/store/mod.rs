//! Capability interfaces of the stores a copy reads from and writes into.
//!
//! The pipeline is polymorphic over [`SourceReader`] and [`TargetWriter`]; each
//! supported backend revision provides one implementation and is picked by
//! configuration through [`open_source`] and [`create_target`].

pub mod memory;
pub mod snapshot;

use crate::error::StoreError;
use crate::model::{
    GraphRecordId, NodeRecord, Properties, RelationshipRecord, Token, TokenCategory, TokenId,
};
use std::path::Path;

pub use memory::MemoryGraph;
pub use snapshot::{SnapshotWriter, StoreFormat};

/// Read access to a source store. Shared by every scan worker at once.
pub trait SourceReader: Send + Sync {
    /// Highest node id possibly in use, `None` for an empty id space.
    fn highest_node_id(&self) -> Result<Option<GraphRecordId>, StoreError>;

    fn highest_relationship_id(&self) -> Result<Option<GraphRecordId>, StoreError>;

    fn node_exists(&self, id: GraphRecordId) -> Result<bool, StoreError>;

    /// Returns [`StoreError::NotInUse`] for a deleted or unallocated slot.
    fn read_node(&self, id: GraphRecordId) -> Result<NodeRecord, StoreError>;

    fn read_relationship(&self, id: GraphRecordId) -> Result<RelationshipRecord, StoreError>;

    fn all_tokens(&self, category: TokenCategory) -> Result<Vec<Token>, StoreError>;

    /// Releases memory the reader retained during a long sequential scan.
    fn flush(&self) {}
}

/// Write-only bulk loader. Never driven by more than one thread at a time.
pub trait TargetWriter: Send {
    /// Returns the target id for `name`, creating the token on first use.
    fn ensure_token(&mut self, category: TokenCategory, name: &str) -> Result<TokenId, StoreError>;

    /// Creates a node with the requested id, or the next free id when `id` is `None`.
    fn create_node(
        &mut self,
        id: Option<GraphRecordId>,
        labels: Vec<TokenId>,
        properties: Properties,
    ) -> Result<GraphRecordId, StoreError>;

    fn create_relationship(
        &mut self,
        start_node: GraphRecordId,
        end_node: GraphRecordId,
        rel_type: TokenId,
        properties: Properties,
    ) -> Result<GraphRecordId, StoreError>;

    fn close(&mut self) -> Result<(), StoreError>;
}

/// Opens the store at `dir` for reading, detecting its revision from the file header.
pub fn open_source(dir: &Path) -> Result<Box<dyn SourceReader>, StoreError> {
    let graph = snapshot::open_snapshot(dir)?;
    Ok(Box::new(graph))
}

/// Creates an empty store at `dir` that is written in `format` when closed.
pub fn create_target(dir: &Path, format: StoreFormat) -> Result<Box<dyn TargetWriter>, StoreError> {
    Ok(Box::new(SnapshotWriter::create(dir, format)?))
}
