use crate::cancel::Cancellation;
use crate::error::CopyError;
use crate::errorlog::ErrorLog;
use crate::idmap::NodeIdMap;
use crate::model::{EntityKind, NodeRecord, RelationshipRecord};
use crate::queue::{Poll, QueueConsumer};
use crate::stats::PhaseProgress;
use crate::store::TargetWriter;
use tracing::{debug, trace};

/// Drains `queue` into `load` until end of stream.
///
/// A failed load is fatal: it cancels the run with the loader error as cause
/// and returns [`CopyError::Cancelled`]. A queue closed without end of stream
/// is fatal too and is written to `error_log`. Returns the number of loaded
/// records.
pub fn drain<T>(
    queue: &QueueConsumer<T>,
    cancel: &Cancellation,
    kind: EntityKind,
    progress: &PhaseProgress,
    error_log: &ErrorLog,
    mut load: impl FnMut(T) -> Result<(), CopyError>,
) -> Result<u64, CopyError> {
    let mut loaded = 0u64;
    loop {
        cancel.check()?;
        match queue.poll() {
            Poll::Item(entity) => {
                if let Err(err) = load(entity) {
                    cancel.cancel(err);
                    return Err(CopyError::Cancelled);
                }
                loaded += 1;
                progress.inc_loaded();
            }
            Poll::EndOfStream => {
                cancel.check()?;
                debug!(%kind, loaded, "End of stream");
                return Ok(loaded);
            }
            Poll::Idle => trace!(%kind, "Queue idle, re-checking cancellation"),
            Poll::Closed => {
                let err = CopyError::QueueClosed {
                    phase: kind.to_string(),
                };
                error_log.record_message(&format!("Consumer: {err}"));
                cancel.cancel(err);
                return Err(CopyError::Cancelled);
            }
        }
    }
}

/// Creates nodes in the target and records each accepted id correspondence.
///
/// With `keep_node_ids` the target is asked for the source id; otherwise it
/// assigns the next free one.
pub fn load_node(
    writer: &mut dyn TargetWriter,
    id_map: &NodeIdMap,
    keep_node_ids: bool,
    error_log: &ErrorLog,
    node: NodeRecord,
) -> Result<(), CopyError> {
    let source_id = node.id;
    match writer.create_node(keep_node_ids.then_some(source_id), node.labels, node.properties) {
        Ok(target_id) => {
            id_map.insert(source_id, target_id);
            Ok(())
        }
        Err(source) => {
            error_log.record_loader(EntityKind::Node, source_id, &source);
            Err(CopyError::LoaderWrite {
                kind: EntityKind::Node,
                id: source_id,
                source,
            })
        }
    }
}

pub fn load_relationship(
    writer: &mut dyn TargetWriter,
    error_log: &ErrorLog,
    rel: RelationshipRecord,
) -> Result<(), CopyError> {
    writer
        .create_relationship(rel.start_node, rel.end_node, rel.rel_type, rel.properties)
        .map(|_| ())
        .map_err(|source| {
            error_log.record_loader(EntityKind::Relationship, rel.id, &source);
            CopyError::LoaderWrite {
                kind: EntityKind::Relationship,
                id: rel.id,
                source,
            }
        })
}
