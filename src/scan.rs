//! Scan workers: read one shard of ids, filter, translate, emit.
//!
//! A scanner classifies every id into a [`ScanOutcome`]. Only
//! [`ScanOutcome::Accepted`] records reach the queue; the others are counted,
//! and read failures are also written to the error log. None of them stop the
//! shard.

use crate::cancel::Cancellation;
use crate::errorlog::ErrorLog;
use crate::error::StoreError;
use crate::idmap::IdMap;
use crate::model::{
    EntityKind, GraphRecordId, NodeRecord, Properties, RelationshipRecord, Token, TokenCategory,
    TokenId,
};
use crate::queue::{QueueProducer, QueueStopped};
use crate::shard::Shard;
use crate::stats::{PhaseProgress, ShardStats};
use crate::store::SourceReader;
use crate::tokens::TokenTables;
use indicatif::ProgressBar;
use std::time::Instant;

#[derive(Debug)]
pub enum ScanOutcome<T> {
    Accepted(T),
    NotInUse,
    /// Excluded by an ignore/delete rule or a dangling endpoint.
    FilteredOut,
    ReadFailure(ReadFailure),
}

/// An unexpected failure reading one record.
#[derive(Debug)]
pub struct ReadFailure {
    pub error: StoreError,
    /// Source-space relationship type, when the record was read far enough to know it.
    pub rel_type: Option<TokenId>,
}

impl<T> ScanOutcome<T> {
    fn from_read_error(error: StoreError) -> Self {
        if error.is_not_in_use() {
            ScanOutcome::NotInUse
        } else {
            ScanOutcome::ReadFailure(ReadFailure {
                error,
                rel_type: None,
            })
        }
    }
}

/// One entity variant of the scan.
pub trait Scanner: Sync {
    type Entity: Send;

    const KIND: EntityKind;

    fn highest_id(&self) -> Result<Option<GraphRecordId>, StoreError>;

    fn scan(&self, id: GraphRecordId) -> ScanOutcome<Self::Entity>;

    fn log_failure(&self, id: GraphRecordId, failure: &ReadFailure, log: &ErrorLog);

    fn flush(&self);
}

pub struct NodeScanner<'a> {
    source: &'a dyn SourceReader,
    tokens: &'a TokenTables,
}

impl<'a> NodeScanner<'a> {
    pub fn new(source: &'a dyn SourceReader, tokens: &'a TokenTables) -> Self {
        Self { source, tokens }
    }
}

impl Scanner for NodeScanner<'_> {
    type Entity = NodeRecord;

    const KIND: EntityKind = EntityKind::Node;

    fn highest_id(&self) -> Result<Option<GraphRecordId>, StoreError> {
        self.source.highest_node_id()
    }

    fn scan(&self, id: GraphRecordId) -> ScanOutcome<NodeRecord> {
        match self.source.node_exists(id) {
            Ok(true) => {}
            Ok(false) => return ScanOutcome::NotInUse,
            Err(e) => return ScanOutcome::from_read_error(e),
        }
        let node = match self.source.read_node(id) {
            Ok(node) => node,
            Err(e) => return ScanOutcome::from_read_error(e),
        };

        if self.tokens.delete_labels.intersects(&node.labels) {
            return ScanOutcome::FilteredOut;
        }

        let mut labels = Vec::with_capacity(node.labels.len());
        for label in node.labels {
            if self.tokens.ignore_labels.contains(label) {
                continue;
            }
            match self.tokens.translate(TokenCategory::Label, label) {
                Some(target) => labels.push(target),
                None => {
                    return ScanOutcome::ReadFailure(ReadFailure {
                        error: unknown_token(id, TokenCategory::Label, label),
                        rel_type: None,
                    })
                }
            }
        }

        match translate_properties(id, node.properties, self.tokens) {
            Ok(properties) => ScanOutcome::Accepted(NodeRecord {
                id,
                labels,
                properties,
            }),
            Err(error) => ScanOutcome::ReadFailure(ReadFailure {
                error,
                rel_type: None,
            }),
        }
    }

    fn log_failure(&self, id: GraphRecordId, failure: &ReadFailure, log: &ErrorLog) {
        log.record_node(id, &failure.error);
    }

    fn flush(&self) {
        self.source.flush();
    }
}

pub struct RelationshipScanner<'a> {
    source: &'a dyn SourceReader,
    tokens: &'a TokenTables,
    id_map: &'a IdMap,
    type_names: Vec<Token>,
}

impl<'a> RelationshipScanner<'a> {
    /// `type_names` is the source relationship-type catalog, used for log lines.
    pub fn new(
        source: &'a dyn SourceReader,
        tokens: &'a TokenTables,
        id_map: &'a IdMap,
        type_names: Vec<Token>,
    ) -> Self {
        Self {
            source,
            tokens,
            id_map,
            type_names,
        }
    }

    fn type_name(&self, rel_type: TokenId) -> Option<&str> {
        self.type_names
            .iter()
            .find(|t| t.id == rel_type)
            .map(|t| t.name.as_str())
    }
}

impl Scanner for RelationshipScanner<'_> {
    type Entity = RelationshipRecord;

    const KIND: EntityKind = EntityKind::Relationship;

    fn highest_id(&self) -> Result<Option<GraphRecordId>, StoreError> {
        self.source.highest_relationship_id()
    }

    fn scan(&self, id: GraphRecordId) -> ScanOutcome<RelationshipRecord> {
        let rel = match self.source.read_relationship(id) {
            Ok(rel) => rel,
            Err(e) => return ScanOutcome::from_read_error(e),
        };

        if self.tokens.ignore_rel_types.contains(rel.rel_type) {
            return ScanOutcome::FilteredOut;
        }
        let (Some(start_node), Some(end_node)) =
            (self.id_map.get(rel.start_node), self.id_map.get(rel.end_node))
        else {
            return ScanOutcome::FilteredOut;
        };

        let source_type = rel.rel_type;
        let failure = |error: StoreError| -> ScanOutcome<RelationshipRecord> {
            ScanOutcome::ReadFailure(ReadFailure {
                error,
                rel_type: Some(source_type),
            })
        };
        let Some(rel_type) = self
            .tokens
            .translate(TokenCategory::RelationshipType, rel.rel_type)
        else {
            return failure(unknown_token(id, TokenCategory::RelationshipType, rel.rel_type));
        };

        match translate_properties(id, rel.properties, self.tokens) {
            Ok(properties) => ScanOutcome::Accepted(RelationshipRecord {
                id,
                start_node,
                end_node,
                rel_type,
                properties,
            }),
            Err(error) => failure(error),
        }
    }

    fn log_failure(&self, id: GraphRecordId, failure: &ReadFailure, log: &ErrorLog) {
        let name = failure.rel_type.and_then(|t| self.type_name(t));
        log.record_relationship(id, name, &failure.error);
    }

    fn flush(&self) {
        self.source.flush();
    }
}

fn unknown_token(id: GraphRecordId, category: TokenCategory, token: TokenId) -> StoreError {
    StoreError::InvalidRecord {
        id,
        reason: format!("{category} token {token} missing from catalog"),
    }
}

/// Drops ignored keys and maps the rest into the target token space.
fn translate_properties(
    id: GraphRecordId,
    properties: Properties,
    tokens: &TokenTables,
) -> Result<Properties, StoreError> {
    let mut translated = Vec::with_capacity(properties.len());
    for (key, value) in properties {
        if tokens.ignore_properties.contains(key) {
            continue;
        }
        match tokens.translate(TokenCategory::PropertyKey, key) {
            Some(target) => translated.push((target, value)),
            None => return Err(unknown_token(id, TokenCategory::PropertyKey, key)),
        }
    }
    Ok(translated)
}

/// Per-phase state every shard task reads.
pub struct ShardEnv<'a> {
    pub cancel: &'a Cancellation,
    pub error_log: &'a ErrorLog,
    pub progress: &'a PhaseProgress,
    pub bar: &'a ProgressBar,
    pub flush_interval: u64,
    pub output_batch: u64,
}

/// Scans every id of `shard` in ascending order and offers accepted records.
///
/// Stops early only when the copy is cancelled or the consumer is gone; the
/// partial counters are returned together with the reason.
pub fn scan_shard<S: Scanner>(
    scanner: &S,
    shard: Shard,
    producer: &QueueProducer<S::Entity>,
    env: &ShardEnv<'_>,
) -> (ShardStats, Option<QueueStopped>) {
    let started = Instant::now();
    let mut stats = ShardStats::default();
    let mut unreported = 0u64;
    let mut stopped = None;
    let flush_interval = env.flush_interval.max(1);
    let output_batch = env.output_batch.max(1);

    for id in shard.ids() {
        if env.cancel.is_cancelled() {
            stopped = Some(QueueStopped::Cancelled);
            break;
        }
        stats.scanned += 1;
        unreported += 1;

        match scanner.scan(id) {
            ScanOutcome::Accepted(entity) => match producer.offer(entity) {
                Ok(()) => {
                    stats.succeeded += 1;
                    env.progress.inc_emitted();
                }
                Err(reason) => {
                    stopped = Some(reason);
                    break;
                }
            },
            ScanOutcome::NotInUse => stats.not_found += 1,
            ScanOutcome::FilteredOut => stats.removed += 1,
            ScanOutcome::ReadFailure(failure) => {
                stats.read_failures += 1;
                scanner.log_failure(id, &failure, env.error_log);
            }
        }

        if stats.scanned % flush_interval == 0 {
            scanner.flush();
        }
        if unreported == output_batch {
            env.progress.add_scanned(unreported);
            env.bar.inc(unreported);
            unreported = 0;
        }
    }

    env.progress.add_scanned(unreported);
    env.bar.inc(unreported);
    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    (stats, stopped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CopyFilters;
    use crate::idmap::NodeIdMap;
    use crate::model::PropertyValue;
    use crate::queue::{bounded_queue, Poll};
    use crate::store::MemoryGraph;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn source() -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        let ada = graph.add_node(
            &["Person"],
            vec![("name", "Ada".into()), ("pin", 1234i64.into())],
        );
        let root = graph.add_node(&["Person", "Admin"], vec![("name", "root".into())]);
        let bob = graph.add_node(&["Person", "Temp"], vec![]);
        graph.add_relationship(ada, root, "KNOWS", vec![]);
        graph.add_relationship(ada, bob, "LIKES", vec![("since", 2001i64.into())]);
        graph.add_relationship(bob, ada, "KNOWS", vec![]);
        graph
    }

    fn tables(source: &MemoryGraph, filters: &CopyFilters) -> (TokenTables, MemoryGraph) {
        let mut target = MemoryGraph::new();
        let tables = TokenTables::build(source, &mut target, filters).unwrap();
        (tables, target)
    }

    #[test]
    fn node_with_delete_label_is_filtered() {
        let source = source();
        let filters = CopyFilters {
            delete_nodes_with_labels: names(&["Admin"]),
            ..CopyFilters::default()
        };
        let (tables, _) = tables(&source, &filters);
        let scanner = NodeScanner::new(&source, &tables);

        assert!(matches!(scanner.scan(0), ScanOutcome::Accepted(_)));
        assert!(matches!(scanner.scan(1), ScanOutcome::FilteredOut));
    }

    #[test]
    fn node_scan_strips_ignored_tokens() {
        let source = source();
        let filters = CopyFilters {
            ignore_labels: names(&["temp"]),
            ignore_properties: names(&["PIN"]),
            ..CopyFilters::default()
        };
        let (tables, target) = tables(&source, &filters);
        let scanner = NodeScanner::new(&source, &tables);

        let ScanOutcome::Accepted(ada) = scanner.scan(0) else {
            panic!("node 0 should be accepted");
        };
        assert_eq!(
            target.named_properties(&ada.properties),
            vec![("name".to_string(), PropertyValue::String("Ada".into()))]
        );

        let ScanOutcome::Accepted(bob) = scanner.scan(2) else {
            panic!("node 2 should be accepted");
        };
        assert_eq!(bob.labels.len(), 1);
        assert_eq!(target.token_name(TokenCategory::Label, bob.labels[0]), Some("Person"));
    }

    #[test]
    fn deleted_node_is_not_in_use() {
        let mut source = source();
        source.delete_node(2);
        let (tables, _) = tables(&source, &CopyFilters::default());
        let scanner = NodeScanner::new(&source, &tables);
        assert!(matches!(scanner.scan(2), ScanOutcome::NotInUse));
        assert!(matches!(scanner.scan(99), ScanOutcome::NotInUse));
    }

    #[test]
    fn relationship_to_unmapped_node_is_filtered() {
        let source = source();
        let (tables, _) = tables(&source, &CopyFilters::default());
        let map = NodeIdMap::new();
        map.insert(0, 0);
        map.insert(2, 1);
        let id_map = map.freeze();
        let scanner = RelationshipScanner::new(&source, &tables, &id_map, Vec::new());

        assert!(matches!(scanner.scan(0), ScanOutcome::FilteredOut));
        let ScanOutcome::Accepted(likes) = scanner.scan(1) else {
            panic!("relationship 1 should be accepted");
        };
        assert_eq!((likes.start_node, likes.end_node), (0, 1));
        assert_eq!(likes.properties.len(), 1);
    }

    #[test]
    fn ignored_type_matches_case_insensitively() {
        let source = source();
        let filters = CopyFilters {
            ignore_rel_types: names(&["knows"]),
            ..CopyFilters::default()
        };
        let (tables, _) = tables(&source, &filters);
        let id_map: IdMap = [(0, 0), (1, 1), (2, 2)].into_iter().collect();
        let scanner = RelationshipScanner::new(&source, &tables, &id_map, Vec::new());

        assert!(matches!(scanner.scan(0), ScanOutcome::FilteredOut));
        assert!(matches!(scanner.scan(1), ScanOutcome::Accepted(_)));
        assert!(matches!(scanner.scan(2), ScanOutcome::FilteredOut));
    }

    #[test]
    fn scan_shard_counts_every_outcome() {
        let mut source = source();
        source.delete_node(1);
        let (tables, _) = tables(&source, &CopyFilters {
            ignore_labels: BTreeSet::new(),
            delete_nodes_with_labels: names(&["Temp"]),
            ..CopyFilters::default()
        });
        let scanner = NodeScanner::new(&source, &tables);

        let cancel = Cancellation::new();
        let (producer, consumer) = bounded_queue(16, &cancel);
        let consumer = consumer.with_poll_timeout(Duration::from_millis(5));
        let log = ErrorLog::disabled();
        let progress = PhaseProgress::new();
        let bar = ProgressBar::hidden();
        let env = ShardEnv {
            cancel: &cancel,
            error_log: &log,
            progress: &progress,
            bar: &bar,
            flush_interval: 2,
            output_batch: 2,
        };

        let shard = Shard { index: 0, start: 0, end: 4 };
        let (stats, stopped) = scan_shard(&scanner, shard, &producer, &env);

        assert!(stopped.is_none());
        assert_eq!(stats.scanned, 4);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.not_found, 2);
        assert_eq!(stats.removed, 1);
        assert_eq!(progress.scanned(), 4);
        assert_eq!(bar.position(), 4);
        assert!(matches!(consumer.poll(), Poll::Item(NodeRecord { id: 0, .. })));
        assert_eq!(consumer.poll(), Poll::Idle);
    }

    #[test]
    fn cancelled_shard_stops_early() {
        let source = source();
        let (tables, _) = tables(&source, &CopyFilters::default());
        let scanner = NodeScanner::new(&source, &tables);
        let cancel = Cancellation::new();
        cancel.cancel(crate::error::CopyError::Cancelled);
        let (producer, _consumer) = bounded_queue(16, &cancel);
        let log = ErrorLog::disabled();
        let progress = PhaseProgress::new();
        let bar = ProgressBar::hidden();
        let env = ShardEnv {
            cancel: &cancel,
            error_log: &log,
            progress: &progress,
            bar: &bar,
            flush_interval: 100,
            output_batch: 100,
        };

        let shard = Shard { index: 0, start: 0, end: 3 };
        let (stats, stopped) = scan_shard(&scanner, shard, &producer, &env);
        assert_eq!(stopped, Some(QueueStopped::Cancelled));
        assert_eq!(stats.scanned, 0);
    }
}
