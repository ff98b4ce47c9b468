//! Verifies a finished copy by counting both stores under the same ignore rules.

use crate::config::CopyFilters;
use crate::error::StoreError;
use crate::model::{GraphRecordId, NodeRecord, Properties, PropertyValue, TokenCategory};
use crate::shard::{shard, Shard};
use crate::store::SourceReader;
use anyhow::{ensure, Context, Result};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Node property mismatches reported before the rest are only counted.
pub const MAX_REPORTED_MISMATCHES: usize = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub nodes: u64,
    pub node_properties: u64,
    pub relationships: u64,
    pub relationship_properties: u64,
    pub labels: BTreeMap<String, u64>,
}

impl StoreCounts {
    fn merged(mut self, other: StoreCounts) -> StoreCounts {
        self.nodes += other.nodes;
        self.node_properties += other.node_properties;
        self.relationships += other.relationships;
        self.relationship_properties += other.relationship_properties;
        for (label, count) in other.labels {
            *self.labels.entry(label).or_default() += count;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub source: StoreCounts,
    pub target: StoreCounts,
    pub differences: Vec<String>,
    pub property_mismatches: u64,
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        self.differences.is_empty() && self.property_mismatches == 0
    }
}

/// Lowercased names excluded from counting.
#[derive(Debug, Clone, Default)]
pub struct CompareRules {
    ignore_rel_types: FxHashSet<String>,
    ignore_properties: FxHashSet<String>,
    ignore_labels: FxHashSet<String>,
    delete_labels: FxHashSet<String>,
}

impl CompareRules {
    pub fn new(filters: &CopyFilters) -> Self {
        let lower = |names: &std::collections::BTreeSet<String>| -> FxHashSet<String> {
            names.iter().map(|n| n.to_lowercase()).collect()
        };
        Self {
            ignore_rel_types: lower(&filters.ignore_rel_types),
            ignore_properties: lower(&filters.ignore_properties),
            ignore_labels: lower(&filters.ignore_labels),
            delete_labels: lower(&filters.delete_nodes_with_labels),
        }
    }
}

/// Token names of one store, by id.
struct Names {
    by_category: [Vec<Option<String>>; 3],
}

impl Names {
    fn read(store: &dyn SourceReader) -> Result<Self, StoreError> {
        let mut by_category: [Vec<Option<String>>; 3] = Default::default();
        for category in TokenCategory::ALL {
            let names = &mut by_category[category.index()];
            for token in store.all_tokens(category)? {
                let slot = token.id as usize;
                if slot >= names.len() {
                    names.resize(slot + 1, None);
                }
                names[slot] = Some(token.name);
            }
        }
        Ok(Self { by_category })
    }

    fn name(&self, category: TokenCategory, id: u32) -> &str {
        self.by_category[category.index()]
            .get(id as usize)
            .and_then(|n| n.as_deref())
            .unwrap_or("")
    }
}

struct Counter<'a> {
    store: &'a dyn SourceReader,
    names: Names,
    rules: &'a CompareRules,
}

impl Counter<'_> {
    fn kept_node(&self, id: GraphRecordId) -> Result<Option<NodeRecord>, StoreError> {
        let node = match self.store.read_node(id) {
            Ok(node) => node,
            Err(e) if e.is_not_in_use() => return Ok(None),
            Err(e) => return Err(e),
        };
        let deleted = node.labels.iter().any(|l| {
            self.rules
                .delete_labels
                .contains(&self.names.name(TokenCategory::Label, *l).to_lowercase())
        });
        Ok((!deleted).then_some(node))
    }

    /// Property names and values surviving the ignore rules, sorted by name.
    fn properties(&self, properties: &Properties) -> Vec<(String, PropertyValue)> {
        let mut kept: Vec<(String, PropertyValue)> = properties
            .iter()
            .map(|(key, value)| (self.names.name(TokenCategory::PropertyKey, *key), value))
            .filter(|(name, _)| !self.rules.ignore_properties.contains(&name.to_lowercase()))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        kept.sort_by(|a, b| a.0.cmp(&b.0));
        kept
    }

    fn count_nodes(&self, shard: Shard) -> Result<StoreCounts, StoreError> {
        let mut counts = StoreCounts::default();
        for id in shard.ids() {
            let Some(node) = self.kept_node(id)? else {
                continue;
            };
            counts.nodes += 1;
            counts.node_properties += self.properties(&node.properties).len() as u64;
            for label in &node.labels {
                let name = self.names.name(TokenCategory::Label, *label);
                if !self.rules.ignore_labels.contains(&name.to_lowercase()) {
                    *counts.labels.entry(name.to_string()).or_default() += 1;
                }
            }
        }
        Ok(counts)
    }

    fn count_relationships(&self, shard: Shard) -> Result<StoreCounts, StoreError> {
        let mut counts = StoreCounts::default();
        for id in shard.ids() {
            let rel = match self.store.read_relationship(id) {
                Ok(rel) => rel,
                Err(e) if e.is_not_in_use() => continue,
                Err(e) => return Err(e),
            };
            let rel_type = self.names.name(TokenCategory::RelationshipType, rel.rel_type);
            if self.rules.ignore_rel_types.contains(&rel_type.to_lowercase()) {
                continue;
            }
            if self.kept_node(rel.start_node)?.is_none()
                || self.kept_node(rel.end_node)?.is_none()
            {
                continue;
            }
            counts.relationships += 1;
            counts.relationship_properties += self.properties(&rel.properties).len() as u64;
        }
        Ok(counts)
    }
}

/// Counts nodes, labels, relationships and properties of `store` in parallel.
pub fn count_store(
    store: &dyn SourceReader,
    rules: &CompareRules,
    batch_size: u64,
) -> Result<StoreCounts> {
    ensure!(batch_size > 0, "batch_size must be positive");
    let counter = Counter {
        store,
        names: Names::read(store).context("Failed to read token catalogs")?,
        rules,
    };

    let node_shards: Vec<Shard> = shard(store.highest_node_id()?, batch_size).collect();
    let rel_shards: Vec<Shard> = shard(store.highest_relationship_id()?, batch_size).collect();

    let nodes = node_shards
        .into_par_iter()
        .map(|s| counter.count_nodes(s))
        .try_reduce(StoreCounts::default, |a, b| Ok(a.merged(b)))
        .context("Failed to count nodes")?;
    let relationships = rel_shards
        .into_par_iter()
        .map(|s| counter.count_relationships(s))
        .try_reduce(StoreCounts::default, |a, b| Ok(a.merged(b)))
        .context("Failed to count relationships")?;

    Ok(nodes.merged(relationships))
}

/// Compares two stores. With `same_node_ids` the properties of every node are
/// also compared against the target node with the same id.
pub fn compare_stores(
    source: &dyn SourceReader,
    target: &dyn SourceReader,
    filters: &CopyFilters,
    batch_size: u64,
    same_node_ids: bool,
) -> Result<Comparison> {
    ensure!(batch_size > 0, "batch_size must be positive");
    let rules = CompareRules::new(filters);
    let source_counts = count_store(source, &rules, batch_size).context("Counting source store")?;
    let target_counts = count_store(target, &rules, batch_size).context("Counting target store")?;

    let mut differences = Vec::new();
    let mut diff = |what: &str, a: u64, b: u64| {
        if a != b {
            differences.push(format!("{what}: source {a} != target {b}"));
        }
    };
    diff("nodes", source_counts.nodes, target_counts.nodes);
    diff("node properties", source_counts.node_properties, target_counts.node_properties);
    diff("relationships", source_counts.relationships, target_counts.relationships);
    diff(
        "relationship properties",
        source_counts.relationship_properties,
        target_counts.relationship_properties,
    );
    let labels: FxHashSet<&String> = source_counts
        .labels
        .keys()
        .chain(target_counts.labels.keys())
        .collect();
    let mut labels: Vec<&String> = labels.into_iter().collect();
    labels.sort();
    for label in labels {
        let a = source_counts.labels.get(label).copied().unwrap_or(0);
        let b = target_counts.labels.get(label).copied().unwrap_or(0);
        diff(&format!("label {label}"), a, b);
    }

    let mut property_mismatches = 0;
    if same_node_ids {
        let (mismatches, reported) = compare_node_properties(source, target, &rules, batch_size)?;
        property_mismatches = mismatches;
        differences.extend(reported);
    }

    info!(
        differences = differences.len(),
        property_mismatches, "Store comparison finished"
    );
    Ok(Comparison {
        source: source_counts,
        target: target_counts,
        differences,
        property_mismatches,
    })
}

fn compare_node_properties(
    source: &dyn SourceReader,
    target: &dyn SourceReader,
    rules: &CompareRules,
    batch_size: u64,
) -> Result<(u64, Vec<String>)> {
    let source_counter = Counter {
        store: source,
        names: Names::read(source)?,
        rules,
    };
    let target_counter = Counter {
        store: target,
        names: Names::read(target)?,
        rules,
    };

    let shards: Vec<Shard> = shard(source.highest_node_id()?, batch_size).collect();
    let (count, mut reported) = shards
        .into_par_iter()
        .map(|s| -> Result<(u64, Vec<String>), StoreError> {
            let mut count = 0;
            let mut lines = Vec::new();
            for id in s.ids() {
                let Some(node) = source_counter.kept_node(id)? else {
                    continue;
                };
                let expected = source_counter.properties(&node.properties);
                let actual = match target.read_node(id) {
                    Ok(t) => target_counter.properties(&t.properties),
                    Err(e) if e.is_not_in_use() => Vec::new(),
                    Err(e) => return Err(e),
                };
                if expected != actual {
                    count += 1;
                    if lines.len() < MAX_REPORTED_MISMATCHES {
                        lines.push(format!(
                            "node {id} properties: source {expected:?} != target {actual:?}"
                        ));
                    }
                }
            }
            Ok((count, lines))
        })
        .try_reduce(
            || (0, Vec::new()),
            |(a, mut la), (b, lb)| {
                la.extend(lb);
                Ok((a + b, la))
            },
        )
        .context("Failed to compare node properties")?;

    reported.sort();
    reported.truncate(MAX_REPORTED_MISMATCHES);
    Ok((count, reported))
}
