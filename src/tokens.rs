//! Token translation between source and target token spaces.
//!
//! Everything here is resolved once, single-threaded, before any shard is
//! scanned. The resulting [`TokenTables`] are immutable and shared read-only by
//! every scan worker.

use crate::config::CopyFilters;
use crate::error::CopyError;
use crate::model::{Token, TokenCategory, TokenId};
use crate::store::{SourceReader, TargetWriter};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Sorted source-space token ids to exclude.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    ids: Vec<TokenId>,
}

impl IgnoreSet {
    pub fn new(mut ids: Vec<TokenId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    pub fn contains(&self, id: TokenId) -> bool {
        !self.ids.is_empty() && self.ids.binary_search(&id).is_ok()
    }

    /// True when any of `ids` is in the set.
    pub fn intersects(&self, ids: &[TokenId]) -> bool {
        !self.ids.is_empty() && ids.iter().any(|id| self.contains(*id))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[TokenId] {
        &self.ids
    }
}

/// Source token id -> target token id for one category.
///
/// Ignored tokens have no entry, so a lookup for them yields `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTable {
    targets: Vec<Option<TokenId>>,
}

impl TokenTable {
    pub fn translate(&self, source: TokenId) -> Option<TokenId> {
        self.targets.get(source as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, source: TokenId, target: TokenId) {
        let slot = source as usize;
        if slot >= self.targets.len() {
            self.targets.resize(slot + 1, None);
        }
        self.targets[slot] = Some(target);
    }
}

/// Source tokens matched against the configured names, before target creation.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTokens {
    pub ignore_labels: IgnoreSet,
    pub delete_labels: IgnoreSet,
    pub ignore_rel_types: IgnoreSet,
    pub ignore_properties: IgnoreSet,
    /// Tokens per category that survive the ignore rules, indexed by [`TokenCategory::index`].
    pub copied: [Vec<Token>; 3],
}

impl ResolvedTokens {
    /// Reads the source catalogs and resolves the ignore/delete names to ids.
    ///
    /// A configured name that does not exist in the source resolves to nothing.
    pub fn resolve(source: &dyn SourceReader, filters: &CopyFilters) -> Result<Self, CopyError> {
        let labels = read_catalog(source, TokenCategory::Label)?;
        let rel_types = read_catalog(source, TokenCategory::RelationshipType)?;
        let property_keys = read_catalog(source, TokenCategory::PropertyKey)?;

        let ignore_labels = match_names(&labels, &filters.ignore_labels, TokenCategory::Label);
        let delete_labels = match_names(
            &labels,
            &filters.delete_nodes_with_labels,
            TokenCategory::Label,
        );
        let ignore_rel_types = match_names(
            &rel_types,
            &filters.ignore_rel_types,
            TokenCategory::RelationshipType,
        );
        let ignore_properties = match_names(
            &property_keys,
            &filters.ignore_properties,
            TokenCategory::PropertyKey,
        );

        let keep = |tokens: Vec<Token>, excluded: &[&IgnoreSet]| -> Vec<Token> {
            tokens
                .into_iter()
                .filter(|t| !excluded.iter().any(|set| set.contains(t.id)))
                .collect()
        };
        let copied = [
            keep(labels, &[&ignore_labels, &delete_labels]),
            keep(rel_types, &[&ignore_rel_types]),
            keep(property_keys, &[&ignore_properties]),
        ];

        Ok(Self {
            ignore_labels,
            delete_labels,
            ignore_rel_types,
            ignore_properties,
            copied,
        })
    }
}

/// Immutable translation state shared by the scan workers of both phases.
#[derive(Debug, Clone, Default)]
pub struct TokenTables {
    pub ignore_labels: IgnoreSet,
    pub delete_labels: IgnoreSet,
    pub ignore_rel_types: IgnoreSet,
    pub ignore_properties: IgnoreSet,
    tables: [TokenTable; 3],
}

impl TokenTables {
    /// Resolves the source tokens and creates every surviving one in the target.
    pub fn build(
        source: &dyn SourceReader,
        target: &mut dyn TargetWriter,
        filters: &CopyFilters,
    ) -> Result<Self, CopyError> {
        let resolved = ResolvedTokens::resolve(source, filters)?;
        Self::materialize(resolved, target)
    }

    /// Creates the target tokens for `resolved`. Creating an existing name is a no-op.
    pub fn materialize(
        resolved: ResolvedTokens,
        target: &mut dyn TargetWriter,
    ) -> Result<Self, CopyError> {
        let mut tables: [TokenTable; 3] = Default::default();
        for category in TokenCategory::ALL {
            let table = &mut tables[category.index()];
            for token in &resolved.copied[category.index()] {
                let target_id = target.ensure_token(category, &token.name).map_err(|e| {
                    let what = format!("cannot create {category} '{}' in target", token.name);
                    CopyError::setup(what, e)
                })?;
                table.insert(token.id, target_id);
            }
            debug!(%category, tokens = table.len(), "Target tokens created");
        }

        info!(
            labels = tables[TokenCategory::Label.index()].len(),
            rel_types = tables[TokenCategory::RelationshipType.index()].len(),
            property_keys = tables[TokenCategory::PropertyKey.index()].len(),
            "Token tables ready"
        );

        Ok(Self {
            ignore_labels: resolved.ignore_labels,
            delete_labels: resolved.delete_labels,
            ignore_rel_types: resolved.ignore_rel_types,
            ignore_properties: resolved.ignore_properties,
            tables,
        })
    }

    fn table(&self, category: TokenCategory) -> &TokenTable {
        &self.tables[category.index()]
    }

    pub fn translate(&self, category: TokenCategory, source: TokenId) -> Option<TokenId> {
        self.table(category).translate(source)
    }
}

fn read_catalog(
    source: &dyn SourceReader,
    category: TokenCategory,
) -> Result<Vec<Token>, CopyError> {
    source
        .all_tokens(category)
        .map_err(|e| CopyError::setup(format!("cannot read {category} tokens from source"), e))
}

fn match_names(tokens: &[Token], names: &BTreeSet<String>, category: TokenCategory) -> IgnoreSet {
    if names.is_empty() {
        return IgnoreSet::default();
    }
    let wanted: FxHashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
    let found: FxHashSet<String> = tokens
        .iter()
        .map(|t| t.name.to_lowercase())
        .filter(|name| wanted.contains(name))
        .collect();
    let ids: Vec<TokenId> = tokens
        .iter()
        .filter(|t| wanted.contains(&t.name.to_lowercase()))
        .map(|t| t.id)
        .collect();

    for name in names {
        if !found.contains(&name.to_lowercase()) {
            warn!(
                %category,
                name = %name,
                "Configured name not found in source, nothing to ignore"
            );
        }
    }
    IgnoreSet::new(ids)
}
