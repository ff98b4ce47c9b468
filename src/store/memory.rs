use super::{SourceReader, TargetWriter};
use crate::error::StoreError;
use crate::model::{
    GraphRecordId, NodeRecord, Properties, PropertyValue, RelationshipRecord, Token, TokenCategory,
    TokenId,
};
use serde::{Deserialize, Serialize};

/// Token names of one category; the position in `names` is the token id.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCatalog {
    names: Vec<String>,
}

impl TokenCatalog {
    pub fn get_or_create(&mut self, name: &str) -> TokenId {
        if let Some(id) = self.id_of(name) {
            return id;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as TokenId
    }

    pub fn id_of(&self, name: &str) -> Option<TokenId> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|pos| pos as TokenId)
    }

    pub fn name(&self, id: TokenId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn contains(&self, id: TokenId) -> bool {
        (id as usize) < self.names.len()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.names
            .iter()
            .enumerate()
            .map(|(id, name)| Token::new(id as TokenId, name.clone()))
            .collect()
    }
}

/// A dense-id graph held entirely in memory.
///
/// Implements both sides of a copy: it is the reader for snapshot stores once
/// loaded, and the accumulating writer behind [`super::SnapshotWriter`].
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryGraph {
    tokens: [TokenCatalog; 3],
    nodes: Vec<Option<NodeRecord>>,
    relationships: Vec<Option<RelationshipRecord>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self, category: TokenCategory) -> &TokenCatalog {
        &self.tokens[category.index()]
    }

    pub fn token(&mut self, category: TokenCategory, name: &str) -> TokenId {
        self.tokens[category.index()].get_or_create(name)
    }

    pub fn token_name(&self, category: TokenCategory, id: TokenId) -> Option<&str> {
        self.catalog(category).name(id)
    }

    /// Appends a node at the next free id, interning label and property names.
    pub fn add_node(
        &mut self,
        labels: &[&str],
        properties: Vec<(&str, PropertyValue)>,
    ) -> GraphRecordId {
        let labels = labels
            .iter()
            .map(|l| self.token(TokenCategory::Label, l))
            .collect();
        let properties = self.intern_properties(properties);
        let id = self.nodes.len() as GraphRecordId;
        self.nodes.push(Some(NodeRecord {
            id,
            labels,
            properties,
        }));
        id
    }

    pub fn add_relationship(
        &mut self,
        start_node: GraphRecordId,
        end_node: GraphRecordId,
        rel_type: &str,
        properties: Vec<(&str, PropertyValue)>,
    ) -> GraphRecordId {
        let rel_type = self.token(TokenCategory::RelationshipType, rel_type);
        let properties = self.intern_properties(properties);
        let id = self.relationships.len() as GraphRecordId;
        self.relationships.push(Some(RelationshipRecord {
            id,
            start_node,
            end_node,
            rel_type,
            properties,
        }));
        id
    }

    /// Frees a node slot, leaving a not-in-use gap.
    pub fn delete_node(&mut self, id: GraphRecordId) {
        if let Some(slot) = self.nodes.get_mut(id as usize) {
            *slot = None;
        }
    }

    pub fn delete_relationship(&mut self, id: GraphRecordId) {
        if let Some(slot) = self.relationships.get_mut(id as usize) {
            *slot = None;
        }
    }

    pub fn node(&self, id: GraphRecordId) -> Option<&NodeRecord> {
        self.nodes.get(id as usize).and_then(Option::as_ref)
    }

    pub fn relationship(&self, id: GraphRecordId) -> Option<&RelationshipRecord> {
        self.relationships.get(id as usize).and_then(Option::as_ref)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().flatten()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipRecord> {
        self.relationships.iter().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships().count()
    }

    /// Label names of a live node, in stored order.
    pub fn label_names(&self, id: GraphRecordId) -> Vec<String> {
        self.node(id)
            .map(|n| {
                n.labels
                    .iter()
                    .filter_map(|l| self.token_name(TokenCategory::Label, *l))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Properties keyed by name, sorted by key.
    pub fn named_properties(&self, properties: &Properties) -> Vec<(String, PropertyValue)> {
        let mut named: Vec<_> = properties
            .iter()
            .filter_map(|(key, value)| {
                self.token_name(TokenCategory::PropertyKey, *key)
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        named
    }

    pub(crate) fn from_parts(
        tokens: [TokenCatalog; 3],
        nodes: Vec<Option<NodeRecord>>,
        relationships: Vec<Option<RelationshipRecord>>,
    ) -> Self {
        Self {
            tokens,
            nodes,
            relationships,
        }
    }

    pub(crate) fn node_slots(&self) -> &[Option<NodeRecord>] {
        &self.nodes
    }

    pub(crate) fn relationship_slots(&self) -> &[Option<RelationshipRecord>] {
        &self.relationships
    }

    fn intern_properties(&mut self, properties: Vec<(&str, PropertyValue)>) -> Properties {
        properties
            .into_iter()
            .map(|(key, value)| (self.token(TokenCategory::PropertyKey, key), value))
            .collect()
    }

    fn check_tokens(
        &self,
        category: TokenCategory,
        ids: impl IntoIterator<Item = TokenId>,
    ) -> Result<(), StoreError> {
        let catalog = self.catalog(category);
        for id in ids {
            if !catalog.contains(id) {
                return Err(StoreError::Rejected(format!("unknown {category} token {id}")));
            }
        }
        Ok(())
    }

    fn node_in_use(&self, id: GraphRecordId) -> bool {
        self.node(id).is_some()
    }
}

impl SourceReader for MemoryGraph {
    fn highest_node_id(&self) -> Result<Option<GraphRecordId>, StoreError> {
        Ok(self.nodes.len().checked_sub(1).map(|id| id as GraphRecordId))
    }

    fn highest_relationship_id(&self) -> Result<Option<GraphRecordId>, StoreError> {
        Ok(self
            .relationships
            .len()
            .checked_sub(1)
            .map(|id| id as GraphRecordId))
    }

    fn node_exists(&self, id: GraphRecordId) -> Result<bool, StoreError> {
        Ok(self.node_in_use(id))
    }

    fn read_node(&self, id: GraphRecordId) -> Result<NodeRecord, StoreError> {
        self.node(id).cloned().ok_or(StoreError::NotInUse(id))
    }

    fn read_relationship(&self, id: GraphRecordId) -> Result<RelationshipRecord, StoreError> {
        self.relationship(id).cloned().ok_or(StoreError::NotInUse(id))
    }

    fn all_tokens(&self, category: TokenCategory) -> Result<Vec<Token>, StoreError> {
        Ok(self.catalog(category).tokens())
    }
}

impl TargetWriter for MemoryGraph {
    fn ensure_token(&mut self, category: TokenCategory, name: &str) -> Result<TokenId, StoreError> {
        Ok(self.token(category, name))
    }

    fn create_node(
        &mut self,
        id: Option<GraphRecordId>,
        labels: Vec<TokenId>,
        properties: Properties,
    ) -> Result<GraphRecordId, StoreError> {
        self.check_tokens(TokenCategory::Label, labels.iter().copied())?;
        self.check_tokens(TokenCategory::PropertyKey, properties.iter().map(|(k, _)| *k))?;

        let id = match id {
            Some(id) => {
                if self.node_in_use(id) {
                    return Err(StoreError::Rejected(format!("node {id} already exists")));
                }
                let slot = id as usize;
                if slot >= self.nodes.len() {
                    self.nodes.resize(slot + 1, None);
                }
                id
            }
            None => {
                self.nodes.push(None);
                (self.nodes.len() - 1) as GraphRecordId
            }
        };

        self.nodes[id as usize] = Some(NodeRecord {
            id,
            labels,
            properties,
        });
        Ok(id)
    }

    fn create_relationship(
        &mut self,
        start_node: GraphRecordId,
        end_node: GraphRecordId,
        rel_type: TokenId,
        properties: Properties,
    ) -> Result<GraphRecordId, StoreError> {
        for endpoint in [start_node, end_node] {
            if !self.node_in_use(endpoint) {
                return Err(StoreError::Rejected(format!(
                    "relationship endpoint {endpoint} does not exist"
                )));
            }
        }
        self.check_tokens(TokenCategory::RelationshipType, [rel_type])?;
        self.check_tokens(TokenCategory::PropertyKey, properties.iter().map(|(k, _)| *k))?;

        let id = self.relationships.len() as GraphRecordId;
        self.relationships.push(Some(RelationshipRecord {
            id,
            start_node,
            end_node,
            rel_type,
            properties,
        }));
        Ok(id)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_interned_once() {
        let mut graph = MemoryGraph::new();
        let a = graph.token(TokenCategory::Label, "Person");
        let b = graph.token(TokenCategory::Label, "Person");
        let c = graph.token(TokenCategory::PropertyKey, "Person");
        assert_eq!(a, b);
        assert_eq!(c, 0);
        assert_eq!(graph.catalog(TokenCategory::Label).len(), 1);
    }

    #[test]
    fn deleted_node_reads_as_not_in_use() {
        let mut graph = MemoryGraph::new();
        let id = graph.add_node(&["Person"], vec![]);
        graph.add_node(&["Person"], vec![]);
        graph.delete_node(id);

        assert!(!graph.node_exists(id).unwrap());
        assert!(graph.read_node(id).unwrap_err().is_not_in_use());
        assert_eq!(graph.highest_node_id().unwrap(), Some(1));
    }

    #[test]
    fn empty_graph_has_no_highest_id() {
        let graph = MemoryGraph::new();
        assert_eq!(graph.highest_node_id().unwrap(), None);
        assert_eq!(graph.highest_relationship_id().unwrap(), None);
    }

    #[test]
    fn create_node_with_explicit_id_leaves_gap() {
        let mut graph = MemoryGraph::new();
        let label = graph.ensure_token(TokenCategory::Label, "Person").unwrap();
        let id = graph.create_node(Some(3), vec![label], vec![]).unwrap();

        assert_eq!(id, 3);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.read_node(1).unwrap_err().is_not_in_use());
        assert!(graph.create_node(Some(3), vec![], vec![]).is_err());
    }

    #[test]
    fn create_node_without_id_compacts() {
        let mut graph = MemoryGraph::new();
        assert_eq!(graph.create_node(None, vec![], vec![]).unwrap(), 0);
        assert_eq!(graph.create_node(None, vec![], vec![]).unwrap(), 1);
    }

    #[test]
    fn create_node_rejects_unknown_token() {
        let mut graph = MemoryGraph::new();
        let err = graph.create_node(None, vec![7], vec![]).unwrap_err();
        assert!(err.to_string().contains("unknown label token 7"));
    }

    #[test]
    fn relationship_requires_live_endpoints() {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(&[], vec![]);
        let knows = graph.ensure_token(TokenCategory::RelationshipType, "KNOWS").unwrap();

        assert!(graph.create_relationship(a, 9, knows, vec![]).is_err());
        assert_eq!(graph.create_relationship(a, a, knows, vec![]).unwrap(), 0);
    }

    #[test]
    fn named_properties_resolve_keys() {
        let mut graph = MemoryGraph::new();
        let id = graph.add_node(&[], vec![("name", "Ada".into()), ("age", 36i64.into())]);
        let node = graph.node(id).unwrap().clone();
        let named = graph.named_properties(&node.properties);
        assert_eq!(
            named,
            vec![
                ("age".to_string(), PropertyValue::Int(36)),
                ("name".to_string(), PropertyValue::String("Ada".into())),
            ]
        );
    }
}
