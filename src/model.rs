use serde::{Deserialize, Serialize};
use std::fmt;

/// Slot in a dense, append-only id space. Gaps are deleted or never-allocated records.
pub type GraphRecordId = u64;

/// Interned id of a label, relationship type or property key.
pub type TokenId = u32;

/// Property map as stored on a record, keyed by property-key token.
pub type Properties = Vec<(TokenId, PropertyValue)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenCategory {
    Label,
    RelationshipType,
    PropertyKey,
}

impl TokenCategory {
    pub const ALL: [TokenCategory; 3] = [
        TokenCategory::Label,
        TokenCategory::RelationshipType,
        TokenCategory::PropertyKey,
    ];

    pub fn index(self) -> usize {
        match self {
            TokenCategory::Label => 0,
            TokenCategory::RelationshipType => 1,
            TokenCategory::PropertyKey => 2,
        }
    }
}

impl fmt::Display for TokenCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenCategory::Label => "label",
            TokenCategory::RelationshipType => "relationship type",
            TokenCategory::PropertyKey => "property key",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub name: String,
}

impl Token {
    pub fn new(id: TokenId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// A node as read from a source store or handed to a target loader.
///
/// Label and property-key ids are in the token space of whichever store the
/// record belongs to; the scan worker converts source-space records into
/// target-space records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: GraphRecordId,
    pub labels: Vec<TokenId>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: GraphRecordId,
    pub start_node: GraphRecordId,
    pub end_node: GraphRecordId,
    pub rel_type: TokenId,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Relationship,
}

impl EntityKind {
    /// Capitalized plural used in phase summaries.
    pub fn plural(self) -> &'static str {
        match self {
            EntityKind::Node => "Nodes",
            EntityKind::Relationship => "Relationships",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Relationship => f.write_str("relationship"),
        }
    }
}
