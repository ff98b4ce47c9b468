use crate::model::{EntityKind, GraphRecordId};
use thiserror::Error;

/// Failures reported by a source reader or target writer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The id denotes a deleted or never-allocated record.
    #[error("record {0} not in use")]
    NotInUse(GraphRecordId),

    #[error("invalid record {id}: {reason}")]
    InvalidRecord { id: GraphRecordId, reason: String },

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("store format error: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_in_use(&self) -> bool {
        matches!(self, StoreError::NotInUse(_))
    }
}

/// Failures that abort a copy phase or the whole run.
///
/// Not-in-use slots, filtered records and per-record read failures are never
/// represented here; the scan workers count them (and log read failures) and
/// carry on with the shard.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("setup failed: {context}")]
    Setup {
        context: String,
        #[source]
        source: Option<StoreError>,
    },

    #[error("bulk loader failed to create {kind} {id}")]
    LoaderWrite {
        kind: EntityKind,
        id: GraphRecordId,
        #[source]
        source: StoreError,
    },

    #[error("{phase} scan worker panicked: {message}")]
    WorkerPanic { phase: String, message: String },

    #[error("{phase} queue closed before end of stream")]
    QueueClosed { phase: String },

    #[error("copy cancelled")]
    Cancelled,

    #[error("closing target store failed")]
    Close(#[source] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CopyError {
    pub fn setup(context: impl Into<String>, source: StoreError) -> Self {
        CopyError::Setup {
            context: context.into(),
            source: Some(source),
        }
    }

    pub fn setup_msg(context: impl Into<String>) -> Self {
        CopyError::Setup {
            context: context.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn not_in_use_is_classified() {
        assert!(StoreError::NotInUse(5).is_not_in_use());
        assert!(!StoreError::InvalidRecord {
            id: 5,
            reason: "bad chain".into()
        }
        .is_not_in_use());
    }

    #[test]
    fn loader_write_keeps_cause() {
        let err = CopyError::LoaderWrite {
            kind: EntityKind::Node,
            id: 42,
            source: StoreError::Rejected("disk full".into()),
        };
        assert_eq!(err.to_string(), "bulk loader failed to create node 42");
        let cause = err.source().map(|s| s.to_string());
        assert_eq!(cause.as_deref(), Some("write rejected: disk full"));
    }

    #[test]
    fn setup_without_source() {
        let err = CopyError::setup_msg("source store does not exist");
        assert!(err.source().is_none());
        assert!(err.to_string().contains("source store does not exist"));
    }
}
