use crate::types::{Rank, ReductionStage};

pub type Result<T> = std::result::Result<T, HierSyncError>;

#[derive(Debug, thiserror::Error)]
pub enum HierSyncError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("topology error: {reason}")]
    Topology { reason: String },

    #[error(
        "{stage} failed at rank {rank} (node {node_index}, group {group:?}): {reason}"
    )]
    Reduction {
        stage: ReductionStage,
        rank: Rank,
        node_index: u32,
        group: Vec<Rank>,
        reason: String,
    },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank}: group size is {size}")]
    InvalidRank { rank: Rank, size: u32 },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl HierSyncError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn topology(reason: impl Into<String>) -> Self {
        Self::Topology {
            reason: reason.into(),
        }
    }

    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The pipeline stage a `Reduction` error was raised in.
    pub fn stage(&self) -> Option<ReductionStage> {
        match self {
            Self::Reduction { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
