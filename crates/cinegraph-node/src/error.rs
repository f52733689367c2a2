//! Error types for graph edits.

use thiserror::Error;

use crate::node::NodeId;

/// Errors from structural graph mutations.
///
/// Value queries never return these; they log and fall back to defaults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Input not found: {0}")]
    InputNotFound(String),

    #[error("Input {0} is not connectable")]
    NotConnectable(String),

    #[error("Input {0} is already connected")]
    AlreadyConnected(String),

    #[error("Input {0} is not connected to {1}")]
    NotConnected(String, NodeId),

    #[error("Connection would create a cycle: {0}")]
    Cycle(String),

    #[error("Invalid element {1} for input {0}")]
    InvalidElement(String, i32),
}

/// Result type alias for graph edits.
pub type Result<T> = std::result::Result<T, GraphError>;
