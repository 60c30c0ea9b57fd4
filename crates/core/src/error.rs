use thiserror::Error;

/// Entity kinds a lookup can fail on, used in `GraphError::NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Workflow,
    Widget,
    Input,
    Output,
    Connection,
    AbstractWidget,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EntityKind::Workflow => "workflow",
            EntityKind::Widget => "widget",
            EntityKind::Input => "input",
            EntityKind::Output => "output",
            EntityKind::Connection => "connection",
            EntityKind::AbstractWidget => "abstract widget",
        };
        f.write_str(label)
    }
}

/// Errors raised by the graph-mutation core.
///
/// Every variant is synchronous and leaves persisted state exactly as it
/// was before the failing call. Reconnecting an already-connected input is
/// a defined replace, not an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("cannot connect widgets from different workflows")]
    CrossWorkflow,

    #[error("adding this connection would result in a cycle in the workflow")]
    Cycle,

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
}

impl GraphError {
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
