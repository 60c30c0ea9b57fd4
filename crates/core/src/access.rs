//! Owner-based access decisions for workflows and the entities they
//! contain.
//!
//! Contained entities (widgets, connections, slots) resolve to their
//! owning workflow through the `Scoped` capability; the yes/no decision
//! itself is always taken against that workflow.

use crate::model::{Connection, Widget, Workflow, WorkflowId};

/// The authenticated caller, as handed over by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_admin: false,
        }
    }

    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_admin: true,
        }
    }
}

/// Entities that live inside exactly one workflow.
pub trait Scoped {
    fn workflow_id(&self) -> WorkflowId;
}

impl Scoped for Widget {
    fn workflow_id(&self) -> WorkflowId {
        self.workflow
    }
}

impl Scoped for Connection {
    fn workflow_id(&self) -> WorkflowId {
        self.workflow
    }
}

pub fn can_read(principal: &Principal, workflow: &Workflow) -> bool {
    workflow.public || can_write(principal, workflow)
}

pub fn can_write(principal: &Principal, workflow: &Workflow) -> bool {
    principal.is_admin || workflow.owner == principal.username
}
