//! Graph entities: workflows, widgets, input/output slots and connections.
//!
//! Everything here is plain serializable data; structural rules (cycle
//! freedom, fan-in, multi-group bookkeeping) live in `graph` and `mutation`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Ok(Self(raw.parse()?))
            }
        }
    };
}

entity_id!(WorkflowId);
entity_id!(WidgetId);
entity_id!(InputId);
entity_id!(OutputId);
entity_id!(ConnectionId);
entity_id!(AbstractWidgetId);
entity_id!(AbstractInputId);
entity_id!(AbstractOutputId);

/// A user-assembled directed graph of widgets.
///
/// The workflow owns its widgets and connections outright; every contained
/// entity carries this workflow's id and nothing is shared across workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    /// Username of the owning user.
    pub owner: String,
    pub public: bool,
    /// Set iff this workflow is the inlined body of a subprocess widget.
    pub widget: Option<WidgetId>,
    pub widgets: Vec<Widget>,
    pub connections: Vec<Connection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, public: bool) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            owner: owner.into(),
            public,
            widget: None,
            widgets: Vec::new(),
            connections: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_subprocess(&self) -> bool {
        self.widget.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Regular,
    Input,
    Output,
    Subprocess,
}

/// A node in the workflow graph, instantiated from a catalog template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: WidgetId,
    pub workflow: WorkflowId,
    pub name: String,
    pub kind: WidgetKind,
    /// Canvas position, only meaningful to layout.
    pub x: f64,
    pub y: f64,
    pub abstract_widget: Option<AbstractWidgetId>,
    pub finished: bool,
    pub running: bool,
    pub error: bool,
    pub progress: u8,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Widget {
    /// Clears stale execution-completion state after the widget's incoming
    /// graph changed.
    pub fn unfinish(&mut self) {
        self.finished = false;
        self.error = false;
    }

    pub fn input(&self, id: InputId) -> Option<&Input> {
        self.inputs.iter().find(|input| input.id == id)
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|output| output.id == id)
    }
}

/// A named slot on a widget that receives a value, either directly
/// (`value`) or via a connection. At most one connection may target it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub id: InputId,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub variable: String,
    pub required: bool,
    /// Configuration parameter as opposed to a data feed.
    pub parameter: bool,
    pub parameter_type: Option<String>,
    pub value: Option<serde_json::Value>,
    /// `Some(group)` marks this slot as a member of the repeatable
    /// multi-group cloned from the template input `group`.
    pub multi_id: Option<AbstractInputId>,
    /// 1-based position among same-kind (parameter vs data) siblings.
    pub order: u32,
    pub abstract_input: Option<AbstractInputId>,
    pub options: Vec<InputOption>,
}

/// A named slot on a widget that produces a value; any number of
/// connections may originate from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub variable: String,
    pub order: u32,
    pub value: Option<serde_json::Value>,
    pub abstract_output: Option<AbstractOutputId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOption {
    pub name: String,
    pub value: String,
}

/// A directed edge from one widget's output to another widget's input,
/// scoped to exactly one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub workflow: WorkflowId,
    pub output: OutputId,
    pub input: InputId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_subprocess_derived_from_widget_backref() {
        let mut workflow = Workflow::new("flow", "ana", false);
        assert!(!workflow.is_subprocess());

        workflow.widget = Some(WidgetId::new());
        assert!(workflow.is_subprocess());
    }

    #[test]
    fn test_unfinish_clears_completion_flags_only() {
        let mut widget = Widget {
            id: WidgetId::new(),
            workflow: WorkflowId::new(),
            name: "node".to_string(),
            kind: WidgetKind::Regular,
            x: 0.0,
            y: 0.0,
            abstract_widget: None,
            finished: true,
            running: true,
            error: true,
            progress: 80,
            inputs: Vec::new(),
            outputs: Vec::new(),
        };

        widget.unfinish();

        assert!(!widget.finished);
        assert!(!widget.error);
        assert!(widget.running);
        assert_eq!(widget.progress, 80);
    }

    #[test]
    fn test_entity_id_json_roundtrip_is_transparent() {
        let id = WidgetId::new();
        let encoded = serde_json::to_string(&id).expect("id should serialize");
        assert!(encoded.starts_with('"'));

        let decoded: WidgetId = serde_json::from_str(&encoded).expect("id should deserialize");
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_entity_id_parses_from_display_form() {
        let id = ConnectionId::new();
        let parsed: ConnectionId = id.to_string().parse().expect("id should parse");
        assert_eq!(parsed, id);
    }
}
