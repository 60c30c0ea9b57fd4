//! Shared registry of workflows with per-workflow mutation serialization.
//!
//! Workflows live in a `DashMap`; every read-modify-write runs under the
//! entry's exclusive guard, so two mutations of the same workflow never
//! interleave while unrelated workflows proceed in parallel. Side indexes
//! map slot/connection ids to their owning workflow so the connection API
//! can take bare endpoint ids, the way clients address them.

use chrono::Utc;
use dashmap::DashMap;

use crate::catalog::AbstractWidget;
use crate::error::{EntityKind, GraphError};
use crate::model::{ConnectionId, InputId, OutputId, Widget, WidgetId, Workflow, WorkflowId};
use crate::mutation::{self, ConnectionChange, DisconnectOutcome};

#[derive(Default)]
pub struct GraphStore {
    workflows: DashMap<WorkflowId, Workflow>,
    widget_owners: DashMap<WidgetId, WorkflowId>,
    input_owners: DashMap<InputId, WorkflowId>,
    output_owners: DashMap<OutputId, WorkflowId>,
    connection_owners: DashMap<ConnectionId, WorkflowId>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn create_workflow(
        &self,
        name: impl Into<String>,
        owner: impl Into<String>,
        public: bool,
    ) -> WorkflowId {
        let workflow = Workflow::new(name, owner, public);
        let id = workflow.id;
        self.workflows.insert(id, workflow);
        id
    }

    /// Registers a restored workflow, rebuilding its side indexes.
    pub fn insert_workflow(&self, workflow: Workflow) {
        let id = workflow.id;
        for widget in &workflow.widgets {
            self.index_widget(id, widget);
        }
        for conn in &workflow.connections {
            self.connection_owners.insert(conn.id, id);
        }
        self.workflows.insert(id, workflow);
    }

    pub fn remove_workflow(&self, id: WorkflowId) -> Result<Workflow, GraphError> {
        let (_, workflow) = self
            .workflows
            .remove(&id)
            .ok_or_else(|| GraphError::not_found(EntityKind::Workflow, id))?;
        for widget in &workflow.widgets {
            self.unindex_widget(widget);
        }
        for conn in &workflow.connections {
            self.connection_owners.remove(&conn.id);
        }
        Ok(workflow)
    }

    /// A consistent clone of the workflow, for previews, views and
    /// persistence snapshots.
    pub fn snapshot(&self, id: WorkflowId) -> Result<Workflow, GraphError> {
        self.workflows
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GraphError::not_found(EntityKind::Workflow, id))
    }

    /// Snapshots of every workflow the given user may see: their own plus
    /// public ones.
    pub fn visible_to(&self, username: &str) -> Vec<Workflow> {
        let mut visible: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|entry| entry.public || entry.owner == username)
            .map(|entry| entry.value().clone())
            .collect();
        visible.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        visible
    }

    pub fn workflow_of_widget(&self, id: WidgetId) -> Result<WorkflowId, GraphError> {
        self.widget_owners
            .get(&id)
            .map(|entry| *entry)
            .ok_or_else(|| GraphError::not_found(EntityKind::Widget, id))
    }

    pub fn workflow_of_connection(&self, id: ConnectionId) -> Result<WorkflowId, GraphError> {
        self.connection_owners
            .get(&id)
            .map(|entry| *entry)
            .ok_or_else(|| GraphError::not_found(EntityKind::Connection, id))
    }

    pub fn workflow_of_input(&self, id: InputId) -> Result<WorkflowId, GraphError> {
        self.input_owners
            .get(&id)
            .map(|entry| *entry)
            .ok_or_else(|| GraphError::not_found(EntityKind::Input, id))
    }

    /// Instantiates a template into the workflow and returns a clone of
    /// the new widget.
    pub fn add_widget(
        &self,
        workflow_id: WorkflowId,
        template: &AbstractWidget,
        x: f64,
        y: f64,
    ) -> Result<Widget, GraphError> {
        let mut entry = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| GraphError::not_found(EntityKind::Workflow, workflow_id))?;
        let widget_id = entry.instantiate_widget(template, x, y);
        entry.updated_at = Utc::now();

        let widget = entry
            .widget(widget_id)
            .cloned()
            .ok_or_else(|| GraphError::not_found(EntityKind::Widget, widget_id))?;
        drop(entry);

        self.index_widget(workflow_id, &widget);
        Ok(widget)
    }

    /// Removes a widget with its cascade (inputs, outputs, incident
    /// connections).
    pub fn remove_widget(&self, id: WidgetId) -> Result<(), GraphError> {
        let workflow_id = self.workflow_of_widget(id)?;
        let mut entry = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| GraphError::not_found(EntityKind::Workflow, workflow_id))?;
        let removed = entry.remove_widget(id)?;
        entry.updated_at = Utc::now();
        drop(entry);

        self.unindex_widget(&removed.widget);
        for conn in &removed.connections {
            self.connection_owners.remove(&conn.id);
        }
        Ok(())
    }

    pub fn move_widget(&self, id: WidgetId, x: f64, y: f64) -> Result<(), GraphError> {
        let workflow_id = self.workflow_of_widget(id)?;
        let mut entry = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| GraphError::not_found(EntityKind::Workflow, workflow_id))?;
        let widget = entry
            .widget_mut(id)
            .ok_or_else(|| GraphError::not_found(EntityKind::Widget, id))?;
        widget.x = x;
        widget.y = y;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Creates (or replaces) a connection between two endpoints, which
    /// must belong to the same workflow.
    pub fn create_connection(
        &self,
        output: OutputId,
        input: InputId,
    ) -> Result<ConnectionChange, GraphError> {
        let source_workflow = self
            .output_owners
            .get(&output)
            .map(|entry| *entry)
            .ok_or_else(|| GraphError::not_found(EntityKind::Output, output))?;
        let target_workflow = self
            .input_owners
            .get(&input)
            .map(|entry| *entry)
            .ok_or_else(|| GraphError::not_found(EntityKind::Input, input))?;
        if source_workflow != target_workflow {
            return Err(GraphError::CrossWorkflow);
        }

        let mut entry = self
            .workflows
            .get_mut(&target_workflow)
            .ok_or_else(|| GraphError::not_found(EntityKind::Workflow, target_workflow))?;
        let change = mutation::create_connection(entry.value_mut(), output, input)?;
        entry.updated_at = Utc::now();
        drop(entry);

        if !change.replaced {
            self.connection_owners
                .insert(change.connection.id, target_workflow);
        }
        if let Some(spare) = change.grown_input {
            self.input_owners.insert(spare, target_workflow);
        }
        Ok(change)
    }

    /// Destroys a connection, shrinking its multi-group if applicable.
    pub fn destroy_connection(&self, id: ConnectionId) -> Result<DisconnectOutcome, GraphError> {
        let workflow_id = self.workflow_of_connection(id)?;
        let mut entry = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| GraphError::not_found(EntityKind::Workflow, workflow_id))?;
        let outcome = mutation::destroy_connection(entry.value_mut(), id)?;
        entry.updated_at = Utc::now();
        drop(entry);

        self.connection_owners.remove(&id);
        if let Some(removed) = outcome.removed_input {
            self.input_owners.remove(&removed);
        }
        Ok(outcome)
    }

    fn index_widget(&self, workflow_id: WorkflowId, widget: &Widget) {
        self.widget_owners.insert(widget.id, workflow_id);
        for input in &widget.inputs {
            self.input_owners.insert(input.id, workflow_id);
        }
        for output in &widget.outputs {
            self.output_owners.insert(output.id, workflow_id);
        }
    }

    fn unindex_widget(&self, widget: &Widget) {
        self.widget_owners.remove(&widget.id);
        for input in &widget.inputs {
            self.input_owners.remove(&input.id);
        }
        for output in &widget.outputs {
            self.output_owners.remove(&output.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AbstractInput;
    use crate::graph::test_support::*;

    fn add(store: &GraphStore, workflow: WorkflowId, name: &str) -> Widget {
        store
            .add_widget(workflow, &pass_through_template(name), 0.0, 0.0)
            .expect("widget should be added")
    }

    #[test]
    fn test_cross_workflow_connection_is_rejected_without_mutation() {
        let store = GraphStore::new();
        let first = store.create_workflow("first", "ana", false);
        let second = store.create_workflow("second", "ana", false);

        let source = add(&store, first, "Source");
        let sink = add(&store, second, "Sink");

        let err = store
            .create_connection(source.outputs[0].id, sink.inputs[0].id)
            .expect_err("cross-workflow connect should fail");
        assert_eq!(err, GraphError::CrossWorkflow);

        assert!(store.snapshot(first).expect("first snapshot").connections.is_empty());
        assert!(store.snapshot(second).expect("second snapshot").connections.is_empty());
    }

    #[test]
    fn test_connect_and_disconnect_through_the_store() {
        let store = GraphStore::new();
        let workflow = store.create_workflow("flow", "ana", false);
        let source = add(&store, workflow, "Source");
        let sink = add(&store, workflow, "Sink");

        let change = store
            .create_connection(source.outputs[0].id, sink.inputs[0].id)
            .expect("connect should succeed");
        assert_eq!(
            store.workflow_of_connection(change.connection.id).expect("owner"),
            workflow
        );

        store
            .destroy_connection(change.connection.id)
            .expect("disconnect should succeed");
        let err = store
            .destroy_connection(change.connection.id)
            .expect_err("second disconnect should fail");
        assert!(matches!(err, GraphError::NotFound { .. }));
    }

    #[test]
    fn test_grown_spare_is_addressable_through_the_store() {
        let store = GraphStore::new();
        let workflow = store.create_workflow("flow", "ana", false);
        let source = add(&store, workflow, "Source");
        let sink = store
            .add_widget(
                workflow,
                &widget_template("Concat", vec![multi_input_template("Tables", 1)], vec![]),
                10.0,
                0.0,
            )
            .expect("multi widget should be added");

        let change = store
            .create_connection(source.outputs[0].id, sink.inputs[0].id)
            .expect("connect should succeed");
        let spare = change.grown_input.expect("group should grow");

        // The spare must be routable for the next connection.
        let second = add(&store, workflow, "Second");
        store
            .create_connection(second.outputs[0].id, spare)
            .expect("connect to grown spare should succeed");
    }

    #[test]
    fn test_remove_widget_drops_its_index_entries() {
        let store = GraphStore::new();
        let workflow = store.create_workflow("flow", "ana", false);
        let source = add(&store, workflow, "Source");
        let sink = add(&store, workflow, "Sink");

        store
            .create_connection(source.outputs[0].id, sink.inputs[0].id)
            .expect("connect should succeed");
        store.remove_widget(sink.id).expect("widget should remove");

        assert!(store.workflow_of_widget(sink.id).is_err());
        let err = store
            .create_connection(source.outputs[0].id, sink.inputs[0].id)
            .expect_err("stale input should not resolve");
        assert!(matches!(err, GraphError::NotFound { .. }));

        let snapshot = store.snapshot(workflow).expect("snapshot");
        assert!(snapshot.connections.is_empty());
        assert_eq!(snapshot.widgets.len(), 1);
    }

    #[test]
    fn test_insert_workflow_rebuilds_indexes() {
        let store = GraphStore::new();
        let workflow = store.create_workflow("flow", "ana", false);
        let source = add(&store, workflow, "Source");
        let sink = add(&store, workflow, "Sink");
        store
            .create_connection(source.outputs[0].id, sink.inputs[0].id)
            .expect("connect should succeed");

        let snapshot = store.snapshot(workflow).expect("snapshot");
        let restored = GraphStore::new();
        restored.insert_workflow(snapshot);

        assert_eq!(restored.len(), 1);
        assert_eq!(
            restored.workflow_of_widget(sink.id).expect("owner"),
            workflow
        );
        let conn = restored.snapshot(workflow).expect("snapshot").connections[0].clone();
        restored
            .destroy_connection(conn.id)
            .expect("restored connection should resolve");
    }

    #[test]
    fn test_visible_to_filters_private_workflows() {
        let store = GraphStore::new();
        let own = store.create_workflow("mine", "ana", false);
        let shared = store.create_workflow("shared", "bob", true);
        let _hidden = store.create_workflow("hidden", "bob", false);

        let visible = store.visible_to("ana");
        let ids: Vec<WorkflowId> = visible.iter().map(|w| w.id).collect();

        assert!(ids.contains(&own));
        assert!(ids.contains(&shared));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_parallel_mutations_on_one_workflow_stay_consistent() {
        use std::sync::Arc;

        let store = Arc::new(GraphStore::new());
        let workflow = store.create_workflow("flow", "ana", false);

        let inputs: Vec<AbstractInput> = (0..8)
            .map(|index| data_input_template(&format!("In{index}"), index + 1))
            .collect();
        let sink = store
            .add_widget(workflow, &widget_template("Sink", inputs, vec![]), 100.0, 0.0)
            .expect("sink should be added");
        let sources: Vec<Widget> = (0..8)
            .map(|index| add(&store, workflow, &format!("S{index}")))
            .collect();

        let handles: Vec<_> = sources
            .into_iter()
            .zip(sink.inputs.iter().cloned())
            .map(|(source, input)| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .create_connection(source.outputs[0].id, input.id)
                        .expect("parallel connect should succeed");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread should finish");
        }

        let snapshot = store.snapshot(workflow).expect("snapshot");
        assert_eq!(snapshot.connections.len(), 8);
        assert!(petgraph::algo::toposort(&snapshot.widget_adjacency(), None).is_ok());
    }

    #[test]
    fn test_move_widget_updates_position_only() {
        let store = GraphStore::new();
        let workflow = store.create_workflow("flow", "ana", false);
        let widget = add(&store, workflow, "Widget");

        store
            .move_widget(widget.id, 42.0, 17.0)
            .expect("move should succeed");

        let snapshot = store.snapshot(workflow).expect("snapshot");
        let moved = snapshot.widget(widget.id).expect("widget");
        assert_eq!((moved.x, moved.y), (42.0, 17.0));
        assert_eq!(moved.inputs.len(), widget.inputs.len());
    }
}
