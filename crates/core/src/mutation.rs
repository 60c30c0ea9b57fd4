//! The connection mutation protocol: transactional create/destroy of
//! edges, with replace semantics, cycle rollback and multi-group
//! grow/shrink side effects.
//!
//! Mutations are staged directly on the workflow and unwound in place if
//! the cycle check rejects the candidate edge; a failed call leaves the
//! workflow exactly as it was.

use serde::Serialize;

use crate::error::{EntityKind, GraphError};
use crate::graph::next_input_order;
use crate::model::{Connection, ConnectionId, Input, InputId, OutputId, Widget, WidgetId, Workflow};

/// Identifies a widget whose cached input list went stale, so callers can
/// refresh their view. A notification, not a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshScope {
    pub widget: WidgetId,
    pub workflow: crate::model::WorkflowId,
}

/// Outcome of a successful connection create.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionChange {
    pub connection: Connection,
    /// The edge reused an existing connection identity on this input and
    /// swapped its source.
    pub replaced: bool,
    /// Spare slot created because the edge consumed the last unconnected
    /// member of a multi-group.
    pub grown_input: Option<InputId>,
    pub refresh: Option<RefreshScope>,
}

/// Outcome of a successful connection destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectOutcome {
    pub connection: ConnectionId,
    /// Input deleted by the multi-group shrink, if one was.
    pub removed_input: Option<InputId>,
    pub refresh: Option<RefreshScope>,
}

/// Creates (or replaces) the connection feeding `input` from `output`.
///
/// Connecting to an already-fed input is a replace: the existing
/// connection keeps its identity and swaps its source, and a cycle
/// rollback restores the previous source instead of deleting the edge.
pub fn create_connection(
    workflow: &mut Workflow,
    output: OutputId,
    input: InputId,
) -> Result<ConnectionChange, GraphError> {
    if workflow.output_owner(output).is_none() {
        return Err(GraphError::not_found(EntityKind::Output, output));
    }
    let target_widget = workflow
        .input_owner(input)
        .map(|widget| widget.id)
        .ok_or_else(|| GraphError::not_found(EntityKind::Input, input))?;

    // Stage the edge, remembering what to restore on rollback.
    let existing = workflow
        .connections
        .iter()
        .position(|conn| conn.input == input);
    let (index, previous_output) = match existing {
        Some(index) => {
            let previous = workflow.connections[index].output;
            workflow.connections[index].output = output;
            (index, Some(previous))
        }
        None => {
            workflow.connections.push(Connection {
                id: ConnectionId::new(),
                workflow: workflow.id,
                output,
                input,
            });
            (workflow.connections.len() - 1, None)
        }
    };

    if workflow.links_back_to_start(target_widget) {
        match previous_output {
            Some(previous) => workflow.connections[index].output = previous,
            None => {
                workflow.connections.remove(index);
            }
        }
        return Err(GraphError::Cycle);
    }

    let workflow_id = workflow.id;
    let connection = workflow.connections[index].clone();
    let mut change = ConnectionChange {
        connection,
        replaced: previous_output.is_some(),
        grown_input: None,
        refresh: None,
    };

    if let Some(widget) = workflow.widget_mut(target_widget) {
        widget.unfinish();
        if previous_output.is_none() {
            // A fresh edge into a multi slot consumed the group's spare.
            if let Some(spare) = grow_multi_group(widget, input) {
                change.grown_input = Some(spare);
                change.refresh = Some(RefreshScope {
                    widget: target_widget,
                    workflow: workflow_id,
                });
            }
        }
    }

    Ok(change)
}

/// Destroys a connection, shrinking the target multi-group when the freed
/// slot is a redundant member.
///
/// A disconnected singular input keeps whatever `value` it had; it is not
/// reset to the template default.
pub fn destroy_connection(
    workflow: &mut Workflow,
    id: ConnectionId,
) -> Result<DisconnectOutcome, GraphError> {
    let index = workflow
        .connections
        .iter()
        .position(|conn| conn.id == id)
        .ok_or_else(|| GraphError::not_found(EntityKind::Connection, id))?;
    let input = workflow.connections[index].input;
    let target_widget = workflow
        .input_owner(input)
        .map(|widget| widget.id)
        .ok_or_else(|| GraphError::not_found(EntityKind::Input, input))?;
    let workflow_id = workflow.id;

    let mut removed_input = None;
    if let Some(widget) = workflow.widget_mut(target_widget) {
        widget.unfinish();
        removed_input = shrink_multi_group(widget, input);
    }
    workflow.connections.remove(index);

    let refresh = removed_input.map(|_| RefreshScope {
        widget: target_widget,
        workflow: workflow_id,
    });
    Ok(DisconnectOutcome {
        connection: id,
        removed_input,
        refresh,
    })
}

/// Appends a fresh unconnected slot to the multi-group of `consumed`,
/// cloned from the consumed member, ordered after every existing input on
/// the widget. Returns `None` when `consumed` is not a multi slot.
fn grow_multi_group(widget: &mut Widget, consumed: InputId) -> Option<InputId> {
    let order = next_input_order(widget);
    let spare = {
        let source = widget.input(consumed)?;
        source.multi_id?;
        Input {
            id: InputId::new(),
            name: source.name.clone(),
            short_name: source.short_name.clone(),
            description: source.description.clone(),
            variable: source.variable.clone(),
            required: source.required,
            parameter: source.parameter,
            parameter_type: source.parameter_type.clone(),
            value: None,
            multi_id: source.multi_id,
            order,
            abstract_input: source.abstract_input,
            options: Vec::new(),
        }
    };

    let id = spare.id;
    widget.inputs.push(spare);
    Some(id)
}

/// Deletes a disconnected multi-group member and renumbers same-kind
/// siblings back to a contiguous sequence. The last remaining member of a
/// group is kept; a group never reaches zero members.
fn shrink_multi_group(widget: &mut Widget, disconnected: InputId) -> Option<InputId> {
    let (group, deleted_order, deleted_kind) = {
        let input = widget.input(disconnected)?;
        (input.multi_id?, input.order, input.parameter)
    };

    let members = widget
        .inputs
        .iter()
        .filter(|input| input.multi_id == Some(group))
        .count();
    if members <= 1 {
        return None;
    }

    widget.inputs.retain(|input| input.id != disconnected);
    for sibling in &mut widget.inputs {
        if sibling.parameter == deleted_kind && sibling.order > deleted_order {
            sibling.order -= 1;
        }
    }
    Some(disconnected)
}
