//! Workflow-level graph structure: lookups, template instantiation, the
//! widget adjacency projection and the cycle detector.

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Bfs;

use crate::catalog::{AbstractInput, AbstractOutput, AbstractWidget};
use crate::error::{EntityKind, GraphError};
use crate::model::{
    Connection, ConnectionId, Input, InputId, InputOption, Output, OutputId, Widget, WidgetId,
    WidgetKind, Workflow,
};

/// A widget removed from its workflow together with the connections that
/// were severed by the cascade.
#[derive(Debug)]
pub struct RemovedWidget {
    pub widget: Widget,
    pub connections: Vec<Connection>,
}

impl Workflow {
    pub fn widget(&self, id: WidgetId) -> Option<&Widget> {
        self.widgets.iter().find(|widget| widget.id == id)
    }

    pub fn widget_mut(&mut self, id: WidgetId) -> Option<&mut Widget> {
        self.widgets.iter_mut().find(|widget| widget.id == id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|conn| conn.id == id)
    }

    /// The connection currently feeding `input`, if any. Fan-in is capped
    /// at one, so a single hit is exhaustive.
    pub fn connection_to(&self, input: InputId) -> Option<&Connection> {
        self.connections.iter().find(|conn| conn.input == input)
    }

    /// Widget owning the given input slot.
    pub fn input_owner(&self, input: InputId) -> Option<&Widget> {
        self.widgets
            .iter()
            .find(|widget| widget.inputs.iter().any(|slot| slot.id == input))
    }

    /// Widget owning the given output slot.
    pub fn output_owner(&self, output: OutputId) -> Option<&Widget> {
        self.widgets
            .iter()
            .find(|widget| widget.outputs.iter().any(|slot| slot.id == output))
    }

    /// Instantiates a widget from a catalog template, fanning the
    /// template's abstract inputs/outputs out into concrete slots.
    ///
    /// Parameter-kind and data-kind inputs are numbered by two independent
    /// 1-based counters advancing in template declaration order; outputs
    /// use a single counter. No connections are created here.
    pub fn instantiate_widget(&mut self, template: &AbstractWidget, x: f64, y: f64) -> WidgetId {
        let mut widget = Widget {
            id: WidgetId::new(),
            workflow: self.id,
            name: template.name.clone(),
            kind: WidgetKind::Regular,
            x,
            y,
            abstract_widget: Some(template.id),
            finished: false,
            running: false,
            error: false,
            progress: 0,
            inputs: Vec::with_capacity(template.inputs.len()),
            outputs: Vec::with_capacity(template.outputs.len()),
        };

        let mut param_order = 0;
        let mut data_order = 0;
        for abstract_input in &template.inputs {
            let order = if abstract_input.parameter {
                param_order += 1;
                param_order
            } else {
                data_order += 1;
                data_order
            };
            widget
                .inputs
                .push(clone_input_from_template(abstract_input, order));
        }

        for (index, abstract_output) in template.outputs.iter().enumerate() {
            widget
                .outputs
                .push(clone_output_from_template(abstract_output, index as u32 + 1));
        }

        let id = widget.id;
        self.widgets.push(widget);
        id
    }

    /// Removes a widget with cascading deletion of its inputs, outputs and
    /// incident connections.
    pub fn remove_widget(&mut self, id: WidgetId) -> Result<RemovedWidget, GraphError> {
        let index = self
            .widgets
            .iter()
            .position(|widget| widget.id == id)
            .ok_or_else(|| GraphError::not_found(EntityKind::Widget, id))?;
        let widget = self.widgets.remove(index);

        let mut severed = Vec::new();
        self.connections.retain(|conn| {
            let incident = widget.inputs.iter().any(|slot| slot.id == conn.input)
                || widget.outputs.iter().any(|slot| slot.id == conn.output);
            if incident {
                severed.push(conn.clone());
            }
            !incident
        });

        Ok(RemovedWidget {
            widget,
            connections: severed,
        })
    }

    /// Widget-level adjacency induced by the connection set: an edge A → B
    /// exists iff some output of A feeds some input of B. Parallel
    /// connections between one widget pair collapse to a single edge.
    pub fn widget_adjacency(&self) -> DiGraphMap<WidgetId, ()> {
        let mut graph = DiGraphMap::new();
        for widget in &self.widgets {
            graph.add_node(widget.id);
        }
        for conn in &self.connections {
            let source = self.output_owner(conn.output).map(|widget| widget.id);
            let target = self.input_owner(conn.input).map(|widget| widget.id);
            if let (Some(source), Some(target)) = (source, target) {
                graph.add_edge(source, target, ());
            }
        }
        graph
    }

    /// Reports whether `start` can reach itself through the current
    /// connection set.
    ///
    /// Invoked after a candidate edge has been provisionally written: the
    /// new edge is the only one that could close a loop through `start`,
    /// so revisiting `start` is the minimal sufficient check.
    pub fn links_back_to_start(&self, start: WidgetId) -> bool {
        let graph = self.widget_adjacency();
        if !graph.contains_node(start) {
            return false;
        }

        let mut walk = Bfs::new(&graph, start);
        while let Some(widget) = walk.next(&graph) {
            if graph.neighbors(widget).any(|next| next == start) {
                return true;
            }
        }
        false
    }
}

/// Explicit field-by-field clone of a template input into a concrete slot.
///
/// Non-multi templates seed the slot with the template default; multi
/// templates start empty and stamp the slot into the multi-group keyed by
/// the template input's id.
pub fn clone_input_from_template(template: &AbstractInput, order: u32) -> Input {
    Input {
        id: InputId::new(),
        name: template.name.clone(),
        short_name: template.short_name.clone(),
        description: template.description.clone(),
        variable: template.variable.clone(),
        required: template.required,
        parameter: template.parameter,
        parameter_type: template.parameter_type.clone(),
        value: if template.multi {
            None
        } else {
            template.default.clone()
        },
        multi_id: template.multi.then_some(template.id),
        order,
        abstract_input: Some(template.id),
        options: template
            .options
            .iter()
            .map(|option| InputOption {
                name: option.name.clone(),
                value: option.value.clone(),
            })
            .collect(),
    }
}

/// Explicit field-by-field clone of a template output into a concrete slot.
pub fn clone_output_from_template(template: &AbstractOutput, order: u32) -> Output {
    Output {
        id: OutputId::new(),
        name: template.name.clone(),
        short_name: template.short_name.clone(),
        description: template.description.clone(),
        variable: template.variable.clone(),
        order,
        value: None,
        abstract_output: Some(template.id),
    }
}

/// Next order value for a freshly grown input slot: one past the highest
/// order currently present on the widget, across both input kinds.
pub fn next_input_order(widget: &Widget) -> u32 {
    widget
        .inputs
        .iter()
        .map(|input| input.order)
        .max()
        .unwrap_or(0)
        + 1
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn chain_of_three() -> (Workflow, [WidgetId; 3]) {
        let mut workflow = Workflow::new("chain", "ana", false);
        let a = workflow.instantiate_widget(&pass_through_template("A"), 0.0, 0.0);
        let b = workflow.instantiate_widget(&pass_through_template("B"), 10.0, 0.0);
        let c = workflow.instantiate_widget(&pass_through_template("C"), 20.0, 0.0);

        for (source, target) in [(a, b), (b, c)] {
            let output = workflow.widget(source).expect("source widget").outputs[0].id;
            let input = workflow.widget(target).expect("target widget").inputs[0].id;
            workflow.connections.push(Connection {
                id: ConnectionId::new(),
                workflow: workflow.id,
                output,
                input,
            });
        }

        (workflow, [a, b, c])
    }

    #[test]
    fn test_instantiate_numbers_parameter_and_data_inputs_independently() {
        let template = widget_template(
            "Mixed",
            vec![
                param_input_template("Alpha", 1, serde_json::json!("a")),
                data_input_template("Left", 2),
                param_input_template("Beta", 3, serde_json::json!("b")),
                data_input_template("Right", 4),
            ],
            vec![output_template("Out", 1), output_template("Aux", 2)],
        );

        let mut workflow = Workflow::new("flow", "ana", false);
        let id = workflow.instantiate_widget(&template, 1.0, 2.0);
        let widget = workflow.widget(id).expect("widget should exist");

        let orders: Vec<(bool, u32)> = widget
            .inputs
            .iter()
            .map(|input| (input.parameter, input.order))
            .collect();
        assert_eq!(orders, vec![(true, 1), (false, 1), (true, 2), (false, 2)]);

        let output_orders: Vec<u32> = widget.outputs.iter().map(|output| output.order).collect();
        assert_eq!(output_orders, vec![1, 2]);

        assert!(workflow.connections.is_empty());
        assert_eq!(widget.workflow, workflow.id);
    }

    #[test]
    fn test_instantiate_seeds_defaults_and_multi_groups() {
        let template = widget_template(
            "Seeded",
            vec![
                param_input_template("Limit", 1, serde_json::json!(25)),
                multi_input_template("Tables", 2),
            ],
            vec![],
        );

        let mut workflow = Workflow::new("flow", "ana", false);
        let id = workflow.instantiate_widget(&template, 0.0, 0.0);
        let widget = workflow.widget(id).expect("widget should exist");

        let limit = &widget.inputs[0];
        assert_eq!(limit.value, Some(serde_json::json!(25)));
        assert_eq!(limit.multi_id, None);
        assert_eq!(limit.options.len(), 1);
        assert_eq!(limit.abstract_input, Some(template.inputs[0].id));

        let tables = &widget.inputs[1];
        assert_eq!(tables.value, None);
        assert_eq!(tables.multi_id, Some(template.inputs[1].id));
    }

    #[test]
    fn test_cycle_detector_accepts_a_dag() {
        let (workflow, [a, b, c]) = chain_of_three();

        assert!(!workflow.links_back_to_start(a));
        assert!(!workflow.links_back_to_start(b));
        assert!(!workflow.links_back_to_start(c));
    }

    #[test]
    fn test_cycle_detector_catches_a_closed_loop() {
        let (mut workflow, [a, _, c]) = chain_of_three();

        let output = workflow.widget(c).expect("widget C").outputs[0].id;
        let input = workflow.widget(a).expect("widget A").inputs[0].id;
        workflow.connections.push(Connection {
            id: ConnectionId::new(),
            workflow: workflow.id,
            output,
            input,
        });

        assert!(workflow.links_back_to_start(a));
        assert!(workflow.links_back_to_start(c));
    }

    #[test]
    fn test_cycle_detector_handles_isolated_widgets() {
        let mut workflow = Workflow::new("flow", "ana", false);
        let lone = workflow.instantiate_widget(&pass_through_template("Lone"), 0.0, 0.0);

        assert!(!workflow.links_back_to_start(lone));
        assert!(!workflow.links_back_to_start(WidgetId::new()));
    }

    #[test]
    fn test_adjacency_collapses_parallel_connections() {
        let source = pass_through_template("Source");
        let sink = widget_template(
            "Sink",
            vec![data_input_template("A", 1), data_input_template("B", 2)],
            vec![],
        );

        let mut workflow = Workflow::new("flow", "ana", false);
        let src = workflow.instantiate_widget(&source, 0.0, 0.0);
        let dst = workflow.instantiate_widget(&sink, 10.0, 0.0);

        let output = workflow.widget(src).expect("source widget").outputs[0].id;
        for slot in 0..2 {
            let input = workflow.widget(dst).expect("sink widget").inputs[slot].id;
            workflow.connections.push(Connection {
                id: ConnectionId::new(),
                workflow: workflow.id,
                output,
                input,
            });
        }

        let graph = workflow.widget_adjacency();
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.contains_edge(src, dst));
    }

    #[test]
    fn test_remove_widget_cascades_incident_connections() {
        let (mut workflow, [a, b, c]) = chain_of_three();

        let removed = workflow.remove_widget(b).expect("widget B should remove");

        assert_eq!(removed.widget.id, b);
        assert_eq!(removed.connections.len(), 2);
        assert!(workflow.connections.is_empty());
        assert!(workflow.widget(a).is_some());
        assert!(workflow.widget(c).is_some());
    }

    #[test]
    fn test_remove_widget_unknown_id_errors() {
        let mut workflow = Workflow::new("flow", "ana", false);
        let missing = WidgetId::new();

        let err = workflow
            .remove_widget(missing)
            .expect_err("unknown widget should error");
        assert_eq!(err, GraphError::not_found(EntityKind::Widget, missing));
    }

    #[test]
    fn test_next_input_order_spans_both_kinds() {
        let template = widget_template(
            "Mixed",
            vec![
                param_input_template("Alpha", 1, serde_json::json!("a")),
                data_input_template("Left", 2),
                data_input_template("Right", 3),
            ],
            vec![],
        );

        let mut workflow = Workflow::new("flow", "ana", false);
        let id = workflow.instantiate_widget(&template, 0.0, 0.0);
        let widget = workflow.widget(id).expect("widget should exist");

        // Highest order on the widget is the data counter's 2.
        assert_eq!(next_input_order(widget), 3);
    }
}
