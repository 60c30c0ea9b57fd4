//! Read-only positional preview of a workflow: widget coordinates mapped
//! onto a fixed canvas plus a deduplicated widget-pair edge list.

use serde::Serialize;

use crate::model::{WidgetId, Workflow};

pub const PREVIEW_WIDTH: f64 = 300.0;
pub const PREVIEW_HEIGHT: f64 = 200.0;

// Edge endpoints sit just off the widget boxes: out of the source's output
// side, into the target's input side.
const SOURCE_ANCHOR_DX: f64 = 40.0;
const TARGET_ANCHOR_DX: f64 = 10.0;
const ANCHOR_DY: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlacedWidget {
    pub widget: WidgetId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PreviewEdge {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowPreview {
    pub width: f64,
    pub height: f64,
    pub widgets: Vec<PlacedWidget>,
    pub edges: Vec<PreviewEdge>,
}

/// Projects the workflow onto a `PREVIEW_WIDTH` × `PREVIEW_HEIGHT` canvas
/// with min-max normalization.
///
/// Degenerate spans are guarded the way the editor expects: a shifted
/// coordinate of exactly 0 is treated as 1, and a zero span (all widgets
/// sharing one coordinate) as twice the shifted coordinate, so nothing
/// divides by zero. Multiple connections between one ordered widget pair
/// collapse to a single edge, first-seen order preserved. Mutates nothing.
pub fn normalize(workflow: &Workflow) -> WorkflowPreview {
    let mut preview = WorkflowPreview {
        width: PREVIEW_WIDTH,
        height: PREVIEW_HEIGHT,
        widgets: Vec::with_capacity(workflow.widgets.len()),
        edges: Vec::new(),
    };
    if workflow.widgets.is_empty() {
        return preview;
    }

    let mut min_x = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for widget in &workflow.widgets {
        min_x = min_x.min(widget.x);
        max_x = max_x.max(widget.x);
        min_y = min_y.min(widget.y);
        max_y = max_y.max(widget.y);
    }

    for widget in &workflow.widgets {
        let x = normalize_coordinate(widget.x, min_x, max_x, PREVIEW_WIDTH);
        let y = normalize_coordinate(widget.y, min_y, max_y, PREVIEW_HEIGHT);
        preview.widgets.push(PlacedWidget {
            widget: widget.id,
            x,
            y,
        });
    }

    let position_of = |id: WidgetId| {
        preview
            .widgets
            .iter()
            .find(|placed| placed.widget == id)
            .map(|placed| (placed.x, placed.y))
    };

    let mut pairs: Vec<(WidgetId, WidgetId)> = Vec::new();
    for conn in &workflow.connections {
        let source = workflow.output_owner(conn.output).map(|widget| widget.id);
        let target = workflow.input_owner(conn.input).map(|widget| widget.id);
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };
        if pairs.contains(&(source, target)) {
            continue;
        }
        pairs.push((source, target));
    }

    for (source, target) in pairs {
        let (Some((sx, sy)), Some((tx, ty))) = (position_of(source), position_of(target)) else {
            continue;
        };
        preview.edges.push(PreviewEdge {
            x1: sx + SOURCE_ANCHOR_DX,
            y1: sy + ANCHOR_DY,
            x2: tx - TARGET_ANCHOR_DX,
            y2: ty + ANCHOR_DY,
        });
    }

    preview
}

fn normalize_coordinate(value: f64, min: f64, max: f64, extent: f64) -> f64 {
    let mut shifted = value - min;
    if shifted == 0.0 {
        shifted = 1.0;
    }
    let mut span = max - min;
    if span == 0.0 {
        span = shifted * 2.0;
    }
    (shifted / span) * extent
}
