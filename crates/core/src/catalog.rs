//! The widget catalog: read-only templates from which concrete widgets are
//! instantiated.
//!
//! Templates are never mutated by the graph core. The built-in library
//! mirrors what a stock deployment ships; additional templates can be
//! loaded from JSON files in a configurable directory.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::{AbstractInputId, AbstractOutputId, AbstractWidgetId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractOption {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractInput {
    pub id: AbstractInputId,
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    pub variable: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub parameter: bool,
    /// Repeatable slot: instances form a multi-group keyed by this
    /// template's id.
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub parameter_type: Option<String>,
    pub order: u32,
    #[serde(default)]
    pub options: Vec<AbstractOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractOutput {
    pub id: AbstractOutputId,
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    pub variable: String,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractWidget {
    pub id: AbstractWidgetId,
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub description: String,
    /// "input", "processing", "output", "utility"
    pub category: String,
    #[serde(default)]
    pub interactive: bool,
    /// Opaque icon locator resolved by the asset collaborator.
    pub visual: String,
    pub order: u32,
    pub inputs: Vec<AbstractInput>,
    pub outputs: Vec<AbstractOutput>,
}

/// Registry of widget templates available to workflow authors.
pub struct WidgetLibrary {
    templates: HashMap<AbstractWidgetId, AbstractWidget>,
}

impl WidgetLibrary {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn register(&mut self, template: AbstractWidget) {
        self.templates.insert(template.id, template);
    }

    pub fn get(&self, id: AbstractWidgetId) -> Option<&AbstractWidget> {
        self.templates.get(&id)
    }

    /// All templates, sorted by (package, order, name) for stable listings.
    pub fn list(&self) -> Vec<&AbstractWidget> {
        let mut templates: Vec<&AbstractWidget> = self.templates.values().collect();
        templates.sort_by(|a, b| {
            a.package
                .cmp(&b.package)
                .then_with(|| a.order.cmp(&b.order))
                .then_with(|| a.name.cmp(&b.name))
        });
        templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Loads extra templates from `dir`, one JSON document per file.
    /// Unreadable or malformed files are skipped with a warning so a bad
    /// drop-in cannot take the library down.
    pub fn load_from_dir(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read library directory {}: {e}", dir.display());
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<AbstractWidget>(&contents) {
                    Ok(template) => {
                        info!(name = %template.name, package = %template.package, "Loaded widget template");
                        self.register(template);
                    }
                    Err(e) => warn!("Failed to parse widget template {}: {e}", path.display()),
                },
                Err(e) => warn!("Failed to read widget template {}: {e}", path.display()),
            }
        }
    }
}

impl Default for WidgetLibrary {
    fn default() -> Self {
        Self::new()
    }
}

fn data_input(name: &str, short_name: &str, variable: &str, order: u32) -> AbstractInput {
    AbstractInput {
        id: AbstractInputId::new(),
        name: name.to_string(),
        short_name: short_name.to_string(),
        description: String::new(),
        variable: variable.to_string(),
        required: true,
        parameter: false,
        multi: false,
        default: None,
        parameter_type: None,
        order,
        options: Vec::new(),
    }
}

fn multi_input(name: &str, short_name: &str, variable: &str, order: u32) -> AbstractInput {
    AbstractInput {
        multi: true,
        ..data_input(name, short_name, variable, order)
    }
}

fn param_input(
    name: &str,
    short_name: &str,
    variable: &str,
    order: u32,
    parameter_type: &str,
    default: serde_json::Value,
) -> AbstractInput {
    AbstractInput {
        parameter: true,
        required: false,
        parameter_type: Some(parameter_type.to_string()),
        default: Some(default),
        ..data_input(name, short_name, variable, order)
    }
}

fn output(name: &str, short_name: &str, variable: &str, order: u32) -> AbstractOutput {
    AbstractOutput {
        id: AbstractOutputId::new(),
        name: name.to_string(),
        short_name: short_name.to_string(),
        description: String::new(),
        variable: variable.to_string(),
        order,
    }
}

/// The stock template set shipped with the server.
pub fn builtin_library() -> WidgetLibrary {
    let mut library = WidgetLibrary::new();

    library.register(AbstractWidget {
        id: AbstractWidgetId::new(),
        name: "Load Table".to_string(),
        package: "base".to_string(),
        description: "Reads a table from a file path.".to_string(),
        category: "input".to_string(),
        interactive: false,
        visual: "base/table-import".to_string(),
        order: 1,
        inputs: vec![param_input(
            "Path",
            "pth",
            "path",
            1,
            "file",
            serde_json::json!(""),
        )],
        outputs: vec![output("Table", "tbl", "table", 1)],
    });

    library.register(AbstractWidget {
        id: AbstractWidgetId::new(),
        name: "Select Columns".to_string(),
        package: "base".to_string(),
        description: "Projects a table onto a column subset.".to_string(),
        category: "processing".to_string(),
        interactive: false,
        visual: "base/column-filter".to_string(),
        order: 2,
        inputs: vec![
            data_input("Table", "tbl", "table", 1),
            param_input(
                "Columns",
                "col",
                "columns",
                2,
                "text",
                serde_json::json!("*"),
            ),
        ],
        outputs: vec![output("Table", "tbl", "table", 1)],
    });

    library.register(AbstractWidget {
        id: AbstractWidgetId::new(),
        name: "Concatenate Tables".to_string(),
        package: "base".to_string(),
        description: "Stacks any number of tables with matching columns.".to_string(),
        category: "processing".to_string(),
        interactive: false,
        visual: "base/table-merge".to_string(),
        order: 3,
        inputs: vec![multi_input("Table", "tbl", "tables", 1)],
        outputs: vec![output("Table", "tbl", "table", 1)],
    });

    library.register(AbstractWidget {
        id: AbstractWidgetId::new(),
        name: "Sample Rows".to_string(),
        package: "base".to_string(),
        description: "Draws a row sample from a table.".to_string(),
        category: "processing".to_string(),
        interactive: false,
        visual: "base/sample".to_string(),
        order: 4,
        inputs: vec![
            data_input("Table", "tbl", "table", 1),
            param_input("Fraction", "frc", "fraction", 2, "number", serde_json::json!(0.1)),
            AbstractInput {
                options: vec![
                    AbstractOption {
                        name: "With replacement".to_string(),
                        value: "replace".to_string(),
                    },
                    AbstractOption {
                        name: "Without replacement".to_string(),
                        value: "plain".to_string(),
                    },
                ],
                ..param_input("Mode", "mod", "mode", 3, "select", serde_json::json!("plain"))
            },
        ],
        outputs: vec![output("Sample", "smp", "sample", 1)],
    });

    library.register(AbstractWidget {
        id: AbstractWidgetId::new(),
        name: "Table Viewer".to_string(),
        package: "base".to_string(),
        description: "Renders a table for inspection.".to_string(),
        category: "output".to_string(),
        interactive: true,
        visual: "base/viewer".to_string(),
        order: 5,
        inputs: vec![data_input("Table", "tbl", "table", 1)],
        outputs: vec![],
    });

    library
}
