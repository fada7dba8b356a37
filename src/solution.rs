//! Structured solutions from the generative API, laid out as surfaces.
//!
//! Every string field of a [`Solution`] becomes a content-bearing surface, so
//! a whole solution renders with one [`Orchestrator::render_batch`] call.
//!
//! [`Orchestrator::render_batch`]: crate::orchestrator::Orchestrator::render_batch

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::surface::Surface;

/// A step-by-step solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub final_results: Vec<String>,
}

/// One step: either a bare string or an object with optional parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Text(String),
    Detailed {
        #[serde(default)]
        title: Option<String>,
        #[serde(alias = "explanation", default)]
        content: String,
        /// Standalone formula, rendered in display mode.
        #[serde(default)]
        formula: Option<String>,
    },
}

impl Solution {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Container surface with one content-bearing child per non-empty field,
    /// in reading order: summary, steps, final results.
    pub fn to_surface(&self, marker: &str) -> Surface {
        let mut root = Surface::new("solution");

        if !self.summary.trim().is_empty() {
            let summary = self.summary.as_str();
            root = root.with_child(Surface::content("solution-summary", marker, summary, false));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let id = format!("solution-step-{}", index + 1);
            let mut wrapper = Surface::new(id.as_str());
            match step {
                Step::Text(text) => {
                    let child_id = format!("{}-content", id);
                    let child = Surface::content(child_id, marker, text.as_str(), false);
                    wrapper = wrapper.with_child(child);
                }
                Step::Detailed { title, content, formula } => {
                    let parts = [
                        ("title", title.as_deref(), false),
                        ("content", Some(content.as_str()), false),
                        ("formula", formula.as_deref(), true),
                    ];
                    for (part, text, display) in parts {
                        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                            let child_id = format!("{}-{}", id, part);
                            let child = Surface::content(child_id, marker, text, display);
                            wrapper = wrapper.with_child(child);
                        }
                    }
                }
            }
            root = root.with_child(wrapper);
        }

        for (index, result) in self.final_results.iter().enumerate() {
            if result.trim().is_empty() {
                continue;
            }
            root = root.with_child(Surface::content(
                format!("solution-result-{}", index + 1),
                marker,
                result.as_str(),
                false,
            ));
        }

        root
    }
}
