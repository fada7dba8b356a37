//! Content types flowing through the rendering pipeline.

use serde::{Deserialize, Serialize};

/// A single unit of text submitted for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFragment {
    /// Raw text as produced upstream, delimiters and escapes included.
    pub raw_text: String,
    /// Render as a centered block instead of inline with surrounding text.
    #[serde(default)]
    pub display_mode: bool,
}

impl ContentFragment {
    pub fn new(raw_text: impl Into<String>, display_mode: bool) -> Self {
        Self {
            raw_text: raw_text.into(),
            display_mode,
        }
    }

    pub fn inline(raw_text: impl Into<String>) -> Self {
        Self::new(raw_text, false)
    }

    pub fn display(raw_text: impl Into<String>) -> Self {
        Self::new(raw_text, true)
    }
}

/// Syntactic complexity of the math in a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    #[default]
    Simple,
    Medium,
    Complex,
}

impl ComplexityTier {
    /// Tier for a given number of advanced constructs.
    pub fn from_hits(hits: usize) -> Self {
        match hits {
            0 => ComplexityTier::Simple,
            1..=3 => ComplexityTier::Medium,
            _ => ComplexityTier::Complex,
        }
    }
}

/// Read-only classification of a fragment, recomputed on every render call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentAnalysis {
    pub has_natural_language: bool,
    pub has_math_markup: bool,
    pub is_mixed: bool,
    pub complexity: ComplexityTier,
    /// Strength of the classification in `[0, 1]`. A tie-break hint only.
    pub confidence: f32,
}

impl Default for ContentAnalysis {
    fn default() -> Self {
        Self {
            has_natural_language: false,
            has_math_markup: false,
            is_mixed: false,
            complexity: ComplexityTier::Simple,
            confidence: 0.0,
        }
    }
}

impl ContentAnalysis {
    /// True when the fragment has nothing to typeset.
    pub fn is_plain_text(&self) -> bool {
        !self.has_math_markup
    }
}

/// A piece of normalized content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, not yet escaped.
    Text(String),
    /// LaTeX without its delimiters.
    Math { latex: String, display: bool },
}

/// A fragment after normalization: canonical cache text plus its segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFragment {
    /// Canonical text used for cache keys.
    pub key_text: String,
    /// Effective display mode (`$$` wrappers force display).
    pub display_mode: bool,
    pub segments: Vec<Segment>,
}

impl NormalizedFragment {
    /// No segment carries visible text.
    pub fn is_blank(&self) -> bool {
        self.segments.iter().all(|segment| match segment {
            Segment::Text(text) => text.trim().is_empty(),
            Segment::Math { latex, .. } => latex.trim().is_empty(),
        })
    }

    /// Rebuild the segments after a recovery action rewrote the math.
    pub fn map_math(&self, f: impl Fn(&str) -> String) -> Self {
        let segments: Vec<Segment> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Math { latex, display } => Segment::Math {
                    latex: f(latex),
                    display: *display,
                },
                other => other.clone(),
            })
            .collect();

        Self {
            key_text: key_text_of(&segments),
            display_mode: self.display_mode,
            segments,
        }
    }
}

/// Canonical text of a segment list.
///
/// A lone math segment keys on its bare LaTeX; anything else is re-serialized
/// with canonical `$`/`$$` delimiters.
pub(crate) fn key_text_of(segments: &[Segment]) -> String {
    if let [Segment::Math { latex, .. }] = segments {
        return latex.clone();
    }

    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Math { latex, display: true } => {
                out.push_str("$$");
                out.push_str(latex);
                out.push_str("$$");
            }
            Segment::Math { latex, display: false } => {
                out.push('$');
                out.push_str(latex);
                out.push('$');
            }
        }
    }
    out
}
