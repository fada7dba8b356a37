//! Math rendering backends.

mod katex;
mod mathml;
mod plain;

pub use self::katex::KatexBackend;
pub use self::mathml::MathmlBackend;
pub use self::plain::PlainTextBackend;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::error::{BackendError, ConfigError};
use crate::fragment::{ContentAnalysis, ContentFragment, NormalizedFragment, Segment};
use crate::surface::Surface;

/// The closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fast typesetter with partial LaTeX coverage (KaTeX).
    Lightweight,
    /// Full-featured typesetter (MathML conversion).
    Full,
    /// Escaped text with Unicode approximations. Always succeeds.
    PlainText,
}

impl BackendKind {
    /// Fixed selection order: lightweight first, plain text last.
    pub const PREFERENCE: [BackendKind; 3] = [
        BackendKind::Lightweight,
        BackendKind::Full,
        BackendKind::PlainText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Lightweight => "katex",
            BackendKind::Full => "mathml",
            BackendKind::PlainText => "plain",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "katex" | "lightweight" => Ok(BackendKind::Lightweight),
            "mathml" | "mathjax" | "full" => Ok(BackendKind::Full),
            "plain" | "plaintext" | "text" => Ok(BackendKind::PlainText),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// A rendering backend.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Name written into the `data-backend` marker.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Whether the backend can be used right now.
    fn is_available(&self) -> bool;

    /// Whether the backend can handle this content.
    fn supports(&self, fragment: &ContentFragment, analysis: &ContentAnalysis) -> bool;

    /// Render normalized content into `target`.
    ///
    /// On error the target must be left untouched.
    async fn render(
        &self,
        content: &NormalizedFragment,
        target: &mut Surface,
    ) -> Result<(), BackendError>;

    /// Tear down and re-create whatever engine state the backend holds.
    async fn reinitialize(&self) -> Result<(), BackendError>;
}

/// The set of backends known to an orchestrator.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three built-in backends configured from `config`.
    pub fn with_defaults(config: &OrchestratorConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(KatexBackend::new(config.lightweight_unsupported.clone())));
        registry.register(Arc::new(MathmlBackend::new()));
        registry.register(Arc::new(PlainTextBackend::new()));
        registry
    }

    /// Add a backend, replacing any previous one of the same kind.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.retain(|b| b.kind() != backend.kind());
        self.backends.push(backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.kind() == kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Registered backends in preference order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn Backend>> + '_ {
        BackendKind::PREFERENCE.into_iter().filter_map(|kind| self.get(kind))
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| (b.name().to_string(), b.is_available())))
            .finish()
    }
}

/// Render every segment, escaping text and passing math through `math`.
pub(crate) fn render_segments(
    content: &NormalizedFragment,
    mut math: impl FnMut(&str, bool) -> Result<String, BackendError>,
) -> Result<String, BackendError> {
    let mut body = String::new();
    for segment in &content.segments {
        match segment {
            Segment::Text(text) => body.push_str(&escape_html(text)),
            Segment::Math { latex, display } => body.push_str(&math(latex, *display)?),
        }
    }
    Ok(body)
}

/// Wrap rendered math in the layout element used by the page styles.
pub(crate) fn wrap_math(body: &str, display: bool) -> String {
    if display {
        format!(r#"<div class="math display">{}</div>"#, body)
    } else {
        format!(r#"<span class="math inline">{}</span>"#, body)
    }
}

pub(crate) fn ensure_attached(target: &Surface) -> Result<(), BackendError> {
    if target.attached {
        Ok(())
    } else {
        Err(BackendError::Detached(target.id.to_string()))
    }
}

pub(crate) fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
