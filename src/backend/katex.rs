//! KaTeX backend: the fast, partial-coverage typesetter.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{ensure_attached, render_segments, wrap_math, Backend, BackendKind};
use crate::error::BackendError;
use crate::fragment::{ContentAnalysis, ContentFragment, NormalizedFragment};
use crate::surface::Surface;

/// Renderer that typesets LaTeX to HTML with KaTeX.
///
/// Without the `katex` feature the backend is registered but never available.
pub struct KatexBackend {
    unsupported: Vec<String>,
    ready: AtomicBool,
}

impl KatexBackend {
    /// Create a backend that declines content containing any of `unsupported`.
    pub fn new(unsupported: Vec<String>) -> Self {
        Self {
            unsupported,
            ready: AtomicBool::new(cfg!(feature = "katex")),
        }
    }

    fn declines(&self, text: &str) -> Option<&str> {
        self.unsupported
            .iter()
            .find(|needle| text.contains(needle.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl Backend for KatexBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Lightweight
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "katex") && self.ready.load(Ordering::Acquire)
    }

    fn supports(&self, fragment: &ContentFragment, analysis: &ContentAnalysis) -> bool {
        analysis.has_math_markup && self.declines(&fragment.raw_text).is_none()
    }

    async fn render(
        &self,
        content: &NormalizedFragment,
        target: &mut Surface,
    ) -> Result<(), BackendError> {
        if !self.is_available() {
            return Err(BackendError::NotReady("katex is not loaded".into()));
        }
        ensure_attached(target)?;
        if let Some(command) = self.declines(&content.key_text) {
            return Err(BackendError::Unsupported(command.to_string()));
        }

        let markup = render_segments(content, |latex, display| {
            typeset(latex, display).map(|html| wrap_math(&html, display))
        })?;

        // KaTeX output is synchronous and complete, so it goes straight in
        target.replace_markup(markup);
        Ok(())
    }

    async fn reinitialize(&self) -> Result<(), BackendError> {
        self.ready.store(false, Ordering::Release);
        // A trivial expression forces the engine to come up again
        typeset("x", false)?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(feature = "katex")]
fn typeset(latex: &str, display: bool) -> Result<String, BackendError> {
    use ::katex::{OptsBuilder, OutputType};

    let mut builder = OptsBuilder::default();
    builder.display_mode(display);
    builder.output_type(OutputType::Html);
    builder.throw_on_error(true);

    let opts = builder
        .build()
        .map_err(|err| BackendError::Other(format!("failed to build KaTeX options: {err}")))?;

    ::katex::render_with_opts(latex, opts).map_err(|err| {
        let message = err.to_string();
        if message.contains("ParseError") {
            BackendError::Syntax(message)
        } else {
            BackendError::NotReady(message)
        }
    })
}

#[cfg(not(feature = "katex"))]
fn typeset(_latex: &str, _display: bool) -> Result<String, BackendError> {
    Err(BackendError::NotReady(
        "katex support is not compiled in".into(),
    ))
}
