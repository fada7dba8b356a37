//! MathML backend: the full-coverage typesetter.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{ensure_attached, render_segments, wrap_math, Backend, BackendKind};
use crate::error::BackendError;
use crate::fragment::{ContentAnalysis, ContentFragment, NormalizedFragment};
use crate::surface::Surface;

/// Renderer that converts LaTeX to MathML.
pub struct MathmlBackend {
    ready: AtomicBool,
}

impl MathmlBackend {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(cfg!(feature = "mathml")),
        }
    }
}

impl Default for MathmlBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MathmlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Full
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "mathml") && self.ready.load(Ordering::Acquire)
    }

    fn supports(&self, _fragment: &ContentFragment, analysis: &ContentAnalysis) -> bool {
        analysis.has_math_markup
    }

    async fn render(
        &self,
        content: &NormalizedFragment,
        target: &mut Surface,
    ) -> Result<(), BackendError> {
        if !self.is_available() {
            return Err(BackendError::NotReady("mathml converter is not loaded".into()));
        }
        ensure_attached(target)?;

        // Typeset off-screen; the target only ever sees complete output
        let mut scratch = Surface::scratch(&target.id);
        let markup = render_segments(content, |latex, display| {
            convert(latex, display).map(|mathml| wrap_math(&mathml, display))
        })?;
        scratch.replace_markup(markup);

        target.replace_markup(std::mem::take(&mut scratch.markup));
        Ok(())
    }

    async fn reinitialize(&self) -> Result<(), BackendError> {
        self.ready.store(false, Ordering::Release);
        convert("x", false)?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(feature = "mathml")]
fn convert(latex: &str, display: bool) -> Result<String, BackendError> {
    let style = if display {
        latex2mathml::DisplayStyle::Block
    } else {
        latex2mathml::DisplayStyle::Inline
    };
    latex2mathml::latex_to_mathml(latex, style).map_err(|err| BackendError::Syntax(err.to_string()))
}

#[cfg(not(feature = "mathml"))]
fn convert(_latex: &str, _display: bool) -> Result<String, BackendError> {
    Err(BackendError::NotReady(
        "mathml support is not compiled in".into(),
    ))
}
