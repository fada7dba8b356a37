//! # math-fallback
//!
//! A math rendering orchestrator: picks one of several interchangeable
//! typesetting backends for each text fragment, caches the result, and
//! recovers from backend failures so every target ends up with visible,
//! non-empty content.
//!
//! ## Pipeline
//!
//! 1. **Analyze**: classify the fragment (natural language, math markup,
//!    mixed, complexity tier).
//! 2. **Select**: walk the backends in preference order (KaTeX, MathML,
//!    plain text) and take the first that is available, supports the content
//!    and is not excluded by policy.
//! 3. **Render**: normalize, check the cache, call the backend under a
//!    timeout, store the result.
//! 4. **Recover**: classify failures, run the category's remediation plan
//!    with a bounded retry budget, and fall back to escaped source text.
//!
//! ## Quick Start
//!
//! ```rust
//! use math_fallback::{Orchestrator, OrchestratorConfig, RenderOptions, Surface};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default()).unwrap();
//! let mut target = Surface::new("answer");
//!
//! let outcome = orchestrator
//!     .render("Bu adımda $x = 5$ olur", &mut target, RenderOptions::default())
//!     .await;
//!
//! assert!(outcome.is_success());
//! assert!(!target.markup.is_empty());
//! # });
//! ```
//!
//! ## Rendering a whole solution
//!
//! ```rust
//! use math_fallback::{Orchestrator, OrchestratorConfig, RenderOptions, Solution};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let payload = r#"{"summary": "$x = 5$", "steps": [], "finalResults": ["$5$"]}"#;
//! let solution = Solution::from_json(payload).unwrap();
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default()).unwrap();
//!
//! let mut surface = solution.to_surface(&orchestrator.config().content_marker);
//! let summary = orchestrator.render_batch(&mut surface, RenderOptions::default()).await;
//! assert_eq!(summary.total(), 2);
//! # });
//! ```
//!
//! ## Configuration
//!
//! [`OrchestratorConfig`] is loaded from TOML; every field has a default.
//!
//! ```text
//! max_retries = 3
//! blacklist_threshold = 3
//! cache_capacity = 500
//! batch_size = 5
//! batch_delay_ms = 16
//! render_timeout_ms = 3000
//! ```
//!
//! ## Features
//!
//! - `mathml` (default): MathML backend via `latex2mathml`
//! - `katex`: KaTeX backend via the `katex` crate
//! - `cli`: the `mathfallback` binary

pub mod analyze;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod fragment;
pub mod orchestrator;
pub mod recovery;
pub mod select;
pub mod solution;
pub mod surface;

#[cfg(test)]
mod testing;

// Convenience re-exports
pub use analyze::{analyze, normalize};
pub use backend::{Backend, BackendKind, BackendRegistry};
pub use config::OrchestratorConfig;
pub use error::{BackendError, ConfigError, Error, Result};
pub use fragment::{ComplexityTier, ContentAnalysis, ContentFragment, NormalizedFragment};
pub use orchestrator::{BatchSummary, Orchestrator, RenderOptions, RenderOutcome, RenderStats};
pub use recovery::{DiagnosticEvent, ErrorCategory, ErrorRecord, Severity};
pub use select::select;
pub use solution::Solution;
pub use surface::{Surface, SurfaceId};

/// Render one fragment with a fresh default orchestrator.
///
/// Convenience for one-off use; callers rendering more than once should keep
/// an [`Orchestrator`] so the cache and recovery state carry over.
pub async fn render(content: &str, display_mode: bool) -> Result<(Surface, RenderOutcome)> {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default())?;
    let mut target = Surface::new("fragment");
    let options = RenderOptions {
        display_mode,
        ..RenderOptions::default()
    };
    let outcome = orchestrator.render(content, &mut target, options).await;
    Ok((target, outcome))
}
