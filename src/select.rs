//! Backend selection strategy.

use std::sync::Arc;

use crate::backend::{Backend, BackendKind, BackendRegistry};
use crate::fragment::{ComplexityTier, ContentAnalysis, ContentFragment};

/// Pick the backend for a fragment.
///
/// A forced backend that is available wins outright. Otherwise the registry
/// is walked in preference order, skipping `excluded` kinds, unavailable or
/// unsupporting backends, and the lightweight backend for complex or mixed
/// content. Returns `None` only when nothing registered is usable.
pub fn select(
    fragment: &ContentFragment,
    analysis: &ContentAnalysis,
    registry: &BackendRegistry,
    forced: Option<BackendKind>,
    excluded: &[BackendKind],
) -> Option<Arc<dyn Backend>> {
    if let Some(kind) = forced {
        if let Some(backend) = registry.get(kind).filter(|b| b.is_available()) {
            return Some(backend);
        }
    }

    registry.iter().find(|backend| {
        let kind = backend.kind();
        !excluded.contains(&kind)
            && backend.is_available()
            && backend.supports(fragment, analysis)
            && !excluded_by_policy(kind, analysis)
    })
}

/// The lightweight backend is unreliable for complex math and for math
/// embedded in natural language.
fn excluded_by_policy(kind: BackendKind, analysis: &ContentAnalysis) -> bool {
    kind == BackendKind::Lightweight
        && (analysis.complexity == ComplexityTier::Complex || analysis.is_mixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::testing::StubBackend;

    fn registry(lightweight: bool, full: bool) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(
            StubBackend::succeeding(BackendKind::Lightweight)
                .available(lightweight)
                .declining("\\begin{cases}"),
        ));
        registry.register(Arc::new(StubBackend::succeeding(BackendKind::Full).available(full)));
        registry.register(Arc::new(StubBackend::succeeding(BackendKind::PlainText)));
        registry
    }

    fn pick(text: &str, registry: &BackendRegistry) -> Option<BackendKind> {
        let fragment = ContentFragment::inline(text);
        select(&fragment, &analyze(text), registry, None, &[]).map(|b| b.kind())
    }

    #[test]
    fn test_prefers_lightweight_for_simple_math() {
        assert_eq!(pick("$x^2$", &registry(true, true)), Some(BackendKind::Lightweight));
    }

    #[test]
    fn test_complex_never_lightweight() {
        let text = "$$\\sum_i \\int_0^1 \\prod_j \\lim_{x \\to 0} f$$";
        assert_eq!(analyze(text).complexity, ComplexityTier::Complex);
        assert_eq!(pick(text, &registry(true, true)), Some(BackendKind::Full));
    }

    #[test]
    fn test_mixed_skips_lightweight() {
        assert_eq!(
            pick("Bu adımda $x = 5$ olur", &registry(true, true)),
            Some(BackendKind::Full)
        );
    }

    #[test]
    fn test_declined_content_goes_to_full() {
        assert_eq!(
            pick("$$\\begin{cases}x=1\\\\y=2\\end{cases}$$", &registry(true, true)),
            Some(BackendKind::Full)
        );
    }

    #[test]
    fn test_plain_text_content() {
        assert_eq!(
            pick("Bu adımda x=5 olur", &registry(true, true)),
            Some(BackendKind::PlainText)
        );
    }

    #[test]
    fn test_all_unavailable_falls_back_to_plain() {
        assert_eq!(pick("$x^2$", &registry(false, false)), Some(BackendKind::PlainText));
    }

    #[test]
    fn test_forced_backend_bypasses_policy() {
        let registry = registry(true, true);
        let text = "Bu adımda $x = 5$ olur";
        let fragment = ContentFragment::inline(text);
        let forced = Some(BackendKind::Lightweight);
        let picked = select(&fragment, &analyze(text), &registry, forced, &[]);
        assert_eq!(picked.map(|b| b.kind()), Some(BackendKind::Lightweight));
    }

    #[test]
    fn test_unavailable_forced_backend_ignored() {
        let registry = registry(false, true);
        let fragment = ContentFragment::inline("$x$");
        let forced = Some(BackendKind::Lightweight);
        let picked = select(&fragment, &analyze("$x$"), &registry, forced, &[]);
        assert_eq!(picked.map(|b| b.kind()), Some(BackendKind::Full));
    }

    #[test]
    fn test_exclusions() {
        let registry = registry(true, true);
        let fragment = ContentFragment::inline("$x$");
        let picked = select(
            &fragment,
            &analyze("$x$"),
            &registry,
            None,
            &[BackendKind::Lightweight, BackendKind::Full],
        );
        assert_eq!(picked.map(|b| b.kind()), Some(BackendKind::PlainText));
    }

    #[test]
    fn test_empty_registry() {
        assert!(pick("$x$", &BackendRegistry::new()).is_none());
    }

    #[test]
    fn test_deterministic() {
        let registry = registry(true, true);
        let texts = ["$x$", "Let $x$ be", "$$\\begin{cases}a\\end{cases}$$", "words"];
        for text in texts {
            let first = pick(text, &registry);
            for _ in 0..5 {
                assert_eq!(pick(text, &registry), first);
            }
        }
    }
}
