//! The rendering orchestrator: selection, invocation, caching and recovery
//! behind one context object.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::analyze::{analyze, balance_braces, normalize, strip_unsupported};
use crate::backend::{ensure_attached, BackendKind, BackendRegistry};
use crate::cache::{CacheKey, RenderCache};
use crate::config::OrchestratorConfig;
use crate::error::{BackendError, Result};
use crate::fragment::{ContentAnalysis, ContentFragment, NormalizedFragment};
use crate::recovery::{
    classify, fallback_markup, severity_for, DiagnosticEvent, ErrorCategory, ErrorContext,
    ErrorRecord, Notification, RecoveryAction, RecoveryState, Severity,
};
use crate::select::select;
use crate::surface::{Surface, SurfaceId};

const SOURCE: &str = "orchestrator";

/// Capacity of the diagnostic event channel.
const EVENT_CAPACITY: usize = 64;

/// Per-call rendering options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub display_mode: bool,
    /// Use this backend if it is available, bypassing selection rules.
    pub force_backend: Option<BackendKind>,
    /// Failures escalate straight to high severity.
    pub critical: bool,
}

impl RenderOptions {
    pub fn display() -> Self {
        Self {
            display_mode: true,
            ..Self::default()
        }
    }
}

/// How a render call ended. The target holds non-empty markup in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenderOutcome {
    Rendered { backend: BackendKind },
    Cached { backend: BackendKind },
    Recovered { backend: BackendKind, attempts: u32 },
    /// Escaped source text was written instead of typeset math.
    Fallback { category: ErrorCategory },
}

impl RenderOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RenderOutcome::Fallback { .. })
    }

    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            RenderOutcome::Rendered { backend }
            | RenderOutcome::Cached { backend }
            | RenderOutcome::Recovered { backend, .. } => Some(*backend),
            RenderOutcome::Fallback { .. } => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RenderOutcome::Rendered { .. } => "rendered",
            RenderOutcome::Cached { .. } => "cache_hit",
            RenderOutcome::Recovered { .. } => "recovered",
            RenderOutcome::Fallback { .. } => "fallback",
        }
    }
}

/// Tally of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub rendered: usize,
    pub cached: usize,
    pub recovered: usize,
    pub fallback: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.rendered + self.cached + self.recovered + self.fallback
    }

    fn record(&mut self, outcome: &RenderOutcome) {
        match outcome {
            RenderOutcome::Rendered { .. } => self.rendered += 1,
            RenderOutcome::Cached { .. } => self.cached += 1,
            RenderOutcome::Recovered { .. } => self.recovered += 1,
            RenderOutcome::Fallback { .. } => self.fallback += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub kind: BackendKind,
    pub available: bool,
}

/// Diagnostic snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RenderStats {
    pub backends: Vec<BackendStatus>,
    pub cache_size: usize,
    pub cache_capacity: usize,
    pub hit_rate: f64,
    pub error_counts: BTreeMap<ErrorCategory, u64>,
    pub blacklisted: Vec<SurfaceId>,
}

/// Mutable state of one render call, rewritten by recovery actions.
struct Attempt {
    content: NormalizedFragment,
    forced: Option<BackendKind>,
    excluded: Vec<BackendKind>,
    /// Backend chosen by the most recent try.
    backend: Option<BackendKind>,
}

/// Renders math fragments into surfaces, never failing.
///
/// Owns the backend registry, the render cache and all recovery state. Create
/// one per page (or per test) and share it by reference.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: BackendRegistry,
    cache: Mutex<RenderCache>,
    recovery: Mutex<RecoveryState>,
    events: broadcast::Sender<DiagnosticEvent>,
}

impl Orchestrator {
    /// Orchestrator with the built-in backends.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let registry = BackendRegistry::with_defaults(&config);
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: OrchestratorConfig, registry: BackendRegistry) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            warn!(
                target = SOURCE,
                op = "orchestrator::new",
                result = "no_backends",
                "No backends registered; every render will fall back"
            );
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            cache: Mutex::new(RenderCache::new(config.cache_capacity)),
            recovery: Mutex::new(RecoveryState::new(config.history_capacity)),
            config,
            registry,
            events,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Render `content` into `target`.
    ///
    /// Never fails: on unrecoverable errors, or when there is nothing visible
    /// to typeset, the target receives escaped source text and the outcome is
    /// [`RenderOutcome::Fallback`].
    pub async fn render(
        &self,
        content: &str,
        target: &mut Surface,
        options: RenderOptions,
    ) -> RenderOutcome {
        let started_at = Instant::now();
        let fragment = ContentFragment::new(content, options.display_mode);

        let blacklisted = self.recovery.lock().blacklisted(&target.id);
        if let Some(category) = blacklisted {
            debug!(
                target = SOURCE,
                op = "orchestrator::render",
                result = "blacklisted",
                surface = %target.id,
                "Target is blacklisted; writing fallback"
            );
            write_fallback(target, &fragment.raw_text);
            return RenderOutcome::Fallback { category };
        }

        let content = normalize(&fragment);
        if content.is_blank() {
            debug!(
                target = SOURCE,
                op = "orchestrator::render",
                result = "blank",
                surface = %target.id,
                "Nothing visible to typeset; writing fallback"
            );
            write_fallback(target, &fragment.raw_text);
            return RenderOutcome::Fallback {
                category: ErrorCategory::MarkupSyntax,
            };
        }

        let analysis = analyze(&fragment.raw_text);
        let mut attempt = Attempt {
            content,
            forced: options.force_backend,
            excluded: Vec::new(),
            backend: None,
        };

        let outcome = match self.try_render(&fragment, &analysis, &mut attempt, target).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.recover(&fragment, &analysis, &mut attempt, target, options, error)
                    .await
            }
        };

        info!(
            target = SOURCE,
            op = "orchestrator::render",
            result = outcome.label(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            surface = %target.id,
            backend = outcome.backend().map(|b| b.as_str()).unwrap_or("none"),
            mixed = analysis.is_mixed,
            complexity = ?analysis.complexity,
            "Fragment rendered"
        );
        outcome
    }

    /// Render every content-bearing descendant of `container` in batches.
    ///
    /// Targets are dispatched in document order, `batch_size` at a time, with
    /// a pause of `batch_delay_ms` between batches. A target's own display
    /// attribute overrides `options.display_mode`.
    pub async fn render_batch(
        &self,
        container: &mut Surface,
        options: RenderOptions,
    ) -> BatchSummary {
        let started_at = Instant::now();
        let marker = self.config.content_marker.clone();
        let mut targets = container.content_targets(&marker);
        let mut summary = BatchSummary::default();

        for (index, batch) in targets.chunks_mut(self.config.batch_size).enumerate() {
            if index > 0 {
                sleep(self.config.batch_delay()).await;
            }

            let renders = batch.iter_mut().map(|target| {
                let (raw, display) = target
                    .content_of(&marker)
                    .map(|(raw, display)| (raw.to_string(), display))
                    .unwrap_or_default();
                let options = RenderOptions {
                    display_mode: display || options.display_mode,
                    ..options
                };
                async move { self.render(&raw, target, options).await }
            });

            for outcome in join_all(renders).await {
                summary.record(&outcome);
            }
        }

        let result = if summary.fallback == 0 { "ok" } else { "partial" };
        info!(
            target = SOURCE,
            op = "orchestrator::render_batch",
            result,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            surface = %container.id,
            rendered = summary.rendered,
            cached = summary.cached,
            recovered = summary.recovered,
            fallback = summary.fallback,
            "Batch rendered"
        );
        summary
    }

    pub fn stats(&self) -> RenderStats {
        let backends = self
            .registry
            .iter()
            .map(|backend| BackendStatus {
                name: backend.name().to_string(),
                kind: backend.kind(),
                available: backend.is_available(),
            })
            .collect();

        let (cache_size, cache_capacity, hit_rate) = {
            let cache = self.cache.lock();
            (cache.len(), cache.capacity(), cache.hit_rate())
        };
        let recovery = self.recovery.lock();

        RenderStats {
            backends,
            cache_size,
            cache_capacity,
            hit_rate,
            error_counts: recovery.counts(),
            blacklisted: recovery.blacklisted_targets(),
        }
    }

    /// Forget cached renders, retry counts, the blacklist and the error history.
    pub fn reset(&self) {
        self.cache.lock().clear();
        self.recovery.lock().reset();
        info!(
            target = SOURCE,
            op = "orchestrator::reset",
            result = "ok",
            "Orchestrator state reset"
        );
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Cached markup for `key`, without affecting recency or hit rate.
    pub fn peek_cache(&self, key: &CacheKey) -> Option<String> {
        self.cache.lock().peek(key).map(str::to_string)
    }

    /// Receive a [`DiagnosticEvent`] for every render that ends in the fallback.
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.events.subscribe()
    }

    /// Most recent errors, oldest first.
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.recovery.lock().history()
    }

    /// One select-and-render pass. Cache hits never reach the backend.
    async fn try_render(
        &self,
        fragment: &ContentFragment,
        analysis: &ContentAnalysis,
        attempt: &mut Attempt,
        target: &mut Surface,
    ) -> std::result::Result<RenderOutcome, BackendError> {
        let backend = select(fragment, analysis, &self.registry, attempt.forced, &attempt.excluded)
            .ok_or(BackendError::NoBackend)?;
        let kind = backend.kind();
        attempt.backend = Some(kind);

        let key = CacheKey::new(&attempt.content, kind);
        let cached = self.cache.lock().get(&key);
        if let Some(markup) = cached {
            ensure_attached(target)?;
            target.replace_markup(markup);
            apply_metadata(target, backend.name(), attempt.content.display_mode);
            return Ok(RenderOutcome::Cached { backend: kind });
        }

        let epoch = self.cache.lock().epoch();
        let render = backend.render(&attempt.content, target);
        match timeout(self.config.render_timeout(), render).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(BackendError::Timeout(self.config.render_timeout_ms)),
        }

        let fresh = self.cache.lock().put_if_fresh(key, target.markup.clone(), epoch);
        if !fresh {
            debug!(
                target = SOURCE,
                op = "orchestrator::try_render",
                result = "stale",
                surface = %target.id,
                "Cache cleared during render; result not cached"
            );
        }
        apply_metadata(target, backend.name(), attempt.content.display_mode);
        Ok(RenderOutcome::Rendered { backend: kind })
    }

    /// Run the remediation plan for `error`, retrying after each action.
    async fn recover(
        &self,
        fragment: &ContentFragment,
        analysis: &ContentAnalysis,
        attempt: &mut Attempt,
        target: &mut Surface,
        options: RenderOptions,
        error: BackendError,
    ) -> RenderOutcome {
        let category = classify(&error.to_string());
        let mut actions = category
            .plan()
            .iter()
            .take(self.config.max_retries as usize);

        let mut error = error;
        let mut records: Vec<ErrorRecord> = Vec::new();
        let mut severity = Severity::Low;
        let mut retries = 0u32;
        let mut over_threshold = false;
        let mut recovered = None;

        loop {
            let current = classify(&error.to_string());
            let current_severity = severity_for(current, options.critical, retries);
            severity = severity.max(current_severity);
            records.push(ErrorRecord {
                timestamp: OffsetDateTime::now_utc(),
                error_kind: error.kind(),
                message: error.to_string(),
                category: current,
                severity: current_severity,
                context: ErrorContext {
                    target: target.id.clone(),
                    backend: attempt.backend,
                    display_mode: attempt.content.display_mode,
                    attempt: retries,
                    critical: options.critical,
                },
                recovered: false,
            });

            if current_severity == Severity::High || over_threshold {
                break;
            }
            let Some(&action) = actions.next() else {
                break;
            };

            retries += 1;
            let total = self.recovery.lock().record_retry(&target.id);
            debug!(
                target = SOURCE,
                op = "orchestrator::recover",
                surface = %target.id,
                category = %current,
                action = ?action,
                retry = retries,
                "Applying recovery action"
            );
            self.apply(action, attempt, target, retries).await;

            match self.try_render(fragment, analysis, attempt, target).await {
                Ok(outcome) => {
                    recovered = outcome.backend().map(|backend| RenderOutcome::Recovered {
                        backend,
                        attempts: retries,
                    });
                    break;
                }
                Err(next) => {
                    error = next;
                    over_threshold = total >= self.config.blacklist_threshold;
                }
            }
        }

        let success = recovered.is_some();
        for record in records.iter_mut() {
            record.recovered = success;
        }
        let context = records.last().map(|record| record.context.clone());
        {
            let mut state = self.recovery.lock();
            state.push(records);
            if over_threshold && !success {
                state.blacklist(&target.id, category);
            }
        }

        if let Some(outcome) = recovered {
            return outcome;
        }

        write_fallback(target, &fragment.raw_text);
        warn!(
            target = SOURCE,
            op = "orchestrator::recover",
            result = "exhausted",
            surface = %target.id,
            category = %category,
            severity = ?severity,
            retries,
            blacklisted = over_threshold,
            error = %error,
            "Rendering failed; wrote fallback"
        );

        if let Some(context) = context {
            // No subscribers is fine
            let _ = self.events.send(DiagnosticEvent {
                category,
                severity,
                message: error.to_string(),
                context,
                notification: Notification::for_severity(severity),
            });
        }

        RenderOutcome::Fallback { category }
    }

    async fn apply(
        &self,
        action: RecoveryAction,
        attempt: &mut Attempt,
        target: &mut Surface,
        retry: u32,
    ) {
        match action {
            RecoveryAction::RetryWithBackoff => sleep(self.config.backoff(retry)).await,
            RecoveryAction::ReattachTarget => target.attached = true,
            RecoveryAction::ReinitializeBackend => {
                let Some(backend) = attempt.backend.and_then(|kind| self.registry.get(kind)) else {
                    return;
                };
                match timeout(self.config.load_timeout(), backend.reinitialize()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(
                        target = SOURCE,
                        op = "orchestrator::reinitialize",
                        result = "error",
                        backend = backend.name(),
                        error = %err,
                        "Backend failed to reinitialize"
                    ),
                    Err(_) => warn!(
                        target = SOURCE,
                        op = "orchestrator::reinitialize",
                        result = "timeout",
                        backend = backend.name(),
                        timeout_ms = self.config.load_timeout_ms,
                        "Backend reinitialization timed out"
                    ),
                }
            }
            RecoveryAction::SwitchBackend => {
                if let Some(kind) = attempt.backend {
                    if !attempt.excluded.contains(&kind) {
                        attempt.excluded.push(kind);
                    }
                }
                attempt.forced = None;
            }
            RecoveryAction::BalanceDelimiters => {
                attempt.content = attempt.content.map_math(balance_braces)
            }
            RecoveryAction::StripUnsupported => {
                attempt.content = attempt.content.map_math(strip_unsupported)
            }
            RecoveryAction::ClearCache => self.clear_cache(),
        }
    }
}

fn apply_metadata(target: &mut Surface, backend: &str, display: bool) {
    target.remove_class("math-fallback");
    target.add_class("math-rendered");
    if display {
        target.remove_class("math-inline");
        target.add_class("math-display");
    } else {
        target.remove_class("math-display");
        target.add_class("math-inline");
    }
    target.set_attribute("data-backend", backend);
}

fn write_fallback(target: &mut Surface, raw: &str) {
    target.replace_markup(fallback_markup(raw));
    target.remove_class("math-rendered");
    target.add_class("math-fallback");
    target.attributes.remove("data-backend");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::backend::PlainTextBackend;
    use crate::surface::DEFAULT_CONTENT_MARKER;
    use crate::testing::StubBackend;
    use pretty_assertions::assert_eq;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            backoff_base_ms: 0,
            batch_delay_ms: 0,
            ..OrchestratorConfig::default()
        }
    }

    fn visible_text(markup: &str) -> String {
        let mut text = String::new();
        let mut in_tag = false;
        for c in markup.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag => text.push(c),
                _ => {}
            }
        }
        text.trim().to_string()
    }

    fn orchestrator(backends: Vec<Arc<StubBackend>>) -> Orchestrator {
        let mut registry = BackendRegistry::new();
        for backend in backends {
            registry.register(backend);
        }
        Orchestrator::with_registry(config(), registry).unwrap()
    }

    #[tokio::test]
    async fn test_render_never_leaves_target_empty() {
        let full = Arc::new(StubBackend::failing(
            BackendKind::Full,
            BackendError::Other("boom".into()),
        ));
        let orchestrator = orchestrator(vec![full]);

        let inputs = ["", "   ", "$ $", "$x$", "plain words", "$$\\frac{1}{2}$$", "$unclosed"];
        for (index, content) in inputs.into_iter().enumerate() {
            let mut target = Surface::new(format!("t{}", index));
            orchestrator.render(content, &mut target, RenderOptions::default()).await;
            assert!(!visible_text(&target.markup).is_empty(), "{:?}", content);
        }
    }

    #[tokio::test]
    async fn test_blank_content_keeps_source_visible() {
        let orchestrator = Orchestrator::new(config()).unwrap();

        for content in ["", "   ", "$ $", "$$  $$"] {
            let mut target = Surface::new("t");
            let outcome = orchestrator.render(content, &mut target, RenderOptions::default()).await;

            assert_eq!(
                outcome,
                RenderOutcome::Fallback {
                    category: ErrorCategory::MarkupSyntax
                },
                "{:?}",
                content
            );
            assert!(target.has_class("math-fallback"));
            let text = visible_text(&target.markup);
            assert!(text.starts_with('⚠'), "{:?}", text);
            assert!(text.contains(content.trim()), "{:?}", text);
        }
        assert_eq!(orchestrator.stats().cache_size, 0);
    }

    #[tokio::test]
    async fn test_second_render_is_cache_hit() {
        let full = Arc::new(StubBackend::succeeding(BackendKind::Full));
        let orchestrator = orchestrator(vec![full.clone()]);

        let mut first = Surface::new("a");
        let outcome = orchestrator.render("$x^2$", &mut first, RenderOptions::default()).await;
        assert_eq!(outcome, RenderOutcome::Rendered { backend: BackendKind::Full });

        let mut second = Surface::new("b");
        let outcome = orchestrator.render("$x^2$", &mut second, RenderOptions::default()).await;
        assert_eq!(outcome, RenderOutcome::Cached { backend: BackendKind::Full });

        assert_eq!(full.calls(), 1);
        assert_eq!(first.markup, second.markup);
        assert!(second.has_class("math-rendered"));
        assert!(second.has_class("math-inline"));
        assert_eq!(second.attribute("data-backend"), Some("mathml"));
    }

    #[tokio::test]
    async fn test_display_mode_keys_separately() {
        let full = Arc::new(StubBackend::succeeding(BackendKind::Full));
        let orchestrator = orchestrator(vec![full.clone()]);

        let mut inline = Surface::new("a");
        orchestrator.render("$x^2$", &mut inline, RenderOptions::default()).await;
        let mut display = Surface::new("b");
        orchestrator.render("$x^2$", &mut display, RenderOptions::display()).await;

        assert_eq!(full.calls(), 2);
        assert!(display.has_class("math-display"));
    }

    #[tokio::test]
    async fn test_always_failing_backend_is_blacklisted() {
        let full = Arc::new(StubBackend::failing(
            BackendKind::Full,
            BackendError::Syntax("unexpected }".into()),
        ));
        let orchestrator = orchestrator(vec![full.clone()]);
        let mut target = Surface::new("t");

        let outcome = orchestrator.render("$x}$", &mut target, RenderOptions::default()).await;

        assert_eq!(outcome, RenderOutcome::Fallback { category: ErrorCategory::MarkupSyntax });
        assert!(full.calls() <= 1 + orchestrator.config().max_retries as usize);
        assert!(target.markup.starts_with(r#"<span class="math-fallback">"#));
        assert!(target.has_class("math-fallback"));
        assert_eq!(orchestrator.stats().blacklisted, vec![SurfaceId::from("t")]);

        let calls = full.calls();
        let outcome = orchestrator.render("$y$", &mut target, RenderOptions::default()).await;
        assert!(!outcome.is_success());
        assert_eq!(full.calls(), calls);
        assert!(target.markup.contains("$y$"));
    }

    #[tokio::test]
    async fn test_retry_budget_respected() {
        let full = Arc::new(StubBackend::failing(
            BackendKind::Full,
            BackendError::Network("connection reset".into()),
        ));
        let mut registry = BackendRegistry::new();
        registry.register(full.clone());
        let config = OrchestratorConfig {
            max_retries: 1,
            ..config()
        };
        let orchestrator = Orchestrator::with_registry(config, registry).unwrap();
        let mut target = Surface::new("t");

        let outcome = orchestrator.render("$x$", &mut target, RenderOptions::default()).await;

        assert!(!outcome.is_success());
        assert_eq!(full.calls(), 2);
        assert!(orchestrator.stats().blacklisted.is_empty());
    }

    #[tokio::test]
    async fn test_not_ready_recovers_by_reinitializing() {
        let full = Arc::new(StubBackend::flaky(
            BackendKind::Full,
            BackendError::NotReady("mathml converter is not loaded".into()),
            1,
        ));
        let orchestrator = orchestrator(vec![full.clone()]);
        let mut target = Surface::new("t");

        let outcome = orchestrator.render("$x$", &mut target, RenderOptions::default()).await;

        assert_eq!(
            outcome,
            RenderOutcome::Recovered {
                backend: BackendKind::Full,
                attempts: 1
            }
        );
        assert!(outcome.is_success());
        assert_eq!(full.reinits(), 1);
        assert_eq!(full.calls(), 2);

        let history = orchestrator.error_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].category, ErrorCategory::BackendUnready);
        assert!(history[0].recovered);
    }

    #[tokio::test]
    async fn test_not_ready_switches_to_plain_text() {
        let full = Arc::new(StubBackend::failing(
            BackendKind::Full,
            BackendError::NotReady("mathml converter is not loaded".into()),
        ));
        let plain = Arc::new(StubBackend::succeeding(BackendKind::PlainText));
        let orchestrator = orchestrator(vec![full.clone(), plain.clone()]);
        let mut target = Surface::new("t");

        let outcome = orchestrator.render("$x$", &mut target, RenderOptions::default()).await;

        assert_eq!(
            outcome,
            RenderOutcome::Recovered {
                backend: BackendKind::PlainText,
                attempts: 2
            }
        );
        assert_eq!(full.reinits(), 1);
        assert_eq!(full.calls(), 2);
        assert_eq!(plain.calls(), 1);
        assert_eq!(target.markup, r#"<span class="stub">x</span>"#);

        let history = orchestrator.error_history();
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .all(|record| record.category == ErrorCategory::BackendUnready && record.recovered));
        assert_eq!(history[1].context.attempt, 1);
        assert!(orchestrator.stats().blacklisted.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_recoveries_do_not_escalate() {
        let full = Arc::new(StubBackend::intermittent(
            BackendKind::Full,
            BackendError::Other("boom".into()),
        ));
        let orchestrator = orchestrator(vec![full.clone()]);
        let mut events = orchestrator.subscribe();
        let mut target = Surface::new("t");

        for content in ["$a$", "$b$", "$c$", "$d$", "$e$", "$f$"] {
            let outcome = orchestrator.render(content, &mut target, RenderOptions::default()).await;
            assert_eq!(
                outcome,
                RenderOutcome::Recovered {
                    backend: BackendKind::Full,
                    attempts: 1
                },
                "{}",
                content
            );
        }

        assert_eq!(full.calls(), 12);
        assert!(events.try_recv().is_err());
        assert!(orchestrator.stats().blacklisted.is_empty());
        assert!(orchestrator
            .error_history()
            .iter()
            .all(|record| record.severity == Severity::Medium));
    }

    #[tokio::test]
    async fn test_cache_hit_on_detached_target_is_reattached() {
        let full = Arc::new(StubBackend::succeeding(BackendKind::Full));
        let orchestrator = orchestrator(vec![full.clone()]);

        let mut first = Surface::new("a");
        orchestrator.render("$x$", &mut first, RenderOptions::default()).await;

        let mut second = Surface::new("b");
        second.attached = false;
        let outcome = orchestrator.render("$x$", &mut second, RenderOptions::default()).await;

        assert_eq!(
            outcome,
            RenderOutcome::Recovered {
                backend: BackendKind::Full,
                attempts: 2
            }
        );
        assert!(second.attached);
        assert_eq!(second.markup, first.markup);
        assert_eq!(full.calls(), 1);
        assert_eq!(orchestrator.error_history()[0].category, ErrorCategory::DomAbsence);
    }

    #[tokio::test]
    async fn test_detached_target_is_reattached() {
        let full = Arc::new(StubBackend::succeeding(BackendKind::Full));
        let orchestrator = orchestrator(vec![full]);
        let mut target = Surface::new("t");
        target.attached = false;

        let outcome = orchestrator.render("$x$", &mut target, RenderOptions::default()).await;

        assert_eq!(
            outcome,
            RenderOutcome::Recovered {
                backend: BackendKind::Full,
                attempts: 2
            }
        );
        assert!(target.attached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_switches_backend() {
        let full =
            Arc::new(StubBackend::succeeding(BackendKind::Full).delayed(Duration::from_secs(10)));
        let plain = Arc::new(StubBackend::succeeding(BackendKind::PlainText));
        let orchestrator = orchestrator(vec![full, plain]);
        let mut target = Surface::new("t");

        let outcome = orchestrator.render("$x$", &mut target, RenderOptions::default()).await;

        assert_eq!(
            outcome,
            RenderOutcome::Recovered {
                backend: BackendKind::PlainText,
                attempts: 1
            }
        );
        assert_eq!(orchestrator.error_history()[0].category, ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn test_critical_failure_notifies_with_reload() {
        let full = Arc::new(StubBackend::failing(
            BackendKind::Full,
            BackendError::Other("boom".into()),
        ));
        let orchestrator = orchestrator(vec![full.clone()]);
        let mut events = orchestrator.subscribe();
        let mut target = Surface::new("t");
        let options = RenderOptions {
            critical: true,
            ..RenderOptions::default()
        };

        let outcome = orchestrator.render("$x$", &mut target, options).await;

        assert_eq!(outcome, RenderOutcome::Fallback { category: ErrorCategory::Unknown });
        // High severity disables auto-recovery
        assert_eq!(full.calls(), 1);

        let event = events.try_recv().unwrap();
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.context.target, SurfaceId::from("t"));
        let notification = event.notification.unwrap();
        assert!(notification.reload);
        assert!(notification.dismissible);
    }

    #[tokio::test]
    async fn test_empty_registry_falls_back() {
        let orchestrator = orchestrator(Vec::new());
        let mut target = Surface::new("t");

        let outcome = orchestrator.render("a < b", &mut target, RenderOptions::default()).await;

        assert!(!outcome.is_success());
        assert_eq!(target.markup, r#"<span class="math-fallback">⚠ a &lt; b</span>"#);
    }

    #[tokio::test]
    async fn test_reset_clears_blacklist_and_cache() {
        let full = Arc::new(StubBackend::failing(
            BackendKind::Full,
            BackendError::Syntax("bad".into()),
        ));
        let orchestrator = orchestrator(vec![full]);
        let mut target = Surface::new("t");
        orchestrator.render("$x$", &mut target, RenderOptions::default()).await;
        assert!(!orchestrator.stats().blacklisted.is_empty());

        orchestrator.reset();

        let stats = orchestrator.stats();
        assert!(stats.blacklisted.is_empty());
        assert!(stats.error_counts.is_empty());
        assert_eq!(stats.cache_size, 0);
        assert!(orchestrator.error_history().is_empty());
    }

    #[tokio::test]
    async fn test_clear_cache_forces_rerender() {
        let full = Arc::new(StubBackend::succeeding(BackendKind::Full));
        let orchestrator = orchestrator(vec![full.clone()]);

        let mut target = Surface::new("t");
        orchestrator.render("$x$", &mut target, RenderOptions::default()).await;
        orchestrator.clear_cache();
        orchestrator.render("$x$", &mut target, RenderOptions::default()).await;

        assert_eq!(full.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_render_is_not_cached() {
        let full =
            Arc::new(StubBackend::succeeding(BackendKind::Full).delayed(Duration::from_millis(50)));
        let orchestrator = orchestrator(vec![full.clone()]);
        let mut target = Surface::new("t");

        let (outcome, ()) = tokio::join!(
            orchestrator.render("$x$", &mut target, RenderOptions::default()),
            async {
                sleep(Duration::from_millis(10)).await;
                orchestrator.clear_cache();
            }
        );

        assert_eq!(outcome, RenderOutcome::Rendered { backend: BackendKind::Full });
        assert_eq!(target.markup, r#"<span class="stub">x</span>"#);
        assert_eq!(orchestrator.stats().cache_size, 0);
    }

    #[tokio::test]
    async fn test_turkish_prose_renders_literally() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(PlainTextBackend::new()));
        let orchestrator = Orchestrator::with_registry(config(), registry).unwrap();
        let mut target = Surface::new("t");

        let outcome = orchestrator
            .render("Bu adımda x=5 olur", &mut target, RenderOptions::default())
            .await;

        assert_eq!(outcome, RenderOutcome::Rendered { backend: BackendKind::PlainText });
        assert_eq!(target.markup, r#"<span class="math-plain">Bu adımda x=5 olur</span>"#);
    }

    #[cfg(feature = "mathml")]
    #[tokio::test]
    async fn test_exponent_renders_with_full_backend() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(crate::backend::MathmlBackend::new()));
        registry.register(Arc::new(PlainTextBackend::new()));
        let orchestrator = Orchestrator::with_registry(config(), registry).unwrap();
        let mut target = Surface::new("t");

        let outcome = orchestrator.render("$x^2 + 1$", &mut target, RenderOptions::default()).await;

        assert_eq!(outcome, RenderOutcome::Rendered { backend: BackendKind::Full });
        assert!(!target.markup.contains('^'));
        let key = CacheKey {
            text: "x^2 + 1".to_string(),
            display_mode: false,
            backend: BackendKind::Full,
        };
        assert_eq!(orchestrator.peek_cache(&key), Some(target.markup.clone()));
    }

    #[tokio::test]
    async fn test_batch_renders_in_order() {
        let full = Arc::new(StubBackend::succeeding(BackendKind::Full));
        let plain = Arc::new(StubBackend::succeeding(BackendKind::PlainText));
        let orchestrator = orchestrator(vec![full, plain]);

        let mut container = Surface::new("solution");
        for index in 0..7 {
            container = container.with_child(Surface::content(
                format!("c{}", index),
                DEFAULT_CONTENT_MARKER,
                format!("$x_{}$", index),
                index == 6,
            ));
        }
        container = container.with_child(Surface::new("decoration"));

        let summary = orchestrator.render_batch(&mut container, RenderOptions::default()).await;

        assert_eq!(
            summary,
            BatchSummary {
                rendered: 7,
                ..BatchSummary::default()
            }
        );
        for (index, child) in container.children.iter().take(7).enumerate() {
            assert_eq!(child.markup, format!(r#"<span class="stub">x_{}</span>"#, index));
        }
        assert!(container.children[6].has_class("math-display"));
        assert!(container.children[7].markup.is_empty());
    }
}
