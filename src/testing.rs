//! Stub backends for orchestration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{ensure_attached, escape_html, Backend, BackendKind};
use crate::error::BackendError;
use crate::fragment::{ContentAnalysis, ContentFragment, NormalizedFragment};
use crate::surface::Surface;

/// Configurable backend that counts its calls.
///
/// Fails the first `failures` render calls with `error` (or every other call
/// when intermittent), otherwise succeeds by writing
/// `<span class="stub">{key_text}</span>`.
pub(crate) struct StubBackend {
    kind: BackendKind,
    available: AtomicBool,
    declines: Option<String>,
    error: Option<BackendError>,
    failures: usize,
    intermittent: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    reinits: AtomicUsize,
}

impl StubBackend {
    pub(crate) fn succeeding(kind: BackendKind) -> Self {
        Self {
            kind,
            available: AtomicBool::new(true),
            declines: None,
            error: None,
            failures: 0,
            intermittent: false,
            delay: None,
            calls: AtomicUsize::new(0),
            reinits: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(kind: BackendKind, error: BackendError) -> Self {
        Self {
            error: Some(error),
            failures: usize::MAX,
            ..Self::succeeding(kind)
        }
    }

    pub(crate) fn flaky(kind: BackendKind, error: BackendError, failures: usize) -> Self {
        Self {
            error: Some(error),
            failures,
            ..Self::succeeding(kind)
        }
    }

    /// Fails the first call of every pair, so each render needs one retry.
    pub(crate) fn intermittent(kind: BackendKind, error: BackendError) -> Self {
        Self {
            error: Some(error),
            intermittent: true,
            ..Self::succeeding(kind)
        }
    }

    pub(crate) fn available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    pub(crate) fn declining(mut self, needle: &str) -> Self {
        self.declines = Some(needle.to_string());
        self
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn reinits(&self) -> usize {
        self.reinits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for StubBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn supports(&self, fragment: &ContentFragment, analysis: &ContentAnalysis) -> bool {
        let declined = self
            .declines
            .as_deref()
            .is_some_and(|needle| fragment.raw_text.contains(needle));
        (self.kind == BackendKind::PlainText || analysis.has_math_markup) && !declined
    }

    async fn render(
        &self,
        content: &NormalizedFragment,
        target: &mut Surface,
    ) -> Result<(), BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.failures || (self.intermittent && call % 2 == 0) {
            if let Some(error) = &self.error {
                return Err(error.clone());
            }
        }
        ensure_attached(target)?;
        let body = escape_html(&content.key_text);
        target.replace_markup(format!(r#"<span class="stub">{}</span>"#, body));
        Ok(())
    }

    async fn reinitialize(&self) -> Result<(), BackendError> {
        self.reinits.fetch_add(1, Ordering::SeqCst);
        self.available.store(true, Ordering::SeqCst);
        Ok(())
    }
}
