//! Failure bookkeeping: retry accounting, blacklist, error history and the
//! circuit-breaker fallback.

mod classify;

pub use classify::{classify, severity_for, ErrorCategory, RecoveryAction, Severity};

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;
use time::OffsetDateTime;

use crate::backend::{escape_html, BackendKind};
use crate::surface::SurfaceId;

/// Message shown when rendering failed for good.
const FALLBACK_NOTICE: &str = "Some math could not be displayed and is shown as source text.";

/// Message shown when the page should be reloaded.
const RELOAD_NOTICE: &str = "Math rendering is failing repeatedly. Reloading the page may help.";

/// Snapshot of the render that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub target: SurfaceId,
    pub backend: Option<BackendKind>,
    pub display_mode: bool,
    /// 0 for the initial call, then the retry number.
    pub attempt: u32,
    pub critical: bool,
}

/// One classified failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    #[serde(serialize_with = "time::serde::rfc3339::serialize")]
    pub timestamp: OffsetDateTime,
    /// Stable name of the backend error variant.
    pub error_kind: &'static str,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub context: ErrorContext,
    /// Whether the render this error belonged to eventually succeeded.
    pub recovered: bool,
}

/// User-facing notice attached to a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: String,
    /// Offer a page reload.
    pub reload: bool,
    pub dismissible: bool,
}

impl Notification {
    pub fn for_severity(severity: Severity) -> Option<Self> {
        match severity {
            Severity::Low => None,
            Severity::Medium => Some(Self {
                message: FALLBACK_NOTICE.to_string(),
                reload: false,
                dismissible: true,
            }),
            Severity::High => Some(Self {
                message: RELOAD_NOTICE.to_string(),
                reload: true,
                dismissible: true,
            }),
        }
    }
}

/// Broadcast when a render ends in the fallback.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub context: ErrorContext,
    pub notification: Option<Notification>,
}

/// Escaped source text with a warning glyph. Never empty.
pub fn fallback_markup(raw: &str) -> String {
    format!(r#"<span class="math-fallback">⚠ {}</span>"#, escape_html(raw))
}

/// Per-orchestrator failure state.
#[derive(Debug)]
pub struct RecoveryState {
    retries: HashMap<SurfaceId, u32>,
    blacklist: HashMap<SurfaceId, ErrorCategory>,
    history: VecDeque<ErrorRecord>,
    history_capacity: usize,
    counts: BTreeMap<ErrorCategory, u64>,
}

impl RecoveryState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            retries: HashMap::new(),
            blacklist: HashMap::new(),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity: history_capacity.max(1),
            counts: BTreeMap::new(),
        }
    }

    /// Count one retry against `target`, returning the new total.
    pub fn record_retry(&mut self, target: &SurfaceId) -> u32 {
        let count = self.retries.entry(target.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn blacklist(&mut self, target: &SurfaceId, category: ErrorCategory) {
        self.blacklist.insert(target.clone(), category);
    }

    /// The category that got `target` blacklisted, if it is.
    pub fn blacklisted(&self, target: &SurfaceId) -> Option<ErrorCategory> {
        self.blacklist.get(target).copied()
    }

    pub fn blacklisted_targets(&self) -> Vec<SurfaceId> {
        let mut targets: Vec<SurfaceId> = self.blacklist.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// Append records, dropping the oldest beyond capacity.
    pub fn push(&mut self, records: impl IntoIterator<Item = ErrorRecord>) {
        for record in records {
            *self.counts.entry(record.category).or_insert(0) += 1;
            if self.history.len() == self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(record);
        }
    }

    pub fn history(&self) -> Vec<ErrorRecord> {
        self.history.iter().cloned().collect()
    }

    /// Errors seen per category since the last reset.
    pub fn counts(&self) -> BTreeMap<ErrorCategory, u64> {
        self.counts.clone()
    }

    pub fn reset(&mut self) {
        self.retries.clear();
        self.blacklist.clear();
        self.history.clear();
        self.counts.clear();
    }
}
