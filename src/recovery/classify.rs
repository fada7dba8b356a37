//! Error classification and remediation plans.

use std::fmt;

use serde::Serialize;

/// What went wrong, as far as recovery is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    DomAbsence,
    BackendUnready,
    MarkupSyntax,
    ResourceLimit,
    Timeout,
    TypeError,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A remediation step, always followed by one retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Sleep for the configured backoff.
    RetryWithBackoff,
    /// Mark the target attached again.
    ReattachTarget,
    /// Tear down and re-create the failing backend's engine.
    ReinitializeBackend,
    /// Exclude the failing backend and select again.
    SwitchBackend,
    /// Repair braces, sizing pairs and environments.
    BalanceDelimiters,
    /// Remove styling the backends choke on.
    StripUnsupported,
    /// Drop every cached render.
    ClearCache,
}

/// Ordered message patterns; the first category with a matching pattern wins.
const PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::DomAbsence, &["detached", "not attached", "no target"]),
    (
        ErrorCategory::BackendUnready,
        &["not ready", "not loaded", "not initialized", "is not defined"],
    ),
    (
        ErrorCategory::MarkupSyntax,
        &[
            "parse error",
            "syntax",
            "unsupported",
            "unbalanced",
            "undefined control sequence",
            "expected",
        ],
    ),
    (ErrorCategory::ResourceLimit, &["memory", "range", "too large", "stack"]),
    (ErrorCategory::Timeout, &["timed out", "timeout"]),
    (ErrorCategory::TypeError, &["type", "not a function", "cannot read"]),
    (ErrorCategory::Network, &["network", "fetch", "failed to load", "connection"]),
];

/// Classify an error by its message.
pub fn classify(message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| message.contains(needle)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::DomAbsence => "dom-absence",
            ErrorCategory::BackendUnready => "backend-unready",
            ErrorCategory::MarkupSyntax => "markup-syntax",
            ErrorCategory::ResourceLimit => "resource-limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::TypeError => "type-error",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCategory::MarkupSyntax => Severity::Low,
            _ => Severity::Medium,
        }
    }

    /// Remediation actions, tried in order.
    pub fn plan(&self) -> &'static [RecoveryAction] {
        use RecoveryAction::*;
        match self {
            ErrorCategory::DomAbsence => &[RetryWithBackoff, ReattachTarget],
            ErrorCategory::BackendUnready => &[ReinitializeBackend, SwitchBackend],
            ErrorCategory::MarkupSyntax => &[BalanceDelimiters, StripUnsupported, SwitchBackend],
            ErrorCategory::ResourceLimit => &[ClearCache, StripUnsupported, SwitchBackend],
            ErrorCategory::Timeout => &[SwitchBackend, RetryWithBackoff],
            ErrorCategory::TypeError => &[SwitchBackend],
            ErrorCategory::Network => &[RetryWithBackoff, ReinitializeBackend, SwitchBackend],
            ErrorCategory::Unknown => &[RetryWithBackoff, SwitchBackend],
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity after escalation: critical renders, and renders that have already
/// retried more than twice, are always high.
pub fn severity_for(category: ErrorCategory, critical: bool, retries: u32) -> Severity {
    if critical || retries > 2 {
        Severity::High
    } else {
        category.default_severity()
    }
}
