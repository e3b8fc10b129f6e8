//! Value types shared by every component: severities, checker specs,
//! checker results, and the per-tick [`HealthResult`] aggregate (§3 of the
//! design doc).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity level, totally ordered `info < warning < critical < fatal`
/// (§3 invariants, §8 testable properties).
///
/// Declaration order doubles as the ordering: `derive(PartialOrd, Ord)`
/// compares enums by variant discriminant, so this list must stay sorted
/// least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Fatal,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Per-rule verdict status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Abnormal,
}

impl Status {
    pub fn is_abnormal(self) -> bool {
        matches!(self, Status::Abnormal)
    }
}

/// A single hardware subject a rule is evaluated against: a device UUID
/// plus an optional pod binding (§4.B aggregation rules: `UUID:pod` or
/// `UUID:` when unbound).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub uuid: String,
    pub pod: Option<String>,
}

impl Subject {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            pod: None,
        }
    }

    pub fn with_pod(uuid: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            pod: Some(pod.into()),
        }
    }

    /// Renders as `UUID:pod`, or `UUID:` when no pod is bound.
    pub fn label(&self) -> String {
        match &self.pod {
            Some(pod) => format!("{}:{}", self.uuid, pod),
            None => format!("{}:", self.uuid),
        }
    }
}

/// The declarative expectation for one rule, loaded from a machine-class
/// spec catalog (§3 `CheckerSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerSpec {
    pub name: String,
    pub subject: String,
    pub comparison: Comparison,
    pub level: Severity,
    pub description: String,
    pub error_name: String,
    pub suggestion: String,
}

/// The comparison descriptor a [`CheckerSpec`] carries (§4.B rule
/// subtypes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Comparison {
    ExactMatch { expected: String },
    Threshold { max: f64 },
    Version { constraint: String },
    SetMembership { expected: Vec<String> },
}

/// The verdict for one rule against one snapshot (§3 `CheckerResult`).
///
/// Field names match the wire contract in §6 of the design doc exactly
/// (`description`, `device`, `spec`, `curr`, `error_name`, `suggest`), since
/// this type is serialized directly into
/// [`crate::model::HealthResult::checkers`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerResult {
    pub name: String,
    /// The rule's human-readable description, carried over verbatim from
    /// its [`CheckerSpec`] (§6 wire contract).
    pub description: String,
    /// Comma-separated `UUID:pod` list of abnormal subjects, in
    /// encounter order (§4.B).
    pub device: String,
    pub spec: String,
    pub curr: String,
    pub status: Status,
    pub level: Severity,
    pub detail: String,
    pub error_name: String,
    pub suggest: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl CheckerResult {
    /// A result for a rule family where every subject came back normal:
    /// per §4.B, the suggestion and error name are cleared in this case.
    pub fn all_normal(name: impl Into<String>, spec: impl Into<String>, curr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            device: String::new(),
            spec: spec.into(),
            curr: curr.into(),
            status: Status::Normal,
            level: Severity::Info,
            detail: String::new(),
            error_name: String::new(),
            suggest: String::new(),
            labels: HashMap::new(),
        }
    }

    /// The synthetic, well-known result names the harness and runtime
    /// fabricate on failure paths (§3 invariants).
    pub fn synthetic(
        name: impl Into<String>,
        level: Severity,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            device: String::new(),
            spec: String::new(),
            curr: String::new(),
            status: Status::Abnormal,
            level,
            detail: detail.into(),
            error_name: String::new(),
            suggest: String::new(),
            labels: HashMap::new(),
        }
    }
}

/// The per-tick rollup for one component (§3 `Result (aggregate)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub item: String,
    pub node: String,
    pub status: Status,
    pub level: Severity,
    #[serde(default)]
    pub raw_data: String,
    #[serde(default)]
    pub suggest: String,
    pub time: DateTime<Utc>,
    pub checkers: Vec<CheckerResult>,
}

impl HealthResult {
    /// Aggregates a set of per-rule results into the Result for one tick
    /// (§3 invariants: `status = abnormal iff any checker abnormal`;
    /// `level = max(checker levels)`).
    pub fn aggregate(
        item: impl Into<String>,
        node: impl Into<String>,
        time: DateTime<Utc>,
        checkers: Vec<CheckerResult>,
    ) -> Self {
        let status = if checkers.iter().any(|c| c.status.is_abnormal()) {
            Status::Abnormal
        } else {
            Status::Normal
        };
        let level = checkers
            .iter()
            .map(|c| c.level)
            .max()
            .unwrap_or(Severity::Info);
        let suggest = checkers
            .iter()
            .filter(|c| c.status.is_abnormal())
            .max_by_key(|c| c.level)
            .map(|c| c.suggest.clone())
            .unwrap_or_default();

        Self {
            item: item.into(),
            node: node.into(),
            status,
            level,
            raw_data: String::new(),
            suggest,
            time,
            checkers,
        }
    }

    /// Builds a single-checker synthetic Result for a failure path that
    /// never ran the pipeline (§3 invariants: exactly one synthetic
    /// CheckerResult present when the pipeline did not complete).
    pub fn synthetic(
        item: impl Into<String>,
        node: impl Into<String>,
        time: DateTime<Utc>,
        checker: CheckerResult,
    ) -> Self {
        let level = checker.level;
        Self {
            item: item.into(),
            node: node.into(),
            status: Status::Abnormal,
            level,
            raw_data: String::new(),
            suggest: checker.suggest.clone(),
            time,
            checkers: vec![checker],
        }
    }
}
