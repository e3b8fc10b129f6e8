//! The Checker capability and the four rule subtypes built on it (§4.B).
//!
//! A Checker is a capability, not a class hierarchy: the runtime only
//! ever calls `name()` and `check()`. The exact-match / threshold /
//! version / set-membership structs below are ready-made
//! implementations of that capability, generic over whatever snapshot
//! type a collector produces and an extraction closure the caller
//! supplies — the domain-specific thresholds and regexes themselves stay
//! out of scope (§1), but the comparison machinery is fully implemented.

use crate::error::Result;
use crate::model::{CheckerResult, Severity, Status, Subject};
use crate::snapshot::SnapshotData;
use crate::version::compare_version;

/// One rule, called exactly once per non-ignored tick (§4.B).
///
/// Returning `Ok(None)` means "not applicable on this hardware" (e.g.
/// NVLink unsupported) — such results are dropped and never affect the
/// aggregate (§4.B, §11 open-question decision #3). Returning `Err`
/// means the rule itself failed; the runtime logs it and treats the rule
/// as contributing nothing, never as abnormal (§4.B failure semantics).
pub trait Checker<S: SnapshotData>: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, snapshot: &S) -> Result<Option<CheckerResult>>;
}

/// One subject's observed value plus its identity, as extracted from a
/// snapshot for a single rule evaluation.
pub struct Observation<V> {
    pub subject: Subject,
    pub value: V,
}

impl<V> Observation<V> {
    pub fn new(subject: Subject, value: V) -> Self {
        Self { subject, value }
    }
}

/// Shared rule metadata every subtype below carries.
struct RuleMeta {
    name: String,
    description: String,
    level: Severity,
    error_name: String,
    suggestion: String,
}

/// Aggregates per-subject pass/fail into one [`CheckerResult`], honoring
/// §4.B's aggregation rules: abnormal subjects listed in encounter order
/// as `device`, and `suggestion`/`error_name` cleared when everything
/// passed.
fn aggregate(
    meta: &RuleMeta,
    spec_repr: String,
    results: Vec<(Subject, bool, String, String)>,
) -> CheckerResult {
    let mut abnormal_labels = Vec::new();
    let mut curr_values = Vec::new();
    let mut detail = String::new();

    for (subject, is_abnormal, curr_value, subject_detail) in &results {
        curr_values.push(curr_value.clone());
        if *is_abnormal {
            abnormal_labels.push(subject.label());
            if detail.is_empty() {
                detail = subject_detail.clone();
            }
        }
    }

    let any_abnormal = !abnormal_labels.is_empty();

    CheckerResult {
        name: meta.name.clone(),
        description: meta.description.clone(),
        device: abnormal_labels.join(","),
        spec: spec_repr,
        curr: curr_values.join(","),
        status: if any_abnormal {
            Status::Abnormal
        } else {
            Status::Normal
        },
        level: if any_abnormal { meta.level } else { Severity::Info },
        detail,
        error_name: if any_abnormal {
            meta.error_name.clone()
        } else {
            String::new()
        },
        suggest: if any_abnormal {
            meta.suggestion.clone()
        } else {
            String::new()
        },
        labels: Default::default(),
    }
}

/// Compares a scalar observation against a spec scalar (§4.B exact-match
/// checker). Failure detail includes both values.
pub struct ExactMatchChecker<S, F> {
    meta: RuleMeta,
    expected: String,
    extract: F,
    _marker: std::marker::PhantomData<fn(&S)>,
}

impl<S, F> ExactMatchChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<String>> + Send + Sync,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        expected: impl Into<String>,
        description: impl Into<String>,
        level: Severity,
        error_name: impl Into<String>,
        suggestion: impl Into<String>,
        extract: F,
    ) -> Self {
        Self {
            meta: RuleMeta {
                name: name.into(),
                description: description.into(),
                level,
                error_name: error_name.into(),
                suggestion: suggestion.into(),
            },
            expected: expected.into(),
            extract,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S, F> Checker<S> for ExactMatchChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<String>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn check(&self, snapshot: &S) -> Result<Option<CheckerResult>> {
        let observations = (self.extract)(snapshot);
        if observations.is_empty() {
            return Ok(None);
        }

        let results = observations
            .into_iter()
            .map(|obs| {
                let abnormal = obs.value != self.expected;
                let detail = format!("expected {}, got {}", self.expected, obs.value);
                (obs.subject, abnormal, obs.value, detail)
            })
            .collect();

        Ok(Some(aggregate(&self.meta, self.expected.clone(), results)))
    }
}

/// Numeric observation greater than a threshold is abnormal (§4.B
/// threshold checker).
pub struct ThresholdChecker<S, F> {
    meta: RuleMeta,
    max: f64,
    extract: F,
    _marker: std::marker::PhantomData<fn(&S)>,
}

impl<S, F> ThresholdChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<f64>> + Send + Sync,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        max: f64,
        description: impl Into<String>,
        level: Severity,
        error_name: impl Into<String>,
        suggestion: impl Into<String>,
        extract: F,
    ) -> Self {
        Self {
            meta: RuleMeta {
                name: name.into(),
                description: description.into(),
                level,
                error_name: error_name.into(),
                suggestion: suggestion.into(),
            },
            max,
            extract,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S, F> Checker<S> for ThresholdChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<f64>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn check(&self, snapshot: &S) -> Result<Option<CheckerResult>> {
        let observations = (self.extract)(snapshot);
        if observations.is_empty() {
            return Ok(None);
        }

        let results = observations
            .into_iter()
            .map(|obs| {
                let abnormal = obs.value > self.max;
                let detail = format!("Threshold: {}, got {}", self.max, obs.value);
                (obs.subject, abnormal, obs.value.to_string(), detail)
            })
            .collect();

        Ok(Some(aggregate(&self.meta, self.max.to_string(), results)))
    }
}

/// Parses dotted numeric strings with wildcard and operator-prefix
/// support (§4.B version checker); delegates the comparison law to
/// [`crate::version::compare_version`].
pub struct VersionChecker<S, F> {
    meta: RuleMeta,
    constraint: String,
    extract: F,
    _marker: std::marker::PhantomData<fn(&S)>,
}

impl<S, F> VersionChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<String>> + Send + Sync,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        constraint: impl Into<String>,
        description: impl Into<String>,
        level: Severity,
        error_name: impl Into<String>,
        suggestion: impl Into<String>,
        extract: F,
    ) -> Self {
        Self {
            meta: RuleMeta {
                name: name.into(),
                description: description.into(),
                level,
                error_name: error_name.into(),
                suggestion: suggestion.into(),
            },
            constraint: constraint.into(),
            extract,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S, F> Checker<S> for VersionChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<String>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn check(&self, snapshot: &S) -> Result<Option<CheckerResult>> {
        let observations = (self.extract)(snapshot);
        if observations.is_empty() {
            return Ok(None);
        }

        let results = observations
            .into_iter()
            .map(|obs| {
                let matches = compare_version(&self.constraint, &obs.value);
                let detail = format!("constraint {} not met by {}", self.constraint, obs.value);
                (obs.subject, !matches, obs.value, detail)
            })
            .collect();

        Ok(Some(aggregate(&self.meta, self.constraint.clone(), results)))
    }
}

/// Membership/enumeration of an observed set against an expected one
/// (§4.B set/presence checker).
pub struct SetMembershipChecker<S, F> {
    meta: RuleMeta,
    expected: Vec<String>,
    extract: F,
    _marker: std::marker::PhantomData<fn(&S)>,
}

impl<S, F> SetMembershipChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<String>> + Send + Sync,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        expected: Vec<String>,
        description: impl Into<String>,
        level: Severity,
        error_name: impl Into<String>,
        suggestion: impl Into<String>,
        extract: F,
    ) -> Self {
        Self {
            meta: RuleMeta {
                name: name.into(),
                description: description.into(),
                level,
                error_name: error_name.into(),
                suggestion: suggestion.into(),
            },
            expected,
            extract,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S, F> Checker<S> for SetMembershipChecker<S, F>
where
    S: SnapshotData,
    F: Fn(&S) -> Vec<Observation<String>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn check(&self, snapshot: &S) -> Result<Option<CheckerResult>> {
        let observations = (self.extract)(snapshot);
        if observations.is_empty() {
            return Ok(None);
        }

        let results = observations
            .into_iter()
            .map(|obs| {
                let abnormal = !self.expected.iter().any(|e| e == &obs.value);
                let detail = format!("{} not a member of {:?}", obs.value, self.expected);
                (obs.subject, abnormal, obs.value, detail)
            })
            .collect();

        Ok(Some(aggregate(&self.meta, self.expected.join("|"), results)))
    }
}
