//! Dotted-version comparison with wildcard and operator-prefix support
//! (§4.B version checker, §8 version-compare law).
//!
//! Factored out of the checker itself so the comparison law can be
//! table-tested independently of any snapshot type.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ge,
    Gt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpecPart {
    Num(u64),
    Wildcard,
}

/// Parses a constraint of the form `[">="|">"|"=="] version` (operator
/// defaults to `==` when absent) and checks `observed` against it.
///
/// A `*` component in the constraint's version matches any value at that
/// position *and all subsequent positions* — once a wildcard is reached
/// the remaining comparison is treated as satisfied, regardless of what
/// follows in `observed`.
pub fn compare_version(constraint: &str, observed: &str) -> bool {
    let (op, spec) = parse_operator(constraint.trim());
    let spec_parts = parse_spec(spec);
    let obs_parts = parse_numeric_parts(observed);

    let ordering = compare_parts(&spec_parts, &obs_parts);
    match op {
        Op::Eq => ordering == Ordering::Equal,
        Op::Ge => ordering != Ordering::Less,
        Op::Gt => ordering == Ordering::Greater,
    }
}

fn parse_operator(constraint: &str) -> (Op, &str) {
    if let Some(rest) = constraint.strip_prefix(">=") {
        (Op::Ge, rest.trim())
    } else if let Some(rest) = constraint.strip_prefix(">") {
        (Op::Gt, rest.trim())
    } else if let Some(rest) = constraint.strip_prefix("==") {
        (Op::Eq, rest.trim())
    } else {
        (Op::Eq, constraint.trim())
    }
}

fn parse_spec(spec: &str) -> Vec<SpecPart> {
    spec.split('.')
        .map(|part| {
            if part == "*" {
                SpecPart::Wildcard
            } else {
                SpecPart::Num(part.parse::<u64>().unwrap_or(0))
            }
        })
        .collect()
}

fn parse_numeric_parts(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

/// Compares `observed` against `spec`, returning `observed.cmp(spec)` in
/// effect: `Greater` means observed outranks the constraint's version.
/// A wildcard short-circuits to `Equal` from its position onward, and a
/// spec exhausted without a wildcard treats any further observed
/// components as non-constraining (also `Equal`).
fn compare_parts(spec_parts: &[SpecPart], obs_parts: &[u64]) -> Ordering {
    for (i, part) in spec_parts.iter().enumerate() {
        match part {
            SpecPart::Wildcard => return Ordering::Equal,
            SpecPart::Num(n) => {
                let obs = obs_parts.get(i).copied().unwrap_or(0);
                match obs.cmp(n) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("535.129.03")]
    #[case("12.0.0")]
    #[case("1.2.3")]
    fn eq_round_trips(#[case] v: &str) {
        assert!(compare_version(&format!("== {v}"), v));
    }

    #[rstest]
    #[case("535.129.03")]
    #[case("1.2.3")]
    fn ge_round_trips(#[case] v: &str) {
        assert!(compare_version(&format!(">= {v}"), v));
    }

    #[rstest]
    #[case("535.129.03")]
    #[case("1.2.3")]
    fn gt_round_trips_is_false(#[case] v: &str) {
        assert!(!compare_version(&format!("> {v}"), v));
    }

    #[rstest]
    #[case("0", "9")]
    #[case("3", "7")]
    #[case("12", "34")]
    fn ge_with_trailing_wildcard_matches_any_suffix(#[case] x: &str, #[case] y: &str) {
        let v = "535.129.03";
        let constraint = format!(">= {v}.*");
        let observed = format!("{v}.{x}.{y}");
        assert!(compare_version(&constraint, &observed));
    }

    #[test]
    fn default_operator_is_eq() {
        assert!(compare_version("535.129.03", "535.129.03"));
        assert!(!compare_version("535.129.03", "535.129.04"));
    }

    #[test]
    fn version_checker_scenario_from_design_doc() {
        assert!(compare_version(">= 535.*", "535.129.03"));
        assert!(!compare_version(">= 535.*", "530.41.03"));
    }

    #[test]
    fn leading_zeros_compare_numerically() {
        assert!(compare_version("== 535.129.03", "535.129.3"));
    }

    #[test]
    fn gt_detects_strictly_newer() {
        assert!(compare_version("> 535.129.02", "535.129.03"));
        assert!(!compare_version("> 535.129.03", "535.129.02"));
    }
}
