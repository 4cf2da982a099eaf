//! Composite query construction.
//!
//! Builds the single query expression the search resource carries, from
//! a list of detection rules plus free-form supplemental identifiers.
//! Pure and deterministic: the same inputs always produce a
//! byte-identical expression.

use crate::error::QueryError;

/// Full confidence range: match regardless of confidence. The discovery
/// phase over-collects rather than under-collects; narrowing happens
/// downstream.
pub const FULL_CONFIDENCE: &str = "1..100";

/// Any match length.
pub const ANY_LENGTH: &str = "1..";

/// A named detection rule with its clause parameters.
#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub id: String,
    pub length_range: String,
    pub confidence_range: String,
}

impl DetectionRule {
    /// Rule with the default (maximally permissive) ranges.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            length_range: ANY_LENGTH.to_string(),
            confidence_range: FULL_CONFIDENCE.to_string(),
        }
    }
}

/// An immutable composite query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    clause_count: usize,
}

impl Query {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clause_count(&self) -> usize {
        self.clause_count
    }
}

/// Build the composite query: one clause per rule, one per supplemental
/// identifier, all joined with `OR`.
///
/// Named rules carry their configured confidence range; supplemental
/// identifiers always get [`FULL_CONFIDENCE`] — they exist to recover
/// matches known to be undercounted by the named-rule clauses, so they
/// are never narrowed.
///
/// Fails with [`QueryError::Empty`] when zero clauses would be produced.
pub fn build_query(
    rules: &[DetectionRule],
    supplemental_ids: &[String],
) -> Result<Query, QueryError> {
    let mut clauses = Vec::with_capacity(rules.len() + supplemental_ids.len());

    for rule in rules {
        clauses.push(render_clause(
            &rule.id,
            &rule.length_range,
            &rule.confidence_range,
        ));
    }
    for id in supplemental_ids {
        clauses.push(render_clause(id, ANY_LENGTH, FULL_CONFIDENCE));
    }

    if clauses.is_empty() {
        return Err(QueryError::Empty);
    }

    Ok(Query {
        clause_count: clauses.len(),
        text: clauses.join(" OR "),
    })
}

fn render_clause(id: &str, length: &str, confidence: &str) -> String {
    format!("rule:\"{}|{}|{}\"", id, length, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, confidence: &str) -> DetectionRule {
        DetectionRule {
            id: id.to_string(),
            length_range: ANY_LENGTH.to_string(),
            confidence_range: confidence.to_string(),
        }
    }

    #[test]
    fn single_rule_has_no_or() {
        let q = build_query(&[rule("A", "75..100")], &[]).unwrap();
        assert_eq!(q.as_str(), "rule:\"A|1..|75..100\"");
        assert_eq!(q.clause_count(), 1);
    }

    #[test]
    fn clause_count_is_rules_plus_supplemental() {
        let rules = vec![rule("A", "1..100"), rule("B", "85..100")];
        let extra = vec!["X".to_string(), "Y".to_string(), "Z".to_string()];
        let q = build_query(&rules, &extra).unwrap();
        assert_eq!(q.clause_count(), 5);
        assert_eq!(q.as_str().matches(" OR ").count(), 4);
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let rules = vec![rule("A", "60..100"), rule("B", "1..100")];
        let extra = vec!["legacy-1".to_string()];
        let a = build_query(&rules, &extra).unwrap();
        let b = build_query(&rules, &extra).unwrap();
        assert_eq!(a.as_str(), b.as_str());
        assert_eq!(a, b);
    }

    #[test]
    fn supplemental_ids_are_always_permissive() {
        let q = build_query(&[rule("A", "90..100")], &["extra".to_string()]).unwrap();
        assert!(q.as_str().ends_with("rule:\"extra|1..|1..100\""));
        // The named rule keeps its narrowed range.
        assert!(q.as_str().starts_with("rule:\"A|1..|90..100\""));
    }

    #[test]
    fn empty_inputs_fail() {
        assert_eq!(build_query(&[], &[]).unwrap_err(), QueryError::Empty);
    }

    #[test]
    fn default_rule_ranges() {
        let q = build_query(&[DetectionRule::new("R")], &[]).unwrap();
        assert_eq!(q.as_str(), "rule:\"R|1..|1..100\"");
    }
}
