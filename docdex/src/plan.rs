//! Compiled query plan
//!
//! The immutable output of the builder: a MATCH expression, the optional
//! trigram expression for the fallback index, SQL WHERE fragments with their
//! bound parameters, the scoring plan, and diagnostic flags the executor and
//! parse policy consume.

use crate::scoring::ScorePlan;
use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;

/// A typed value bound to a named placeholder (`$pN`).
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Text(s) => s.to_sql(),
            Self::Integer(i) => i.to_sql(),
            Self::Real(f) => f.to_sql(),
        }
    }
}

/// A named bound parameter of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanParam {
    /// Placeholder name including the `$` prefix, e.g. `$p0`.
    pub name: String,
    pub value: ParamValue,
}

/// The immutable compiled representation of a query.
#[derive(Debug, Clone)]
pub struct SearchQueryPlan {
    /// FTS MATCH expression; empty when the query is trigram-only.
    pub match_expr: String,
    /// SQL fragments ANDed into the WHERE clause, e.g. `f.modified_utc >= $p0`.
    pub where_clauses: Vec<String>,
    pub parameters: Vec<PlanParam>,
    pub score_plan: ScorePlan,
    /// The trigram query must also run (fuzzy terms or wildcards present).
    pub requires_trigram_fallback: bool,
    /// MATCH expression against the trigram index, when one was synthesized.
    pub trigram_expr: Option<String>,
    /// The caller's original text, attached to executor errors as context.
    pub raw_query_text: Option<String>,
    /// A wildcard node can only be served by the trigram index.
    pub requires_trigram_for_wildcard: bool,
    pub has_prefix: bool,
    pub has_explicit_fuzzy: bool,
    pub has_heuristic_fuzzy: bool,
}

impl SearchQueryPlan {
    /// Whether the plan has a lexical MATCH component.
    #[must_use]
    pub fn has_match(&self) -> bool {
        !self.match_expr.is_empty()
    }

    /// Whether the plan has a trigram component.
    #[must_use]
    pub fn has_trigram(&self) -> bool {
        self.trigram_expr.as_deref().is_some_and(|e| !e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_value_to_sql_variants() {
        assert!(ParamValue::Text("x".into()).to_sql().is_ok());
        assert!(ParamValue::Integer(42).to_sql().is_ok());
        assert!(ParamValue::Real(1.5).to_sql().is_ok());
    }

    #[test]
    fn plan_component_predicates() {
        let plan = SearchQueryPlan {
            match_expr: "title:report".into(),
            where_clauses: Vec::new(),
            parameters: Vec::new(),
            score_plan: ScorePlan::default(),
            requires_trigram_fallback: false,
            trigram_expr: None,
            raw_query_text: None,
            requires_trigram_for_wildcard: false,
            has_prefix: false,
            has_explicit_fuzzy: false,
            has_heuristic_fuzzy: false,
        };
        assert!(plan.has_match());
        assert!(!plan.has_trigram());
    }
}
