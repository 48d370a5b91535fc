//! Parse policy and trigram fallback heuristics
//!
//! Decides two things: whether a bare term should be treated as fuzzy at
//! compile time (heuristic fuzzy), and whether the trigram index must be
//! consulted after the lexical pass undershot.

use crate::plan::SearchQueryPlan;
use serde::{Deserialize, Serialize};

/// Thresholds controlling heuristic fuzzy detection and trigram fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackPolicy {
    /// Mark plain alphabetic terms as fuzzy candidates at compile time.
    pub enable_heuristic_fuzzy: bool,
    /// Run the trigram pass when a prefix query returned fewer hits.
    pub prefix_min_results: usize,
    /// Run the trigram pass when an explicit fuzzy query returned fewer hits.
    pub fuzzy_min_results: usize,
    /// Run the trigram pass when the best normalized lexical score of a
    /// heuristic-fuzzy query fell below this.
    pub fuzzy_score_threshold: f64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            enable_heuristic_fuzzy: false,
            prefix_min_results: 3,
            fuzzy_min_results: 3,
            fuzzy_score_threshold: 0.35,
        }
    }
}

impl FallbackPolicy {
    /// Whether a normalized term should be flagged as heuristically fuzzy.
    ///
    /// Only plain alphabetic words of five or more characters qualify;
    /// anything with digits or filename chars is taken literally.
    #[must_use]
    pub fn is_heuristic_fuzzy_candidate(&self, token: &str) -> bool {
        self.enable_heuristic_fuzzy
            && token.chars().count() >= 5
            && token.chars().all(char::is_alphabetic)
    }

    /// Decide, after the lexical pass, whether the trigram query must also
    /// run. `top_normalized_score` is the best lexical score mapped into
    /// [0, 1); `None` when there were no lexical hits.
    #[must_use]
    pub fn should_run_trigram(
        &self,
        plan: &SearchQueryPlan,
        lexical_hits: usize,
        top_normalized_score: Option<f64>,
    ) -> bool {
        if !plan.has_trigram() {
            return false;
        }
        if plan.requires_trigram_for_wildcard || plan.requires_trigram_fallback {
            return true;
        }
        if plan.has_prefix && lexical_hits < self.prefix_min_results {
            return true;
        }
        if plan.has_explicit_fuzzy && lexical_hits < self.fuzzy_min_results {
            return true;
        }
        if plan.has_heuristic_fuzzy
            && top_normalized_score.unwrap_or(0.0) < self.fuzzy_score_threshold
        {
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScorePlan;

    fn plan_with(trigram: bool) -> SearchQueryPlan {
        SearchQueryPlan {
            match_expr: "title:report".into(),
            where_clauses: Vec::new(),
            parameters: Vec::new(),
            score_plan: ScorePlan::default(),
            requires_trigram_fallback: trigram,
            trigram_expr: trigram.then(|| "\"rep\" OR \"epo\"".to_string()),
            raw_query_text: None,
            requires_trigram_for_wildcard: false,
            has_prefix: false,
            has_explicit_fuzzy: false,
            has_heuristic_fuzzy: false,
        }
    }

    #[test]
    fn heuristic_candidates_are_long_alphabetic_words() {
        let policy = FallbackPolicy {
            enable_heuristic_fuzzy: true,
            ..FallbackPolicy::default()
        };
        assert!(policy.is_heuristic_fuzzy_candidate("recieve"));
        assert!(!policy.is_heuristic_fuzzy_candidate("cat"));
        assert!(!policy.is_heuristic_fuzzy_candidate("v1.2.3"));
        assert!(!policy.is_heuristic_fuzzy_candidate("report2024"));
    }

    #[test]
    fn heuristic_disabled_by_default() {
        let policy = FallbackPolicy::default();
        assert!(!policy.is_heuristic_fuzzy_candidate("recieve"));
    }

    #[test]
    fn no_trigram_expr_means_no_fallback() {
        let policy = FallbackPolicy::default();
        assert!(!policy.should_run_trigram(&plan_with(false), 0, None));
    }

    #[test]
    fn explicit_fallback_flag_always_runs() {
        let policy = FallbackPolicy::default();
        assert!(policy.should_run_trigram(&plan_with(true), 100, Some(0.9)));
    }

    #[test]
    fn prefix_undershoot_triggers_fallback() {
        let policy = FallbackPolicy::default();
        let mut plan = plan_with(false);
        plan.trigram_expr = Some("\"rep\" AND \"epo\"".into());
        plan.has_prefix = true;
        assert!(policy.should_run_trigram(&plan, 2, Some(0.9)));
        assert!(!policy.should_run_trigram(&plan, 3, Some(0.9)));
    }

    #[test]
    fn heuristic_low_score_triggers_fallback() {
        let policy = FallbackPolicy::default();
        let mut plan = plan_with(false);
        plan.trigram_expr = Some("\"rec\" OR \"eci\"".into());
        plan.has_heuristic_fuzzy = true;
        assert!(policy.should_run_trigram(&plan, 10, Some(0.1)));
        assert!(policy.should_run_trigram(&plan, 0, None));
        assert!(!policy.should_run_trigram(&plan, 10, Some(0.8)));
    }
}
