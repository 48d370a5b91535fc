//! Query builder
//!
//! Fluent construction of the query AST plus the mutable accumulators that
//! end up in the plan: range fragments with bound parameters, field boosts,
//! and scoring overrides. `build()` snapshots everything into an immutable
//! [`SearchQueryPlan`] and resets the builder for reuse.

use crate::analyzer::AnalyzerProfile;
use crate::ast::{BoolOp, QueryNode};
use crate::error::{SearchError, SearchResult};
use crate::normalize::{extract_single_token, normalize};
use crate::plan::{ParamValue, PlanParam, SearchQueryPlan};
use crate::policy::FallbackPolicy;
use crate::scoring::{MergeMode, ScorePlan, SimilarityFn};
use crate::synonyms::SynonymProvider;
use crate::trigram;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;

/// A typed bound for a range filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeValue {
    /// Timestamp bound for the temporal range fields.
    Time(DateTime<Utc>),
    /// Byte-count bound for the size range fields.
    Size(i64),
}

/// Which value type a range column stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeKind {
    Temporal,
    Integer,
}

/// Fixed range field set; unknown fields are silently ignored.
fn range_column(field: &str) -> Option<(&'static str, RangeKind)> {
    match field.trim().to_lowercase().as_str() {
        "modified" | "modified_utc" => Some(("f.modified_utc", RangeKind::Temporal)),
        "created" | "created_utc" => Some(("f.created_utc", RangeKind::Temporal)),
        "size" | "size_bytes" => Some(("f.size_bytes", RangeKind::Integer)),
        _ => None,
    }
}

/// Resolve a caller-supplied field name. `content` and `any` both mean
/// "no field restriction"; unknown names pass through lower-cased.
fn resolve_field(field: Option<&str>) -> Option<String> {
    let raw = field?.trim().to_lowercase();
    match raw.as_str() {
        "" | "content" | "any" => None,
        _ => Some(raw),
    }
}

/// Characters permitted in custom SQL fragments.
fn is_allowed_fragment_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || ch.is_whitespace()
        || matches!(ch, '_' | '(' | ')' | '+' | '-' | '*' | '/' | '.' | ',' | ':')
}

/// Identifiers a custom fragment may reference: the score alias, the table
/// aliases, the five weighted columns, the range columns, and a small set of
/// SQL builtins.
const ALLOWED_FRAGMENT_IDENTIFIERS: &[&str] = &[
    "bm25_score",
    "custom_similarity",
    "d",
    "f",
    "title",
    "author",
    "mime",
    "metadata_text",
    "metadata",
    "modified_utc",
    "created_utc",
    "size_bytes",
    "abs",
    "min",
    "max",
    "coalesce",
    "ifnull",
    "nullif",
    "round",
    "length",
    "julianday",
    "unixepoch",
    "case",
    "when",
    "then",
    "else",
    "end",
    "cast",
    "as",
    "real",
    "integer",
    "and",
    "or",
    "not",
    "null",
];

/// Validate a caller-supplied SQL fragment against the allow-list rules.
///
/// Rejects comment/statement sequences, characters outside the allowed set,
/// and identifiers outside the declared surface. Fragments are interpolated
/// rather than parameterized, so nothing else gets through.
pub fn validate_sql_fragment(sql: &str) -> SearchResult<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SearchError::InvalidArgument(
            "SQL fragment must not be empty".into(),
        ));
    }
    for seq in ["--", "/*", "*/", ";"] {
        if trimmed.contains(seq) {
            return Err(SearchError::InvalidArgument(format!(
                "SQL fragment contains forbidden sequence {seq:?}"
            )));
        }
    }
    if let Some(bad) = trimmed.chars().find(|&c| !is_allowed_fragment_char(c)) {
        return Err(SearchError::InvalidArgument(format!(
            "SQL fragment contains forbidden character {bad:?}"
        )));
    }

    let mut chars = trimmed.char_indices().peekable();
    while let Some((start, ch)) = chars.next() {
        if !(ch.is_ascii_alphabetic() || ch == '_') {
            continue;
        }
        let mut end = start + ch.len_utf8();
        while let Some(&(idx, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                end = idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let ident = trimmed[start..end].to_lowercase();
        if !ALLOWED_FRAGMENT_IDENTIFIERS.contains(&ident.as_str()) {
            return Err(SearchError::InvalidArgument(format!(
                "SQL fragment references unknown identifier {ident:?}"
            )));
        }
    }
    Ok(())
}

/// Quote a MATCH term when it would not survive as a bareword: reserved
/// operators, whitespace, and the `.`/`-` characters the tokenizer treats as
/// separators.
fn escape_term(token: &str) -> String {
    let reserved = ["and", "or", "not", "near"]
        .iter()
        .any(|r| token.eq_ignore_ascii_case(r));
    let needs_quotes = reserved
        || token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '-' | '"'));
    if needs_quotes {
        format!("\"{}\"", token.replace('"', "\"\""))
    } else {
        token.to_string()
    }
}

fn quote_phrase(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn with_field(field: Option<&String>, inner: &str) -> String {
    match field {
        Some(f) => format!("{f}:{inner}"),
        None => inner.to_string(),
    }
}

#[derive(Debug, Default)]
struct EmitFlags {
    has_prefix: bool,
    has_explicit_fuzzy: bool,
    has_heuristic_fuzzy: bool,
    has_wildcard: bool,
    /// Wildcards and require-all fuzzy terms cannot be satisfied by the
    /// lexical pass alone; the parse policy handles the remaining cases by
    /// threshold.
    requires_fallback: bool,
}

/// Builds query ASTs and compiles them into [`SearchQueryPlan`]s.
///
/// Node constructors return `None` when no valid token survives
/// normalization; callers may absorb nulls through [`QueryBuilder::and`] /
/// [`QueryBuilder::or`].
pub struct QueryBuilder {
    language: String,
    synonyms: Option<Arc<dyn SynonymProvider>>,
    analyzer: AnalyzerProfile,
    policy: FallbackPolicy,
    score_plan: ScorePlan,
    where_clauses: Vec<String>,
    parameters: Vec<PlanParam>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            language: "en".to_string(),
            synonyms: None,
            analyzer: AnalyzerProfile::default(),
            policy: FallbackPolicy::default(),
            score_plan: ScorePlan::default(),
            where_clauses: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Attach a synonym provider used during term emission.
    #[must_use]
    pub fn with_synonyms(
        mut self,
        provider: Arc<dyn SynonymProvider>,
        language: impl Into<String>,
    ) -> Self {
        self.synonyms = Some(provider);
        self.language = language.into();
        self
    }

    /// Use an analyzer profile for stopword/number/filename handling.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: AnalyzerProfile) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Use a non-default parse policy (heuristic fuzzy thresholds).
    #[must_use]
    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    // ── Node constructors ────────────────────────────────────────────────

    /// A single-token query. Text containing `*`/`?` is routed to the
    /// prefix/wildcard forms; otherwise the first normalized token is used.
    #[must_use]
    pub fn term(&self, field: Option<&str>, text: &str) -> Option<QueryNode> {
        let raw = text.trim();
        if raw.contains('*') || raw.contains('?') {
            if let Some(stem) = raw.strip_suffix('*') {
                if !stem.contains('*') && !stem.contains('?') {
                    return self.prefix(field, raw);
                }
            }
            return self.wildcard(field, raw);
        }

        let token = extract_single_token(text)?;
        if !self.analyzer.keep_numbers && token.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let mut trigram_expr = None;
        let mut is_heuristic = false;
        if !self.analyzer.is_stopword(&token)
            && self.policy.is_heuristic_fuzzy_candidate(&token)
        {
            let expr = trigram::build_match(&self.trigram_text(&token), false);
            if !expr.is_empty() {
                trigram_expr = Some(expr);
                is_heuristic = true;
            }
        }

        Some(QueryNode::Term {
            field: resolve_field(field),
            value: token,
            trigram_expr,
            requires_all_trigrams: false,
            max_edit_distance: None,
            is_heuristic_fuzzy: is_heuristic,
        })
    }

    /// An exact phrase; the whole text is normalized.
    #[must_use]
    pub fn phrase(&self, field: Option<&str>, text: &str) -> Option<QueryNode> {
        let value = normalize(text);
        if value.is_empty() {
            return None;
        }
        Some(QueryNode::Phrase {
            field: resolve_field(field),
            value,
        })
    }

    /// Two tokens within `distance` positions; distance is clamped to >= 1.
    #[must_use]
    pub fn proximity(
        &self,
        field: Option<&str>,
        first: &str,
        second: &str,
        distance: u32,
    ) -> Option<QueryNode> {
        let first = extract_single_token(first)?;
        let second = extract_single_token(second)?;
        Some(QueryNode::Proximity {
            field: resolve_field(field),
            first,
            second,
            distance: distance.max(1),
        })
    }

    /// A prefix query; any trailing `*` is stripped before normalization and
    /// re-appended.
    #[must_use]
    pub fn prefix(&self, field: Option<&str>, text: &str) -> Option<QueryNode> {
        let stem = extract_single_token(text.trim_end_matches('*'))?;
        Some(QueryNode::Prefix {
            field: resolve_field(field),
            value: format!("{stem}*"),
        })
    }

    /// A wildcard pattern with embedded `*`/`?`, served by the trigram index.
    #[must_use]
    pub fn wildcard(&self, field: Option<&str>, pattern: &str) -> Option<QueryNode> {
        let mut normalized = String::new();
        let mut segment = String::new();
        let mut has_segment = false;
        for ch in pattern.chars() {
            if ch == '*' || ch == '?' {
                let cleaned = normalize(&segment);
                if !cleaned.is_empty() {
                    normalized.push_str(&cleaned);
                    has_segment = true;
                }
                segment.clear();
                normalized.push(ch);
            } else {
                segment.push(ch);
            }
        }
        let cleaned = normalize(&segment);
        if !cleaned.is_empty() {
            normalized.push_str(&cleaned);
            has_segment = true;
        }
        if !has_segment {
            return None;
        }
        Some(QueryNode::Wildcard {
            field: resolve_field(field),
            pattern: normalized,
        })
    }

    /// A fuzzy term: the lexical token plus a trigram expression over it.
    #[must_use]
    pub fn fuzzy(&self, field: Option<&str>, text: &str, require_all: bool) -> Option<QueryNode> {
        let token = extract_single_token(text)?;
        let expr = trigram::build_match(&self.trigram_text(&token), require_all);
        Some(QueryNode::Term {
            field: resolve_field(field),
            value: token,
            trigram_expr: (!expr.is_empty()).then_some(expr),
            requires_all_trigrams: require_all,
            max_edit_distance: Some(2),
            is_heuristic_fuzzy: false,
        })
    }

    /// Combine with AND; nulls drop, same-op children flatten.
    #[must_use]
    pub fn and(&self, nodes: impl IntoIterator<Item = Option<QueryNode>>) -> Option<QueryNode> {
        QueryNode::and(nodes)
    }

    /// Combine with OR; nulls drop, same-op children flatten.
    #[must_use]
    pub fn or(&self, nodes: impl IntoIterator<Item = Option<QueryNode>>) -> Option<QueryNode> {
        QueryNode::or(nodes)
    }

    /// Negate a node; `None` stays `None`.
    #[must_use]
    pub fn not(&self, node: Option<QueryNode>) -> Option<QueryNode> {
        QueryNode::negate(node)
    }

    // ── Accumulating operations ──────────────────────────────────────────

    /// Add a range filter over one of the fixed range fields. Unknown fields
    /// and type-mismatched bounds are silently ignored.
    pub fn range(
        &mut self,
        field: &str,
        from: Option<RangeValue>,
        to: Option<RangeValue>,
        include_lower: bool,
        include_upper: bool,
    ) -> &mut Self {
        let Some((column, kind)) = range_column(field) else {
            return self;
        };
        if let Some(value) = from.and_then(|v| coerce_range_value(kind, v)) {
            let op = if include_lower { ">=" } else { ">" };
            let name = self.next_param(value);
            self.where_clauses.push(format!("{column} {op} {name}"));
        }
        if let Some(value) = to.and_then(|v| coerce_range_value(kind, v)) {
            let op = if include_upper { "<=" } else { "<" };
            let name = self.next_param(value);
            self.where_clauses.push(format!("{column} {op} {name}"));
        }
        self
    }

    /// Multiply the BM25 weight of one of the five weighted fields.
    pub fn boost(&mut self, field: &str, factor: f64) -> SearchResult<&mut Self> {
        if !(factor > 0.0) {
            return Err(SearchError::InvalidArgument(format!(
                "boost factor must be positive, got {factor}"
            )));
        }
        let resolved = field.trim().to_lowercase();
        if !self.score_plan.weights.boost(&resolved, factor) {
            return Err(SearchError::InvalidArgument(format!(
                "field {field:?} cannot be boosted"
            )));
        }
        Ok(self)
    }

    /// Rank by `1 / (damping + bm25)` instead of raw BM25. A negative
    /// damping is silently coerced to the 0.5 default.
    pub fn use_tfidf_ranking(&mut self, damping: f64) -> &mut Self {
        self.score_plan.use_tfidf_alternative = true;
        self.score_plan.tfidf_damping = if damping < 0.0 { 0.5 } else { damping };
        self.score_plan.higher_is_better = true;
        self
    }

    /// Rank by a caller-supplied SQL expression over `bm25_score` and the
    /// declared columns.
    pub fn use_rank_expression(
        &mut self,
        sql: &str,
        higher_is_better: bool,
    ) -> SearchResult<&mut Self> {
        validate_sql_fragment(sql)?;
        self.score_plan.custom_rank_expr = Some(sql.trim().to_string());
        self.score_plan.higher_is_better = higher_is_better;
        Ok(self)
    }

    /// Compute an extra per-hit similarity column from a validated SQL
    /// fragment, exposed to rank expressions as `custom_similarity`.
    pub fn use_custom_similarity_sql(&mut self, sql: &str) -> SearchResult<&mut Self> {
        validate_sql_fragment(sql)?;
        self.score_plan.custom_similarity_sql = Some(sql.trim().to_string());
        Ok(self)
    }

    /// Replace each hit's score with the result of a code-side function.
    pub fn use_custom_similarity(&mut self, f: SimilarityFn) -> &mut Self {
        self.score_plan.custom_similarity_fn = Some(f);
        self
    }

    /// Configure how hybrid result sets are merged.
    pub fn use_merge_mode(&mut self, mode: MergeMode) -> &mut Self {
        self.score_plan.merge_mode = mode;
        self
    }

    /// Weight of the lexical source in hybrid merges, clamped to [0, 1].
    pub fn use_lexical_weight(&mut self, weight: f64) -> &mut Self {
        self.score_plan.lexical_weight = weight.clamp(0.0, 1.0);
        self
    }

    // ── Compilation ──────────────────────────────────────────────────────

    /// Compile `root` plus the accumulated ranges/boosts/overrides into an
    /// immutable plan, then reset the builder for reuse.
    ///
    /// Fails with [`SearchError::InvalidQuery`] when neither a MATCH nor a
    /// trigram expression was produced.
    pub fn build(
        &mut self,
        root: Option<&QueryNode>,
        raw_text: Option<&str>,
    ) -> SearchResult<SearchQueryPlan> {
        let mut flags = EmitFlags::default();
        let (match_expr, trigram_expr) = match root {
            Some(node) => self.emit(node, &mut flags),
            None => (String::new(), String::new()),
        };

        if match_expr.is_empty() && trigram_expr.is_empty() {
            self.reset();
            return Err(SearchError::InvalidQuery(
                "query produced neither a MATCH nor a trigram expression".into(),
            ));
        }

        let plan = SearchQueryPlan {
            match_expr,
            where_clauses: std::mem::take(&mut self.where_clauses),
            parameters: std::mem::take(&mut self.parameters),
            score_plan: self.score_plan.clone(),
            requires_trigram_fallback: flags.requires_fallback,
            trigram_expr: (!trigram_expr.is_empty()).then_some(trigram_expr),
            raw_query_text: raw_text.map(str::to_string),
            requires_trigram_for_wildcard: flags.has_wildcard,
            has_prefix: flags.has_prefix,
            has_explicit_fuzzy: flags.has_explicit_fuzzy,
            has_heuristic_fuzzy: flags.has_heuristic_fuzzy,
        };
        self.reset();
        Ok(plan)
    }

    fn reset(&mut self) {
        self.where_clauses.clear();
        self.parameters.clear();
        self.score_plan = ScorePlan::default();
    }

    fn next_param(&mut self, value: ParamValue) -> String {
        let name = format!("$p{}", self.parameters.len());
        self.parameters.push(PlanParam {
            name: name.clone(),
            value,
        });
        name
    }

    fn trigram_text(&self, token: &str) -> String {
        if self.analyzer.split_filenames {
            token.replace(['.', '_', '-'], " ")
        } else {
            token.to_string()
        }
    }

    fn expand_term(&self, value: &str) -> Vec<String> {
        if self.analyzer.is_stopword(value) {
            return vec![value.to_string()];
        }
        match &self.synonyms {
            Some(provider) => {
                let expansions = provider.expand(&self.language, value);
                if expansions.is_empty() {
                    vec![value.to_string()]
                } else {
                    expansions
                }
            }
            None => vec![value.to_string()],
        }
    }

    /// Walk the AST, producing the MATCH expression and the compositionally
    /// collected trigram expression.
    fn emit(&self, node: &QueryNode, flags: &mut EmitFlags) -> (String, String) {
        match node {
            QueryNode::Term {
                field,
                value,
                trigram_expr,
                requires_all_trigrams,
                is_heuristic_fuzzy,
                ..
            } => {
                if trigram_expr.is_some() {
                    if *is_heuristic_fuzzy {
                        flags.has_heuristic_fuzzy = true;
                    } else {
                        flags.has_explicit_fuzzy = true;
                        if *requires_all_trigrams {
                            flags.requires_fallback = true;
                        }
                    }
                }
                let expansions = self.expand_term(value);
                let escaped: Vec<String> = expansions
                    .iter()
                    .map(|e| {
                        if e.contains(' ') {
                            quote_phrase(e)
                        } else {
                            escape_term(e)
                        }
                    })
                    .collect();
                let inner = match escaped.len() {
                    0 => String::new(),
                    1 => escaped.into_iter().next().unwrap_or_default(),
                    _ => format!("({})", escaped.join(" OR ")),
                };
                let match_part = if inner.is_empty() {
                    String::new()
                } else {
                    with_field(field.as_ref(), &inner)
                };
                (match_part, trigram_expr.clone().unwrap_or_default())
            }
            QueryNode::Phrase { field, value } => {
                (with_field(field.as_ref(), &quote_phrase(value)), String::new())
            }
            QueryNode::Proximity {
                field,
                first,
                second,
                distance,
            } => {
                let inner = format!("NEAR(\"{first}\" \"{second}\", {distance})");
                (with_field(field.as_ref(), &inner), String::new())
            }
            QueryNode::Prefix { field, value } => {
                flags.has_prefix = true;
                let stem = value.trim_end_matches('*');
                let tri = trigram::build_match(stem, true);
                (with_field(field.as_ref(), value), tri)
            }
            QueryNode::Wildcard { pattern, .. } => {
                flags.has_wildcard = true;
                flags.requires_fallback = true;
                (String::new(), trigram::build_wildcard_match(pattern))
            }
            QueryNode::Boolean { op, children } => {
                let joiner = match op {
                    BoolOp::And => " AND ",
                    BoolOp::Or => " OR ",
                };
                let mut match_parts: Vec<String> = Vec::new();
                let mut trigram_parts: Vec<String> = Vec::new();
                for child in children {
                    let (m, t) = self.emit(child, flags);
                    if !m.is_empty() {
                        match_parts.push(m);
                    }
                    if !t.is_empty() {
                        trigram_parts.push(t);
                    }
                }
                let match_expr = match match_parts.len() {
                    0 => String::new(),
                    1 => match_parts.remove(0),
                    _ => format!("({})", match_parts.join(joiner)),
                };
                let trigram_expr = match trigram_parts.len() {
                    0 => String::new(),
                    1 => trigram_parts.remove(0),
                    _ => format!("({})", trigram_parts.join(joiner)),
                };
                (match_expr, trigram_expr)
            }
            QueryNode::Not { operand } => {
                let (m, t) = self.emit(operand, flags);
                let match_expr = if m.is_empty() {
                    String::new()
                } else {
                    format!("NOT ({m})")
                };
                let trigram_expr = if t.is_empty() {
                    String::new()
                } else {
                    format!("NOT ({t})")
                };
                (match_expr, trigram_expr)
            }
        }
    }
}

/// Keep range bounds typed: temporal columns bind ISO-8601 round-trip
/// strings, size columns bind integers. Mismatched bounds are dropped.
fn coerce_range_value(kind: RangeKind, value: RangeValue) -> Option<ParamValue> {
    match (kind, value) {
        (RangeKind::Temporal, RangeValue::Time(dt)) => Some(ParamValue::Text(
            dt.to_rfc3339_opts(SecondsFormat::Secs, false),
        )),
        (RangeKind::Integer, RangeValue::Size(n)) => Some(ParamValue::Integer(n)),
        _ => None,
    }
}
