//! Hybrid executor
//!
//! Runs a compiled plan against the store: lexical MATCH over the FTS index,
//! the trigram MATCH when the parse policy demands it, merge and ranking,
//! paging, and snippet hydration.
//!
//! External contract: the mirror table joins to the domain `files` table
//! (`files.id BLOB PRIMARY KEY`, `modified_utc`, `created_utc`,
//! `size_bytes`), which the range fragments reference as `f`.

use crate::database::Database;
use crate::error::{SearchError, SearchResult};
use crate::models::{parse_utc, HitSource, SearchHit, SearchPage, SnippetData};
use crate::plan::{ParamValue, SearchQueryPlan};
use crate::policy::FallbackPolicy;
use crate::schema::{SchemaManager, SchemaState};
use crate::scoring::{MergeMode, ScorePlan};
use crate::snippet;
use once_cell::sync::Lazy;
use rusqlite::ToSql;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fallback runtime for callers outside any async context; the interrupt
/// watchers need an executor to live on.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("failed to create fallback tokio runtime")
});

fn runtime_handle() -> tokio::runtime::Handle {
    tokio::runtime::Handle::try_current().unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
}

/// Map a rank value to a non-negative goodness, respecting direction.
/// BM25 is cost-like, so the default direction negates.
fn goodness(rank: f64, higher_is_better: bool) -> f64 {
    let g = if higher_is_better { rank } else { -rank };
    g.max(0.0)
}

/// Squash a goodness into [0, 1); comparable across sources.
fn normalized(g: f64) -> f64 {
    g / (1.0 + g)
}

/// A row from the lexical pass.
#[derive(Debug, Clone)]
struct LexicalRow {
    file_id: Vec<u8>,
    title: String,
    author: Option<String>,
    mime: String,
    metadata_text: Option<String>,
    modified_utc: Option<String>,
    bm25: f64,
    custom_similarity: Option<f64>,
    rank: f64,
}

/// A row from the trigram pass.
#[derive(Debug, Clone)]
struct TrigramRow {
    file_id: Vec<u8>,
    score: f64,
}

#[derive(Debug, Clone, Default)]
struct MergedHit {
    lexical: Option<LexicalRow>,
    lexical_norm: f64,
    trigram_norm: Option<f64>,
}

/// Executes compiled plans against one store.
pub struct SearchExecutor {
    db: Database,
    schema: Arc<SchemaManager>,
    policy: FallbackPolicy,
}

impl SearchExecutor {
    #[must_use]
    pub fn new(db: Database, schema: Arc<SchemaManager>) -> Self {
        Self {
            db,
            schema,
            policy: FallbackPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run `plan`, returning `take` hits after skipping `skip`.
    ///
    /// The lexical pass completes before any trigram pass starts; the merge
    /// happens after both. A cancelled token aborts the in-flight statement
    /// and surfaces [`SearchError::Cancelled`] with no partial rows.
    pub fn search(
        &self,
        plan: &SearchQueryPlan,
        skip: usize,
        take: usize,
        token: &CancellationToken,
    ) -> SearchResult<SearchPage> {
        match self.schema.state() {
            SchemaState::Valid => {}
            SchemaState::Unavailable => {
                return Err(SearchError::FeatureUnavailable(
                    "full-text search is unavailable".into(),
                ));
            }
            SchemaState::Unknown | SchemaState::Degraded => {
                return Err(SearchError::Schema("search schema is not ready".into()));
            }
        }

        let runtime = runtime_handle();
        let score = &plan.score_plan;
        let oversample =
            (skip + take).max(1) * usize::try_from(score.oversample_multiplier.max(1)).unwrap_or(1);

        let lexical = if plan.has_match() {
            self.run_lexical(plan, oversample, token, &runtime)
                .map_err(|e| attach_context(e, plan))?
        } else {
            Vec::new()
        };

        let top_normalized = lexical
            .iter()
            .map(|row| normalized(goodness(row.rank, score.higher_is_better)))
            .fold(None::<f64>, |best, n| {
                Some(best.map_or(n, |b: f64| b.max(n)))
            });

        let run_trigram = if plan.has_match() {
            self.policy
                .should_run_trigram(plan, lexical.len(), top_normalized)
        } else {
            plan.has_trigram()
        };

        let trigram = if run_trigram {
            self.run_trigram(plan, oversample, token, &runtime)
                .map_err(|e| attach_context(e, plan))?
        } else {
            Vec::new()
        };

        debug!(
            target: "docdex.executor",
            lexical = lexical.len(),
            trigram = trigram.len(),
            fallback = run_trigram,
            "executed search plan"
        );

        let lexical_hit_count = lexical.len();
        let mut hits = self.merge(score, lexical, trigram, token, &runtime)?;

        hits.sort_unstable_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });

        // `merge` stashes the raw metadata text in the snippet slot; build
        // the real snippet over title + metadata text for the final page.
        let terms = snippet::highlight_terms(&plan.match_expr);
        let hits: Vec<SearchHit> = hits
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|mut hit| {
                let mut content = hit.title.clone();
                if !hit.snippet.text.is_empty() {
                    content.push(' ');
                    content.push_str(&hit.snippet.text);
                }
                hit.snippet = snippet::hydrate(&content, &terms);
                hit
            })
            .collect();

        Ok(SearchPage {
            hits,
            lexical_hit_count,
            used_trigram_fallback: run_trigram,
        })
    }

    // ── Passes ───────────────────────────────────────────────────────────

    fn run_lexical(
        &self,
        plan: &SearchQueryPlan,
        limit: usize,
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> SearchResult<Vec<LexicalRow>> {
        let score = &plan.score_plan;
        let weights = &score.weights;
        let bm25_expr = format!(
            "bm25(search_document_fts, {}, {}, {}, {}, {})",
            weights.title, weights.author, weights.mime, weights.metadata_text, weights.metadata
        );

        // Select-list aliases cannot be referenced from sibling expressions,
        // so the validated fragments get the real expressions substituted in.
        // The substituted names are exact allow-listed identifiers, never
        // substrings of other permitted tokens.
        let similarity_expr = score
            .custom_similarity_sql
            .as_ref()
            .map(|sql| format!("({})", sql.replace("bm25_score", &bm25_expr)));
        let similarity_select = similarity_expr
            .clone()
            .unwrap_or_else(|| "NULL".to_string());
        let rank_expr = rank_expression(score)
            .replace(
                "custom_similarity",
                similarity_expr.as_deref().unwrap_or("NULL"),
            )
            .replace("bm25_score", &bm25_expr);

        let mut where_sql = String::from("WHERE search_document_fts MATCH $match");
        for clause in &plan.where_clauses {
            where_sql.push_str(" AND ");
            where_sql.push_str(clause);
        }

        let direction = if score.higher_is_better { "DESC" } else { "ASC" };

        let sql = format!(
            "SELECT d.file_id AS file_id, d.title AS title, d.author AS author, \
                    d.mime AS mime, d.metadata_text AS metadata_text, \
                    d.modified_utc AS modified_utc, \
                    {bm25_expr} AS bm25_score, \
                    {similarity_select} AS custom_similarity, \
                    ({rank_expr}) AS rank_score \
             FROM search_document_fts \
             JOIN search_document d ON d.rowid = search_document_fts.rowid \
             JOIN files f ON f.id = d.file_id \
             {where_sql} \
             ORDER BY rank_score {direction} \
             LIMIT $limit"
        );

        let mut params: Vec<(String, ParamValue)> = vec![
            ("$match".to_string(), ParamValue::Text(plan.match_expr.clone())),
        ];
        for param in &plan.parameters {
            params.push((param.name.clone(), param.value.clone()));
        }
        params.push((
            "$limit".to_string(),
            ParamValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)),
        ));

        self.db.with_interrupt(token, runtime, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let bound: Vec<(&str, &dyn ToSql)> = params
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();
            let rows = stmt.query_map(&bound[..], |row| {
                Ok(LexicalRow {
                    file_id: row.get(0)?,
                    title: row.get(1)?,
                    author: row.get(2)?,
                    mime: row.get(3)?,
                    metadata_text: row.get(4)?,
                    modified_utc: row.get(5)?,
                    bm25: row.get(6)?,
                    custom_similarity: row.get(7)?,
                    rank: row.get(8)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
    }

    fn run_trigram(
        &self,
        plan: &SearchQueryPlan,
        limit: usize,
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> SearchResult<Vec<TrigramRow>> {
        let Some(expr) = plan.trigram_expr.clone() else {
            return Ok(Vec::new());
        };

        let mut where_sql = String::from("WHERE search_trigram MATCH $match");
        for clause in &plan.where_clauses {
            where_sql.push_str(" AND ");
            where_sql.push_str(clause);
        }

        let sql = format!(
            "SELECT m.file_id AS file_id, bm25(search_trigram) AS trigram_score \
             FROM search_trigram \
             JOIN search_trigram_map m ON m.id = search_trigram.rowid \
             JOIN search_document d ON d.file_id = m.file_id \
             JOIN files f ON f.id = m.file_id \
             {where_sql} \
             ORDER BY trigram_score ASC \
             LIMIT $limit"
        );

        let mut params: Vec<(String, ParamValue)> =
            vec![("$match".to_string(), ParamValue::Text(expr))];
        for param in &plan.parameters {
            params.push((param.name.clone(), param.value.clone()));
        }
        params.push((
            "$limit".to_string(),
            ParamValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)),
        ));

        self.db.with_interrupt(token, runtime, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let bound: Vec<(&str, &dyn ToSql)> = params
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();
            let rows = stmt.query_map(&bound[..], |row| {
                Ok(TrigramRow {
                    file_id: row.get(0)?,
                    score: row.get(1)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
    }

    // ── Merge ────────────────────────────────────────────────────────────

    fn merge(
        &self,
        score: &ScorePlan,
        lexical: Vec<LexicalRow>,
        trigram: Vec<TrigramRow>,
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> SearchResult<Vec<SearchHit>> {
        let mut merged: HashMap<Vec<u8>, MergedHit> = HashMap::new();

        for row in lexical {
            let norm = normalized(goodness(row.rank, score.higher_is_better));
            let entry = merged.entry(row.file_id.clone()).or_default();
            entry.lexical_norm = norm;
            entry.lexical = Some(row);
        }
        for row in trigram {
            // Trigram BM25 is cost-like; scale and floor the normalized
            // value so fuzzy evidence neither dominates nor vanishes.
            let norm = normalized(goodness(row.score, false));
            let scaled = (norm * score.trigram_scale).max(score.trigram_floor);
            merged.entry(row.file_id.clone()).or_default().trigram_norm = Some(scaled);
        }

        // Hydrate mirror rows for trigram-only hits.
        let missing: Vec<Vec<u8>> = merged
            .iter()
            .filter(|(_, hit)| hit.lexical.is_none())
            .map(|(file_id, _)| file_id.clone())
            .collect();
        let mirror_rows = if missing.is_empty() {
            HashMap::new()
        } else {
            self.fetch_mirror_rows(&missing, token, runtime)?
        };

        let w = score.lexical_weight;
        let mut hits = Vec::with_capacity(merged.len());
        for (file_id, hit) in merged {
            let lexical_part = hit.lexical.is_some().then_some(hit.lexical_norm);
            let merged_score = merge_score(
                score.merge_mode,
                w,
                lexical_part.unwrap_or(0.0),
                hit.trigram_norm.unwrap_or(0.0),
            ) * score.score_multiplier;

            let source = match (&hit.lexical, hit.trigram_norm) {
                (Some(_), Some(_)) => HitSource::Both,
                (Some(_), None) => HitSource::Lexical,
                (None, _) => HitSource::Trigram,
            };

            let (title, author, mime, metadata_text, modified_utc, bm25, custom_similarity) =
                match hit.lexical {
                    Some(row) => (
                        row.title,
                        row.author,
                        row.mime,
                        row.metadata_text,
                        row.modified_utc,
                        Some(row.bm25),
                        row.custom_similarity,
                    ),
                    None => match mirror_rows.get(&file_id) {
                        Some(row) => (
                            row.0.clone(),
                            row.1.clone(),
                            row.2.clone(),
                            row.3.clone(),
                            row.4.clone(),
                            None,
                            None,
                        ),
                        // Mirror row vanished between passes; skip the hit.
                        None => continue,
                    },
                };

            let modified = modified_utc.as_deref().and_then(parse_utc);
            let final_score = match &score.custom_similarity_fn {
                Some(f) => f(bm25.unwrap_or(0.0), custom_similarity, modified),
                None => merged_score,
            };

            hits.push(SearchHit {
                file_id,
                title,
                author,
                mime,
                score: final_score,
                bm25,
                custom_similarity,
                modified_utc: modified,
                source,
                snippet: SnippetData {
                    text: metadata_text.unwrap_or_default(),
                    highlights: Vec::new(),
                },
            });
        }
        Ok(hits)
    }

    #[allow(clippy::type_complexity)]
    fn fetch_mirror_rows(
        &self,
        file_ids: &[Vec<u8>],
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> SearchResult<
        HashMap<Vec<u8>, (String, Option<String>, String, Option<String>, Option<String>)>,
    > {
        let placeholders = file_ids
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT file_id, title, author, mime, metadata_text, modified_utc \
             FROM search_document WHERE file_id IN ({placeholders})"
        );
        let ids = file_ids.to_vec();
        self.db.with_interrupt(token, runtime, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
            let rows = stmt.query_map(&params[..], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    (
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ),
                ))
            })?;
            let mut map = HashMap::new();
            for row in rows {
                let (id, data) = row?;
                map.insert(id, data);
            }
            Ok(map)
        })
    }
}

/// The ORDER BY expression over the inner columns, per the scoring plan.
fn rank_expression(score: &ScorePlan) -> String {
    let base = match (&score.custom_rank_expr, score.use_tfidf_alternative) {
        (Some(expr), _) => format!("({expr})"),
        (None, true) => format!("(1.0 / ({} + bm25_score))", score.tfidf_damping),
        (None, false) => "bm25_score".to_string(),
    };
    if (score.score_multiplier - 1.0).abs() > f64::EPSILON {
        format!("({base} * {})", score.score_multiplier)
    } else {
        base
    }
}

fn merge_score(mode: MergeMode, lexical_weight: f64, lexical: f64, trigram: f64) -> f64 {
    match mode {
        MergeMode::Max => (lexical_weight * lexical).max((1.0 - lexical_weight) * trigram),
        MergeMode::Sum => lexical + trigram,
        MergeMode::Weighted => lexical_weight * lexical + (1.0 - lexical_weight) * trigram,
    }
}

/// Surface store failures with the plan's raw query text as diagnostic
/// context; the error itself propagates unchanged.
fn attach_context(err: SearchError, plan: &SearchQueryPlan) -> SearchError {
    if let (SearchError::Store(inner), Some(raw)) = (&err, &plan.raw_query_text) {
        tracing::warn!(
            target: "docdex.executor",
            query = %raw,
            error = %inner,
            "search plan execution failed"
        );
    }
    err
}
