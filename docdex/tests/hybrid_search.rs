//! End-to-end search tests: compile plans, execute against a real store,
//! and check ranking, fallback, and hydration behavior.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use docdex::{
    Database, DocumentRecord, FallbackPolicy, HitSource, MergeMode, QueryBuilder, RangeValue,
    SchemaManager, SearchError, SearchExecutor,
};
use tokio_util::sync::CancellationToken;

struct Fixture {
    _dir: tempfile::TempDir,
    db_path: std::path::PathBuf,
    db: Database,
    schema: Arc<SchemaManager>,
}

fn doc(
    id: u8,
    title: &str,
    author: Option<&str>,
    metadata_text: &str,
    modified: (i32, u32, u32),
) -> DocumentRecord {
    DocumentRecord {
        file_id: vec![id; 16],
        title: title.to_string(),
        author: author.map(str::to_string),
        mime: "application/pdf".into(),
        metadata_text: Some(metadata_text.to_string()),
        metadata_json: None,
        created_utc: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        modified_utc: Utc
            .with_ymd_and_hms(modified.0, modified.1, modified.2, 12, 0, 0)
            .unwrap(),
        content_hash: format!("hash-{id}"),
        stored_content_hash: None,
        stored_token_hash: None,
    }
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dex.db");
    let db = Database::open(&db_path).unwrap();
    let schema = Arc::new(SchemaManager::new(db.clone()));
    schema.bootstrap().unwrap();

    // The domain `files` table is owned by ingestion; create the slice the
    // executor joins against.
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            id BLOB PRIMARY KEY,
            modified_utc TEXT NOT NULL,
            created_utc TEXT NOT NULL,
            size_bytes INTEGER NOT NULL
        )",
    )
    .unwrap();

    let docs = vec![
        (
            doc(
                1,
                "Annual Report 2024",
                Some("Alice Smith"),
                "quarterly earnings statement for the fiscal year",
                (2024, 3, 1),
            ),
            2048_i64,
        ),
        (
            doc(
                2,
                "Kitchen Renovation",
                Some("Bob Jones"),
                "receipts and invoices, payment received confirmation",
                (2023, 6, 15),
            ),
            512,
        ),
        (
            doc(
                3,
                "Recipe Collection",
                Some("Alice Smith"),
                "dinner ideas and menus",
                (2024, 5, 1),
            ),
            1024,
        ),
        (
            doc(
                4,
                "Misc Notes",
                Some("Carol White"),
                "weekly report drafts",
                (2023, 2, 1),
            ),
            256,
        ),
    ];
    for (record, size) in docs {
        schema.index_document(&record).unwrap();
        conn.execute(
            "INSERT INTO files (id, modified_utc, created_utc, size_bytes)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.file_id,
                record.modified_utc.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
                record.created_utc.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
                size
            ],
        )
        .unwrap();
    }
    drop(conn);

    Fixture {
        _dir: dir,
        db_path,
        db,
        schema,
    }
}

fn executor(fx: &Fixture) -> SearchExecutor {
    SearchExecutor::new(fx.db.clone(), Arc::clone(&fx.schema))
}

fn titles(page: &docdex::SearchPage) -> Vec<String> {
    page.hits.iter().map(|h| h.title.clone()).collect()
}

#[test]
fn field_restricted_term_only_matches_that_field() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(Some("title"), "report");
    let plan = b.build(node.as_ref(), Some("title:report")).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(titles(&page), vec!["Annual Report 2024"]);

    // Unfielded, the same token also matches the metadata text of doc 4.
    let node = b.term(None, "report");
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.hits.len(), 2);
}

#[test]
fn boolean_and_with_author_phrase() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.and([
        b.term(Some("title"), "annual"),
        b.phrase(Some("author"), "Alice Smith"),
    ]);
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(titles(&page), vec!["Annual Report 2024"]);
}

#[test]
fn range_filter_narrows_by_modified_time() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "report");
    b.range(
        "modified",
        Some(RangeValue::Time(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )),
        None,
        true,
        true,
    );
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(titles(&page), vec!["Annual Report 2024"]);
}

#[test]
fn size_range_filter() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.phrase(Some("author"), "alice smith");
    b.range(
        "size_bytes",
        Some(RangeValue::Size(1500)),
        None,
        true,
        true,
    );
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(titles(&page), vec!["Annual Report 2024"]);
}

#[test]
fn prefix_undershoot_runs_trigram_fallback() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.prefix(None, "repo*");
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    // Two lexical prefix hits, below the default threshold of three.
    assert!(page.used_trigram_fallback);
    assert!(page.hits.len() >= 2);
}

#[test]
fn fuzzy_query_finds_typo_via_trigrams() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    // "recieve" matches nothing lexically; the trigram pass reaches the
    // document mentioning "received".
    let node = b.fuzzy(None, "recieve", false);
    let plan = b.build(node.as_ref(), Some("recieve")).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert!(page.used_trigram_fallback);
    assert_eq!(page.lexical_hit_count, 0);
    assert!(!page.hits.is_empty());
    assert!(page
        .hits
        .iter()
        .all(|h| matches!(h.source, HitSource::Trigram)));
    assert!(titles(&page).contains(&"Kitchen Renovation".to_string()));
}

#[test]
fn wildcard_is_served_by_trigram_index() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "ren?vation");
    let plan = b.build(node.as_ref(), None).unwrap();
    assert!(plan.requires_trigram_for_wildcard);
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert!(titles(&page).contains(&"Kitchen Renovation".to_string()));
}

#[test]
fn hybrid_max_score_is_at_least_lexical_only() {
    let fx = fixture();
    let mut b = QueryBuilder::new();

    // Lexical-only pass: fallback thresholds disabled.
    let no_fallback = FallbackPolicy {
        fuzzy_min_results: 0,
        ..FallbackPolicy::default()
    };
    let exec = executor(&fx).with_policy(no_fallback);
    let node = b.fuzzy(None, "report", false);
    let plan = b.build(node.as_ref(), None).unwrap();
    let lexical_page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert!(!lexical_page.used_trigram_fallback);

    // Hybrid pass over the same plan.
    let always_fallback = FallbackPolicy {
        fuzzy_min_results: usize::MAX,
        ..FallbackPolicy::default()
    };
    let exec = executor(&fx).with_policy(always_fallback);
    let node = b.fuzzy(None, "report", false);
    let mut hybrid_builder = QueryBuilder::new();
    hybrid_builder.use_merge_mode(MergeMode::Max);
    let plan = hybrid_builder.build(node.as_ref(), None).unwrap();
    let hybrid_page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert!(hybrid_page.used_trigram_fallback);

    for lexical_hit in &lexical_page.hits {
        let hybrid_hit = hybrid_page
            .hits
            .iter()
            .find(|h| h.file_id == lexical_hit.file_id)
            .expect("hybrid result set lost a lexical hit");
        assert!(
            hybrid_hit.score >= lexical_hit.score - 1e-9,
            "hybrid merge lowered a lexical score: {} < {}",
            hybrid_hit.score,
            lexical_hit.score
        );
    }
}

#[test]
fn boost_changes_relative_order() {
    let fx = fixture();
    let exec = executor(&fx);

    // "report" appears in doc 1's title and doc 4's metadata text; crushing
    // the title weight and boosting metadata_text flips the order.
    let mut b = QueryBuilder::new();
    let node = b.term(None, "report");
    let plan = b.build(node.as_ref(), None).unwrap();
    let default_page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(default_page.hits[0].title, "Annual Report 2024");

    let node = b.term(None, "report");
    b.boost("metadata_text", 1000.0).unwrap();
    let plan = b.build(node.as_ref(), None).unwrap();
    let boosted_page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(boosted_page.hits[0].title, "Misc Notes");
}

#[test]
fn tfidf_alternative_executes() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "report");
    b.use_tfidf_ranking(0.5);
    let plan = b.build(node.as_ref(), None).unwrap();
    assert!(plan.score_plan.higher_is_better);
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.hits.len(), 2);
}

#[test]
fn custom_similarity_sql_populates_column() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(Some("title"), "annual");
    b.use_custom_similarity_sql("abs(bm25_score)").unwrap();
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.hits.len(), 1);
    let similarity = page.hits[0].custom_similarity.unwrap();
    assert!(similarity > 0.0);
}

#[test]
fn custom_similarity_fn_overrides_score() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "report");
    b.use_custom_similarity(Arc::new(|bm25, _custom, modified| {
        // Newer documents win regardless of lexical score.
        let _ = bm25;
        modified.map_or(0.0, |ts| ts.timestamp() as f64)
    }));
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.hits[0].title, "Annual Report 2024");
    assert!(page.hits[0].score > 1.0e9);
}

#[test]
fn custom_rank_expression_orders_results() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "report");
    b.use_rank_expression("bm25_score", false).unwrap();
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.hits.len(), 2);
}

#[test]
fn paging_applies_skip_and_take() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "report");
    let plan = b.build(node.as_ref(), None).unwrap();
    let first = exec
        .search(&plan, 0, 1, &CancellationToken::new())
        .unwrap();
    assert_eq!(first.hits.len(), 1);

    let node = b.term(None, "report");
    let plan = b.build(node.as_ref(), None).unwrap();
    let second = exec
        .search(&plan, 1, 1, &CancellationToken::new())
        .unwrap();
    assert_eq!(second.hits.len(), 1);
    assert_ne!(first.hits[0].file_id, second.hits[0].file_id);

    let node = b.term(None, "report");
    let plan = b.build(node.as_ref(), None).unwrap();
    let empty = exec
        .search(&plan, 10, 5, &CancellationToken::new())
        .unwrap();
    assert!(empty.hits.is_empty());
}

#[test]
fn snippets_highlight_matched_terms() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "earnings");
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.hits.len(), 1);
    let snippet = &page.hits[0].snippet;
    assert!(snippet.text.to_lowercase().contains("earnings"));
    assert!(!snippet.highlights.is_empty());
    let h = &snippet.highlights[0];
    let highlighted: String = snippet
        .text
        .chars()
        .skip(h.start as usize)
        .take((h.end - h.start) as usize)
        .collect();
    assert_eq!(highlighted.to_lowercase(), "earnings");
}

#[test]
fn cancelled_search_returns_cancelled() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    let node = b.term(None, "report");
    let plan = b.build(node.as_ref(), None).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let result = exec.search(&plan, 0, 10, &token);
    assert!(matches!(result, Err(SearchError::Cancelled)));
}

#[test]
fn query_fails_when_schema_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("empty.db")).unwrap();
    let schema = Arc::new(SchemaManager::new(db.clone()));
    // No bootstrap: state stays Unknown.
    let exec = SearchExecutor::new(db, schema);

    let mut b = QueryBuilder::new();
    let node = b.term(None, "report");
    let plan = b.build(node.as_ref(), None).unwrap();
    let result = exec.search(&plan, 0, 10, &CancellationToken::new());
    assert!(matches!(result, Err(SearchError::Schema(_))));
}

#[test]
fn documents_removed_from_index_stop_matching() {
    let fx = fixture();
    let exec = executor(&fx);
    let mut b = QueryBuilder::new();

    fx.schema.remove_document(&vec![1u8; 16]).unwrap();

    let node = b.term(Some("title"), "annual");
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert!(page.hits.is_empty());
}

#[test]
fn reopened_store_still_serves_queries() {
    let fx = fixture();
    let path = fx.db_path.clone();

    let db = Database::open(&path).unwrap();
    let schema = Arc::new(SchemaManager::new(db.clone()));
    schema.bootstrap().unwrap();
    let exec = SearchExecutor::new(db, schema);

    let mut b = QueryBuilder::new();
    let node = b.term(Some("title"), "annual");
    let plan = b.build(node.as_ref(), None).unwrap();
    let page = exec
        .search(&plan, 0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.hits.len(), 1);
}
