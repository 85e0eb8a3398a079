//! End-to-end scenarios exercising the engine through the public API.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use vellum::{Cx, Db, FieldKind, IndexDef, IndexOpts, IndexType, NamespaceConfig, QueryType};

fn db_with_ns(ns: &str, indexes: &[IndexDef]) -> Db {
    let db = Db::new();
    db.open_namespace(ns).unwrap();
    for def in indexes {
        db.add_index(ns, def.clone()).unwrap();
    }
    db
}

fn int_pk() -> IndexDef {
    IndexDef::new("id", FieldKind::Int, IndexType::Hash, IndexOpts::default().pk())
}

#[test]
fn test_pk_upsert_keeps_single_row() {
    // Upsert twice under the same PK: the second write wins, one row
    // remains.
    let db = db_with_ns(
        "ns",
        &[
            int_pk(),
            IndexDef::new("title", FieldKind::String, IndexType::Hash, IndexOpts::default()),
        ],
    );
    db.upsert("ns", r#"{"id": 1, "title": "a"}"#).unwrap();
    db.upsert("ns", r#"{"id": 1, "title": "b"}"#).unwrap();

    let results = db.execute_sql("SELECT * FROM ns").unwrap();
    assert_eq!(results.len(), 1);
    let row = results.row_json(0).unwrap();
    assert_eq!(row["id"], serde_json::json!(1));
    assert_eq!(row["title"], serde_json::json!("b"));
}

#[test]
fn test_insert_respects_existing_pk() {
    let db = db_with_ns("ns", &[int_pk()]);
    assert!(db.insert("ns", r#"{"id": 1, "v": "first"}"#).unwrap());
    // Insert on an existing PK is a no-op; the first values survive.
    assert!(!db.insert("ns", r#"{"id": 1, "v": "second"}"#).unwrap());
    let results = db.execute_sql("SELECT * FROM ns WHERE id = 1").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.row_json(0).unwrap()["v"], serde_json::json!("first"));
}

#[test]
fn test_composite_equality() {
    let db = db_with_ns(
        "ns",
        &[
            int_pk(),
            IndexDef::new("a", FieldKind::Int, IndexType::Hash, IndexOpts::default()),
            IndexDef::new("b", FieldKind::Int, IndexType::Hash, IndexOpts::default()),
            IndexDef::new("a+b", FieldKind::Composite, IndexType::Hash, IndexOpts::default()),
        ],
    );
    db.upsert("ns", r#"{"id": 1, "a": 1, "b": 2}"#).unwrap();
    db.upsert("ns", r#"{"id": 2, "a": 1, "b": 3}"#).unwrap();
    db.upsert("ns", r#"{"id": 3, "a": 2, "b": 2}"#).unwrap();

    let results = db
        .execute_sql(r#"SELECT * FROM ns WHERE "a+b" = (1, 2)"#)
        .unwrap();
    assert_eq!(results.len(), 1);
    let row = results.row_json(0).unwrap();
    assert_eq!(row["a"], serde_json::json!(1));
    assert_eq!(row["b"], serde_json::json!(2));
}

#[test]
fn test_ordered_range_with_forced_sort() {
    let db = db_with_ns(
        "ns",
        &[
            int_pk(),
            IndexDef::new("score", FieldKind::Int, IndexType::Tree, IndexOpts::default()),
        ],
    );
    for (id, score) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
        db.upsert("ns", &format!(r#"{{"id": {id}, "score": {score}}}"#))
            .unwrap();
    }
    let results = db
        .execute_sql(
            "SELECT * FROM ns WHERE score >= 20 AND score <= 40 ORDER BY score(30, 10, 20) DESC",
        )
        .unwrap();
    let scores: Vec<i64> = (0..results.len())
        .map(|i| results.row_json(i).unwrap()["score"].as_i64().unwrap())
        .collect();
    // The forced prefix pins 30 first; 10 has no match, so the rest
    // falls back to plain DESC.
    assert_eq!(scores, vec![30, 40, 20]);
}

#[test]
fn test_fulltext_suffix_prefix_search() {
    let db = db_with_ns("ns", &[int_pk()]);
    db.add_fulltext_index(
        "ns",
        IndexDef::new(
            "searchfast",
            FieldKind::String,
            IndexType::FulltextFast,
            IndexOpts::default(),
        ),
        None,
    )
    .unwrap();
    db.upsert("ns", r#"{"id": 1, "searchfast": "hello world"}"#)
        .unwrap();
    db.upsert("ns", r#"{"id": 2, "searchfast": "help me"}"#).unwrap();
    db.upsert("ns", r#"{"id": 3, "searchfast": "yellow"}"#).unwrap();

    let results = db
        .execute_sql("SELECT * FROM ns WHERE searchfast = '*ell*'")
        .unwrap();
    assert_eq!(results.len(), 3, "all three docs match the substring");
    // Rank order is descending; "hello" leads on the position boost.
    assert_eq!(
        results.row_json(0).unwrap()["id"],
        serde_json::json!(1)
    );
    let ranks: Vec<i32> = results.rows.iter().map(|r| r.rank).collect();
    for pair in ranks.windows(2) {
        assert!(pair[0] >= pair[1], "ranks must be descending: {ranks:?}");
    }
}

#[test]
fn test_inner_join_with_preselect() {
    let db = Db::new();
    db.open_namespace("books").unwrap();
    db.add_index("books", int_pk()).unwrap();
    db.add_index(
        "books",
        IndexDef::new("author_id", FieldKind::Int, IndexType::Hash, IndexOpts::default()),
    )
    .unwrap();
    db.open_namespace("authors").unwrap();
    db.add_index("authors", int_pk()).unwrap();
    db.add_index(
        "authors",
        IndexDef::new("name", FieldKind::String, IndexType::Tree, IndexOpts::default()),
    )
    .unwrap();

    for id in 0..50 {
        let name = if id % 10 == 0 { format!("Angela{id}") } else { format!("Bob{id}") };
        db.upsert("authors", &format!(r#"{{"id": {id}, "name": "{name}"}}"#))
            .unwrap();
    }
    for id in 0..400 {
        db.upsert(
            "books",
            &format!(r#"{{"id": {id}, "author_id": {}}}"#, id % 50),
        )
        .unwrap();
    }

    let mut query = vellum::parse_sql(
        "SELECT * FROM books INNER JOIN authors ON books.author_id = authors.id \
         WHERE authors.name LIKE 'A%'",
    )
    .unwrap();
    query.explain = true;
    let results = db.execute_query(&query).unwrap();
    // Authors matching LIKE 'A%': ids 0, 10, 20, 30, 40 -> 8 books each.
    assert_eq!(results.len(), 40);
    let explain = results.explain.clone().unwrap_or_default();
    assert!(
        explain.contains("pre-selected"),
        "inner join should pre-select: {explain}"
    );
    // Every result row carries its joined author.
    let row = results.row_json(0).unwrap();
    let joined = row["joined_authors"].as_array().unwrap();
    assert_eq!(joined.len(), 1);
    assert!(joined[0]["name"].as_str().unwrap().starts_with('A'));
}

#[test]
fn test_left_join_attaches_without_filtering() {
    let db = Db::new();
    for ns in ["l", "r"] {
        db.open_namespace(ns).unwrap();
        db.add_index(ns, int_pk()).unwrap();
    }
    db.add_index(
        "l",
        IndexDef::new("rid", FieldKind::Int, IndexType::Hash, IndexOpts::default()),
    )
    .unwrap();
    db.upsert("l", r#"{"id": 1, "rid": 10}"#).unwrap();
    db.upsert("l", r#"{"id": 2, "rid": 99}"#).unwrap();
    db.upsert("r", r#"{"id": 10, "tag": "x"}"#).unwrap();

    let results = db
        .execute_sql("SELECT * FROM l LEFT JOIN r ON l.rid = r.id")
        .unwrap();
    // Left joins keep unmatched rows.
    assert_eq!(results.len(), 2);
    let with_match = results.row_json(0).unwrap();
    assert!(with_match["joined_r"].is_array());
    let without = results.row_json(1).unwrap();
    assert!(without.get("joined_r").is_none());
}

#[test]
fn test_transactional_truncate_then_insert() {
    let db = db_with_ns("ns", &[int_pk()]);
    for id in 0..10 {
        db.upsert("ns", &format!(r#"{{"id": {id}, "gen": "old"}}"#))
            .unwrap();
    }
    let before_hash = db.data_hash("ns").unwrap();

    let mut tx = db.new_transaction("ns");
    let mut truncate = vellum::Query::new("ns");
    truncate.query_type = QueryType::Truncate;
    tx.query(truncate);
    for id in 0..20 {
        tx.upsert(format!(r#"{{"id": {id}, "gen": "new"}}"#));
    }
    db.commit_transaction(tx, &Cx::background()).unwrap();

    let results = db.execute_sql("SELECT * FROM ns").unwrap();
    assert_eq!(results.len(), 20);
    for json in results.to_json().unwrap() {
        assert_eq!(json["gen"], serde_json::json!("new"));
    }
    assert_ne!(db.data_hash("ns").unwrap(), before_hash);
}

#[test]
fn test_canceled_copy_commit_preserves_state() {
    // Force copy mode with tiny thresholds, then cancel mid-commit: the
    // clone is discarded, the prior state and hash survive untouched.
    let config = NamespaceConfig {
        tx_size_to_always_copy: 1,
        start_copy_policy_tx_size: 1,
        ..NamespaceConfig::default()
    };
    let db = Db::with_config(config);
    db.open_namespace("ns").unwrap();
    db.add_index("ns", int_pk()).unwrap();
    for id in 0..5 {
        db.upsert("ns", &format!(r#"{{"id": {id}}}"#)).unwrap();
    }
    let before_hash = db.data_hash("ns").unwrap();

    let flag = Arc::new(AtomicBool::new(true));
    let canceled = Cx::with_cancel(flag);
    let mut tx = db.new_transaction("ns");
    let mut truncate = vellum::Query::new("ns");
    truncate.query_type = QueryType::Truncate;
    tx.query(truncate);
    tx.upsert(r#"{"id": 100}"#);
    let err = db.commit_transaction(tx, &canceled).unwrap_err();
    assert!(err.is_cancel());

    assert_eq!(db.items_count("ns").unwrap(), 5);
    assert_eq!(db.data_hash("ns").unwrap(), before_hash);
}

#[test]
fn test_copy_commit_applies_atomically() {
    let config = NamespaceConfig {
        tx_size_to_always_copy: 1,
        start_copy_policy_tx_size: 1,
        ..NamespaceConfig::default()
    };
    let db = Db::with_config(config);
    db.open_namespace("ns").unwrap();
    db.add_index("ns", int_pk()).unwrap();
    db.upsert("ns", r#"{"id": 1, "v": 1}"#).unwrap();

    let mut tx = db.new_transaction("ns");
    for id in 0..50 {
        tx.upsert(format!(r#"{{"id": {id}, "v": 2}}"#));
    }
    db.commit_transaction(tx, &Cx::background()).unwrap();
    assert_eq!(db.items_count("ns").unwrap(), 50);
    let results = db.execute_sql("SELECT * FROM ns WHERE id = 1").unwrap();
    assert_eq!(results.row_json(0).unwrap()["v"], serde_json::json!(2));
}
