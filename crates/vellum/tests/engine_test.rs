//! Engine behavior: aggregations, boundaries, update queries, sparse
//! indexes, metadata, persistence and cache semantics.

use std::sync::Arc;

use vellum::{
    AggregationValue, CollateMode, Db, FieldKind, IndexDef, IndexOpts, IndexType, MemStorage,
    Value,
};

fn int_pk() -> IndexDef {
    IndexDef::new("id", FieldKind::Int, IndexType::Hash, IndexOpts::default().pk())
}

fn fixture() -> Db {
    let db = Db::new();
    db.open_namespace("items").unwrap();
    db.add_index("items", int_pk()).unwrap();
    db.add_index(
        "items",
        IndexDef::new("price", FieldKind::Int, IndexType::Tree, IndexOpts::default()),
    )
    .unwrap();
    db.add_index(
        "items",
        IndexDef::new(
            "brand",
            FieldKind::String,
            IndexType::Hash,
            IndexOpts::default().collate(CollateMode::AsciiCi),
        ),
    )
    .unwrap();
    for (id, price, brand) in [
        (1, 10, "acme"),
        (2, 20, "acme"),
        (3, 30, "bolt"),
        (4, 40, "bolt"),
        (5, 50, "bolt"),
    ] {
        db.upsert(
            "items",
            &format!(r#"{{"id": {id}, "price": {price}, "brand": "{brand}"}}"#),
        )
        .unwrap();
    }
    db
}

#[test]
fn test_aggregations() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT SUM(price), AVG(price), MIN(price), MAX(price) FROM items")
        .unwrap();
    let values: Vec<f64> = results
        .aggregations
        .iter()
        .map(|a| match &a.value {
            AggregationValue::Double(d) => *d,
            other => panic!("expected double, got {other:?}"),
        })
        .collect();
    assert_eq!(values, vec![150.0, 30.0, 10.0, 50.0]);
}

#[test]
fn test_facet_with_sort_and_limit() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT FACET(brand, ORDER BY count DESC, LIMIT 1) FROM items")
        .unwrap();
    let AggregationValue::Facets(facets) = &results.aggregations[0].value else {
        panic!("expected facets");
    };
    assert_eq!(facets.len(), 1);
    assert_eq!(facets[0].values, vec!["bolt".to_owned()]);
    assert_eq!(facets[0].count, 3);
}

#[test]
fn test_distinct() {
    let db = fixture();
    let results = db.execute_sql("SELECT DISTINCT(brand) FROM items").unwrap();
    let AggregationValue::Distinct(values) = &results.aggregations[0].value else {
        panic!("expected distinct");
    };
    assert_eq!(values.len(), 2);
}

#[test]
fn test_count_and_count_cached() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT COUNT(*) FROM items WHERE price > 20")
        .unwrap();
    assert_eq!(results.total_count, Some(3));

    let cached = db
        .execute_sql("SELECT COUNT_CACHED(*) FROM items WHERE price > 20")
        .unwrap();
    assert_eq!(cached.total_count, Some(3));
    // Mutation invalidates the cached total.
    db.upsert("items", r#"{"id": 6, "price": 60, "brand": "new"}"#)
        .unwrap();
    let after = db
        .execute_sql("SELECT COUNT_CACHED(*) FROM items WHERE price > 20")
        .unwrap();
    assert_eq!(after.total_count, Some(4));
}

#[test]
fn test_empty_in_list_boundaries() {
    let db = fixture();
    // Empty IN matches nothing.
    let results = db.execute_sql("SELECT * FROM items WHERE id IN ()").unwrap();
    assert!(results.is_empty());
    // Empty ALLSET matches everything (no required values).
    let results = db
        .execute_sql("SELECT * FROM items WHERE id ALLSET ()")
        .unwrap();
    assert_eq!(results.len(), 5);
}

#[test]
fn test_reversed_range_is_empty() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT * FROM items WHERE price RANGE(40, 20)")
        .unwrap();
    assert!(results.is_empty());
    let eq = db
        .execute_sql("SELECT * FROM items WHERE price RANGE(30, 30)")
        .unwrap();
    assert_eq!(eq.len(), 1);
}

#[test]
fn test_collated_string_lookup() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT * FROM items WHERE brand = 'ACME'")
        .unwrap();
    assert_eq!(results.len(), 2, "ascii-ci collation ignores case");
}

#[test]
fn test_update_query_with_expression() {
    let db = fixture();
    let touched = db
        .execute_sql("UPDATE items SET price = price + 5 WHERE brand = 'acme'")
        .unwrap();
    assert_eq!(touched.len(), 2);
    let results = db
        .execute_sql("SELECT * FROM items WHERE id IN (1, 2) ORDER BY id ASC")
        .unwrap();
    let prices: Vec<i64> = (0..results.len())
        .map(|i| results.row_json(i).unwrap()["price"].as_i64().unwrap())
        .collect();
    assert_eq!(prices, vec![15, 25]);
}

#[test]
fn test_update_drop_field() {
    let db = fixture();
    db.execute_sql("UPDATE items DROP brand WHERE id = 1").unwrap();
    let results = db.execute_sql("SELECT * FROM items WHERE id = 1").unwrap();
    assert!(results.row_json(0).unwrap().get("brand").is_none());
}

#[test]
fn test_delete_query_and_free_slot_reuse() {
    let db = fixture();
    db.execute_sql("DELETE FROM items WHERE price > 30").unwrap();
    assert_eq!(db.items_count("items").unwrap(), 3);
    // New rows land in freed slots; lookups stay correct.
    db.upsert("items", r#"{"id": 9, "price": 90, "brand": "re"}"#)
        .unwrap();
    let results = db.execute_sql("SELECT * FROM items WHERE id = 9").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(db.items_count("items").unwrap(), 4);
}

#[test]
fn test_sparse_index_is_null() {
    let db = Db::new();
    db.open_namespace("ns").unwrap();
    db.add_index("ns", int_pk()).unwrap();
    db.add_index(
        "ns",
        IndexDef::new(
            "opt",
            FieldKind::Int,
            IndexType::Hash,
            IndexOpts::default().sparse(),
        ),
    )
    .unwrap();
    db.upsert("ns", r#"{"id": 1, "opt": 5}"#).unwrap();
    db.upsert("ns", r#"{"id": 2}"#).unwrap();

    let results = db.execute_sql("SELECT * FROM ns WHERE opt IS NULL").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.row_json(0).unwrap()["id"], serde_json::json!(2));
    let results = db
        .execute_sql("SELECT * FROM ns WHERE opt IS NOT NULL")
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.row_json(0).unwrap()["id"], serde_json::json!(1));
}

#[test]
fn test_meta_and_schema() {
    let db = fixture();
    db.put_meta("items", "owner", "tests").unwrap();
    assert_eq!(
        db.get_meta("items", "owner").unwrap(),
        Some("tests".to_owned())
    );
    assert_eq!(db.enum_meta("items").unwrap(), vec!["owner".to_owned()]);

    db.set_schema("items", r#"{"type": "object"}"#).unwrap();
    assert_eq!(
        db.get_schema("items").unwrap(),
        Some(r#"{"type": "object"}"#.to_owned())
    );
    assert!(db.set_schema("items", "not json").is_err());
}

#[test]
fn test_storage_persistence_roundtrip() {
    let backend = Arc::new(MemStorage::new());
    {
        let db = Db::new();
        db.open_namespace_with_storage("ns", Arc::clone(&backend) as _)
            .unwrap();
        db.add_index("ns", int_pk()).unwrap();
        db.add_index(
            "ns",
            IndexDef::new("name", FieldKind::String, IndexType::Hash, IndexOpts::default()),
        )
        .unwrap();
        for id in 0..25 {
            db.upsert("ns", &format!(r#"{{"id": {id}, "name": "row{id}"}}"#))
                .unwrap();
        }
        db.execute_sql("DELETE FROM ns WHERE id = 7").unwrap();
        db.put_meta("ns", "marker", "kept").unwrap();
        db.close_namespace("ns").unwrap();
    }
    // Reopen from the same backend: items, indexes and meta come back.
    let db = Db::new();
    db.open_namespace_with_storage("ns", backend as _).unwrap();
    assert_eq!(db.items_count("ns").unwrap(), 24);
    let results = db
        .execute_sql("SELECT * FROM ns WHERE name = 'row11'")
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(db
        .execute_sql("SELECT * FROM ns WHERE id = 7")
        .unwrap()
        .is_empty());
    assert_eq!(db.get_meta("ns", "marker").unwrap(), Some("kept".to_owned()));
}

#[test]
fn test_dsl_execution_matches_sql() {
    let db = fixture();
    let query = vellum::parse_sql("SELECT * FROM items WHERE price >= 30 ORDER BY price DESC")
        .unwrap();
    let via_sql = db.execute_query(&query).unwrap();
    let via_dsl = db.execute_dsl(&vellum::to_dsl(&query)).unwrap();
    assert_eq!(via_sql.len(), via_dsl.len());
    for i in 0..via_sql.len() {
        assert_eq!(
            via_sql.row_json(i).unwrap(),
            via_dsl.row_json(i).unwrap()
        );
    }
}

#[test]
fn test_select_projection() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT id FROM items WHERE id = 1")
        .unwrap();
    let row = results.row_json(0).unwrap();
    assert_eq!(row, serde_json::json!({"id": 1}));
}

#[test]
fn test_precept_serial() {
    let db = Db::new();
    db.open_namespace("ns").unwrap();
    db.add_index("ns", int_pk()).unwrap();
    for _ in 0..3 {
        db.modify("ns", r#"{"id": 0}"#, vellum::ItemMode::Upsert, &["id=serial()"])
            .unwrap();
    }
    assert_eq!(db.items_count("ns").unwrap(), 3);
    let results = db.execute_sql("SELECT * FROM ns ORDER BY id ASC").unwrap();
    let ids: Vec<i64> = (0..results.len())
        .map(|i| results.row_json(i).unwrap()["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_data_hash_xor_invariant() {
    let db = fixture();
    // The namespace hash equals the XOR of live row hashes after any
    // sequence of upserts and deletes.
    db.upsert("items", r#"{"id": 2, "price": 21, "brand": "acme"}"#)
        .unwrap();
    db.execute_sql("DELETE FROM items WHERE id = 4").unwrap();
    let results = db.execute_sql("SELECT * FROM items").unwrap();
    let expected = results
        .rows
        .iter()
        .fold(0u64, |acc, row| acc ^ row.payload.hash());
    assert_eq!(db.data_hash("items").unwrap(), expected);
}

#[test]
fn test_truncate_resets_hash_and_indexes() {
    let db = fixture();
    db.truncate("items").unwrap();
    assert_eq!(db.data_hash("items").unwrap(), 0);
    assert_eq!(db.items_count("items").unwrap(), 0);
    assert!(db
        .execute_sql("SELECT * FROM items WHERE price > 0")
        .unwrap()
        .is_empty());
    // The namespace stays usable after truncate.
    db.upsert("items", r#"{"id": 1, "price": 5, "brand": "x"}"#)
        .unwrap();
    assert_eq!(db.items_count("items").unwrap(), 1);
}

#[test]
fn test_composite_invariant_lookup_contains_row() {
    let db = Db::new();
    db.open_namespace("ns").unwrap();
    db.add_index("ns", int_pk()).unwrap();
    db.add_index(
        "ns",
        IndexDef::new("a", FieldKind::Int, IndexType::Hash, IndexOpts::default()),
    )
    .unwrap();
    db.add_index(
        "ns",
        IndexDef::new("b", FieldKind::String, IndexType::Hash, IndexOpts::default()),
    )
    .unwrap();
    db.add_index(
        "ns",
        IndexDef::new("a+b", FieldKind::Composite, IndexType::Hash, IndexOpts::default()),
    )
    .unwrap();
    for id in 0..20 {
        db.upsert(
            "ns",
            &format!(r#"{{"id": {id}, "a": {}, "b": "s{}"}}"#, id % 5, id % 3),
        )
        .unwrap();
    }
    // Every row is reachable through its own composite key.
    let all = db.execute_sql("SELECT * FROM ns").unwrap();
    for json in all.to_json().unwrap() {
        let a = json["a"].as_i64().unwrap();
        let b = json["b"].as_str().unwrap();
        let found = db
            .execute_sql(&format!(
                r#"SELECT * FROM ns WHERE "a+b" = ({a}, '{b}')"#
            ))
            .unwrap();
        assert!(found
            .to_json()
            .unwrap()
            .iter()
            .any(|r| r["id"] == json["id"]));
    }
}

#[test]
fn test_unknown_namespace_errors() {
    let db = Db::new();
    let err = db.execute_sql("SELECT * FROM missing").unwrap_err();
    assert_eq!(err.kind(), vellum::ErrorKind::NotFound);
}

#[test]
fn test_or_conditions_scan() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT * FROM items WHERE price < 15 OR brand = 'bolt'")
        .unwrap();
    assert_eq!(results.len(), 4);
}

#[test]
fn test_not_condition() {
    let db = fixture();
    let results = db
        .execute_sql("SELECT * FROM items WHERE NOT brand = 'bolt'")
        .unwrap();
    assert_eq!(results.len(), 2);
    let results = db
        .execute_sql("SELECT * FROM items WHERE price != 10")
        .unwrap();
    assert_eq!(results.len(), 4);
}

#[test]
fn test_value_tuple_coercion_guard() {
    // Int fields reject out-of-range values at ingest.
    let db = Db::new();
    db.open_namespace("ns").unwrap();
    db.add_index("ns", int_pk()).unwrap();
    let err = db
        .upsert("ns", r#"{"id": 99999999999999}"#)
        .unwrap_err();
    assert_eq!(err.kind(), vellum::ErrorKind::Params);
    let _ = Value::Int(1);
}
