//! Property tests for the engine's core invariants.

use proptest::prelude::*;
use vellum::{Db, FieldKind, IndexDef, IndexOpts, IndexType};

#[derive(Debug, Clone)]
enum Op {
    Upsert { id: i64, v: i64 },
    Delete { id: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..12, 0i64..1000).prop_map(|(id, v)| Op::Upsert { id, v }),
        (0i64..12).prop_map(|id| Op::Delete { id }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any sequence of upserts and deletes, the namespace hash is
    /// exactly the XOR of the live rows' payload hashes.
    #[test]
    fn prop_data_hash_is_xor_of_live_rows(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let db = Db::new();
        db.open_namespace("ns").unwrap();
        db.add_index(
            "ns",
            IndexDef::new("id", FieldKind::Int, IndexType::Hash, IndexOpts::default().pk()),
        )
        .unwrap();
        for op in &ops {
            match op {
                Op::Upsert { id, v } => {
                    db.upsert("ns", &format!(r#"{{"id": {id}, "v": {v}}}"#)).unwrap();
                }
                Op::Delete { id } => {
                    db.delete("ns", &format!(r#"{{"id": {id}}}"#)).unwrap();
                }
            }
        }
        let rows = db.execute_sql("SELECT * FROM ns").unwrap();
        let expected = rows.rows.iter().fold(0u64, |acc, r| acc ^ r.payload.hash());
        prop_assert_eq!(db.data_hash("ns").unwrap(), expected);
        prop_assert_eq!(db.items_count("ns").unwrap(), rows.len());
    }

    /// A PK identifies exactly one live row no matter how often it is
    /// rewritten.
    #[test]
    fn prop_pk_uniqueness(writes in prop::collection::vec((0i64..5, 0i64..100), 1..30)) {
        let db = Db::new();
        db.open_namespace("ns").unwrap();
        db.add_index(
            "ns",
            IndexDef::new("id", FieldKind::Int, IndexType::Hash, IndexOpts::default().pk()),
        )
        .unwrap();
        for (id, v) in &writes {
            db.upsert("ns", &format!(r#"{{"id": {id}, "v": {v}}}"#)).unwrap();
        }
        for id in 0..5 {
            let rows = db.execute_sql(&format!("SELECT * FROM ns WHERE id = {id}")).unwrap();
            prop_assert!(rows.len() <= 1, "PK {} matched {} rows", id, rows.len());
        }
    }
}
