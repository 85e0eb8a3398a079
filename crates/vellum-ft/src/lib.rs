//! Fast full-text index: tokenization, suffix-array word map, typo and
//! layout variants, BM25 + positional + field-weighted ranking, and DSL
//! merge with and/or/not and synonym semantics.

pub mod bm25;
pub mod config;
pub mod dsl;
pub mod ftindex;
pub mod holder;
pub mod processor;
pub mod selecter;
pub mod suffix;
pub mod tokenizer;
pub mod typos;
pub mod variants;

pub use config::{FtConfig, FtFieldConfig, FtSynonym};
pub use dsl::{DslTerm, FtDsl, TermOpts};
pub use ftindex::FtFastIndex;
pub use holder::DataHolder;
pub use selecter::{MergeData, MergeInfo};
pub use suffix::{SuffixMap, WordId};

use vellum_error::Result;
use vellum_index::{Index, IndexDef};

/// Build a full-text index from its definition and optional JSON config.
pub fn create_fulltext_index(def: IndexDef, config_json: Option<&str>) -> Result<Box<dyn Index>> {
    let cfg = match config_json {
        Some(json) => FtConfig::parse(json)?,
        None => FtConfig::default(),
    };
    Ok(Box::new(FtFastIndex::new(def, cfg)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_index::{Index as _, IndexOpts, IndexType, SelectOpts};
    use vellum_types::{CondType, Cx, FieldKind, RowId, Value};

    fn ft_index(docs: &[&str]) -> FtFastIndex {
        let def = IndexDef::new(
            "searchfast",
            FieldKind::String,
            IndexType::FulltextFast,
            IndexOpts::default(),
        );
        let mut idx = FtFastIndex::new(def, FtConfig::default()).unwrap();
        for (id, doc) in docs.iter().enumerate() {
            idx.upsert(&[Value::from(*doc)], id as RowId).unwrap();
        }
        idx.commit_fulltext();
        idx
    }

    fn search(idx: &FtFastIndex, query: &str) -> (Vec<RowId>, Vec<i32>) {
        let res = idx
            .select_key(
                &[Value::from(query)],
                CondType::Eq,
                0,
                &SelectOpts::default(),
                &Cx::background(),
            )
            .unwrap();
        (res[0].ids[0].iter().collect(), res[0].ranks.clone())
    }

    #[test]
    fn test_exact_word_search() {
        let idx = ft_index(&["hello world", "help me", "yellow"]);
        let (ids, _) = search(&idx, "hello");
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_suffix_and_prefix_search_matches_substring() {
        // Every doc contains "ell" as a substring of some word.
        let idx = ft_index(&["hello world", "help me", "yellow"]);
        let (ids, ranks) = search(&idx, "*ell*");
        assert_eq!(ids.len(), 3, "all three docs contain 'ell'");
        // Ranks are descending.
        for pair in ranks.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        // "hello" wins: term position 0 gets the strongest positional boost.
        assert_eq!(ids[0], 0);
    }

    #[test]
    fn test_prefix_only_excludes_mid_word_matches() {
        let idx = ft_index(&["hello", "shell"]);
        let (ids, _) = search(&idx, "hel*");
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_short_prefix_without_wildcard_is_exact() {
        let idx = ft_index(&["hello", "hel"]);
        let (ids, _) = search(&idx, "hel");
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_typo_match() {
        let idx = ft_index(&["project planning", "protect nothing"]);
        // One dropped char still finds "project"; exact search does not.
        let (ids, ranks) = search(&idx, "projct");
        assert!(ids.contains(&0));
        assert!(ranks[0] <= 85);
        let (ids, _) = search(&idx, "=projct");
        assert!(ids.is_empty());
    }

    #[test]
    fn test_not_term_excludes() {
        let idx = ft_index(&["red apple", "red pear"]);
        let (ids, _) = search(&idx, "red -pear");
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_and_term_requires_both() {
        let idx = ft_index(&["red apple", "red pear", "green apple"]);
        let (ids, _) = search(&idx, "+red +apple");
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_or_terms_union() {
        let idx = ft_index(&["red apple", "green pear", "blue sky"]);
        let (mut ids, _) = search(&idx, "apple pear");
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_stemmed_variant_matches() {
        let idx = ft_index(&["running fast", "walked slowly"]);
        let (ids, ranks) = search(&idx, "runs");
        assert_eq!(ids, vec![0]);
        // Stemmed matches rank below a full match of the same word.
        let (_, full) = search(&idx, "running");
        assert!(ranks[0] <= full[0]);
    }

    #[test]
    fn test_delete_removes_from_results() {
        let mut idx = ft_index(&["hello", "hello again"]);
        idx.delete(&[], 0, &mut Vec::new()).unwrap();
        idx.commit_fulltext();
        let (ids, _) = search(&idx, "hello");
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_dirty_index_rejects_select() {
        let mut idx = ft_index(&["hello"]);
        idx.upsert(&[Value::from("more text")], 5).unwrap();
        let err = idx
            .select_key(
                &[Value::from("hello")],
                CondType::Eq,
                0,
                &SelectOpts::default(),
                &Cx::background(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), vellum_error::ErrorKind::StateInvalidated);
    }

    #[test]
    fn test_synonym_expansion() {
        let def = IndexDef::new(
            "search",
            FieldKind::String,
            IndexType::FulltextFast,
            IndexOpts::default(),
        );
        let mut cfg = FtConfig::default();
        cfg.synonyms.push(FtSynonym {
            tokens: vec!["car".to_owned()],
            alternatives: vec!["automobile".to_owned()],
        });
        let mut idx = FtFastIndex::new(def, cfg).unwrap();
        idx.upsert(&[Value::from("an automobile story")], 0).unwrap();
        idx.upsert(&[Value::from("a bicycle story")], 1).unwrap();
        idx.commit_fulltext();
        let (ids, _) = search(&idx, "car");
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_rank_monotone_in_variant_proc() {
        // An exact hit ("hello") must outrank a typo hit ("hellp") on
        // otherwise identical docs.
        let idx = ft_index(&["hello", "hellp"]);
        let (ids, ranks) = search(&idx, "hello");
        assert_eq!(ids[0], 0);
        if ids.len() == 2 {
            assert!(ranks[0] > ranks[1]);
        }
    }

    #[test]
    fn test_multiword_synonym_sub_dsl() {
        let def = IndexDef::new(
            "search",
            FieldKind::String,
            IndexType::FulltextFast,
            IndexOpts::default(),
        );
        let mut cfg = FtConfig::default();
        cfg.synonyms.push(FtSynonym {
            tokens: vec!["ny".to_owned()],
            alternatives: vec!["new york".to_owned()],
        });
        let mut idx = FtFastIndex::new(def, cfg).unwrap();
        idx.upsert(&[Value::from("flights to new york today")], 0)
            .unwrap();
        idx.upsert(&[Value::from("flights to boston today")], 1)
            .unwrap();
        idx.commit_fulltext();
        let (ids, _) = search(&idx, "ny");
        assert_eq!(ids, vec![0]);
    }
}
