//! Full-text index configuration.
//!
//! Parsed from the JSON config attached to an FT index definition;
//! every knob has the engine default so an empty config works.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use vellum_error::{Result, VellumError};

/// Per-field ranking weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtFieldConfig {
    pub bm25_boost: f64,
    pub bm25_weight: f64,
    pub position_boost: f64,
    pub position_weight: f64,
    pub term_len_boost: f64,
    pub term_len_weight: f64,
}

impl Default for FtFieldConfig {
    fn default() -> Self {
        Self {
            bm25_boost: 1.0,
            bm25_weight: 0.1,
            position_boost: 1.0,
            position_weight: 0.1,
            term_len_boost: 1.0,
            term_len_weight: 0.3,
        }
    }
}

/// One synonym rule: any of `tokens` also matches any of `alternatives`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtSynonym {
    pub tokens: Vec<String>,
    pub alternatives: Vec<String>,
}

/// Full configuration of one fast FT index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtConfig {
    /// Merge result cap across all DSL terms.
    pub merge_limit: usize,
    /// Stemmer languages applied to every non-exact variant.
    pub stemmers: Vec<String>,
    pub enable_translit: bool,
    pub enable_kb_layout: bool,
    /// Expand numbers into spoken-word forms at index time.
    pub enable_numbers_search: bool,
    pub stop_words: HashSet<String>,
    pub synonyms: Vec<FtSynonym>,
    /// Extra characters treated as word content by the tokenizer.
    pub extra_word_symbols: String,
    /// Total tolerated typos across the query and the indexed word.
    pub max_typos: u32,
    /// Words longer than this get no typo entries.
    pub max_typo_len: usize,
    /// Final-rank multiplier when every word of the winning field matched.
    pub full_match_boost: f64,
    /// Relevancy step subtracted per length difference unit on partial
    /// suffix/prefix matches.
    pub partial_match_decrease: i32,
    /// Drop results below this share of the maximum relevancy.
    pub min_relevancy: f64,
    pub distance_boost: f64,
    pub distance_weight: f64,
    /// Geometric ratio folding secondary field ranks into the term rank;
    /// 0 keeps only the best field.
    pub summation_ranks_by_fields_ratio: f64,
    pub fields: Vec<FtFieldConfig>,
}

impl Default for FtConfig {
    fn default() -> Self {
        Self {
            merge_limit: 20_000,
            stemmers: vec!["en".to_owned(), "ru".to_owned()],
            enable_translit: true,
            enable_kb_layout: true,
            enable_numbers_search: false,
            stop_words: HashSet::new(),
            synonyms: Vec::new(),
            extra_word_symbols: "-/+".to_owned(),
            max_typos: 2,
            max_typo_len: 15,
            full_match_boost: 1.1,
            partial_match_decrease: 15,
            min_relevancy: 0.05,
            distance_boost: 1.0,
            distance_weight: 0.5,
            summation_ranks_by_fields_ratio: 0.0,
            fields: Vec::new(),
        }
    }
}

impl FtConfig {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| VellumError::Parse(format!("ft config: {e}")))
    }

    /// Typos tolerated inside one word (index side and query side each
    /// generate up to this many deletions).
    #[must_use]
    pub const fn max_typos_in_word(&self) -> u32 {
        self.max_typos / 2 + self.max_typos % 2
    }

    #[must_use]
    pub fn field(&self, f: usize) -> FtFieldConfig {
        self.fields.get(f).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = FtConfig::default();
        assert_eq!(cfg.merge_limit, 20_000);
        assert_eq!(cfg.max_typos_in_word(), 1);
        assert_eq!(cfg.extra_word_symbols, "-/+");
    }

    #[test]
    fn test_parse_partial_json() {
        let cfg = FtConfig::parse(r#"{"max_typos": 3, "stop_words": ["the"]}"#).unwrap();
        assert_eq!(cfg.max_typos, 3);
        assert_eq!(cfg.max_typos_in_word(), 2);
        assert!(cfg.stop_words.contains("the"));
        assert!(cfg.enable_translit);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(FtConfig::parse("not json").is_err());
    }
}
