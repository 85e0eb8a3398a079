//! Built full-text structures shared by the commit pipeline and the
//! selecter.

use std::collections::HashMap;

use rust_stemmers::Algorithm;
use vellum_idset::IdRelSet;
use vellum_types::RowId;

use crate::config::FtConfig;
use crate::suffix::{SuffixMap, WordId};

/// Posting list of one vocabulary word.
#[derive(Debug, Clone, Default)]
pub struct PackedWordEntry {
    pub vids: IdRelSet,
}

/// Per-document statistics feeding BM25.
#[derive(Debug, Clone, Default)]
pub struct VDoc {
    pub exists: bool,
    /// Words per indexed field.
    pub words_count: Vec<f64>,
    /// Occurrences of the field's most frequent word.
    pub most_freq_word_count: Vec<f64>,
}

/// Everything the selecter reads: vocabulary, suffixes, typos, document
/// statistics. Rebuilt by the processor, swapped in atomically under the
/// namespace write lock.
#[derive(Debug, Clone, Default)]
pub struct DataHolder {
    pub cfg: FtConfig,
    pub words: Vec<PackedWordEntry>,
    pub suffixes: SuffixMap,
    pub typos_half: HashMap<String, Vec<WordId>>,
    pub typos_max: HashMap<String, Vec<WordId>>,
    /// Indexed by vdoc id; vdoc id mirrors the namespace row id.
    pub vdocs: Vec<VDoc>,
    pub avg_words_count: Vec<f64>,
    pub fields_count: usize,
}

impl DataHolder {
    #[must_use]
    pub fn new(cfg: FtConfig, fields_count: usize) -> Self {
        Self {
            cfg,
            fields_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn word(&self, id: WordId) -> &PackedWordEntry {
        &self.words[id as usize]
    }

    /// Count of live documents.
    #[must_use]
    pub fn live_docs(&self) -> usize {
        self.vdocs.iter().filter(|d| d.exists).count()
    }

    #[must_use]
    pub fn vdoc(&self, id: RowId) -> Option<&VDoc> {
        self.vdocs.get(id as usize).filter(|d| d.exists)
    }

    /// Stemmer algorithms for the configured languages; unknown languages
    /// are skipped (the config is user input).
    #[must_use]
    pub fn stemmer_algos(&self) -> Vec<Algorithm> {
        self.cfg
            .stemmers
            .iter()
            .filter_map(|lang| match lang.as_str() {
                "en" => Some(Algorithm::English),
                "ru" => Some(Algorithm::Russian),
                "de" => Some(Algorithm::German),
                "fr" => Some(Algorithm::French),
                "es" => Some(Algorithm::Spanish),
                "it" => Some(Algorithm::Italian),
                "nl" => Some(Algorithm::Dutch),
                "pt" => Some(Algorithm::Portuguese),
                _ => None,
            })
            .collect()
    }
}
