//! Full-text commit pipeline.
//!
//! Builds the [`DataHolder`] from document texts:
//!
//! 1. tokenize every field with up to `min(8, cores)` workers, each
//!    filling its own shard (map + per-doc stats), merged
//!    deterministically afterwards;
//! 2. register the vocabulary in the suffix map (virtual number words
//!    flagged) and append posting lists;
//! 3. sort the suffix array and normalize posting lists — these two run
//!    on separate threads, overlapped;
//! 4. generate the typo maps;
//! 5. the caller publishes the holder under the namespace write lock.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::debug;
use vellum_idset::IdRelSet;
use vellum_types::RowId;

use crate::config::FtConfig;
use crate::holder::{DataHolder, PackedWordEntry, VDoc};
use crate::suffix::{SuffixMap, WordId};
use crate::tokenizer::{is_number, number_to_words, tokenize};
use crate::typos::mktypos;

/// Texts of one document: one string per indexed field.
pub type DocTexts = Vec<String>;

#[derive(Debug, Default, Clone)]
struct WordEntry {
    vids: IdRelSet,
    virtual_word: bool,
}

struct WorkerShard {
    words: BTreeMap<String, WordEntry>,
    stats: Vec<(RowId, VDoc)>,
}

/// Build a fresh holder from every live document's texts.
#[must_use]
pub fn process(
    cfg: &FtConfig,
    fields_count: usize,
    docs: &[Option<DocTexts>],
    multithread: bool,
) -> DataHolder {
    let started = Instant::now();
    let mut holder = DataHolder::new(cfg.clone(), fields_count);
    holder.vdocs = vec![VDoc::default(); docs.len()];

    let words_map = build_words_map(cfg, fields_count, docs, &mut holder, multithread);

    // Vocabulary registration: deterministic word ids from the sorted map.
    let mut suffixes = SuffixMap::new();
    let mut entries: Vec<PackedWordEntry> = Vec::with_capacity(words_map.len());
    let mut word_list: Vec<(String, WordId)> = Vec::with_capacity(words_map.len());
    for (word, entry) in words_map {
        let id = suffixes.insert(&word, entry.virtual_word);
        word_list.push((word, id));
        entries.push(PackedWordEntry { vids: entry.vids });
    }

    // Suffix-array sort and posting normalization overlap.
    let (suffixes, entries) = std::thread::scope(|scope| {
        let suffix_handle = scope.spawn(move || {
            let mut suffixes = suffixes;
            suffixes.build();
            suffixes
        });
        let postings_handle = scope.spawn(move || {
            let mut entries = entries;
            for e in &mut entries {
                e.vids.commit();
            }
            entries
        });
        (
            suffix_handle.join().expect("suffix build thread"),
            postings_handle.join().expect("postings thread"),
        )
    });
    holder.suffixes = suffixes;
    holder.words = entries;

    build_typos_maps(cfg, &word_list, &mut holder);

    // Average words per field, for BM25 length normalization.
    holder.avg_words_count = vec![0.0; fields_count];
    let live = holder.live_docs();
    if live > 0 {
        for vdoc in holder.vdocs.iter().filter(|d| d.exists) {
            for f in 0..fields_count {
                holder.avg_words_count[f] += vdoc.words_count[f];
            }
        }
        for avg in &mut holder.avg_words_count {
            *avg /= live as f64;
        }
    }

    debug!(
        words = holder.words.len(),
        typos = holder.typos_half.len() + holder.typos_max.len(),
        docs = live,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "full-text index built"
    );
    holder
}

fn build_words_map(
    cfg: &FtConfig,
    fields_count: usize,
    docs: &[Option<DocTexts>],
    holder: &mut DataHolder,
    multithread: bool,
) -> BTreeMap<String, WordEntry> {
    let workers = if multithread {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
            .min(8)
    } else {
        1
    };

    let shards: Vec<WorkerShard> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|w| scope.spawn(move || build_shard(cfg, fields_count, docs, w, workers)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("tokenizer worker"))
            .collect()
    });

    // Deterministic merge: shards in worker order, words in sorted order.
    let mut merged: BTreeMap<String, WordEntry> = BTreeMap::new();
    for shard in shards {
        for (row, vdoc) in shard.stats {
            holder.vdocs[row as usize] = vdoc;
        }
        for (word, entry) in shard.words {
            match merged.get_mut(&word) {
                Some(have) => {
                    have.virtual_word |= entry.virtual_word;
                    have.vids.extend_from(entry.vids);
                }
                None => {
                    merged.insert(word, entry);
                }
            }
        }
    }
    merged
}

fn build_shard(
    cfg: &FtConfig,
    fields_count: usize,
    docs: &[Option<DocTexts>],
    worker: usize,
    workers: usize,
) -> WorkerShard {
    let mut shard = WorkerShard {
        words: BTreeMap::new(),
        stats: Vec::new(),
    };
    for (row, texts) in docs.iter().enumerate().skip(worker).step_by(workers) {
        let Some(texts) = texts else { continue };
        let row = row as RowId;
        let mut vdoc = VDoc {
            exists: true,
            words_count: vec![0.0; fields_count],
            most_freq_word_count: vec![0.0; fields_count],
        };
        for (field, text) in texts.iter().enumerate().take(fields_count) {
            let tokens = tokenize(text, &cfg.extra_word_symbols);
            vdoc.words_count[field] = tokens.len() as f64;
            for token in &tokens {
                if cfg.stop_words.contains(&token.text) {
                    continue;
                }
                add_word(
                    &mut shard.words,
                    &token.text,
                    false,
                    row,
                    token.pos,
                    field as u8,
                    &mut vdoc,
                );
                if cfg.enable_numbers_search && is_number(&token.text) {
                    for (i, spoken) in number_to_words(&token.text).into_iter().enumerate() {
                        add_word(
                            &mut shard.words,
                            &spoken,
                            true,
                            row,
                            token.pos + i as u32,
                            field as u8,
                            &mut vdoc,
                        );
                        vdoc.words_count[field] += 1.0;
                    }
                }
            }
        }
        shard.stats.push((row, vdoc));
    }
    shard
}

fn add_word(
    words: &mut BTreeMap<String, WordEntry>,
    word: &str,
    virtual_word: bool,
    row: RowId,
    pos: u32,
    field: u8,
    vdoc: &mut VDoc,
) {
    let entry = words.entry(word.to_owned()).or_default();
    entry.virtual_word |= virtual_word;
    let count = entry.vids.add(row, pos, field) as f64;
    if count > vdoc.most_freq_word_count[field as usize] {
        vdoc.most_freq_word_count[field as usize] = count;
    }
}

fn build_typos_maps(cfg: &FtConfig, words: &[(String, WordId)], holder: &mut DataHolder) {
    if cfg.max_typos == 0 {
        return;
    }
    let max_in_word = cfg.max_typos_in_word();
    let half_max = cfg.max_typos / 2;
    let split_levels = max_in_word != half_max;
    for (word, id) in words {
        let word_chars = word.chars().count();
        mktypos(word, max_in_word, cfg.max_typo_len, &mut |typo, level| {
            let full_word = typo.chars().count() == word_chars;
            if !split_levels || level > 1 || full_word {
                holder.typos_half.entry(typo.to_owned()).or_default().push(*id);
            } else {
                holder.typos_max.entry(typo.to_owned()).or_default().push(*id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(texts: &[&str]) -> Vec<Option<DocTexts>> {
        texts.iter().map(|t| Some(vec![(*t).to_owned()])).collect()
    }

    #[test]
    fn test_build_registers_vocabulary() {
        let cfg = FtConfig::default();
        let holder = process(&cfg, 1, &docs(&["hello world", "help me"]), false);
        assert_eq!(holder.live_docs(), 2);
        // hello, world, help, me
        assert_eq!(holder.words.len(), 4);
        assert_eq!(holder.suffixes.word_count(), 4);
        assert!(!holder.typos_half.is_empty());
    }

    #[test]
    fn test_multithread_build_is_deterministic() {
        let cfg = FtConfig::default();
        let texts: Vec<String> = (0..40)
            .map(|i| format!("common word{} shared tail{}", i, i % 7))
            .collect();
        let docs: Vec<Option<DocTexts>> =
            texts.iter().map(|t| Some(vec![t.clone()])).collect();
        let a = process(&cfg, 1, &docs, false);
        let b = process(&cfg, 1, &docs, true);
        assert_eq!(a.words.len(), b.words.len());
        for id in 0..a.suffixes.word_count() {
            assert_eq!(
                a.suffixes.word_at(id as u32),
                b.suffixes.word_at(id as u32)
            );
            assert_eq!(
                a.words[id].vids.len(),
                b.words[id].vids.len(),
                "postings differ for word {}",
                a.suffixes.word_at(id as u32)
            );
        }
    }

    #[test]
    fn test_stop_words_filtered() {
        let mut cfg = FtConfig::default();
        cfg.stop_words.insert("the".to_owned());
        let holder = process(&cfg, 1, &docs(&["the cat"]), false);
        assert_eq!(holder.words.len(), 1);
        assert_eq!(holder.suffixes.word_at(0), "cat");
    }

    #[test]
    fn test_avg_words_count() {
        let cfg = FtConfig::default();
        let holder = process(&cfg, 1, &docs(&["one two", "one two three four"]), false);
        assert!((holder.avg_words_count[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_deleted_docs_skipped() {
        let cfg = FtConfig::default();
        let mut d = docs(&["hello", "world"]);
        d[1] = None;
        let holder = process(&cfg, 1, &d, false);
        assert_eq!(holder.live_docs(), 1);
        assert_eq!(holder.words.len(), 1);
    }
}
