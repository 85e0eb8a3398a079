//! Full-text selection: term variants, suffix/typo lookup, per-field
//! ranking and the merge across DSL terms.

use std::collections::HashMap;

use rust_stemmers::Stemmer;
use tracing::trace;
use vellum_error::Result;
use vellum_idset::IdRel;
use vellum_types::{Cx, OpType, RowId};

use crate::bm25::{bm25_score, bound, idf, pos2rank};
use crate::dsl::{DslTerm, FtDsl, TermOpts};
use crate::holder::DataHolder;
use crate::suffix::WordId;
use crate::tokenizer::tokenize;
use crate::typos::mktypos;
use crate::variants::{kb_layout, translit, KBLAYOUT_PROC, TRANSLIT_PROC};

/// Relevancy of a full word match.
const FULL_MATCH_PROC: i32 = 100;
/// Minimum relevancy of a prefix match.
const PREFIX_MIN_PROC: i32 = 50;
/// Minimum relevancy of a suffix match.
const SUFFIX_MIN_PROC: i32 = 10;
/// Maximum relevancy of a typo match.
const TYPO_PROC: i32 = 85;
/// Relevancy step per typo.
const TYPO_STEP_PROC: i32 = 15;
/// Relevancy decrease for stem-matched variants.
const STEM_PROC_DECREASE: i32 = 15;
/// Relevancy of a single-token synonym variant.
const SYNONYM_PROC: i32 = 95;

const EXCLUDED: u32 = u32::MAX;

/// One pattern variant of a term.
#[derive(Debug, Clone)]
struct FtVariant {
    pattern: String,
    opts: TermOpts,
    proc: i32,
}

#[derive(Debug, Clone, Copy)]
struct FoundWord {
    word_id: WordId,
    proc: i32,
}

#[derive(Debug, Default)]
struct TextSearchResults {
    term: DslTerm,
    found: Vec<FoundWord>,
    ids_cnt: usize,
    /// Indices of synonym groups attached to this term.
    synonyms_groups: Vec<usize>,
}

/// A sibling sub-DSL produced by a multi-word synonym alternative.
#[derive(Debug)]
struct SynonymsDsl {
    dsl: FtDsl,
    terms_idx: Vec<usize>,
}

/// One merged document.
#[derive(Debug, Clone)]
pub struct MergeInfo {
    pub id: RowId,
    pub proc: f64,
    pub matched: u32,
    pub field: u8,
}

/// Final result of full-text selection, sorted by rank descending.
#[derive(Debug, Default)]
pub struct MergeData {
    pub merged: Vec<MergeInfo>,
    pub max_rank: f64,
}

#[derive(Debug, Clone, Default)]
struct MergeStatus {
    /// 0: not added, EXCLUDED: barred, else 1 + adding raw-result index.
    status: u32,
    idoffset: u32,
}

#[derive(Debug)]
struct MergedIdRel {
    cur: IdRel,
    next: Option<IdRel>,
    rank: f64,
    qpos: u32,
}

/// Run the DSL against a built holder.
pub fn select(holder: &DataHolder, dsl: &FtDsl, cx: &Cx) -> Result<MergeData> {
    let stemmers: Vec<Stemmer> = holder
        .stemmer_algos()
        .into_iter()
        .map(Stemmer::create)
        .collect();

    let synonyms_dsl = preprocess_synonyms(holder, dsl);
    cx.checkpoint()?;

    let mut found_words: HashMap<WordId, (usize, usize)> = HashMap::new();
    let mut raw_results: Vec<TextSearchResults> = Vec::with_capacity(dsl.len());
    for term in dsl {
        let mut res = TextSearchResults {
            term: term.clone(),
            ..TextSearchResults::default()
        };
        let variants = prepare_variants(holder, term, &stemmers, true);
        process_variants(holder, &variants, &mut found_words, &mut res, raw_results.len());
        if term.opts.typos && holder.cfg.max_typos > 0 {
            process_typos(holder, term, &mut found_words, &mut res, raw_results.len());
        }
        raw_results.push(res);
    }

    // Synonym sub-DSLs become sibling results ahead of the originals;
    // group bounds drive the AND semantics during the merge.
    let mut results: Vec<TextSearchResults> = Vec::new();
    let mut synonyms_bounds: Vec<usize> = Vec::new();
    cx.checkpoint()?;
    for syn in &synonyms_dsl {
        let mut syn_found: HashMap<WordId, (usize, usize)> = HashMap::new();
        let group_idx = synonyms_bounds.len();
        for term in &syn.dsl {
            let mut res = TextSearchResults {
                term: term.clone(),
                ..TextSearchResults::default()
            };
            let variants = prepare_variants(holder, term, &stemmers, false);
            process_variants(holder, &variants, &mut syn_found, &mut res, results.len());
            results.push(res);
        }
        for &idx in &syn.terms_idx {
            raw_results[idx].synonyms_groups.push(group_idx);
        }
        synonyms_bounds.push(results.len());
    }
    results.extend(raw_results);

    merge_results(holder, results, &synonyms_bounds, cx)
}

fn prepare_variants(
    holder: &DataHolder,
    term: &DslTerm,
    stemmers: &[Stemmer],
    with_synonyms: bool,
) -> Vec<FtVariant> {
    let cfg = &holder.cfg;
    let mut patterns: Vec<(String, i32)> = vec![(term.pattern.clone(), FULL_MATCH_PROC)];

    let expandable = !(cfg.enable_numbers_search && term.opts.number) && !term.opts.exact;
    if expandable {
        if cfg.enable_translit {
            if let Some(v) = translit(&term.pattern) {
                patterns.push((v, TRANSLIT_PROC));
            }
        }
        if cfg.enable_kb_layout {
            if let Some(v) = kb_layout(&term.pattern) {
                patterns.push((v, KBLAYOUT_PROC));
            }
        }
        if with_synonyms && term.opts.op != OpType::Not {
            for rule in &cfg.synonyms {
                if rule.tokens.iter().any(|t| *t == term.pattern) {
                    for alt in &rule.alternatives {
                        if !alt.contains(char::is_whitespace) {
                            patterns.push((alt.to_lowercase(), SYNONYM_PROC));
                        }
                    }
                }
            }
        }
    }

    let mut variants = Vec::with_capacity(patterns.len() * (1 + stemmers.len()));
    for (i, (pattern, proc)) in patterns.iter().enumerate() {
        if pattern.is_empty() {
            continue;
        }
        variants.push(FtVariant {
            pattern: pattern.clone(),
            opts: term.opts.clone(),
            proc: *proc,
        });
        if term.opts.exact {
            continue;
        }
        for stemmer in stemmers {
            let stem = stemmer.stem(pattern).to_string();
            if stem != *pattern && !stem.is_empty() {
                let mut opts = term.opts.clone();
                opts.pref = true;
                if i != 0 {
                    opts.suff = false;
                }
                variants.push(FtVariant {
                    pattern: stem,
                    opts,
                    proc: proc - STEM_PROC_DECREASE,
                });
            }
        }
    }
    variants
}

fn push_found(
    found_words: &mut HashMap<WordId, (usize, usize)>,
    res: &mut TextSearchResults,
    res_index: usize,
    holder: &DataHolder,
    word_id: WordId,
    proc: i32,
) {
    match found_words.get(&word_id) {
        Some(&(prev_res, found_idx)) if prev_res == res_index => {
            if res.found[found_idx].proc < proc {
                res.found[found_idx].proc = proc;
            }
        }
        _ => {
            res.found.push(FoundWord { word_id, proc });
            res.ids_cnt += holder.word(word_id).vids.len();
            found_words.insert(word_id, (res_index, res.found.len() - 1));
        }
    }
}

fn process_variants(
    holder: &DataHolder,
    variants: &[FtVariant],
    found_words: &mut HashMap<WordId, (usize, usize)>,
    res: &mut TextSearchResults,
    res_index: usize,
) {
    for variant in variants {
        if variant.opts.op == OpType::And {
            found_words.clear();
        }
        let with_prefixes = variant.opts.pref;
        let with_suffixes = variant.opts.suff;
        let match_len = variant.pattern.chars().count();
        let mut matched = 0usize;
        holder.suffixes.lookup(&variant.pattern, &mut |hit| {
            if !with_suffixes && hit.suffix_len > 0 {
                return;
            }
            if !with_prefixes && hit.word_len != match_len + hit.suffix_len {
                return;
            }
            if holder.suffixes.is_virtual(hit.word_id) && !with_suffixes {
                return;
            }
            let match_dif =
                (hit.word_len as i32 - match_len as i32 + hit.suffix_len as i32).abs();
            let min_proc = if hit.suffix_len > 0 {
                SUFFIX_MIN_PROC
            } else {
                PREFIX_MIN_PROC
            };
            let proc = (variant.proc
                - holder.cfg.partial_match_decrease * match_dif / (match_len as i32).max(3))
            .max(min_proc);
            push_found(found_words, res, res_index, holder, hit.word_id, proc);
            matched += 1;
        });
        trace!(
            pattern = %variant.pattern,
            proc = variant.proc,
            matched,
            "ft variant lookup"
        );
    }
}

fn process_typos(
    holder: &DataHolder,
    term: &DslTerm,
    found_words: &mut HashMap<WordId, (usize, usize)>,
    res: &mut TextSearchResults,
    res_index: usize,
) {
    let cfg = &holder.cfg;
    let max_in_word = cfg.max_typos_in_word();
    let split_levels = max_in_word != cfg.max_typos / 2;
    let pattern_len = term.pattern.chars().count();
    // The typo maps are keyed by whole words, so they cannot serve
    // substring terms; those run their typo patterns through the suffix
    // walk instead.
    let substring = term.opts.pref && term.opts.suff;
    mktypos(&term.pattern, max_in_word, cfg.max_typo_len, &mut |typo, level| {
        let tcount = (max_in_word - level) as i32;
        let maps = [&holder.typos_half, &holder.typos_max];
        for (mi, map) in maps.iter().enumerate() {
            if let Some(word_ids) = map.get(typo) {
                for &word_id in word_ids {
                    let word_len = holder.suffixes.word_at(word_id).chars().count() as i32;
                    let proc = TYPO_PROC
                        - tcount * TYPO_STEP_PROC / ((word_len - tcount) / 3).max(1);
                    push_found(found_words, res, res_index, holder, word_id, proc);
                }
            }
            // With an odd typo budget the deeper word-side map is only
            // consulted for unmodified query patterns.
            if mi == 0 && split_levels && level == 1 && typo.chars().count() != pattern_len {
                break;
            }
        }
        if substring && tcount > 0 {
            let proc = (TYPO_PROC - tcount * TYPO_STEP_PROC).max(SUFFIX_MIN_PROC);
            holder.suffixes.lookup(typo, &mut |hit| {
                push_found(found_words, res, res_index, holder, hit.word_id, proc);
            });
        }
    });
}

fn preprocess_synonyms(holder: &DataHolder, dsl: &FtDsl) -> Vec<SynonymsDsl> {
    let mut out = Vec::new();
    for rule in &holder.cfg.synonyms {
        let tokens: Vec<&str> = rule.tokens.iter().map(String::as_str).collect();
        if tokens.is_empty() {
            continue;
        }
        // Match the token sequence against consecutive non-exact terms.
        for start in 0..dsl.len() {
            if start + tokens.len() > dsl.len() {
                break;
            }
            let window = &dsl[start..start + tokens.len()];
            let matches = window
                .iter()
                .zip(&tokens)
                .all(|(t, tok)| !t.opts.exact && t.opts.op != OpType::Not && t.pattern == **tok);
            if !matches {
                continue;
            }
            for alt in &rule.alternatives {
                let alt_terms: Vec<DslTerm> = tokenize(alt, "")
                    .into_iter()
                    .map(|tok| DslTerm {
                        pattern: tok.text,
                        opts: TermOpts {
                            op: OpType::And,
                            qpos: window[0].opts.qpos + tok.pos,
                            fields: window[0].opts.fields.clone(),
                            ..TermOpts::default()
                        },
                    })
                    .collect();
                // Single-word alternatives of single-token rules already
                // entered the variant list.
                if alt_terms.len() <= 1 && tokens.len() == 1 {
                    continue;
                }
                if alt_terms.is_empty() {
                    continue;
                }
                out.push(SynonymsDsl {
                    dsl: alt_terms,
                    terms_idx: (start..start + tokens.len()).collect(),
                });
            }
        }
    }
    out
}

struct MergeCtx<'a> {
    holder: &'a DataHolder,
    statuses: Vec<MergeStatus>,
    merged: Vec<MergeInfo>,
    merged_rd: Vec<MergedIdRel>,
}

fn merge_results(
    holder: &DataHolder,
    mut raw_results: Vec<TextSearchResults>,
    synonyms_bounds: &[usize],
    cx: &Cx,
) -> Result<MergeData> {
    let total_docs = holder.vdocs.len();
    let mut data = MergeData::default();
    if raw_results.is_empty() || total_docs == 0 {
        return Ok(data);
    }

    for res in &mut raw_results {
        res.found.sort_by(|a, b| b.proc.cmp(&a.proc));
    }

    let simple = raw_results.len() == 1;
    let mut ctx = MergeCtx {
        holder,
        statuses: vec![MergeStatus::default(); total_docs],
        merged: Vec::new(),
        merged_rd: Vec::new(),
    };

    let mut exists: Vec<Vec<bool>> = vec![Vec::new(); synonyms_bounds.len() + 1];
    let mut cur_exists = 0usize;
    let mut next_bound = 0usize;
    let mut has_been_and = false;
    let mut last_group_start = 0usize;

    for i in 0..raw_results.len() {
        if next_bound < synonyms_bounds.len() && synonyms_bounds[next_bound] == i {
            has_been_and = false;
            cur_exists += 1;
            next_bound += 1;
            last_group_start = if next_bound == synonyms_bounds.len() { 0 } else { i };
        }
        cx.checkpoint()?;
        merge_iteration(
            &mut ctx,
            &raw_results[i],
            i,
            &mut exists,
            cur_exists,
            has_been_and,
            simple,
        );

        let res = &raw_results[i];
        if res.term.opts.op == OpType::And && !exists[cur_exists].is_empty() {
            has_been_and = true;
            for info in &mut ctx.merged {
                let vid = info.id as usize;
                let status = &mut ctx.statuses[vid];
                if exists[cur_exists][vid]
                    || status.status == EXCLUDED
                    || (status.status as usize) <= last_group_start
                    || info.proc == 0.0
                {
                    continue;
                }
                let match_syn = res
                    .synonyms_groups
                    .iter()
                    .any(|&g| g < cur_exists && exists[g].get(vid).copied().unwrap_or(false));
                if match_syn {
                    continue;
                }
                info.proc = 0.0;
                status.status = 0;
            }
        }
    }

    // Full-document-match boost on the winning field.
    for info in &mut ctx.merged {
        if let Some(vdoc) = holder.vdoc(info.id) {
            let words_in_field = vdoc
                .words_count
                .get(usize::from(info.field))
                .copied()
                .unwrap_or(0.0);
            if words_in_field as usize == raw_results.len() {
                info.proc *= holder.cfg.full_match_boost;
            }
        }
        if info.proc > data.max_rank {
            data.max_rank = info.proc;
        }
    }

    let mut merged = ctx.merged;
    merged.retain(|m| m.proc > 0.0);
    merged.sort_by(|a, b| {
        b.proc
            .partial_cmp(&a.proc)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    data.merged = merged;
    Ok(data)
}

#[allow(clippy::too_many_lines)]
fn merge_iteration(
    ctx: &mut MergeCtx<'_>,
    raw_res: &TextSearchResults,
    raw_index: usize,
    exists: &mut [Vec<bool>],
    cur_exists: usize,
    has_been_and: bool,
    simple: bool,
) {
    let holder = ctx.holder;
    let total_docs = holder.vdocs.len();
    let op = raw_res.term.opts.op;

    let track_exists = !simple || raw_res.found.len() > 1;
    let cur = &mut exists[cur_exists];
    cur.clear();
    if track_exists {
        cur.resize(total_docs, false);
    }

    for m_rd in &mut ctx.merged_rd {
        if let Some(next) = m_rd.next.take() {
            m_rd.cur = next;
        }
    }

    for r in &raw_res.found {
        let word = holder.word(r.word_id);
        let word_idf = idf(total_docs, word.vids.len());

        for relid in &word.vids {
            let vid = relid.id;
            let vid_us = vid as usize;
            let status = ctx.statuses[vid_us].clone();

            if status.status == EXCLUDED || (has_been_and && status.status == 0) {
                continue;
            }
            if op == OpType::Not {
                if !simple && status.status != 0 {
                    ctx.merged[status.idoffset as usize].proc = 0.0;
                }
                ctx.statuses[vid_us].status = EXCLUDED;
                continue;
            }
            let Some(vdoc) = holder.vdoc(vid) else { continue };

            // Find the field with the best term rank.
            let mut best_field = 0u8;
            let mut term_rank = 0.0f64;
            let mut keep_cur_rank = false;
            let mut ranks_in_fields: Vec<f64> = Vec::new();
            let mut fields_mask = relid.used_fields_mask();
            while fields_mask != 0 {
                let f = fields_mask.trailing_zeros() as usize;
                fields_mask &= fields_mask - 1;
                if f >= vdoc.words_count.len() {
                    continue;
                }
                let fopts = raw_res.term.opts.fields.get(f).copied().unwrap_or_default();
                let fboost = if raw_res.term.opts.fields.is_empty() {
                    1.0
                } else {
                    fopts.boost
                };
                if fboost == 0.0 {
                    continue;
                }
                let fld = holder.cfg.field(f);
                let bm25 = word_idf
                    * bm25_score(
                        relid.words_in_field(f as u8) as f64,
                        vdoc.most_freq_word_count[f],
                        vdoc.words_count[f],
                        holder.avg_words_count.get(f).copied().unwrap_or(0.0),
                    );
                let norm_bm25 = bound(bm25, fld.bm25_weight, fld.bm25_boost);
                let position_rank = bound(
                    pos2rank(relid.min_position_in_field(f as u8)),
                    fld.position_weight,
                    fld.position_boost,
                );
                let term_len_boost = bound(
                    raw_res.term.opts.term_len_boost,
                    fld.term_len_weight,
                    fld.term_len_boost,
                );
                let rank_tmp = fboost
                    * f64::from(r.proc)
                    * norm_bm25
                    * raw_res.term.opts.boost
                    * term_len_boost
                    * position_rank;
                let need_sum_rank = fopts.need_sum_rank;
                if rank_tmp > term_rank {
                    if keep_cur_rank {
                        ranks_in_fields.push(term_rank);
                    }
                    best_field = f as u8;
                    term_rank = rank_tmp;
                    keep_cur_rank = need_sum_rank;
                } else if !keep_cur_rank && need_sum_rank && term_rank == rank_tmp {
                    best_field = f as u8;
                    keep_cur_rank = true;
                } else if rank_tmp > 0.0 && need_sum_rank {
                    ranks_in_fields.push(rank_tmp);
                }
            }
            if term_rank == 0.0 {
                continue;
            }
            if holder.cfg.summation_ranks_by_fields_ratio > 0.0 {
                ranks_in_fields.sort_by(|a, b| {
                    a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                });
                let mut k = holder.cfg.summation_ranks_by_fields_ratio;
                for rank in ranks_in_fields {
                    term_rank += k * rank;
                    k *= holder.cfg.summation_ranks_by_fields_ratio;
                }
            }

            // Later terms merge into docs seen by earlier terms.
            if !simple && status.status != 0 {
                let m_rd = &mut ctx.merged_rd[status.idoffset as usize];
                let mut norm_dist = 1.0f64;
                let mut distance = 0u32;
                if m_rd.qpos != raw_res.term.opts.qpos {
                    distance = m_rd.cur.distance(relid, u32::MAX);
                    norm_dist = bound(
                        1.0 / f64::from(distance.max(1)),
                        holder.cfg.distance_weight,
                        holder.cfg.distance_boost,
                    );
                }
                let final_rank = norm_dist * term_rank;
                let seen = cur.get(vid_us).copied().unwrap_or(false);
                if distance <= raw_res.term.opts.distance && (!seen || final_rank > m_rd.rank) {
                    let info = &mut ctx.merged[status.idoffset as usize];
                    if seen {
                        info.proc -= m_rd.rank;
                    } else {
                        info.matched += 1;
                    }
                    info.proc += final_rank;
                    m_rd.rank = final_rank;
                    m_rd.next = Some(relid.clone());
                    if let Some(flag) = cur.get_mut(vid_us) {
                        *flag = true;
                    }
                }
            }

            if ctx.merged.len() < holder.cfg.merge_limit && !has_been_and {
                let added_less_ranked = !cur.is_empty()
                    && cur.get(vid_us).copied().unwrap_or(false)
                    && ctx.merged[status.idoffset as usize].proc < term_rank;
                if (simple && added_less_ranked) || status.status == 0 {
                    let info = MergeInfo {
                        id: vid,
                        proc: term_rank,
                        matched: 1,
                        field: best_field,
                    };
                    if status.status != 0 {
                        ctx.merged[status.idoffset as usize] = info;
                    } else {
                        ctx.merged.push(info);
                        ctx.statuses[vid_us].status = raw_index as u32 + 1;
                        if !cur.is_empty() {
                            if let Some(flag) = cur.get_mut(vid_us) {
                                *flag = true;
                            }
                            ctx.statuses[vid_us].idoffset = ctx.merged.len() as u32 - 1;
                        }
                        if !simple {
                            ctx.merged_rd.push(MergedIdRel {
                                cur: relid.clone(),
                                next: None,
                                rank: term_rank,
                                qpos: raw_res.term.opts.qpos,
                            });
                        }
                    }
                }
            }
        }
    }
}
