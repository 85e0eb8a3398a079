//! BM25 scoring primitives.
//!
//! Scores are computed per field and folded into the term rank together
//! with the positional and term-length boosts; see the selecter.

const K1: f64 = 2.0;
const B: f64 = 0.75;

/// Inverse document frequency, normalized to `[0, 1]`.
#[must_use]
pub fn idf(total_docs: usize, matched_docs: usize) -> f64 {
    if total_docs == 0 {
        return 0.0;
    }
    let raw = ((total_docs as f64) / (matched_docs as f64 + 1.0)).ln()
        / (1.0 + total_docs as f64).ln();
    raw.max(0.0)
}

/// BM25 term score within one field.
///
/// `term_count` is the term's occurrences in the field, normalized by the
/// field's most frequent word so documents that repeat one filler word do
/// not dominate; `words_in_doc` / `avg_words` apply the usual length
/// penalty.
#[must_use]
pub fn bm25_score(
    term_count: f64,
    most_freq_word_count: f64,
    words_in_doc: f64,
    avg_words: f64,
) -> f64 {
    let tf = term_count / most_freq_word_count.max(1.0);
    tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * words_in_doc / avg_words.max(1e-9)))
}

/// Piecewise-linear attenuation of a term's first position in the field:
/// earlier occurrences rank higher, flattening out by position 100 000.
#[must_use]
pub fn pos2rank(pos: u32) -> f64 {
    let pos = f64::from(pos);
    if pos <= 10.0 {
        1.0 - pos / 100.0
    } else if pos <= 100.0 {
        0.9 - pos / 1000.0
    } else if pos <= 1000.0 {
        0.8 - pos / 10_000.0
    } else if pos <= 10_000.0 {
        0.7 - pos / 100_000.0
    } else if pos <= 100_000.0 {
        0.6 - pos / 1_000_000.0
    } else {
        0.5
    }
}

/// `(1 - weight) + k·boost·weight`: blend a raw score into a rank factor
/// so a weight of 0 disables the component entirely.
#[must_use]
pub fn bound(k: f64, weight: f64, boost: f64) -> f64 {
    (1.0 - weight) + k * boost * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idf_decreases_with_frequency() {
        assert!(idf(1000, 1) > idf(1000, 100));
        assert!(idf(1000, 999) >= 0.0);
        assert_eq!(idf(0, 0), 0.0);
    }

    #[test]
    fn test_pos2rank_monotone() {
        let ranks: Vec<f64> = [0u32, 5, 10, 50, 100, 500, 5000, 50_000, 500_000]
            .iter()
            .map(|&p| pos2rank(p))
            .collect();
        for pair in ranks.windows(2) {
            assert!(pair[0] >= pair[1], "pos2rank must not increase: {pair:?}");
        }
        assert!((pos2rank(0) - 1.0).abs() < 1e-12);
        assert!((pos2rank(1_000_000) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bound_weight_zero_is_neutral() {
        assert!((bound(0.123, 0.0, 7.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bm25_length_penalty() {
        let short = bm25_score(1.0, 1.0, 5.0, 20.0);
        let long = bm25_score(1.0, 1.0, 100.0, 20.0);
        assert!(short > long);
    }
}
