//! Suffix map over the indexed vocabulary.
//!
//! Every suffix of every word is an entry in one sorted array, so both
//! prefix lookup (`word*`) and substring lookup (`*word*`) reduce to a
//! `lower_bound` walk: all entries sharing the pattern as a prefix are
//! adjacent.

/// Dense id of a word inside [`SuffixMap::words`].
pub type WordId = u32;

/// One candidate produced by a pattern walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuffixMatch {
    pub word_id: WordId,
    /// Chars between the word start and the matched suffix.
    pub suffix_len: usize,
    /// Char length of the whole word.
    pub word_len: usize,
}

#[derive(Debug, Clone, Copy)]
struct SuffixEntry {
    word_id: WordId,
    /// Byte offset of the suffix inside the word.
    offset: u32,
}

/// Sorted array of every suffix of every indexed word.
#[derive(Debug, Clone, Default)]
pub struct SuffixMap {
    words: Vec<String>,
    virtual_flags: Vec<bool>,
    entries: Vec<SuffixEntry>,
    built: bool,
}

impl SuffixMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn word_at(&self, id: WordId) -> &str {
        &self.words[id as usize]
    }

    #[must_use]
    pub fn is_virtual(&self, id: WordId) -> bool {
        self.virtual_flags[id as usize]
    }

    /// Register a word; virtual words are number-to-text expansions that
    /// only participate in suffix-enabled lookups.
    pub fn insert(&mut self, word: &str, is_virtual: bool) -> WordId {
        let id = self.words.len() as WordId;
        self.words.push(word.to_owned());
        self.virtual_flags.push(is_virtual);
        for (offset, _) in word.char_indices() {
            self.entries.push(SuffixEntry {
                word_id: id,
                offset: offset as u32,
            });
        }
        self.built = false;
        id
    }

    fn suffix_of(&self, e: &SuffixEntry) -> &str {
        &self.words[e.word_id as usize][e.offset as usize..]
    }

    /// Sort the suffix array; must run after the last `insert`.
    pub fn build(&mut self) {
        let words = std::mem::take(&mut self.words);
        self.entries.sort_by(|a, b| {
            let sa = &words[a.word_id as usize][a.offset as usize..];
            let sb = &words[b.word_id as usize][b.offset as usize..];
            sa.cmp(sb)
        });
        self.words = words;
        self.built = true;
    }

    /// Walk every suffix starting with `pattern`, yielding candidates.
    ///
    /// The walk starts at `lower_bound(pattern)` and continues while the
    /// longest common prefix covers the pattern.
    pub fn lookup(&self, pattern: &str, f: &mut dyn FnMut(SuffixMatch)) {
        debug_assert!(self.built, "suffix map queried before build");
        if pattern.is_empty() {
            return;
        }
        let start = self
            .entries
            .partition_point(|e| self.suffix_of(e) < pattern);
        for e in &self.entries[start..] {
            let suffix = self.suffix_of(e);
            if !suffix.starts_with(pattern) {
                break;
            }
            let word = &self.words[e.word_id as usize];
            f(SuffixMatch {
                word_id: e.word_id,
                suffix_len: word[..e.offset as usize].chars().count(),
                word_len: word.chars().count(),
            });
        }
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.entries.len() * std::mem::size_of::<SuffixEntry>()
            + self.words.iter().map(String::len).sum::<usize>()
    }

    pub fn clear(&mut self) {
        self.words.clear();
        self.virtual_flags.clear();
        self.entries.clear();
        self.built = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_map(words: &[&str]) -> SuffixMap {
        let mut m = SuffixMap::new();
        for w in words {
            m.insert(w, false);
        }
        m.build();
        m
    }

    fn lookup_words(m: &SuffixMap, pattern: &str) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        m.lookup(pattern, &mut |hit| {
            out.push((m.word_at(hit.word_id).to_owned(), hit.suffix_len));
        });
        out.sort();
        out.dedup();
        out
    }

    #[test]
    fn test_substring_lookup_finds_all_containing_words() {
        let m = build_map(&["hello", "help", "yellow"]);
        let hits = lookup_words(&m, "ell");
        assert_eq!(
            hits,
            vec![("hello".to_owned(), 1), ("yellow".to_owned(), 1)]
        );
    }

    #[test]
    fn test_prefix_hits_have_zero_suffix_len() {
        let m = build_map(&["hello", "help", "shell"]);
        let hits = lookup_words(&m, "hel");
        assert!(hits.contains(&("hello".to_owned(), 0)));
        assert!(hits.contains(&("help".to_owned(), 0)));
        assert!(hits.contains(&("shell".to_owned(), 2)));
    }

    #[test]
    fn test_exact_word_is_a_prefix_hit() {
        let m = build_map(&["cat"]);
        let hits = lookup_words(&m, "cat");
        assert_eq!(hits, vec![("cat".to_owned(), 0)]);
    }

    #[test]
    fn test_no_hits() {
        let m = build_map(&["cat"]);
        assert!(lookup_words(&m, "dog").is_empty());
    }
}
