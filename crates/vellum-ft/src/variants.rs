//! Query-term variant generators: transliteration and keyboard-layout
//! remapping.
//!
//! A user typing a Russian word in Latin letters (or on the wrong
//! keyboard layout) still expects hits; each generator derives one extra
//! pattern with a reduced relevancy.

/// Relevancy assigned to a transliterated variant.
pub const TRANSLIT_PROC: i32 = 90;
/// Relevancy assigned to a keyboard-layout variant.
pub const KBLAYOUT_PROC: i32 = 90;

const RU_TRANSLIT: &[(char, &str)] = &[
    ('а', "a"),
    ('б', "b"),
    ('в', "v"),
    ('г', "g"),
    ('д', "d"),
    ('е', "e"),
    ('ё', "yo"),
    ('ж', "zh"),
    ('з', "z"),
    ('и', "i"),
    ('й', "j"),
    ('к', "k"),
    ('л', "l"),
    ('м', "m"),
    ('н', "n"),
    ('о', "o"),
    ('п', "p"),
    ('р', "r"),
    ('с', "s"),
    ('т', "t"),
    ('у', "u"),
    ('ф', "f"),
    ('х', "h"),
    ('ц', "c"),
    ('ч', "ch"),
    ('ш', "sh"),
    ('щ', "shch"),
    ('ъ', ""),
    ('ы', "y"),
    ('ь', ""),
    ('э', "e"),
    ('ю', "yu"),
    ('я', "ya"),
];

/// QWERTY key ↔ ЙЦУКЕН key on the same physical position.
const KB_PAIRS: &[(char, char)] = &[
    ('q', 'й'),
    ('w', 'ц'),
    ('e', 'у'),
    ('r', 'к'),
    ('t', 'е'),
    ('y', 'н'),
    ('u', 'г'),
    ('i', 'ш'),
    ('o', 'щ'),
    ('p', 'з'),
    ('[', 'х'),
    (']', 'ъ'),
    ('a', 'ф'),
    ('s', 'ы'),
    ('d', 'в'),
    ('f', 'а'),
    ('g', 'п'),
    ('h', 'р'),
    ('j', 'о'),
    ('k', 'л'),
    ('l', 'д'),
    (';', 'ж'),
    ('\'', 'э'),
    ('z', 'я'),
    ('x', 'ч'),
    ('c', 'с'),
    ('v', 'м'),
    ('b', 'и'),
    ('n', 'т'),
    ('m', 'ь'),
    (',', 'б'),
    ('.', 'ю'),
];

/// Cyrillic → Latin transliteration; `None` when the word has no
/// Cyrillic letters (the variant would be identical).
#[must_use]
pub fn translit(word: &str) -> Option<String> {
    let mut out = String::with_capacity(word.len());
    let mut changed = false;
    for c in word.chars() {
        match RU_TRANSLIT.iter().find(|(ru, _)| *ru == c) {
            Some((_, lat)) => {
                out.push_str(lat);
                changed = true;
            }
            None => out.push(c),
        }
    }
    (changed && !out.is_empty() && out != word).then_some(out)
}

/// Remap the word to the opposite keyboard layout.
///
/// The direction is chosen per character; `None` when nothing maps.
#[must_use]
pub fn kb_layout(word: &str) -> Option<String> {
    let mut out = String::with_capacity(word.len());
    let mut changed = false;
    for c in word.chars() {
        if let Some((_, ru)) = KB_PAIRS.iter().find(|(en, _)| *en == c) {
            out.push(*ru);
            changed = true;
        } else if let Some((en, _)) = KB_PAIRS.iter().find(|(_, ru)| *ru == c) {
            out.push(*en);
            changed = true;
        } else {
            out.push(c);
        }
    }
    (changed && out != word).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translit() {
        assert_eq!(translit("привет").as_deref(), Some("privet"));
        assert_eq!(translit("hello"), None);
    }

    #[test]
    fn test_kb_layout_both_directions() {
        assert_eq!(kb_layout("ghbdtn").as_deref(), Some("привет"));
        assert_eq!(kb_layout("привет").as_deref(), Some("ghbdtn"));
        assert_eq!(kb_layout("123"), None);
    }
}
