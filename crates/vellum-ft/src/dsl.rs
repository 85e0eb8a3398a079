//! Full-text query DSL.
//!
//! The match string of a full-text condition is parsed into a list of
//! terms with options:
//!
//! * `word` — "should" term (`Or`), prefix/suffix off, typos on
//! * `+word` / `-word` — required / excluded term
//! * `word*`, `*word`, `*word*` — prefix / suffix / substring matching
//! * `=word` — exact form only (no stemming, translit or typos)
//! * `word^1.5` — per-term rank boost
//! * `"quoted phrase"` — consecutive terms with a word-distance bound
//! * `@field^2,other` — restrict and boost the searched fields

use vellum_error::{Result, VellumError};
use vellum_types::OpType;

/// Per-field options of one term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldOpts {
    pub boost: f64,
    pub need_sum_rank: bool,
}

impl Default for FieldOpts {
    fn default() -> Self {
        Self {
            boost: 1.0,
            need_sum_rank: false,
        }
    }
}

/// Options attached to one DSL term.
#[derive(Debug, Clone, PartialEq)]
pub struct TermOpts {
    pub op: OpType,
    /// Allow matches that extend past the end of the pattern.
    pub pref: bool,
    /// Allow matches that start before the pattern.
    pub suff: bool,
    /// Exact form only: no stemming, layout or typo variants.
    pub exact: bool,
    pub typos: bool,
    pub boost: f64,
    pub term_len_boost: f64,
    /// Maximum word distance to the previous term (phrase constraint).
    pub distance: u32,
    /// Term position in the query, for distance bookkeeping.
    pub qpos: u32,
    /// Indexed-field boosts; empty means every field at 1.0.
    pub fields: Vec<FieldOpts>,
    /// True when the term is a pure number (kept out of variant
    /// expansion when numbers search is on).
    pub number: bool,
}

impl Default for TermOpts {
    fn default() -> Self {
        Self {
            op: OpType::Or,
            pref: false,
            suff: false,
            exact: false,
            typos: true,
            boost: 1.0,
            term_len_boost: 1.0,
            distance: u32::MAX,
            qpos: 0,
            fields: Vec::new(),
            number: false,
        }
    }
}

/// One parsed term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DslTerm {
    pub pattern: String,
    pub opts: TermOpts,
}

/// The parsed query: a flat term list.
pub type FtDsl = Vec<DslTerm>;

/// Parse the match string of a full-text condition.
pub fn parse(query: &str, num_fields: usize) -> Result<FtDsl> {
    let mut dsl = FtDsl::new();
    let mut field_opts: Vec<FieldOpts> = Vec::new();
    let mut chars = query.chars().peekable();
    let mut qpos = 0u32;
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '@' {
            chars.next();
            field_opts = parse_field_list(&mut chars, num_fields)?;
            continue;
        }
        if c == '"' {
            chars.next();
            let mut first = true;
            loop {
                skip_spaces(&mut chars);
                match chars.peek() {
                    None => {
                        return Err(VellumError::Parse(
                            "unterminated phrase in full-text query".to_owned(),
                        ))
                    }
                    Some('"') => {
                        chars.next();
                        break;
                    }
                    Some(_) => {
                        let mut term = parse_term(&mut chars, &field_opts, qpos)?;
                        term.opts.op = OpType::And;
                        if !first {
                            term.opts.distance = 1;
                        }
                        first = false;
                        qpos += 1;
                        dsl.push(term);
                    }
                }
            }
            continue;
        }
        let term = parse_term(&mut chars, &field_opts, qpos)?;
        qpos += 1;
        dsl.push(term);
    }
    if dsl.is_empty() {
        return Err(VellumError::Parse("empty full-text query".to_owned()));
    }
    Ok(dsl)
}

fn skip_spaces(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn parse_field_list(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    num_fields: usize,
) -> Result<Vec<FieldOpts>> {
    // `@f1^2,f2` — names are positional here: the caller resolves them
    // against the index's field list before building the term options.
    let mut raw = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        raw.push(c);
        chars.next();
    }
    let mut opts = vec![
        FieldOpts {
            boost: 0.0,
            need_sum_rank: false,
        };
        num_fields.max(1)
    ];
    for (i, part) in raw.split(',').enumerate() {
        if part.is_empty() {
            return Err(VellumError::Parse("empty field in field list".to_owned()));
        }
        let (name, boost) = match part.split_once('^') {
            Some((name, boost)) => (
                name,
                boost
                    .parse::<f64>()
                    .map_err(|_| VellumError::Parse(format!("bad field boost '{boost}'")))?,
            ),
            None => (part, 1.0),
        };
        let need_sum = name.ends_with('+');
        let slot = if name.trim_end_matches('+') == "*" {
            None
        } else {
            Some(i)
        };
        match slot {
            None => {
                for o in &mut opts {
                    o.boost = boost;
                    o.need_sum_rank = need_sum;
                }
            }
            Some(i) if i < opts.len() => {
                opts[i] = FieldOpts {
                    boost,
                    need_sum_rank: need_sum,
                };
            }
            Some(_) => {
                return Err(VellumError::Parse(
                    "more fields in the list than the index has".to_owned(),
                ))
            }
        }
    }
    Ok(opts)
}

fn parse_term(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    field_opts: &[FieldOpts],
    qpos: u32,
) -> Result<DslTerm> {
    let mut opts = TermOpts {
        qpos,
        fields: field_opts.to_vec(),
        ..TermOpts::default()
    };
    match chars.peek() {
        Some('+') => {
            opts.op = OpType::And;
            chars.next();
        }
        Some('-') => {
            opts.op = OpType::Not;
            chars.next();
        }
        _ => {}
    }
    if chars.peek() == Some(&'=') {
        opts.exact = true;
        opts.typos = false;
        chars.next();
    }
    if chars.peek() == Some(&'*') {
        opts.suff = true;
        chars.next();
    }
    let mut pattern = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == '"' || c == '*' || c == '^' {
            break;
        }
        pattern.extend(c.to_lowercase());
        chars.next();
    }
    if chars.peek() == Some(&'*') {
        opts.pref = true;
        chars.next();
    }
    if chars.peek() == Some(&'^') {
        chars.next();
        let mut boost = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                boost.push(c);
                chars.next();
            } else {
                break;
            }
        }
        opts.boost = boost
            .parse()
            .map_err(|_| VellumError::Parse(format!("bad term boost '{boost}'")))?;
    }
    if pattern.is_empty() {
        return Err(VellumError::Parse("empty term in full-text query".to_owned()));
    }
    opts.number = pattern.bytes().all(|b| b.is_ascii_digit());
    Ok(DslTerm { pattern, opts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_terms_default_or() {
        let dsl = parse("hello world", 1).unwrap();
        assert_eq!(dsl.len(), 2);
        assert_eq!(dsl[0].pattern, "hello");
        assert_eq!(dsl[0].opts.op, OpType::Or);
        assert_eq!(dsl[1].opts.qpos, 1);
    }

    #[test]
    fn test_required_and_excluded() {
        let dsl = parse("+must -banned", 1).unwrap();
        assert_eq!(dsl[0].opts.op, OpType::And);
        assert_eq!(dsl[1].opts.op, OpType::Not);
    }

    #[test]
    fn test_wildcards() {
        let dsl = parse("*ell* tail* *head", 1).unwrap();
        assert!(dsl[0].opts.suff && dsl[0].opts.pref);
        assert!(dsl[1].opts.pref && !dsl[1].opts.suff);
        assert!(dsl[2].opts.suff && !dsl[2].opts.pref);
    }

    #[test]
    fn test_exact_disables_typos() {
        let dsl = parse("=literal", 1).unwrap();
        assert!(dsl[0].opts.exact);
        assert!(!dsl[0].opts.typos);
    }

    #[test]
    fn test_boost_and_phrase() {
        let dsl = parse(r#"fast^2 "new york""#, 1).unwrap();
        assert!((dsl[0].opts.boost - 2.0).abs() < 1e-9);
        assert_eq!(dsl[1].opts.op, OpType::And);
        assert_eq!(dsl[1].opts.distance, u32::MAX);
        assert_eq!(dsl[2].opts.op, OpType::And);
        assert_eq!(dsl[2].opts.distance, 1);
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(parse("   ", 1).is_err());
    }
}
