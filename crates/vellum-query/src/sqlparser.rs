//! SQL parser: text → canonical [`Query`].

use vellum_error::{Result, VellumError};
use vellum_types::{CondType, OpType, Value};

use crate::lexer::{tokenize, Token, TokenKind};
use crate::query::{
    AggType, AggregateEntry, CalcTotal, FilterKind, FilterNode, JoinOnEntry, JoinType,
    JoinedQuery, Query, QueryEntry, QueryType, SortingEntry, UpdateEntry, UpdateMode,
};

/// Parse one SQL statement.
pub fn parse(sql: &str) -> Result<Query> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut query = parser.parse_query()?;
    parser.eat_punct(";");
    parser.expect_eof()?;
    redistribute_join_conditions(&mut query);
    Ok(query)
}

/// Conditions written against a joined namespace (`authors.name = …`)
/// belong to that join's sub-query; conditions prefixed with the main
/// namespace are unqualified.
fn redistribute_join_conditions(query: &mut Query) {
    let mut moved: Vec<(usize, FilterNode)> = Vec::new();
    let main_prefix = format!("{}.", query.namespace);
    let join_prefixes: Vec<String> = query
        .join_queries
        .iter()
        .map(|j| format!("{}.", j.query.namespace))
        .collect();
    let mut kept = Vec::with_capacity(query.filters.len());
    for mut node in std::mem::take(&mut query.filters) {
        if let FilterKind::Cond(entry) = &mut node.kind {
            if let Some(rest) = entry.field.strip_prefix(&main_prefix) {
                entry.field = rest.to_owned();
                kept.push(node);
                continue;
            }
            if let Some(join_idx) = join_prefixes
                .iter()
                .position(|p| entry.field.starts_with(p.as_str()))
            {
                entry.field = entry.field[join_prefixes[join_idx].len()..].to_owned();
                moved.push((join_idx, node));
                continue;
            }
        }
        kept.push(node);
    }
    query.filters = kept;
    for (join_idx, node) in moved {
        query.join_queries[join_idx].query.filters.push(node);
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, detail: impl Into<String>) -> VellumError {
        let tok = self.peek();
        VellumError::ParseSql {
            token: tok.text(),
            offset: tok.offset,
            detail: detail.into(),
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek().is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", kw.to_uppercase())))
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(&self.peek().kind, TokenKind::Punct(have) if *have == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{p}'")))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        if matches!(self.peek().kind, TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next().kind {
            TokenKind::Ident(s) => Ok(s),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected identifier"))
            }
        }
    }

    /// A possibly-dotted, possibly-composite field name (`a.b`, `a+b`).
    fn field_name(&mut self) -> Result<String> {
        let mut name = self.ident()?;
        loop {
            if self.eat_punct(".") {
                name.push('.');
                name.push_str(&self.ident()?);
            } else if self.eat_punct("+") {
                name.push('+');
                name.push_str(&self.ident()?);
            } else {
                return Ok(name);
            }
        }
    }

    fn parse_query(&mut self) -> Result<Query> {
        let mut explain = false;
        if self.eat_keyword("explain") {
            explain = true;
        }
        let tok = self.peek().clone();
        let mut query = if tok.is_keyword("select") {
            self.pos += 1;
            self.parse_select()?
        } else if tok.is_keyword("update") {
            self.pos += 1;
            self.parse_update()?
        } else if tok.is_keyword("delete") {
            self.pos += 1;
            self.expect_keyword("from")?;
            let mut q = Query::new(self.ident()?);
            q.query_type = QueryType::Delete;
            self.parse_tail_clauses(&mut q)?;
            q
        } else if tok.is_keyword("truncate") {
            self.pos += 1;
            let mut q = Query::new(self.ident()?);
            q.query_type = QueryType::Truncate;
            q
        } else {
            return Err(self.error("expected SELECT, UPDATE, DELETE or TRUNCATE"));
        };
        query.explain = explain;
        Ok(query)
    }

    fn parse_select(&mut self) -> Result<Query> {
        let mut query = Query::new(String::new());
        loop {
            if self.eat_punct("*") {
                // Plain select-all contributes no select filter.
            } else {
                let name = self.ident()?;
                if self.eat_punct("(") {
                    self.parse_select_function(&mut query, &name)?;
                } else {
                    query.select_filter.push(name);
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_keyword("from")?;
        query.namespace = self.ident()?;
        self.parse_tail_clauses(&mut query)?;
        Ok(query)
    }

    fn parse_select_function(&mut self, query: &mut Query, name: &str) -> Result<()> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "count" => {
                self.expect_punct("*")?;
                self.expect_punct(")")?;
                query.calc_total = CalcTotal::Enabled;
            }
            "count_cached" => {
                self.expect_punct("*")?;
                self.expect_punct(")")?;
                query.calc_total = CalcTotal::Cached;
            }
            "rank" => {
                self.expect_punct(")")?;
                query.with_rank = true;
            }
            _ => {
                let Some(agg_type) = AggType::from_name(&lower) else {
                    return Err(self.error(format!("unknown aggregation '{name}'")));
                };
                let mut entry = AggregateEntry::new(agg_type, vec![self.field_name()?]);
                while self.eat_punct(",") {
                    if self.eat_keyword("order") {
                        self.expect_keyword("by")?;
                        entry.sort.push(self.parse_sort_entry()?);
                    } else if self.eat_keyword("limit") {
                        entry.limit = Some(self.integer()? as usize);
                    } else if self.eat_keyword("offset") {
                        entry.offset = self.integer()? as usize;
                    } else {
                        entry.fields.push(self.field_name()?);
                    }
                }
                self.expect_punct(")")?;
                query.aggregations.push(entry);
            }
        }
        Ok(())
    }

    fn parse_update(&mut self) -> Result<Query> {
        let mut query = Query::new(self.ident()?);
        query.query_type = QueryType::Update;
        loop {
            if self.eat_keyword("set") {
                loop {
                    let column = self.field_name()?;
                    self.expect_punct("=")?;
                    query.update_entries.push(self.parse_update_value(column)?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
            } else if self.eat_keyword("drop") {
                loop {
                    query.update_entries.push(UpdateEntry {
                        column: self.field_name()?,
                        values: Vec::new(),
                        mode: UpdateMode::Drop,
                        is_expression: false,
                    });
                    if !self.eat_punct(",") {
                        break;
                    }
                }
            } else {
                break;
            }
        }
        if query.update_entries.is_empty() {
            return Err(self.error("UPDATE requires SET or DROP"));
        }
        self.parse_tail_clauses(&mut query)?;
        Ok(query)
    }

    fn parse_update_value(&mut self, column: String) -> Result<UpdateEntry> {
        // A literal is a plain SET; anything else is captured verbatim as
        // an expression evaluated against the row.
        if let Some(value) = self.try_value()? {
            return Ok(UpdateEntry {
                column,
                values: vec![value],
                mode: UpdateMode::Set,
                is_expression: false,
            });
        }
        let mut expr = String::new();
        loop {
            let tok = self.peek().clone();
            let done = matches!(tok.kind, TokenKind::Eof)
                || matches!(&tok.kind, TokenKind::Punct(p) if *p == "," || *p == ";")
                || tok.is_keyword("where");
            if done {
                break;
            }
            if !expr.is_empty() {
                expr.push(' ');
            }
            expr.push_str(&tok.text());
            self.pos += 1;
        }
        if expr.is_empty() {
            return Err(self.error("expected update value"));
        }
        Ok(UpdateEntry {
            column,
            values: vec![Value::string(expr)],
            mode: UpdateMode::Set,
            is_expression: true,
        })
    }

    fn parse_tail_clauses(&mut self, query: &mut Query) -> Result<()> {
        loop {
            if self.eat_keyword("where") {
                let parsed = self.parse_filters()?;
                query.filters.extend(parsed);
            } else if self.peek().is_keyword("join")
                || self.peek().is_keyword("inner")
                || self.peek().is_keyword("left")
                || self.peek().is_keyword("or")
            {
                self.parse_join(query)?;
            } else if self.eat_keyword("order") {
                self.expect_keyword("by")?;
                loop {
                    query.sort.push(self.parse_sort_entry()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
            } else if self.eat_keyword("limit") {
                query.limit = Some(self.integer()? as usize);
            } else if self.eat_keyword("offset") {
                query.offset = self.integer()? as usize;
            } else if self.eat_keyword("merge") {
                self.expect_punct("(")?;
                let merged = self.parse_query()?;
                self.expect_punct(")")?;
                query.merge_queries.push(merged);
            } else if self.eat_keyword("equal_position") {
                self.expect_punct("(")?;
                let mut fields = Vec::new();
                loop {
                    fields.push(self.field_name()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
                query.equal_positions.push(fields);
            } else {
                return Ok(());
            }
        }
    }

    fn parse_join(&mut self, query: &mut Query) -> Result<()> {
        let join_type = if self.eat_keyword("left") {
            self.expect_keyword("join")?;
            JoinType::LeftJoin
        } else if self.eat_keyword("inner") {
            self.expect_keyword("join")?;
            JoinType::InnerJoin
        } else if self.eat_keyword("or") {
            self.expect_keyword("inner")?;
            self.expect_keyword("join")?;
            JoinType::OrInnerJoin
        } else {
            self.expect_keyword("join")?;
            JoinType::InnerJoin
        };
        let right_ns = self.ident()?;
        self.expect_keyword("on")?;
        let mut on = Vec::new();
        let mut op = OpType::And;
        loop {
            let a_ns = self.ident()?;
            self.expect_punct(".")?;
            let a_field = self.ident()?;
            let cond = self.parse_cond_op()?;
            let b_ns = self.ident()?;
            self.expect_punct(".")?;
            let b_field = self.ident()?;
            let (left_field, right_field) = if a_ns == right_ns {
                (b_field, a_field)
            } else if b_ns == right_ns {
                (a_field, b_field)
            } else {
                return Err(self.error(format!(
                    "join condition does not reference namespace '{right_ns}'"
                )));
            };
            on.push(JoinOnEntry {
                op,
                left_field,
                cond,
                right_field,
            });
            if self.eat_keyword("and") {
                op = OpType::And;
            } else if self.eat_keyword("or") {
                op = OpType::Or;
            } else {
                break;
            }
        }
        let idx = query.join_queries.len();
        query.join_queries.push(JoinedQuery {
            join_type,
            query: Query::new(right_ns),
            on,
        });
        let op = if join_type == JoinType::OrInnerJoin {
            OpType::Or
        } else {
            OpType::And
        };
        query.filters.push(FilterNode {
            op,
            kind: FilterKind::JoinRef(idx),
        });
        Ok(())
    }

    fn parse_sort_entry(&mut self) -> Result<SortingEntry> {
        let mut entry = SortingEntry {
            expression: self.field_name()?,
            ..SortingEntry::default()
        };
        if self.eat_punct("(") {
            loop {
                entry.forced_values.push(self.value()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        if self.eat_keyword("desc") {
            entry.desc = true;
        } else {
            let _ = self.eat_keyword("asc");
        }
        Ok(entry)
    }

    fn parse_filters(&mut self) -> Result<Vec<FilterNode>> {
        let mut filters = Vec::new();
        let mut op = OpType::And;
        loop {
            if self.eat_keyword("not") {
                op = OpType::Not;
            }
            if self.eat_punct("(") {
                let inner = self.parse_filters()?;
                let mut equal_positions = Vec::new();
                while self.eat_keyword("equal_position") {
                    self.expect_punct("(")?;
                    let mut fields = Vec::new();
                    loop {
                        fields.push(self.field_name()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct(")")?;
                    equal_positions.push(fields);
                }
                self.expect_punct(")")?;
                filters.push(FilterNode {
                    op,
                    kind: FilterKind::Bracket {
                        filters: inner,
                        equal_positions,
                    },
                });
            } else {
                let (kind, invert) = self.parse_condition()?;
                if invert {
                    op = match op {
                        OpType::And => OpType::Not,
                        OpType::Not => OpType::And,
                        OpType::Or => {
                            return Err(self.error("OR with != is not supported"));
                        }
                    };
                }
                filters.push(FilterNode { op, kind });
            }
            if self.eat_keyword("and") {
                op = OpType::And;
            } else if self.peek().is_keyword("or") {
                // `OR INNER JOIN` belongs to the clause level, not here.
                if self
                    .tokens
                    .get(self.pos + 1)
                    .is_some_and(|t| t.is_keyword("inner"))
                {
                    return Ok(filters);
                }
                self.pos += 1;
                op = OpType::Or;
            } else {
                return Ok(filters);
            }
        }
    }

    fn parse_condition(&mut self) -> Result<(FilterKind, bool)> {
        let field = self.field_name()?;
        if field.eq_ignore_ascii_case("st_dwithin") && self.eat_punct("(") {
            return Ok((self.parse_dwithin()?, false));
        }
        if self.eat_keyword("is") {
            if self.eat_keyword("not") {
                self.expect_keyword("null")?;
                return Ok((
                    FilterKind::Cond(QueryEntry {
                        field,
                        cond: CondType::Any,
                        values: Vec::new(),
                    }),
                    false,
                ));
            }
            if !self.eat_keyword("null") {
                self.expect_keyword("empty")?;
            }
            return Ok((
                FilterKind::Cond(QueryEntry {
                    field,
                    cond: CondType::Empty,
                    values: Vec::new(),
                }),
                false,
            ));
        }
        if self.eat_keyword("in") {
            return Ok((
                FilterKind::Cond(QueryEntry {
                    field,
                    cond: CondType::Set,
                    values: self.value_list()?,
                }),
                false,
            ));
        }
        if self.eat_keyword("allset") {
            return Ok((
                FilterKind::Cond(QueryEntry {
                    field,
                    cond: CondType::AllSet,
                    values: self.value_list()?,
                }),
                false,
            ));
        }
        if self.eat_keyword("range") {
            let values = self.value_list()?;
            if values.len() != 2 {
                return Err(self.error("RANGE expects exactly two values"));
            }
            return Ok((
                FilterKind::Cond(QueryEntry {
                    field,
                    cond: CondType::Range,
                    values,
                }),
                false,
            ));
        }
        if self.eat_keyword("like") {
            return Ok((
                FilterKind::Cond(QueryEntry {
                    field,
                    cond: CondType::Like,
                    values: vec![self.value()?],
                }),
                false,
            ));
        }
        let (cond, invert) = self.parse_cond_op_inv()?;
        Ok((
            FilterKind::Cond(QueryEntry {
                field,
                cond,
                values: vec![self.value()?],
            }),
            invert,
        ))
    }

    /// `=`, comparisons, plus `!=`/`<>` which parse as inverted equality.
    fn parse_cond_op_inv(&mut self) -> Result<(CondType, bool)> {
        if matches!(&self.peek().kind, TokenKind::Punct(p) if *p == "!=" || *p == "<>") {
            self.pos += 1;
            return Ok((CondType::Eq, true));
        }
        Ok((self.parse_cond_op()?, false))
    }

    fn parse_dwithin(&mut self) -> Result<FilterKind> {
        let field = self.field_name()?;
        self.expect_punct(",")?;
        let geom = self.ident()?;
        if !geom.eq_ignore_ascii_case("st_geomfromtext") {
            return Err(self.error("expected ST_GeomFromText"));
        }
        self.expect_punct("(")?;
        let TokenKind::Str(text) = self.next().kind else {
            return Err(self.error("expected a point literal"));
        };
        self.expect_punct(")")?;
        self.expect_punct(",")?;
        let dist = self.value()?;
        self.expect_punct(")")?;
        // "point (x y)"
        let inner = text
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')');
        let mut coords = inner.split_whitespace().map(str::parse::<f64>);
        let (Some(Ok(x)), Some(Ok(y))) = (coords.next(), coords.next()) else {
            return Err(self.error(format!("malformed point literal '{text}'")));
        };
        Ok(FilterKind::Cond(QueryEntry {
            field,
            cond: CondType::DWithin,
            values: vec![Value::Double(x), Value::Double(y), dist],
        }))
    }

    fn parse_cond_op(&mut self) -> Result<CondType> {
        let tok = self.next();
        let TokenKind::Punct(p) = tok.kind else {
            self.pos = self.pos.saturating_sub(1);
            return Err(self.error("expected comparison operator"));
        };
        Ok(match p {
            "=" => CondType::Eq,
            "<" => CondType::Lt,
            "<=" => CondType::Le,
            ">" => CondType::Gt,
            ">=" => CondType::Ge,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.error("expected comparison operator"));
            }
        })
    }

    fn value_list(&mut self) -> Result<Vec<Value>> {
        self.expect_punct("(")?;
        let mut values = Vec::new();
        if self.eat_punct(")") {
            return Ok(values);
        }
        loop {
            values.push(self.value()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(values)
    }

    fn integer(&mut self) -> Result<i64> {
        match self.next().kind {
            TokenKind::Integer(i) => Ok(i),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected an integer"))
            }
        }
    }

    fn value(&mut self) -> Result<Value> {
        match self.try_value()? {
            Some(v) => Ok(v),
            None => Err(self.error("expected a literal value")),
        }
    }

    fn try_value(&mut self) -> Result<Option<Value>> {
        let negative = matches!(&self.peek().kind, TokenKind::Punct("-"))
            && matches!(
                self.tokens.get(self.pos + 1).map(|t| &t.kind),
                Some(TokenKind::Integer(_)) | Some(TokenKind::Float(_))
            );
        if negative {
            self.pos += 1;
        }
        let v = match &self.peek().kind {
            TokenKind::Integer(i) => Some(Value::Int(if negative { -*i } else { *i })),
            TokenKind::Float(f) => Some(Value::Double(if negative { -*f } else { *f })),
            TokenKind::Str(s) => Some(Value::string(s.clone())),
            TokenKind::Ident(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            TokenKind::Ident(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            TokenKind::Ident(s) if s.eq_ignore_ascii_case("null") => Some(Value::Null),
            TokenKind::Punct("(") => {
                // Tuple literal for composite keys: (1, 2).
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    items.push(self.value()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
                return Ok(Some(Value::Tuple(items)));
            }
            _ => None,
        };
        if v.is_some() {
            self.pos += 1;
        } else if negative {
            self.pos -= 1;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_select() {
        let q = parse("SELECT * FROM items WHERE id = 7 ORDER BY name DESC LIMIT 10 OFFSET 5")
            .unwrap();
        assert_eq!(q.namespace, "items");
        assert_eq!(q.query_type, QueryType::Select);
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, 5);
        assert!(q.sort[0].desc);
    }

    #[test]
    fn test_parse_in_and_range() {
        let q = parse("SELECT * FROM ns WHERE a IN (1, 2, 3) AND b RANGE(10, 20)").unwrap();
        let FilterKind::Cond(e) = &q.filters[0].kind else {
            panic!("expected condition")
        };
        assert_eq!(e.cond, CondType::Set);
        assert_eq!(e.values.len(), 3);
        let FilterKind::Cond(e) = &q.filters[1].kind else {
            panic!("expected condition")
        };
        assert_eq!(e.cond, CondType::Range);
    }

    #[test]
    fn test_parse_empty_in_list() {
        let q = parse("SELECT * FROM ns WHERE a IN ()").unwrap();
        let FilterKind::Cond(e) = &q.filters[0].kind else {
            panic!("expected condition")
        };
        assert!(e.values.is_empty());
    }

    #[test]
    fn test_parse_is_null_family() {
        let q = parse("SELECT * FROM ns WHERE a IS NULL AND b IS NOT NULL AND c IS EMPTY")
            .unwrap();
        let conds: Vec<CondType> = q
            .filters
            .iter()
            .map(|f| match &f.kind {
                FilterKind::Cond(e) => e.cond,
                _ => panic!("expected condition"),
            })
            .collect();
        assert_eq!(conds, vec![CondType::Empty, CondType::Any, CondType::Empty]);
    }

    #[test]
    fn test_parse_brackets_and_ops() {
        let q = parse("SELECT * FROM ns WHERE a = 1 AND (b = 2 OR c = 3) AND NOT d = 4")
            .unwrap();
        assert_eq!(q.filters.len(), 3);
        assert!(matches!(q.filters[1].kind, FilterKind::Bracket { .. }));
        assert_eq!(q.filters[2].op, OpType::Not);
    }

    #[test]
    fn test_parse_forced_sort() {
        let q = parse("SELECT * FROM ns WHERE score >= 20 ORDER BY score(30, 10, 20) DESC")
            .unwrap();
        assert_eq!(
            q.sort[0].forced_values,
            vec![Value::Int(30), Value::Int(10), Value::Int(20)]
        );
        assert!(q.sort[0].desc);
    }

    #[test]
    fn test_parse_composite_tuple() {
        let q = parse("SELECT * FROM ns WHERE a+b = (1, 2)").unwrap();
        let FilterKind::Cond(e) = &q.filters[0].kind else {
            panic!("expected condition")
        };
        assert_eq!(e.field, "a+b");
        assert_eq!(
            e.values[0],
            Value::Tuple(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_parse_inner_join() {
        let q = parse(
            "SELECT * FROM books INNER JOIN authors ON books.author_id = authors.id \
             WHERE authors.name LIKE 'A%'",
        )
        .unwrap();
        assert_eq!(q.join_queries.len(), 1);
        let join = &q.join_queries[0];
        assert_eq!(join.join_type, JoinType::InnerJoin);
        assert_eq!(join.query.namespace, "authors");
        assert_eq!(join.on[0].left_field, "author_id");
        assert_eq!(join.on[0].right_field, "id");
        assert!(matches!(q.filters[0].kind, FilterKind::JoinRef(0)));
        // The right-namespace condition moved into the joined sub-query.
        assert_eq!(q.filters.len(), 1);
        assert_eq!(join.query.filters.len(), 1);
    }

    #[test]
    fn test_parse_aggregations() {
        let q = parse("SELECT COUNT(*), SUM(price), FACET(brand, LIMIT 5) FROM items").unwrap();
        assert_eq!(q.calc_total, CalcTotal::Enabled);
        assert_eq!(q.aggregations.len(), 2);
        assert_eq!(q.aggregations[0].agg_type, AggType::Sum);
        assert_eq!(q.aggregations[1].agg_type, AggType::Facet);
        assert_eq!(q.aggregations[1].limit, Some(5));
    }

    #[test]
    fn test_parse_update() {
        let q = parse("UPDATE ns SET a = 5, b = 'x' WHERE id = 1").unwrap();
        assert_eq!(q.query_type, QueryType::Update);
        assert_eq!(q.update_entries.len(), 2);
        assert_eq!(q.update_entries[0].mode, UpdateMode::Set);
        assert!(!q.update_entries[0].is_expression);
    }

    #[test]
    fn test_parse_update_expression() {
        let q = parse("UPDATE ns SET counter = counter + 1 WHERE id = 1").unwrap();
        assert!(q.update_entries[0].is_expression);
        assert_eq!(q.update_entries[0].values[0], Value::from("counter + 1"));
    }

    #[test]
    fn test_parse_update_drop() {
        let q = parse("UPDATE ns DROP old_field").unwrap();
        assert_eq!(q.update_entries[0].mode, UpdateMode::Drop);
    }

    #[test]
    fn test_parse_delete_truncate() {
        let q = parse("DELETE FROM ns WHERE id = 3").unwrap();
        assert_eq!(q.query_type, QueryType::Delete);
        let q = parse("TRUNCATE ns").unwrap();
        assert_eq!(q.query_type, QueryType::Truncate);
    }

    #[test]
    fn test_parse_dwithin() {
        let q = parse(
            "SELECT * FROM ns WHERE ST_DWithin(point, ST_GeomFromText('point (1.5 2.5)'), 10)",
        )
        .unwrap();
        let FilterKind::Cond(e) = &q.filters[0].kind else {
            panic!("expected condition")
        };
        assert_eq!(e.cond, CondType::DWithin);
        assert_eq!(e.field, "point");
        assert_eq!(
            e.values,
            vec![Value::Double(1.5), Value::Double(2.5), Value::Int(10)]
        );
    }

    #[test]
    fn test_parse_equal_position() {
        let q = parse("SELECT * FROM ns WHERE a = 1 EQUAL_POSITION(f1, f2)").unwrap();
        assert_eq!(q.equal_positions, vec![vec!["f1".to_owned(), "f2".to_owned()]]);
    }

    #[test]
    fn test_parse_merge() {
        let q = parse("SELECT * FROM a WHERE x = 1 MERGE (SELECT * FROM b WHERE y = 2)").unwrap();
        assert_eq!(q.merge_queries.len(), 1);
        assert_eq!(q.merge_queries[0].namespace, "b");
    }

    #[test]
    fn test_sql_roundtrip_reparses_equal() {
        let sources = [
            "SELECT * FROM items WHERE id = 7 ORDER BY name DESC LIMIT 10 OFFSET 5",
            "SELECT * FROM ns WHERE a IN (1, 2) AND (b = 2 OR c = 3)",
            "SELECT * FROM ns WHERE score >= 20 ORDER BY score(30, 10) DESC",
            "SELECT * FROM books INNER JOIN authors ON books.author_id = authors.id \
             WHERE authors.name LIKE 'A%'",
            "DELETE FROM ns WHERE id = 3",
            "TRUNCATE ns",
        ];
        for src in sources {
            let q1 = parse(src).unwrap();
            let q2 = parse(&q1.to_sql()).unwrap();
            assert_eq!(q1, q2, "round-trip failed for: {src}");
        }
    }

    #[test]
    fn test_parse_error_carries_offset() {
        let err = parse("SELECT * FROM").unwrap_err();
        assert_eq!(err.kind(), vellum_error::ErrorKind::ParseSql);
    }
}
