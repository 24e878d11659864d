//! Recursive-descent query string parser (spec §4.9): a small PEG-style
//! grammar over `Or -> And -> Unary -> Primary`, with a handful of taggers
//! recognized at the primary level (literal, quoted phrase, fielded prefix,
//! range, wildcard) and two filters applied as the tree is built (boost
//! suffix, operator precedence via the grammar's own nesting). Grounded in
//! the teacher's `lang.rs` (a hand-rolled recursive-descent expression
//! parser over a `Vec<char>` cursor with `peek`/`advance`/keyword
//! matching) for the parsing style, generalized from Galago's arithmetic
//! expression grammar to the boolean/fielded query grammar spec §4.9 names
//! since nothing in the teacher parses a real query language.
//!
//! Per spec §7, a malformed sub-clause degrades to `Query::Null` rather
//! than failing the whole parse: every recursive helper returns
//! `Result<Query, Error>`, but the public entry point never propagates that
//! error — it substitutes `Query::Null` for whatever clause didn't parse
//! and returns the best tree it could build from the rest of the string.

use crate::analyzer::{self, AnalyzeMode};
use crate::query::Query;
use crate::schema::{FieldType, Schema};
use crate::Error;

/// A configured parser: which field unattached words/clauses fall back to,
/// and (optionally) the schema used to resolve each field's analyzer and
/// whether it self-parses (spec §4.9: "self-parsing fields get the raw
/// substring").
pub struct QueryParser {
    default_field: String,
}

impl QueryParser {
    pub fn new(default_field: impl Into<String>) -> Self {
        QueryParser { default_field: default_field.into() }
    }

    /// Parse without schema awareness: every field is assumed analyzed text
    /// (the "standard" analyzer), none self-parsing.
    pub fn parse(&self, text: &str) -> Query {
        self.parse_with_schema(text, None)
    }

    /// Parse with a schema available, so fielded clauses against
    /// self-parsing fields (`Numeric`/`Datetime`) skip analysis and clauses
    /// against `Text`/`Keyword` fields use their configured analyzer.
    pub fn parse_with_schema(&self, text: &str, schema: Option<&Schema>) -> Query {
        let mut cursor = Cursor::new(text);
        let ctx = Ctx { default_field: &self.default_field, schema };
        match parse_or(&ctx, &mut cursor) {
            Ok(query) => query,
            Err(_) => Query::Null,
        }
    }
}

struct Ctx<'a> {
    default_field: &'a str,
    schema: Option<&'a Schema>,
}

impl<'a> Ctx<'a> {
    fn is_self_parsing(&self, field: &str) -> bool {
        self.schema.and_then(|s| s.lookup(field).ok()).map(|(_, ft)| ft.self_parsing()).unwrap_or(false)
    }

    fn analyzer_name(&self, field: &str) -> String {
        match self.schema.and_then(|s| s.lookup(field).ok()) {
            Some((_, FieldType::Text { analyzer, .. })) => analyzer.clone(),
            Some((_, FieldType::Keyword { .. })) => "keyword".to_string(),
            _ => "standard".to_string(),
        }
    }

    /// Case-fold a wildcard/prefix/range literal the same way the field's
    /// analyzer would, without running it through tokenization (which would
    /// split on `*`/`?`/`[`/`]` themselves). `simplify()` matches these
    /// bytes directly against the term dictionary, so this has to land on
    /// whatever indexing actually produced.
    fn normalize_literal(&self, field: &str, text: &str) -> String {
        if self.is_self_parsing(field) {
            text.to_string()
        } else {
            text.to_lowercase()
        }
    }

    fn leaf_for_word(&self, field: &str, raw: &str) -> Query {
        if self.is_self_parsing(field) {
            return Query::term(field, raw);
        }
        if let Some(star) = raw.rfind('*') {
            if star == raw.len() - 1 && !raw[..star].contains(['*', '?']) {
                return Query::Prefix { field: field.to_string(), prefix: self.normalize_literal(field, &raw[..star]) };
            }
            return Query::Wildcard { field: field.to_string(), pattern: self.normalize_literal(field, raw) };
        }
        if raw.contains('?') {
            return Query::Wildcard { field: field.to_string(), pattern: self.normalize_literal(field, raw) };
        }
        self.analyze_words(field, raw)
    }

    fn analyze_words(&self, field: &str, raw: &str) -> Query {
        let tokens = analyzer::by_name(&self.analyzer_name(field)).analyze(raw, AnalyzeMode::Query);
        match tokens.len() {
            0 => Query::Null,
            1 => Query::term(field, tokens.into_iter().next().unwrap().text),
            _ => Query::And(tokens.into_iter().map(|t| Query::term(field, t.text)).collect()),
        }
    }

    fn analyze_phrase(&self, field: &str, raw: &str, slop: u32) -> Query {
        if self.is_self_parsing(field) {
            return Query::term(field, raw);
        }
        let tokens = analyzer::by_name(&self.analyzer_name(field)).analyze(raw, AnalyzeMode::Query);
        let terms: Vec<String> = tokens.into_iter().map(|t| t.text).collect();
        match terms.len() {
            0 => Query::Null,
            1 => Query::term(field, terms.into_iter().next().unwrap()),
            _ => Query::Phrase { field: field.to_string(), terms, slop, ordered: true, boost: 1.0 },
        }
    }
}

fn parse_or(ctx: &Ctx, c: &mut Cursor) -> Result<Query, Error> {
    let mut clauses = vec![parse_and(ctx, c)?];
    loop {
        c.skip_ws();
        if c.eat_keyword("OR") {
            clauses.push(parse_and(ctx, c)?);
        } else {
            break;
        }
    }
    Ok(if clauses.len() == 1 { clauses.remove(0) } else { Query::Or(clauses) })
}

fn parse_and(ctx: &Ctx, c: &mut Cursor) -> Result<Query, Error> {
    let mut clauses = vec![parse_unary(ctx, c)?];
    loop {
        c.skip_ws();
        if c.eat_keyword("AND") {
            c.skip_ws();
            clauses.push(parse_unary(ctx, c)?);
            continue;
        }
        if c.at_end() || c.peek() == Some(')') || c.at_keyword("OR") {
            break;
        }
        // Juxtaposed clauses with no explicit operator combine with AND,
        // matching the grouping syntax's `(a b)` (spec §4.9).
        clauses.push(parse_unary(ctx, c)?);
    }
    Ok(if clauses.len() == 1 { clauses.remove(0) } else { Query::And(clauses) })
}

fn parse_unary(ctx: &Ctx, c: &mut Cursor) -> Result<Query, Error> {
    c.skip_ws();
    if c.eat_keyword("NOT") {
        c.skip_ws();
        return Ok(Query::Not(Box::new(parse_unary(ctx, c)?)));
    }
    if c.eat_char('-') {
        return Ok(Query::Not(Box::new(parse_unary(ctx, c)?)));
    }
    let primary = parse_primary(ctx, c)?;
    parse_boost(c, primary)
}

fn parse_boost(c: &mut Cursor, query: Query) -> Result<Query, Error> {
    if c.eat_char('^') {
        let boost = c.read_number().ok_or_else(|| Error::QueryParserError("expected a number after '^'".into()))?;
        Ok(Query::Boost { child: Box::new(query), boost })
    } else {
        Ok(query)
    }
}

fn parse_primary(ctx: &Ctx, c: &mut Cursor) -> Result<Query, Error> {
    c.skip_ws();
    if c.eat_char('(') {
        let inner = parse_or(ctx, c)?;
        c.skip_ws();
        c.expect_char(')')?;
        return Ok(inner);
    }
    let field = c.try_read_field_prefix().unwrap_or_else(|| ctx.default_field.to_string());
    parse_value(ctx, c, &field)
}

fn parse_value(ctx: &Ctx, c: &mut Cursor, field: &str) -> Result<Query, Error> {
    c.skip_ws();
    match c.peek() {
        Some('[') => parse_range(ctx, c, field),
        Some('"') => parse_quoted(ctx, c, field),
        _ => {
            let raw = c.read_bareword().ok_or_else(|| Error::QueryParserError("expected a term".into()))?;
            Ok(ctx.leaf_for_word(field, &raw))
        }
    }
}

fn parse_quoted(ctx: &Ctx, c: &mut Cursor, field: &str) -> Result<Query, Error> {
    c.expect_char('"')?;
    let raw = c.read_until('"')?;
    c.expect_char('"')?;
    let mut slop = 0u32;
    if c.eat_char('~') {
        slop = c.read_uint().ok_or_else(|| Error::QueryParserError("expected a slop count after '~'".into()))?;
    }
    Ok(ctx.analyze_phrase(field, &raw, slop))
}

fn parse_range(ctx: &Ctx, c: &mut Cursor, field: &str) -> Result<Query, Error> {
    c.expect_char('[')?;
    c.skip_ws();
    let lower = if c.at_keyword("TO") {
        None
    } else {
        Some(ctx.normalize_literal(field, &c.read_bareword().ok_or_else(|| Error::QueryParserError("expected range lower bound".into()))?))
    };
    c.skip_ws();
    if !c.eat_keyword("TO") {
        return Err(Error::QueryParserError("expected 'TO' in range".into()));
    }
    c.skip_ws();
    let upper = if c.peek() == Some(']') {
        None
    } else {
        Some(ctx.normalize_literal(field, &c.read_bareword().ok_or_else(|| Error::QueryParserError("expected range upper bound".into()))?))
    };
    c.skip_ws();
    c.expect_char(']')?;
    Ok(Query::TermRange { field: field.to_string(), lower, upper, include_lower: true, include_upper: true })
}

/// A `Vec<char>` cursor over the query string. Grounded in the teacher's
/// `lang.rs` cursor (peek/advance over a char vector rather than a byte
/// slice, so keyword matching doesn't have to worry about UTF-8 boundaries).
struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Cursor { chars: text.chars().collect(), pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat_char(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, ch: char) -> Result<(), Error> {
        if self.eat_char(ch) {
            Ok(())
        } else {
            Err(Error::QueryParserError(format!("expected '{}'", ch)))
        }
    }

    /// Whether `kw` matches at the cursor, bounded so `TOx` doesn't match
    /// `TO`. Never consumes.
    fn at_keyword(&self, kw: &str) -> bool {
        let kw_chars: Vec<char> = kw.chars().collect();
        if self.pos + kw_chars.len() > self.chars.len() {
            return false;
        }
        if self.chars[self.pos..self.pos + kw_chars.len()] != kw_chars[..] {
            return false;
        }
        match self.chars.get(self.pos + kw_chars.len()) {
            Some(c) => !(c.is_alphanumeric() || *c == '_'),
            None => true,
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += kw.chars().count();
            true
        } else {
            false
        }
    }

    fn read_identifier(&mut self) -> Option<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.' || c == '-') {
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    /// Recognizes `field:` immediately followed (no space) by a value, per
    /// spec §4.9's "fielded prefix" tagger. Restores position on failure.
    fn try_read_field_prefix(&mut self) -> Option<String> {
        let save = self.pos;
        if let Some(ident) = self.read_identifier() {
            if self.peek() == Some(':') {
                self.pos += 1;
                return Some(ident);
            }
        }
        self.pos = save;
        None
    }

    fn read_bareword(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '"' | '^' | '[' | ']') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    fn read_until(&mut self, stop: char) -> Result<String, Error> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == stop {
                break;
            }
            self.pos += 1;
        }
        if self.peek() != Some(stop) {
            return Err(Error::QueryParserError("unterminated quoted string".into()));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn read_number(&mut self) -> Option<f32> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut seen_digit = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
            seen_digit = true;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
                seen_digit = true;
            }
        }
        if !seen_digit {
            self.pos = start;
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }

    fn read_uint(&mut self) -> Option<u32> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s6_parses_to_the_expected_tree() {
        let parser = QueryParser::new("body");
        let parsed = parser.parse(r#"title:"hello world"^2 AND (body:foo OR -body:bar)"#).normalize();
        let expected = Query::And(vec![
            Query::Phrase { field: "title".into(), terms: vec!["hello".into(), "world".into()], slop: 0, ordered: true, boost: 2.0 },
            Query::Or(vec![Query::term("body", "foo"), Query::Not(Box::new(Query::term("body", "bar")))]),
        ]);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn unattached_words_use_default_field() {
        let parser = QueryParser::new("body");
        let parsed = parser.parse("hello world").normalize();
        assert_eq!(parsed, Query::And(vec![Query::term("body", "hello"), Query::term("body", "world")]));
    }

    #[test]
    fn bare_prefix_and_wildcard() {
        let parser = QueryParser::new("body");
        assert_eq!(parser.parse("run*"), Query::Prefix { field: "body".into(), prefix: "run".into() });
        assert_eq!(parser.parse("r?n"), Query::Wildcard { field: "body".into(), pattern: "r?n".into() });
    }

    #[test]
    fn numeric_range_query() {
        let parser = QueryParser::new("body");
        let parsed = parser.parse("price:[10 TO 20]");
        assert_eq!(
            parsed,
            Query::TermRange { field: "price".into(), lower: Some("10".into()), upper: Some("20".into()), include_lower: true, include_upper: true }
        );
    }

    #[test]
    fn malformed_clause_degrades_to_null() {
        let parser = QueryParser::new("body");
        assert_eq!(parser.parse("(unclosed"), Query::Null);
    }

    #[test]
    fn self_parsing_field_gets_raw_substring() {
        let mut schema = Schema::new();
        schema.add_field("year", FieldType::Numeric { stored: true, kind: crate::schema::NumericKind::Int, sortable: true }).unwrap();
        let parser = QueryParser::new("body");
        let parsed = parser.parse_with_schema("year:2024", Some(&schema));
        assert_eq!(parsed, Query::term("year", "2024"));
    }
}
