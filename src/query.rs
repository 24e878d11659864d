//! The query tree (spec §4.8): leaves, compounds, wrappers, spans. Built by
//! a `QueryParser` or directly by a caller; `normalize()` simplifies
//! structure, `matcher()` lowers a (possibly unsimplified) tree into a
//! `Box<dyn Matcher>` against one segment. Grounded in the teacher's
//! `movement::MoverType`, which played the same "tagged variant with a
//! `create_*` builder per kind" role for Galago's much smaller query
//! language; generalized here into the open set spec §4.8 names, with
//! `normalize`/`simplify` added since Galago's parser did neither.

use crate::io::Bytes;
use crate::matching::{self, Matcher};
use crate::schema::{FieldId, Schema};
use crate::scoring::{Model, TermStats};
use crate::segment::Segment;
use crate::{DocId, Error};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Null,
    Term {
        field: String,
        text: String,
        boost: f32,
    },
    Phrase {
        field: String,
        terms: Vec<String>,
        slop: u32,
        ordered: bool,
        boost: f32,
    },
    Prefix {
        field: String,
        prefix: String,
    },
    Wildcard {
        field: String,
        pattern: String,
    },
    TermRange {
        field: String,
        lower: Option<String>,
        upper: Option<String>,
        include_lower: bool,
        include_upper: bool,
    },
    /// A single term matched by its already-encoded term bytes rather than
    /// a literal to be re-encoded through `FieldType::to_termbytes`. Used
    /// internally by `simplify()`'s `Prefix`/`Wildcard`/`TermRange`
    /// expansion, since those dictionary scans hand back raw termbytes that
    /// may not round-trip through a field's own literal parser (a numeric
    /// field's `to_termbytes` expects a decimal literal, not its own
    /// sortable byte encoding).
    RawTerm {
        field: String,
        term: Vec<u8>,
        boost: f32,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    AndNot {
        positive: Box<Query>,
        negative: Box<Query>,
    },
    AndMaybe {
        required: Box<Query>,
        optional: Box<Query>,
    },
    Require {
        a: Box<Query>,
        b: Box<Query>,
    },
    DisjunctionMax {
        children: Vec<Query>,
        tie_breaker: f32,
    },
    Boost {
        child: Box<Query>,
        boost: f32,
    },
    SpanFirst {
        child: Box<Query>,
        limit: u32,
    },
    SpanNot {
        include: Box<Query>,
        exclude: Box<Query>,
    },
    SpanContains {
        outer: Box<Query>,
        inner: Box<Query>,
    },
}

impl Query {
    pub fn term(field: impl Into<String>, text: impl Into<String>) -> Query {
        Query::Term { field: field.into(), text: text.into(), boost: 1.0 }
    }

    pub fn phrase(field: impl Into<String>, terms: Vec<String>) -> Query {
        Query::Phrase { field: field.into(), terms, slop: 0, ordered: true, boost: 1.0 }
    }

    /// Direct children, for `accept`/`apply`-style tree walks.
    pub fn children(&self) -> Vec<&Query> {
        match self {
            Query::Null
            | Query::Term { .. }
            | Query::Phrase { .. }
            | Query::Prefix { .. }
            | Query::Wildcard { .. }
            | Query::TermRange { .. }
            | Query::RawTerm { .. } => Vec::new(),
            Query::And(children) | Query::Or(children) => children.iter().collect(),
            Query::Not(child) | Query::Boost { child, .. } | Query::SpanFirst { child, .. } => vec![child.as_ref()],
            Query::AndNot { positive, negative } => vec![positive.as_ref(), negative.as_ref()],
            Query::AndMaybe { required, optional } => vec![required.as_ref(), optional.as_ref()],
            Query::Require { a, b } => vec![a.as_ref(), b.as_ref()],
            Query::DisjunctionMax { children, .. } => children.iter().collect(),
            Query::SpanNot { include, exclude } => vec![include.as_ref(), exclude.as_ref()],
            Query::SpanContains { outer, inner } => vec![outer.as_ref(), inner.as_ref()],
        }
    }

    /// Rebuild this node with every child replaced by `f(child)` (spec
    /// §4.8's `apply`); leaves are returned unchanged.
    pub fn apply(&self, f: &mut impl FnMut(&Query) -> Query) -> Query {
        match self {
            Query::Null
            | Query::Term { .. }
            | Query::Phrase { .. }
            | Query::Prefix { .. }
            | Query::Wildcard { .. }
            | Query::TermRange { .. }
            | Query::RawTerm { .. } => self.clone(),
            Query::And(children) => Query::And(children.iter().map(|c| f(c)).collect()),
            Query::Or(children) => Query::Or(children.iter().map(|c| f(c)).collect()),
            Query::Not(child) => Query::Not(Box::new(f(child))),
            Query::Boost { child, boost } => Query::Boost { child: Box::new(f(child)), boost: *boost },
            Query::SpanFirst { child, limit } => Query::SpanFirst { child: Box::new(f(child)), limit: *limit },
            Query::AndNot { positive, negative } => Query::AndNot { positive: Box::new(f(positive)), negative: Box::new(f(negative)) },
            Query::AndMaybe { required, optional } => Query::AndMaybe { required: Box::new(f(required)), optional: Box::new(f(optional)) },
            Query::Require { a, b } => Query::Require { a: Box::new(f(a)), b: Box::new(f(b)) },
            Query::DisjunctionMax { children, tie_breaker } => {
                Query::DisjunctionMax { children: children.iter().map(|c| f(c)).collect(), tie_breaker: *tie_breaker }
            }
            Query::SpanNot { include, exclude } => Query::SpanNot { include: Box::new(f(include)), exclude: Box::new(f(exclude)) },
            Query::SpanContains { outer, inner } => Query::SpanContains { outer: Box::new(f(outer)), inner: Box::new(f(inner)) },
        }
    }

    /// Visit every node in this subtree, preorder.
    pub fn accept(&self, visitor: &mut impl FnMut(&Query)) {
        visitor(self);
        for child in self.children() {
            child.accept(visitor);
        }
    }

    /// An upper bound on the number of documents this query can match in
    /// `segment`, without building a matcher (spec §4.8's `estimate_size`).
    pub fn estimate_size(&self, segment: &Segment, schema: &Schema) -> u64 {
        match self {
            Query::Null => 0,
            Query::Term { field, text, .. } => term_info_for(segment, schema, field, text).map(|i| i.doc_frequency).unwrap_or(0),
            Query::Phrase { field, terms, .. } => terms
                .iter()
                .filter_map(|t| term_info_for(segment, schema, field, t))
                .map(|i| i.doc_frequency)
                .min()
                .unwrap_or(0),
            Query::Prefix { .. } | Query::Wildcard { .. } | Query::TermRange { .. } => segment.total_doc_count as u64,
            Query::RawTerm { field, term, .. } => schema
                .field_id(field)
                .and_then(|id| segment.term_info(id, term).ok().flatten())
                .map(|i| i.doc_frequency)
                .unwrap_or(0),
            Query::And(children) => children.iter().map(|c| c.estimate_size(segment, schema)).min().unwrap_or(0),
            Query::Or(children) | Query::DisjunctionMax { children, .. } => {
                children.iter().map(|c| c.estimate_size(segment, schema)).sum::<u64>().min(segment.total_doc_count as u64)
            }
            Query::Not(child) => (segment.total_doc_count as u64).saturating_sub(child.estimate_size(segment, schema)),
            Query::AndNot { positive, .. } => positive.estimate_size(segment, schema),
            Query::AndMaybe { required, .. } => required.estimate_size(segment, schema),
            Query::Require { a, b } => a.estimate_size(segment, schema).min(b.estimate_size(segment, schema)),
            Query::Boost { child, .. } => child.estimate_size(segment, schema),
            Query::SpanFirst { child, .. } => child.estimate_size(segment, schema),
            Query::SpanNot { include, .. } => include.estimate_size(segment, schema),
            Query::SpanContains { outer, .. } => outer.estimate_size(segment, schema),
        }
    }

    /// Structural simplification, independent of any segment (spec §4.8):
    /// flatten nested same-kind compounds, collapse single-child compounds,
    /// drop `Null`, dedup identical children, fold `Boost` into a leaf's own
    /// boost field. Merging overlapping `TermRange`s inside an `Or` needs a
    /// schema to compare bounds correctly, so that happens in `simplify()`.
    pub fn normalize(&self) -> Query {
        match self {
            Query::And(children) => {
                let flat = flatten(children, |c| matches!(c, Query::And(_)), |c| match c {
                    Query::And(cs) => cs.clone(),
                    other => vec![other.clone()],
                });
                let mut normalized: Vec<Query> = flat.iter().map(Query::normalize).collect();
                if normalized.iter().any(|c| matches!(c, Query::Null)) {
                    return Query::Null;
                }
                dedup(&mut normalized);
                collapse_single(Query::And(normalized))
            }
            Query::Or(children) => {
                let flat = flatten(children, |c| matches!(c, Query::Or(_)), |c| match c {
                    Query::Or(cs) => cs.clone(),
                    other => vec![other.clone()],
                });
                let mut normalized: Vec<Query> = flat.iter().map(Query::normalize).filter(|c| !matches!(c, Query::Null)).collect();
                dedup(&mut normalized);
                // TermRange merging needs the field's schema to compare bounds
                // correctly (see `merge_overlapping_ranges`), so it happens in
                // `simplify()` instead of here, where `normalize()` has no
                // schema to consult.
                collapse_single(Query::Or(normalized))
            }
            Query::Boost { child, boost } => {
                let child = child.normalize();
                match child {
                    Query::Term { field, text, boost: inner } => Query::Term { field, text, boost: inner * boost },
                    Query::Phrase { field, terms, slop, ordered, boost: inner } => {
                        Query::Phrase { field, terms, slop, ordered, boost: inner * boost }
                    }
                    Query::Boost { child: inner_child, boost: inner_boost } => {
                        Query::Boost { child: inner_child, boost: inner_boost * boost }
                    }
                    other if *boost == 1.0 => other,
                    other => Query::Boost { child: Box::new(other), boost: *boost },
                }
            }
            Query::Not(child) => Query::Not(Box::new(child.normalize())),
            Query::AndNot { positive, negative } => {
                Query::AndNot { positive: Box::new(positive.normalize()), negative: Box::new(negative.normalize()) }
            }
            Query::AndMaybe { required, optional } => {
                Query::AndMaybe { required: Box::new(required.normalize()), optional: Box::new(optional.normalize()) }
            }
            Query::Require { a, b } => Query::Require { a: Box::new(a.normalize()), b: Box::new(b.normalize()) },
            Query::DisjunctionMax { children, tie_breaker } => {
                Query::DisjunctionMax { children: children.iter().map(Query::normalize).collect(), tie_breaker: *tie_breaker }
            }
            Query::SpanFirst { child, limit } => Query::SpanFirst { child: Box::new(child.normalize()), limit: *limit },
            Query::SpanNot { include, exclude } => Query::SpanNot { include: Box::new(include.normalize()), exclude: Box::new(exclude.normalize()) },
            Query::SpanContains { outer, inner } => Query::SpanContains { outer: Box::new(outer.normalize()), inner: Box::new(inner.normalize()) },
            leaf => leaf.clone(),
        }
    }

    /// Schema-aware lowering against one segment (spec §4.8's `simplify`):
    /// `Prefix`/`Wildcard`/`TermRange` expand into an `Or` of `Term`s via
    /// the term dictionary; sibling `TermRange`s under an `Or` are merged
    /// first, using the field's own sortable byte encoding to compare
    /// bounds (see `merge_overlapping_ranges`). Everything else passes
    /// through unchanged (this crate treats `Phrase` itself as the final
    /// positional-matcher form rather than lowering it further into a
    /// separate span-query type).
    pub fn simplify(&self, segment: &Segment, schema: &Schema) -> Result<Query, Error> {
        match self {
            Query::Prefix { field, prefix } => {
                let field_id = schema.field_id(field).ok_or_else(|| Error::SchemaError(format!("unknown field: {}", field)))?;
                let pairs = segment.expand_prefix(field_id, prefix.as_bytes())?;
                Ok(terms_to_or(field, pairs))
            }
            Query::Wildcard { field, pattern } => {
                let field_id = schema.field_id(field).ok_or_else(|| Error::SchemaError(format!("unknown field: {}", field)))?;
                let literal_prefix: Vec<u8> = pattern.bytes().take_while(|b| *b != b'*' && *b != b'?').collect();
                let pairs = segment.expand_prefix(field_id, &literal_prefix)?;
                let matching: Vec<(Vec<u8>, crate::codec::termdict::TermInfo)> = pairs
                    .into_iter()
                    .filter(|(key, _)| glob_match(pattern.as_bytes(), key))
                    .collect();
                Ok(terms_to_or(field, matching))
            }
            Query::TermRange { field, lower, upper, include_lower, include_upper } => {
                let (field_id, field_type) = schema.lookup(field)?;
                let lower_bytes = lower.as_ref().map(|l| field_type.to_termbytes(l)).transpose()?;
                let upper_bytes = upper.as_ref().map(|u| field_type.to_termbytes(u)).transpose()?;
                let pairs = segment.expand_range(
                    field_id,
                    lower_bytes.as_ref().map(|b| b.as_bytes()),
                    upper_bytes.as_ref().map(|b| b.as_bytes()),
                    *include_lower,
                    *include_upper,
                )?;
                Ok(terms_to_or(field, pairs))
            }
            Query::And(children) => Ok(Query::And(children.iter().map(|c| c.simplify(segment, schema)).collect::<Result<_, _>>()?)),
            Query::Or(children) => {
                let mut merged = children.clone();
                merge_overlapping_ranges(&mut merged, schema)?;
                Ok(Query::Or(merged.iter().map(|c| c.simplify(segment, schema)).collect::<Result<_, _>>()?))
            }
            Query::Not(child) => Ok(Query::Not(Box::new(child.simplify(segment, schema)?))),
            Query::AndNot { positive, negative } => Ok(Query::AndNot {
                positive: Box::new(positive.simplify(segment, schema)?),
                negative: Box::new(negative.simplify(segment, schema)?),
            }),
            Query::AndMaybe { required, optional } => Ok(Query::AndMaybe {
                required: Box::new(required.simplify(segment, schema)?),
                optional: Box::new(optional.simplify(segment, schema)?),
            }),
            Query::Require { a, b } => Ok(Query::Require { a: Box::new(a.simplify(segment, schema)?), b: Box::new(b.simplify(segment, schema)?) }),
            Query::DisjunctionMax { children, tie_breaker } => Ok(Query::DisjunctionMax {
                children: children.iter().map(|c| c.simplify(segment, schema)).collect::<Result<_, _>>()?,
                tie_breaker: *tie_breaker,
            }),
            Query::Boost { child, boost } => Ok(Query::Boost { child: Box::new(child.simplify(segment, schema)?), boost: *boost }),
            Query::SpanFirst { child, limit } => Ok(Query::SpanFirst { child: Box::new(child.simplify(segment, schema)?), limit: *limit }),
            Query::SpanNot { include, exclude } => Ok(Query::SpanNot {
                include: Box::new(include.simplify(segment, schema)?),
                exclude: Box::new(exclude.simplify(segment, schema)?),
            }),
            Query::SpanContains { outer, inner } => {
                Ok(Query::SpanContains { outer: Box::new(outer.simplify(segment, schema)?), inner: Box::new(inner.simplify(segment, schema)?) })
            }
            leaf => Ok(leaf.clone()),
        }
    }

    /// Build a matcher for this query against one segment (spec §4.8's
    /// `matcher`); `Prefix`/`Wildcard`/`TermRange` are expanded on the fly
    /// if the caller hasn't already called `simplify`.
    pub fn matcher(&self, segment: &Arc<Segment>, schema: &Schema, model: Model) -> Result<Box<dyn Matcher>, Error> {
        match self {
            Query::Null => Ok(Box::new(matching::NullMatcher)),
            Query::Term { field, text, boost } => {
                let field_id = schema.field_id(field).ok_or_else(|| Error::SchemaError(format!("unknown field: {}", field)))?;
                let field_type = schema.field_type(field_id);
                let termbytes = field_type.to_termbytes(text)?;
                match segment.term_info(field_id, termbytes.as_bytes())? {
                    None => Ok(Box::new(matching::NullMatcher)),
                    Some(info) => {
                        let stats = term_stats(segment, field_id, &info);
                        let scorer = model.build(stats);
                        let reader = segment.posting_reader(schema, field_id, &info)?;
                        let m: Box<dyn Matcher> = Box::new(matching::TermMatcher::new(reader, scorer, &info));
                        Ok(boost_wrap(m, *boost))
                    }
                }
            }
            Query::Phrase { field, terms, slop, ordered, boost } => {
                let field_id = schema.field_id(field).ok_or_else(|| Error::SchemaError(format!("unknown field: {}", field)))?;
                let mut term_matchers = Vec::with_capacity(terms.len());
                for text in terms {
                    let field_type = schema.field_type(field_id);
                    let termbytes = field_type.to_termbytes(text)?;
                    match segment.term_info(field_id, termbytes.as_bytes())? {
                        None => return Ok(Box::new(matching::NullMatcher)),
                        Some(info) => {
                            let stats = term_stats(segment, field_id, &info);
                            let scorer = model.build(stats);
                            let reader = segment.posting_reader(schema, field_id, &info)?;
                            term_matchers.push(Box::new(matching::TermMatcher::new(reader, scorer, &info)) as Box<dyn Matcher>);
                        }
                    }
                }
                let m = matching::PhraseMatcher::new(term_matchers, *slop, *ordered)?;
                Ok(boost_wrap(m, *boost))
            }
            Query::Prefix { .. } | Query::Wildcard { .. } | Query::TermRange { .. } => self.simplify(segment, schema)?.matcher(segment, schema, model),
            Query::RawTerm { field, term, boost } => {
                let field_id = schema.field_id(field).ok_or_else(|| Error::SchemaError(format!("unknown field: {}", field)))?;
                match segment.term_info(field_id, term)? {
                    None => Ok(Box::new(matching::NullMatcher)),
                    Some(info) => {
                        let stats = term_stats(segment, field_id, &info);
                        let scorer = model.build(stats);
                        let reader = segment.posting_reader(schema, field_id, &info)?;
                        let m: Box<dyn Matcher> = Box::new(matching::TermMatcher::new(reader, scorer, &info));
                        Ok(boost_wrap(m, *boost))
                    }
                }
            }
            Query::And(children) => {
                let matchers = children.iter().map(|c| c.matcher(segment, schema, model)).collect::<Result<Vec<_>, _>>()?;
                Ok(matching::Intersection::new(matchers))
            }
            Query::Or(children) => {
                let matchers = children.iter().map(|c| c.matcher(segment, schema, model)).collect::<Result<Vec<_>, _>>()?;
                Ok(matching::Union::new(matchers))
            }
            Query::Not(child) => {
                let inner = child.matcher(segment, schema, model)?;
                let seg = segment.clone();
                Ok(matching::Inverse::new(inner, segment.total_doc_count, Box::new(move |doc: DocId| seg.is_deleted(doc))))
            }
            Query::AndNot { positive, negative } => {
                Ok(matching::AndNot::new(positive.matcher(segment, schema, model)?, negative.matcher(segment, schema, model)?))
            }
            Query::AndMaybe { required, optional } => {
                Ok(matching::AndMaybe::new(required.matcher(segment, schema, model)?, optional.matcher(segment, schema, model)?))
            }
            Query::Require { a, b } => Ok(matching::Require::new(a.matcher(segment, schema, model)?, b.matcher(segment, schema, model)?)),
            Query::DisjunctionMax { children, tie_breaker } => {
                let matchers = children.iter().map(|c| c.matcher(segment, schema, model)).collect::<Result<Vec<_>, _>>()?;
                Ok(matching::DisjunctionMax::new(matchers, *tie_breaker))
            }
            Query::Boost { child, boost } => Ok(boost_wrap(child.matcher(segment, schema, model)?, *boost)),
            Query::SpanFirst { child, limit } => Ok(matching::SpanFirst::new(child.matcher(segment, schema, model)?, *limit)),
            Query::SpanNot { include, exclude } => {
                Ok(matching::SpanNot::new(include.matcher(segment, schema, model)?, exclude.matcher(segment, schema, model)?))
            }
            Query::SpanContains { outer, inner } => {
                Ok(matching::SpanContains::new(outer.matcher(segment, schema, model)?, inner.matcher(segment, schema, model)?))
            }
        }
    }
}

fn boost_wrap(m: Box<dyn Matcher>, boost: f32) -> Box<dyn Matcher> {
    if (boost - 1.0).abs() < 1e-6 {
        m
    } else {
        matching::Wrapping::new(m, boost)
    }
}

fn term_info_for(segment: &Segment, schema: &Schema, field: &str, text: &str) -> Option<crate::codec::termdict::TermInfo> {
    let field_id = schema.field_id(field)?;
    let field_type = schema.field_type(field_id);
    let termbytes = field_type.to_termbytes(text).ok()?;
    segment.term_info(field_id, termbytes.as_bytes()).ok().flatten()
}

/// Per-segment term statistics (spec §4.7's `Weighting` inputs). Computed
/// against the segment at hand rather than corpus-wide aggregates, since a
/// matcher is always built one segment at a time; a multi-segment
/// `Searcher` may rescale externally if it wants true corpus IDF (see
/// DESIGN.md).
fn term_stats(segment: &Segment, field: FieldId, info: &crate::codec::termdict::TermInfo) -> TermStats {
    TermStats {
        doc_count: segment.total_doc_count as u64,
        doc_frequency: info.doc_frequency,
        average_length: segment.average_field_length(field),
    }
}

fn terms_to_or(field: &str, pairs: Vec<(Vec<u8>, crate::codec::termdict::TermInfo)>) -> Query {
    // Term bytes for range/prefix expansion aren't always a literal a
    // field's own parser would accept back (a numeric field's `to_termbytes`
    // expects a decimal string, not its own sortable byte encoding), so
    // these carry the already-resolved bytes through as `RawTerm` rather
    // than round-tripping through `Query::Term`'s `to_termbytes` call.
    Query::Or(pairs.into_iter().map(|(key, _)| Query::RawTerm { field: field.to_string(), term: key, boost: 1.0 }).collect())
}

fn flatten(children: &[Query], is_same_kind: impl Fn(&Query) -> bool, extract: impl Fn(&Query) -> Vec<Query>) -> Vec<Query> {
    let mut out = Vec::new();
    for child in children {
        if is_same_kind(child) {
            out.extend(extract(child));
        } else {
            out.push(child.clone());
        }
    }
    out
}

fn dedup(children: &mut Vec<Query>) {
    let mut seen: Vec<Query> = Vec::new();
    children.retain(|c| {
        if seen.contains(c) {
            false
        } else {
            seen.push(c.clone());
            true
        }
    });
}

fn collapse_single(q: Query) -> Query {
    match &q {
        Query::And(children) | Query::Or(children) if children.len() == 1 => children[0].clone(),
        Query::And(children) | Query::Or(children) if children.is_empty() => Query::Null,
        _ => q,
    }
}

/// Merge overlapping sibling `TermRange`s inside an `Or` (spec §4.8's
/// compound-normalization rule). Bounds are decimal literals for `Numeric`/
/// `Datetime` fields and arbitrary text for others, so comparing them as
/// `String`s would compare `"10"` as less than `"5"` and silently merge (or
/// fail to merge) ranges incorrectly; instead each bound is resolved through
/// the field's own `to_termbytes`, which is exactly the sortable-byte
/// encoding the term dictionary itself orders by. This is why the merge
/// happens in schema-aware `simplify()` rather than schema-blind
/// `normalize()`.
fn merge_overlapping_ranges(children: &mut Vec<Query>, schema: &Schema) -> Result<(), Error> {
    let mut i = 0;
    while i < children.len() {
        let mut j = i + 1;
        let mut merged = false;
        while j < children.len() {
            if let (
                Query::TermRange { field: f1, lower: l1, upper: u1, include_lower: il1, include_upper: iu1 },
                Query::TermRange { field: f2, lower: l2, upper: u2, include_lower: il2, include_upper: iu2 },
            ) = (&children[i].clone(), &children[j].clone())
            {
                if f1 == f2 {
                    let (_, field_type) = schema.lookup(f1)?;
                    let l1b = range_bound_bytes(field_type, l1)?;
                    let u1b = range_bound_bytes(field_type, u1)?;
                    let l2b = range_bound_bytes(field_type, l2)?;
                    let u2b = range_bound_bytes(field_type, u2)?;
                    if ranges_overlap(&l1b, &u1b, &l2b, &u2b) {
                        let lower = min_bound(l1, &l1b, l2, &l2b);
                        let upper = max_bound(u1, &u1b, u2, &u2b);
                        children[i] = Query::TermRange {
                            field: f1.clone(),
                            lower,
                            upper,
                            include_lower: *il1 || *il2,
                            include_upper: *iu1 || *iu2,
                        };
                        children.remove(j);
                        merged = true;
                        continue;
                    }
                }
            }
            j += 1;
        }
        if !merged {
            i += 1;
        }
    }
    Ok(())
}

fn range_bound_bytes(field_type: &crate::schema::FieldType, bound: &Option<String>) -> Result<Option<Bytes>, Error> {
    bound.as_ref().map(|s| field_type.to_termbytes(s)).transpose()
}

fn ranges_overlap(l1: &Option<Bytes>, u1: &Option<Bytes>, l2: &Option<Bytes>, u2: &Option<Bytes>) -> bool {
    let below = match (u1, l2) {
        (Some(u1), Some(l2)) => u1 < l2,
        _ => false,
    };
    let above = match (l1, u2) {
        (Some(l1), Some(u2)) => l1 > u2,
        _ => false,
    };
    !below && !above
}

fn min_bound(a_str: &Option<String>, a_bytes: &Option<Bytes>, b_str: &Option<String>, b_bytes: &Option<Bytes>) -> Option<String> {
    match (a_bytes, b_bytes) {
        (None, _) | (_, None) => None,
        (Some(a), Some(b)) => Some(if a <= b { a_str.clone().unwrap() } else { b_str.clone().unwrap() }),
    }
}
fn max_bound(a_str: &Option<String>, a_bytes: &Option<Bytes>, b_str: &Option<String>, b_bytes: &Option<Bytes>) -> Option<String> {
    match (a_bytes, b_bytes) {
        (None, _) | (_, None) => None,
        (Some(a), Some(b)) => Some(if a >= b { a_str.clone().unwrap() } else { b_str.clone().unwrap() }),
    }
}

/// Shell-style glob match (`*` = any run, `?` = one char) over raw bytes, for
/// `Wildcard` query expansion. Plain recursive backtracking; term dictionary
/// prefix expansion already bounds the candidate set to the literal prefix
/// before the first wildcard character, so the candidate list is small.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    fn go(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => go(&p[1..], t) || (!t.is_empty() && go(p, &t[1..])),
            Some(b'?') => !t.is_empty() && go(&p[1..], &t[1..]),
            Some(c) => t.first() == Some(c) && go(&p[1..], &t[1..]),
        }
    }
    go(pattern, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_of_single_child_collapses() {
        let q = Query::And(vec![Query::term("body", "alfa")]);
        assert_eq!(q.normalize(), Query::term("body", "alfa"));
    }

    #[test]
    fn nested_and_flattens() {
        let q = Query::And(vec![Query::And(vec![Query::term("a", "x"), Query::term("a", "y")]), Query::term("a", "z")]);
        assert_eq!(q.normalize(), Query::And(vec![Query::term("a", "x"), Query::term("a", "y"), Query::term("a", "z")]));
    }

    #[test]
    fn and_with_null_collapses_to_null() {
        let q = Query::And(vec![Query::term("a", "x"), Query::Null]);
        assert_eq!(q.normalize(), Query::Null);
    }

    #[test]
    fn or_drops_null_children() {
        let q = Query::Or(vec![Query::term("a", "x"), Query::Null, Query::term("a", "y")]);
        assert_eq!(q.normalize(), Query::Or(vec![Query::term("a", "x"), Query::term("a", "y")]));
    }

    #[test]
    fn duplicate_children_are_deduped() {
        let q = Query::And(vec![Query::term("a", "x"), Query::term("a", "x")]);
        assert_eq!(q.normalize(), Query::term("a", "x"));
    }

    #[test]
    fn boost_folds_into_term() {
        let q = Query::Boost { child: Box::new(Query::term("a", "x")), boost: 2.0 };
        assert_eq!(q.normalize(), Query::Term { field: "a".into(), text: "x".into(), boost: 2.0 });
    }

    #[test]
    fn boost_folds_into_phrase() {
        let q = Query::Boost { child: Box::new(Query::phrase("title", vec!["hello".into(), "world".into()])), boost: 2.0 };
        assert_eq!(
            q.normalize(),
            Query::Phrase { field: "title".into(), terms: vec!["hello".into(), "world".into()], slop: 0, ordered: true, boost: 2.0 }
        );
    }

    #[test]
    fn scenario_s6_parser_round_trip_shape() {
        let parsed = Query::And(vec![
            Query::Boost { child: Box::new(Query::phrase("title", vec!["hello".into(), "world".into()])), boost: 2.0 },
            Query::Or(vec![Query::term("body", "foo"), Query::Not(Box::new(Query::term("body", "bar")))]),
        ]);
        let expected = Query::And(vec![
            Query::Phrase { field: "title".into(), terms: vec!["hello".into(), "world".into()], slop: 0, ordered: true, boost: 2.0 },
            Query::Or(vec![Query::term("body", "foo"), Query::Not(Box::new(Query::term("body", "bar")))]),
        ]);
        assert_eq!(parsed.normalize(), expected);
    }

    #[test]
    fn overlapping_ranges_merge() {
        // Text-field bounds: lexicographic `String` order and `to_termbytes`
        // order agree, so merging is straightforward.
        let mut schema = Schema::new();
        schema.add_field("n", crate::schema::FieldType::Text { stored: false, indexed_form: crate::IndexedForm::docs_only(), analyzer: "keyword".into() }).unwrap();

        let a = Query::TermRange { field: "n".into(), lower: Some("1".into()), upper: Some("10".into()), include_lower: true, include_upper: true };
        let b = Query::TermRange { field: "n".into(), lower: Some("5".into()), upper: Some("20".into()), include_lower: true, include_upper: true };
        let mut children = vec![a, b];
        merge_overlapping_ranges(&mut children, &schema).unwrap();
        assert_eq!(
            children,
            vec![Query::TermRange { field: "n".into(), lower: Some("1".into()), upper: Some("20".into()), include_lower: true, include_upper: true }]
        );
    }

    /// Regression test for the bug report: `n:[1 TO 5] OR n:[10 TO 20]` over
    /// a sortable numeric field must NOT merge, because `"5" < "10"`
    /// lexicographically even though `5 < 10` numerically would make these
    /// ranges disjoint either way — the dangerous case is the reverse, where
    /// lexicographic order disagrees with numeric order and a real overlap
    /// or non-overlap gets misjudged. `to_termbytes`'s sortable encoding
    /// must be consulted, not the literal decimal strings.
    #[test]
    fn numeric_ranges_merge_by_numeric_order_not_lexicographic_order() {
        let mut schema = Schema::new();
        schema.add_field("n", crate::schema::FieldType::Numeric { stored: false, kind: crate::schema::NumericKind::Int, sortable: true }).unwrap();

        // "5" < "10" lexicographically, but 5 < 10 numerically too, so a
        // lexicographic comparison happens to get this pair right. The
        // field-aware path must also get it right via sortable bytes.
        let disjoint_a = Query::TermRange { field: "n".into(), lower: Some("1".into()), upper: Some("5".into()), include_lower: true, include_upper: true };
        let disjoint_b = Query::TermRange { field: "n".into(), lower: Some("10".into()), upper: Some("20".into()), include_lower: true, include_upper: true };
        let mut children = vec![disjoint_a.clone(), disjoint_b.clone()];
        merge_overlapping_ranges(&mut children, &schema).unwrap();
        assert_eq!(children, vec![disjoint_a, disjoint_b], "disjoint numeric ranges must not be merged");

        // A pair where lexicographic order of the literals is inverted
        // relative to numeric order: "9" > "10" as strings but 9 < 10 as
        // numbers. These two ranges are numerically overlap-free (5..9 and
        // 10..20 are disjoint); a lexicographic comparator would see
        // upper="9" > lower="10" as false (since "9" > "10"), incorrectly
        // calling them overlapping.
        let a = Query::TermRange { field: "n".into(), lower: Some("5".into()), upper: Some("9".into()), include_lower: true, include_upper: true };
        let b = Query::TermRange { field: "n".into(), lower: Some("10".into()), upper: Some("20".into()), include_lower: true, include_upper: true };
        let mut children = vec![a.clone(), b.clone()];
        merge_overlapping_ranges(&mut children, &schema).unwrap();
        assert_eq!(children, vec![a, b], "numerically disjoint ranges must not merge despite inverted lexicographic order");

        // A genuinely overlapping pair, to confirm merging still happens
        // when it should.
        let c = Query::TermRange { field: "n".into(), lower: Some("1".into()), upper: Some("15".into()), include_lower: true, include_upper: true };
        let d = Query::TermRange { field: "n".into(), lower: Some("10".into()), upper: Some("20".into()), include_lower: true, include_upper: true };
        let mut children = vec![c, d];
        merge_overlapping_ranges(&mut children, &schema).unwrap();
        assert_eq!(
            children,
            vec![Query::TermRange { field: "n".into(), lower: Some("1".into()), upper: Some("20".into()), include_lower: true, include_upper: true }]
        );
    }

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match(b"ca?", b"car"));
        assert!(glob_match(b"c*t", b"cart"));
        assert!(!glob_match(b"c*t", b"card"));
    }
}
