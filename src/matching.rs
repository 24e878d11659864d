//! The matcher algebra (spec §4.6): a `Matcher` is a stateful cursor over
//! the docids one query (sub)tree produces. Grounded in the teacher's
//! `galago_postings.rs` (`PositionsPostingsIter`/`LengthsPostingsIter`,
//! external-iteration cursors with `sync_to`/`current_document`) for the
//! cursor shape, and in `movement::MoverType::create_and`/`create_or` for
//! flattening trivial compound cases; generalized from Galago's closed
//! `MoverType` enum into the open `Matcher` trait spec §9 calls for, with
//! `Box<dyn Matcher>` children instead of reference-juggling.

use crate::codec::posting::PostingReader;
use crate::codec::termdict::TermInfo;
use crate::scoring::Scorer;
use crate::{DocId, Error};

/// A positional interval associated with a match (spec Glossary: Span).
pub type Span = (u32, u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Feature {
    Positions,
    Chars,
    Payloads,
    Spans,
}

/// Stateful cursor over the docids a (sub)query produces (spec §4.6).
pub trait Matcher: Send {
    fn is_active(&self) -> bool;
    fn id(&self) -> DocId;
    fn next(&mut self) -> Result<(), Error>;
    /// Advance to the first id `>= target`. Implementors must satisfy
    /// `id() >= target || !is_active()` afterward (spec §8 property 3).
    fn skip_to(&mut self, target: DocId) -> Result<(), Error>;
    fn score(&mut self) -> f32;
    fn supports(&self, _feature: Feature) -> bool {
        false
    }
    fn spans(&mut self) -> Result<Vec<Span>, Error> {
        Err(Error::UnsupportedFeature("spans"))
    }
    /// Upper bound on the score of any doc this matcher could ever produce.
    fn max_quality(&self) -> f32 {
        f32::INFINITY
    }
    /// Upper bound on the score of any doc in whatever block-granularity
    /// unit the matcher currently has decoded (spec §4.2/§4.6).
    fn block_quality(&self) -> f32 {
        self.max_quality()
    }
    /// Advance past whole blocks/children until the matcher could plausibly
    /// produce a doc scoring above `min_quality`, or becomes inactive (spec
    /// §8 property 4: never drop a hit that could score above `min_quality`).
    fn skip_to_quality(&mut self, _min_quality: f32) -> Result<(), Error> {
        Ok(())
    }
    /// Return a (possibly simpler) equivalent matcher once some subtree has
    /// been proved irrelevant at `min_quality` (spec §4.6's `replace`).
    fn replace(self: Box<Self>, _min_quality: f32) -> Box<dyn Matcher>
    where
        Self: Sized + 'static,
    {
        self
    }
}

/// Always inactive; the identity element `replace` swaps subtrees down to
/// when a branch can no longer contribute (spec §9's "internal swapping to
/// `NullMatcher`").
pub struct NullMatcher;
impl Matcher for NullMatcher {
    fn is_active(&self) -> bool {
        false
    }
    fn id(&self) -> DocId {
        DocId::no_more()
    }
    fn next(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn skip_to(&mut self, _target: DocId) -> Result<(), Error> {
        Ok(())
    }
    fn score(&mut self) -> f32 {
        0.0
    }
    fn max_quality(&self) -> f32 {
        0.0
    }
}

/// A single term's posting list, driving a `Scorer`.
pub struct TermMatcher {
    reader: PostingReader,
    scorer: Box<dyn Scorer>,
    idf_for_blocks: f32,
}

impl TermMatcher {
    pub fn new(reader: PostingReader, scorer: Box<dyn Scorer>, _info: &TermInfo) -> Self {
        let idf_for_blocks = scorer.block_multiplier();
        TermMatcher { reader, scorer, idf_for_blocks }
    }
}

impl Matcher for TermMatcher {
    fn is_active(&self) -> bool {
        self.reader.is_active()
    }
    fn id(&self) -> DocId {
        self.reader.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.reader.next()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.reader.skip_to(target)
    }
    fn score(&mut self) -> f32 {
        self.scorer.score(self.reader.weight(), self.reader.length())
    }
    fn supports(&self, feature: Feature) -> bool {
        matches!(feature, Feature::Positions | Feature::Chars | Feature::Payloads | Feature::Spans)
            && self.reader.positions().is_ok()
    }
    fn spans(&mut self) -> Result<Vec<Span>, Error> {
        Ok(self.reader.positions()?.iter().map(|p| (*p, *p)).collect())
    }
    fn max_quality(&self) -> f32 {
        self.scorer.max_quality(f32::MAX, 1)
    }
    fn block_quality(&self) -> f32 {
        self.reader.block_quality(self.idf_for_blocks)
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<(), Error> {
        self.reader.skip_to_quality(min_quality, self.idf_for_blocks)
    }
}

fn min_active_id(children: &[Box<dyn Matcher>]) -> DocId {
    children.iter().filter(|c| c.is_active()).map(|c| c.id()).min().unwrap_or_else(DocId::no_more)
}

/// Docids present in every child (spec §4.6 `Intersection`). Built as a
/// binary tree by `build_balanced` for branching factor > 2.
pub struct Intersection {
    children: Vec<Box<dyn Matcher>>,
}

impl Intersection {
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Box<dyn Matcher> {
        build_balanced(children, |a, b| Box::new(Intersection { children: vec![a, b] }), || Box::new(NullMatcher))
    }

    fn settle(&mut self) -> Result<(), Error> {
        loop {
            if self.children.iter().any(|c| !c.is_active()) {
                return Ok(());
            }
            let target = self.children.iter().map(|c| c.id()).max().unwrap();
            let min = self.children.iter().map(|c| c.id()).min().unwrap();
            if target == min {
                return Ok(());
            }
            for c in self.children.iter_mut() {
                if c.id() < target {
                    c.skip_to(target)?;
                }
            }
        }
    }
}

impl Matcher for Intersection {
    fn is_active(&self) -> bool {
        self.children.iter().all(|c| c.is_active())
    }
    fn id(&self) -> DocId {
        if self.is_active() {
            self.children.iter().map(|c| c.id()).max().unwrap()
        } else {
            DocId::no_more()
        }
    }
    fn next(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Ok(());
        }
        self.children[0].next()?;
        self.settle()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        for c in self.children.iter_mut() {
            c.skip_to(target)?;
        }
        self.settle()
    }
    fn score(&mut self) -> f32 {
        self.children.iter_mut().map(|c| c.score()).sum()
    }
    fn max_quality(&self) -> f32 {
        self.children.iter().map(|c| c.max_quality()).fold(f32::INFINITY, f32::min)
    }
    fn block_quality(&self) -> f32 {
        self.children.iter().map(|c| c.block_quality()).fold(f32::INFINITY, f32::min)
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<(), Error> {
        // Advance the child with the smallest block quality first, since
        // it's the one most likely to be able to skip whole blocks (spec
        // §4.6: "intersection advances the child whose block_quality is
        // smallest").
        loop {
            let Some((idx, _)) = self
                .children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_active())
                .min_by(|a, b| a.1.block_quality().partial_cmp(&b.1.block_quality()).unwrap())
            else {
                return Ok(());
            };
            if self.block_quality() > min_quality || !self.children[idx].is_active() {
                break;
            }
            self.children[idx].skip_to_quality(min_quality)?;
            if !self.children[idx].is_active() {
                break;
            }
        }
        self.settle()
    }
}

/// Sorted-merge union, deduplicated by docid (spec §4.6 `Union`).
pub struct Union {
    children: Vec<Box<dyn Matcher>>,
}

impl Union {
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Box<dyn Matcher> {
        build_balanced(children, |a, b| Box::new(Union { children: vec![a, b] }), || Box::new(NullMatcher))
    }
}

impl Matcher for Union {
    fn is_active(&self) -> bool {
        self.children.iter().any(|c| c.is_active())
    }
    fn id(&self) -> DocId {
        min_active_id(&self.children)
    }
    fn next(&mut self) -> Result<(), Error> {
        let current = self.id();
        if current.is_done() {
            return Ok(());
        }
        for c in self.children.iter_mut() {
            if c.is_active() && c.id() == current {
                c.next()?;
            }
        }
        Ok(())
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        for c in self.children.iter_mut() {
            if c.is_active() && c.id() < target {
                c.skip_to(target)?;
            }
        }
        Ok(())
    }
    fn score(&mut self) -> f32 {
        let current = self.id();
        self.children.iter_mut().filter(|c| c.is_active() && c.id() == current).map(|c| c.score()).sum()
    }
    fn max_quality(&self) -> f32 {
        self.children.iter().map(|c| c.max_quality()).fold(0.0, f32::max)
    }
    fn block_quality(&self) -> f32 {
        self.children.iter().filter(|c| c.is_active()).map(|c| c.block_quality()).fold(0.0, f32::max)
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<(), Error> {
        // Drop children whose max_quality can't clear the bar; advance the
        // survivors' blocks toward the threshold too (spec §4.6: "union may
        // drop children whose max_quality is below the threshold").
        for c in self.children.iter_mut() {
            if c.is_active() && c.max_quality() >= min_quality {
                c.skip_to_quality(min_quality)?;
            } else if c.is_active() {
                c.skip_to(DocId::no_more())?;
            }
        }
        Ok(())
    }
}

/// `pos - neg` (spec §4.6 `AndNot`): docids from `pos` that `neg` doesn't
/// also match.
pub struct AndNot {
    pos: Box<dyn Matcher>,
    neg: Box<dyn Matcher>,
}
impl AndNot {
    pub fn new(pos: Box<dyn Matcher>, neg: Box<dyn Matcher>) -> Box<dyn Matcher> {
        Box::new(AndNot { pos, neg })
    }
    fn settle(&mut self) -> Result<(), Error> {
        while self.pos.is_active() && self.neg.is_active() {
            if self.neg.id() < self.pos.id() {
                self.neg.skip_to(self.pos.id())?;
            } else if self.neg.id() == self.pos.id() {
                self.pos.next()?;
            } else {
                break;
            }
        }
        Ok(())
    }
}
impl Matcher for AndNot {
    fn is_active(&self) -> bool {
        self.pos.is_active()
    }
    fn id(&self) -> DocId {
        self.pos.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.pos.next()?;
        self.settle()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.pos.skip_to(target)?;
        self.settle()
    }
    fn score(&mut self) -> f32 {
        self.pos.score()
    }
    fn max_quality(&self) -> f32 {
        self.pos.max_quality()
    }
    fn block_quality(&self) -> f32 {
        self.pos.block_quality()
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<(), Error> {
        self.pos.skip_to_quality(min_quality)?;
        self.settle()
    }
}

/// `req`'s docids, with `opt`'s score folded in when it also matches (spec
/// §4.6 `AndMaybe`).
pub struct AndMaybe {
    req: Box<dyn Matcher>,
    opt: Box<dyn Matcher>,
}
impl AndMaybe {
    pub fn new(req: Box<dyn Matcher>, opt: Box<dyn Matcher>) -> Box<dyn Matcher> {
        Box::new(AndMaybe { req, opt })
    }
}
impl Matcher for AndMaybe {
    fn is_active(&self) -> bool {
        self.req.is_active()
    }
    fn id(&self) -> DocId {
        self.req.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.req.next()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.req.skip_to(target)?;
        if self.opt.is_active() && self.opt.id() < self.req.id() {
            self.opt.skip_to(self.req.id())?;
        }
        Ok(())
    }
    fn score(&mut self) -> f32 {
        let id = self.req.id();
        let req_score = self.req.score();
        if self.opt.is_active() && self.opt.id() < id {
            let _ = self.opt.skip_to(id);
        }
        if self.opt.is_active() && self.opt.id() == id {
            req_score + self.opt.score()
        } else {
            req_score
        }
    }
    fn max_quality(&self) -> f32 {
        self.req.max_quality() + self.opt.max_quality()
    }
}

/// `a ∩ b`, scoring as `a` alone (spec §4.6 `Require`).
pub struct Require {
    a: Box<dyn Matcher>,
    b: Box<dyn Matcher>,
}
impl Require {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Box<dyn Matcher> {
        Box::new(Require { a, b })
    }
    fn settle(&mut self) -> Result<(), Error> {
        while self.a.is_active() && self.b.is_active() && self.a.id() != self.b.id() {
            let target = self.a.id().max(self.b.id());
            self.a.skip_to(target)?;
            self.b.skip_to(target)?;
        }
        Ok(())
    }
}
impl Matcher for Require {
    fn is_active(&self) -> bool {
        self.a.is_active() && self.b.is_active() && self.a.id() == self.b.id()
    }
    fn id(&self) -> DocId {
        self.a.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.a.next()?;
        self.settle()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.a.skip_to(target)?;
        self.b.skip_to(target)?;
        self.settle()
    }
    fn score(&mut self) -> f32 {
        self.a.score()
    }
    fn max_quality(&self) -> f32 {
        self.a.max_quality()
    }
}

/// Union of docids, scored by the best single child plus a fraction of the
/// rest (spec §4.6 `DisjunctionMax`).
pub struct DisjunctionMax {
    children: Vec<Box<dyn Matcher>>,
    tie_breaker: f32,
}
impl DisjunctionMax {
    pub fn new(children: Vec<Box<dyn Matcher>>, tie_breaker: f32) -> Box<dyn Matcher> {
        Box::new(DisjunctionMax { children, tie_breaker })
    }
}
impl Matcher for DisjunctionMax {
    fn is_active(&self) -> bool {
        self.children.iter().any(|c| c.is_active())
    }
    fn id(&self) -> DocId {
        min_active_id(&self.children)
    }
    fn next(&mut self) -> Result<(), Error> {
        let current = self.id();
        for c in self.children.iter_mut() {
            if c.is_active() && c.id() == current {
                c.next()?;
            }
        }
        Ok(())
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        for c in self.children.iter_mut() {
            if c.is_active() && c.id() < target {
                c.skip_to(target)?;
            }
        }
        Ok(())
    }
    fn score(&mut self) -> f32 {
        let current = self.id();
        let mut scores: Vec<f32> =
            self.children.iter_mut().filter(|c| c.is_active() && c.id() == current).map(|c| c.score()).collect();
        scores.sort_by(|a, b| b.partial_cmp(a).unwrap());
        match scores.split_first() {
            Some((best, rest)) => best + self.tie_breaker * rest.iter().sum::<f32>(),
            None => 0.0,
        }
    }
    fn max_quality(&self) -> f32 {
        self.children.iter().map(|c| c.max_quality()).fold(0.0, f32::max)
    }
}

/// Every docid in `[0, doc_count)` not matched by `child` and not deleted
/// (spec §4.6 `Inverse`); used for negating a clause within an unbounded
/// corpus (e.g. a bare `NOT term`).
pub struct Inverse {
    child: Box<dyn Matcher>,
    doc_count: u32,
    current: DocId,
    is_deleted: Box<dyn Fn(DocId) -> bool + Send>,
}
impl Inverse {
    pub fn new(child: Box<dyn Matcher>, doc_count: u32, is_deleted: Box<dyn Fn(DocId) -> bool + Send>) -> Box<dyn Matcher> {
        let mut m = Inverse { child, doc_count, current: DocId(0), is_deleted };
        let _ = m.advance_to_valid();
        Box::new(m)
    }
    fn child_matches(&self, doc: DocId) -> bool {
        self.child.id() == doc
    }
    fn advance_to_valid(&mut self) -> Result<(), Error> {
        loop {
            if self.current.0 >= self.doc_count {
                self.current = DocId::no_more();
                return Ok(());
            }
            if self.child.is_active() && self.child.id() < self.current {
                self.child.skip_to(self.current)?;
            }
            if self.child_matches(self.current) || (self.is_deleted)(self.current) {
                self.current = self.current.next();
                continue;
            }
            return Ok(());
        }
    }
}
impl Matcher for Inverse {
    fn is_active(&self) -> bool {
        !self.current.is_done()
    }
    fn id(&self) -> DocId {
        self.current
    }
    fn next(&mut self) -> Result<(), Error> {
        if self.current.is_done() {
            return Ok(());
        }
        self.current = self.current.next();
        self.advance_to_valid()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        if target > self.current {
            self.current = target;
        }
        self.advance_to_valid()
    }
    fn score(&mut self) -> f32 {
        1.0
    }
    fn max_quality(&self) -> f32 {
        1.0
    }
}

/// Passes `child`'s docids through unchanged but fixes the score to `s`
/// (spec §4.6 `Constant`).
pub struct Constant {
    child: Box<dyn Matcher>,
    value: f32,
}
impl Constant {
    pub fn new(child: Box<dyn Matcher>, value: f32) -> Box<dyn Matcher> {
        Box::new(Constant { child, value })
    }
}
impl Matcher for Constant {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn id(&self) -> DocId {
        self.child.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.child.skip_to(target)
    }
    fn score(&mut self) -> f32 {
        self.value
    }
    fn max_quality(&self) -> f32 {
        self.value
    }
    fn block_quality(&self) -> f32 {
        self.value
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<(), Error> {
        if self.value < min_quality {
            self.child.skip_to(DocId::no_more())?;
        }
        Ok(())
    }
}

/// Scales `child`'s score by `boost` (spec §4.6 `Wrapping`).
pub struct Wrapping {
    child: Box<dyn Matcher>,
    boost: f32,
}
impl Wrapping {
    pub fn new(child: Box<dyn Matcher>, boost: f32) -> Box<dyn Matcher> {
        Box::new(Wrapping { child, boost })
    }
}
impl Matcher for Wrapping {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn id(&self) -> DocId {
        self.child.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.child.skip_to(target)
    }
    fn score(&mut self) -> f32 {
        self.child.score() * self.boost
    }
    fn max_quality(&self) -> f32 {
        self.child.max_quality() * self.boost
    }
    fn block_quality(&self) -> f32 {
        self.child.block_quality() * self.boost
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<(), Error> {
        self.child.skip_to_quality(min_quality / self.boost.max(1e-6))
    }
}

/// All docids where the term matchers' positions satisfy ordering/slop
/// (spec §4.6 `Phrase`/`Near`; semantics per spec §9 Open Questions: a match
/// exists iff there are positions `p1 <= p2 <= ... <= pn` with
/// `p_i in positions(term_i)` and `p_{i+1} - p_i <= slop + 1`; if
/// `ordered == false`, the positions need not be in term order).
pub struct PhraseMatcher {
    terms: Vec<Box<dyn Matcher>>,
    slop: u32,
    ordered: bool,
    matched_spans: Vec<Span>,
}

impl PhraseMatcher {
    pub fn new(terms: Vec<Box<dyn Matcher>>, slop: u32, ordered: bool) -> Result<Box<dyn Matcher>, Error> {
        let mut m = PhraseMatcher { terms, slop, ordered, matched_spans: Vec::new() };
        m.settle()?;
        Ok(Box::new(m))
    }

    fn is_aligned(&self) -> bool {
        self.terms.iter().all(|t| t.is_active()) && {
            let first = self.terms[0].id();
            self.terms.iter().all(|t| t.id() == first)
        }
    }

    fn settle(&mut self) -> Result<(), Error> {
        loop {
            if self.terms.iter().any(|t| !t.is_active()) {
                self.matched_spans.clear();
                return Ok(());
            }
            let target = self.terms.iter().map(|t| t.id()).max().unwrap();
            for t in self.terms.iter_mut() {
                if t.id() < target {
                    t.skip_to(target)?;
                }
            }
            if !self.is_aligned() {
                continue;
            }
            self.matched_spans = self.find_spans()?;
            if !self.matched_spans.is_empty() {
                return Ok(());
            }
            self.terms[0].next()?;
        }
    }

    fn find_spans(&mut self) -> Result<Vec<Span>, Error> {
        let mut position_lists: Vec<Vec<u32>> = Vec::with_capacity(self.terms.len());
        for t in self.terms.iter_mut() {
            position_lists.push(t.spans()?.into_iter().map(|(s, _)| s).collect());
        }
        Ok(find_phrase_spans(&position_lists, self.slop, self.ordered))
    }
}

impl Matcher for PhraseMatcher {
    fn is_active(&self) -> bool {
        self.terms.iter().all(|t| t.is_active())
    }
    fn id(&self) -> DocId {
        if self.is_active() {
            self.terms[0].id()
        } else {
            DocId::no_more()
        }
    }
    fn next(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Ok(());
        }
        self.terms[0].next()?;
        self.settle()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        for t in self.terms.iter_mut() {
            t.skip_to(target)?;
        }
        self.settle()
    }
    fn score(&mut self) -> f32 {
        self.matched_spans.len() as f32
    }
    fn supports(&self, feature: Feature) -> bool {
        matches!(feature, Feature::Spans)
    }
    fn spans(&mut self) -> Result<Vec<Span>, Error> {
        Ok(self.matched_spans.clone())
    }
    fn max_quality(&self) -> f32 {
        f32::INFINITY
    }
}

/// Brute-force the ordering/slop condition from spec §9: positions
/// `p1 <= ... <= pn`, consecutive gaps `<= slop + 1`, term order respected
/// unless `ordered == false`. Implemented as DFS over small position lists
/// (phrase terms have few occurrences per doc in practice).
fn find_phrase_spans(position_lists: &[Vec<u32>], slop: u32, ordered: bool) -> Vec<Span> {
    if position_lists.iter().any(|l| l.is_empty()) {
        return Vec::new();
    }
    let mut spans = Vec::new();
    if ordered {
        for &start in &position_lists[0] {
            if let Some(end) = extend_ordered(position_lists, 1, start, slop) {
                spans.push((start, end));
            }
        }
    } else {
        // Try every assignment via permutation-free greedy DFS: pick any
        // remaining list's closest position to the running frontier.
        let n = position_lists.len();
        let mut used = vec![false; n];
        for start_list in 0..n {
            for &start in &position_lists[start_list] {
                used.iter_mut().for_each(|u| *u = false);
                used[start_list] = true;
                if let Some((lo, hi)) = extend_unordered(position_lists, &mut used, start, start, slop) {
                    spans.push((lo, hi));
                }
            }
        }
    }
    spans
}

fn extend_ordered(position_lists: &[Vec<u32>], idx: usize, prev: u32, slop: u32) -> Option<u32> {
    if idx >= position_lists.len() {
        return Some(prev);
    }
    for &p in &position_lists[idx] {
        if p >= prev && p.saturating_sub(prev) <= slop + 1 {
            if let Some(end) = extend_ordered(position_lists, idx + 1, p, slop) {
                return Some(end);
            }
        }
    }
    None
}

fn extend_unordered(position_lists: &[Vec<u32>], used: &mut [bool], lo: u32, hi: u32, slop: u32) -> Option<(u32, u32)> {
    if used.iter().all(|u| *u) {
        return Some((lo, hi));
    }
    for (i, list) in position_lists.iter().enumerate() {
        if used[i] {
            continue;
        }
        for &p in list {
            let new_lo = lo.min(p);
            let new_hi = hi.max(p);
            if new_hi - new_lo <= slop + (position_lists.len() as u32 - 1) {
                used[i] = true;
                if let Some(found) = extend_unordered(position_lists, used, new_lo, new_hi, slop) {
                    return Some(found);
                }
                used[i] = false;
            }
        }
    }
    None
}

/// `child`'s docids whose minimum span position is `<= limit` (spec §4.6
/// `SpanFirst`).
pub struct SpanFirst {
    child: Box<dyn Matcher>,
    limit: u32,
}
impl SpanFirst {
    pub fn new(child: Box<dyn Matcher>, limit: u32) -> Box<dyn Matcher> {
        Box::new(SpanFirst { child, limit })
    }
    fn matches_here(&mut self) -> bool {
        self.child.spans().map(|spans| spans.iter().any(|(s, _)| *s <= self.limit)).unwrap_or(false)
    }
}
impl Matcher for SpanFirst {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn id(&self) -> DocId {
        self.child.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()?;
        self.seek_match()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.child.skip_to(target)?;
        self.seek_match()
    }
    fn score(&mut self) -> f32 {
        self.child.score()
    }
    fn max_quality(&self) -> f32 {
        self.child.max_quality()
    }
}
impl SpanFirst {
    fn seek_match(&mut self) -> Result<(), Error> {
        while self.child.is_active() && !self.matches_here() {
            self.child.next()?;
        }
        Ok(())
    }
}

/// `include`'s docids minus those whose spans overlap an `exclude` span
/// (spec §4.6 `SpanNot`).
pub struct SpanNot {
    include: Box<dyn Matcher>,
    exclude: Box<dyn Matcher>,
}
impl SpanNot {
    pub fn new(include: Box<dyn Matcher>, exclude: Box<dyn Matcher>) -> Box<dyn Matcher> {
        Box::new(SpanNot { include, exclude })
    }
    fn overlaps_exclude(&mut self) -> Result<bool, Error> {
        if !self.exclude.is_active() || self.exclude.id() != self.include.id() {
            return Ok(false);
        }
        let include_spans = self.include.spans()?;
        let exclude_spans = self.exclude.spans()?;
        Ok(include_spans.iter().any(|(is, ie)| exclude_spans.iter().any(|(es, ee)| is <= ee && es <= ie)))
    }
    fn seek_match(&mut self) -> Result<(), Error> {
        loop {
            if !self.include.is_active() {
                return Ok(());
            }
            if self.exclude.is_active() && self.exclude.id() < self.include.id() {
                self.exclude.skip_to(self.include.id())?;
            }
            if self.overlaps_exclude()? {
                self.include.next()?;
                continue;
            }
            return Ok(());
        }
    }
}
impl Matcher for SpanNot {
    fn is_active(&self) -> bool {
        self.include.is_active()
    }
    fn id(&self) -> DocId {
        self.include.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.include.next()?;
        self.seek_match()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.include.skip_to(target)?;
        self.seek_match()
    }
    fn score(&mut self) -> f32 {
        self.include.score()
    }
    fn max_quality(&self) -> f32 {
        self.include.max_quality()
    }
}

/// `outer`'s docids whose spans contain at least one `inner` span (spec
/// §4.6 `SpanContains`).
pub struct SpanContains {
    outer: Box<dyn Matcher>,
    inner: Box<dyn Matcher>,
}
impl SpanContains {
    pub fn new(outer: Box<dyn Matcher>, inner: Box<dyn Matcher>) -> Box<dyn Matcher> {
        Box::new(SpanContains { outer, inner })
    }
    fn contains_inner(&mut self) -> Result<bool, Error> {
        if !self.inner.is_active() || self.inner.id() != self.outer.id() {
            return Ok(false);
        }
        let outer_spans = self.outer.spans()?;
        let inner_spans = self.inner.spans()?;
        Ok(outer_spans.iter().any(|(os, oe)| inner_spans.iter().any(|(is, ie)| os <= is && ie <= oe)))
    }
    fn seek_match(&mut self) -> Result<(), Error> {
        loop {
            if !self.outer.is_active() {
                return Ok(());
            }
            if self.inner.is_active() && self.inner.id() < self.outer.id() {
                self.inner.skip_to(self.outer.id())?;
            }
            if self.contains_inner()? {
                return Ok(());
            }
            self.outer.next()?;
        }
    }
}
impl Matcher for SpanContains {
    fn is_active(&self) -> bool {
        self.outer.is_active()
    }
    fn id(&self) -> DocId {
        self.outer.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.outer.next()?;
        self.seek_match()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.outer.skip_to(target)?;
        self.seek_match()
    }
    fn score(&mut self) -> f32 {
        self.outer.score()
    }
    fn max_quality(&self) -> f32 {
        self.outer.max_quality()
    }
}

/// `N` submatchers unioned, batched via a docid/score array (spec §4.6
/// `ArrayUnion`): docid-for-docid this is the same relation `Union`
/// produces; the distinction the spec draws is an internal batching
/// strategy, not a different match set, so it's built on `Union` directly.
pub fn array_union(children: Vec<Box<dyn Matcher>>) -> Box<dyn Matcher> {
    Union::new(children)
}

/// Combine matchers pairwise into a balanced binary tree so `skip_to` stays
/// O(log N) deep for branching factor > 2 (spec §4.6's closing note).
fn build_balanced(
    mut items: Vec<Box<dyn Matcher>>,
    combine: impl Fn(Box<dyn Matcher>, Box<dyn Matcher>) -> Box<dyn Matcher>,
    empty: impl Fn() -> Box<dyn Matcher>,
) -> Box<dyn Matcher> {
    if items.is_empty() {
        return empty();
    }
    if items.len() == 1 {
        return items.pop().unwrap();
    }
    while items.len() > 1 {
        let mut next = Vec::with_capacity((items.len() + 1) / 2);
        let mut it = items.into_iter();
        while let Some(a) = it.next() {
            match it.next() {
                Some(b) => next.push(combine(a, b)),
                None => next.push(a),
            }
        }
        items = next;
    }
    items.pop().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecMatcher {
        docs: Vec<u32>,
        pos: usize,
    }
    impl VecMatcher {
        fn new(docs: Vec<u32>) -> Box<dyn Matcher> {
            Box::new(VecMatcher { docs, pos: 0 })
        }
    }
    impl Matcher for VecMatcher {
        fn is_active(&self) -> bool {
            self.pos < self.docs.len()
        }
        fn id(&self) -> DocId {
            if self.is_active() {
                DocId(self.docs[self.pos])
            } else {
                DocId::no_more()
            }
        }
        fn next(&mut self) -> Result<(), Error> {
            if self.is_active() {
                self.pos += 1;
            }
            Ok(())
        }
        fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
            while self.is_active() && self.id() < target {
                self.pos += 1;
            }
            Ok(())
        }
        fn score(&mut self) -> f32 {
            1.0
        }
        fn max_quality(&self) -> f32 {
            1.0
        }
    }

    fn collect(mut m: Box<dyn Matcher>) -> Vec<u32> {
        let mut out = Vec::new();
        while m.is_active() {
            out.push(m.id().0);
            m.next().unwrap();
        }
        out
    }

    #[test]
    fn intersection_finds_common_docs() {
        let m = Intersection::new(vec![VecMatcher::new(vec![1, 2, 3, 5]), VecMatcher::new(vec![2, 3, 4, 5])]);
        assert_eq!(collect(m), vec![2, 3, 5]);
    }

    #[test]
    fn union_dedupes_and_sorts() {
        let m = Union::new(vec![VecMatcher::new(vec![1, 3, 5]), VecMatcher::new(vec![2, 3, 4])]);
        assert_eq!(collect(m), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn and_not_removes_negative_docs() {
        let m = AndNot::new(VecMatcher::new(vec![1, 2, 3, 4]), VecMatcher::new(vec![2, 4]));
        assert_eq!(collect(m), vec![1, 3]);
    }

    #[test]
    fn and_maybe_keeps_required_docs_only() {
        let m = AndMaybe::new(VecMatcher::new(vec![1, 2, 3]), VecMatcher::new(vec![2]));
        assert_eq!(collect(m), vec![1, 2, 3]);
    }

    #[test]
    fn require_intersects() {
        let m = Require::new(VecMatcher::new(vec![1, 2, 3]), VecMatcher::new(vec![2, 3, 4]));
        assert_eq!(collect(m), vec![2, 3]);
    }

    #[test]
    fn balanced_build_handles_many_children() {
        let children: Vec<Box<dyn Matcher>> = (0..7).map(|i| VecMatcher::new(vec![i, i + 10])).collect();
        let m = Union::new(children);
        let mut got = collect(m);
        got.sort();
        got.dedup();
        assert_eq!(got.len(), 14);
    }

    #[test]
    fn phrase_matches_exact_adjacency() {
        // doc 0: term0 at [1], term1 at [2] -> adjacent, slop 0 matches.
        struct FixedSpans {
            doc: DocId,
            spans: Vec<Span>,
            done: bool,
        }
        impl Matcher for FixedSpans {
            fn is_active(&self) -> bool {
                !self.done
            }
            fn id(&self) -> DocId {
                if self.done {
                    DocId::no_more()
                } else {
                    self.doc
                }
            }
            fn next(&mut self) -> Result<(), Error> {
                self.done = true;
                Ok(())
            }
            fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
                if target > self.doc {
                    self.done = true;
                }
                Ok(())
            }
            fn score(&mut self) -> f32 {
                1.0
            }
            fn spans(&mut self) -> Result<Vec<Span>, Error> {
                Ok(self.spans.clone())
            }
        }
        let terms = vec![
            Box::new(FixedSpans { doc: DocId(0), spans: vec![(1, 1)], done: false }) as Box<dyn Matcher>,
            Box::new(FixedSpans { doc: DocId(0), spans: vec![(2, 2)], done: false }) as Box<dyn Matcher>,
        ];
        let m = PhraseMatcher::new(terms, 0, true).unwrap();
        assert_eq!(collect(m), vec![0]);
    }
}
