//! Top-K collection (spec §4.6 Glossary's Collector): consumes docids from a
//! root `Matcher`, keeps the best `limit` by score, optionally collapsing
//! multiple hits down to one per grouping key, and enforces a wall-clock
//! time limit. Grounded in the teacher's `heap_collection.rs`
//! (`ScoredDocument`'s `Ord`-by-score-then-docid and a bounded min-heap),
//! generalized from Galago's single fixed-K full-corpus scan into a
//! per-segment call the multi-segment `Searcher` drives once per segment,
//! with collapsing and time limits added since Galago's collector had
//! neither.
//!
//! Per spec §9 Design Notes, `use_final` rescoring and block-max
//! `skip_to_quality` don't mix safely (a `final` hook can violate the
//! monotonic `max_quality` bound the skip relies on): when `use_final` is
//! set, or when collapsing is active (a lower-scoring doc may still be the
//! best representative of a group that matters), this collector disables
//! the `skip_to_quality` pushdown for that run.

use crate::matching::Matcher;
use crate::schema::FieldId;
use crate::segment::Segment;
use crate::{DocId, Error};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// One collected hit, identified by which segment (by ordinal within the
/// `Searcher`'s segment list) and which docnum within it produced it.
#[derive(Debug, Clone, Copy)]
pub struct ScoredHit {
    pub segment_ord: usize,
    pub doc: DocId,
    pub score: f32,
}

impl PartialEq for ScoredHit {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}
impl Eq for ScoredHit {}
impl PartialOrd for ScoredHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredHit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.partial_cmp(&other.score).unwrap_or(Ordering::Equal)
    }
}

/// Tunables for one `Collector` run (spec §4.6/§4.7/Glossary).
#[derive(Clone)]
pub struct CollectOptions {
    pub limit: usize,
    pub time_limit: Option<Duration>,
    /// Apply `Scorer::rescore` after base scoring (spec §4.7's `final`).
    pub use_final: bool,
    /// Keep only the best-scoring hit per distinct value of this field's
    /// column (spec Glossary's "collapsing").
    pub collapse_field: Option<FieldId>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        CollectOptions { limit: 10, time_limit: None, use_final: false, collapse_field: None }
    }
}

/// Accumulates `ScoredHit`s across one or more segments. One `Collector`
/// spans an entire `Searcher::search` call so grouping/top-K state is
/// shared across segments, not reset per segment.
pub struct Collector {
    limit: usize,
    use_final: bool,
    collapsing: bool,
    deadline: Option<Instant>,
    heap: BinaryHeap<std::cmp::Reverse<ScoredHit>>,
    groups: HashMap<Vec<u8>, ScoredHit>,
}

impl Collector {
    pub fn new(options: &CollectOptions) -> Self {
        let deadline = options.time_limit.map(|d| Instant::now() + d);
        Collector {
            limit: options.limit,
            use_final: options.use_final,
            collapsing: options.collapse_field.is_some(),
            deadline,
            heap: BinaryHeap::new(),
            groups: HashMap::new(),
        }
    }

    /// Drive `matcher` to exhaustion (or the time limit), folding every live
    /// hit into this collector's running top-K/groups. `key_fn`, when
    /// given, computes the collapsing key for a docid (the `Searcher` builds
    /// it from `CollectOptions::collapse_field` and the segment's column
    /// reader, since this module doesn't know about columns). `final_fn`,
    /// when given, is applied to the base score before collection.
    pub fn collect_segment(
        &mut self,
        matcher: &mut dyn Matcher,
        segment_ord: usize,
        segment: &Segment,
        key_fn: Option<&dyn Fn(DocId) -> Option<Vec<u8>>>,
        final_fn: Option<&dyn Fn(DocId, f32) -> f32>,
    ) -> Result<(), Error> {
        let pushdown_allowed = !self.use_final && !self.collapsing;
        while matcher.is_active() {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(Error::TimeLimit);
                }
            }
            let doc = matcher.id();
            if segment.is_deleted(doc) {
                matcher.next()?;
                continue;
            }
            let base_score = matcher.score();
            let score = if self.use_final {
                final_fn.map(|f| f(doc, base_score)).unwrap_or(base_score)
            } else {
                base_score
            };
            let hit = ScoredHit { segment_ord, doc, score };
            match key_fn.and_then(|f| f(doc)) {
                Some(key) => self.offer_group(key, hit),
                None => self.offer(hit),
            }
            if pushdown_allowed {
                if let Some(std::cmp::Reverse(worst)) = self.heap.peek() {
                    if self.heap.len() >= self.limit {
                        matcher.skip_to_quality(worst.score)?;
                    }
                }
            }
            if matcher.is_active() && matcher.id() == doc {
                matcher.next()?;
            }
        }
        Ok(())
    }

    fn offer(&mut self, hit: ScoredHit) {
        if self.limit == 0 {
            return;
        }
        if self.heap.len() < self.limit {
            self.heap.push(std::cmp::Reverse(hit));
        } else if let Some(std::cmp::Reverse(worst)) = self.heap.peek() {
            if hit.score > worst.score {
                self.heap.pop();
                self.heap.push(std::cmp::Reverse(hit));
            }
        }
    }

    fn offer_group(&mut self, key: Vec<u8>, hit: ScoredHit) {
        self.groups
            .entry(key)
            .and_modify(|best| {
                if hit.score > best.score {
                    *best = hit;
                }
            })
            .or_insert(hit);
    }

    /// Drain this collector into its final ranked results, best first,
    /// truncated to `limit`. Consumes `self` since a collector is scoped to
    /// one `Searcher::search` call.
    pub fn into_results(mut self) -> Vec<ScoredHit> {
        let mut out: Vec<ScoredHit> = if self.collapsing {
            self.groups.drain().map(|(_, hit)| hit).collect()
        } else {
            self.heap.drain().map(|std::cmp::Reverse(hit)| hit).collect()
        };
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        out.truncate(self.limit);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, Schema};
    use crate::segment::SegmentRecord;

    struct FixedMatcher {
        docs: Vec<(u32, f32)>,
        pos: usize,
    }
    impl Matcher for FixedMatcher {
        fn is_active(&self) -> bool {
            self.pos < self.docs.len()
        }
        fn id(&self) -> DocId {
            if self.is_active() {
                DocId(self.docs[self.pos].0)
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
            self.docs[self.pos].1
        }
    }

    fn empty_segment() -> Segment {
        let mut schema = Schema::new();
        schema.add_field("body", FieldType::Stored).unwrap();
        // A Segment with no postings/columns at all; only used here for its
        // deletion bitmap, which every test below leaves untouched.
        let storage = crate::store::directory::FileStorage::new(std::env::temp_dir()).unwrap();
        let id = crate::segment::new_segment_id();
        let mut out = storage.create_file(&crate::segment::trm_file(&id)).unwrap();
        {
            use std::io::Write as _;
            let mut buf = Vec::new();
            let writer = crate::codec::termdict::TermDictWriter::new(&mut buf);
            writer.finish().unwrap();
            out.write_all(&buf).unwrap();
        }
        out.close().unwrap();
        out = storage.create_file(&crate::segment::pst_file(&id)).unwrap();
        out.close().unwrap();
        let record = SegmentRecord::fresh(id, 10);
        Segment::open(&storage, &schema, &record).unwrap()
    }

    #[test]
    fn keeps_best_k_by_score() {
        let segment = empty_segment();
        let mut matcher = FixedMatcher { docs: vec![(0, 1.0), (1, 5.0), (2, 3.0), (3, 9.0), (4, 2.0)], pos: 0 };
        let options = CollectOptions { limit: 2, ..Default::default() };
        let mut collector = Collector::new(&options);
        collector.collect_segment(&mut matcher, 0, &segment, None, None).unwrap();
        let results = collector.into_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc, DocId(3));
        assert_eq!(results[1].doc, DocId(1));
    }

    #[test]
    fn collapsing_keeps_one_per_key() {
        let segment = empty_segment();
        let mut matcher = FixedMatcher { docs: vec![(0, 1.0), (1, 5.0), (2, 3.0)], pos: 0 };
        let options = CollectOptions { limit: 10, collapse_field: Some(FieldId(0)), ..Default::default() };
        let mut collector = Collector::new(&options);
        let key_fn = |doc: DocId| -> Option<Vec<u8>> { Some(vec![(doc.0 % 2) as u8]) };
        collector.collect_segment(&mut matcher, 0, &segment, Some(&key_fn), None).unwrap();
        let results = collector.into_results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|h| h.doc == DocId(1)));
        assert!(results.iter().any(|h| h.doc == DocId(2)));
    }

    #[test]
    fn time_limit_stops_collection() {
        let segment = empty_segment();
        let mut matcher = FixedMatcher { docs: vec![(0, 1.0), (1, 2.0), (2, 3.0)], pos: 0 };
        let options = CollectOptions { limit: 10, time_limit: Some(Duration::from_nanos(1)), ..Default::default() };
        let mut collector = Collector::new(&options);
        std::thread::sleep(Duration::from_millis(5));
        let result = collector.collect_segment(&mut matcher, 0, &segment, None, None);
        assert!(matches!(result, Err(Error::TimeLimit)));
    }
}
