//! Scoring models (spec §4.7): a `Weighting` builds a `Scorer` from term
//! statistics gathered once per query term; the `Scorer` then turns a
//! posting's `(weight, length)` into a score, and separately produces a
//! monotonic upper bound (`max_quality`) from a term's block-max stats for
//! the block-max skip-to-quality path (spec §4.6). Grounded in the
//! teacher's `BM25Eval` (this module, pre-rewrite): the same `b`/`k`/
//! `average_dl` formula is kept, generalized from one hardwired model into
//! the `Scorer` trait spec §4.7 requires, with three more models added
//! (Frequency, TF-IDF, PL2) sharing a `WeightLengthScorer` bound helper.

use crate::codec::termdict::TermInfo;

/// Per-term statistics a `Weighting` needs to build a `Scorer`: corpus size,
/// document frequency, and (for length-normalized models) the field's
/// average length. Gathered once per query term against a `Searcher`.
#[derive(Debug, Clone, Copy)]
pub struct TermStats {
    pub doc_count: u64,
    pub doc_frequency: u64,
    pub average_length: f32,
}

impl TermStats {
    /// Inverse document frequency, BM25-style (Robertson/Sparck Jones),
    /// floored at a small positive value so it never goes negative for
    /// very common terms.
    pub fn idf(&self) -> f32 {
        let n = self.doc_count as f32;
        let df = self.doc_frequency as f32;
        (((n - df + 0.5) / (df + 0.5)) + 1.0).ln().max(1e-6)
    }
}

/// `(weight, length) -> score` for one term in one field, plus the
/// monotonic upper bound block-max skipping relies on (spec §8 property 4).
pub trait Scorer: Send + Sync {
    fn score(&self, weight: f32, length: u32) -> f32;
    /// Upper bound on `score` for any `(weight, length)` with
    /// `weight <= max_weight` and `length >= min_length` (longer documents
    /// score lower under length normalization, so the bound wants the
    /// *shortest* length in the block).
    fn max_quality(&self, max_weight: f32, min_length: u32) -> f32 {
        self.score(max_weight, min_length)
    }
    /// This scorer's per-term constant factor (idf, or 1.0 for models with
    /// none), used to bound a whole posting block from its `max_weight`
    /// alone without decoding lengths (spec §4.6's block-max skip path).
    fn block_multiplier(&self) -> f32 {
        1.0
    }
    /// Post-hoc rescoring hook (spec §4.7's `final`); `None` means "use the
    /// base score unchanged".
    fn rescore(&self, _docnum: u32, _base_score: f32) -> Option<f32> {
        None
    }
}

pub struct FrequencyScorer;
impl Scorer for FrequencyScorer {
    fn score(&self, weight: f32, _length: u32) -> f32 {
        weight
    }
}

pub struct TfIdfScorer {
    pub idf: f32,
}
impl Scorer for TfIdfScorer {
    fn score(&self, weight: f32, _length: u32) -> f32 {
        self.idf * weight
    }
    fn block_multiplier(&self) -> f32 {
        self.idf
    }
}

/// BM25F-style scorer: the `b`/`k1` free-text ranking formula, normalized by
/// how the document's field length compares to the field's average.
pub struct Bm25Scorer {
    pub idf: f32,
    pub k1: f32,
    pub b: f32,
    pub average_length: f32,
}

impl Bm25Scorer {
    pub fn new(stats: TermStats, k1: f32, b: f32) -> Self {
        Bm25Scorer { idf: stats.idf(), k1, b, average_length: stats.average_length.max(1.0) }
    }
}

impl Scorer for Bm25Scorer {
    fn score(&self, weight: f32, length: u32) -> f32 {
        let tf = weight;
        let length = length as f32;
        let norm = 1.0 - self.b + self.b * (length / self.average_length);
        let num = tf * (self.k1 + 1.0);
        let denom = tf + self.k1 * norm;
        self.idf * (num / denom)
    }
    fn block_multiplier(&self) -> f32 {
        self.idf
    }
}

/// PL2 (divergence-from-randomness) scorer, a second length-normalized
/// model alongside BM25F so callers can pick either (spec §4.7 requires
/// both as "Required models").
pub struct Pl2Scorer {
    pub idf: f32,
    pub c: f32,
    pub average_length: f32,
}

impl Pl2Scorer {
    pub fn new(stats: TermStats, c: f32) -> Self {
        Pl2Scorer { idf: stats.idf(), c, average_length: stats.average_length.max(1.0) }
    }
}

impl Scorer for Pl2Scorer {
    fn score(&self, weight: f32, length: u32) -> f32 {
        let tfn = weight * (1.0 + self.c * (self.average_length / length.max(1) as f32)).ln();
        if tfn <= 0.0 {
            return 0.0;
        }
        self.idf * tfn / (tfn + 1.0)
    }
    fn block_multiplier(&self) -> f32 {
        self.idf
    }
}

/// Which scoring model a `Weighting` builds. Kept as a small enum (rather
/// than a registry) since the spec names exactly four required models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Model {
    Frequency,
    TfIdf,
    Bm25 { k1: f32, b: f32 },
    Pl2 { c: f32 },
}

impl Default for Model {
    fn default() -> Self {
        Model::Bm25 { k1: 1.2, b: 0.75 }
    }
}

impl Model {
    pub fn build(&self, stats: TermStats) -> Box<dyn Scorer> {
        match *self {
            Model::Frequency => Box::new(FrequencyScorer),
            Model::TfIdf => Box::new(TfIdfScorer { idf: stats.idf() }),
            Model::Bm25 { k1, b } => Box::new(Bm25Scorer::new(stats, k1, b)),
            Model::Pl2 { c } => Box::new(Pl2Scorer::new(stats, c)),
        }
    }
}

/// `max_quality` computed directly from a term's dictionary-level stats,
/// without needing a live posting block in hand (used to seed a matcher's
/// `max_quality()` before any block has been read).
pub fn term_max_quality(scorer: &dyn Scorer, info: &TermInfo) -> f32 {
    let (_, min_length) = crate::segment::term_info_length_bounds(info);
    scorer.max_quality(info.max_weight, min_length.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bm25_rewards_higher_weight() {
        let stats = TermStats { doc_count: 1000, doc_frequency: 10, average_length: 100.0 };
        let scorer = Bm25Scorer::new(stats, 1.2, 0.75);
        assert!(scorer.score(5.0, 100) > scorer.score(1.0, 100));
    }

    #[test]
    fn bm25_penalizes_longer_documents() {
        let stats = TermStats { doc_count: 1000, doc_frequency: 10, average_length: 100.0 };
        let scorer = Bm25Scorer::new(stats, 1.2, 0.75);
        assert!(scorer.score(2.0, 50) > scorer.score(2.0, 500));
    }

    #[test]
    fn idf_decreases_with_frequency() {
        let common = TermStats { doc_count: 1000, doc_frequency: 900, average_length: 100.0 };
        let rare = TermStats { doc_count: 1000, doc_frequency: 2, average_length: 100.0 };
        assert!(rare.idf() > common.idf());
    }

    #[test]
    fn max_quality_bounds_actual_scores() {
        let stats = TermStats { doc_count: 1000, doc_frequency: 10, average_length: 100.0 };
        let scorer = Bm25Scorer::new(stats, 1.2, 0.75);
        let bound = scorer.max_quality(5.0, 10);
        for length in [10u32, 20, 50, 100, 300] {
            for weight in [1.0f32, 2.0, 5.0] {
                assert!(scorer.score(weight, length) <= bound + 1e-4);
            }
        }
    }
}
