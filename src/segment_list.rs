//! `SegmentList`: the mutable set of current segments plus the set of
//! in-flight merges (spec §4.10). Grounded in the teacher's
//! `movement::MoverType::create_and`/`create_or` for the "flatten, drop
//! trivial cases" normalization style applied here to merge candidate
//! sets, and in `original_source/src/whoosh/writing/multiwriting.py`'s
//! queued-delete-on-completion idea for how deletions made while a merge is
//! running get applied to the merge's eventual output.

use crate::config::MergePolicyConfig;
use crate::segment::{Segment, SegmentRecord};
use crate::{DocId, Error};
use crate::HashMap;
use std::sync::Arc;

/// A deferred deletion query: evaluated against a segment on demand,
/// returning the docids it matches. Boxed so `SegmentList` doesn't need to
/// know about `crate::query::Query` (avoids a cyclic module dependency);
/// `IndexWriter::delete_by_query` supplies the closure. Takes `&Arc<Segment>`
/// rather than `&Segment` because building a `Query` matcher needs to clone
/// the `Arc` into matchers like `Inverse` that own a `'static` closure over
/// the segment.
pub type DeleteMatcher = Arc<dyn Fn(&Arc<Segment>) -> Result<Vec<DocId>, Error> + Send + Sync>;

struct MergeInFlight {
    inputs: Vec<String>,
    queued_deletes: Vec<DeleteMatcher>,
}

/// One entry in a merge plan: segment ids to combine into a single new
/// segment.
pub struct MergeCandidate {
    pub segment_ids: Vec<String>,
}

pub struct SegmentList {
    segments: Vec<Arc<Segment>>,
    records: Vec<SegmentRecord>,
    in_flight: HashMap<u64, MergeInFlight>,
    next_merge_id: u64,
}

impl SegmentList {
    pub fn new(segments: Vec<Arc<Segment>>, records: Vec<SegmentRecord>) -> Self {
        SegmentList { segments, records, in_flight: HashMap::default(), next_merge_id: 0 }
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn add_segment(&mut self, segment: Arc<Segment>, record: SegmentRecord) {
        info!("segment added: {} ({} docs)", record.id, record.total_doc_count);
        self.segments.push(segment);
        self.records.push(record);
    }

    pub fn remove_segment(&mut self, id: &str) {
        info!("segment removed: {}", id);
        if let Some(idx) = self.records.iter().position(|r| r.id == id) {
            self.segments.remove(idx);
            self.records.remove(idx);
        }
    }

    /// Current deletion-generation-tagged records, for writing into the
    /// next TOC.
    pub fn records(&self) -> Vec<SegmentRecord> {
        self.records.clone()
    }

    /// Records a promise that `merge_id`'s output will eventually replace
    /// `segment_ids` (spec §4.10 `add_merge`).
    pub fn add_merge(&mut self, segment_ids: Vec<String>) -> u64 {
        let id = self.next_merge_id;
        self.next_merge_id += 1;
        info!("merge {} started over {:?}", id, segment_ids);
        self.in_flight.insert(id, MergeInFlight { inputs: segment_ids, queued_deletes: Vec::new() });
        id
    }

    /// Atomically swap the merged-out segments for `new_segment`, then
    /// replay every deletion query queued against it during the merge
    /// (spec §4.10 `integrate`).
    pub fn integrate(&mut self, merge_id: u64, new_segment: Arc<Segment>, mut new_record: SegmentRecord) -> Result<(), Error> {
        let in_flight = self.in_flight.remove(&merge_id).ok_or(Error::OverrunError)?;
        for id in &in_flight.inputs {
            self.remove_segment(id);
        }
        let mut deleted_any = false;
        for matcher in &in_flight.queued_deletes {
            for doc in matcher(&new_segment)? {
                if new_segment.delete(doc) {
                    deleted_any = true;
                }
            }
        }
        if deleted_any {
            new_record.deletion_generation = Some(0);
        }
        info!("merge {} integrated into segment {}", merge_id, new_record.id);
        self.add_segment(new_segment, new_record);
        Ok(())
    }

    pub fn fail_merge(&mut self, merge_id: u64) {
        warn!("merge {} failed; inputs remain live", merge_id);
        self.in_flight.remove(&merge_id);
    }

    /// Mark every live doc matching `matcher` as deleted in every current
    /// segment, and queue the same matcher against any merge currently in
    /// flight so its output doesn't resurrect the deleted docs (spec
    /// §4.10's `delete_by_query`).
    pub fn delete_by_query(&mut self, matcher: DeleteMatcher) -> Result<usize, Error> {
        let mut count = 0usize;
        for segment in &self.segments {
            for doc in matcher(segment)? {
                debug!("deleting doc {:?} in segment {}", doc, segment.id);
                if segment.delete(doc) {
                    count += 1;
                }
            }
        }
        for in_flight in self.in_flight.values_mut() {
            in_flight.queued_deletes.push(matcher.clone());
        }
        for i in 0..self.records.len() {
            if self.segments[i].live_doc_count() < self.segments[i].total_doc_count {
                let record = &mut self.records[i];
                record.deletion_generation = Some(record.deletion_generation.map(|g| g + 1).unwrap_or(0));
            }
        }
        Ok(count)
    }

    /// Tiered merge policy (spec §4.10): bucket segments into size levels,
    /// propose merging the smallest `max_merge_at_once` of any
    /// over-populated level, weighting each candidate's effective size up
    /// by its deleted fraction so heavily-deleted segments are preferred.
    /// Segment "size" is approximated by live doc count, since the core
    /// doesn't track on-disk byte size per segment (see DESIGN.md).
    pub fn plan_merges(&self, policy: &MergePolicyConfig) -> Vec<MergeCandidate> {
        if self.in_flight.len() >= policy.max_merge_count {
            return Vec::new();
        }
        let in_flight_ids: std::collections::HashSet<&str> =
            self.in_flight.values().flat_map(|m| m.inputs.iter().map(|s| s.as_str())).collect();

        let mut candidates: Vec<(&Segment, u64)> = self
            .segments
            .iter()
            .filter(|s| !in_flight_ids.contains(s.id.as_str()))
            .map(|s| {
                let live = s.live_doc_count() as f64;
                let deleted_fraction = if s.total_doc_count == 0 {
                    0.0
                } else {
                    1.0 - (live / s.total_doc_count as f64)
                };
                let effective = (live.max(1.0) * (1.0 + policy.deletions_weight * deleted_fraction)) as u64;
                (s.as_ref(), effective)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut by_level: HashMap<i32, Vec<(&Segment, u64)>> = HashMap::default();
        for (segment, size) in candidates.drain(..) {
            let level = level_of(size, policy);
            by_level.entry(level).or_default().push((segment, size));
        }

        let mut plans = Vec::new();
        let mut slots_left = policy.max_merge_count.saturating_sub(self.in_flight.len());
        let mut levels: Vec<i32> = by_level.keys().copied().collect();
        levels.sort_unstable();
        for level in levels {
            if slots_left == 0 {
                break;
            }
            let mut members = by_level.remove(&level).unwrap();
            if members.len() <= policy.segments_per_tier {
                continue;
            }
            members.sort_by_key(|(_, size)| *size);
            let take = members.len().min(policy.max_merge_at_once);
            let group: Vec<(&Segment, u64)> = members.into_iter().take(take).collect();
            let total: u64 = group.iter().map(|(_, size)| *size).sum();
            if total > policy.max_merged_segment_size {
                continue;
            }
            if group.len() < 2 {
                continue;
            }
            plans.push(MergeCandidate { segment_ids: group.into_iter().map(|(s, _)| s.id.clone()).collect() });
            slots_left -= 1;
        }
        plans
    }
}

fn level_of(size: u64, policy: &MergePolicyConfig) -> i32 {
    let ratio = (size.max(1) as f64) / (policy.min_merge_size.max(1) as f64);
    if ratio <= 1.0 {
        0
    } else {
        ratio.log(policy.level_log_base).floor() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_of_is_monotonic_in_size() {
        let policy = MergePolicyConfig::default();
        let mut prev = level_of(1, &policy);
        for size in [10u64, 100, 1_000, 10_000, 1_000_000, 100_000_000] {
            let level = level_of(size, &policy);
            assert!(level >= prev);
            prev = level;
        }
    }
}
