//! Sets of disjoint time ranges.
//!
//! [`TimeRangeList`] backs every "validated" and "invalidated" bookkeeping
//! structure in the caches. Inserted ranges are merged with anything they
//! overlap or touch; removals split, trim or erase existing ranges.

use serde::{Deserialize, Serialize};

use crate::time::{RationalTime, Rounding, TimeRange};

/// Anything that behaves like a time range and can be trimmed in place.
///
/// Lets [`remove_range`] operate on lists that carry extra data per range.
pub trait RangeItem: Clone {
    fn range(&self) -> TimeRange;
    fn set_in(&mut self, time: RationalTime);
    fn set_out(&mut self, time: RationalTime);
}

impl RangeItem for TimeRange {
    fn range(&self) -> TimeRange {
        *self
    }

    fn set_in(&mut self, time: RationalTime) {
        TimeRange::set_in(self, time);
    }

    fn set_out(&mut self, time: RationalTime) {
        TimeRange::set_out(self, time);
    }
}

/// Remove `remove` from a list of disjoint ranges.
///
/// Items fully covered are erased, an item strictly containing the removal is
/// split in two (the tail is appended), partial overlaps are trimmed.
pub fn remove_range<T: RangeItem>(list: &mut Vec<T>, remove: TimeRange) {
    if remove.is_empty() {
        return;
    }

    let mut additions = Vec::new();
    let mut i = 0;
    while i < list.len() {
        let compare = list[i].range();

        if remove.contains_range(&compare, true, true) {
            list.remove(i);
            continue;
        }

        if compare.contains_range(&remove, false, false) {
            let mut tail = list[i].clone();
            tail.set_in(remove.out_point());
            list[i].set_out(remove.in_point());
            additions.push(tail);
            break;
        }

        if compare.in_point() < remove.in_point() && compare.out_point() > remove.in_point() {
            list[i].set_out(remove.in_point());
        } else if compare.in_point() < remove.out_point() && compare.out_point() > remove.out_point() {
            list[i].set_in(remove.out_point());
        }
        i += 1;
    }

    list.extend(additions);
}

// ── Range list ──────────────────────────────────────────────────

/// Sorted list of disjoint, non-adjacent time ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangeList {
    ranges: Vec<TimeRange>,
}

impl TimeRangeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from arbitrary (possibly overlapping) ranges.
    pub fn from_ranges<I: IntoIterator<Item = TimeRange>>(ranges: I) -> Self {
        let mut list = Self::new();
        for r in ranges {
            list.insert(r);
        }
        list
    }

    /// Add a range, merging with everything it overlaps or touches.
    pub fn insert(&mut self, range: TimeRange) {
        if range.is_empty() {
            return;
        }

        let mut merged = range;
        self.ranges.retain(|existing| {
            if existing.overlaps_with(&merged, true, true) {
                merged = merged.combined(existing);
                false
            } else {
                true
            }
        });

        let pos = self
            .ranges
            .partition_point(|r| r.in_point() < merged.in_point());
        self.ranges.insert(pos, merged);
    }

    pub fn insert_list(&mut self, other: &TimeRangeList) {
        for r in &other.ranges {
            self.insert(*r);
        }
    }

    /// Remove a range, splitting or trimming what it overlaps.
    pub fn remove(&mut self, range: TimeRange) {
        remove_range(&mut self.ranges, range);
        self.ranges.sort_by_key(|r| r.in_point());
    }

    pub fn remove_list(&mut self, other: &TimeRangeList) {
        for r in &other.ranges {
            self.remove(*r);
        }
    }

    /// Whether a single stored range covers `range` entirely.
    pub fn contains(&self, range: &TimeRange) -> bool {
        self.ranges
            .iter()
            .any(|r| r.contains_range(range, true, true))
    }

    pub fn contains_time(&self, time: RationalTime) -> bool {
        self.ranges.iter().any(|r| r.contains(time))
    }

    pub fn overlaps_with(&self, range: &TimeRange, in_inclusive: bool, out_inclusive: bool) -> bool {
        self.ranges
            .iter()
            .any(|r| r.overlaps_with(range, in_inclusive, out_inclusive))
    }

    /// Whether any stored range shares a non-zero span with `range`.
    pub fn intersects(&self, range: &TimeRange) -> bool {
        self.overlaps_with(range, false, false)
    }

    /// The parts of this list that fall within `range`.
    pub fn intersection(&self, range: &TimeRange) -> TimeRangeList {
        Self {
            ranges: self
                .ranges
                .iter()
                .filter_map(|r| r.intersected(range))
                .collect(),
        }
    }

    /// Move every range by `diff`.
    pub fn shift(&mut self, diff: RationalTime) {
        for r in &mut self.ranges {
            *r = *r + diff;
        }
    }

    /// Drop everything before `time`.
    pub fn trim_in(&mut self, time: RationalTime) {
        self.remove(TimeRange::new(RationalTime::MIN, time));
    }

    /// Drop everything from `time` on.
    pub fn trim_out(&mut self, time: RationalTime) {
        self.remove(TimeRange::new(time, RationalTime::MAX));
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn first(&self) -> Option<&TimeRange> {
        self.ranges.first()
    }

    pub fn last(&self) -> Option<&TimeRange> {
        self.ranges.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeRange> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[TimeRange] {
        &self.ranges
    }
}

impl<'a> IntoIterator for &'a TimeRangeList {
    type Item = &'a TimeRange;
    type IntoIter = std::slice::Iter<'a, TimeRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

// ── Frame iteration ─────────────────────────────────────────────

/// Walks every frame time covered by a range list for a given timebase.
///
/// Each range's in point is snapped down to the timebase, so the first
/// frame of a range may start slightly before it.
#[derive(Debug, Clone)]
pub struct TimeRangeListFrameIterator {
    ranges: Vec<TimeRange>,
    timebase: RationalTime,
    range_index: usize,
    current: RationalTime,
    frame_index: usize,
}

impl TimeRangeListFrameIterator {
    pub fn new(list: TimeRangeList, timebase: RationalTime) -> Self {
        let ranges = if timebase > RationalTime::ZERO {
            list.ranges
        } else {
            tracing::warn!("Frame iterator created with non-positive timebase {}", timebase);
            Vec::new()
        };
        let current = ranges
            .first()
            .map(|r| r.in_point().snapped(timebase, Rounding::Floor))
            .unwrap_or_default();
        Self {
            ranges,
            timebase,
            range_index: 0,
            current,
            frame_index: 0,
        }
    }

    /// Quantize a time down to this iterator's timebase.
    pub fn snap(&self, time: RationalTime) -> RationalTime {
        time.snapped(self.timebase, Rounding::Floor)
    }

    pub fn has_next(&self) -> bool {
        self.range_index < self.ranges.len()
    }

    /// Number of frames already produced.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Total number of frames this iterator yields from its start.
    pub fn size(&self) -> usize {
        let mut fresh = Self {
            ranges: self.ranges.clone(),
            timebase: self.timebase,
            range_index: 0,
            current: RationalTime::ZERO,
            frame_index: 0,
        };
        fresh.current = fresh
            .ranges
            .first()
            .map(|r| fresh.snap(r.in_point()))
            .unwrap_or_default();
        fresh.count()
    }

    pub fn timebase(&self) -> RationalTime {
        self.timebase
    }
}

impl Iterator for TimeRangeListFrameIterator {
    type Item = RationalTime;

    fn next(&mut self) -> Option<RationalTime> {
        if !self.has_next() {
            return None;
        }

        let emitted = self.current;
        let mut next = emitted + self.timebase;

        while let Some(range) = self.ranges.get(self.range_index) {
            if next < range.out_point() {
                break;
            }
            self.range_index += 1;
            if let Some(following) = self.ranges.get(self.range_index) {
                let snapped = following.in_point().snapped(self.timebase, Rounding::Floor);
                if snapped > emitted {
                    next = snapped;
                }
            }
        }

        self.current = next;
        self.frame_index += 1;
        Some(emitted)
    }
}
