//! Which invalidation each part of a cache was last requested for.
//!
//! Every invalidated range is stamped with a [`JobTime`]. A render result is
//! only written back if it was requested at or after the stamp covering its
//! time, so a slow render of old graph state never overwrites a newer one.

use cinegraph_core::{JobTime, RationalTime, TimeRange, TimeRangeList};

#[derive(Debug, Clone)]
struct TrackedRanges {
    ranges: TimeRangeList,
    job_time: JobTime,
}

#[derive(Debug, Clone, Default)]
pub struct RenderJobTracker {
    jobs: Vec<TrackedRanges>,
}

impl RenderJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `range` with `job_time`, replacing older stamps over it.
    pub fn insert(&mut self, range: TimeRange, job_time: JobTime) {
        self.jobs.retain_mut(|job| {
            job.ranges.remove(range);
            !job.ranges.is_empty()
        });
        if let Some(job) = self.jobs.iter_mut().find(|j| j.job_time == job_time) {
            job.ranges.insert(range);
            return;
        }
        self.jobs.push(TrackedRanges {
            ranges: TimeRangeList::from_ranges([range]),
            job_time,
        });
    }

    pub fn insert_list(&mut self, ranges: &TimeRangeList, job_time: JobTime) {
        for r in ranges {
            self.insert(*r, job_time);
        }
    }

    /// Stamp covering `time`, if any.
    pub fn job_time(&self, time: RationalTime) -> Option<JobTime> {
        self.jobs
            .iter()
            .rev()
            .find(|j| j.ranges.contains_time(time))
            .map(|j| j.job_time)
    }

    /// Whether a result requested at `job_time` is still wanted for `time`.
    pub fn is_current(&self, time: RationalTime, job_time: JobTime) -> bool {
        self.job_time(time).is_some_and(|stamp| job_time >= stamp)
    }

    /// Whether a result requested at `job_time` is still wanted for all of `range`.
    ///
    /// Every part of `range` must be stamped, and no stamp overlapping it may be
    /// newer than `job_time`.
    pub fn is_range_current(&self, range: TimeRange, job_time: JobTime) -> bool {
        if range.is_empty() {
            return self.is_current(range.in_point(), job_time);
        }
        let mut unstamped = TimeRangeList::from_ranges([range]);
        for job in self.jobs.iter().filter(|j| j.ranges.intersects(&range)) {
            if job_time < job.job_time {
                return false;
            }
            unstamped.remove_list(&job.ranges);
        }
        unstamped.is_empty()
    }

    /// Parts of `range` that carry no stamp yet.
    pub fn untracked(&self, range: TimeRange) -> TimeRangeList {
        let mut left = TimeRangeList::from_ranges([range]);
        for job in &self.jobs {
            left.remove_list(&job.ranges);
        }
        left
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untracked_time_is_not_current() {
        let tracker = RenderJobTracker::new();
        assert!(!tracker.is_current(RationalTime::ZERO, JobTime::now()));
    }

    #[test]
    fn test_newer_invalidation_rejects_older_render() {
        let mut tracker = RenderJobTracker::new();
        let first = JobTime::now();
        tracker.insert(TimeRange::seconds(0, 10), first);

        let render_started = JobTime::now();
        let second = JobTime::now();
        tracker.insert(TimeRange::seconds(2, 4), second);

        let t = RationalTime::from_integer(3);
        assert!(!tracker.is_current(t, render_started));
        assert!(tracker.is_current(RationalTime::from_integer(5), render_started));
        assert_eq!(tracker.job_time(t), Some(second));
    }

    #[test]
    fn test_restamped_tail_rejects_whole_range() {
        let mut tracker = RenderJobTracker::new();
        tracker.insert(TimeRange::seconds(0, 2), JobTime::now());
        let requested = JobTime::now();
        tracker.insert(TimeRange::seconds(1, 2), JobTime::now());

        assert!(tracker.is_current(RationalTime::ZERO, requested));
        assert!(!tracker.is_range_current(TimeRange::seconds(0, 2), requested));
        assert!(tracker.is_range_current(TimeRange::seconds(0, 1), requested));
    }

    #[test]
    fn test_partly_untracked_range_is_not_current() {
        let mut tracker = RenderJobTracker::new();
        tracker.insert(TimeRange::seconds(0, 1), JobTime::now());
        let requested = JobTime::now();
        assert!(!tracker.is_range_current(TimeRange::seconds(0, 2), requested));
        assert_eq!(
            tracker.untracked(TimeRange::seconds(0, 2)),
            TimeRangeList::from_ranges([TimeRange::seconds(1, 2)])
        );

        let rest = tracker.untracked(TimeRange::seconds(0, 2));
        tracker.insert_list(&rest, JobTime::now());
        assert!(tracker.untracked(TimeRange::seconds(0, 2)).is_empty());
        assert!(tracker.is_range_current(TimeRange::seconds(0, 2), JobTime::now()));
    }

    #[test]
    fn test_fully_replaced_entries_are_dropped() {
        let mut tracker = RenderJobTracker::new();
        tracker.insert(TimeRange::seconds(1, 2), JobTime::now());
        let newer = JobTime::now();
        tracker.insert(TimeRange::seconds(0, 5), newer);
        assert_eq!(tracker.jobs.len(), 1);
        assert_eq!(tracker.job_time(RationalTime::from_integer(1)), Some(newer));

        tracker.clear();
        assert!(tracker.is_empty());
    }
}
