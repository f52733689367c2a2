//! Time representation for frame-accurate evaluation.
//!
//! Uses rational numbers to avoid floating-point accumulation errors.
//! A timebase is itself a [`RationalTime`]: the duration of one frame
//! (or one sample for audio).

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// How a time is quantized onto a timebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rounding {
    #[default]
    Floor,
    Round,
    Ceil,
}

/// A rational time value in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RationalTime {
    value: Rational64,
}

impl RationalTime {
    /// Zero time constant.
    pub const ZERO: Self = Self {
        value: Rational64::new_raw(0, 1),
    };

    /// Sentinel for "unbounded in the past". Arithmetic with it saturates.
    pub const MIN: Self = Self {
        value: Rational64::new_raw(i32::MIN as i64, 1),
    };

    /// Sentinel for "unbounded in the future". Arithmetic with it saturates.
    pub const MAX: Self = Self {
        value: Rational64::new_raw(i32::MAX as i64, 1),
    };

    /// Create a new time of `numerator / denominator` seconds.
    #[inline]
    pub fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            value: Rational64::new(numerator, denominator),
        }
    }

    /// Whole seconds.
    #[inline]
    pub fn from_integer(seconds: i64) -> Self {
        Self {
            value: Rational64::from_integer(seconds),
        }
    }

    /// Create a time from seconds as a float.
    ///
    /// Non-finite input maps to zero. May introduce small precision errors.
    pub fn from_f64(seconds: f64) -> Self {
        const PRECISION: i64 = 1_000_000_000;
        if !seconds.is_finite() {
            return Self::ZERO;
        }
        Self {
            value: Rational64::new((seconds * PRECISION as f64).round() as i64, PRECISION),
        }
    }

    /// Convert to seconds as f64.
    #[inline]
    pub fn to_f64(self) -> f64 {
        *self.value.numer() as f64 / *self.value.denom() as f64
    }

    #[inline]
    pub fn numer(self) -> i64 {
        *self.value.numer()
    }

    #[inline]
    pub fn denom(self) -> i64 {
        *self.value.denom()
    }

    /// Whether this is one of the `MIN`/`MAX` sentinels.
    #[inline]
    pub fn is_sentinel(self) -> bool {
        self == Self::MIN || self == Self::MAX
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        *self.value.numer() == 0
    }

    /// Get the absolute value of this time.
    #[inline]
    pub fn abs(self) -> Self {
        if *self.value.numer() < 0 {
            Self { value: -self.value }
        } else {
            self
        }
    }

    /// Reciprocal (e.g. a timebase to a rate). Zero stays zero.
    pub fn flipped(self) -> Self {
        if self.is_zero() {
            return self;
        }
        Self {
            value: self.value.recip(),
        }
    }

    /// Index of the timebase unit this time falls in.
    pub fn to_timestamp(self, timebase: RationalTime, rounding: Rounding) -> i64 {
        if timebase.is_zero() {
            return 0;
        }
        let units = self.value / timebase.value;
        let quantized = match rounding {
            Rounding::Floor => units.floor(),
            Rounding::Round => units.round(),
            Rounding::Ceil => units.ceil(),
        };
        quantized.to_integer()
    }

    /// Start time of the `timestamp`th timebase unit.
    #[inline]
    pub fn from_timestamp(timestamp: i64, timebase: RationalTime) -> Self {
        Self {
            value: timebase.value * timestamp,
        }
    }

    /// Quantize onto a timebase.
    pub fn snapped(self, timebase: RationalTime, rounding: Rounding) -> Self {
        if self.is_sentinel() {
            return self;
        }
        Self::from_timestamp(self.to_timestamp(timebase, rounding), timebase)
    }
}

impl Default for RationalTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for RationalTime {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        if self.is_sentinel() {
            return self;
        }
        if rhs.is_sentinel() {
            return rhs;
        }
        Self {
            value: self.value + rhs.value,
        }
    }
}

impl Sub for RationalTime {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        if self.is_sentinel() {
            return self;
        }
        if rhs.is_sentinel() {
            return -rhs;
        }
        Self {
            value: self.value - rhs.value,
        }
    }
}

impl AddAssign for RationalTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for RationalTime {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for RationalTime {
    type Output = Self;
    fn neg(self) -> Self {
        if self == Self::MIN {
            Self::MAX
        } else if self == Self::MAX {
            Self::MIN
        } else {
            Self { value: -self.value }
        }
    }
}

impl Mul<i64> for RationalTime {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        if self.is_sentinel() {
            return self;
        }
        Self {
            value: self.value * rhs,
        }
    }
}

impl Mul for RationalTime {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        if self.is_sentinel() {
            return self;
        }
        Self {
            value: self.value * rhs.value,
        }
    }
}

impl Div<i64> for RationalTime {
    type Output = Self;
    fn div(self, rhs: i64) -> Self {
        if self.is_sentinel() || rhs == 0 {
            return self;
        }
        Self {
            value: self.value / rhs,
        }
    }
}

impl Div for RationalTime {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        if self.is_sentinel() || rhs.is_zero() {
            return self;
        }
        Self {
            value: self.value / rhs.value,
        }
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::MIN {
            write!(f, "-inf")
        } else if *self == Self::MAX {
            write!(f, "+inf")
        } else {
            write!(f, "{:.3}s", self.to_f64())
        }
    }
}

// ── Time range ──────────────────────────────────────────────────

/// A time range with inclusive in point and exclusive out point.
///
/// Always normalized so that `in_point() <= out_point()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeRange {
    in_point: RationalTime,
    out_point: RationalTime,
}

impl TimeRange {
    /// Empty range at zero.
    pub const EMPTY: Self = Self {
        in_point: RationalTime::ZERO,
        out_point: RationalTime::ZERO,
    };

    /// Everything from `MIN` to `MAX`.
    pub const ALL: Self = Self {
        in_point: RationalTime::MIN,
        out_point: RationalTime::MAX,
    };

    /// Create a range, swapping the points if given in reverse.
    pub fn new(a: RationalTime, b: RationalTime) -> Self {
        if a <= b {
            Self {
                in_point: a,
                out_point: b,
            }
        } else {
            Self {
                in_point: b,
                out_point: a,
            }
        }
    }

    /// Range of whole seconds, convenient for tests and configuration.
    pub fn seconds(in_s: i64, out_s: i64) -> Self {
        Self::new(
            RationalTime::from_integer(in_s),
            RationalTime::from_integer(out_s),
        )
    }

    /// Zero-length range at a single instant.
    pub fn at(time: RationalTime) -> Self {
        Self {
            in_point: time,
            out_point: time,
        }
    }

    #[inline]
    pub fn in_point(&self) -> RationalTime {
        self.in_point
    }

    #[inline]
    pub fn out_point(&self) -> RationalTime {
        self.out_point
    }

    #[inline]
    pub fn length(&self) -> RationalTime {
        self.out_point - self.in_point
    }

    pub fn set_in(&mut self, in_point: RationalTime) {
        *self = Self::new(in_point, self.out_point);
    }

    pub fn set_out(&mut self, out_point: RationalTime) {
        *self = Self::new(self.in_point, out_point);
    }

    pub fn set_range(&mut self, in_point: RationalTime, out_point: RationalTime) {
        *self = Self::new(in_point, out_point);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_point == self.out_point
    }

    /// Whether the ranges touch or overlap. With inclusive flags,
    /// adjacent ranges count as overlapping.
    pub fn overlaps_with(&self, other: &TimeRange, in_inclusive: bool, out_inclusive: bool) -> bool {
        let misses_in = if in_inclusive {
            other.out_point < self.in_point
        } else {
            other.out_point <= self.in_point
        };
        let misses_out = if out_inclusive {
            other.in_point > self.out_point
        } else {
            other.in_point >= self.out_point
        };
        !misses_in && !misses_out
    }

    /// Whether `other` lies completely within this range.
    pub fn contains_range(&self, other: &TimeRange, in_inclusive: bool, out_inclusive: bool) -> bool {
        let in_ok = if in_inclusive {
            other.in_point >= self.in_point
        } else {
            other.in_point > self.in_point
        };
        let out_ok = if out_inclusive {
            other.out_point <= self.out_point
        } else {
            other.out_point < self.out_point
        };
        in_ok && out_ok
    }

    /// Whether `time` lies in `[in, out)`.
    #[inline]
    pub fn contains(&self, time: RationalTime) -> bool {
        time >= self.in_point && time < self.out_point
    }

    /// Smallest range covering both.
    pub fn combined(&self, other: &TimeRange) -> TimeRange {
        Self::new(
            self.in_point.min(other.in_point),
            self.out_point.max(other.out_point),
        )
    }

    /// Shared part of both ranges, if it has any length.
    pub fn intersected(&self, other: &TimeRange) -> Option<TimeRange> {
        let in_point = self.in_point.max(other.in_point);
        let out_point = self.out_point.min(other.out_point);
        if in_point < out_point {
            Some(Self::new(in_point, out_point))
        } else {
            None
        }
    }

    /// Split into pieces whose boundaries fall on multiples of `chunk`.
    pub fn split(&self, chunk: RationalTime) -> Vec<TimeRange> {
        if chunk <= RationalTime::ZERO || self.is_empty() {
            return vec![*self];
        }
        let mut pieces = Vec::new();
        let mut start = self.in_point;
        while start < self.out_point {
            let boundary =
                RationalTime::from_timestamp(start.to_timestamp(chunk, Rounding::Floor) + 1, chunk);
            let end = boundary.min(self.out_point);
            pieces.push(Self::new(start, end));
            start = end;
        }
        pieces
    }
}

impl Add<RationalTime> for TimeRange {
    type Output = Self;
    fn add(self, rhs: RationalTime) -> Self {
        Self::new(self.in_point + rhs, self.out_point + rhs)
    }
}

impl Sub<RationalTime> for TimeRange {
    type Output = Self;
    fn sub(self, rhs: RationalTime) -> Self {
        Self::new(self.in_point - rhs, self.out_point - rhs)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.in_point, self.out_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_rounding() {
        let timebase = RationalTime::new(1, 24);
        let t = RationalTime::new(5, 96); // 1.25 frames
        assert_eq!(t.to_timestamp(timebase, Rounding::Floor), 1);
        assert_eq!(t.to_timestamp(timebase, Rounding::Round), 1);
        assert_eq!(t.to_timestamp(timebase, Rounding::Ceil), 2);
        assert_eq!(RationalTime::from_timestamp(48, timebase), RationalTime::from_integer(2));
    }

    #[test]
    fn test_negative_timestamp_floors_down() {
        let timebase = RationalTime::new(1, 10);
        let t = RationalTime::new(-1, 20);
        assert_eq!(t.to_timestamp(timebase, Rounding::Floor), -1);
    }

    #[test]
    fn test_sentinels_saturate() {
        let one = RationalTime::from_integer(1);
        assert_eq!(RationalTime::MAX + one, RationalTime::MAX);
        assert_eq!(one - RationalTime::MAX, RationalTime::MIN);
        assert_eq!(-RationalTime::MIN, RationalTime::MAX);
        assert!(RationalTime::MIN < RationalTime::ZERO);
    }

    #[test]
    fn test_time_arithmetic() {
        let a = RationalTime::new(1, 2);
        let b = RationalTime::new(1, 4);
        assert_eq!((a + b).to_f64(), 0.75);
        assert_eq!(a / b, RationalTime::from_integer(2));
        assert_eq!(RationalTime::new(1, 30).flipped(), RationalTime::from_integer(30));
    }

    #[test]
    fn test_from_f64() {
        let t = RationalTime::from_f64(0.5);
        assert_eq!(t, RationalTime::new(1, 2));
        assert_eq!(RationalTime::from_f64(f64::NAN), RationalTime::ZERO);
    }

    #[test]
    fn test_range_normalizes() {
        let r = TimeRange::seconds(10, 2);
        assert_eq!(r.in_point(), RationalTime::from_integer(2));
        assert_eq!(r.length(), RationalTime::from_integer(8));
    }

    #[test]
    fn test_range_overlap_inclusive_flags() {
        let a = TimeRange::seconds(0, 5);
        let b = TimeRange::seconds(5, 10);
        assert!(a.overlaps_with(&b, true, true));
        assert!(!a.overlaps_with(&b, false, false));
        assert!(a.intersected(&b).is_none());
    }

    #[test]
    fn test_range_contains() {
        let r = TimeRange::seconds(0, 10);
        assert!(r.contains(RationalTime::ZERO));
        assert!(!r.contains(RationalTime::from_integer(10)));
        assert!(r.contains_range(&TimeRange::seconds(2, 10), true, true));
        assert!(!r.contains_range(&TimeRange::seconds(2, 10), true, false));
    }

    #[test]
    fn test_range_intersected() {
        let a = TimeRange::seconds(0, 10);
        let b = TimeRange::seconds(5, 15);
        assert_eq!(a.intersected(&b), Some(TimeRange::seconds(5, 10)));
        assert_eq!(TimeRange::ALL.intersected(&a), Some(a));
    }

    #[test]
    fn test_range_split_aligns_to_chunks() {
        let r = TimeRange::new(RationalTime::new(1, 2), RationalTime::new(5, 2));
        let pieces = r.split(RationalTime::from_integer(1));
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], TimeRange::new(RationalTime::new(1, 2), RationalTime::from_integer(1)));
        assert_eq!(pieces[2], TimeRange::new(RationalTime::from_integer(2), RationalTime::new(5, 2)));
    }
}
