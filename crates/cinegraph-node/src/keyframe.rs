//! Keyframe tracks with hold, linear and Bézier interpolation.
//!
//! Keys live in a sorted `Vec` per track. Neighbors are found by adjacent
//! index, so a key never needs to know its track or parent node.

use cinegraph_core::{RationalTime, TimeRange};
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::value::NodeValueData;

// ── Curve solving ───────────────────────────────────────────────

const SOLVE_TOLERANCE: f64 = 1e-10;
const NEWTON_ITERATIONS: usize = 8;
const BISECT_ITERATIONS: usize = 64;

fn cubic(t: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    let mt = 1.0 - t;
    mt * mt * mt * a + 3.0 * mt * mt * t * b + 3.0 * mt * t * t * c + t * t * t * d
}

fn cubic_dt(t: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    let mt = 1.0 - t;
    3.0 * mt * mt * (b - a) + 6.0 * mt * t * (c - b) + 3.0 * t * t * (d - c)
}

fn quadratic(t: f64, a: f64, b: f64, c: f64) -> f64 {
    let mt = 1.0 - t;
    mt * mt * a + 2.0 * mt * t * b + t * t * c
}

fn quadratic_dt(t: f64, a: f64, b: f64, c: f64) -> f64 {
    2.0 * (1.0 - t) * (b - a) + 2.0 * t * (c - b)
}

/// Find `t` in [0, 1] where the curve's X equals `x`.
///
/// Newton-Raphson from a linear guess, then bisection if that did not
/// converge. X must be monotonic over [0, 1].
fn solve_t(x: f64, start: f64, end: f64, f: impl Fn(f64) -> f64, df: impl Fn(f64) -> f64) -> f64 {
    let x = x.clamp(start.min(end), start.max(end));
    let span = end - start;
    if span.abs() < f64::EPSILON {
        return 0.0;
    }

    let mut t = ((x - start) / span).clamp(0.0, 1.0);
    for _ in 0..NEWTON_ITERATIONS {
        let err = f(t) - x;
        if err.abs() < SOLVE_TOLERANCE {
            return t;
        }
        let dx = df(t);
        if dx.abs() < 1e-12 {
            break;
        }
        t = (t - err / dx).clamp(0.0, 1.0);
    }
    if (f(t) - x).abs() < SOLVE_TOLERANCE {
        return t;
    }

    let (mut lo, mut hi) = (0.0, 1.0);
    for _ in 0..BISECT_ITERATIONS {
        t = (lo + hi) * 0.5;
        let test = f(t);
        if (test - x).abs() < SOLVE_TOLERANCE {
            break;
        }
        if (test < x) == (span > 0.0) {
            lo = t;
        } else {
            hi = t;
        }
    }
    t
}

/// Y of a cubic Bézier segment at X.
pub fn cubic_y_for_x(x: f64, p0: DVec2, p1: DVec2, p2: DVec2, p3: DVec2) -> f64 {
    let t = solve_t(
        x,
        p0.x,
        p3.x,
        |t| cubic(t, p0.x, p1.x, p2.x, p3.x),
        |t| cubic_dt(t, p0.x, p1.x, p2.x, p3.x),
    );
    cubic(t, p0.y, p1.y, p2.y, p3.y)
}

/// Y of a quadratic Bézier segment at X.
pub fn quadratic_y_for_x(x: f64, p0: DVec2, p1: DVec2, p2: DVec2) -> f64 {
    let t = solve_t(
        x,
        p0.x,
        p2.x,
        |t| quadratic(t, p0.x, p1.x, p2.x),
        |t| quadratic_dt(t, p0.x, p1.x, p2.x),
    );
    quadratic(t, p0.y, p1.y, p2.y)
}

// ── Keyframe ────────────────────────────────────────────────────

/// How a key blends toward the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyframeType {
    #[default]
    Linear,
    /// Keep this key's value until the next key.
    Hold,
    Bezier,
}

/// A value on one track at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    pub time: RationalTime,
    pub value: NodeValueData,
    pub ty: KeyframeType,
    /// Handle offsets in (seconds, value) relative to the key.
    pub bezier_in: DVec2,
    pub bezier_out: DVec2,
}

impl Keyframe {
    pub fn new(time: RationalTime, value: NodeValueData, ty: KeyframeType) -> Self {
        Self {
            time,
            value,
            ty,
            bezier_in: DVec2::ZERO,
            bezier_out: DVec2::ZERO,
        }
    }
}

// ── Keyframe track ──────────────────────────────────────────────

/// Sorted keys for one track of one input element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyframeTrack {
    keys: Vec<Keyframe>,
}

impl KeyframeTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn get(&self, index: usize) -> Option<&Keyframe> {
        self.keys.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Keyframe> {
        self.keys.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn first(&self) -> Option<&Keyframe> {
        self.keys.first()
    }

    pub fn last(&self) -> Option<&Keyframe> {
        self.keys.last()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Insert keeping time order. A key already at that time is replaced.
    pub fn insert(&mut self, key: Keyframe) -> usize {
        match self.keys.binary_search_by(|k| k.time.cmp(&key.time)) {
            Ok(i) => {
                self.keys[i] = key;
                i
            }
            Err(i) => {
                self.keys.insert(i, key);
                i
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Keyframe> {
        (index < self.keys.len()).then(|| self.keys.remove(index))
    }

    pub fn index_at_time(&self, time: RationalTime) -> Option<usize> {
        self.keys.binary_search_by(|k| k.time.cmp(&time)).ok()
    }

    /// Move a key and re-sort. Returns its new index.
    ///
    /// Another key at the destination time is replaced.
    pub fn set_time(&mut self, index: usize, time: RationalTime) -> Option<usize> {
        let mut key = self.remove(index)?;
        key.time = time;
        Some(self.insert(key))
    }

    /// Change a key's type. Switching to Bézier gives zero handles a
    /// default span of half the distance to each neighbor.
    pub fn set_type(&mut self, index: usize, ty: KeyframeType) -> bool {
        let prev = index.checked_sub(1).and_then(|i| self.keys.get(i)).map(|k| k.time);
        let next = self.keys.get(index + 1).map(|k| k.time);
        let Some(key) = self.keys.get_mut(index) else {
            return false;
        };
        key.ty = ty;

        if ty == KeyframeType::Bezier {
            let t = key.time.to_f64();
            if key.bezier_in == DVec2::ZERO {
                let x = prev.map_or(-1.0, |p| (p.to_f64() - t) * 0.5);
                key.bezier_in = DVec2::new(x, 0.0);
            }
            if key.bezier_out == DVec2::ZERO {
                let x = next.map_or(1.0, |n| (n.to_f64() - t) * 0.5);
                key.bezier_out = DVec2::new(x, 0.0);
            }
        }
        true
    }

    /// In-handle clamped so it never reaches past the previous key.
    pub fn valid_bezier_control_in(&self, index: usize) -> DVec2 {
        let Some(key) = self.keys.get(index) else {
            return DVec2::ZERO;
        };
        let t = key.time.to_f64();
        let mut x = t + key.bezier_in.x;
        if let Some(prev) = index.checked_sub(1).and_then(|i| self.keys.get(i)) {
            x = x.max(prev.time.to_f64());
        }
        DVec2::new(x - t, key.bezier_in.y)
    }

    /// Out-handle clamped so it never reaches past the next key.
    pub fn valid_bezier_control_out(&self, index: usize) -> DVec2 {
        let Some(key) = self.keys.get(index) else {
            return DVec2::ZERO;
        };
        let t = key.time.to_f64();
        let mut x = t + key.bezier_out.x;
        if let Some(next) = self.keys.get(index + 1) {
            x = x.min(next.time.to_f64());
        }
        DVec2::new(x - t, key.bezier_out.y)
    }

    /// Latest key strictly before `time`.
    pub fn closest_before(&self, time: RationalTime) -> Option<&Keyframe> {
        let i = self.keys.partition_point(|k| k.time < time);
        i.checked_sub(1).map(|i| &self.keys[i])
    }

    /// Earliest key strictly after `time`.
    pub fn closest_after(&self, time: RationalTime) -> Option<&Keyframe> {
        let i = self.keys.partition_point(|k| k.time <= time);
        self.keys.get(i)
    }

    /// Span between the neighbors of `index`; unbounded on a missing side.
    pub fn range_around_index(&self, index: usize) -> TimeRange {
        let in_point = index
            .checked_sub(1)
            .and_then(|i| self.keys.get(i))
            .map_or(RationalTime::MIN, |k| k.time);
        let out_point = self.keys.get(index + 1).map_or(RationalTime::MAX, |k| k.time);
        TimeRange::new(in_point, out_point)
    }

    /// Times whose value depends on the key at `index`.
    ///
    /// A held previous key already covers everything up to this one.
    pub fn range_affected_by(&self, index: usize) -> TimeRange {
        let mut range = self.range_around_index(index);
        let prev_holds = index
            .checked_sub(1)
            .and_then(|i| self.keys.get(i))
            .is_some_and(|k| k.ty == KeyframeType::Hold);
        if prev_holds {
            if let Some(key) = self.keys.get(index) {
                range.set_in(key.time);
            }
        }
        range
    }

    /// Value at `time`, or `None` for an empty track.
    ///
    /// `interpolable` selects blending; otherwise values step at each key.
    pub fn evaluate(&self, time: RationalTime, interpolable: bool) -> Option<NodeValueData> {
        let first = self.keys.first()?;
        if first.time >= time {
            return Some(first.value.clone());
        }
        let last = self.keys.last()?;
        if last.time <= time {
            return Some(last.value.clone());
        }

        let after_idx = self.keys.partition_point(|k| k.time <= time);
        let before_idx = after_idx - 1;
        let before = &self.keys[before_idx];
        let after = &self.keys[after_idx];

        if before.time == time || (!interpolable || before.ty == KeyframeType::Hold) {
            return Some(before.value.clone());
        }

        let bt = before.time.to_f64();
        let at = after.time.to_f64();
        let bv = before.value.to_f64();
        let av = after.value.to_f64();
        let x = time.to_f64();
        let p0 = DVec2::new(bt, bv);
        let p3 = DVec2::new(at, av);

        let y = match (before.ty, after.ty) {
            (KeyframeType::Bezier, KeyframeType::Bezier) => {
                let p1 = p0 + self.valid_bezier_control_out(before_idx);
                let p2 = p3 + self.valid_bezier_control_in(after_idx);
                cubic_y_for_x(x, p0, p1, p2, p3)
            }
            (KeyframeType::Bezier, _) => {
                let p1 = p0 + self.valid_bezier_control_out(before_idx);
                quadratic_y_for_x(x, p0, p1, p3)
            }
            (_, KeyframeType::Bezier) => {
                let p1 = p3 + self.valid_bezier_control_in(after_idx);
                quadratic_y_for_x(x, p0, p1, p3)
            }
            _ => {
                let p = (x - bt) / (at - bt);
                bv + (av - bv) * p
            }
        };

        Some(match before.value {
            NodeValueData::Rational(_) => NodeValueData::Rational(RationalTime::from_f64(y)),
            _ => NodeValueData::Float(y),
        })
    }
}
