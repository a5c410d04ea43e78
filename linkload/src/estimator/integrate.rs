/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Numeric helpers over ordered telemetry series.

use chrono::{DateTime, Utc};

use crate::telemetry::Sample;

/// Trapezoidal integral of `series` over time, in value·seconds.
///
/// Pairs whose interval is zero or negative contribute nothing.  Fewer than
/// two samples integrate to `0.0`.
pub fn trapezoid(series: &[Sample]) -> f64 {
    series
        .windows(2)
        .map(|pair| {
            let dt = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0;
            if dt > 0.0 {
                (pair[0].value + pair[1].value) / 2.0 * dt
            } else {
                0.0
            }
        })
        .sum()
}

/// The sample closest in time to `at`, if one lies within `tolerance_secs`.
///
/// `series` must be ordered by timestamp.
pub fn nearest(series: &[Sample], at: DateTime<Utc>, tolerance_secs: f64) -> Option<&Sample> {
    let idx = series.partition_point(|s| s.timestamp < at);
    let distance = |s: &Sample| (s.timestamp - at).num_milliseconds().abs() as f64 / 1000.0;

    let before = idx.checked_sub(1).and_then(|i| series.get(i));
    let after = series.get(idx);
    let best = match (before, after) {
        (Some(b), Some(a)) => {
            if distance(a) < distance(b) {
                a
            } else {
                b
            }
        }
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => return None,
    };

    (distance(best) <= tolerance_secs).then_some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn series(points: &[(i64, f64)]) -> Vec<Sample> {
        points.iter().map(|&(s, v)| Sample::new(t(s), v)).collect()
    }

    // ── trapezoid ─────────────────────────────────────────────────────────────

    #[test]
    fn constant_series_integrates_to_value_times_span() {
        let s = series(&[(0, 500.0), (10, 500.0), (30, 500.0)]);
        assert!((trapezoid(&s) - 500.0 * 30.0).abs() < 1e-9);
    }

    #[test]
    fn ramp_uses_pair_averages() {
        let s = series(&[(0, 0.0), (10, 100.0)]);
        assert!((trapezoid(&s) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn empty_and_single_point_are_zero() {
        assert_eq!(trapezoid(&[]), 0.0);
        assert_eq!(trapezoid(&series(&[(0, 900.0)])), 0.0);
    }

    #[test]
    fn duplicate_and_backwards_timestamps_are_skipped() {
        let s = series(&[(0, 100.0), (0, 300.0), (10, 300.0), (5, 1000.0)]);
        // Only the (0 → 10) interval counts.
        assert!((trapezoid(&s) - 3000.0).abs() < 1e-9);
    }

    // ── nearest ───────────────────────────────────────────────────────────────

    #[test]
    fn nearest_picks_closest_neighbour() {
        let s = series(&[(0, 1.0), (10, 2.0), (20, 3.0)]);
        assert_eq!(nearest(&s, t(8), 5.0).unwrap().value, 2.0);
        assert_eq!(nearest(&s, t(14), 5.0).unwrap().value, 2.0);
        assert_eq!(nearest(&s, t(20), 5.0).unwrap().value, 3.0);
        assert_eq!(nearest(&s, t(-3), 5.0).unwrap().value, 1.0);
    }

    #[test]
    fn nearest_respects_tolerance() {
        let s = series(&[(0, 1.0), (20, 2.0)]);
        assert!(nearest(&s, t(10), 5.0).is_none());
        assert!(nearest(&s, t(30), 5.0).is_none());
        assert!(nearest(&[], t(0), 5.0).is_none());
    }
}
