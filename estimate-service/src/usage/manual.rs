//! Spread manually entered monthly or annual totals over 15-minute intervals.
//!
//! Distribution is flat. Days inside a travel range get no usage and the
//! period total is spread over the remaining intervals instead, so each
//! period keeps its entered total unless every one of its days is excluded.
//! Overlapping periods sum into the same interval.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use plan_client::domain::IntervalUsagePoint;
use serde::Deserialize;

pub const INTERVAL_MINUTES: i64 = 15;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ManualUsageError {
    #[error("invalid date range {start}..={end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid usage total {0}")]
    InvalidTotal(f64),
}

/// One month of entered usage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonthlyEntry {
    pub year: i32,
    pub month: u32,
    pub kwh: f64,
}

/// Inclusive range of days the household was away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TravelRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TravelRange {
    fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

fn is_travel_day(day: NaiveDate, travel: &[TravelRange]) -> bool {
    travel.iter().any(|r| r.contains(day))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next?.pred_opt()
}

/// Day range covered by a month's entry.
///
/// With a bill end day the period runs from the day after the previous
/// month's bill end through this month's bill end. The end day is clamped to
/// each month's length (a 31 in February ends on the 28th or 29th).
///
/// Consecutive months always tile: no day is left uncovered or counted twice,
/// even where the clamp shortens one month and not the next.
fn billing_period(year: i32, month: u32, bill_end_day: Option<u32>) -> Option<(NaiveDate, NaiveDate)> {
    let last = last_day_of_month(year, month)?;
    let Some(end_day) = bill_end_day.filter(|d| (1..=31).contains(d)) else {
        return Some((NaiveDate::from_ymd_opt(year, month, 1)?, last));
    };

    let end = NaiveDate::from_ymd_opt(year, month, end_day.min(last.day()))?;
    let (py, pm) = if month == 1 { (year - 1, 12) } else { (year, month - 1) };
    let prev_last = last_day_of_month(py, pm)?;
    let prev_end = NaiveDate::from_ymd_opt(py, pm, end_day.min(prev_last.day()))?;
    Some((prev_end.succ_opt()?, end))
}

/// Local interval starts for `[start, end]` that exist in `tz`. Wall-clock
/// times skipped by a DST jump have no interval.
fn interval_starts(start: NaiveDate, end: NaiveDate, travel: &[TravelRange], tz: &Tz) -> Vec<NaiveDateTime> {
    let mut out = Vec::new();
    let mut day = start;
    while day <= end {
        if !is_travel_day(day, travel) {
            let midnight = day.and_time(chrono::NaiveTime::MIN);
            for slot in 0..(24 * 60 / INTERVAL_MINUTES) {
                let local = midnight + Duration::minutes(slot * INTERVAL_MINUTES);
                if !matches!(tz.from_local_datetime(&local), LocalResult::None) {
                    out.push(local);
                }
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    out
}

/// Values are kept at full precision, not rounded per interval, so each
/// period sums back to its entered total. Travel days shift their share onto
/// the remaining days the same way for monthly and annual totals.
fn spread(
    acc: &mut BTreeMap<NaiveDateTime, f64>,
    start: NaiveDate,
    end: NaiveDate,
    total_kwh: f64,
    travel: &[TravelRange],
    tz: &Tz,
) {
    let slots = interval_starts(start, end, travel, tz);
    if slots.is_empty() {
        return;
    }
    let per_slot = total_kwh / slots.len() as f64;
    for slot in slots {
        *acc.entry(slot).or_insert(0.0) += per_slot;
    }
}

fn into_points(acc: BTreeMap<NaiveDateTime, f64>, tz: &Tz) -> Vec<IntervalUsagePoint> {
    acc.into_iter()
        .filter(|(_, kwh)| *kwh > 0.0)
        .filter_map(|(local, kwh)| {
            let at = tz.from_local_datetime(&local).earliest()?;
            Some(IntervalUsagePoint {
                timestamp: at.to_rfc3339(),
                kwh_import: kwh,
                kwh_export: 0.0,
            })
        })
        .collect()
}

/// Intervals for a set of monthly totals. Entries with an invalid month or a
/// negative or non-finite total are skipped.
pub fn monthly_to_intervals(
    entries: &[MonthlyEntry],
    bill_end_day: Option<u32>,
    travel: &[TravelRange],
    tz: Tz,
) -> Vec<IntervalUsagePoint> {
    let mut acc = BTreeMap::new();
    for e in entries {
        if !e.kwh.is_finite() || e.kwh < 0.0 {
            tracing::warn!(year = e.year, month = e.month, kwh = e.kwh, "skipping invalid monthly total");
            continue;
        }
        let Some((start, end)) = billing_period(e.year, e.month, bill_end_day) else {
            tracing::warn!(year = e.year, month = e.month, "skipping invalid month");
            continue;
        };
        spread(&mut acc, start, end, e.kwh, travel, &tz);
    }
    into_points(acc, &tz)
}

/// Intervals for one total spread over the inclusive day range `[start, end]`.
pub fn annual_to_intervals(
    annual_kwh: f64,
    start: NaiveDate,
    end: NaiveDate,
    travel: &[TravelRange],
    tz: Tz,
) -> Result<Vec<IntervalUsagePoint>, ManualUsageError> {
    if end < start {
        return Err(ManualUsageError::InvalidRange { start, end });
    }
    if !annual_kwh.is_finite() || annual_kwh < 0.0 {
        return Err(ManualUsageError::InvalidTotal(annual_kwh));
    }
    let mut acc = BTreeMap::new();
    spread(&mut acc, start, end, annual_kwh, travel, &tz);
    Ok(into_points(acc, &tz))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chicago() -> Tz {
        "America/Chicago".parse().unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sum(points: &[IntervalUsagePoint]) -> f64 {
        points.iter().map(|p| p.kwh_import).sum()
    }

    #[test]
    fn calendar_month_is_spread_flat() {
        let pts = monthly_to_intervals(
            &[MonthlyEntry {
                year: 2024,
                month: 4,
                kwh: 960.0,
            }],
            None,
            &[],
            chicago(),
        );
        assert_eq!(pts.len(), 30 * 96);
        assert!((sum(&pts) - 960.0).abs() < 1e-6);
        assert!((pts[0].kwh_import - 960.0 / 2880.0).abs() < 1e-12);
        assert!(pts[0].timestamp.starts_with("2024-04-01T00:00:00"));
    }

    #[test]
    fn bill_end_day_shifts_the_period() {
        assert_eq!(billing_period(2024, 3, Some(15)), Some((d(2024, 2, 16), d(2024, 3, 15))));
        assert_eq!(billing_period(2024, 1, Some(20)), Some((d(2023, 12, 21), d(2024, 1, 20))));
        // Clamped to month length on both ends.
        assert_eq!(billing_period(2024, 3, Some(31)), Some((d(2024, 3, 1), d(2024, 3, 31))));
        assert_eq!(billing_period(2024, 2, Some(31)), Some((d(2024, 2, 1), d(2024, 2, 29))));
        assert_eq!(billing_period(2024, 13, None), None);
    }

    #[test]
    fn travel_days_are_excluded_and_total_preserved() {
        let travel = [TravelRange {
            start: d(2024, 6, 10),
            end: d(2024, 6, 19),
        }];
        let pts = monthly_to_intervals(
            &[MonthlyEntry {
                year: 2024,
                month: 6,
                kwh: 600.0,
            }],
            None,
            &travel,
            chicago(),
        );
        assert_eq!(pts.len(), 20 * 96);
        assert!((sum(&pts) - 600.0).abs() < 1e-6);
        assert!(!pts.iter().any(|p| p.timestamp.starts_with("2024-06-15")));
    }

    #[test]
    fn overlapping_periods_sum() {
        let entries = [
            MonthlyEntry {
                year: 2024,
                month: 5,
                kwh: 100.0,
            },
            MonthlyEntry {
                year: 2024,
                month: 5,
                kwh: 200.0,
            },
        ];
        let pts = monthly_to_intervals(&entries, None, &[], chicago());
        assert_eq!(pts.len(), 31 * 96);
        assert!((sum(&pts) - 300.0).abs() < 1e-6);
    }

    #[test]
    fn zero_totals_produce_no_intervals() {
        let pts = monthly_to_intervals(
            &[MonthlyEntry {
                year: 2024,
                month: 5,
                kwh: 0.0,
            }],
            None,
            &[],
            chicago(),
        );
        assert!(pts.is_empty());
    }

    #[test]
    fn spring_forward_day_has_fewer_intervals() {
        let pts = annual_to_intervals(23.0, d(2024, 3, 10), d(2024, 3, 10), &[], chicago()).unwrap();
        assert_eq!(pts.len(), 92);
        assert!((sum(&pts) - 23.0).abs() < 1e-9);
    }

    #[test]
    fn annual_total_covers_the_whole_range() {
        let pts = annual_to_intervals(3650.0, d(2023, 1, 1), d(2023, 12, 31), &[], chicago()).unwrap();
        assert!((sum(&pts) - 3650.0).abs() < 1e-6);
    }

    #[test]
    fn bill_periods_tile_the_year_without_gaps() {
        for end_day in [1, 15, 28, 30, 31] {
            let mut expected_start = billing_period(2024, 1, Some(end_day)).unwrap().0;
            for month in 1..=12 {
                let (start, end) = billing_period(2024, month, Some(end_day)).unwrap();
                assert_eq!(start, expected_start, "end day {end_day}, month {month}");
                assert!(start <= end);
                expected_start = end.succ_opt().unwrap();
            }
        }
    }

    #[test]
    fn annual_travel_days_shift_usage_without_losing_it() {
        let travel = [TravelRange {
            start: d(2023, 7, 1),
            end: d(2023, 7, 31),
        }];
        let pts = annual_to_intervals(1000.0, d(2023, 6, 1), d(2023, 8, 31), &travel, chicago()).unwrap();
        assert_eq!(pts.len(), (30 + 31) * 96);
        assert!((sum(&pts) - 1000.0).abs() < 1e-6);
        assert!(!pts.iter().any(|p| p.timestamp.starts_with("2023-07")));
    }

    #[test]
    fn annual_rejects_reversed_range() {
        assert_eq!(
            annual_to_intervals(1.0, d(2024, 2, 1), d(2024, 1, 1), &[], chicago()),
            Err(ManualUsageError::InvalidRange {
                start: d(2024, 2, 1),
                end: d(2024, 1, 1),
            })
        );
    }
}
