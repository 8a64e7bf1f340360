//! Daily streak arithmetic on UTC calendar dates.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;

use crate::models::StreakUpdate;

/// Record activity on `today`.
pub fn advance(current: i64, last_active: Option<NaiveDate>, today: NaiveDate) -> StreakUpdate {
    match last_active {
        Some(last) if last == today => StreakUpdate {
            consecutive_days: current,
            is_new_day: false,
        },
        Some(last) if last == today - Duration::days(1) => StreakUpdate {
            consecutive_days: current + 1,
            is_new_day: true,
        },
        _ => StreakUpdate {
            consecutive_days: 1,
            is_new_day: true,
        },
    }
}

/// Streak as it reads on `today`; a missed day breaks it.
pub fn current(current: i64, last_active: Option<NaiveDate>, today: NaiveDate) -> i64 {
    match last_active {
        Some(last) if (today - last).num_days() <= 1 => current,
        Some(_) => 0,
        None => current,
    }
}

/// Whether `current` broke the stored streak and the counter should be reset.
pub fn is_broken(last_active: Option<NaiveDate>, today: NaiveDate) -> bool {
    last_active.is_some_and(|last| (today - last).num_days() > 1)
}

/// Consecutive days ending today that appear in `dates`.
pub fn activity_streak<I>(dates: I, today: NaiveDate) -> i64
where
    I: IntoIterator<Item = NaiveDate>,
{
    let days: BTreeSet<NaiveDate> = dates.into_iter().collect();
    let mut streak = 0;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn advance_same_day_is_unchanged() {
        let update = advance(4, Some(d("2024-03-10")), d("2024-03-10"));
        assert_eq!(update.consecutive_days, 4);
        assert!(!update.is_new_day);
    }

    #[test]
    fn advance_next_day_increments() {
        let update = advance(4, Some(d("2024-03-09")), d("2024-03-10"));
        assert_eq!(update.consecutive_days, 5);
        assert!(update.is_new_day);

        // month boundary
        let update = advance(1, Some(d("2024-02-29")), d("2024-03-01"));
        assert_eq!(update.consecutive_days, 2);
    }

    #[test]
    fn advance_after_gap_or_first_visit_resets_to_one() {
        assert_eq!(advance(9, Some(d("2024-03-07")), d("2024-03-10")).consecutive_days, 1);
        let first = advance(0, None, d("2024-03-10"));
        assert_eq!(first.consecutive_days, 1);
        assert!(first.is_new_day);
    }

    #[test]
    fn current_reads_zero_after_missed_day() {
        assert_eq!(current(5, Some(d("2024-03-10")), d("2024-03-10")), 5);
        assert_eq!(current(5, Some(d("2024-03-09")), d("2024-03-10")), 5);
        assert_eq!(current(5, Some(d("2024-03-08")), d("2024-03-10")), 0);
        assert_eq!(current(0, None, d("2024-03-10")), 0);

        assert!(is_broken(Some(d("2024-03-08")), d("2024-03-10")));
        assert!(!is_broken(Some(d("2024-03-09")), d("2024-03-10")));
        assert!(!is_broken(None, d("2024-03-10")));
    }

    #[test]
    fn activity_streak_counts_back_from_today() {
        let today = d("2024-03-10");
        let dates = vec![d("2024-03-10"), d("2024-03-09"), d("2024-03-09"), d("2024-03-08"), d("2024-03-05")];
        assert_eq!(activity_streak(dates, today), 3);

        assert_eq!(activity_streak(vec![d("2024-03-09")], today), 0);
        assert_eq!(activity_streak(Vec::new(), today), 0);
    }
}
