//! Property tests for walk-forward window generation.
//!
//! For any calendar and window geometry that fits:
//! 1. train_end < validate_start and validate_end < holdout_start
//! 2. Windows advance strictly by `step_days` trading days
//! 3. Every window spans exactly train_days + validate_days trading days

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use factorlab_runner::config::WalkForwardConfig;
use factorlab_runner::{generate_windows, WalkForwardError};

fn calendar(n: usize, gaps: &[u8]) -> Vec<NaiveDate> {
    let mut d = NaiveDate::from_ymd_opt(2019, 1, 2).unwrap();
    (0..n)
        .map(|i| {
            let out = d;
            d += Duration::days(1 + gaps[i % gaps.len()] as i64);
            out
        })
        .collect()
}

proptest! {
    #[test]
    fn windows_stay_ordered_and_before_holdout(
        n in 30usize..400,
        gaps in prop::collection::vec(0u8..4, 1..10),
        train in 5usize..120,
        validate in 1usize..40,
        step in 1usize..60,
        holdout_offset in 0usize..30,
    ) {
        let cal = calendar(n + holdout_offset + 1, &gaps);
        let holdout_start = cal[n];
        let config = WalkForwardConfig {
            start: cal[0],
            holdout_start,
            holdout_end: *cal.last().unwrap(),
            train_days: train,
            validate_days: validate,
            step_days: step,
        };

        match generate_windows(&cal, &config) {
            Ok(windows) => {
                prop_assert!(!windows.is_empty());
                for w in &windows {
                    prop_assert!(w.train_start <= w.train_end);
                    prop_assert!(w.train_end < w.validate_start);
                    prop_assert!(w.validate_start <= w.validate_end);
                    prop_assert!(w.validate_end < holdout_start);
                    let span = cal.iter().filter(|d| **d >= w.train_start && **d <= w.validate_end).count();
                    prop_assert_eq!(span, train + validate);
                }
                for pair in windows.windows(2) {
                    let a = cal.iter().position(|d| *d == pair[0].train_start).unwrap();
                    let b = cal.iter().position(|d| *d == pair[1].train_start).unwrap();
                    prop_assert_eq!(b - a, step);
                }
            }
            Err(WalkForwardError::NoWindows { available, required }) => {
                prop_assert_eq!(available, n);
                prop_assert!(available < required);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}
