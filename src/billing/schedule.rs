//! Installment schedule derivation.
//!
//! Given a contract term and a month-step, work out how many installments the
//! rent splits into, how much each one carries, and when each falls due.
//! Everything here is pure; callers persist the result.

use chrono::{Datelike, Months, NaiveDate};

#[derive(Debug, Clone, PartialEq)]
pub struct Installment {
    pub due_date: NaiveDate,
    pub amount: f64,
}

/// Elapsed months between two dates as whole months plus a day-of-month
/// fraction over 30.
///
/// The day/30 fraction is a deliberate approximation, not calendar-exact:
/// lease durations are quoted in months and the residual days only nudge the
/// rounding decision below.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> f64 {
    let whole_months =
        (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32);
    let day_fraction = f64::from(end.day() as i32 - start.day() as i32) / 30.0;
    f64::from(whole_months) + day_fraction
}

/// Number of installments for a term at the given month-step.
///
/// Rounding decides whether a trailing partial period becomes its own
/// installment: a remainder under half a step is absorbed into the earlier
/// installments (12.6 months / 6 → 2, 15 months / 6 → 3). A non-positive
/// step or duration collapses to a single lump installment.
pub fn installment_count(start: NaiveDate, end: NaiveDate, month_step: i32) -> u32 {
    if month_step <= 0 {
        return 1;
    }
    let total_months = months_between(start, end);
    if total_months <= 0.0 {
        return 1;
    }
    let count = (total_months / f64::from(month_step)).round() as i64;
    count.max(1) as u32
}

/// Split a total amount into equal cent-rounded shares.
///
/// Naive division does not sum back to the total once rounded, so the last
/// installment absorbs the remainder; the parts always add up to the total
/// exactly (in cents).
pub fn split_amount(total: f64, count: u32) -> Vec<f64> {
    let count = i64::from(count.max(1));
    let total_cents = (total * 100.0).round() as i64;
    let share_cents = total_cents / count;

    let mut parts = vec![share_cents as f64 / 100.0; (count - 1) as usize];
    let last_cents = total_cents - share_cents * (count - 1);
    parts.push(last_cents as f64 / 100.0);
    parts
}

/// Due dates spaced `month_step` calendar months apart starting at `start`.
///
/// Month arithmetic clamps to the end of shorter months (Jan 31 + 1 month →
/// Feb 28/29). The rounding rule in [`installment_count`] keeps the final due
/// date inside the contract term.
pub fn due_dates(start: NaiveDate, month_step: i32, count: u32) -> Vec<NaiveDate> {
    let step = month_step.max(0) as u32;
    (0..count)
        .map(|index| {
            start
                .checked_add_months(Months::new(step * index))
                .unwrap_or(start)
        })
        .collect()
}

/// Derive the full installment schedule for a contract term.
///
/// A month-step of 0 ("unrecognized frequency") degrades to one installment
/// for the whole amount, due at the start of the term.
pub fn build_schedule(
    start: NaiveDate,
    end: NaiveDate,
    month_step: i32,
    total_amount: f64,
) -> Vec<Installment> {
    if month_step <= 0 {
        return vec![Installment {
            due_date: start,
            amount: split_amount(total_amount, 1)[0],
        }];
    }

    let count = installment_count(start, end, month_step);
    let amounts = split_amount(total_amount, count);
    let dates = due_dates(start, month_step, count);

    dates
        .into_iter()
        .zip(amounts)
        .map(|(due_date, amount)| Installment { due_date, amount })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{build_schedule, installment_count, months_between, split_amount};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn sum_cents(amounts: &[f64]) -> i64 {
        amounts
            .iter()
            .map(|amount| (amount * 100.0).round() as i64)
            .sum()
    }

    #[test]
    fn whole_year_in_quarters() {
        let start = date(2025, 1, 1);
        let end = date(2026, 1, 1);
        assert_eq!(installment_count(start, end, 3), 4);
    }

    #[test]
    fn remainder_under_half_a_step_is_absorbed() {
        // 12.6 months at a 6-month step: the 0.6-month tail folds into the
        // second installment instead of spawning a third.
        let start = date(2025, 1, 1);
        let end = date(2026, 1, 19);
        assert_eq!(installment_count(start, end, 6), 2);
    }

    #[test]
    fn remainder_of_half_a_step_becomes_an_installment() {
        // 15 months at a 6-month step → 2.5 cycles → 3 installments.
        let start = date(2025, 1, 1);
        let end = date(2026, 4, 1);
        assert_eq!(installment_count(start, end, 6), 3);
    }

    #[test]
    fn degenerate_terms_collapse_to_one_installment() {
        let start = date(2025, 6, 1);
        assert_eq!(installment_count(start, start, 3), 1);
        assert_eq!(installment_count(start, date(2025, 5, 1), 3), 1);
        assert_eq!(installment_count(start, date(2026, 6, 1), 0), 1);
        assert_eq!(installment_count(start, date(2026, 6, 1), -2), 1);
    }

    #[test]
    fn split_preserves_the_total_exactly() {
        let parts = split_amount(33000.0, 6);
        assert_eq!(parts.len(), 6);
        assert!(parts.iter().all(|amount| (*amount - 5500.0).abs() < 1e-9));
        assert_eq!(sum_cents(&parts), 3_300_000);

        // An uneven division: the last part absorbs the rounding remainder.
        let parts = split_amount(10000.0, 3);
        assert_eq!(sum_cents(&parts), 1_000_000);
        assert!((parts[0] - 3333.33).abs() < 1e-9);
        assert!((parts[2] - 3333.34).abs() < 1e-9);
    }

    #[test]
    fn quarterly_schedule_for_a_multi_year_term() {
        // 2024-04-20 → 2026-01-19 is 20.97 months; at a 3-month step the
        // formula rounds 6.99 cycles up to 7 installments.
        let start = date(2024, 4, 20);
        let end = date(2026, 1, 19);
        assert!((months_between(start, end) - (21.0 - 1.0 / 30.0)).abs() < 1e-9);

        let schedule = build_schedule(start, end, 3, 33000.0);
        assert_eq!(schedule.len(), 7);
        assert_eq!(schedule[0].due_date, start);
        assert_eq!(schedule[1].due_date, date(2024, 7, 20));
        assert_eq!(schedule.last().unwrap().due_date, date(2025, 10, 20));
        assert!(schedule.last().unwrap().due_date <= end);
        assert_eq!(sum_cents(&schedule.iter().map(|i| i.amount).collect::<Vec<_>>()), 3_300_000);
    }

    #[test]
    fn unrecognized_frequency_is_a_single_lump_installment() {
        let start = date(2025, 3, 1);
        let end = date(2026, 3, 1);
        let schedule = build_schedule(start, end, 0, 48000.0);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule[0].due_date, start);
        assert!((schedule[0].amount - 48000.0).abs() < 1e-9);
    }

    #[test]
    fn due_dates_clamp_to_month_ends() {
        let schedule = build_schedule(date(2025, 1, 31), date(2025, 7, 31), 1, 6000.0);
        assert_eq!(schedule.len(), 6);
        assert_eq!(schedule[1].due_date, date(2025, 2, 28));
        assert_eq!(schedule[2].due_date, date(2025, 3, 31));
    }
}
