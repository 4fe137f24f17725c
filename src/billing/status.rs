//! Contract and invoice state machines.
//!
//! Statuses are typed here and rendered to their storage strings only at the
//! persistence edge. The derivation functions are pure: services fetch the
//! records, call into here with an explicit `today`, and write back only when
//! the computed value differs from the stored one, which is what makes the
//! sweeps idempotent and cheap to re-run.

use chrono::{Duration, NaiveDate};

/// Payments within a cent of the invoice amount count as paid in full.
pub const PAID_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractStatus {
    Active,
    Ended,
    Cancelled,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Ended => "ENDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "ENDED" => Some(Self::Ended),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalStatus {
    Pending,
    Renewed,
    NotRenewing,
}

impl RenewalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Renewed => "RENEWED",
            Self::NotRenewing => "NOT_RENEWING",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "RENEWED" => Some(Self::Renewed),
            "NOT_RENEWING" => Some(Self::NotRenewing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Partial => "PARTIAL",
            Self::Paid => "PAID",
            Self::Overdue => "OVERDUE",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "PARTIAL" => Some(Self::Partial),
            "PAID" => Some(Self::Paid),
            "OVERDUE" => Some(Self::Overdue),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Recompute an invoice's status from its payment total.
///
/// CANCELLED is terminal and only ever set by explicit administrative action.
/// PAID is terminal under payment accrual: overpayments are allowed and do
/// not move the state. Any invoice that is not paid in full once its due date
/// has passed reads OVERDUE, PARTIAL included, so a partly-paid late invoice
/// is not reported as merely partial.
pub fn derive_invoice_status(
    amount: f64,
    paid_sum: f64,
    due_date: NaiveDate,
    today: NaiveDate,
    current: InvoiceStatus,
) -> InvoiceStatus {
    if current == InvoiceStatus::Cancelled {
        return InvoiceStatus::Cancelled;
    }
    if paid_sum >= amount - PAID_TOLERANCE {
        return InvoiceStatus::Paid;
    }
    if due_date < today {
        return InvoiceStatus::Overdue;
    }
    if paid_sum > 0.0 {
        InvoiceStatus::Partial
    } else {
        InvoiceStatus::Pending
    }
}

/// Classify a contract's renewal status during the reconciliation sweep.
///
/// Returns `None` when the stored value should be left untouched: ACTIVE
/// contracts outside the renewal window keep whatever they have (including
/// null), and finished contracts whose end date has not yet passed stay
/// unclassified until a successor appears.
pub fn classify_renewal(
    status: ContractStatus,
    end_date: NaiveDate,
    today: NaiveDate,
    window_days: i64,
    has_newer_sibling: bool,
) -> Option<RenewalStatus> {
    match status {
        ContractStatus::Active => {
            let window_end = today + Duration::days(window_days);
            if end_date > today && end_date <= window_end {
                Some(RenewalStatus::Pending)
            } else {
                None
            }
        }
        ContractStatus::Ended | ContractStatus::Cancelled => {
            if has_newer_sibling {
                Some(RenewalStatus::Renewed)
            } else if end_date < today {
                Some(RenewalStatus::NotRenewing)
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenewalTerms {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub amount: f64,
}

/// Default terms for a contract renewal.
///
/// The successor starts the day after the old contract ends and preserves the
/// old term's duration exactly, in days, not its frequency-derived
/// installment spacing. Rent carries over unless a new amount is supplied.
pub fn renewal_terms(
    old_start: NaiveDate,
    old_end: NaiveDate,
    old_amount: f64,
    new_amount: Option<f64>,
) -> RenewalTerms {
    let duration = old_end - old_start;
    let start_date = old_end + Duration::days(1);
    RenewalTerms {
        start_date,
        end_date: start_date + duration,
        amount: new_amount.unwrap_or(old_amount),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::{
        classify_renewal, derive_invoice_status, renewal_terms, ContractStatus, InvoiceStatus,
        RenewalStatus,
    };

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn payments_below_the_amount_never_reach_paid() {
        let due = date(2025, 8, 1);
        let today = date(2025, 7, 1);
        let mut paid = 0.0;
        let mut status = InvoiceStatus::Pending;
        for installment in [100.0, 250.0, 400.0, 249.0] {
            paid += installment;
            status = derive_invoice_status(1000.0, paid, due, today, status);
            assert_ne!(status, InvoiceStatus::Paid);
        }
        assert_eq!(status, InvoiceStatus::Partial);

        // Crossing the amount always lands on PAID, in any payment order.
        paid += 1.0;
        status = derive_invoice_status(1000.0, paid, due, today, status);
        assert_eq!(status, InvoiceStatus::Paid);
    }

    #[test]
    fn overpayment_stays_paid() {
        let due = date(2025, 8, 1);
        let today = date(2025, 9, 1);
        let status = derive_invoice_status(1000.0, 1500.0, due, today, InvoiceStatus::Paid);
        assert_eq!(status, InvoiceStatus::Paid);
    }

    #[test]
    fn past_due_unpaid_invoices_read_overdue_including_partial() {
        let due = date(2025, 6, 30);
        let today = date(2025, 7, 1);
        assert_eq!(
            derive_invoice_status(1000.0, 0.0, due, today, InvoiceStatus::Pending),
            InvoiceStatus::Overdue
        );
        assert_eq!(
            derive_invoice_status(1000.0, 400.0, due, today, InvoiceStatus::Partial),
            InvoiceStatus::Overdue
        );
        // Due today is not yet overdue.
        assert_eq!(
            derive_invoice_status(1000.0, 0.0, today, today, InvoiceStatus::Pending),
            InvoiceStatus::Pending
        );
    }

    #[test]
    fn derivation_is_idempotent() {
        let due = date(2025, 6, 30);
        let today = date(2025, 7, 10);
        for (amount, paid) in [(1000.0, 0.0), (1000.0, 400.0), (1000.0, 1000.0)] {
            let first = derive_invoice_status(amount, paid, due, today, InvoiceStatus::Pending);
            let second = derive_invoice_status(amount, paid, due, today, first);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn cancelled_invoices_never_transition() {
        let due = date(2025, 6, 30);
        let today = date(2025, 7, 10);
        assert_eq!(
            derive_invoice_status(1000.0, 1000.0, due, today, InvoiceStatus::Cancelled),
            InvoiceStatus::Cancelled
        );
    }

    #[test]
    fn deleting_a_payment_reopens_the_invoice() {
        let due = date(2025, 8, 1);
        let today = date(2025, 7, 1);
        assert_eq!(
            derive_invoice_status(1000.0, 0.0, due, today, InvoiceStatus::Paid),
            InvoiceStatus::Pending
        );
    }

    #[test]
    fn active_contract_inside_the_window_goes_pending() {
        let today = date(2025, 7, 1);
        assert_eq!(
            classify_renewal(
                ContractStatus::Active,
                today + Duration::days(45),
                today,
                60,
                false
            ),
            Some(RenewalStatus::Pending)
        );
        // 90 days out: untouched.
        assert_eq!(
            classify_renewal(
                ContractStatus::Active,
                today + Duration::days(90),
                today,
                60,
                false
            ),
            None
        );
        // Already past its end date: the expiry sweep owns that transition.
        assert_eq!(
            classify_renewal(
                ContractStatus::Active,
                today - Duration::days(1),
                today,
                60,
                false
            ),
            None
        );
    }

    #[test]
    fn finished_contract_with_a_newer_sibling_is_renewed() {
        let today = date(2025, 7, 1);
        assert_eq!(
            classify_renewal(
                ContractStatus::Ended,
                today - Duration::days(10),
                today,
                60,
                true
            ),
            Some(RenewalStatus::Renewed)
        );
        assert_eq!(
            classify_renewal(
                ContractStatus::Cancelled,
                today + Duration::days(10),
                today,
                60,
                true
            ),
            Some(RenewalStatus::Renewed)
        );
    }

    #[test]
    fn finished_contract_without_a_successor_is_not_renewing() {
        let today = date(2025, 7, 1);
        assert_eq!(
            classify_renewal(
                ContractStatus::Ended,
                today - Duration::days(10),
                today,
                60,
                false
            ),
            Some(RenewalStatus::NotRenewing)
        );
        // Cancelled early, end date still ahead: leave unclassified.
        assert_eq!(
            classify_renewal(
                ContractStatus::Cancelled,
                today + Duration::days(10),
                today,
                60,
                false
            ),
            None
        );
    }

    #[test]
    fn renewal_preserves_duration_and_rent() {
        let old_start = date(2024, 4, 20);
        let old_end = date(2026, 1, 19);
        let terms = renewal_terms(old_start, old_end, 33000.0, None);
        assert_eq!(terms.start_date, date(2026, 1, 20));
        assert_eq!(terms.end_date - terms.start_date, old_end - old_start);
        assert!((terms.amount - 33000.0).abs() < 1e-9);

        let terms = renewal_terms(old_start, old_end, 33000.0, Some(36000.0));
        assert!((terms.amount - 36000.0).abs() < 1e-9);
    }
}
