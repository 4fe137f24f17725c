use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_true() -> bool {
    true
}
fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateContractInput {
    #[validate(length(min = 1, max = 255))]
    pub tenant_name: String,
    pub unit_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Total contracted value; defaults to `rent_amount` when omitted.
    pub amount: Option<f64>,
    /// Periodic rent; defaults to `amount` when omitted.
    pub rent_amount: Option<f64>,
    pub rental_type: Option<String>,
    pub deposit: Option<f64>,
    pub ejar_contract_number: Option<String>,
    pub payment_method: Option<String>,
    pub payment_frequency: Option<String>,
    pub services_included: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateContractInput {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub rent_amount: Option<f64>,
    pub rental_type: Option<String>,
    pub status: Option<String>,
    pub deposit: Option<f64>,
    pub ejar_contract_number: Option<String>,
    pub payment_method: Option<String>,
    pub payment_frequency: Option<String>,
    pub services_included: Option<String>,
    pub notes: Option<String>,
    pub renewal_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RenewContractInput {
    /// Overrides for the derived successor term; defaults preserve the old
    /// contract's duration starting the day after it ends.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct EndContractInput {
    /// Whether the deposit is returned to the tenant or kept against the
    /// final invoice.
    #[serde(default = "default_true")]
    pub refund_deposit: bool,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateInvoiceInput {
    pub contract_id: Option<i64>,
    pub tenant_id: Option<i64>,
    #[validate(range(min = 0.01))]
    pub amount: f64,
    pub due_date: Option<NaiveDate>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateInvoiceStatusInput {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct RecordPaymentInput {
    #[validate(range(min = 0.01))]
    pub amount: f64,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdatePaymentInput {
    #[validate(range(min = 0.01))]
    pub amount: f64,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsQuery {
    pub property_id: Option<i64>,
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicesQuery {
    pub contract_id: Option<i64>,
    pub tenant_id: Option<i64>,
    pub property_id: Option<i64>,
    /// Stored status, or the computed views `overdue` / `upcoming`.
    pub status: Option<String>,
    #[serde(default = "default_page_size")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractPath {
    pub contract_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePath {
    pub invoice_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentPath {
    pub payment_id: i64,
}

/// Serialize an input struct into a JSON object map for the row repository.
pub fn serialize_to_map<T: serde::Serialize>(input: &T) -> Map<String, Value> {
    match serde_json::to_value(input) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub fn remove_nulls(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().filter(|(_, value)| !value.is_null()).collect()
}

pub fn clamp_limit_in_range(limit: i64, min: i64, max: i64) -> i64 {
    limit.clamp(min, max)
}

/// Translate 1-based page / page_size into a limit/offset window.
pub fn page_window(page: i64, page_size: i64) -> (i64, i64) {
    let page = page.max(1);
    let page_size = page_size.clamp(1, 200);
    (page_size, (page - 1) * page_size)
}

/// Trim a free-text field; empty strings collapse to `None` so they land as
/// NULL instead of `''`.
pub fn normalize_opt(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{clamp_limit_in_range, normalize_opt, page_window, remove_nulls, serialize_to_map};
    use serde_json::Value;

    #[test]
    fn normalizes_free_text() {
        assert_eq!(normalize_opt(None), None);
        assert_eq!(normalize_opt(Some("   ".to_string())), None);
        assert_eq!(
            normalize_opt(Some("  ربع سنوي ".to_string())),
            Some("ربع سنوي".to_string())
        );
    }

    #[test]
    fn pagination_window() {
        assert_eq!(page_window(1, 50), (50, 0));
        assert_eq!(page_window(3, 20), (20, 40));
        assert_eq!(page_window(0, 0), (1, 0));
        assert_eq!(page_window(2, 10_000), (200, 200));
    }

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(0, 1, 1000), 1);
        assert_eq!(clamp_limit_in_range(50, 1, 1000), 50);
        assert_eq!(clamp_limit_in_range(5000, 1, 1000), 1000);
    }

    #[test]
    fn serializes_and_strips_nulls() {
        let input = super::RenewContractInput {
            start_date: None,
            end_date: None,
            amount: Some(1200.0),
        };
        let map = remove_nulls(serialize_to_map(&input));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("amount"), Some(&Value::from(1200.0)));
    }
}
