use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::billing::status::{classify_renewal, ContractStatus, RenewalStatus};
use crate::repository::table_service::{list_rows, update_row};
use crate::services::audit::log_activity;

/// Result of the daily contract-expiry sweep.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExpirySweepResult {
    pub ended: u32,
    pub errors: u32,
}

/// Result of the renewal-status reconciliation pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RenewalReconciliationResult {
    pub examined: u32,
    pub updated: u32,
    pub pending: u32,
    pub renewed: u32,
    pub not_renewing: u32,
    pub errors: u32,
}

/// Move ACTIVE contracts whose end date has passed to ENDED.
///
/// Each record is updated independently; one bad record never aborts the
/// sweep over the rest, and re-running matches nothing new.
pub async fn run_expiry_sweep(pool: &PgPool, today: NaiveDate) -> ExpirySweepResult {
    let mut result = ExpirySweepResult {
        ended: 0,
        errors: 0,
    };

    let mut filters = Map::new();
    filters.insert(
        "status".to_string(),
        Value::String(ContractStatus::Active.as_str().to_string()),
    );
    filters.insert(
        "end_date__lt".to_string(),
        Value::String(today.to_string()),
    );

    let contracts = match list_rows(pool, "contracts", Some(&filters), 1000, 0, "end_date", true)
        .await
    {
        Ok(rows) => rows,
        Err(error) => {
            warn!("Failed to fetch expired contracts: {error}");
            result.errors += 1;
            return result;
        }
    };

    for contract in &contracts {
        let Some(contract_id) = val_i64(contract, "id") else {
            continue;
        };

        let mut patch = Map::new();
        patch.insert(
            "status".to_string(),
            Value::String(ContractStatus::Ended.as_str().to_string()),
        );
        if let Err(error) = update_row(pool, "contracts", contract_id, &patch, "id").await {
            warn!(contract_id, error = %error, "Failed to end expired contract");
            result.errors += 1;
            continue;
        }
        result.ended += 1;

        let tenant_name = val_str(contract, "tenant_name");
        let end_date = val_str(contract, "end_date");
        log_activity(
            Some(pool),
            None,
            "CONTRACT_EXPIRED",
            &format!("انتهى العقد رقم {contract_id} للمستأجر {tenant_name} بتاريخ {end_date}"),
            Some(contract_id),
        )
        .await;
    }

    if result.ended > 0 || result.errors > 0 {
        info!(
            ended = result.ended,
            errors = result.errors,
            "Contract expiry sweep completed"
        );
    }

    result
}

/// Reconcile the renewal status of every contract.
///
/// Contracts are ordered by (tenant, unit, start date) so the "is there a
/// newer contract" comparison is well-defined within each group. The pass is
/// idempotent and only writes when the derived value differs from the stored
/// one, so a second run produces no further writes.
pub async fn run_renewal_reconciliation(
    pool: &PgPool,
    today: NaiveDate,
    window_days: i64,
) -> RenewalReconciliationResult {
    let mut result = RenewalReconciliationResult {
        examined: 0,
        updated: 0,
        pending: 0,
        renewed: 0,
        not_renewing: 0,
        errors: 0,
    };

    let contracts: Vec<Value> = match sqlx::query_scalar(
        "SELECT row_to_json(t) FROM contracts t
         ORDER BY t.tenant_id, t.unit_id, t.start_date",
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(error) => {
            warn!("Failed to fetch contracts for renewal reconciliation: {error}");
            result.errors += 1;
            return result;
        }
    };

    result.examined = contracts.len() as u32;

    for contract in &contracts {
        let Some(contract_id) = val_i64(contract, "id") else {
            continue;
        };
        let Some(status) = ContractStatus::parse(&val_str(contract, "status")) else {
            continue;
        };
        let Some(end_date) = val_date(contract, "end_date") else {
            continue;
        };
        let Some(start_date) = val_date(contract, "start_date") else {
            continue;
        };
        let tenant_id = val_i64(contract, "tenant_id");
        let unit_id = val_i64(contract, "unit_id");

        let has_newer_sibling = contracts.iter().any(|other| {
            val_i64(other, "id") != Some(contract_id)
                && val_i64(other, "tenant_id") == tenant_id
                && val_i64(other, "unit_id") == unit_id
                && val_date(other, "start_date")
                    .is_some_and(|other_start| other_start > start_date)
        });

        let Some(next) = classify_renewal(status, end_date, today, window_days, has_newer_sibling)
        else {
            continue;
        };

        let stored = RenewalStatus::parse(&val_str(contract, "renewal_status"));
        if stored == Some(next) {
            continue;
        }

        let mut patch = Map::new();
        patch.insert(
            "renewal_status".to_string(),
            Value::String(next.as_str().to_string()),
        );
        if let Err(error) = update_row(pool, "contracts", contract_id, &patch, "id").await {
            warn!(contract_id, error = %error, "Failed to update renewal status");
            result.errors += 1;
            continue;
        }

        result.updated += 1;
        match next {
            RenewalStatus::Pending => result.pending += 1,
            RenewalStatus::Renewed => result.renewed += 1,
            RenewalStatus::NotRenewing => result.not_renewing += 1,
        }
    }

    if result.updated > 0 || result.errors > 0 {
        info!(
            examined = result.examined,
            updated = result.updated,
            pending = result.pending,
            renewed = result.renewed,
            not_renewing = result.not_renewing,
            "Renewal reconciliation completed"
        );
    }

    result
}

fn val_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn val_i64(row: &Value, key: &str) -> Option<i64> {
    row.as_object().and_then(|obj| obj.get(key)).and_then(Value::as_i64)
}

fn val_date(row: &Value, key: &str) -> Option<NaiveDate> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .and_then(|raw| {
            let prefix = raw.get(..10).unwrap_or(raw);
            NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
        })
}
