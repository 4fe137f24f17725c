use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::billing::frequency::resolve_month_step;
use crate::billing::schedule::build_schedule;
use crate::billing::status::{renewal_terms, ContractStatus, RenewalStatus};
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{
    create_row_tx, list_rows_tx, lock_row_tx, map_db_error, update_row_tx,
};
use crate::schemas::RenewContractInput;

/// Renew a contract: create the successor with its full invoice schedule and
/// mark the old contract renewed, all in one transaction.
///
/// The old contract row is locked for the duration, and the successor check
/// runs under that lock, so two simultaneous renewal requests against the
/// same contract cannot both create a successor; the loser gets a Conflict
/// and should re-fetch and retry.
pub async fn renew_contract(
    pool: &PgPool,
    contract_id: i64,
    input: &RenewContractInput,
) -> AppResult<Value> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let old_contract = lock_row_tx(&mut tx, "contracts", contract_id, "id").await?;

    if RenewalStatus::parse(&val_str(&old_contract, "renewal_status"))
        == Some(RenewalStatus::Renewed)
    {
        return Err(AppError::Conflict(
            "Contract has already been renewed; an active successor exists.".to_string(),
        ));
    }

    let unit_id = val_i64(&old_contract, "unit_id").ok_or_else(|| {
        AppError::Internal("Contract record is missing its unit reference.".to_string())
    })?;
    let old_start = val_date(&old_contract, "start_date").ok_or_else(|| {
        AppError::Internal("Contract record is missing its start date.".to_string())
    })?;
    let old_end = val_date(&old_contract, "end_date").ok_or_else(|| {
        AppError::Internal("Contract record is missing its end date.".to_string())
    })?;

    // No contract for this unit may start after the one being renewed;
    // this is the uniqueness check that serializes competing renewals.
    let mut successor_filters = Map::new();
    successor_filters.insert("unit_id".to_string(), Value::from(unit_id));
    successor_filters.insert(
        "start_date__gt".to_string(),
        Value::String(old_start.to_string()),
    );
    let successors = list_rows_tx(
        &mut tx,
        "contracts",
        Some(&successor_filters),
        1,
        0,
        "start_date",
        true,
    )
    .await?;
    if !successors.is_empty() {
        return Err(AppError::Conflict(
            "A newer contract already exists for this unit.".to_string(),
        ));
    }

    let old_rent = {
        let rent = val_f64(&old_contract, "rent_amount");
        if rent > 0.0 {
            rent
        } else {
            val_f64(&old_contract, "amount")
        }
    };
    let terms = renewal_terms(old_start, old_end, old_rent, input.amount);
    let start_date = input.start_date.unwrap_or(terms.start_date);
    let end_date = input.end_date.unwrap_or(terms.end_date);

    if end_date <= start_date {
        return Err(AppError::UnprocessableEntity(
            "Renewal end date must be after the start date.".to_string(),
        ));
    }
    if terms.amount <= 0.0 {
        return Err(AppError::UnprocessableEntity(
            "A rent amount is required to renew this contract.".to_string(),
        ));
    }

    let month_step = match val_i64(&old_contract, "month_step") {
        Some(step) if step > 0 => step as i32,
        _ => resolve_month_step(Some(&val_str(&old_contract, "payment_frequency"))),
    };
    let schedule = build_schedule(start_date, end_date, month_step, terms.amount);

    let mut record = Map::new();
    if let Some(tenant_id) = val_i64(&old_contract, "tenant_id") {
        record.insert("tenant_id".to_string(), Value::from(tenant_id));
    }
    record.insert(
        "tenant_name".to_string(),
        Value::String(val_str(&old_contract, "tenant_name")),
    );
    record.insert("unit_id".to_string(), Value::from(unit_id));
    record.insert(
        "start_date".to_string(),
        Value::String(start_date.to_string()),
    );
    record.insert("end_date".to_string(), Value::String(end_date.to_string()));
    record.insert("amount".to_string(), Value::from(terms.amount));
    record.insert("rent_amount".to_string(), Value::from(terms.amount));
    record.insert("month_step".to_string(), Value::from(i64::from(month_step)));
    for carried in ["rental_type", "payment_frequency", "payment_method"] {
        let value = val_str(&old_contract, carried);
        if !value.is_empty() {
            record.insert(carried.to_string(), Value::String(value));
        }
    }
    let deposit = val_f64(&old_contract, "deposit");
    if deposit > 0.0 {
        record.insert("deposit".to_string(), Value::from(deposit));
    }
    record.insert(
        "notes".to_string(),
        Value::String(format!("تجديد للعقد رقم {contract_id}")),
    );
    record.insert(
        "status".to_string(),
        Value::String(ContractStatus::Active.as_str().to_string()),
    );
    record.insert(
        "renewal_status".to_string(),
        Value::String(RenewalStatus::Pending.as_str().to_string()),
    );

    let new_contract = create_row_tx(&mut tx, "contracts", &record).await?;
    let new_contract_id = val_i64(&new_contract, "id").ok_or_else(|| {
        AppError::Internal("Created contract record is missing its id.".to_string())
    })?;

    let mut invoices = Vec::with_capacity(schedule.len());
    for installment in &schedule {
        let mut invoice = Map::new();
        invoice.insert("contract_id".to_string(), Value::from(new_contract_id));
        if let Some(tenant_id) = val_i64(&old_contract, "tenant_id") {
            invoice.insert("tenant_id".to_string(), Value::from(tenant_id));
        }
        invoice.insert("amount".to_string(), Value::from(installment.amount));
        invoice.insert(
            "due_date".to_string(),
            Value::String(installment.due_date.to_string()),
        );
        invoice.insert("status".to_string(), Value::String("PENDING".to_string()));
        invoices.push(create_row_tx(&mut tx, "invoices", &invoice).await?);
    }

    // The old contract's flags move only once the successor and its schedule
    // are durably created.
    let mut old_patch = Map::new();
    old_patch.insert(
        "status".to_string(),
        Value::String(ContractStatus::Ended.as_str().to_string()),
    );
    old_patch.insert(
        "renewal_status".to_string(),
        Value::String(RenewalStatus::Renewed.as_str().to_string()),
    );
    update_row_tx(&mut tx, "contracts", contract_id, &old_patch, "id").await?;

    tx.commit().await.map_err(map_db_error)?;

    Ok(json!({ "contract": new_contract, "invoices": invoices }))
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

fn val_f64(row: &Value, key: &str) -> f64 {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(|value| {
            value
                .as_f64()
                .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
        })
        .unwrap_or(0.0)
}

fn val_date(row: &Value, key: &str) -> Option<chrono::NaiveDate> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .and_then(|raw| {
            let prefix = raw.get(..10).unwrap_or(raw);
            chrono::NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
        })
}
