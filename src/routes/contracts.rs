use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    billing::frequency::resolve_month_step,
    billing::schedule::build_schedule,
    billing::status::{ContractStatus, RenewalStatus},
    error::{AppError, AppResult},
    repository::table_service::{
        count_rows, create_row, create_row_tx, delete_row_tx, get_row, list_rows, list_rows_tx,
        map_db_error, update_row, update_row_tx,
    },
    schemas::{
        normalize_opt, page_window, validate_input, ContractPath, ContractsQuery,
        CreateContractInput, EndContractInput, RenewContractInput, UpdateContractInput,
    },
    services::audit::log_activity,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/contracts",
            axum::routing::get(list_contracts).post(create_contract),
        )
        .route(
            "/contracts/{contract_id}",
            axum::routing::put(update_contract).delete(delete_contract),
        )
        .route(
            "/contracts/{contract_id}/end",
            axum::routing::post(end_contract),
        )
        .route(
            "/contracts/{contract_id}/renew",
            axum::routing::post(renew_contract),
        )
}

async fn list_contracts(
    State(state): State<AppState>,
    Query(query): Query<ContractsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(status) = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert(
            "status".to_string(),
            Value::String(status.to_ascii_uppercase()),
        );
    }

    if let Some(property_id) = query.property_id {
        let mut unit_filters = Map::new();
        unit_filters.insert("property_id".to_string(), Value::from(property_id));
        let units = list_rows(pool, "units", Some(&unit_filters), 1000, 0, "id", true).await?;
        let unit_ids: Vec<Value> = units
            .iter()
            .filter_map(|unit| unit.as_object().and_then(|obj| obj.get("id")))
            .cloned()
            .collect();
        if unit_ids.is_empty() {
            return Ok(Json(json!({
                "items": [],
                "total": 0,
                "page": query.page.max(1),
                "page_size": query.page_size,
            })));
        }
        filters.insert("unit_id".to_string(), Value::Array(unit_ids));
    }

    let (limit, offset) = page_window(query.page, query.page_size);
    let items = list_rows(
        pool,
        "contracts",
        Some(&filters),
        limit,
        offset,
        "created_at",
        false,
    )
    .await?;
    let total = count_rows(pool, "contracts", Some(&filters)).await?;

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": query.page.max(1),
        "page_size": limit,
    })))
}

/// Create a contract, its tenant record if needed, and its full invoice
/// schedule, atomically.
async fn create_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateContractInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let unit = get_row(pool, "units", payload.unit_id, "id").await?;

    // One live lease per unit; stacking a second ACTIVE contract is a
    // conflict, not an update.
    let mut active_filters = Map::new();
    active_filters.insert("unit_id".to_string(), Value::from(payload.unit_id));
    active_filters.insert(
        "status".to_string(),
        Value::String(ContractStatus::Active.as_str().to_string()),
    );
    let active = list_rows(pool, "contracts", Some(&active_filters), 1, 0, "id", true).await?;
    if !active.is_empty() {
        return Err(AppError::Conflict(
            "Unit already has an active contract.".to_string(),
        ));
    }

    let tenant = find_or_create_tenant(pool, payload.tenant_name.trim()).await?;
    let tenant_id = val_i64(&tenant, "id").ok_or_else(|| {
        AppError::Internal("Tenant record is missing its id.".to_string())
    })?;

    let total_amount = payload.amount.or(payload.rent_amount).unwrap_or(0.0);
    let rent_amount = payload.rent_amount.or(payload.amount).unwrap_or(0.0);
    let payment_frequency = normalize_opt(payload.payment_frequency.clone());
    let month_step = resolve_month_step(payment_frequency.as_deref());
    let schedule = build_schedule(
        payload.start_date,
        payload.end_date,
        month_step,
        total_amount,
    );

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let mut record = Map::new();
    record.insert(
        "tenant_name".to_string(),
        Value::String(payload.tenant_name.trim().to_string()),
    );
    record.insert("tenant_id".to_string(), Value::from(tenant_id));
    record.insert("unit_id".to_string(), Value::from(payload.unit_id));
    record.insert(
        "start_date".to_string(),
        Value::String(payload.start_date.to_string()),
    );
    record.insert(
        "end_date".to_string(),
        Value::String(payload.end_date.to_string()),
    );
    record.insert("amount".to_string(), Value::from(total_amount));
    record.insert("rent_amount".to_string(), Value::from(rent_amount));
    record.insert("month_step".to_string(), Value::from(i64::from(month_step)));
    record.insert(
        "status".to_string(),
        Value::String(ContractStatus::Active.as_str().to_string()),
    );
    if let Some(deposit) = payload.deposit {
        record.insert("deposit".to_string(), Value::from(deposit));
    }
    for (key, value) in [
        ("rental_type", normalize_opt(payload.rental_type.clone())),
        (
            "ejar_contract_number",
            normalize_opt(payload.ejar_contract_number.clone()),
        ),
        ("payment_method", normalize_opt(payload.payment_method.clone())),
        ("payment_frequency", payment_frequency),
        (
            "services_included",
            normalize_opt(payload.services_included.clone()),
        ),
        ("notes", normalize_opt(payload.notes.clone())),
    ] {
        if let Some(value) = value {
            record.insert(key.to_string(), Value::String(value));
        }
    }

    let contract = create_row_tx(&mut tx, "contracts", &record).await?;
    let contract_id = val_i64(&contract, "id").ok_or_else(|| {
        AppError::Internal("Created contract record is missing its id.".to_string())
    })?;

    let mut invoices = Vec::with_capacity(schedule.len());
    for installment in &schedule {
        let mut invoice = Map::new();
        invoice.insert("contract_id".to_string(), Value::from(contract_id));
        invoice.insert("tenant_id".to_string(), Value::from(tenant_id));
        invoice.insert("amount".to_string(), Value::from(installment.amount));
        invoice.insert(
            "due_date".to_string(),
            Value::String(installment.due_date.to_string()),
        );
        invoice.insert("status".to_string(), Value::String("PENDING".to_string()));
        invoices.push(create_row_tx(&mut tx, "invoices", &invoice).await?);
    }

    let mut unit_patch = Map::new();
    unit_patch.insert("status".to_string(), Value::String("OCCUPIED".to_string()));
    update_row_tx(&mut tx, "units", payload.unit_id, &unit_patch, "id").await?;

    tx.commit().await.map_err(map_db_error)?;

    let unit_number = val_str(&unit, "number");
    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "CONTRACT_CREATE",
        &format!(
            "تم إنشاء عقد جديد للوحدة {unit_number} باسم {}",
            payload.tenant_name.trim()
        ),
        Some(contract_id),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "contract": contract, "invoices": invoices })),
    ))
}

/// Update contract fields. When the rent, payment frequency, or term dates
/// change, the still-pending part of the schedule is regenerated atomically;
/// paid and partially paid invoices are left untouched.
async fn update_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateContractInput>,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;

    let current = get_row(pool, "contracts", path.contract_id, "id").await?;

    let mut patch = Map::new();
    if let Some(start_date) = payload.start_date {
        patch.insert(
            "start_date".to_string(),
            Value::String(start_date.to_string()),
        );
    }
    if let Some(end_date) = payload.end_date {
        patch.insert("end_date".to_string(), Value::String(end_date.to_string()));
    }
    if let Some(amount) = payload.amount {
        patch.insert("amount".to_string(), Value::from(amount));
    }
    if let Some(rent_amount) = payload.rent_amount {
        patch.insert("rent_amount".to_string(), Value::from(rent_amount));
    }
    if let Some(deposit) = payload.deposit {
        patch.insert("deposit".to_string(), Value::from(deposit));
    }
    if let Some(status) = normalize_opt(payload.status.clone()) {
        let status = ContractStatus::parse(&status).ok_or_else(|| {
            AppError::BadRequest(format!("Unknown contract status '{status}'."))
        })?;
        patch.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
    }
    if let Some(renewal_status) = normalize_opt(payload.renewal_status.clone()) {
        let renewal_status = RenewalStatus::parse(&renewal_status).ok_or_else(|| {
            AppError::BadRequest(format!("Unknown renewal status '{renewal_status}'."))
        })?;
        patch.insert(
            "renewal_status".to_string(),
            Value::String(renewal_status.as_str().to_string()),
        );
    }
    let frequency_provided = payload.payment_frequency.is_some();
    let new_frequency = normalize_opt(payload.payment_frequency.clone());
    if frequency_provided {
        let step = resolve_month_step(new_frequency.as_deref());
        patch.insert("month_step".to_string(), Value::from(i64::from(step)));
        match &new_frequency {
            Some(frequency) => {
                patch.insert(
                    "payment_frequency".to_string(),
                    Value::String(frequency.clone()),
                );
            }
            None => {
                patch.insert("payment_frequency".to_string(), Value::Null);
            }
        }
    }
    for (key, value) in [
        ("rental_type", normalize_opt(payload.rental_type.clone())),
        (
            "ejar_contract_number",
            normalize_opt(payload.ejar_contract_number.clone()),
        ),
        ("payment_method", normalize_opt(payload.payment_method.clone())),
        (
            "services_included",
            normalize_opt(payload.services_included.clone()),
        ),
        ("notes", normalize_opt(payload.notes.clone())),
    ] {
        if let Some(value) = value {
            patch.insert(key.to_string(), Value::String(value));
        }
    }

    if patch.is_empty() {
        return Ok(Json(json!({ "contract": current, "invoices_regenerated": 0 })));
    }

    let contract = update_row(pool, "contracts", path.contract_id, &patch, "id").await?;

    let rent_changed = payload
        .rent_amount
        .is_some_and(|rent| (rent - val_f64(&current, "rent_amount")).abs() > 0.005);
    let freq_changed = frequency_provided
        && new_frequency != normalize_opt(Some(val_str(&current, "payment_frequency")));
    let date_changed = payload
        .start_date
        .is_some_and(|start| Some(start) != val_date(&current, "start_date"))
        || payload
            .end_date
            .is_some_and(|end| Some(end) != val_date(&current, "end_date"));

    let new_total = {
        let amount = val_f64(&contract, "amount");
        if amount > 0.0 {
            amount
        } else {
            val_f64(&contract, "rent_amount")
        }
    };

    let mut regenerated = 0usize;
    if (rent_changed || freq_changed || date_changed) && new_total > 0.0 {
        let start_date = val_date(&contract, "start_date").ok_or_else(|| {
            AppError::Internal("Contract record is missing its start date.".to_string())
        })?;
        let end_date = val_date(&contract, "end_date").ok_or_else(|| {
            AppError::Internal("Contract record is missing its end date.".to_string())
        })?;
        let month_step = val_i64(&contract, "month_step").unwrap_or(0) as i32;
        let schedule = build_schedule(start_date, end_date, month_step, new_total);

        let mut tx = pool.begin().await.map_err(map_db_error)?;
        sqlx::query("DELETE FROM invoices WHERE contract_id = $1 AND status = 'PENDING'")
            .bind(path.contract_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        let tenant_id = val_i64(&contract, "tenant_id");
        for installment in &schedule {
            let mut invoice = Map::new();
            invoice.insert("contract_id".to_string(), Value::from(path.contract_id));
            if let Some(tenant_id) = tenant_id {
                invoice.insert("tenant_id".to_string(), Value::from(tenant_id));
            }
            invoice.insert("amount".to_string(), Value::from(installment.amount));
            invoice.insert(
                "due_date".to_string(),
                Value::String(installment.due_date.to_string()),
            );
            invoice.insert("status".to_string(), Value::String("PENDING".to_string()));
            create_row_tx(&mut tx, "invoices", &invoice).await?;
        }
        tx.commit().await.map_err(map_db_error)?;
        regenerated = schedule.len();
    }

    Ok(Json(
        json!({ "contract": contract, "invoices_regenerated": regenerated }),
    ))
}

/// Delete a contract together with its invoices and their payments.
///
/// If the contract being deleted superseded an older contract of the same
/// tenant and unit, that predecessor is reopened (ACTIVE, renewal pending) so
/// the books do not show a renewed contract without its successor.
async fn delete_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;

    let contract = get_row(pool, "contracts", path.contract_id, "id").await?;
    let tenant_name = val_str(&contract, "tenant_name");

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    if let (Some(tenant_id), Some(unit_id), Some(start_date)) = (
        val_i64(&contract, "tenant_id"),
        val_i64(&contract, "unit_id"),
        val_date(&contract, "start_date"),
    ) {
        let mut predecessor_filters = Map::new();
        predecessor_filters.insert("tenant_id".to_string(), Value::from(tenant_id));
        predecessor_filters.insert("unit_id".to_string(), Value::from(unit_id));
        predecessor_filters.insert(
            "start_date__lt".to_string(),
            Value::String(start_date.to_string()),
        );
        predecessor_filters.insert(
            "renewal_status".to_string(),
            Value::String(RenewalStatus::Renewed.as_str().to_string()),
        );
        let predecessors = list_rows_tx(
            &mut tx,
            "contracts",
            Some(&predecessor_filters),
            1,
            0,
            "start_date",
            false,
        )
        .await?;
        if let Some(predecessor_id) = predecessors.first().and_then(|row| val_i64(row, "id")) {
            let mut reopen = Map::new();
            reopen.insert(
                "renewal_status".to_string(),
                Value::String(RenewalStatus::Pending.as_str().to_string()),
            );
            reopen.insert(
                "status".to_string(),
                Value::String(ContractStatus::Active.as_str().to_string()),
            );
            update_row_tx(&mut tx, "contracts", predecessor_id, &reopen, "id").await?;
        }
    }

    sqlx::query(
        "DELETE FROM payments
         WHERE invoice_id IN (SELECT id FROM invoices WHERE contract_id = $1)",
    )
    .bind(path.contract_id)
    .execute(&mut *tx)
    .await
    .map_err(map_db_error)?;
    sqlx::query("DELETE FROM invoices WHERE contract_id = $1")
        .bind(path.contract_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;
    delete_row_tx(&mut tx, "contracts", path.contract_id, "id").await?;

    tx.commit().await.map_err(map_db_error)?;

    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "CONTRACT_DELETE",
        &format!(
            "تم حذف العقد رقم {} للمستأجر {tenant_name}",
            path.contract_id
        ),
        None,
    )
    .await;

    Ok(Json(json!({ "message": "Contract deleted." })))
}

/// End a contract: release its unit and settle the deposit, either refunded
/// to the tenant or kept against a final exit invoice.
async fn end_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
    Json(payload): Json<EndContractInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;
    let today = state.config.local_today();

    let contract = get_row(pool, "contracts", path.contract_id, "id").await?;
    if ContractStatus::parse(&val_str(&contract, "status")) != Some(ContractStatus::Active) {
        return Err(AppError::Conflict("Contract is not active.".to_string()));
    }

    let deposit = val_f64(&contract, "deposit");
    let rent_amount = val_f64(&contract, "rent_amount");
    let tenant_id = val_i64(&contract, "tenant_id");
    let tenant_name = val_str(&contract, "tenant_name");

    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(ContractStatus::Ended.as_str().to_string()),
    );
    let updated = update_row(pool, "contracts", path.contract_id, &patch, "id").await?;

    let mut unit = Value::Null;
    if let Some(unit_id) = val_i64(&contract, "unit_id") {
        let mut unit_patch = Map::new();
        unit_patch.insert("status".to_string(), Value::String("AVAILABLE".to_string()));
        unit = update_row(pool, "units", unit_id, &unit_patch, "id").await?;
    }

    let mut exit_invoice = Value::Null;
    let mut refund_invoice = Value::Null;

    if deposit > 0.0 && payload.refund_deposit {
        // Negative invoice records the deposit going back to the tenant.
        refund_invoice = create_invoice_record(
            pool,
            path.contract_id,
            tenant_id,
            -deposit,
            today,
            "PAID",
        )
        .await?;
    } else {
        let amount = if deposit > 0.0 {
            rent_amount - deposit
        } else {
            rent_amount
        };
        exit_invoice =
            create_invoice_record(pool, path.contract_id, tenant_id, amount, today, "PENDING")
                .await?;
    }

    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "CONTRACT_END",
        &if payload.refund_deposit {
            format!(
                "تم إنهاء العقد رقم {} واسترداد التأمين للمستأجر {tenant_name}",
                path.contract_id
            )
        } else {
            format!(
                "تم إنهاء العقد رقم {} بعد خصم التأمين",
                path.contract_id
            )
        },
        Some(path.contract_id),
    )
    .await;

    Ok(Json(json!({
        "contract": updated,
        "unit": unit,
        "exit_invoice": exit_invoice,
        "refund_invoice": refund_invoice,
    })))
}

/// Renew a contract through the renewal planner.
async fn renew_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
    Json(payload): Json<RenewContractInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;

    let result =
        crate::services::renewal::renew_contract(pool, path.contract_id, &payload).await?;

    let new_contract_id = result
        .as_object()
        .and_then(|obj| obj.get("contract"))
        .and_then(|contract| val_i64(contract, "id"));

    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "CONTRACT_RENEWAL",
        &format!(
            "تجديد العقد رقم {} بعقد جديد رقم {}",
            path.contract_id,
            new_contract_id.unwrap_or_default()
        ),
        new_contract_id,
    )
    .await;

    Ok(Json(result))
}

async fn find_or_create_tenant(pool: &sqlx::PgPool, name: &str) -> AppResult<Value> {
    let mut filters = Map::new();
    filters.insert("name".to_string(), Value::String(name.to_string()));
    let existing = list_rows(pool, "tenants", Some(&filters), 1, 0, "id", true).await?;
    if let Some(tenant) = existing.into_iter().next() {
        return Ok(tenant);
    }

    let mut record = Map::new();
    record.insert("name".to_string(), Value::String(name.to_string()));
    record.insert("phone".to_string(), Value::String("0000000000".to_string()));
    create_row(pool, "tenants", &record).await
}

async fn create_invoice_record(
    pool: &sqlx::PgPool,
    contract_id: i64,
    tenant_id: Option<i64>,
    amount: f64,
    due_date: NaiveDate,
    status: &str,
) -> AppResult<Value> {
    let mut record = Map::new();
    record.insert("contract_id".to_string(), Value::from(contract_id));
    if let Some(tenant_id) = tenant_id {
        record.insert("tenant_id".to_string(), Value::from(tenant_id));
    }
    record.insert("amount".to_string(), Value::from(amount));
    record.insert("due_date".to_string(), Value::String(due_date.to_string()));
    record.insert("status".to_string(), Value::String(status.to_string()));
    create_row(pool, "invoices", &record).await
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
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

fn val_date(row: &Value, key: &str) -> Option<NaiveDate> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .and_then(|raw| {
            let prefix = raw.get(..10).unwrap_or(raw);
            NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
        })
}
