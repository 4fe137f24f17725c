use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Duration;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    billing::status::InvoiceStatus,
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, map_db_error, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateInvoiceInput,
        InvoicePath, InvoicesQuery, PaymentPath, RecordPaymentInput, UpdateInvoiceStatusInput,
        UpdatePaymentInput,
    },
    services::{audit::log_activity, invoice_lifecycle, messaging::queue_whatsapp},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/invoices",
            axum::routing::get(list_invoices).post(create_invoice),
        )
        .route(
            "/invoices/{invoice_id}/status",
            axum::routing::put(update_invoice_status),
        )
        .route(
            "/invoices/{invoice_id}/payments",
            axum::routing::get(list_invoice_payments).post(record_payment),
        )
        .route(
            "/payments/{payment_id}",
            axum::routing::put(update_payment).delete(delete_payment),
        )
}

/// List invoices. Besides the stored statuses, two computed views are
/// supported: `overdue` (anything unpaid-in-full past its due date, whether
/// or not the sweep has flagged it yet) and `upcoming` (due within 30 days).
async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoicesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;
    let today = state.config.local_today();
    let limit = clamp_limit_in_range(query.limit, 1, 1000);

    let status_view = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase);

    let mut rows: Vec<Value> = match status_view.as_deref() {
        Some("overdue") => sqlx::query_scalar(
            "SELECT row_to_json(t) FROM invoices t
             WHERE t.status = 'OVERDUE'
                OR (t.status IN ('PENDING', 'PARTIAL') AND t.due_date < $1)
             ORDER BY t.due_date ASC
             LIMIT $2",
        )
        .bind(today)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?,
        Some("upcoming") => sqlx::query_scalar(
            "SELECT row_to_json(t) FROM invoices t
             WHERE t.status IN ('PENDING', 'PARTIAL')
               AND t.due_date >= $1
               AND t.due_date <= $2
             ORDER BY t.due_date ASC
             LIMIT $3",
        )
        .bind(today)
        .bind(today + Duration::days(30))
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?,
        _ => {
            let mut filters = Map::new();
            if let Some(status) = status_view.as_deref() {
                filters.insert(
                    "status".to_string(),
                    Value::String(status.to_ascii_uppercase()),
                );
            }
            if let Some(contract_id) = query.contract_id {
                filters.insert("contract_id".to_string(), Value::from(contract_id));
            }
            if let Some(tenant_id) = query.tenant_id {
                filters.insert("tenant_id".to_string(), Value::from(tenant_id));
            }
            list_rows(pool, "invoices", Some(&filters), limit, 0, "due_date", true).await?
        }
    };

    // The computed views above run as raw queries, so entity filters are
    // applied after the fact.
    if matches!(status_view.as_deref(), Some("overdue") | Some("upcoming")) {
        if let Some(contract_id) = query.contract_id {
            rows.retain(|row| val_i64(row, "contract_id") == Some(contract_id));
        }
        if let Some(tenant_id) = query.tenant_id {
            rows.retain(|row| val_i64(row, "tenant_id") == Some(tenant_id));
        }
    }

    if let Some(property_id) = query.property_id {
        let allowed = property_contract_ids(pool, property_id).await?;
        rows.retain(|row| {
            val_i64(row, "contract_id").is_some_and(|contract_id| allowed.contains(&contract_id))
        });
    }

    Ok(Json(json!({ "data": rows })))
}

async fn create_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateInvoiceInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let today = state.config.local_today();

    let status = match payload.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => InvoiceStatus::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown invoice status '{raw}'.")))?,
        None => InvoiceStatus::Pending,
    };

    if let Some(contract_id) = payload.contract_id {
        // Reject dangling references before writing anything.
        get_row(pool, "contracts", contract_id, "id").await?;
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "due_date".to_string(),
        Value::String(payload.due_date.unwrap_or(today).to_string()),
    );
    record.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );

    let invoice = create_row(pool, "invoices", &record).await?;

    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "INVOICE_CREATE",
        &format!("إضافة فاتورة جديدة بقيمة {} ريال", payload.amount),
        payload.contract_id,
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(invoice)))
}

/// Administrative status override, e.g. cancelling an invoice. Day-to-day
/// transitions come from payment recomputes and the overdue sweep, not from
/// here.
async fn update_invoice_status(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateInvoiceStatusInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;

    let status = InvoiceStatus::parse(&payload.status).ok_or_else(|| {
        AppError::BadRequest(format!("Unknown invoice status '{}'.", payload.status))
    })?;

    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );
    let invoice = update_row(pool, "invoices", path.invoice_id, &patch, "id").await?;

    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "INVOICE_STATUS_UPDATE",
        &format!(
            "تحديث حالة فاتورة #{} إلى {}",
            path.invoice_id,
            arabic_invoice_status(status)
        ),
        val_i64(&invoice, "contract_id"),
    )
    .await;

    Ok(Json(invoice))
}

async fn list_invoice_payments(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;

    // Surface a 404 for unknown invoices rather than an empty list.
    get_row(pool, "invoices", path.invoice_id, "id").await?;

    let mut filters = Map::new();
    filters.insert("invoice_id".to_string(), Value::from(path.invoice_id));
    let payments = list_rows(pool, "payments", Some(&filters), 1000, 0, "paid_at", false).await?;

    Ok(Json(json!({ "data": payments })))
}

async fn record_payment(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
    Json(payload): Json<RecordPaymentInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let today = state.config.local_today();

    let (payment, invoice) =
        invoice_lifecycle::record_payment(pool, path.invoice_id, &payload, today).await?;

    let status = InvoiceStatus::parse(&val_str(&invoice, "status"))
        .unwrap_or(InvoiceStatus::Pending);
    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "PAYMENT_RECORD",
        &format!(
            "تسجيل دفعة بقيمة {} ريال للفاتورة #{}. الحالة الجديدة: {}",
            payload.amount,
            path.invoice_id,
            arabic_invoice_status(status)
        ),
        val_i64(&invoice, "contract_id"),
    )
    .await;

    queue_payment_receipt(pool, &invoice, payload.amount).await;

    Ok((axum::http::StatusCode::CREATED, Json(payment)))
}

async fn update_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePaymentInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let today = state.config.local_today();

    let (payment, invoice) =
        invoice_lifecycle::update_payment(pool, path.payment_id, &payload, today).await?;

    let status = InvoiceStatus::parse(&val_str(&invoice, "status"))
        .unwrap_or(InvoiceStatus::Pending);
    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "PAYMENT_UPDATE",
        &format!(
            "تحديث دفعة بقيمة {} ريال للفاتورة #{}. الحالة: {}",
            payload.amount,
            val_i64(&invoice, "id").unwrap_or_default(),
            arabic_invoice_status(status)
        ),
        val_i64(&invoice, "contract_id"),
    )
    .await;

    Ok(Json(payment))
}

async fn delete_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers)?;
    let pool = db_pool(&state)?;
    let today = state.config.local_today();

    let invoice = invoice_lifecycle::delete_payment(pool, path.payment_id, today).await?;

    let status = InvoiceStatus::parse(&val_str(&invoice, "status"))
        .unwrap_or(InvoiceStatus::Pending);
    log_activity(
        state.db_pool.as_ref(),
        Some(user_id),
        "PAYMENT_DELETE",
        &format!(
            "حذف دفعة للفاتورة #{}. الحالة: {}",
            val_i64(&invoice, "id").unwrap_or_default(),
            arabic_invoice_status(status)
        ),
        val_i64(&invoice, "contract_id"),
    )
    .await;

    Ok(Json(json!({ "message": "Payment deleted." })))
}

/// WhatsApp receipt to the tenant after a recorded payment. Best effort.
async fn queue_payment_receipt(pool: &sqlx::PgPool, invoice: &Value, amount: f64) {
    let Some(tenant_id) = val_i64(invoice, "tenant_id") else {
        return;
    };
    let Ok(tenant) = get_row(pool, "tenants", tenant_id, "id").await else {
        return;
    };
    let phone = val_str(&tenant, "phone");
    if phone.is_empty() {
        return;
    }

    let tenant_name = val_str(&tenant, "name");
    let body = format!(
        "شكراً {tenant_name}، تم استلام دفعتكم بمبلغ {amount} ريال وتحديث حالة الفاتورة."
    );
    queue_whatsapp(
        pool,
        &phone,
        &body,
        val_i64(invoice, "contract_id"),
        "payment_receipt",
    )
    .await;
}

/// Contract ids under a property, for the property filter on invoice lists.
async fn property_contract_ids(
    pool: &sqlx::PgPool,
    property_id: i64,
) -> AppResult<HashSet<i64>> {
    let mut unit_filters = Map::new();
    unit_filters.insert("property_id".to_string(), Value::from(property_id));
    let units = list_rows(pool, "units", Some(&unit_filters), 1000, 0, "id", true).await?;
    let unit_ids: Vec<Value> = units
        .iter()
        .filter_map(|unit| unit.as_object().and_then(|obj| obj.get("id")))
        .cloned()
        .collect();
    if unit_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let mut contract_filters = Map::new();
    contract_filters.insert("unit_id".to_string(), Value::Array(unit_ids));
    let contracts = list_rows(
        pool,
        "contracts",
        Some(&contract_filters),
        1000,
        0,
        "id",
        true,
    )
    .await?;

    Ok(contracts
        .iter()
        .filter_map(|contract| val_i64(contract, "id"))
        .collect())
}

fn arabic_invoice_status(status: InvoiceStatus) -> &'static str {
    match status {
        InvoiceStatus::Paid => "مدفوعة",
        InvoiceStatus::Partial => "سداد جزئي",
        InvoiceStatus::Pending => "مستحقة",
        InvoiceStatus::Overdue => "متأخرة",
        InvoiceStatus::Cancelled => "ملغية",
    }
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
