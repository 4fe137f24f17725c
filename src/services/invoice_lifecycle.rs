use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};

use crate::billing::status::{derive_invoice_status, InvoiceStatus};
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{
    create_row_tx, delete_row_tx, get_row, list_rows_tx, lock_row_tx, map_db_error, update_row_tx,
};
use crate::schemas::{RecordPaymentInput, UpdatePaymentInput};
use crate::services::messaging::queue_whatsapp;

/// Result of the daily overdue-invoice sweep.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OverdueSweepResult {
    pub flagged: u32,
    pub notices_queued: u32,
    pub errors: u32,
}

/// Record a payment against an invoice and re-derive the invoice status from
/// the full payment set.
///
/// The invoice row is locked for the duration of the read-modify-write so
/// concurrent payments against the same invoice serialize instead of racing
/// to an inconsistent status.
pub async fn record_payment(
    pool: &PgPool,
    invoice_id: i64,
    input: &RecordPaymentInput,
    today: NaiveDate,
) -> AppResult<(Value, Value)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let invoice = lock_row_tx(&mut tx, "invoices", invoice_id, "id").await?;
    let current = InvoiceStatus::parse(&val_str(&invoice, "status"))
        .unwrap_or(InvoiceStatus::Pending);
    if current == InvoiceStatus::Cancelled {
        return Err(AppError::BadRequest(
            "Cannot record a payment against a cancelled invoice.".to_string(),
        ));
    }

    let mut record = Map::new();
    record.insert("invoice_id".to_string(), Value::from(invoice_id));
    record.insert("amount".to_string(), Value::from(input.amount));
    if let Some(method) = input.method.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        record.insert("method".to_string(), Value::String(method.to_string()));
    }
    record.insert(
        "paid_at".to_string(),
        Value::String(input.paid_at.unwrap_or_else(Utc::now).to_rfc3339()),
    );

    let payment = create_row_tx(&mut tx, "payments", &record).await?;
    let updated = recompute_status_tx(&mut tx, &invoice, today).await?;

    tx.commit().await.map_err(map_db_error)?;
    Ok((payment, updated))
}

/// Corrective edit of a recorded payment; re-derives the parent invoice.
pub async fn update_payment(
    pool: &PgPool,
    payment_id: i64,
    input: &UpdatePaymentInput,
    today: NaiveDate,
) -> AppResult<(Value, Value)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let payment = lock_row_tx(&mut tx, "payments", payment_id, "id").await?;
    let invoice_id = val_i64(&payment, "invoice_id").ok_or_else(|| {
        AppError::Internal("Payment record is missing its invoice reference.".to_string())
    })?;
    let invoice = lock_row_tx(&mut tx, "invoices", invoice_id, "id").await?;

    let mut patch = Map::new();
    patch.insert("amount".to_string(), Value::from(input.amount));
    if let Some(method) = input.method.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        patch.insert("method".to_string(), Value::String(method.to_string()));
    }
    if let Some(paid_at) = input.paid_at {
        patch.insert("paid_at".to_string(), Value::String(paid_at.to_rfc3339()));
    }

    let updated_payment = update_row_tx(&mut tx, "payments", payment_id, &patch, "id").await?;
    let updated_invoice = recompute_status_tx(&mut tx, &invoice, today).await?;

    tx.commit().await.map_err(map_db_error)?;
    Ok((updated_payment, updated_invoice))
}

/// Corrective deletion of a recorded payment; re-derives the parent invoice.
pub async fn delete_payment(
    pool: &PgPool,
    payment_id: i64,
    today: NaiveDate,
) -> AppResult<Value> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let payment = lock_row_tx(&mut tx, "payments", payment_id, "id").await?;
    let invoice_id = val_i64(&payment, "invoice_id").ok_or_else(|| {
        AppError::Internal("Payment record is missing its invoice reference.".to_string())
    })?;
    let invoice = lock_row_tx(&mut tx, "invoices", invoice_id, "id").await?;

    delete_row_tx(&mut tx, "payments", payment_id, "id").await?;
    let updated_invoice = recompute_status_tx(&mut tx, &invoice, today).await?;

    tx.commit().await.map_err(map_db_error)?;
    Ok(updated_invoice)
}

/// Recompute an invoice's status from its payments inside an open
/// transaction; writes only when the derived status differs.
async fn recompute_status_tx(
    conn: &mut PgConnection,
    invoice: &Value,
    today: NaiveDate,
) -> AppResult<Value> {
    let invoice_id = val_i64(invoice, "id").ok_or_else(|| {
        AppError::Internal("Invoice record is missing its id.".to_string())
    })?;

    let mut filters = Map::new();
    filters.insert("invoice_id".to_string(), Value::from(invoice_id));
    let payments = list_rows_tx(conn, "payments", Some(&filters), 1000, 0, "paid_at", true).await?;

    let paid_sum: f64 = payments
        .iter()
        .map(|payment| val_f64(payment, "amount"))
        .sum();

    let amount = val_f64(invoice, "amount");
    let due_date = val_date(invoice, "due_date").unwrap_or(today);
    let current = InvoiceStatus::parse(&val_str(invoice, "status"))
        .unwrap_or(InvoiceStatus::Pending);

    let next = derive_invoice_status(amount, paid_sum, due_date, today, current);
    if next == current {
        return Ok(invoice.clone());
    }

    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(next.as_str().to_string()),
    );
    update_row_tx(conn, "invoices", invoice_id, &patch, "id").await
}

/// Flag every unpaid-in-full invoice whose due date has passed as OVERDUE.
///
/// A single set-based update keeps the sweep idempotent (a second run in the
/// same day matches nothing), and the RETURNING clause yields exactly the
/// newly flagged invoices, so reminder notices are queued once per invoice.
pub async fn run_overdue_sweep(pool: &PgPool, today: NaiveDate) -> OverdueSweepResult {
    let mut result = OverdueSweepResult {
        flagged: 0,
        notices_queued: 0,
        errors: 0,
    };

    let flagged: Vec<(i64,)> = match sqlx::query_as(
        "UPDATE invoices
         SET status = 'OVERDUE'
         WHERE status IN ('PENDING', 'PARTIAL')
           AND due_date < $1
         RETURNING id",
    )
    .bind(today)
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(error) => {
            warn!("Overdue sweep failed: {error}");
            result.errors += 1;
            return result;
        }
    };

    result.flagged = flagged.len() as u32;

    for (invoice_id,) in &flagged {
        if let Err(error) = queue_overdue_notice(pool, *invoice_id).await {
            warn!(invoice_id, error = %error, "Failed to queue overdue notice");
        } else {
            result.notices_queued += 1;
        }
    }

    if result.flagged > 0 {
        info!(
            flagged = result.flagged,
            notices = result.notices_queued,
            "Overdue sweep completed"
        );
    }

    result
}

async fn queue_overdue_notice(pool: &PgPool, invoice_id: i64) -> Result<(), AppError> {
    let invoice = get_row(pool, "invoices", invoice_id, "id").await?;
    let Some(tenant_id) = val_i64(&invoice, "tenant_id") else {
        return Ok(());
    };
    let tenant = get_row(pool, "tenants", tenant_id, "id").await?;
    let phone = val_str(&tenant, "phone");
    if phone.is_empty() {
        return Ok(());
    }

    let tenant_name = val_str(&tenant, "name");
    let amount = val_f64(&invoice, "amount");
    let due_date = val_str(&invoice, "due_date");
    let body = format!(
        "تنبيه: عزيزي {tenant_name}، لديك فاتورة بقيمة {amount} ريال مستحقة منذ {due_date} ولم يتم سدادها بعد. نأمل المبادرة بالسداد."
    );

    queue_whatsapp(
        pool,
        &phone,
        &body,
        val_i64(&invoice, "contract_id"),
        "invoice_overdue",
    )
    .await;
    Ok(())
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
