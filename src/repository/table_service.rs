#![allow(dead_code)]

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgConnection, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "activity_logs",
    "contracts",
    "invoices",
    "message_logs",
    "payments",
    "properties",
    "tenants",
    "units",
];

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let mut query = build_list_query(table, filters, limit, offset, order_by, ascending)?;
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// Same as `list_rows` but executes within an existing transaction.
pub async fn list_rows_tx(
    conn: &mut PgConnection,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let mut query = build_list_query(table, filters, limit, offset, order_by, ascending)?;
    let rows = query
        .build()
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: i64,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE t.");
    query.push(id_name).push(" = ").push_bind(row_id);
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

/// Fetch a row within a transaction and take a `FOR UPDATE` lock on it.
///
/// Read-modify-write sequences (payment recompute, renewal hand-off) use this
/// so concurrent writers against the same record serialize instead of racing.
pub async fn lock_row_tx(
    conn: &mut PgConnection,
    table: &str,
    row_id: i64,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE t.");
    query.push(id_name).push(" = ").push_bind(row_id);
    query.push(" LIMIT 1 FOR UPDATE OF t");

    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = build_insert_query(table, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table} record.")))
}

/// Same as `create_row` but executes within an existing transaction.
pub async fn create_row_tx(
    conn: &mut PgConnection,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = build_insert_query(table, payload)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: i64,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let mut query = build_update_query(table, row_id, payload, id_field)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table} record not found.")))
}

/// Same as `update_row` but executes within an existing transaction.
pub async fn update_row_tx(
    conn: &mut PgConnection,
    table: &str,
    row_id: i64,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let mut query = build_update_query(table, row_id, payload, id_field)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: i64,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE t.");
    query.push(id_name).push(" = ").push_bind(row_id);
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

/// Same as `delete_row` but executes within an existing transaction and skips
/// the read-back of the deleted record.
pub async fn delete_row_tx(
    conn: &mut PgConnection,
    table: &str,
    row_id: i64,
    id_field: &str,
) -> Result<u64, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE t.");
    query.push(id_name).push(" = ").push_bind(row_id);
    let result = query
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;

    Ok(result.rows_affected())
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;

    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

fn build_list_query<'a>(
    table: &str,
    filters: Option<&'a Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    if ascending {
        query.push(" ASC");
    } else {
        query.push(" DESC");
    }
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    Ok(query)
}

fn build_insert_query<'a>(
    table: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }

    // jsonb_populate_record lets PostgreSQL resolve column types (date,
    // enum, boolean, numeric …) automatically from the table definition.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name.to_string()).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.to_string());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(key.to_string());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name.to_string())
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name.to_string())
        .push(".*) AS row");

    Ok(query)
}

fn build_update_query<'a>(
    table: &str,
    row_id: i64,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name.to_string()).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.to_string());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.to_string());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name.to_string())
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE t.");
    query
        .push(id_name.to_string())
        .push(" = ")
        .push_bind(row_id);
    query.push(" RETURNING row_to_json(t) AS row");

    Ok(query)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    if trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone)]
enum ScalarFilter {
    Text(String),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

#[derive(Debug, Clone)]
enum ArrayFilter {
    Text(Vec<String>),
    Bool(Vec<bool>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    IsNull,
}

fn parse_filter_key(filter_key: &str) -> Result<(&str, FilterOperator), AppError> {
    let mut column = filter_key;
    let mut operator = FilterOperator::Eq;

    if let Some((candidate_column, suffix)) = filter_key.rsplit_once("__") {
        operator = match suffix {
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "like" => FilterOperator::Like,
            "ilike" => FilterOperator::ILike,
            "is_null" => FilterOperator::IsNull,
            "in" => FilterOperator::Eq,
            _ => FilterOperator::Eq,
        };
        if !matches!(operator, FilterOperator::Eq) || suffix == "in" {
            column = candidate_column;
        }
    }

    Ok((validate_identifier(column)?, operator))
}

fn scalar_to_text(value: &ScalarFilter) -> String {
    match value {
        ScalarFilter::Text(text) => text.clone(),
        ScalarFilter::Bool(flag) => flag.to_string(),
        ScalarFilter::I64(number) => number.to_string(),
        ScalarFilter::F64(number) => number.to_string(),
        ScalarFilter::Date(value) => value.to_string(),
        ScalarFilter::Timestamp(value) => value.to_rfc3339(),
    }
}

fn parse_bool_filter_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => *flag,
        Value::Number(number) => {
            number.as_i64().is_some_and(|parsed| parsed != 0)
                || number.as_f64().is_some_and(|parsed| parsed != 0.0)
        }
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "1" | "yes" | "y"
        ),
        _ => false,
    }
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    if matches!(operator, FilterOperator::IsNull) {
        let should_be_null = parse_bool_filter_value(value);
        query.push(" AND t.").push(column.to_string());
        if should_be_null {
            query.push(" IS NULL");
        } else {
            query.push(" IS NOT NULL");
        }
        return Ok(());
    }

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if !matches!(operator, FilterOperator::Eq) {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            let filter = infer_array_filter(column, items);
            if matches!(filter, ArrayFilter::Text(ref values) if values.is_empty())
                || matches!(filter, ArrayFilter::Bool(ref values) if values.is_empty())
                || matches!(filter, ArrayFilter::I64(ref values) if values.is_empty())
                || matches!(filter, ArrayFilter::F64(ref values) if values.is_empty())
            {
                return Ok(());
            }
            query.push(" AND ");
            push_array_filter(query, column, &filter);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            let filter = infer_scalar_filter(column, value);
            push_scalar_filter(query, column, operator, &filter);
            Ok(())
        }
    }
}

fn push_scalar_filter(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    operator: FilterOperator,
    value: &ScalarFilter,
) {
    query.push("t.").push(column.to_string());
    match operator {
        FilterOperator::Eq => match value {
            ScalarFilter::Text(text) => {
                query.push("::text = ").push_bind(text.clone());
            }
            ScalarFilter::Bool(flag) => {
                query.push(" = ").push_bind(*flag);
            }
            ScalarFilter::I64(number) => {
                query.push(" = ").push_bind(*number);
            }
            ScalarFilter::F64(number) => {
                query.push(" = ").push_bind(*number);
            }
            ScalarFilter::Date(value) => {
                query.push(" = ").push_bind(*value);
            }
            ScalarFilter::Timestamp(value) => {
                query.push(" = ").push_bind(value.to_owned());
            }
        },
        FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
            let sql_operator = match operator {
                FilterOperator::Gt => " > ",
                FilterOperator::Gte => " >= ",
                FilterOperator::Lt => " < ",
                FilterOperator::Lte => " <= ",
                _ => " = ",
            };
            match value {
                ScalarFilter::Text(text) => {
                    query
                        .push("::text")
                        .push(sql_operator)
                        .push_bind(text.clone());
                }
                ScalarFilter::Bool(flag) => {
                    query.push(sql_operator).push_bind(*flag);
                }
                ScalarFilter::I64(number) => {
                    query.push(sql_operator).push_bind(*number);
                }
                ScalarFilter::F64(number) => {
                    query.push(sql_operator).push_bind(*number);
                }
                ScalarFilter::Date(value) => {
                    query.push(sql_operator).push_bind(*value);
                }
                ScalarFilter::Timestamp(value) => {
                    query.push(sql_operator).push_bind(value.to_owned());
                }
            }
        }
        FilterOperator::Like | FilterOperator::ILike => {
            let sql_operator = if matches!(operator, FilterOperator::ILike) {
                " ILIKE "
            } else {
                " LIKE "
            };
            query
                .push("::text")
                .push(sql_operator)
                .push_bind(scalar_to_text(value));
        }
        FilterOperator::IsNull => {
            // handled by push_filter_clause before scalar inference
        }
    }
}

fn push_array_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ArrayFilter) {
    query.push("t.").push(column.to_string());
    match value {
        ArrayFilter::Text(values) => {
            query
                .push("::text = ANY(")
                .push_bind(values.clone())
                .push(")");
        }
        ArrayFilter::Bool(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push(")");
        }
        ArrayFilter::I64(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push(")");
        }
        ArrayFilter::F64(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push(")");
        }
    }
}

fn infer_scalar_filter(filter_key: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                return ScalarFilter::I64(as_i64);
            }
            if let Some(as_f64) = number.as_f64() {
                return ScalarFilter::F64(as_f64);
            }
            ScalarFilter::Text(number.to_string())
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_id_identifier(filter_key) {
                if let Ok(parsed) = trimmed.parse::<i64>() {
                    return ScalarFilter::I64(parsed);
                }
            }
            if is_timestamp_identifier(filter_key) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return ScalarFilter::Timestamp(parsed);
                }
            }
            if is_date_identifier(filter_key) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        _ => ScalarFilter::Text(render_scalar(value)),
    }
}

fn infer_array_filter(filter_key: &str, values: &[Value]) -> ArrayFilter {
    if values.is_empty() {
        return ArrayFilter::Text(Vec::new());
    }

    if is_id_identifier(filter_key) {
        let mut parsed = Vec::with_capacity(values.len());
        let mut all_ids = true;
        for value in values {
            let as_i64 = match value {
                Value::Number(number) => number.as_i64(),
                Value::String(text) => text.trim().parse::<i64>().ok(),
                _ => None,
            };
            match as_i64 {
                Some(id) => parsed.push(id),
                None => {
                    all_ids = false;
                    break;
                }
            }
        }
        if all_ids {
            return ArrayFilter::I64(parsed);
        }
    }

    if values.iter().all(|value| matches!(value, Value::Bool(_))) {
        return ArrayFilter::Bool(
            values
                .iter()
                .filter_map(Value::as_bool)
                .collect::<Vec<bool>>(),
        );
    }

    if values
        .iter()
        .all(|value| matches!(value, Value::Number(number) if number.as_i64().is_some()))
    {
        return ArrayFilter::I64(
            values
                .iter()
                .filter_map(Value::as_i64)
                .collect::<Vec<i64>>(),
        );
    }

    if values.iter().all(|value| value.as_f64().is_some()) {
        return ArrayFilter::F64(
            values
                .iter()
                .filter_map(Value::as_f64)
                .collect::<Vec<f64>>(),
        );
    }

    ArrayFilter::Text(values.iter().map(render_scalar).collect::<Vec<_>>())
}

fn is_id_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized.ends_with("_id")
}

fn is_date_identifier(identifier: &str) -> bool {
    identifier.trim().ends_with("_date")
}

fn is_timestamp_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized.ends_with("_at")
}

pub(crate) fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::{
        infer_scalar_filter, parse_filter_key, validate_identifier, validate_table,
        FilterOperator, ScalarFilter,
    };
    use sqlx::{Postgres, QueryBuilder};

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("due_date").is_ok());
        assert!(validate_identifier("contract_id").is_ok());
        assert!(validate_identifier("3invalid").is_err());
        assert!(validate_identifier("drop table").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn only_known_tables_are_allowed() {
        assert!(validate_table("invoices").is_ok());
        assert!(validate_table("contracts").is_ok());
        assert!(validate_table("pg_catalog").is_err());
    }

    #[test]
    fn filter_key_operators() {
        let (column, operator) = parse_filter_key("due_date__lt").unwrap();
        assert_eq!(column, "due_date");
        assert_eq!(operator, FilterOperator::Lt);

        let (column, operator) = parse_filter_key("status").unwrap();
        assert_eq!(column, "status");
        assert_eq!(operator, FilterOperator::Eq);

        let (column, operator) = parse_filter_key("start_date__gt").unwrap();
        assert_eq!(column, "start_date");
        assert_eq!(operator, FilterOperator::Gt);
    }

    #[test]
    fn scalar_inference_for_ids_and_dates() {
        assert!(matches!(
            infer_scalar_filter("contract_id", &Value::String("42".to_string())),
            ScalarFilter::I64(42)
        ));
        assert!(matches!(
            infer_scalar_filter("due_date", &Value::String("2024-04-20".to_string())),
            ScalarFilter::Date(_)
        ));
        assert!(matches!(
            infer_scalar_filter("status", &Value::String("PENDING".to_string())),
            ScalarFilter::Text(_)
        ));
    }

    #[test]
    fn insert_sql_uses_jsonb_populate_record() {
        let mut payload = Map::new();
        payload.insert("amount".to_string(), Value::from(5500.0));
        payload.insert("contract_id".to_string(), Value::from(7));
        payload.insert(
            "status".to_string(),
            Value::String("PENDING".to_string()),
        );

        let mut keys = payload.keys().cloned().collect::<Vec<_>>();
        keys.sort_unstable();

        let mut query = QueryBuilder::<Postgres>::new("INSERT INTO invoices (");
        {
            let mut separated = query.separated(", ");
            for key in &keys {
                separated.push(key.as_str());
            }
        }
        query.push(") SELECT ");
        {
            let mut separated = query.separated(", ");
            for key in &keys {
                separated.push("r.");
                separated.push_unseparated(key.as_str());
            }
        }
        query.push(" FROM jsonb_populate_record(NULL::invoices, ");
        query.push_bind(Value::Object(payload));
        query.push(") r");

        let sql = query.sql();
        assert!(
            sql.contains("jsonb_populate_record(NULL::invoices"),
            "Expected jsonb_populate_record in SQL but got: {sql}"
        );
        assert!(
            sql.contains("SELECT r.amount, r.contract_id, r.status"),
            "Expected r.col references in SQL but got: {sql}"
        );
    }
}
