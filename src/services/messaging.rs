use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::repository::table_service::{create_row, list_rows, update_row};

/// Queue an outbound WhatsApp message.
///
/// Fire-and-forget: the message lands in `message_logs` with status `queued`
/// and the background poller delivers it. Enqueue failures are logged and
/// swallowed; notification trouble must never roll back billing state.
pub async fn queue_whatsapp(
    pool: &sqlx::PgPool,
    recipient_phone: &str,
    body: &str,
    contract_id: Option<i64>,
    kind: &str,
) {
    let recipient = recipient_phone.trim();
    if recipient.is_empty() {
        return;
    }

    let mut message = Map::new();
    message.insert("channel".to_string(), Value::String("whatsapp".to_string()));
    message.insert(
        "recipient".to_string(),
        Value::String(recipient.to_string()),
    );
    message.insert("status".to_string(), Value::String("queued".to_string()));

    let mut payload = Map::new();
    payload.insert("body".to_string(), Value::String(body.to_string()));
    payload.insert("kind".to_string(), Value::String(kind.to_string()));
    if let Some(contract_id) = contract_id {
        payload.insert("contract_id".to_string(), Value::from(contract_id));
    }
    message.insert("payload".to_string(), Value::Object(payload));

    if let Err(error) = create_row(pool, "message_logs", &message).await {
        warn!(error = %error, kind, "Failed to queue WhatsApp message");
    }
}

/// Drain the outbound message queue: poll `message_logs` where status =
/// 'queued', send via Twilio, update status. Failed messages are retried
/// while retry_count < 3.
pub async fn process_queued_messages(
    pool: &sqlx::PgPool,
    http_client: &Client,
    config: &AppConfig,
) -> (u32, u32) {
    let mut sent = 0u32;
    let mut failed = 0u32;

    let mut filters = Map::new();
    filters.insert("status".to_string(), Value::String("queued".to_string()));

    let mut messages = match list_rows(
        pool,
        "message_logs",
        Some(&filters),
        100,
        0,
        "created_at",
        true,
    )
    .await
    {
        Ok(rows) => rows,
        Err(error) => {
            warn!("Failed to fetch queued messages: {error}");
            return (0, 0);
        }
    };

    let mut retry_filters = Map::new();
    retry_filters.insert("status".to_string(), Value::String("failed".to_string()));

    if let Ok(failed_messages) = list_rows(
        pool,
        "message_logs",
        Some(&retry_filters),
        50,
        0,
        "created_at",
        true,
    )
    .await
    {
        for message in failed_messages {
            let retry_count = message
                .as_object()
                .and_then(|obj| obj.get("retry_count"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if retry_count < 3 {
                messages.push(message);
            }
        }
    }

    for message in messages {
        let Some(message_id) = message
            .as_object()
            .and_then(|obj| obj.get("id"))
            .and_then(Value::as_i64)
        else {
            continue;
        };
        let recipient = val_str(&message, "recipient");
        let body = message
            .as_object()
            .and_then(|obj| obj.get("payload"))
            .and_then(Value::as_object)
            .and_then(|payload| payload.get("body"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if recipient.is_empty() || body.is_empty() {
            continue;
        }

        let result = send_whatsapp(http_client, config, &recipient, &body).await;

        let current_retry = message
            .as_object()
            .and_then(|obj| obj.get("retry_count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let mut patch = Map::new();
        match result {
            Ok(_) => {
                patch.insert("status".to_string(), Value::String("sent".to_string()));
                patch.insert(
                    "sent_at".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                sent += 1;
            }
            Err(error_message) => {
                patch.insert("status".to_string(), Value::String("failed".to_string()));
                patch.insert("error_message".to_string(), Value::String(error_message));
                patch.insert("retry_count".to_string(), Value::from(current_retry + 1));
                failed += 1;
            }
        }

        let _ = update_row(pool, "message_logs", message_id, &patch, "id").await;
    }

    if sent > 0 || failed > 0 {
        info!("Processed messages: {sent} sent, {failed} failed");
    }
    (sent, failed)
}

/// Send one WhatsApp message through the Twilio REST API.
async fn send_whatsapp(
    http_client: &Client,
    config: &AppConfig,
    recipient: &str,
    body: &str,
) -> Result<Value, String> {
    let account_sid = config
        .twilio_account_sid
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "TWILIO_ACCOUNT_SID not configured".to_string())?;

    let auth_token = config
        .twilio_auth_token
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "TWILIO_AUTH_TOKEN not configured".to_string())?;

    let from_number = config
        .twilio_whatsapp_number
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "TWILIO_WHATSAPP_NUMBER not configured".to_string())?;

    let to = normalize_whatsapp_number(recipient);
    let url =
        format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Messages.json");

    let response = http_client
        .post(&url)
        .basic_auth(account_sid, Some(auth_token))
        .form(&[("To", to.as_str()), ("From", from_number), ("Body", body)])
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Twilio API request failed");
            "Twilio API request failed.".to_string()
        })?;

    let status = response.status();
    let response_body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        Ok(response_body)
    } else {
        let error_message = response_body
            .as_object()
            .and_then(|obj| obj.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown Twilio API error");
        Err(format!("Twilio API error ({status}): {error_message}"))
    }
}

/// Normalize a stored phone number into Twilio's `whatsapp:+E164` form.
///
/// Handles the common Saudi formats in the tenant records: local `05…`
/// numbers and bare 9-digit `5…` numbers become `+966…`.
pub fn normalize_whatsapp_number(raw: &str) -> String {
    let mut number: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();

    if number.starts_with("05") {
        number = format!("+966{}", &number[1..]);
    } else if number.starts_with('5') && number.len() == 9 {
        number = format!("+966{number}");
    }

    if number.starts_with("whatsapp:") {
        number
    } else {
        format!("whatsapp:{number}")
    }
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

#[cfg(test)]
mod tests {
    use super::normalize_whatsapp_number;

    #[test]
    fn normalizes_saudi_numbers() {
        assert_eq!(
            normalize_whatsapp_number("0509466667"),
            "whatsapp:+966509466667"
        );
        assert_eq!(
            normalize_whatsapp_number("509466667"),
            "whatsapp:+966509466667"
        );
        assert_eq!(
            normalize_whatsapp_number("05 0946 6667"),
            "whatsapp:+966509466667"
        );
    }

    #[test]
    fn leaves_international_numbers_alone() {
        assert_eq!(
            normalize_whatsapp_number("+966509466667"),
            "whatsapp:+966509466667"
        );
        assert_eq!(
            normalize_whatsapp_number("whatsapp:+14155552671"),
            "whatsapp:+14155552671"
        );
    }
}
