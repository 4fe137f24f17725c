use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Record an operator action in the activity log.
///
/// Best-effort by design: audit failures are logged and swallowed so they can
/// never abort the billing operation they describe.
pub async fn log_activity(
    pool: Option<&PgPool>,
    actor_id: Option<i64>,
    action: &str,
    description: &str,
    contract_id: Option<i64>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut record = Map::new();
    record.insert("action".to_string(), Value::String(action.to_string()));
    record.insert(
        "description".to_string(),
        Value::String(truncate(description, 1000)),
    );
    if let Some(user_id) = actor_id {
        record.insert("user_id".to_string(), Value::from(user_id));
    }
    if let Some(contract_id) = contract_id {
        record.insert("contract_id".to_string(), Value::from(contract_id));
    }

    if let Err(error) = create_row(pool, "activity_logs", &record).await {
        tracing::warn!(error = %error, action, "Failed to write activity log");
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncates_on_character_boundaries() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        assert_eq!(truncate("قصير", 100), "قصير");
        // Multi-byte text must not be split mid-character.
        assert_eq!(truncate("تم إنشاء عقد جديد", 7), "تم إنشا");
    }
}
