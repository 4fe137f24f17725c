use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Resolve the acting user id from the request headers.
///
/// Accepts `Authorization: Bearer <jwt>` signed with `JWT_SECRET` (HS256,
/// integer user id in `sub`). Outside production, an `x-user-id` header is
/// honored when dev overrides are enabled.
pub fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<i64> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(raw) = headers.get("x-user-id").and_then(|value| value.to_str().ok()) {
            if let Ok(user_id) = raw.trim().parse::<i64>() {
                return Ok(user_id);
            }
        }
    }

    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;

    let secret = state
        .config
        .jwt_secret
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Dependency("JWT_SECRET is not configured.".to_string()))?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired token.".to_string()))?;

    data.claims
        .sub
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("Token subject is not a valid user id.".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::bearer_token;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn rejects_missing_or_malformed_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer "),
        );
        assert_eq!(bearer_token(&headers), None);
    }
}
