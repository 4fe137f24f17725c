use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tag every request and its response with a fresh request id so log lines
/// can be correlated across the middleware stack.
pub async fn inject_request_id(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    match HeaderValue::from_str(&request_id) {
        Ok(value) => {
            request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
            let mut response = next.run(request).await;
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
            response
        }
        Err(_) => next.run(request).await,
    }
}
