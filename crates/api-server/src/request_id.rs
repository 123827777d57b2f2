use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::fmt;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied id that is passed through unchanged.
const MAX_INCOMING_LEN: usize = 128;

/// Correlation id for one HTTP call. Handlers read it from the request
/// extensions to tag their log lines.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller id when it is short printable ASCII, otherwise a fresh UUID v4.
fn resolve_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= MAX_INCOMING_LEN)
        .filter(|s| s.chars().all(|c| c.is_ascii_graphic()))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Records the id on the trace span, exposes it to handlers as
/// `Extension<RequestId>` and echoes it on the response.
pub async fn request_id_middleware(headers: HeaderMap, mut request: Request, next: Next) -> Response {
    let id = resolve_id(&headers);

    tracing::Span::current().record("request_id", id.as_str());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(val) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(REQUEST_ID_HEADER, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn test_caller_id_reused() {
        assert_eq!(resolve_id(&headers("edge-7f3a")), "edge-7f3a");
    }

    #[test]
    fn test_unusable_caller_id_replaced() {
        let long = "a".repeat(MAX_INCOMING_LEN + 1);
        for bad in ["", "has space", long.as_str()] {
            let id = resolve_id(&headers(bad));
            assert_ne!(id, bad);
            assert!(Uuid::parse_str(&id).is_ok());
        }
        assert!(Uuid::parse_str(&resolve_id(&HeaderMap::new())).is_ok());
    }
}
