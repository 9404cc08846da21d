//! Shared-secret checks for the trigger and moderation routes.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Requires `Authorization: Bearer <expected>`. An unset secret rejects
/// every request.
pub fn require_bearer(headers: &HeaderMap, expected: Option<&str>) -> AppResult<()> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    check(token, expected)
}

pub fn require_header(headers: &HeaderMap, name: &str, expected: Option<&str>) -> AppResult<()> {
    let value = headers.get(name).and_then(|v| v.to_str().ok());
    check(value, expected)
}

fn check(presented: Option<&str>, expected: Option<&str>) -> AppResult<()> {
    match (presented, expected) {
        (Some(presented), Some(expected)) if secrets_match(presented, expected) => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        map
    }

    #[test]
    fn test_bearer_accepts_matching_secret() {
        let h = headers("authorization", "Bearer cron-secret");
        assert!(require_bearer(&h, Some("cron-secret")).is_ok());
    }

    #[test]
    fn test_bearer_rejects_wrong_or_missing() {
        let h = headers("authorization", "Bearer nope");
        assert!(require_bearer(&h, Some("cron-secret")).is_err());
        assert!(require_bearer(&HeaderMap::new(), Some("cron-secret")).is_err());

        let basic = headers("authorization", "Basic cron-secret");
        assert!(require_bearer(&basic, Some("cron-secret")).is_err());
    }

    #[test]
    fn test_unset_secret_rejects_everything() {
        let h = headers("authorization", "Bearer ");
        assert!(require_bearer(&h, None).is_err());
    }

    #[test]
    fn test_webhook_header() {
        let h = headers(WEBHOOK_SECRET_HEADER, "hook");
        assert!(require_header(&h, WEBHOOK_SECRET_HEADER, Some("hook")).is_ok());
        assert!(require_header(&h, WEBHOOK_SECRET_HEADER, Some("other")).is_err());
    }

    #[test]
    fn test_secrets_match_requires_exact_bytes() {
        assert!(secrets_match("cron-secret", "cron-secret"));
        assert!(!secrets_match("cron-secreT", "cron-secret"));
        assert!(!secrets_match("cron-secret-longer", "cron-secret"));
        assert!(!secrets_match("", "cron-secret"));
    }
}
