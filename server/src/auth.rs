//! Bearer token authentication for REST and WebSocket clients.
//!
//! All clients share one API token (`WORKLOGIX_API_TOKEN`). REST requests
//! carry it as `Authorization: Bearer <token>`; the `/ws` upgrade carries it as
//! the `token` query parameter because browsers cannot set headers on
//! WebSocket handshakes.
//!
//! Tokens are compared in constant time with [`subtle`]. Per-user ownership
//! checks are made by the surrounding application, not here.
//!
//! # Example
//!
//! ```rust
//! use worklogix_server::auth::{bearer_token, validate_token, AuthError};
//!
//! assert_eq!(bearer_token("Bearer s3cret"), Ok("s3cret"));
//! assert!(validate_token("s3cret", "s3cret").is_ok());
//! assert_eq!(validate_token("guess", "s3cret"), Err(AuthError::InvalidToken));
//! ```

use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Reasons a request failed authentication.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credentials were supplied.
    #[error("missing token")]
    MissingToken,

    /// The `Authorization` header is not a bearer credential.
    #[error("malformed authorization header")]
    MalformedHeader,

    /// The token does not match the configured one.
    #[error("invalid token")]
    InvalidToken,
}

impl AuthError {
    /// Machine-readable code for error responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedHeader => "malformed_header",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Compares `provided` with `expected` in constant time.
///
/// # Errors
///
/// [`AuthError::InvalidToken`] if they differ.
pub fn validate_token(provided: &str, expected: &str) -> Result<(), AuthError> {
    // ct_eq on slices of different length returns false without leaking where
    // they differ.
    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}

/// Extracts the credential from an `Authorization: Bearer <token>` value.
///
/// The scheme is matched case-insensitively.
///
/// # Errors
///
/// [`AuthError::MalformedHeader`] for other schemes, and
/// [`AuthError::MissingToken`] for an empty credential.
pub fn bearer_token(value: &str) -> Result<&str, AuthError> {
    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Checks a request's `Authorization` header against `expected`.
///
/// # Errors
///
/// Any [`AuthError`] describing why the header was rejected.
pub fn authorize_headers(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    validate_token(bearer_token(value)?, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn validate_token_accepts_exact_match() {
        assert!(validate_token("abc123", "abc123").is_ok());
    }

    #[test]
    fn validate_token_rejects_mismatch() {
        assert_eq!(validate_token("abc124", "abc123"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn validate_token_rejects_prefix() {
        assert_eq!(validate_token("abc", "abc123"), Err(AuthError::InvalidToken));
        assert_eq!(validate_token("", "abc123"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn bearer_token_parses_scheme_case_insensitively() {
        assert_eq!(bearer_token("Bearer tok"), Ok("tok"));
        assert_eq!(bearer_token("bearer tok"), Ok("tok"));
        assert_eq!(bearer_token("  BEARER   tok  "), Ok("tok"));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), Err(AuthError::MalformedHeader));
        assert_eq!(bearer_token("tok"), Err(AuthError::MalformedHeader));
    }

    #[test]
    fn bearer_token_rejects_empty_credential() {
        assert_eq!(bearer_token("Bearer    "), Err(AuthError::MalformedHeader));
    }

    #[test]
    fn authorize_headers_requires_header() {
        assert_eq!(
            authorize_headers(&HeaderMap::new(), "tok"),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn authorize_headers_accepts_valid_bearer() {
        assert!(authorize_headers(&headers_with("Bearer tok"), "tok").is_ok());
        assert_eq!(
            authorize_headers(&headers_with("Bearer nope"), "tok"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AuthError::MissingToken.code(), "missing_token");
        assert_eq!(AuthError::MalformedHeader.code(), "malformed_header");
        assert_eq!(AuthError::InvalidToken.code(), "invalid_token");
    }
}
