//! Bearer-token authentication for the HTTP transport.
//!
//! Tokens come from `--auth-tokens` / `MCP_AUTH_TOKENS`. With no tokens
//! configured the middleware is not installed at all.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    tokens: HashSet<String>,
}

impl AuthConfig {
    /// Build from configured tokens. Blank entries are rejected.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self, String> {
        let mut valid = HashSet::new();
        for token in tokens {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                return Err("Empty token value in MCP_AUTH_TOKENS".to_string());
            }
            valid.insert(trimmed.to_string());
        }
        Ok(Self { tokens: valid })
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Compare against every configured token without short-circuiting.
    pub fn verify(&self, provided: &str) -> bool {
        self.tokens.iter().fold(false, |found, expected| {
            found | constant_time_eq(provided.as_bytes(), expected.as_bytes())
        })
    }
}

/// Reject requests without a valid `Authorization: Bearer` token.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let token = match extract_bearer_token(request.headers()) {
        Ok(Some(token)) => token,
        Ok(None) => {
            warn!("Authentication failed: missing Authorization header");
            return unauthorized_response(
                "Missing Bearer token in Authorization header",
                "Include a valid token: 'Authorization: Bearer <token>'",
            );
        }
        Err(msg) => {
            warn!("Authentication failed: invalid header format");
            return unauthorized_response(msg, "Use the format: 'Authorization: Bearer <token>'");
        }
    };

    if auth.verify(token) {
        debug!("Request authenticated");
        next.run(request).await
    } else {
        warn!(token_prefix = %mask_token(token), "Authentication failed: invalid token");
        unauthorized_response(
            "Invalid Bearer token",
            "Check that the token is one of the server's MCP_AUTH_TOKENS",
        )
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<&str>, &'static str> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| "Authorization header contains invalid characters")?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or("Invalid Authorization header format. Expected 'Bearer <token>'")?;
    if token.is_empty() {
        return Err("Bearer token is empty");
    }
    Ok(Some(token))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

fn mask_token(token: &str) -> String {
    match token.char_indices().nth(3) {
        Some((cut, _)) => format!("{}***", &token[..cut]),
        None => "***".to_string(),
    }
}

fn unauthorized_response(message: impl Into<String>, suggestion: impl Into<String>) -> Response {
    #[derive(Serialize)]
    struct ErrorResponse {
        error: ErrorDetail,
    }
    #[derive(Serialize)]
    struct ErrorDetail {
        code: &'static str,
        message: String,
        suggestion: String,
    }

    let body = ErrorResponse {
        error: ErrorDetail {
            code: "unauthorized",
            message: message.into(),
            suggestion: suggestion.into(),
        },
    };
    let json = serde_json::to_string(&body).unwrap_or_else(|_| {
        r#"{"error":{"code":"unauthorized","message":"Authentication failed"}}"#.to_string()
    });

    (
        StatusCode::UNAUTHORIZED,
        [(header::CONTENT_TYPE, "application/json")],
        json,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn test_from_tokens() {
        let auth = AuthConfig::from_tokens(vec![" abc ".into(), "def".into()]).unwrap();
        assert!(auth.is_enabled());
        assert_eq!(auth.token_count(), 2);
        assert!(auth.verify("abc"));
        assert!(!auth.verify("abcd"));
        assert!(AuthConfig::from_tokens(vec!["  ".into()]).is_err());
        assert!(!AuthConfig::disabled().is_enabled());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), Ok(None));
        assert_eq!(extract_bearer_token(&headers("Bearer tok")), Ok(Some("tok")));
        assert!(extract_bearer_token(&headers("Basic dXNlcg==")).is_err());
        assert!(extract_bearer_token(&headers("Bearer ")).is_err());
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("ab"), "***");
        assert_eq!(mask_token("secret"), "sec***");
    }

    #[test]
    fn test_unauthorized_status() {
        let response = unauthorized_response("nope", "try again");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
