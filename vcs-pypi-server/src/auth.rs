//! Optional inbound authentication for the index routes.
//!
//! When `security.require_authentication` is set, each request must carry
//! either HTTP Basic credentials matching one of `security.basic_auth_users`
//! or a Bearer token listed in `security.api_keys`. Rejections answer 401 with
//! a `WWW-Authenticate` challenge so pip prompts for credentials.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::debug;

use crate::{config::SecurityConfig, error::AppError, state::AppState};

/// Credentials presented in an `Authorization` header.
#[derive(Debug, PartialEq, Eq)]
enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

fn extract_credentials(req: &Request) -> Option<Credentials> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, payload) = value.split_once(' ')?;
    let payload = payload.trim();

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD.decode(payload).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        })
    } else if scheme.eq_ignore_ascii_case("bearer") {
        Some(Credentials::Bearer(payload.to_string()))
    } else {
        None
    }
}

fn is_authorized(security: &SecurityConfig, credentials: &Credentials) -> bool {
    match credentials {
        Credentials::Basic { username, password } => {
            security.basic_auth_users.iter().any(|user| {
                user.username == *username && user.password.expose() == password.as_str()
            }) || security.api_keys.iter().any(|key| key.expose() == password.as_str())
        }
        Credentials::Bearer(token) => security
            .api_keys
            .iter()
            .any(|key| key.expose() == token.as_str()),
    }
}

/// Rejects requests without valid credentials when authentication is required.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let security = &state.config.security;
    if !security.require_authentication {
        return Ok(next.run(req).await);
    }

    let credentials = extract_credentials(&req).ok_or_else(|| {
        AppError::Unauthorized("Missing or invalid Authorization header".to_string())
    })?;

    if !is_authorized(security, &credentials) {
        debug!(uri = %req.uri(), "Rejected request with unknown credentials");
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BasicCredential, Secret};
    use axum::body::Body;

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn security() -> SecurityConfig {
        SecurityConfig {
            require_authentication: true,
            basic_auth_users: vec![BasicCredential {
                username: "pip".to_string(),
                password: Secret::new("hunter2"),
            }],
            api_keys: vec![Secret::new("key-123")],
        }
    }

    #[test]
    fn test_extracts_basic_credentials() {
        // "pip:hunter2"
        let req = request(Some("Basic cGlwOmh1bnRlcjI="));
        assert_eq!(
            extract_credentials(&req),
            Some(Credentials::Basic {
                username: "pip".to_string(),
                password: "hunter2".to_string(),
            })
        );
    }

    #[test]
    fn test_extracts_bearer_token() {
        let req = request(Some("Bearer key-123"));
        assert_eq!(
            extract_credentials(&req),
            Some(Credentials::Bearer("key-123".to_string()))
        );
    }

    #[test]
    fn test_rejects_malformed_headers() {
        assert_eq!(extract_credentials(&request(None)), None);
        assert_eq!(extract_credentials(&request(Some("Basic !!!"))), None);
        assert_eq!(extract_credentials(&request(Some("Digest abc"))), None);
    }

    #[test]
    fn test_authorization_rules() {
        let security = security();
        let basic = |username: &str, password: &str| Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        };

        assert!(is_authorized(&security, &basic("pip", "hunter2")));
        assert!(!is_authorized(&security, &basic("pip", "wrong")));
        assert!(!is_authorized(&security, &basic("other", "hunter2")));
        // pip sends API keys as the Basic password when given `https://__token__:<key>@host/`
        assert!(is_authorized(&security, &basic("__token__", "key-123")));
        assert!(is_authorized(&security, &Credentials::Bearer("key-123".to_string())));
        assert!(!is_authorized(&security, &Credentials::Bearer("nope".to_string())));
    }
}
