/*!
 * # Admin Authentication
 *
 * Back-office access is granted through short-lived HS256 tokens:
 *
 * - `POST /admin/login` exchanges the shared admin key (`X-Admin-Key`) and an
 *   allow-listed email for a token, also set as the `admin_token` cookie
 * - every `/admin/...` request presents the token as `Authorization: Bearer` or
 *   through the cookie and is checked against the allow-list again
 */

use crate::{config::AppConfig, services::cart::cookie_value, signing::constant_time_eq};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;

pub const ADMIN_COOKIE: &str = "admin_token";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const TOKEN_ISSUER: &str = "tienda3d";
pub const ADMIN_ROLE: &str = "admin";

/// Claims carried by an admin token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminTokenError {
    #[error("Missing authentication")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Email is not allowed to administer the store")]
    NotAllowed,

    #[error("Invalid admin key")]
    InvalidApiKey,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl IntoResponse for AdminTokenError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::MissingToken => (StatusCode::UNAUTHORIZED, "AUTH_MISSING"),
            Self::InvalidToken => (StatusCode::UNAUTHORIZED, "AUTH_INVALID_TOKEN"),
            Self::TokenExpired => (StatusCode::UNAUTHORIZED, "AUTH_TOKEN_EXPIRED"),
            Self::InvalidApiKey => (StatusCode::UNAUTHORIZED, "AUTH_INVALID_API_KEY"),
            Self::NotAllowed => (StatusCode::FORBIDDEN, "AUTH_INSUFFICIENT_PERMISSIONS"),
            Self::TokenCreation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_TOKEN_CREATION_FAILED",
            ),
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Issues and verifies admin tokens
pub struct AdminTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
    allowed_emails: Vec<String>,
    api_key: Option<String>,
}

impl std::fmt::Debug for AdminTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenService")
            .field("ttl_secs", &self.ttl_secs)
            .field("allowed_emails", &self.allowed_emails)
            .finish_non_exhaustive()
    }
}

impl AdminTokenService {
    pub fn new(
        secret: &[u8],
        ttl_secs: u64,
        allowed_emails: Vec<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            allowed_emails: allowed_emails
                .into_iter()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.admin_token_key(),
            config.admin_token_ttl_secs,
            config.admin_emails(),
            config.admin_api_key.clone(),
        )
    }

    pub fn is_allowed(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        !email.is_empty() && self.allowed_emails.iter().any(|e| *e == email)
    }

    /// Compares the presented admin key in constant time. No configured key means no logins.
    pub fn check_api_key(&self, presented: &str) -> Result<(), AdminTokenError> {
        match &self.api_key {
            Some(expected) if constant_time_eq(expected.as_bytes(), presented.as_bytes()) => {
                Ok(())
            }
            _ => Err(AdminTokenError::InvalidApiKey),
        }
    }

    pub fn issue(&self, email: &str) -> Result<String, AdminTokenError> {
        let email = email.trim().to_lowercase();
        if !self.is_allowed(&email) {
            return Err(AdminTokenError::NotAllowed);
        }
        let now = Utc::now().timestamp();
        let claims = AdminClaims {
            sub: email.clone(),
            email,
            role: ADMIN_ROLE.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
            iss: TOKEN_ISSUER.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AdminTokenError::TokenCreation(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<AdminClaims, AdminTokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.leeway = 0;

        let claims = decode::<AdminClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AdminTokenError::TokenExpired,
                _ => AdminTokenError::InvalidToken,
            })?
            .claims;

        if claims.role != ADMIN_ROLE || claims.email.trim().is_empty() {
            return Err(AdminTokenError::InvalidToken);
        }
        if !self.is_allowed(&claims.email) {
            return Err(AdminTokenError::NotAllowed);
        }
        Ok(claims)
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }
}

/// `Set-Cookie` value carrying an admin token.
pub fn admin_cookie(token: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
        ADMIN_COOKIE, token, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_admin_cookie(secure: bool) -> String {
    admin_cookie("", 0, secure)
}

/// Bearer token first, then the `admin_token` cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
            let token = value[7..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| cookie_value(raw, ADMIN_COOKIE))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Authenticated back-office user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AdminSession {
    pub email: String,
    pub expires_at: i64,
}

impl AdminSession {
    fn authenticate(
        headers: &HeaderMap,
        tokens: &AdminTokenService,
    ) -> Result<Self, AdminTokenError> {
        let token = token_from_headers(headers).ok_or(AdminTokenError::MissingToken)?;
        let claims = tokens.verify(&token).map_err(|err| {
            warn!(error = %err, "admin token rejected");
            err
        })?;
        debug!(email = %claims.email, "admin session verified");
        Ok(Self {
            email: claims.email,
            expires_at: claims.exp,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
    Arc<AdminTokenService>: FromRef<S>,
{
    type Rejection = AdminTokenError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<AdminSession>() {
            return Ok(session.clone());
        }
        let tokens = Arc::<AdminTokenService>::from_ref(state);
        Self::authenticate(&parts.headers, &tokens)
    }
}

/// Rejects requests without a valid admin session and stores the session for handlers.
pub async fn require_admin(
    State(tokens): State<Arc<AdminTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    match AdminSession::authenticate(request.headers(), &tokens) {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    const SECRET: &[u8] = b"admin-token-secret-0123456789abcdefgh";

    fn service() -> AdminTokenService {
        AdminTokenService::new(
            SECRET,
            1800,
            vec!["Owner@Chroma3d.com".into()],
            Some("admin-key".into()),
        )
    }

    #[test]
    fn issue_and_verify() {
        let svc = service();
        let token = svc.issue(" owner@chroma3d.com ").unwrap();
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.email, "owner@chroma3d.com");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.iss, "tienda3d");
        assert_eq!(claims.exp - claims.iat, 1800);
    }

    #[test]
    fn rejects_unlisted_and_foreign_tokens() {
        let svc = service();
        assert_eq!(svc.issue("intruder@mail.com"), Err(AdminTokenError::NotAllowed));

        let other = AdminTokenService::new(
            b"another-secret-0123456789abcdefghijkl",
            1800,
            vec!["owner@chroma3d.com".into()],
            None,
        );
        let foreign = other.issue("owner@chroma3d.com").unwrap();
        assert_eq!(svc.verify(&foreign), Err(AdminTokenError::InvalidToken));
        assert_eq!(svc.verify("not.a.token"), Err(AdminTokenError::InvalidToken));

        // allow-list is re-checked on every verification
        let narrowed = AdminTokenService::new(SECRET, 1800, vec!["other@chroma3d.com".into()], None);
        let token = svc.issue("owner@chroma3d.com").unwrap();
        assert_eq!(narrowed.verify(&token), Err(AdminTokenError::NotAllowed));
    }

    #[test]
    fn rejects_expired_and_wrong_role() {
        let svc = service();
        let now = Utc::now().timestamp();
        let mut claims = AdminClaims {
            sub: "owner@chroma3d.com".into(),
            email: "owner@chroma3d.com".into(),
            role: "admin".into(),
            iat: now - 4000,
            exp: now - 10,
            iss: TOKEN_ISSUER.into(),
        };
        let key = EncodingKey::from_secret(SECRET);
        let expired = encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap();
        assert_eq!(svc.verify(&expired), Err(AdminTokenError::TokenExpired));

        claims.exp = now + 600;
        claims.role = "customer".into();
        let wrong_role = encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap();
        assert_eq!(svc.verify(&wrong_role), Err(AdminTokenError::InvalidToken));

        claims.role = "admin".into();
        claims.iss = "elsewhere".into();
        let wrong_issuer = encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap();
        assert_eq!(svc.verify(&wrong_issuer), Err(AdminTokenError::InvalidToken));
    }

    #[test]
    fn api_key_check() {
        let svc = service();
        assert!(svc.check_api_key("admin-key").is_ok());
        assert_eq!(svc.check_api_key("admin-kez"), Err(AdminTokenError::InvalidApiKey));
        let keyless = AdminTokenService::new(SECRET, 60, vec![], None);
        assert_eq!(keyless.check_api_key(""), Err(AdminTokenError::InvalidApiKey));
    }

    #[test]
    fn token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("cart=x; admin_token=from-cookie"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn cookie_attributes() {
        let cookie = admin_cookie("tok", 21600, true);
        assert_eq!(
            cookie,
            "admin_token=tok; Path=/; Max-Age=21600; HttpOnly; SameSite=Strict; Secure"
        );
        assert!(clear_admin_cookie(false).contains("Max-Age=0"));
    }

    #[test]
    fn error_statuses() {
        assert_matches!(
            AdminTokenError::NotAllowed.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_matches!(
            AdminTokenError::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
