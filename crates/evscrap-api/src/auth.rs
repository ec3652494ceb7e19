//! # Authentication & Principals
//!
//! Bearer token middleware resolving every request to a [`CallerIdentity`].
//!
//! ## Token Format
//!
//! ```text
//! Bearer user:{tenant_id}:{sub}:{secret}   tenant user
//! Bearer admin::{sub}:{secret}             operator
//! ```
//!
//! The secret is compared in constant time against `AUTH_TOKEN`.
//!
//! ## Development Mode
//!
//! With no `AUTH_TOKEN` configured, identity comes from headers:
//! `x-test-tenant-id` (present → tenant user) and `x-test-user-sub`
//! (defaults to `test-user-sub` for users, `dev-admin` for operators).
//!
//! Handlers take [`UserPrincipal`] or [`AdminPrincipal`]; the wrong role is
//! a 403, no identity at all is a 401.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use evscrap_core::{RequestContext, TenantId, UserSub};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::AppError;

/// Header naming the tenant in development mode.
pub const TEST_TENANT_HEADER: &str = "x-test-tenant-id";

/// Header naming the subject in development mode.
pub const TEST_SUB_HEADER: &str = "x-test-user-sub";

const DEV_USER_SUB: &str = "test-user-sub";
const DEV_ADMIN_SUB: &str = "dev-admin";

// ── Role ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A tenant user, confined to their tenant's resources.
    User,
    /// An operator with access to every tenant.
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller, injected by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub role: Role,
    /// Always `Some` for [`Role::User`].
    pub tenant_id: Option<TenantId>,
    pub sub: UserSub,
}

impl CallerIdentity {
    pub fn user(tenant_id: TenantId, sub: UserSub) -> Self {
        Self {
            role: Role::User,
            tenant_id: Some(tenant_id),
            sub,
        }
    }

    pub fn admin(sub: UserSub) -> Self {
        Self {
            role: Role::Admin,
            tenant_id: None,
            sub,
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// A tenant user. Rejects operators with 403.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPrincipal {
    pub tenant_id: TenantId,
    pub sub: UserSub,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = CallerIdentity::from_request_parts(parts, state).await?;
        match (caller.role, caller.tenant_id) {
            (Role::User, Some(tenant_id)) => Ok(Self {
                tenant_id,
                sub: caller.sub,
            }),
            _ => Err(AppError::Forbidden("tenant user role required".into())),
        }
    }
}

/// An operator. Rejects tenant users with 403.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPrincipal {
    pub sub: UserSub,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AdminPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = CallerIdentity::from_request_parts(parts, state).await?;
        match caller.role {
            Role::Admin => Ok(Self { sub: caller.sub }),
            Role::User => Err(AppError::Forbidden("admin role required".into())),
        }
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer secrets.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse a bearer token of the form `{role}:{tenant_id}:{sub}:{secret}`.
pub fn parse_bearer_token(provided: &str, expected_secret: &str) -> Result<CallerIdentity, String> {
    let parts: Vec<&str> = provided.splitn(4, ':').collect();
    let [role, tenant, sub, secret] = parts.as_slice() else {
        return Err("invalid token format, expected {role}:{tenant_id}:{sub}:{secret}".into());
    };

    if !constant_time_token_eq(secret, expected_secret) {
        return Err("invalid bearer token".into());
    }

    let sub = UserSub::new(*sub).map_err(|e| format!("invalid sub: {e}"))?;
    match *role {
        "user" => {
            let tenant = TenantId::new(*tenant).map_err(|e| format!("invalid tenant_id: {e}"))?;
            Ok(CallerIdentity::user(tenant, sub))
        }
        "admin" if tenant.is_empty() => Ok(CallerIdentity::admin(sub)),
        "admin" => Err("admin tokens must not carry a tenant_id".into()),
        other => Err(format!("unknown role: {other}")),
    }
}

/// Resolve the development-mode identity from test headers.
fn dev_identity(headers: &HeaderMap) -> Result<CallerIdentity, String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    match header(TEST_TENANT_HEADER) {
        Some(tenant) => {
            let tenant = TenantId::new(tenant).map_err(|e| e.to_string())?;
            let sub = UserSub::new(header(TEST_SUB_HEADER).unwrap_or(DEV_USER_SUB))
                .map_err(|e| e.to_string())?;
            Ok(CallerIdentity::user(tenant, sub))
        }
        None => {
            let sub = UserSub::new(header(TEST_SUB_HEADER).unwrap_or(DEV_ADMIN_SUB))
                .map_err(|e| e.to_string())?;
            Ok(CallerIdentity::admin(sub))
        }
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Resolve the caller and inject the [`CallerIdentity`] into extensions.
///
/// Also records the caller's subject as the actor on the
/// [`RequestContext`], if one is present.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected_token = request
        .extensions()
        .get::<AuthConfig>()
        .and_then(|c| c.token.clone());

    let identity = match expected_token {
        Some(expected) => {
            let auth_header = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match auth_header {
                Some(header_value) if header_value.starts_with("Bearer ") => {
                    match parse_bearer_token(&header_value[7..], &expected) {
                        Ok(identity) => identity,
                        Err(msg) => {
                            tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                            return unauthorized_response(&msg);
                        }
                    }
                }
                Some(_) => {
                    tracing::warn!("authentication failed: non-Bearer authorization scheme");
                    return unauthorized_response("authorization header must use Bearer scheme");
                }
                None => {
                    tracing::warn!("authentication failed: missing authorization header");
                    return unauthorized_response("missing authorization header");
                }
            }
        }
        None => match dev_identity(request.headers()) {
            Ok(identity) => identity,
            Err(msg) => {
                tracing::warn!(reason = %msg, "authentication failed: invalid test headers");
                return unauthorized_response(&msg);
            }
        },
    };

    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        ctx.actor = Some(identity.sub.as_str().to_string());
    }
    request.extensions_mut().insert(identity);
    next.run(request).await
}

fn unauthorized_response(message: &str) -> Response {
    AppError::Unauthorized(message.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Minimal router with the auth middleware and handlers per principal.
    fn test_app(token: Option<String>) -> Router {
        let auth_config = AuthConfig { token };
        Router::new()
            .route(
                "/user",
                get(|p: UserPrincipal| async move {
                    format!("{}/{}", p.tenant_id.as_str(), p.sub.as_str())
                }),
            )
            .route(
                "/admin",
                get(|p: AdminPrincipal| async move { p.sub.as_str().to_string() }),
            )
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(auth_config))
    }

    async fn send(app: Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    // ── Bearer tokens ────────────────────────────────────────────

    #[tokio::test]
    async fn user_token_accepted() {
        let app = test_app(Some("s3cret".into()));
        let (status, body) = send(
            app,
            "/user",
            &[("Authorization", "Bearer user:tenant-a:u-1:s3cret")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "tenant-a/u-1");
    }

    #[tokio::test]
    async fn admin_token_accepted() {
        let app = test_app(Some("s3cret".into()));
        let (status, body) =
            send(app, "/admin", &[("Authorization", "Bearer admin::ops:s3cret")]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ops");
    }

    #[tokio::test]
    async fn missing_authorization_header_rejected() {
        let app = test_app(Some("s3cret".into()));
        let (status, body) = send(app, "/user", &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let err: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error_code"], "UNAUTHORIZED");
        assert!(err["message"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let app = test_app(Some("s3cret".into()));
        let (status, _) = send(
            app,
            "/user",
            &[("Authorization", "Bearer user:tenant-a:u-1:nope")],
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_scheme_rejected() {
        let app = test_app(Some("s3cret".into()));
        let (status, body) =
            send(app, "/user", &[("Authorization", "Basic dXNlcjpwYXNz")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Bearer scheme"));
    }

    #[tokio::test]
    async fn admin_on_user_route_is_forbidden() {
        let app = test_app(Some("s3cret".into()));
        let (status, body) =
            send(app, "/user", &[("Authorization", "Bearer admin::ops:s3cret")]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("FORBIDDEN"));
    }

    #[tokio::test]
    async fn user_on_admin_route_is_forbidden() {
        let app = test_app(Some("s3cret".into()));
        let (status, _) = send(
            app,
            "/admin",
            &[("Authorization", "Bearer user:tenant-a:u-1:s3cret")],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    // ── Development mode ─────────────────────────────────────────

    #[tokio::test]
    async fn dev_mode_tenant_header_makes_user() {
        let app = test_app(None);
        let (status, body) = send(app, "/user", &[(TEST_TENANT_HEADER, "tenant-a")]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "tenant-a/test-user-sub");
    }

    #[tokio::test]
    async fn dev_mode_sub_header_overrides_default() {
        let app = test_app(None);
        let (status, body) = send(
            app,
            "/user",
            &[(TEST_TENANT_HEADER, "tenant-a"), (TEST_SUB_HEADER, "alice")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "tenant-a/alice");
    }

    #[tokio::test]
    async fn dev_mode_without_tenant_is_admin() {
        let app = test_app(None);
        let (status, body) = send(app, "/admin", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "dev-admin");
    }

    // ── parse_bearer_token ───────────────────────────────────────

    #[test]
    fn parse_user_token() {
        let identity = parse_bearer_token("user:tenant-a:u-1:s3cret", "s3cret").unwrap();
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.tenant_id.unwrap().as_str(), "tenant-a");
        assert_eq!(identity.sub.as_str(), "u-1");
    }

    #[test]
    fn secret_may_contain_colons() {
        let identity = parse_bearer_token("admin::ops:a:b", "a:b").unwrap();
        assert_eq!(identity.role, Role::Admin);
    }

    #[test]
    fn user_token_requires_tenant() {
        let err = parse_bearer_token("user::u-1:s3cret", "s3cret").unwrap_err();
        assert!(err.contains("tenant_id"));
    }

    #[test]
    fn admin_token_rejects_tenant() {
        assert!(parse_bearer_token("admin:tenant-a:ops:s3cret", "s3cret").is_err());
    }

    #[test]
    fn unknown_role_rejected() {
        let err = parse_bearer_token("root::ops:s3cret", "s3cret").unwrap_err();
        assert!(err.contains("unknown role"));
    }

    #[test]
    fn short_token_rejected() {
        assert!(parse_bearer_token("s3cret", "s3cret").is_err());
        assert!(parse_bearer_token("user:tenant-a:s3cret", "s3cret").is_err());
    }

    #[test]
    fn auth_config_debug_redacts_token() {
        let config = AuthConfig {
            token: Some("s3cret".into()),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("REDACTED"));
    }
}
