/*!
 * # Authentication and Authorization Module
 *
 * Requests carry `Authorization: Bearer <token>`. The token is looked up in
 * the `sessions` table joined with its user; an unexpired session of an
 * active user yields an [`AuthUser`] that handlers and services use for
 * ownership and role checks.
 *
 * - Missing or malformed header: 401
 * - Unknown or expired token, inactive user: 403
 * - Customer calling a staff-only route: 403
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::entities::session::{self, Entity as SessionEntity};
use crate::entities::user::{self, Role};
use crate::errors::ServiceError;

const TOKEN_LENGTH: usize = 48;

/// Caller identity resolved from a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i32,
    pub role: Role,
}

impl AuthUser {
    /// Admins and employees
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Staff may act on anything; customers only on what they own.
    pub fn can_access_owned(&self, owner_id: i32) -> bool {
        self.is_staff() || self.user_id == owner_id
    }
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid session token")]
    InvalidToken,

    #[error("Session has expired")]
    TokenExpired,

    #[error("User account is inactive")]
    InactiveUser,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Session lookup failed: {0}")]
    Storage(ServiceError),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::MissingToken => ServiceError::Unauthorized(message),
            AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::InactiveUser
            | AuthError::InsufficientPermissions => ServiceError::Forbidden(message),
            AuthError::Storage(inner) => inner,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Resolves bearer tokens against stored sessions
#[derive(Clone)]
pub struct SessionAuthenticator {
    db: Arc<DatabaseConnection>,
}

impl SessionAuthenticator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let (session, owner) = SessionEntity::find_by_id(token.to_string())
            .find_also_related(user::Entity)
            .one(&*self.db)
            .await
            .map_err(|e| AuthError::Storage(ServiceError::db_error(e)))?
            .ok_or(AuthError::InvalidToken)?;

        if session.expires_at <= Utc::now() {
            return Err(AuthError::TokenExpired);
        }
        let owner = owner.ok_or(AuthError::InvalidToken)?;
        if !owner.is_active {
            return Err(AuthError::InactiveUser);
        }

        Ok(AuthUser {
            user_id: owner.id,
            role: owner.role,
        })
    }

    /// Opens a session for `user_id` valid for `ttl` and returns its token.
    pub async fn issue(&self, user_id: i32, ttl: Duration) -> Result<String, ServiceError> {
        let token: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let now = Utc::now();

        session::ActiveModel {
            token: Set(token.clone()),
            user_id: Set(user_id),
            expires_at: Set(now + ttl),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        Ok(token)
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    Ok(token)
}

/// Authentication middleware: resolves the session and stores the
/// [`AuthUser`] in the request extensions.
pub async fn auth_middleware(
    State(auth): State<Arc<SessionAuthenticator>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(request.headers())?;
    let user = auth.authenticate(token).await?;
    debug!(user_id = user.user_id, role = %user.role, "request authenticated");

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Rejects authenticated callers that are not staff
pub async fn staff_middleware(request: Request, next: Next) -> Result<Response, AuthError> {
    match request.extensions().get::<AuthUser>() {
        Some(user) if user.is_staff() => Ok(next.run(request).await),
        Some(_) => Err(AuthError::InsufficientPermissions),
        None => Err(AuthError::MissingToken),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or(AuthError::MissingToken)
    }
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self, auth: Arc<SessionAuthenticator>) -> Self;
    fn with_staff(self, auth: Arc<SessionAuthenticator>) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self, auth: Arc<SessionAuthenticator>) -> Self {
        self.layer(axum::middleware::from_fn_with_state(auth, auth_middleware))
    }

    fn with_staff(self, auth: Arc<SessionAuthenticator>) -> Self {
        self.layer(axum::middleware::from_fn(staff_middleware))
            .with_auth(auth)
    }
}
