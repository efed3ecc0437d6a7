use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    claims::{Claims, Role},
    session::{SessionError, SessionManager},
};
use crate::{config::CookieConfig, error::AppError};

pub const TOKEN_HEADER: &str = "token";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Raw value of the `token` header, placed in extensions by the gate.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Raw refresh token taken from the cookie by the refresh gate.
#[derive(Debug, Clone)]
pub struct RefreshCookie(pub String);

/// Pre-auth filter: a non-empty `token` header must be present. Whether the
/// token is any good is decided later by [`AuthClaims`] or the refresh handler.
pub async fn require_token_header(mut request: Request, next: Next) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::MissingHeader("No Authorization header provided!".into()))?
        .to_string();
    request.extensions_mut().insert(BearerToken(token));
    Ok(next.run(request).await)
}

pub async fn require_refresh_cookie(
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let refresh = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::MissingHeader("No refresh token cookie provided!".into()))?;
    request.extensions_mut().insert(RefreshCookie(refresh));
    Ok(next.run(request).await)
}

pub fn refresh_cookie(token: String, cfg: &CookieConfig, max_age: time::Duration) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .http_only(true)
        .secure(cfg.secure)
        .same_site(SameSite::Strict)
        .path(cfg.path.clone())
        .max_age(max_age)
        .build()
}

/// Claims of a valid, unexpired access token.
#[derive(Debug, Clone)]
pub struct AuthClaims(pub Claims);

impl AuthClaims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.0.sub).map_err(|_| SessionError::UnknownUser.into())
    }

    pub fn is_admin(&self) -> bool {
        self.0.role == Some(Role::Admin)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
    SessionManager: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = match parts.extensions.get::<BearerToken>() {
            Some(BearerToken(t)) => t.clone(),
            None => parts
                .headers
                .get(TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::MissingHeader("No Authorization header provided!".into()))?
                .to_string(),
        };
        let manager = SessionManager::from_ref(state);
        let claims = manager.authorize(&token, OffsetDateTime::now_utc())?;
        Ok(AuthClaims(claims))
    }
}
