//! Session lifecycle: login, expiry observation and the refresh exchange.
//!
//! Tokens are stateless, so every transition is computed from verified
//! inputs. The only state written is the last-issued refresh token on the
//! user record, which the refresh exchange compares against.

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    claims::{Claims, Identity, TokenKind},
    jwt::{TokenCodec, TokenError},
    password,
};
use crate::{state::AppState, store::Store};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("Email or password is empty")]
    MissingCredentials,
    #[error("User with this email not exist!")]
    UnknownEmail,
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Token expired!")]
    SessionExpired,
    #[error("Expected a {expected:?} token")]
    WrongTokenKind { expected: TokenKind },
    #[error("Token not expired yet!")]
    RefreshNotYetDue,
    #[error("Refresh exceeds the {0} second window, please log in again")]
    RefreshWindowExceeded(i64),
    #[error("Refresh token is no longer current")]
    RefreshRevoked,
    #[error("User not found")]
    UnknownUser,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SessionError {
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::Token(TokenError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::Token(TokenError::Malformed(_)) => StatusCode::BAD_REQUEST,
            SessionError::Token(_) => StatusCode::UNAUTHORIZED,
            SessionError::MissingCredentials
            | SessionError::InvalidPassword
            | SessionError::RefreshNotYetDue
            | SessionError::RefreshWindowExceeded(_) => StatusCode::BAD_REQUEST,
            SessionError::UnknownEmail => StatusCode::NOT_FOUND,
            SessionError::SessionExpired
            | SessionError::WrongTokenKind { .. }
            | SessionError::RefreshRevoked
            | SessionError::UnknownUser => StatusCode::UNAUTHORIZED,
            SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Where a session stands, as observed from its access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Active,
    Expired,
    Refreshing,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Clone)]
pub struct SessionManager {
    codec: TokenCodec,
    store: Arc<dyn Store>,
    refresh_window: Duration,
}

impl FromRef<AppState> for SessionManager {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.codec.clone(),
            state.store.clone(),
            Duration::seconds(state.config.jwt.refresh_window_secs),
        )
    }
}

impl SessionManager {
    pub fn new(codec: TokenCodec, store: Arc<dyn Store>, refresh_window: Duration) -> Self {
        Self {
            codec,
            store,
            refresh_window,
        }
    }

    /// UNAUTHENTICATED -> ACTIVE. Issues an access/refresh pair and records
    /// the refresh token as the user's current one.
    #[instrument(skip(self, plain_password))]
    pub async fn login(
        &self,
        email: &str,
        plain_password: &str,
        now: OffsetDateTime,
    ) -> Result<TokenPair, SessionError> {
        if email.is_empty() || plain_password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }
        if self.store.count_users_by_email(email).await? == 0 {
            warn!(email, "login unknown email");
            return Err(SessionError::UnknownEmail);
        }
        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or(SessionError::UnknownEmail)?;

        if !password::verify(plain_password.to_string(), user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(SessionError::InvalidPassword);
        }

        let identity = Identity {
            uid: user.id.to_string(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: Some(user.role),
        };
        let access = self.codec.issue(&identity, TokenKind::Access, now)?;
        let refresh = self.codec.issue(&identity, TokenKind::Refresh, now)?;
        self.store.set_refresh_token(user.id, &refresh).await?;

        info!(user_id = %user.id, from = ?SessionState::Unauthenticated, to = ?SessionState::Active, "user logged in");
        Ok(TokenPair { access, refresh })
    }

    pub fn observe(&self, claims: &Claims, now: OffsetDateTime) -> SessionState {
        if claims.is_expired_at(now.unix_timestamp()) {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    /// Gate for protected operations: the token must be an authentic,
    /// unexpired access token.
    pub fn authorize(&self, token: &str, now: OffsetDateTime) -> Result<Claims, SessionError> {
        let claims = self.codec.parse(token)?;
        if claims.kind != TokenKind::Access {
            return Err(SessionError::WrongTokenKind {
                expected: TokenKind::Access,
            });
        }
        match self.observe(&claims, now) {
            SessionState::Active => Ok(claims),
            _ => Err(SessionError::SessionExpired),
        }
    }

    /// Verification half of the refresh exchange. Returns the identity to
    /// re-issue for; touches no state.
    pub fn verify_exchange(
        &self,
        access: &str,
        refresh: &str,
        now: OffsetDateTime,
    ) -> Result<Identity, SessionError> {
        let now = now.unix_timestamp();

        let refresh_claims = self.codec.parse(refresh)?;
        if refresh_claims.kind != TokenKind::Refresh {
            return Err(SessionError::WrongTokenKind {
                expected: TokenKind::Refresh,
            });
        }
        if refresh_claims.exp > now {
            return Err(SessionError::RefreshNotYetDue);
        }
        let window = self.refresh_window.whole_seconds();
        if now - refresh_claims.exp > window {
            return Err(SessionError::RefreshWindowExceeded(window));
        }

        let access_claims = self.codec.parse(access)?;
        if access_claims.kind != TokenKind::Access {
            return Err(SessionError::WrongTokenKind {
                expected: TokenKind::Access,
            });
        }
        Ok(access_claims.identity())
    }

    /// EXPIRED -> REFRESHING -> ACTIVE. Mints a single new access token; no
    /// new refresh token is issued.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        access: &str,
        refresh: &str,
        now: OffsetDateTime,
    ) -> Result<String, SessionError> {
        let identity = self.verify_exchange(access, refresh, now)?;

        let user_id = Uuid::parse_str(&identity.uid).map_err(|_| SessionError::UnknownUser)?;
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(SessionError::UnknownUser)?;
        if user.refresh_token.as_deref() != Some(refresh) {
            warn!(%user_id, "superseded refresh token presented");
            return Err(SessionError::RefreshRevoked);
        }

        let token = self.codec.issue(&identity, TokenKind::Access, now)?;
        info!(%user_id, from = ?SessionState::Refreshing, to = ?SessionState::Active, "session refreshed");
        Ok(token)
    }
}
