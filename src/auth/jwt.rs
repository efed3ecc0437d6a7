use std::sync::Arc;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::{Claims, Identity, TokenKind};
use crate::config::JwtConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("error occurred while signing token: {0}")]
    Signing(String),
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid token issuer or audience")]
    InvalidIssuer,
    #[error("Malformed token: {0}")]
    Malformed(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
            ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => TokenError::InvalidIssuer,
            _ => TokenError::Malformed(e.to_string()),
        }
    }
}

/// Signs and parses session tokens with the process-wide HMAC key.
///
/// Parsing checks signature, issuer and audience only. Expiry is left to
/// the caller so an expired-but-authentic token can still be told apart
/// from a forged one.
#[derive(Clone)]
pub struct TokenCodec {
    inner: Arc<Keys>,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    key_empty: bool,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            inner: Arc::new(Keys {
                encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
                decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
                key_empty: cfg.secret.is_empty(),
                issuer: cfg.issuer.clone(),
                audience: cfg.audience.clone(),
                access_ttl: Duration::hours(cfg.access_ttl_hours),
                refresh_ttl: Duration::hours(cfg.refresh_ttl_hours),
            }),
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.inner.access_ttl,
            TokenKind::Refresh => self.inner.refresh_ttl,
        }
    }

    /// Builds fresh claims for `kind` and signs them. Refresh tokens never
    /// carry identity fields, whatever `identity` holds.
    pub fn issue(
        &self,
        identity: &Identity,
        kind: TokenKind,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        if self.inner.key_empty {
            return Err(TokenError::Signing("signing key is empty".into()));
        }
        let who = match kind {
            TokenKind::Access => identity.clone(),
            TokenKind::Refresh => Identity::default(),
        };
        let exp = now + self.ttl(kind);
        let claims = Claims {
            sub: who.uid,
            email: who.email,
            first_name: who.first_name,
            last_name: who.last_name,
            role: who.role,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.inner.issuer.clone(),
            aud: self.inner.audience.clone(),
            kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.inner.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(uid = %claims.sub, kind = ?kind, exp = claims.exp, "jwt signed");
        Ok(token)
    }

    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_audience(std::slice::from_ref(&self.inner.audience));
        validation.set_issuer(std::slice::from_ref(&self.inner.issuer));
        let data = decode::<Claims>(token, &self.inner.decoding, &validation)?;
        debug!(uid = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Role;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use time::macros::datetime;

    fn codec(secret: &str) -> TokenCodec {
        TokenCodec::new(&JwtConfig::with_secret(secret))
    }

    fn identity() -> Identity {
        Identity {
            uid: "65f0c0ffee".into(),
            email: "a@x.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role: Some(Role::Member),
        }
    }

    const NOW: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    #[test]
    fn access_token_round_trips_identity() {
        let c = codec("dev-secret");
        let token = c.issue(&identity(), TokenKind::Access, NOW).expect("sign access");
        let claims = c.parse(&token).expect("parse");
        assert_eq!(claims.identity(), identity());
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.iss, "Library");
        assert_eq!(claims.exp, (NOW + Duration::hours(24)).unix_timestamp());
    }

    #[test]
    fn refresh_token_has_no_identity() {
        let c = codec("dev-secret");
        let token = c.issue(&identity(), TokenKind::Refresh, NOW).expect("sign refresh");
        let claims = c.parse(&token).expect("parse");
        assert_eq!(claims.identity(), Identity::default());
        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_eq!(claims.exp, (NOW + Duration::hours(168)).unix_timestamp());
    }

    #[test]
    fn expired_token_still_parses() {
        let c = codec("dev-secret");
        let long_ago = datetime!(2001-01-01 00:00 UTC);
        let token = c.issue(&identity(), TokenKind::Access, long_ago).unwrap();
        let claims = c.parse(&token).expect("expiry is not judged here");
        assert!(claims.is_expired_at(NOW.unix_timestamp()));
    }

    #[test]
    fn altered_payload_fails_signature() {
        let c = codec("dev-secret");
        let token = c.issue(&identity(), TokenKind::Access, NOW).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let mut payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        payload["role"] = serde_json::json!("ADMIN");
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);
        assert_eq!(c.parse(&tampered), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn foreign_key_fails_signature() {
        let token = codec("one").issue(&identity(), TokenKind::Access, NOW).unwrap();
        assert_eq!(codec("two").parse(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn truncated_token_is_malformed() {
        let c = codec("dev-secret");
        let token = c.issue(&identity(), TokenKind::Access, NOW).unwrap();
        let header_only = token.split('.').next().unwrap();
        assert!(matches!(c.parse(header_only), Err(TokenError::Malformed(_))));
        assert!(matches!(c.parse("garbage"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let mut other = JwtConfig::with_secret("dev-secret");
        other.issuer = "elsewhere".into();
        let token = TokenCodec::new(&other)
            .issue(&identity(), TokenKind::Access, NOW)
            .unwrap();
        assert_eq!(codec("dev-secret").parse(&token), Err(TokenError::InvalidIssuer));
    }

    #[test]
    fn empty_key_cannot_sign() {
        let err = codec("").issue(&identity(), TokenKind::Access, NOW).unwrap_err();
        assert!(matches!(err, TokenError::Signing(_)));
    }
}
