//! Handshake credential verification

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: usize,
}

/// The authenticated user behind a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Option<String>,
}

#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and extract the principal it was issued to
    pub fn verify(&self, token: &str) -> Result<Principal> {
        let claims = decode::<RelayClaims>(token, &self.decoding, &self.validation)
            .map(|decoded| decoded.claims)
            .map_err(|err| RelayError::InvalidToken(err.to_string()))?;

        let user_id = claims
            .id
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::InvalidToken("token carries no user id".to_string()))?;

        Ok(Principal {
            user_id,
            role: claims.role,
        })
    }

    /// Sign a token with the shared secret.
    ///
    /// End users get their tokens from the account service; this is for
    /// tooling and tests that speak to the relay directly.
    pub fn issue(&self, user_id: &str, role: Option<&str>, ttl: Duration) -> Result<String> {
        let claims = RelayClaims {
            id: Some(user_id.to_string()),
            sub: None,
            role: role.map(str::to_string),
            exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| RelayError::TokenIssue(err.to_string()))
    }
}

/// Token from an `Authorization: Bearer ...` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
