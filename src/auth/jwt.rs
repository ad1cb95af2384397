//! JWT session tokens
//!
//! Tokens are signed with HS256 and carry everything needed to build the
//! request `Actor`: user id, role, office and department. The role is kept
//! as a raw string in the claims so an unknown role still decodes and can
//! be flagged by the policy engine.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::{Actor, Department, OfficeId, Role, UserId};
use crate::types::{CaseguardError, Result};

/// Supplies the authenticated actor for a request
pub trait SessionProvider: Send + Sync {
    fn actor_from_token(&self, token: &str) -> Result<Actor>;
}

/// Payload stored in JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id
    pub sub: UserId,
    pub role: String,
    pub office_id: OfficeId,
    #[serde(default)]
    pub department: Department,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl Claims {
    pub fn actor(&self) -> Actor {
        // Role parsing is infallible: unknown strings become Role::Unrecognized
        let role = self.role.parse::<Role>().unwrap_or(Role::Unrecognized);
        Actor::new(self.sub, role, self.office_id, self.department)
    }
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a new JWT validator
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self> {
        if secret.is_empty() {
            return Err(CaseguardError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < 32 {
            return Err(CaseguardError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Create a validator for dev mode (allows empty secret)
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: 3600,
        }
    }

    /// Issue a token for an actor
    pub fn generate_token(&self, actor: &Actor) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CaseguardError::Auth(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: actor.id,
            role: actor.role.as_str().to_string(),
            office_id: actor.office_id,
            department: actor.department,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Verify and decode a JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let msg = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidToken => "Invalid token",
                ErrorKind::InvalidSignature => "Invalid signature",
                _ => "Token validation failed",
            };
            CaseguardError::Auth(msg.into())
        })
    }
}

impl SessionProvider for JwtValidator {
    fn actor_from_token(&self, token: &str) -> Result<Actor> {
        self.verify_token(token).map(|claims| claims.actor())
    }
}

/// Extract a bearer token from an Authorization header value
pub fn extract_token_from_header(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract `token=` from a raw query string
pub fn extract_token_from_query(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_secret_rejected() {
        assert!(JwtValidator::new("short".into(), 3600).is_err());
        assert!(JwtValidator::new(String::new(), 3600).is_err());
    }

    #[test]
    fn test_token_round_trip_yields_actor() {
        let validator = JwtValidator::new_dev();
        let actor = Actor::new(11, Role::Lawyer, 1, Department::Legal);
        let token = validator.generate_token(&actor).unwrap();
        assert_eq!(validator.actor_from_token(&token).unwrap(), actor);
    }

    #[test]
    fn test_unknown_role_claim_becomes_unrecognized() {
        let claims = Claims {
            sub: 5,
            role: "superuser".into(),
            office_id: 1,
            department: Department::None,
            iat: 0,
            exp: 0,
        };
        assert_eq!(claims.actor().role, Role::Unrecognized);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let validator = JwtValidator::new_dev();
        let actor = Actor::new(11, Role::Lawyer, 1, Department::Legal);
        let token = validator.generate_token(&actor).unwrap();
        let other = JwtValidator::new("another-secret-that-is-long-enough-0000".into(), 60).unwrap();
        assert!(other.actor_from_token(&token).is_err());
    }

    #[test]
    fn test_token_extraction() {
        assert_eq!(extract_token_from_header(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_token_from_header(Some("Basic abc")), None);
        assert_eq!(extract_token_from_query(Some("x=1&token=t0k")), Some("t0k"));
        assert_eq!(extract_token_from_query(Some("x=1")), None);
        assert_eq!(extract_token_from_query(None), None);
    }
}
