use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::HeaderMap;
use http::header;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// JWT payload shared between the Data Pilot service and the dashboard's
/// `jwt` auth mode. `sub` carries the user's email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Expiry in epoch milliseconds. The token itself carries epoch seconds;
    /// clients receive milliseconds.
    pub expires_at_ms: i64,
}

pub fn epoch_secs_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
        .min(i64::MAX as u64) as i64
}

/// Sign an HS256 access token for `email` expiring `ttl_secs` from now.
pub fn issue_token(secret: &str, email: &str, ttl_secs: u64) -> Result<IssuedToken, AuthError> {
    let iat = epoch_secs_now();
    let exp = iat.saturating_add(ttl_secs.min(i64::MAX as u64) as i64);

    let claims = Claims {
        sub: email.to_string(),
        exp,
        iat,
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError {
        code: "ERR_TOKEN_ISSUE",
        message: "failed to sign access token".to_string(),
    })?;

    Ok(IssuedToken {
        token,
        expires_at_ms: exp.saturating_mul(1000),
    })
}

/// Verify signature and expiry, returning the claims. Expired tokens are
/// distinguished from malformed ones so the HTTP layer can tell the client.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError {
            code: "ERR_TOKEN_EXPIRED",
            message: "Token has expired".to_string(),
        },
        _ => AuthError {
            code: "ERR_TOKEN_INVALID",
            message: "Could not validate credentials".to_string(),
        },
    })
}

/// Pull the bearer token out of the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing Authorization header".to_string(),
        })?;

    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Authorization must be a Bearer token".to_string(),
        })?;

    if token.trim().is_empty() {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Bearer token is empty".to_string(),
        });
    }

    Ok(token.trim().to_string())
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|_| AuthError {
        code: "ERR_HASH_FAILED",
        message: "failed to hash password".to_string(),
    })
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    bcrypt::verify(password, hashed).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_round_trips_subject() {
        let issued = issue_token(SECRET, "a@example.com", 60).unwrap();
        let claims = decode_token(SECRET, &issued.token).unwrap();

        assert_eq!(claims.sub, "a@example.com");
        assert_eq!(claims.exp.saturating_mul(1000), issued.expires_at_ms);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn decode_rejects_wrong_secret() {
        let issued = issue_token(SECRET, "a@example.com", 60).unwrap();
        let err = decode_token("other-secret", &issued.token).unwrap_err();
        assert_eq!(err.code, "ERR_TOKEN_INVALID");
    }

    #[test]
    fn decode_rejects_expired_token() {
        let now = epoch_secs_now();
        let claims = Claims {
            sub: "a@example.com".to_string(),
            exp: now - 120,
            iat: now - 180,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = decode_token(SECRET, &token).unwrap_err();
        assert_eq!(err.code, "ERR_TOKEN_EXPIRED");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_token(SECRET, "not-a-jwt").unwrap_err();
        assert_eq!(err.code, "ERR_TOKEN_INVALID");
    }

    #[test]
    fn bearer_token_rejects_missing_header() {
        let headers = HeaderMap::new();
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_REQUIRED");
    }

    #[test]
    fn bearer_token_rejects_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }

    #[test]
    fn bearer_token_accepts_either_case_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "bearer tok123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "tok123");
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hashed = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hashed));
        assert!(!verify_password("hunter3", &hashed));
        assert!(!verify_password("hunter2", "not-a-bcrypt-hash"));
    }
}
