/// Authentication extractors and utilities
///
/// The backend never issues credentials; it verifies bearer tokens minted by
/// the external auth provider and hands handlers a stable caller identity.
use crate::{api::middleware::extract_bearer_token, context::AppContext, error::CourierError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

/// Claims carried by provider-issued bearer tokens
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    /// Stable caller identity
    sub: String,
    iat: i64,
    exp: i64,
}

/// Verify a bearer token and return the caller identity it carries
pub fn verify_bearer_token(token: &str, secret: &str) -> Result<String, CourierError> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    let token_data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| CourierError::Jwt(format!("Token verification failed: {}", e)))?;

    if token_data.claims.sub.is_empty() {
        return Err(CourierError::Jwt("Token missing subject".to_string()));
    }

    Ok(token_data.claims.sub)
}

/// Authenticated context - extracts and verifies the caller from the request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = CourierError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        // Extract bearer token from Authorization header
        let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
            CourierError::Authentication("Missing authorization header".to_string())
        })?;

        let identity = verify_bearer_token(&token, &state.config.authentication.jwt_secret)?;

        // First contact with a verified identity creates its directory record
        state.user_directory.ensure_record(&identity).await?;

        Ok(AuthContext { identity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn make_token(sub: &str, secret: &str, expires_in: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: sub.to_string(),
            iat: now,
            exp: now + expires_in,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_valid_token() {
        let token = make_token("user-a", "secret", 3600);
        assert_eq!(verify_bearer_token(&token, "secret").unwrap(), "user-a");
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = make_token("user-a", "secret", 3600);
        assert!(verify_bearer_token(&token, "other").is_err());
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let token = make_token("user-a", "secret", -3600);
        assert!(verify_bearer_token(&token, "secret").is_err());
    }
}
