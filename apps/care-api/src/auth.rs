//! Tokens JWT (HS256) e o extrator do contexto da requisição
//!
//! O token carrega apenas a conta. O papel (paciente ou profissional) é
//! resolvido no banco a cada requisição, para refletir cadastros recentes.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use care_db::accounts;
use care_db::models::{Account, RequestContext};
use care_db::CareError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Id da conta
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    fn account_id(&self) -> ApiResult<i64> {
        self.sub
            .parse()
            .map_err(|_| ApiError::unauthorized("Token inválido"))
    }
}

pub fn issue_token(config: &AuthConfig, account: &Account, now: DateTime<Utc>) -> ApiResult<String> {
    let claims = Claims {
        sub: account.id.to_string(),
        username: account.username.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(config.token_ttl_minutes)).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(anyhow::anyhow!("Falha ao assinar token: {e}")))
}

pub fn verify_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!(error = %e, "Token recusado");
        ApiError::unauthorized("Token inválido ou expirado")
    })
}

fn bearer_token(parts: &Parts) -> ApiResult<&str> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Cabeçalho Authorization ausente"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("Cabeçalho Authorization inválido"))?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Use o esquema Bearer no cabeçalho Authorization"))
}

/// Contexto autenticado: conta, papel e o instante da requisição
#[derive(Debug, Clone, Copy)]
pub struct Auth(pub RequestContext);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let claims = verify_token(&state.config.auth, bearer_token(parts)?)?;
        let account_id = claims.account_id()?;

        let mut conn = state.pool.acquire().await?;
        let role = accounts::resolve_role(&mut conn, account_id)
            .await
            .map_err(|err| match err {
                CareError::NotFound(_) => ApiError::unauthorized("Conta não encontrada"),
                other => other.into(),
            })?;

        Ok(Auth(RequestContext {
            account_id,
            role,
            now: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "another-test-secret-of-32-characters".to_string(),
            token_ttl_minutes: 10,
        }
    }

    fn account() -> Account {
        Account {
            id: 42,
            username: "maria".to_string(),
            email: "maria@example.com".to_string(),
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_issued_token_verifies() {
        let token = issue_token(&config(), &account(), Utc::now()).unwrap();
        let claims = verify_token(&config(), &token).unwrap();
        assert_eq!(claims.account_id().unwrap(), 42);
        assert_eq!(claims.username, "maria");
    }

    #[test]
    fn test_expired_or_foreign_token_is_rejected() {
        let issued = Utc::now() - Duration::hours(2);
        let expired = issue_token(&config(), &account(), issued).unwrap();
        assert!(verify_token(&config(), &expired).is_err());

        let mut other = config();
        other.jwt_secret = "a-different-secret-also-32-characters".to_string();
        let foreign = issue_token(&other, &account(), Utc::now()).unwrap();
        let err = verify_token(&config(), &foreign).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
