//! Login e cadastro de pacientes

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use care_db::accounts;
use care_db::models::UserRole;
use care_db::CareError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::auth::issue_token;
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, DbConn};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(min = 1, max = 150, message = "Informe um nome de usuário"))]
    username: String,
    #[validate(email(message = "Informe um e-mail válido"))]
    email: String,
    password1: String,
    password2: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub account_id: i64,
    pub username: String,
    pub role: UserRole,
}

async fn login(
    State(state): State<AppState>,
    DbConn(mut conn): DbConn,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<SessionResponse>> {
    state
        .login_limiter
        .check(&request.username.trim().to_lowercase())?;

    let account = accounts::authenticate(&mut conn, &request.username, &request.password)
        .await
        .map_err(|err| match err {
            CareError::PermissionDenied(reason) => ApiError::unauthorized(reason),
            other => other.into(),
        })?;
    let role = accounts::resolve_role(&mut conn, account.id).await?;
    let token = issue_token(&state.config.auth, &account, Utc::now())?;

    info!(account_id = account.id, "Login realizado");
    Ok(Json(SessionResponse {
        token,
        account_id: account.id,
        username: account.username,
        role,
    }))
}

async fn register(
    State(state): State<AppState>,
    DbConn(mut conn): DbConn,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    request.validate()?;
    accounts::validate_new_password(&request.password1, &request.password2)?;

    let now = Utc::now();
    let account = accounts::create_account(
        &mut conn,
        &request.username,
        request.email.trim(),
        &request.password1,
        now,
    )
    .await?;
    let token = issue_token(&state.config.auth, &account, now)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            account_id: account.id,
            username: account.username,
            role: UserRole::Patient {
                patient_id: account.id,
            },
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{TestApp, PASSWORD};
    use axum::http::{Method, StatusCode};
    use care_db::models::ClinicianTitle;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_resolves_role() {
        let app = TestApp::new().await;
        app.patient("maria").await;
        let (clinician, _) = app.clinician("drjohn", ClinicianTitle::Dr).await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"username": "maria", "password": PASSWORD})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"]["role"], "patient");

        let (_, body) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"username": "drjohn", "password": PASSWORD})),
            )
            .await;
        assert_eq!(body["role"]["role"], "clinician");
        assert_eq!(body["role"]["clinician_id"], clinician.id);

        let token = body["token"].as_str().unwrap().to_string();
        let (status, _) = app
            .request(Method::GET, "/api/clinician/dashboard", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized_and_rate_limited() {
        let app = TestApp::new().await;
        app.patient("maria").await;

        let attempt = || {
            app.request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"username": "maria", "password": "wrong-password"})),
            )
        };
        for _ in 0..5 {
            let (status, body) = attempt().await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(body["error"].is_string());
        }
        let (status, _) = attempt().await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_register_patient() {
        let app = TestApp::new().await;
        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": "novo",
                    "email": "novo@example.com",
                    "password1": "s3nha-forte",
                    "password2": "s3nha-forte"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"]["role"], "patient");

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": "outro",
                    "email": "outro@example.com",
                    "password1": "s3nha-forte",
                    "password2": "diferente1"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let app = TestApp::new().await;
        let (status, _) = app.request(Method::GET, "/api/patient/medications", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .request(Method::GET, "/api/patient/medications", Some("not-a-jwt"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
