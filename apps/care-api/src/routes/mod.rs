//! Rotas HTTP e a pilha de middleware

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use care_db::clinicians::{self, RegistrationCheck};
use care_db::models::{ClinicianTitle, RegistrationBody};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::built_info;
use crate::error::ApiResult;
use crate::state::AppState;

mod clinician;
mod grants;
mod invitations;
mod patient;
mod session;

#[cfg(test)]
mod testing;

pub fn router(state: AppState) -> Router {
    let server = &state.config.server;
    let max_concurrency = server.max_concurrency;
    let cors = cors_layer(&server.cors_origins);
    let body_limit = state.config.uploads.max_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/api/registration/check", post(check_registration))
        .merge(session::routes())
        .merge(grants::routes())
        .merge(invitations::routes())
        .merge(patient::routes())
        .merge(clinician::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // registros de saúde não devem ficar em cache
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(max_concurrency))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Origem de CORS inválida ignorada");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, HeaderName::from_static("x-requested-with")])
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    database: bool,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let database = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Health {
            status: if database { "ok" } else { "degraded" },
            version: built_info::PKG_VERSION,
            database,
        }),
    )
}

#[derive(Debug, Deserialize)]
struct RegistrationQuery {
    registration_body: Option<RegistrationBody>,
    #[serde(default)]
    registration_number: String,
    title: Option<ClinicianTitle>,
}

#[derive(Serialize)]
struct RegistrationResponse {
    #[serde(flatten)]
    check: RegistrationCheck,
    registration_body_name: Option<&'static str>,
}

async fn check_registration(Json(query): Json<RegistrationQuery>) -> ApiResult<Json<RegistrationResponse>> {
    let check = clinicians::check_registration(query.registration_body, &query.registration_number, query.title);
    Ok(Json(RegistrationResponse {
        check,
        registration_body_name: query.registration_body.map(clinicians::registration_body_name),
    }))
}

#[cfg(test)]
mod tests {
    use super::testing::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_health_reports_database() {
        let app = TestApp::new().await;
        let (status, body) = app.request(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], true);
    }

    #[tokio::test]
    async fn test_security_headers_are_set() {
        let app = TestApp::new().await;
        let response = app.raw(Method::GET, "/health", None, None).await;
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["cache-control"], "no-store");
    }

    #[tokio::test]
    async fn test_registration_check_is_public() {
        let app = TestApp::new().await;
        let (status, body) = app
            .request(
                Method::POST,
                "/api/registration/check",
                None,
                Some(json!({
                    "registration_body": "HCPC",
                    "registration_number": "ph12345",
                    "title": "physiotherapist"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["format_valid"], true);
        assert_eq!(body["registration_body_name"], "Health and Care Professions Council");

        let (_, body) = app
            .request(
                Method::POST,
                "/api/registration/check",
                None,
                Some(json!({"registration_body": "GMC", "registration_number": "12AB"})),
            )
            .await;
        assert_eq!(body["format_valid"], false);
    }
}
