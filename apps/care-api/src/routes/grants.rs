//! Compartilhamento pelo lado do paciente: vínculos, resgate de código e revogação

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use care_db::access::{self, GrantOutcome, GrantRequest, RedemptionOutcome, RedemptionPreview};
use care_db::models::{AccessGrant, ConsentFlags};
use care_db::records::shared::{self, PatientConnection};
use serde::Deserialize;

use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::{AppState, DbConn};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/patient/grants", get(list_grants).post(create_grant))
        .route("/api/patient/grants/preview", post(preview_code))
        .route("/api/patient/grants/redeem", post(redeem_code))
        .route("/api/patient/grants/:clinician_id/revoke", post(revoke_grant))
}

#[derive(Debug, Deserialize)]
struct GrantPayload {
    clinician_id: i64,
    #[serde(flatten)]
    request: GrantRequest,
}

#[derive(Debug, Deserialize)]
struct CodePayload {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RedeemPayload {
    code: String,
    #[serde(default)]
    consent: ConsentFlags,
}

async fn list_grants(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<PatientConnection>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(shared::patient_connections(&mut conn, patient_id).await?))
}

async fn create_grant(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(payload): Json<GrantPayload>,
) -> ApiResult<(StatusCode, Json<GrantOutcome>)> {
    let patient_id = ctx.require_patient()?;
    let mut request = payload.request;
    request.granted_by = Some(ctx.account_id);

    let outcome = access::grant_or_update(&mut conn, patient_id, payload.clinician_id, &request, ctx.now).await?;
    let status = match outcome {
        GrantOutcome::Created(_) => StatusCode::CREATED,
        GrantOutcome::Updated(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn preview_code(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(payload): Json<CodePayload>,
) -> ApiResult<Json<RedemptionPreview>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(
        access::preview_redemption(&mut conn, patient_id, &payload.code, ctx.now).await?,
    ))
}

async fn redeem_code(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(payload): Json<RedeemPayload>,
) -> ApiResult<Json<RedemptionOutcome>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(
        access::redeem_code(&mut conn, patient_id, &payload.code, payload.consent, ctx.now).await?,
    ))
}

async fn revoke_grant(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(clinician_id): Path<i64>,
) -> ApiResult<Json<AccessGrant>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(access::revoke(&mut conn, patient_id, clinician_id, ctx.now).await?))
}
