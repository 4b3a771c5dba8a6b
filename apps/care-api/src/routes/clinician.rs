//! Área do profissional: painel, perfil, registros compartilhados,
//! avaliações, medidas objetivas e processamento das notas digitalizadas

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use care_db::access;
use care_db::assessments::{self, Assessment, ClinicalEntry};
use care_db::clinicians::{self, ClinicianProfileUpdate};
use care_db::findings::{self, DocumentExtraction, ExtractedFinding};
use care_db::measures::{self, ObjectiveMeasures};
use care_db::models::{Clinician, DataCategory, Operation};
use care_db::records::shared::{self, DashboardPatient, SharedRecord};
use care_db::CareError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Auth;
use crate::collaborators::document_intelligence::AnalyzerError;
use crate::collaborators::mailer::{self, practitioner_code_email};
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, DbConn};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/clinician/dashboard", get(dashboard))
        .route(
            "/api/clinician/profile",
            get(get_profile).put(update_profile).delete(delete_profile),
        )
        .route("/api/clinician/send-code", post(send_code))
        .route("/api/clinician/patients/:patient_id/record", get(patient_record))
        .route(
            "/api/clinician/patients/:patient_id/assessments",
            post(create_assessment),
        )
        .route(
            "/api/clinician/assessments/:id/objective-measures",
            get(get_measures).put(save_measures),
        )
        .route("/api/clinician/assessments/:id/process-notes", post(process_notes))
        .route("/api/clinician/assessments/:id/extraction", get(get_extraction))
        .route("/api/clinician/assessments/:id/findings", get(list_findings))
        .route("/api/clinician/findings/:id/verify", post(verify_finding))
        .route("/api/clinician/findings/:id", delete(delete_finding))
}

/// Exige acesso à categoria de sintomas do paciente dono da avaliação
async fn assessment_with_access(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    assessment_id: i64,
    operation: Operation,
    now: DateTime<Utc>,
) -> ApiResult<Assessment> {
    let assessment = assessments::get_assessment(&mut *conn, assessment_id).await?;
    access::require_access(
        conn,
        clinician_id,
        assessment.patient_id,
        DataCategory::Symptoms,
        operation,
        now,
    )
    .await?;
    Ok(assessment)
}

async fn dashboard(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<DashboardPatient>>> {
    let clinician_id = ctx.require_clinician()?;
    Ok(Json(shared::clinician_dashboard(&mut conn, clinician_id, ctx.now).await?))
}

async fn get_profile(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Clinician>> {
    let clinician_id = ctx.require_clinician()?;
    Ok(Json(clinicians::get_clinician(&mut conn, clinician_id).await?))
}

async fn update_profile(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(update): Json<ClinicianProfileUpdate>,
) -> ApiResult<Json<Clinician>> {
    let clinician_id = ctx.require_clinician()?;
    Ok(Json(
        clinicians::update_profile(&mut conn, clinician_id, &update, ctx.now).await?,
    ))
}

async fn delete_profile(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<StatusCode> {
    let clinician_id = ctx.require_clinician()?;
    clinicians::delete_clinician(&mut conn, clinician_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
struct SendCodeRequest {
    #[validate(email(message = "Informe um e-mail válido"))]
    email: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    message: String,
}

#[derive(Serialize)]
struct SendCodeResponse {
    status: &'static str,
    to: String,
}

async fn send_code(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(request): Json<SendCodeRequest>,
) -> ApiResult<Json<SendCodeResponse>> {
    let clinician_id = ctx.require_clinician()?;
    request.validate()?;
    state
        .send_code_limiter
        .check(&format!("clinician:{}", clinician_id))?;

    let clinician = {
        let mut conn = state.pool.acquire().await?;
        clinicians::get_clinician(&mut conn, clinician_id).await?
    };
    let to = request.email.trim().to_string();
    let email = practitioner_code_email(&clinician, &to, &request.message);
    mailer::deliver(state.mailer.as_ref(), email, state.config.mailer.timeout()).await?;

    info!(clinician_id, "Código do profissional enviado por e-mail");
    Ok(Json(SendCodeResponse { status: "sent", to }))
}

async fn patient_record(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(patient_id): Path<i64>,
) -> ApiResult<Json<SharedRecord>> {
    let clinician_id = ctx.require_clinician()?;
    Ok(Json(
        shared::load_shared_record(&mut conn, clinician_id, patient_id, ctx.now).await?,
    ))
}

async fn create_assessment(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(patient_id): Path<i64>,
    Json(entry): Json<ClinicalEntry>,
) -> ApiResult<(StatusCode, Json<Assessment>)> {
    let clinician_id = ctx.require_clinician()?;
    let clinician = clinicians::get_clinician(&mut conn, clinician_id).await?;
    let assessment =
        assessments::create_clinical_assessment(&mut conn, &clinician, patient_id, &entry, ctx.now).await?;
    Ok((StatusCode::CREATED, Json(assessment)))
}

async fn get_measures(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(assessment_id): Path<i64>,
) -> ApiResult<Json<ObjectiveMeasures>> {
    let clinician_id = ctx.require_clinician()?;
    assessment_with_access(&mut conn, clinician_id, assessment_id, Operation::Read, ctx.now).await?;
    measures::get_objective_measures(&mut conn, assessment_id)
        .await?
        .map(Json)
        .ok_or_else(|| CareError::not_found("Medidas objetivas").into())
}

#[derive(Debug, Deserialize)]
struct MeasuresPayload {
    /// Campos do formulário, ex.: `knee_flexion_rom_left`
    #[serde(default)]
    measures: HashMap<String, String>,
    #[serde(default)]
    additional_notes: String,
}

async fn save_measures(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(assessment_id): Path<i64>,
    Json(payload): Json<MeasuresPayload>,
) -> ApiResult<Json<ObjectiveMeasures>> {
    let clinician_id = ctx.require_clinician()?;
    let saved = measures::save_objective_measures(
        &mut conn,
        clinician_id,
        assessment_id,
        &payload.measures,
        &payload.additional_notes,
        ctx.now,
    )
    .await?;
    Ok(Json(saved))
}

fn image_extension(headers: &HeaderMap) -> &'static str {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/tiff" => "tiff",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

#[derive(Serialize)]
struct ProcessedNotes {
    assessment: Assessment,
    extraction: DocumentExtraction,
    findings: Vec<ExtractedFinding>,
}

/// Salva a imagem das notas e, com o serviço configurado, extrai os achados.
///
/// A imagem fica gravada mesmo se a extração falhar. A conexão do pool é
/// devolvida antes da chamada ao serviço de extração.
async fn process_notes(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(assessment_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ProcessedNotes>> {
    let clinician_id = ctx.require_clinician()?;
    if body.is_empty() {
        return Err(CareError::invalid("Envie a imagem das notas no corpo da requisição").into());
    }
    let mut conn = state.pool.acquire().await?;
    assessment_with_access(&mut conn, clinician_id, assessment_id, Operation::Write, ctx.now).await?;

    let dir = PathBuf::from(&state.config.uploads.dir).join("notes");
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Falha ao criar {}", dir.display()))
        .map_err(ApiError::internal)?;
    let path = dir.join(format!(
        "{}-{}.{}",
        assessment_id,
        Uuid::new_v4(),
        image_extension(&headers)
    ));
    tokio::fs::write(&path, &body)
        .await
        .with_context(|| format!("Falha ao gravar {}", path.display()))
        .map_err(ApiError::internal)?;

    let assessment = assessments::set_notes_image_path(
        &mut conn,
        clinician_id,
        assessment_id,
        &path.to_string_lossy(),
        ctx.now,
    )
    .await?;
    drop(conn);
    info!(clinician_id, assessment_id, bytes = body.len(), "Imagem das notas salva");

    if !state.analyzer.is_configured() {
        return Err(AnalyzerError::NotConfigured.into());
    }
    let extraction = state.analyzer.analyze(&path).await?;
    let mut conn = state.pool.acquire().await?;
    let findings = findings::store_extraction(&mut conn, clinician_id, assessment_id, &extraction, ctx.now).await?;

    Ok(Json(ProcessedNotes {
        assessment,
        extraction,
        findings,
    }))
}

async fn get_extraction(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(assessment_id): Path<i64>,
) -> ApiResult<Json<DocumentExtraction>> {
    let clinician_id = ctx.require_clinician()?;
    assessment_with_access(&mut conn, clinician_id, assessment_id, Operation::Read, ctx.now).await?;
    findings::get_extraction(&mut conn, assessment_id)
        .await?
        .map(Json)
        .ok_or_else(|| CareError::not_found("Extração das notas").into())
}

async fn list_findings(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(assessment_id): Path<i64>,
) -> ApiResult<Json<Vec<ExtractedFinding>>> {
    let clinician_id = ctx.require_clinician()?;
    Ok(Json(
        findings::list_findings(&mut conn, clinician_id, assessment_id, ctx.now).await?,
    ))
}

async fn verify_finding(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(finding_id): Path<i64>,
) -> ApiResult<Json<ExtractedFinding>> {
    let clinician_id = ctx.require_clinician()?;
    Ok(Json(
        findings::verify_finding(&mut conn, clinician_id, finding_id, ctx.now).await?,
    ))
}

async fn delete_finding(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(finding_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let clinician_id = ctx.require_clinician()?;
    findings::delete_finding(&mut conn, clinician_id, finding_id, ctx.now).await?;
    Ok(StatusCode::NO_CONTENT)
}
