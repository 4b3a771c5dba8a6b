//! Registros do próprio paciente
//!
//! Toda rota exige o papel de paciente e opera apenas sobre linhas do
//! próprio paciente; a linha de outro paciente responde 404.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use care_db::assessments::{self, Assessment, SymptomEntry};
use care_db::records::allergies::{self, Allergy, AllergyInput};
use care_db::records::conditions::{self, Condition, ConditionInput};
use care_db::records::feedback::{self, FeedbackInput, HealthcareFeedback};
use care_db::records::medications::{self, Medication, MedicationInput};
use care_db::records::profile::{self, PatientProfile, ProfileInput};
use care_db::records::work_history::{self, WorkHistory, WorkHistoryInput};

use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::{AppState, DbConn};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/patient/profile", get(get_profile).put(update_profile))
        .route(
            "/api/patient/medications",
            get(list_medications).post(create_medication),
        )
        .route(
            "/api/patient/medications/:id",
            get(get_medication)
                .put(update_medication)
                .delete(delete_medication),
        )
        .route(
            "/api/patient/conditions",
            get(list_conditions).post(create_condition),
        )
        .route(
            "/api/patient/conditions/:id",
            get(get_condition).put(update_condition).delete(delete_condition),
        )
        .route(
            "/api/patient/allergies",
            get(list_allergies).post(create_allergy),
        )
        .route(
            "/api/patient/allergies/:id",
            get(get_allergy).put(update_allergy).delete(delete_allergy),
        )
        .route(
            "/api/patient/assessments",
            get(list_assessments).post(create_assessment),
        )
        .route(
            "/api/patient/assessments/:id",
            get(get_assessment)
                .put(update_assessment)
                .delete(delete_assessment),
        )
        .route(
            "/api/patient/work-history",
            get(list_work_history).post(create_work_history),
        )
        .route(
            "/api/patient/work-history/:id",
            get(get_work_history)
                .put(update_work_history)
                .delete(delete_work_history),
        )
        .route(
            "/api/patient/feedback",
            get(list_feedback).post(create_feedback),
        )
        .route(
            "/api/patient/feedback/:id",
            get(get_feedback).delete(delete_feedback),
        )
}

type Created<T> = (StatusCode, Json<T>);

fn created<T>(value: T) -> Created<T> {
    (StatusCode::CREATED, Json(value))
}

// Perfil

async fn get_profile(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<PatientProfile>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(profile::get_profile(&mut conn, patient_id).await?))
}

async fn update_profile(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(input): Json<ProfileInput>,
) -> ApiResult<Json<PatientProfile>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(profile::update_profile(&mut conn, patient_id, &input, ctx.now).await?))
}

// Medicamentos

async fn list_medications(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<Medication>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(medications::list(&mut conn, patient_id).await?))
}

async fn get_medication(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
) -> ApiResult<Json<Medication>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(medications::get(&mut conn, patient_id, id).await?))
}

async fn create_medication(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(input): Json<MedicationInput>,
) -> ApiResult<Created<Medication>> {
    let patient_id = ctx.require_patient()?;
    Ok(created(medications::create(&mut conn, patient_id, &input, ctx.now).await?))
}

async fn update_medication(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
    Json(input): Json<MedicationInput>,
) -> ApiResult<Json<Medication>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(medications::update(&mut conn, patient_id, id, &input, ctx.now).await?))
}

async fn delete_medication(Auth(ctx): Auth, DbConn(mut conn): DbConn, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let patient_id = ctx.require_patient()?;
    medications::delete(&mut conn, patient_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Condições

async fn list_conditions(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<Condition>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(conditions::list(&mut conn, patient_id).await?))
}

async fn get_condition(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
) -> ApiResult<Json<Condition>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(conditions::get(&mut conn, patient_id, id).await?))
}

async fn create_condition(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(input): Json<ConditionInput>,
) -> ApiResult<Created<Condition>> {
    let patient_id = ctx.require_patient()?;
    Ok(created(conditions::create(&mut conn, patient_id, &input, ctx.now).await?))
}

async fn update_condition(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
    Json(input): Json<ConditionInput>,
) -> ApiResult<Json<Condition>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(conditions::update(&mut conn, patient_id, id, &input, ctx.now).await?))
}

async fn delete_condition(Auth(ctx): Auth, DbConn(mut conn): DbConn, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let patient_id = ctx.require_patient()?;
    conditions::delete(&mut conn, patient_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Alergias

async fn list_allergies(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<Allergy>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(allergies::list(&mut conn, patient_id).await?))
}

async fn get_allergy(Auth(ctx): Auth, DbConn(mut conn): DbConn, Path(id): Path<i64>) -> ApiResult<Json<Allergy>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(allergies::get(&mut conn, patient_id, id).await?))
}

async fn create_allergy(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(input): Json<AllergyInput>,
) -> ApiResult<Created<Allergy>> {
    let patient_id = ctx.require_patient()?;
    Ok(created(allergies::create(&mut conn, patient_id, &input, ctx.now).await?))
}

async fn update_allergy(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
    Json(input): Json<AllergyInput>,
) -> ApiResult<Json<Allergy>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(allergies::update(&mut conn, patient_id, id, &input, ctx.now).await?))
}

async fn delete_allergy(Auth(ctx): Auth, DbConn(mut conn): DbConn, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let patient_id = ctx.require_patient()?;
    allergies::delete(&mut conn, patient_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Sintomas e avaliações

async fn list_assessments(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<Assessment>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(assessments::list_for_patient(&mut conn, patient_id).await?))
}

async fn get_assessment(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
) -> ApiResult<Json<Assessment>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(assessments::get_patient_assessment(&mut conn, patient_id, id).await?))
}

async fn create_assessment(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(entry): Json<SymptomEntry>,
) -> ApiResult<Created<Assessment>> {
    let patient_id = ctx.require_patient()?;
    Ok(created(
        assessments::create_symptom_entry(&mut conn, patient_id, &entry, ctx.now).await?,
    ))
}

async fn update_assessment(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
    Json(entry): Json<SymptomEntry>,
) -> ApiResult<Json<Assessment>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(
        assessments::update_symptom_entry(&mut conn, patient_id, id, &entry, ctx.now).await?,
    ))
}

async fn delete_assessment(Auth(ctx): Auth, DbConn(mut conn): DbConn, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let patient_id = ctx.require_patient()?;
    assessments::delete_patient_assessment(&mut conn, patient_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Histórico de trabalho

async fn list_work_history(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<WorkHistory>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(work_history::list(&mut conn, patient_id).await?))
}

async fn get_work_history(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
) -> ApiResult<Json<WorkHistory>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(work_history::get(&mut conn, patient_id, id).await?))
}

async fn create_work_history(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(input): Json<WorkHistoryInput>,
) -> ApiResult<Created<WorkHistory>> {
    let patient_id = ctx.require_patient()?;
    Ok(created(work_history::create(&mut conn, patient_id, &input, ctx.now).await?))
}

async fn update_work_history(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
    Json(input): Json<WorkHistoryInput>,
) -> ApiResult<Json<WorkHistory>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(work_history::update(&mut conn, patient_id, id, &input, ctx.now).await?))
}

async fn delete_work_history(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let patient_id = ctx.require_patient()?;
    work_history::delete(&mut conn, patient_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Comentários sobre serviços de saúde

async fn list_feedback(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<HealthcareFeedback>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(feedback::list(&mut conn, patient_id).await?))
}

async fn get_feedback(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Path(id): Path<i64>,
) -> ApiResult<Json<HealthcareFeedback>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(feedback::get(&mut conn, patient_id, id).await?))
}

async fn create_feedback(
    Auth(ctx): Auth,
    DbConn(mut conn): DbConn,
    Json(input): Json<FeedbackInput>,
) -> ApiResult<Created<HealthcareFeedback>> {
    let patient_id = ctx.require_patient()?;
    Ok(created(feedback::create(&mut conn, patient_id, &input, ctx.now).await?))
}

async fn delete_feedback(Auth(ctx): Auth, DbConn(mut conn): DbConn, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let patient_id = ctx.require_patient()?;
    feedback::delete(&mut conn, patient_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::http::{Method, StatusCode};
    use care_db::models::ClinicianTitle;
    use serde_json::json;

    #[tokio::test]
    async fn test_medication_crud_is_owner_scoped() {
        let app = TestApp::new().await;
        let (_, maria) = app.patient("maria").await;
        let (_, joao) = app.patient("joao").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/patient/medications",
                Some(&maria),
                Some(json!({"name": "Metformina", "dosage": "850mg", "is_active": true})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/api/patient/medications/{}", body["id"]);

        let (status, _) = app.request(Method::GET, &uri, Some(&joao), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.request(Method::DELETE, &uri, Some(&joao), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .request(
                Method::PUT,
                &uri,
                Some(&maria),
                Some(json!({"name": "Metformina", "dosage": "1g", "is_active": true})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dosage"], "1g");

        let (status, _) = app.request(Method::DELETE, &uri, Some(&maria), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = app
            .request(Method::GET, "/api/patient/medications", Some(&maria), None)
            .await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_invalid_input_is_unprocessable() {
        let app = TestApp::new().await;
        let (_, maria) = app.patient("maria").await;

        let (status, body) = app
            .request(Method::POST, "/api/patient/medications", Some(&maria), Some(json!({"name": ""})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());

        let (status, _) = app
            .request(
                Method::POST,
                "/api/patient/assessments",
                Some(&maria),
                Some(json!({"current_symptoms": "Dor no joelho", "pain_level": 11})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_symptom_and_profile_flow() {
        let app = TestApp::new().await;
        let (_, maria) = app.patient("maria").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/patient/assessments",
                Some(&maria),
                Some(json!({"current_symptoms": "Dor lombar", "pain_level": 4})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["pain_level"], 4);

        let (status, body) = app
            .request(
                Method::PUT,
                "/api/patient/profile",
                Some(&maria),
                Some(json!({
                    "date_of_birth": "1980-02-29",
                    "emergency_contact_name": "José",
                    "emergency_contact_phone": "555-0100"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["personal_info"]["email"], "maria@example.com");
        assert_eq!(body["emergency_contact"]["name"], "José");
    }

    #[tokio::test]
    async fn test_clinicians_cannot_use_patient_routes() {
        let app = TestApp::new().await;
        let (_, doctor) = app.clinician("drjohn", ClinicianTitle::Dr).await;
        let (status, _) = app
            .request(Method::GET, "/api/patient/allergies", Some(&doctor), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
