//! Avaliações: sintomas registrados pelo paciente e avaliações clínicas
//! registradas por profissionais com acesso de escrita

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::str::FromStr;
use tracing::info;
use validator::Validate;

use crate::access;
use crate::error::{CareError, CareResult};
use crate::models::{decode_enum, Clinician, DataCategory, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentType {
    Physiotherapy,
    General,
    Specialist,
    Emergency,
    Other,
}

impl Default for AssessmentType {
    fn default() -> Self {
        AssessmentType::General
    }
}

impl AssessmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentType::Physiotherapy => "physiotherapy",
            AssessmentType::General => "general",
            AssessmentType::Specialist => "specialist",
            AssessmentType::Emergency => "emergency",
            AssessmentType::Other => "other",
        }
    }
}

impl FromStr for AssessmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physiotherapy" => Ok(AssessmentType::Physiotherapy),
            "general" => Ok(AssessmentType::General),
            "specialist" => Ok(AssessmentType::Specialist),
            "emergency" => Ok(AssessmentType::Emergency),
            "other" => Ok(AssessmentType::Other),
            other => Err(format!("Tipo de avaliação inválido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: i64,
    pub patient_id: i64,
    /// Ausente quando registrada pelo próprio paciente
    pub clinician_id: Option<i64>,
    pub assessment_type: AssessmentType,
    pub assessment_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_symptoms: String,
    pub previous_symptoms: String,
    pub condition_progression: String,
    pub pain_level: Option<i64>,
    pub symptom_date: Option<NaiveDate>,
    pub objective_findings: String,
    pub treatment_plan: String,
    pub practitioner_notes: String,
    pub notes_image_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Assessment {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            clinician_id: row.try_get("clinician_id")?,
            assessment_type: decode_enum(row, "assessment_type")?,
            assessment_date: row.try_get("assessment_date")?,
            completed_at: row.try_get("completed_at")?,
            current_symptoms: row.try_get("current_symptoms")?,
            previous_symptoms: row.try_get("previous_symptoms")?,
            condition_progression: row.try_get("condition_progression")?,
            pain_level: row.try_get("pain_level")?,
            symptom_date: row.try_get("symptom_date")?,
            objective_findings: row.try_get("objective_findings")?,
            treatment_plan: row.try_get("treatment_plan")?,
            practitioner_notes: row.try_get("practitioner_notes")?,
            notes_image_path: row.try_get("notes_image_path")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Registro de sintomas feito pelo paciente
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SymptomEntry {
    pub assessment_type: AssessmentType,
    pub assessment_date: Option<NaiveDate>,
    #[validate(length(min = 1, message = "Descreva os sintomas atuais"))]
    pub current_symptoms: String,
    pub previous_symptoms: String,
    pub condition_progression: String,
    #[validate(range(min = 0, max = 10, message = "A dor deve estar entre 0 e 10"))]
    pub pain_level: Option<i64>,
    pub symptom_date: Option<NaiveDate>,
}

/// Avaliação registrada por um profissional
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClinicalEntry {
    /// Ignorado para fisioterapeutas, que sempre registram `physiotherapy`
    pub assessment_type: Option<AssessmentType>,
    pub assessment_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_symptoms: String,
    #[validate(range(min = 0, max = 10, message = "A dor deve estar entre 0 e 10"))]
    pub pain_level: Option<i64>,
    pub objective_findings: String,
    pub treatment_plan: String,
    pub practitioner_notes: String,
}

pub async fn get_assessment(conn: &mut SqliteConnection, assessment_id: i64) -> CareResult<Assessment> {
    sqlx::query_as::<_, Assessment>("SELECT * FROM assessments WHERE id = ?")
        .bind(assessment_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Avaliação"))
}

pub async fn list_for_patient(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<Assessment>> {
    let rows = sqlx::query_as::<_, Assessment>(
        "SELECT * FROM assessments WHERE patient_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn get_patient_assessment(
    conn: &mut SqliteConnection,
    patient_id: i64,
    assessment_id: i64,
) -> CareResult<Assessment> {
    sqlx::query_as::<_, Assessment>("SELECT * FROM assessments WHERE id = ? AND patient_id = ?")
        .bind(assessment_id)
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Avaliação"))
}

pub async fn create_symptom_entry(
    conn: &mut SqliteConnection,
    patient_id: i64,
    entry: &SymptomEntry,
    now: DateTime<Utc>,
) -> CareResult<Assessment> {
    entry.validate()?;
    let id = sqlx::query(
        r#"
        INSERT INTO assessments (
            patient_id, assessment_type, assessment_date, current_symptoms, previous_symptoms,
            condition_progression, pain_level, symptom_date, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(entry.assessment_type.as_str())
    .bind(entry.assessment_date)
    .bind(entry.current_symptoms.trim())
    .bind(entry.previous_symptoms.trim())
    .bind(entry.condition_progression.trim())
    .bind(entry.pain_level)
    .bind(entry.symptom_date)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(patient_id, assessment_id = id, "Sintomas registrados");
    get_assessment(conn, id).await
}

pub async fn update_symptom_entry(
    conn: &mut SqliteConnection,
    patient_id: i64,
    assessment_id: i64,
    entry: &SymptomEntry,
    now: DateTime<Utc>,
) -> CareResult<Assessment> {
    entry.validate()?;
    let result = sqlx::query(
        r#"
        UPDATE assessments SET
            assessment_type = ?, assessment_date = ?, current_symptoms = ?, previous_symptoms = ?,
            condition_progression = ?, pain_level = ?, symptom_date = ?, updated_at = ?
        WHERE id = ? AND patient_id = ?
        "#,
    )
    .bind(entry.assessment_type.as_str())
    .bind(entry.assessment_date)
    .bind(entry.current_symptoms.trim())
    .bind(entry.previous_symptoms.trim())
    .bind(entry.condition_progression.trim())
    .bind(entry.pain_level)
    .bind(entry.symptom_date)
    .bind(now)
    .bind(assessment_id)
    .bind(patient_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CareError::not_found("Avaliação"));
    }
    get_assessment(conn, assessment_id).await
}

pub async fn delete_patient_assessment(
    conn: &mut SqliteConnection,
    patient_id: i64,
    assessment_id: i64,
) -> CareResult<()> {
    let result = sqlx::query("DELETE FROM assessments WHERE id = ? AND patient_id = ?")
        .bind(assessment_id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CareError::not_found("Avaliação"));
    }
    info!(patient_id, assessment_id, "Avaliação removida");
    Ok(())
}

/// Cria uma avaliação clínica; exige acesso de escrita à categoria de sintomas
pub async fn create_clinical_assessment(
    conn: &mut SqliteConnection,
    clinician: &Clinician,
    patient_id: i64,
    entry: &ClinicalEntry,
    now: DateTime<Utc>,
) -> CareResult<Assessment> {
    access::require_access(
        &mut *conn,
        clinician.id,
        patient_id,
        DataCategory::Symptoms,
        Operation::Write,
        now,
    )
    .await?;
    entry.validate()?;

    let assessment_type = if clinician.is_physiotherapist() {
        AssessmentType::Physiotherapy
    } else {
        entry.assessment_type.unwrap_or_default()
    };
    let completed_at = entry.completed_at.unwrap_or(now);

    let id = sqlx::query(
        r#"
        INSERT INTO assessments (
            patient_id, clinician_id, assessment_type, assessment_date, completed_at,
            current_symptoms, pain_level, objective_findings, treatment_plan, practitioner_notes,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(clinician.id)
    .bind(assessment_type.as_str())
    .bind(entry.assessment_date.or_else(|| Some(now.date_naive())))
    .bind(completed_at)
    .bind(entry.current_symptoms.trim())
    .bind(entry.pain_level)
    .bind(entry.objective_findings.trim())
    .bind(entry.treatment_plan.trim())
    .bind(entry.practitioner_notes.trim())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(
        clinician_id = clinician.id,
        patient_id,
        assessment_id = id,
        assessment_type = assessment_type.as_str(),
        "Avaliação clínica criada"
    );
    get_assessment(conn, id).await
}

/// Guarda o caminho da imagem das notas; o arquivo já foi salvo pelo chamador
pub async fn set_notes_image_path(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    assessment_id: i64,
    path: &str,
    now: DateTime<Utc>,
) -> CareResult<Assessment> {
    let assessment = get_assessment(&mut *conn, assessment_id).await?;
    access::require_access(
        &mut *conn,
        clinician_id,
        assessment.patient_id,
        DataCategory::Symptoms,
        Operation::Write,
        now,
    )
    .await?;

    sqlx::query("UPDATE assessments SET notes_image_path = ?, updated_at = ? WHERE id = ?")
        .bind(path)
        .bind(now)
        .bind(assessment_id)
        .execute(&mut *conn)
        .await?;
    get_assessment(conn, assessment_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{grant_or_update, GrantRequest};
    use crate::models::{AccessLevel, ClinicianTitle, ConsentFlags};
    use crate::test_support::{insert_clinician, insert_patient, temp_db};

    #[tokio::test]
    async fn test_patient_symptom_crud_is_owner_scoped() {
        let db = temp_db().await;
        let owner = insert_patient(&db.pool, "owner").await;
        let stranger = insert_patient(&db.pool, "stranger").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();

        let entry = SymptomEntry {
            current_symptoms: "Dor no joelho ao subir escadas".to_string(),
            pain_level: Some(6),
            ..SymptomEntry::default()
        };
        let created = create_symptom_entry(&mut conn, owner, &entry, now).await.unwrap();
        assert_eq!(created.assessment_type, AssessmentType::General);
        assert!(created.clinician_id.is_none());

        assert!(matches!(
            get_patient_assessment(&mut conn, stranger, created.id).await,
            Err(CareError::NotFound(_))
        ));
        assert!(matches!(
            delete_patient_assessment(&mut conn, stranger, created.id).await,
            Err(CareError::NotFound(_))
        ));

        let mut changed = entry.clone();
        changed.pain_level = Some(3);
        let updated = update_symptom_entry(&mut conn, owner, created.id, &changed, now).await.unwrap();
        assert_eq!(updated.pain_level, Some(3));

        delete_patient_assessment(&mut conn, owner, created.id).await.unwrap();
        assert!(list_for_patient(&mut conn, owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pain_level_out_of_range() {
        let db = temp_db().await;
        let owner = insert_patient(&db.pool, "owner").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let entry = SymptomEntry {
            current_symptoms: "Dor".to_string(),
            pain_level: Some(11),
            ..SymptomEntry::default()
        };
        assert!(matches!(
            create_symptom_entry(&mut conn, owner, &entry, Utc::now()).await,
            Err(CareError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_physiotherapist_assessment_defaults() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let physio = insert_clinician(&db.pool, "Ana", ClinicianTitle::Physiotherapist).await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();

        grant_or_update(
            &mut conn,
            patient,
            physio.id,
            &GrantRequest::new(ConsentFlags::all_granted(), AccessLevel::Full),
            now,
        )
        .await
        .unwrap();

        let entry = ClinicalEntry {
            assessment_type: Some(AssessmentType::General),
            treatment_plan: "Fortalecimento de quadríceps".to_string(),
            ..ClinicalEntry::default()
        };
        let assessment = create_clinical_assessment(&mut conn, &physio, patient, &entry, now)
            .await
            .unwrap();
        assert_eq!(assessment.assessment_type, AssessmentType::Physiotherapy);
        assert_eq!(assessment.clinician_id, Some(physio.id));
        assert!(assessment.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_clinician_without_full_access_cannot_create() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let doctor = insert_clinician(&db.pool, "John", ClinicianTitle::Dr).await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();

        let entry = ClinicalEntry::default();
        assert!(matches!(
            create_clinical_assessment(&mut conn, &doctor, patient, &entry, now).await,
            Err(CareError::PermissionDenied(_))
        ));

        grant_or_update(
            &mut conn,
            patient,
            doctor.id,
            &GrantRequest::new(ConsentFlags::all_granted(), AccessLevel::ReadOnly),
            now,
        )
        .await
        .unwrap();
        assert!(matches!(
            create_clinical_assessment(&mut conn, &doctor, patient, &entry, now).await,
            Err(CareError::PermissionDenied(_))
        ));
    }
}
