use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::info;
use validator::Validate;

use super::ensure_affected;
use crate::error::{CareError, CareResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: i64,
    pub patient_id: i64,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_prescribed: bool,
    pub prescribing_clinician: String,
    pub notes: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Medication {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            name: row.try_get("name")?,
            dosage: row.try_get("dosage")?,
            frequency: row.try_get("frequency")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            is_prescribed: row.try_get("is_prescribed")?,
            prescribing_clinician: row.try_get("prescribing_clinician")?,
            notes: row.try_get("notes")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MedicationInput {
    #[validate(length(min = 1, max = 200, message = "Informe o nome do medicamento"))]
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub is_prescribed: bool,
    #[serde(default)]
    pub prescribing_clinician: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl MedicationInput {
    fn check_dates(&self) -> CareResult<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(CareError::invalid("A data de término é anterior à data de início"));
            }
        }
        Ok(())
    }
}

pub async fn list(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<Medication>> {
    let rows = sqlx::query_as::<_, Medication>(
        "SELECT * FROM medications WHERE patient_id = ? ORDER BY is_active DESC, name",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn get(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<Medication> {
    sqlx::query_as::<_, Medication>("SELECT * FROM medications WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Medicamento"))
}

pub async fn create(
    conn: &mut SqliteConnection,
    patient_id: i64,
    input: &MedicationInput,
    now: DateTime<Utc>,
) -> CareResult<Medication> {
    input.validate()?;
    input.check_dates()?;
    let id = sqlx::query(
        r#"
        INSERT INTO medications (
            patient_id, name, dosage, frequency, start_date, end_date, is_prescribed,
            prescribing_clinician, notes, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(input.name.trim())
    .bind(input.dosage.trim())
    .bind(input.frequency.trim())
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(input.is_prescribed)
    .bind(input.prescribing_clinician.trim())
    .bind(input.notes.trim())
    .bind(input.is_active)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(patient_id, medication_id = id, "Medicamento adicionado");
    get(conn, patient_id, id).await
}

pub async fn update(
    conn: &mut SqliteConnection,
    patient_id: i64,
    id: i64,
    input: &MedicationInput,
    now: DateTime<Utc>,
) -> CareResult<Medication> {
    input.validate()?;
    input.check_dates()?;
    let result = sqlx::query(
        r#"
        UPDATE medications SET
            name = ?, dosage = ?, frequency = ?, start_date = ?, end_date = ?, is_prescribed = ?,
            prescribing_clinician = ?, notes = ?, is_active = ?, updated_at = ?
        WHERE id = ? AND patient_id = ?
        "#,
    )
    .bind(input.name.trim())
    .bind(input.dosage.trim())
    .bind(input.frequency.trim())
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(input.is_prescribed)
    .bind(input.prescribing_clinician.trim())
    .bind(input.notes.trim())
    .bind(input.is_active)
    .bind(now)
    .bind(id)
    .bind(patient_id)
    .execute(&mut *conn)
    .await?;
    ensure_affected(result.rows_affected(), "Medicamento")?;
    get(conn, patient_id, id).await
}

pub async fn delete(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<()> {
    let result = sqlx::query("DELETE FROM medications WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    ensure_affected(result.rows_affected(), "Medicamento")?;
    info!(patient_id, medication_id = id, "Medicamento removido");
    Ok(())
}
