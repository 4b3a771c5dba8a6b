use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::str::FromStr;
use tracing::info;
use validator::Validate;

use super::ensure_affected;
use crate::error::{CareError, CareResult};
use crate::models::decode_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    LifeThreatening,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Moderate
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::LifeThreatening => "life_threatening",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mild" => Ok(Severity::Mild),
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            "life_threatening" => Ok(Severity::LifeThreatening),
            other => Err(format!("Gravidade inválida: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allergy {
    pub id: i64,
    pub patient_id: i64,
    pub allergen: String,
    pub reaction: String,
    pub severity: Severity,
    pub date_identified: Option<NaiveDate>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Allergy {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            allergen: row.try_get("allergen")?,
            reaction: row.try_get("reaction")?,
            severity: decode_enum(row, "severity")?,
            date_identified: row.try_get("date_identified")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct AllergyInput {
    #[validate(length(min = 1, max = 200, message = "Informe o alérgeno"))]
    pub allergen: String,
    #[validate(length(min = 1, message = "Descreva a reação"))]
    pub reaction: String,
    pub severity: Severity,
    pub date_identified: Option<NaiveDate>,
    pub notes: String,
}

/// Mais graves primeiro
pub async fn list(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<Allergy>> {
    let mut rows = sqlx::query_as::<_, Allergy>("SELECT * FROM allergies WHERE patient_id = ? ORDER BY allergen")
        .bind(patient_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.sort_by(|a, b| b.severity.cmp(&a.severity));
    Ok(rows)
}

pub async fn get(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<Allergy> {
    sqlx::query_as::<_, Allergy>("SELECT * FROM allergies WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Alergia"))
}

pub async fn create(
    conn: &mut SqliteConnection,
    patient_id: i64,
    input: &AllergyInput,
    now: DateTime<Utc>,
) -> CareResult<Allergy> {
    input.validate()?;
    let id = sqlx::query(
        r#"
        INSERT INTO allergies (patient_id, allergen, reaction, severity, date_identified, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(input.allergen.trim())
    .bind(input.reaction.trim())
    .bind(input.severity.as_str())
    .bind(input.date_identified)
    .bind(input.notes.trim())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(patient_id, allergy_id = id, "Alergia adicionada");
    get(conn, patient_id, id).await
}

pub async fn update(
    conn: &mut SqliteConnection,
    patient_id: i64,
    id: i64,
    input: &AllergyInput,
    now: DateTime<Utc>,
) -> CareResult<Allergy> {
    input.validate()?;
    let result = sqlx::query(
        r#"
        UPDATE allergies SET allergen = ?, reaction = ?, severity = ?, date_identified = ?, notes = ?, updated_at = ?
        WHERE id = ? AND patient_id = ?
        "#,
    )
    .bind(input.allergen.trim())
    .bind(input.reaction.trim())
    .bind(input.severity.as_str())
    .bind(input.date_identified)
    .bind(input.notes.trim())
    .bind(now)
    .bind(id)
    .bind(patient_id)
    .execute(&mut *conn)
    .await?;
    ensure_affected(result.rows_affected(), "Alergia")?;
    get(conn, patient_id, id).await
}

pub async fn delete(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<()> {
    let result = sqlx::query("DELETE FROM allergies WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    ensure_affected(result.rows_affected(), "Alergia")
}
