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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionStatus {
    Active,
    Resolved,
    Chronic,
    Monitoring,
}

impl Default for ConditionStatus {
    fn default() -> Self {
        ConditionStatus::Active
    }
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::Active => "active",
            ConditionStatus::Resolved => "resolved",
            ConditionStatus::Chronic => "chronic",
            ConditionStatus::Monitoring => "monitoring",
        }
    }
}

impl FromStr for ConditionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConditionStatus::Active),
            "resolved" => Ok(ConditionStatus::Resolved),
            "chronic" => Ok(ConditionStatus::Chronic),
            "monitoring" => Ok(ConditionStatus::Monitoring),
            other => Err(format!("Situação de condição inválida: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub id: i64,
    pub patient_id: i64,
    pub name: String,
    pub diagnosis_date: Option<NaiveDate>,
    pub status: ConditionStatus,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Condition {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            name: row.try_get("name")?,
            diagnosis_date: row.try_get("diagnosis_date")?,
            status: decode_enum(row, "status")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ConditionInput {
    #[validate(length(min = 1, max = 200, message = "Informe o nome da condição"))]
    pub name: String,
    pub diagnosis_date: Option<NaiveDate>,
    pub status: ConditionStatus,
    pub notes: String,
}

pub async fn list(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<Condition>> {
    let rows = sqlx::query_as::<_, Condition>(
        "SELECT * FROM conditions WHERE patient_id = ? ORDER BY diagnosis_date DESC, id DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn get(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<Condition> {
    sqlx::query_as::<_, Condition>("SELECT * FROM conditions WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Condição"))
}

pub async fn create(
    conn: &mut SqliteConnection,
    patient_id: i64,
    input: &ConditionInput,
    now: DateTime<Utc>,
) -> CareResult<Condition> {
    input.validate()?;
    let id = sqlx::query(
        "INSERT INTO conditions (patient_id, name, diagnosis_date, status, notes, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(patient_id)
    .bind(input.name.trim())
    .bind(input.diagnosis_date)
    .bind(input.status.as_str())
    .bind(input.notes.trim())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(patient_id, condition_id = id, "Condição adicionada");
    get(conn, patient_id, id).await
}

pub async fn update(
    conn: &mut SqliteConnection,
    patient_id: i64,
    id: i64,
    input: &ConditionInput,
    now: DateTime<Utc>,
) -> CareResult<Condition> {
    input.validate()?;
    let result = sqlx::query(
        "UPDATE conditions SET name = ?, diagnosis_date = ?, status = ?, notes = ?, updated_at = ? WHERE id = ? AND patient_id = ?",
    )
    .bind(input.name.trim())
    .bind(input.diagnosis_date)
    .bind(input.status.as_str())
    .bind(input.notes.trim())
    .bind(now)
    .bind(id)
    .bind(patient_id)
    .execute(&mut *conn)
    .await?;
    ensure_affected(result.rows_affected(), "Condição")?;
    get(conn, patient_id, id).await
}

pub async fn delete(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<()> {
    let result = sqlx::query("DELETE FROM conditions WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    ensure_affected(result.rows_affected(), "Condição")
}
