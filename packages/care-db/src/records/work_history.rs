use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::info;
use validator::Validate;

use super::ensure_affected;
use crate::error::{CareError, CareResult, DbError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkHistory {
    pub id: i64,
    pub patient_id: i64,
    pub job_title: String,
    pub employer: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_current: bool,
    /// Atividades físicas do trabalho (levantar peso, digitar, ...)
    pub activities: Vec<String>,
    pub hours_per_week: Option<i64>,
    pub description: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for WorkHistory {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let activities: String = row.try_get("activities")?;
        let activities = serde_json::from_str(&activities).map_err(|e| sqlx::Error::ColumnDecode {
            index: "activities".to_string(),
            source: Box::new(e),
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            job_title: row.try_get("job_title")?,
            employer: row.try_get("employer")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            is_current: row.try_get("is_current")?,
            activities,
            hours_per_week: row.try_get("hours_per_week")?,
            description: row.try_get("description")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct WorkHistoryInput {
    #[validate(length(min = 1, max = 200, message = "Informe o cargo"))]
    pub job_title: String,
    pub employer: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_current: bool,
    pub activities: Vec<String>,
    #[validate(range(min = 0, max = 168, message = "Horas semanais fora do intervalo"))]
    pub hours_per_week: Option<i64>,
    pub description: String,
    pub notes: String,
}

impl WorkHistoryInput {
    /// Emprego atual não tem data de término
    fn end_date(&self) -> Option<NaiveDate> {
        if self.is_current {
            None
        } else {
            self.end_date
        }
    }

    fn activities_json(&self) -> CareResult<String> {
        let activities: Vec<&str> = self
            .activities
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        serde_json::to_string(&activities).map_err(|e| {
            CareError::Database(DbError::InternalError(format!("Falha ao serializar atividades: {}", e)))
        })
    }
}

pub async fn list(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<WorkHistory>> {
    let rows = sqlx::query_as::<_, WorkHistory>(
        "SELECT * FROM work_history WHERE patient_id = ? ORDER BY is_current DESC, start_date DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn get(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<WorkHistory> {
    sqlx::query_as::<_, WorkHistory>("SELECT * FROM work_history WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Histórico de trabalho"))
}

pub async fn create(
    conn: &mut SqliteConnection,
    patient_id: i64,
    input: &WorkHistoryInput,
    now: DateTime<Utc>,
) -> CareResult<WorkHistory> {
    input.validate()?;
    let id = sqlx::query(
        r#"
        INSERT INTO work_history (
            patient_id, job_title, employer, start_date, end_date, is_current, activities,
            hours_per_week, description, notes, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(input.job_title.trim())
    .bind(input.employer.trim())
    .bind(input.start_date)
    .bind(input.end_date())
    .bind(input.is_current)
    .bind(input.activities_json()?)
    .bind(input.hours_per_week)
    .bind(input.description.trim())
    .bind(input.notes.trim())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(patient_id, work_history_id = id, "Histórico de trabalho adicionado");
    get(conn, patient_id, id).await
}

pub async fn update(
    conn: &mut SqliteConnection,
    patient_id: i64,
    id: i64,
    input: &WorkHistoryInput,
    now: DateTime<Utc>,
) -> CareResult<WorkHistory> {
    input.validate()?;
    let result = sqlx::query(
        r#"
        UPDATE work_history SET
            job_title = ?, employer = ?, start_date = ?, end_date = ?, is_current = ?, activities = ?,
            hours_per_week = ?, description = ?, notes = ?, updated_at = ?
        WHERE id = ? AND patient_id = ?
        "#,
    )
    .bind(input.job_title.trim())
    .bind(input.employer.trim())
    .bind(input.start_date)
    .bind(input.end_date())
    .bind(input.is_current)
    .bind(input.activities_json()?)
    .bind(input.hours_per_week)
    .bind(input.description.trim())
    .bind(input.notes.trim())
    .bind(now)
    .bind(id)
    .bind(patient_id)
    .execute(&mut *conn)
    .await?;
    ensure_affected(result.rows_affected(), "Histórico de trabalho")?;
    get(conn, patient_id, id).await
}

pub async fn delete(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<()> {
    let result = sqlx::query("DELETE FROM work_history WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    ensure_affected(result.rows_affected(), "Histórico de trabalho")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_patient, temp_db};

    #[tokio::test]
    async fn test_current_job_has_no_end_date() {
        let db = temp_db().await;
        let owner = insert_patient(&db.pool, "owner").await;
        let mut conn = db.pool.acquire().await.unwrap();

        let job = create(
            &mut conn,
            owner,
            &WorkHistoryInput {
                job_title: "Carteiro".to_string(),
                is_current: true,
                end_date: NaiveDate::from_ymd_opt(2020, 1, 1),
                activities: vec!["Caminhar".to_string(), "  ".to_string(), "Carregar peso".to_string()],
                hours_per_week: Some(40),
                ..WorkHistoryInput::default()
            },
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(job.end_date.is_none());
        assert_eq!(job.activities, vec!["Caminhar", "Carregar peso"]);
    }
}
