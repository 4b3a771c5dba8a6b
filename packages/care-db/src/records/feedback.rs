use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::info;
use validator::Validate;

use super::ensure_affected;
use crate::error::{CareError, CareResult};

/// Avaliação do paciente sobre um serviço de saúde
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthcareFeedback {
    pub id: i64,
    pub patient_id: i64,
    pub organisation: String,
    pub rating: i64,
    pub feedback_type: String,
    pub feedback_text: String,
    pub is_anonymous: bool,
    /// Privado: nunca aparece para profissionais, mesmo com consentimento
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for HealthcareFeedback {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            organisation: row.try_get("organisation")?,
            rating: row.try_get("rating")?,
            feedback_type: row.try_get("feedback_type")?,
            feedback_text: row.try_get("feedback_text")?,
            is_anonymous: row.try_get("is_anonymous")?,
            is_private: row.try_get("is_private")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct FeedbackInput {
    #[validate(length(min = 1, max = 200, message = "Informe a organização"))]
    pub organisation: String,
    #[validate(range(min = 1, max = 5, message = "A nota deve estar entre 1 e 5"))]
    pub rating: i64,
    #[validate(length(min = 1, max = 50))]
    pub feedback_type: String,
    #[validate(length(min = 1, message = "Escreva o comentário"))]
    pub feedback_text: String,
    pub is_anonymous: bool,
    pub is_private: bool,
}

pub async fn list(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<HealthcareFeedback>> {
    let rows = sqlx::query_as::<_, HealthcareFeedback>(
        "SELECT * FROM healthcare_feedback WHERE patient_id = ? ORDER BY created_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Comentários visíveis a profissionais com consentimento
pub async fn list_shareable(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<HealthcareFeedback>> {
    let rows = sqlx::query_as::<_, HealthcareFeedback>(
        "SELECT * FROM healthcare_feedback WHERE patient_id = ? AND is_private = 0 ORDER BY created_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn get(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<HealthcareFeedback> {
    sqlx::query_as::<_, HealthcareFeedback>("SELECT * FROM healthcare_feedback WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Comentário"))
}

pub async fn create(
    conn: &mut SqliteConnection,
    patient_id: i64,
    input: &FeedbackInput,
    now: DateTime<Utc>,
) -> CareResult<HealthcareFeedback> {
    input.validate()?;
    let id = sqlx::query(
        r#"
        INSERT INTO healthcare_feedback (
            patient_id, organisation, rating, feedback_type, feedback_text, is_anonymous, is_private, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(input.organisation.trim())
    .bind(input.rating)
    .bind(input.feedback_type.trim())
    .bind(input.feedback_text.trim())
    .bind(input.is_anonymous)
    .bind(input.is_private)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(patient_id, feedback_id = id, "Comentário registrado");
    get(conn, patient_id, id).await
}

pub async fn delete(conn: &mut SqliteConnection, patient_id: i64, id: i64) -> CareResult<()> {
    let result = sqlx::query("DELETE FROM healthcare_feedback WHERE id = ? AND patient_id = ?")
        .bind(id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    ensure_affected(result.rows_affected(), "Comentário")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_patient, temp_db};

    fn input(rating: i64, is_private: bool) -> FeedbackInput {
        FeedbackInput {
            organisation: "Hospital Central".to_string(),
            rating,
            feedback_type: "compliment".to_string(),
            feedback_text: "Atendimento rápido".to_string(),
            is_anonymous: false,
            is_private,
        }
    }

    #[tokio::test]
    async fn test_private_feedback_is_not_shareable() {
        let db = temp_db().await;
        let owner = insert_patient(&db.pool, "owner").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();

        create(&mut conn, owner, &input(5, false), now).await.unwrap();
        create(&mut conn, owner, &input(2, true), now).await.unwrap();

        assert_eq!(list(&mut conn, owner).await.unwrap().len(), 2);
        assert_eq!(list_shareable(&mut conn, owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rating_range() {
        let db = temp_db().await;
        let owner = insert_patient(&db.pool, "owner").await;
        let mut conn = db.pool.acquire().await.unwrap();
        assert!(matches!(
            create(&mut conn, owner, &input(0, false), Utc::now()).await,
            Err(CareError::Validation(_))
        ));
    }
}
