//! Dados pessoais e contato de emergência do paciente
//!
//! São duas categorias de consentimento distintas; o profissional pode ver
//! uma sem a outra.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::info;
use validator::Validate;

use crate::error::{CareError, CareResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersonalInfo {
    pub username: String,
    pub email: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone_number: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    pub relationship: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientProfile {
    pub patient_id: i64,
    pub personal_info: PersonalInfo,
    pub emergency_contact: EmergencyContact,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, SqliteRow> for PatientProfile {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            patient_id: row.try_get("id")?,
            personal_info: PersonalInfo {
                username: row.try_get("username")?,
                email: row.try_get("email")?,
                date_of_birth: row.try_get("date_of_birth")?,
                phone_number: row
                    .try_get::<Option<String>, _>("phone_number")?
                    .unwrap_or_default(),
            },
            emergency_contact: EmergencyContact {
                name: row
                    .try_get::<Option<String>, _>("emergency_contact_name")?
                    .unwrap_or_default(),
                phone: row
                    .try_get::<Option<String>, _>("emergency_contact_phone")?
                    .unwrap_or_default(),
                relationship: row
                    .try_get::<Option<String>, _>("emergency_contact_relationship")?
                    .unwrap_or_default(),
            },
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ProfileInput {
    /// Ausente mantém o e-mail atual da conta
    #[validate(email(message = "Informe um e-mail válido"))]
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    #[validate(length(max = 30))]
    pub phone_number: String,
    #[validate(length(max = 200))]
    pub emergency_contact_name: String,
    #[validate(length(max = 30))]
    pub emergency_contact_phone: String,
    #[validate(length(max = 100))]
    pub emergency_contact_relationship: String,
}

/// Perfil do paciente; campos não preenchidos voltam vazios
pub async fn get_profile(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<PatientProfile> {
    sqlx::query_as::<_, PatientProfile>(
        r#"
        SELECT a.id, a.username, a.email, p.date_of_birth, p.phone_number,
               p.emergency_contact_name, p.emergency_contact_phone, p.emergency_contact_relationship,
               p.updated_at
        FROM accounts a
        LEFT JOIN patient_profiles p ON p.account_id = a.id
        WHERE a.id = ?
        "#,
    )
    .bind(patient_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CareError::not_found("Paciente"))
}

pub async fn update_profile(
    conn: &mut SqliteConnection,
    patient_id: i64,
    input: &ProfileInput,
    now: DateTime<Utc>,
) -> CareResult<PatientProfile> {
    input.validate()?;
    if let Some(dob) = input.date_of_birth {
        if dob > now.date_naive() {
            return Err(CareError::invalid("A data de nascimento não pode estar no futuro"));
        }
    }

    if let Some(email) = &input.email {
        sqlx::query("UPDATE accounts SET email = ? WHERE id = ?")
            .bind(email.trim())
            .bind(patient_id)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO patient_profiles (
            account_id, date_of_birth, phone_number, emergency_contact_name,
            emergency_contact_phone, emergency_contact_relationship, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (account_id) DO UPDATE SET
            date_of_birth = excluded.date_of_birth,
            phone_number = excluded.phone_number,
            emergency_contact_name = excluded.emergency_contact_name,
            emergency_contact_phone = excluded.emergency_contact_phone,
            emergency_contact_relationship = excluded.emergency_contact_relationship,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(patient_id)
    .bind(input.date_of_birth)
    .bind(input.phone_number.trim())
    .bind(input.emergency_contact_name.trim())
    .bind(input.emergency_contact_phone.trim())
    .bind(input.emergency_contact_relationship.trim())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    info!(patient_id, "Perfil do paciente atualizado");
    get_profile(conn, patient_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_patient, temp_db};

    #[tokio::test]
    async fn test_profile_defaults_then_upsert() {
        let db = temp_db().await;
        let owner = insert_patient(&db.pool, "owner").await;
        let mut conn = db.pool.acquire().await.unwrap();

        let empty = get_profile(&mut conn, owner).await.unwrap();
        assert_eq!(empty.emergency_contact, EmergencyContact::default());
        assert!(empty.updated_at.is_none());

        let input = ProfileInput {
            email: Some("owner@example.com".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 2, 29),
            emergency_contact_name: "Maria".to_string(),
            emergency_contact_relationship: "Irmã".to_string(),
            ..ProfileInput::default()
        };
        update_profile(&mut conn, owner, &input, Utc::now()).await.unwrap();
        let saved = update_profile(&mut conn, owner, &input, Utc::now()).await.unwrap();
        assert_eq!(saved.emergency_contact.name, "Maria");
        assert_eq!(saved.personal_info.date_of_birth, NaiveDate::from_ymd_opt(1980, 2, 29));

        assert!(matches!(get_profile(&mut conn, 9999).await, Err(CareError::NotFound(_))));
    }
}
