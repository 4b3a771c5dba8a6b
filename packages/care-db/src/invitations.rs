//! Convites de pacientes para profissionais
//!
//! O convite é consumido uma única vez: o cadastro cria a conta e o perfil do
//! profissional e um vínculo de acesso completo com todas as categorias.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::access::{self, GrantRequest};
use crate::accounts;
use crate::clinicians::{self, NewClinician};
use crate::error::{CareError, CareResult};
use crate::models::{AccessGrant, AccessLevel, Account, Clinician, ConsentFlags, Invitation};

/// Validade padrão de um convite
pub const INVITATION_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct NewInvitation {
    #[validate(email(message = "Informe um e-mail válido"))]
    pub email: String,
    #[validate(length(max = 100))]
    pub first_name: String,
    #[validate(length(max = 100))]
    pub last_name: String,
    pub notes: String,
}

/// Dados preenchidos pelo profissional ao aceitar o convite
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClinicianSignup {
    pub username: String,
    pub password1: String,
    pub password2: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedInvitation {
    pub account: Account,
    pub clinician: Clinician,
    pub grant: AccessGrant,
}

pub async fn create_invitation(
    conn: &mut SqliteConnection,
    patient_id: i64,
    new: &NewInvitation,
    now: DateTime<Utc>,
) -> CareResult<Invitation> {
    new.validate()?;
    accounts::ensure_patient(&mut *conn, patient_id).await?;

    let token = Uuid::new_v4();
    let expires_at = now + Duration::days(INVITATION_VALIDITY_DAYS);
    sqlx::query(
        r#"
        INSERT INTO invitations (patient_id, email, first_name, last_name, notes, token, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(new.email.trim())
    .bind(new.first_name.trim())
    .bind(new.last_name.trim())
    .bind(new.notes.trim())
    .bind(token.to_string())
    .bind(now)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;

    info!(patient_id, "Convite criado para profissional");
    get_by_token(conn, token).await
}

pub async fn get_by_token(conn: &mut SqliteConnection, token: Uuid) -> CareResult<Invitation> {
    sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE token = ?")
        .bind(token.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Convite"))
}

pub async fn list_patient_invitations(
    conn: &mut SqliteConnection,
    patient_id: i64,
) -> CareResult<Vec<Invitation>> {
    let rows = sqlx::query_as::<_, Invitation>(
        "SELECT * FROM invitations WHERE patient_id = ? ORDER BY created_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

fn non_empty<'a>(preferred: &'a str, fallback: &'a str) -> &'a str {
    let preferred = preferred.trim();
    if preferred.is_empty() {
        fallback.trim()
    } else {
        preferred
    }
}

/// Consome o convite: cria conta, profissional e vínculo completo em uma transação
pub async fn accept_invitation(
    conn: &mut SqliteConnection,
    token: Uuid,
    signup: &ClinicianSignup,
    now: DateTime<Utc>,
) -> CareResult<AcceptedInvitation> {
    let invitation = get_by_token(&mut *conn, token).await?;
    if !invitation.is_valid(now) {
        warn!(invitation_id = invitation.id, "Convite expirado ou já utilizado");
        return Err(CareError::invalid("Este convite expirou ou já foi utilizado"));
    }

    let username = signup.username.trim();
    if username.is_empty() {
        return Err(CareError::invalid("O nome de usuário é obrigatório"));
    }
    accounts::validate_new_password(&signup.password1, &signup.password2)?;

    let mut tx = conn.begin().await?;

    // Marca primeiro: um segundo aceite concorrente não encontra a linha pendente
    let claimed = sqlx::query(
        "UPDATE invitations SET is_accepted = 1, accepted_at = ? WHERE id = ? AND is_accepted = 0",
    )
    .bind(now)
    .bind(invitation.id)
    .execute(&mut *tx)
    .await?;
    if claimed.rows_affected() == 0 {
        return Err(CareError::invalid("Este convite expirou ou já foi utilizado"));
    }

    let account = accounts::create_account(
        &mut *tx,
        username,
        &invitation.email,
        &signup.password1,
        now,
    )
    .await?;

    let clinician = clinicians::create_clinician(
        &mut *tx,
        &NewClinician {
            account_id: Some(account.id),
            first_name: non_empty(&signup.first_name, &invitation.first_name).to_string(),
            last_name: non_empty(&signup.last_name, &invitation.last_name).to_string(),
            email: invitation.email.clone(),
            ..NewClinician::default()
        },
        now,
    )
    .await?;

    let mut request = GrantRequest::new(ConsentFlags::all_granted(), AccessLevel::Full);
    request.granted_by = Some(invitation.patient_id);
    let grant = access::grant_or_update(&mut *tx, invitation.patient_id, clinician.id, &request, now)
        .await?
        .into_grant();

    tx.commit().await?;

    info!(
        invitation_id = invitation.id,
        clinician_id = clinician.id,
        patient_id = invitation.patient_id,
        "Convite aceito"
    );
    Ok(AcceptedInvitation {
        account,
        clinician,
        grant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataCategory;
    use crate::test_support::{insert_patient, temp_db};

    fn signup(username: &str) -> ClinicianSignup {
        ClinicianSignup {
            username: username.to_string(),
            password1: "correct-horse".to_string(),
            password2: "correct-horse".to_string(),
            first_name: String::new(),
            last_name: "House".to_string(),
        }
    }

    async fn invite(conn: &mut SqliteConnection, patient_id: i64, now: DateTime<Utc>) -> Invitation {
        create_invitation(
            conn,
            patient_id,
            &NewInvitation {
                email: "greg@clinic.example.com".to_string(),
                first_name: "Greg".to_string(),
                ..NewInvitation::default()
            },
            now,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_invitation_expires_after_thirty_days() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();

        let invitation = invite(&mut conn, patient, now).await;
        assert!(invitation.is_valid(now));
        assert!(invitation.is_valid(now + Duration::days(29)));
        assert!(!invitation.is_valid(now + Duration::days(31)));
    }

    #[tokio::test]
    async fn test_invalid_email_is_rejected() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let result = create_invitation(
            &mut conn,
            patient,
            &NewInvitation {
                email: "not-an-email".to_string(),
                ..NewInvitation::default()
            },
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(CareError::Validation(_))));
    }

    #[tokio::test]
    async fn test_accept_creates_clinician_and_full_grant() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();
        let invitation = invite(&mut conn, patient, now).await;

        let accepted = accept_invitation(&mut conn, invitation.token, &signup("drhouse"), now)
            .await
            .unwrap();

        assert_eq!(accepted.clinician.practitioner_code.len(), 5);
        assert_eq!(accepted.clinician.first_name, "Greg");
        assert_eq!(accepted.clinician.account_id, Some(accepted.account.id));
        assert_eq!(accepted.grant.access_level, AccessLevel::Full);
        assert!(accepted.grant.is_active());
        for category in DataCategory::ALL {
            assert!(accepted.grant.consent.allows(category));
        }

        let stored = get_by_token(&mut conn, invitation.token).await.unwrap();
        assert!(stored.is_accepted);
        assert!(stored.accepted_at.is_some());
    }

    #[tokio::test]
    async fn test_second_acceptance_fails_without_side_effects() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();
        let invitation = invite(&mut conn, patient, now).await;

        accept_invitation(&mut conn, invitation.token, &signup("first"), now)
            .await
            .unwrap();
        let again = accept_invitation(&mut conn, invitation.token, &signup("second"), now).await;
        assert!(matches!(again, Err(CareError::Validation(_))));

        let clinicians: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clinicians")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(clinicians, 1);
        assert!(!accounts::username_taken(&mut conn, "second").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_signup_leaves_invitation_pending() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();
        let invitation = invite(&mut conn, patient, now).await;

        // Nome de usuário já usado pelo paciente
        let result = accept_invitation(&mut conn, invitation.token, &signup("patient"), now).await;
        assert!(matches!(result, Err(CareError::Validation(_))));
        assert!(get_by_token(&mut conn, invitation.token).await.unwrap().is_valid(now));

        let mut mismatch = signup("drhouse");
        mismatch.password2 = "something-else".to_string();
        assert!(matches!(
            accept_invitation(&mut conn, invitation.token, &mismatch, now).await,
            Err(CareError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_invitation_cannot_be_accepted() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let mut conn = db.pool.acquire().await.unwrap();
        let created = Utc::now() - Duration::days(40);
        let invitation = invite(&mut conn, patient, created).await;

        let result = accept_invitation(&mut conn, invitation.token, &signup("late"), Utc::now()).await;
        assert!(matches!(result, Err(CareError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let db = temp_db().await;
        let mut conn = db.pool.acquire().await.unwrap();
        assert!(matches!(
            get_by_token(&mut conn, Uuid::new_v4()).await,
            Err(CareError::NotFound(_))
        ));
    }
}
