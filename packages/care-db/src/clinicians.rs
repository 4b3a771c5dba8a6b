//! Perfis de profissionais de saúde
//!
//! Criação (com geração do código de profissional), consulta, atualização do
//! perfil e verificação de formato do número de registro no conselho.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tracing::{info, warn};
use validator::Validate;

use crate::accounts;
use crate::error::{CareError, CareResult, DbError};
use crate::models::{Clinician, ClinicianTitle, RegistrationBody, VerificationStatus};
use crate::practitioner_code::CodeGenerator;

/// Dados para criar um profissional
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewClinician {
    pub account_id: Option<i64>,
    #[validate(length(max = 100))]
    pub first_name: String,
    #[validate(length(max = 100))]
    pub last_name: String,
    pub title: ClinicianTitle,
    pub registration_body: Option<RegistrationBody>,
    #[serde(default)]
    pub registration_number: String,
    #[serde(default)]
    pub speciality: String,
    #[serde(default)]
    pub organisation: String,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// Campos editáveis do perfil; o código do profissional não está entre eles
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClinicianProfileUpdate {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub title: ClinicianTitle,
    pub registration_body: Option<RegistrationBody>,
    #[serde(default)]
    pub registration_number: String,
    #[serde(default)]
    pub speciality: String,
    #[serde(default)]
    pub organisation: String,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// Resultado da checagem de formato do número de registro
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistrationCheck {
    /// `None` significa formato válido, mas sem verificação automática
    pub verified: Option<bool>,
    pub format_valid: bool,
    pub message: String,
    pub register_url: Option<&'static str>,
}

impl RegistrationCheck {
    pub fn status(&self) -> VerificationStatus {
        match (self.verified, self.format_valid) {
            (Some(true), _) => VerificationStatus::Verified,
            (_, true) => VerificationStatus::FormatValid,
            (_, false) => VerificationStatus::FormatInvalid,
        }
    }
}

pub fn register_url(body: RegistrationBody) -> Option<&'static str> {
    match body {
        RegistrationBody::Gmc => Some("https://www.gmc-uk.org/registration-and-licensing/our-registers"),
        RegistrationBody::Nmc => Some("https://www.nmc.org.uk/registration/search-the-register/"),
        RegistrationBody::Hcpc => Some("https://www.hcpc-uk.org/check-the-register/"),
        RegistrationBody::Other => None,
    }
}

pub fn registration_body_name(body: RegistrationBody) -> &'static str {
    match body {
        RegistrationBody::Gmc => "General Medical Council",
        RegistrationBody::Nmc => "Nursing and Midwifery Council",
        RegistrationBody::Hcpc => "Health and Care Professions Council",
        RegistrationBody::Other => "Other Registration Body",
    }
}

/// Valida o formato do número no conselho; a conferência final é manual no site do conselho
pub fn check_registration(
    body: Option<RegistrationBody>,
    number: &str,
    title: Option<ClinicianTitle>,
) -> RegistrationCheck {
    let number = number.trim().to_ascii_uppercase();
    let body = match body {
        Some(body) if !number.is_empty() => body,
        _ => {
            return RegistrationCheck {
                verified: Some(false),
                format_valid: false,
                message: "Conselho e número de registro são obrigatórios".to_string(),
                register_url: None,
            }
        }
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let failure = match body {
        RegistrationBody::Gmc if !(all_digits(&number) && (7..=8).contains(&number.len())) => {
            Some("Números do GMC devem ter 7 ou 8 dígitos")
        }
        RegistrationBody::Nmc if !(all_digits(&number) && number.len() == 8) => {
            Some("O PIN do NMC deve ter 8 dígitos")
        }
        RegistrationBody::Hcpc if title == Some(ClinicianTitle::Physiotherapist) => {
            match number.strip_prefix("PH") {
                Some(rest) if all_digits(rest) => None,
                _ => Some("Registros HCPC de fisioterapeutas começam com \"PH\" seguido de dígitos (ex.: PH12345)"),
            }
        }
        RegistrationBody::Hcpc if number.len() < 4 => {
            Some("Registros HCPC devem ter pelo menos 4 caracteres")
        }
        _ => None,
    };

    match failure {
        Some(message) => RegistrationCheck {
            verified: Some(false),
            format_valid: false,
            message: message.to_string(),
            register_url: register_url(body),
        },
        None => RegistrationCheck {
            verified: None,
            format_valid: true,
            message: format!(
                "Formato válido. Confirme no registro oficial do {}.",
                body.as_str()
            ),
            register_url: register_url(body),
        },
    }
}

/// Cria o profissional gerando um código único a partir da entropia do sistema
pub async fn create_clinician(
    conn: &mut SqliteConnection,
    new: &NewClinician,
    now: DateTime<Utc>,
) -> CareResult<Clinician> {
    let mut rng = StdRng::from_entropy();
    create_clinician_with_rng(conn, new, now, &mut rng).await
}

/// Igual a `create_clinician`, com a fonte de aleatoriedade injetada
pub async fn create_clinician_with_rng<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    new: &NewClinician,
    now: DateTime<Utc>,
    rng: &mut R,
) -> CareResult<Clinician> {
    new.validate()?;

    let verification_status = if new.registration_body.is_some() && !new.registration_number.trim().is_empty() {
        check_registration(new.registration_body, &new.registration_number, Some(new.title)).status()
    } else {
        VerificationStatus::Unverified
    };

    let mut generator = CodeGenerator::new(rng);
    loop {
        let code = generator.next_free(&mut *conn).await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO clinicians (
                account_id, first_name, last_name, title, registration_body, registration_number,
                verification_status, speciality, organisation, email, phone, practitioner_code,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.account_id)
        .bind(new.first_name.trim())
        .bind(new.last_name.trim())
        .bind(new.title.as_str())
        .bind(new.registration_body.map(|b| b.as_str()))
        .bind(new.registration_number.trim().to_ascii_uppercase())
        .bind(verification_status.as_str())
        .bind(&new.speciality)
        .bind(&new.organisation)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&code)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(result) => {
                let id = result.last_insert_rowid();
                info!(clinician_id = id, "Profissional criado com código {}", code);
                return get_clinician(conn, id).await;
            }
            Err(e) => match DbError::from(e) {
                DbError::ConstraintViolation(message) if message.contains("practitioner_code") => {
                    warn!("Colisão de código na inserção, gerando outro");
                    continue;
                }
                DbError::ConstraintViolation(_) => {
                    return Err(CareError::invalid("Esta conta já possui um perfil de profissional"));
                }
                other => return Err(CareError::Database(other)),
            },
        }
    }
}

pub async fn get_clinician(conn: &mut SqliteConnection, clinician_id: i64) -> CareResult<Clinician> {
    sqlx::query_as::<_, Clinician>("SELECT * FROM clinicians WHERE id = ?")
        .bind(clinician_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Profissional"))
}

pub async fn find_by_code(conn: &mut SqliteConnection, code: &str) -> CareResult<Option<Clinician>> {
    let clinician = sqlx::query_as::<_, Clinician>("SELECT * FROM clinicians WHERE practitioner_code = ?")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(clinician)
}

pub async fn find_by_account(conn: &mut SqliteConnection, account_id: i64) -> CareResult<Option<Clinician>> {
    let clinician = sqlx::query_as::<_, Clinician>("SELECT * FROM clinicians WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(clinician)
}

/// Atualiza o perfil sem tocar no código do profissional
pub async fn update_profile(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    update: &ClinicianProfileUpdate,
    now: DateTime<Utc>,
) -> CareResult<Clinician> {
    update.validate()?;
    let verification_status = if update.registration_body.is_some() && !update.registration_number.trim().is_empty() {
        check_registration(update.registration_body, &update.registration_number, Some(update.title)).status()
    } else {
        VerificationStatus::Unverified
    };

    let result = sqlx::query(
        r#"
        UPDATE clinicians SET
            first_name = ?, last_name = ?, title = ?, registration_body = ?, registration_number = ?,
            verification_status = ?, speciality = ?, organisation = ?, email = ?, phone = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(update.first_name.trim())
    .bind(update.last_name.trim())
    .bind(update.title.as_str())
    .bind(update.registration_body.map(|b| b.as_str()))
    .bind(update.registration_number.trim().to_ascii_uppercase())
    .bind(verification_status.as_str())
    .bind(&update.speciality)
    .bind(&update.organisation)
    .bind(&update.email)
    .bind(&update.phone)
    .bind(now)
    .bind(clinician_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CareError::not_found("Profissional"));
    }
    get_clinician(conn, clinician_id).await
}

/// Remove o perfil e, se houver, a conta de login vinculada, na mesma transação
pub async fn delete_clinician(conn: &mut SqliteConnection, clinician_id: i64) -> CareResult<()> {
    let clinician = get_clinician(&mut *conn, clinician_id).await?;
    let mut tx = conn.begin().await?;
    sqlx::query("DELETE FROM clinicians WHERE id = ?")
        .bind(clinician_id)
        .execute(&mut *tx)
        .await?;
    if let Some(account_id) = clinician.account_id {
        accounts::delete_account(&mut *tx, account_id).await?;
    }
    tx.commit().await?;
    info!(clinician_id, "Perfil de profissional removido");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::practitioner_code::CODE_LENGTH;
    use crate::test_support::{insert_clinician, insert_clinician_with_account, temp_db};

    #[tokio::test]
    async fn test_delete_removes_profile_and_account() {
        let db = temp_db().await;
        let clinician = insert_clinician_with_account(&db.pool, "drjohn", ClinicianTitle::Dr).await;
        let mut conn = db.pool.acquire().await.unwrap();

        delete_clinician(&mut conn, clinician.id).await.unwrap();

        assert!(matches!(
            get_clinician(&mut conn, clinician.id).await,
            Err(CareError::NotFound(_))
        ));
        assert!(accounts::find_by_username(&mut conn, "drjohn").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_rolls_back_when_account_removal_fails() {
        let db = temp_db().await;
        let clinician = insert_clinician_with_account(&db.pool, "drjohn", ClinicianTitle::Dr).await;
        let mut conn = db.pool.acquire().await.unwrap();

        // conta removida por fora, sem o cascade, para a segunda remoção falhar
        sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await.unwrap();
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(clinician.account_id)
            .execute(&mut *conn)
            .await
            .unwrap();

        assert!(matches!(
            delete_clinician(&mut conn, clinician.id).await,
            Err(CareError::NotFound(_))
        ));
        let kept = get_clinician(&mut conn, clinician.id).await.unwrap();
        assert_eq!(kept.practitioner_code, clinician.practitioner_code);
    }

    #[tokio::test]
    async fn test_clinician_creation_generates_code() {
        let db = temp_db().await;
        let first = insert_clinician(&db.pool, "John", ClinicianTitle::Dr).await;
        let second = insert_clinician(&db.pool, "Jane", ClinicianTitle::Nurse).await;

        for clinician in [&first, &second] {
            assert_eq!(clinician.practitioner_code.len(), CODE_LENGTH);
            assert!(clinician
                .practitioner_code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
        assert_ne!(first.practitioner_code, second.practitioner_code);
        assert_eq!(first.full_name(), "John Doe");
        assert_eq!(first.display_name(), "Dr. John Doe");
    }

    #[tokio::test]
    async fn test_profile_update_keeps_code() {
        let db = temp_db().await;
        let clinician = insert_clinician(&db.pool, "John", ClinicianTitle::Dr).await;
        let mut conn = db.pool.acquire().await.unwrap();

        let updated = update_profile(
            &mut conn,
            clinician.id,
            &ClinicianProfileUpdate {
                first_name: "Johnny".to_string(),
                last_name: "Doe".to_string(),
                title: ClinicianTitle::Physiotherapist,
                registration_body: Some(RegistrationBody::Hcpc),
                registration_number: "ph12345".to_string(),
                speciality: "MSK".to_string(),
                organisation: String::new(),
                email: "johnny@clinic.example.com".to_string(),
                phone: String::new(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(updated.practitioner_code, clinician.practitioner_code);
        assert_eq!(updated.first_name, "Johnny");
        assert_eq!(updated.registration_number, "PH12345");
        assert_eq!(updated.verification_status, VerificationStatus::FormatValid);
    }

    #[tokio::test]
    async fn test_code_cannot_be_regenerated() {
        let db = temp_db().await;
        let clinician = insert_clinician(&db.pool, "John", ClinicianTitle::Dr).await;

        let result = sqlx::query("UPDATE clinicians SET practitioner_code = 'ZZZZZ' WHERE id = ?")
            .bind(clinician.id)
            .execute(&db.pool)
            .await;
        assert!(result.is_err());

        let mut conn = db.pool.acquire().await.unwrap();
        let reloaded = get_clinician(&mut conn, clinician.id).await.unwrap();
        assert_eq!(reloaded.practitioner_code, clinician.practitioner_code);
    }

    #[tokio::test]
    async fn test_find_by_code() {
        let db = temp_db().await;
        let clinician = insert_clinician(&db.pool, "John", ClinicianTitle::Dr).await;
        let mut conn = db.pool.acquire().await.unwrap();

        let found = find_by_code(&mut conn, &clinician.practitioner_code).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(clinician.id));
        assert!(find_by_code(&mut conn, "-----").await.unwrap().is_none());
    }

    #[test]
    fn test_registration_formats() {
        let gmc = check_registration(Some(RegistrationBody::Gmc), "1234567", None);
        assert!(gmc.format_valid);
        assert_eq!(gmc.verified, None);
        assert_eq!(gmc.status(), VerificationStatus::FormatValid);

        let bad_gmc = check_registration(Some(RegistrationBody::Gmc), "12AB", None);
        assert!(!bad_gmc.format_valid);
        assert_eq!(bad_gmc.status(), VerificationStatus::FormatInvalid);

        assert!(!check_registration(Some(RegistrationBody::Nmc), "1234567", None).format_valid);
        assert!(check_registration(Some(RegistrationBody::Nmc), "12345678", None).format_valid);

        let physio = Some(ClinicianTitle::Physiotherapist);
        assert!(check_registration(Some(RegistrationBody::Hcpc), "ph12345", physio).format_valid);
        assert!(!check_registration(Some(RegistrationBody::Hcpc), "12345", physio).format_valid);
        assert!(!check_registration(Some(RegistrationBody::Hcpc), "AB1", None).format_valid);

        let missing = check_registration(None, "1234567", None);
        assert!(!missing.format_valid);
        assert!(missing.register_url.is_none());
    }
}
