//! Vínculos de acesso paciente↔profissional e portão de consentimento
//!
//! Um vínculo é único por par (paciente, profissional). Revogar apenas muda o
//! estado para `revoked`; a linha é preservada para auditoria. Conceder de
//! novo reativa a mesma linha e sobrescreve as flags de consentimento.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

use crate::accounts;
use crate::clinicians;
use crate::error::{CareError, CareResult, DbError};
use crate::models::{
    AccessGrant, AccessLevel, Clinician, ConsentFlags, DataCategory, GrantStatus, Operation,
};
use crate::practitioner_code::normalize_code;

/// Parâmetros de uma concessão (nova ou renovada)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    #[serde(default)]
    pub consent: ConsentFlags,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub granted_by: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

impl GrantRequest {
    pub fn new(consent: ConsentFlags, access_level: AccessLevel) -> Self {
        Self {
            consent,
            access_level,
            expires_at: None,
            granted_by: None,
            notes: String::new(),
        }
    }
}

/// Resultado de `grant_or_update`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "grant", rename_all = "snake_case")]
pub enum GrantOutcome {
    Created(AccessGrant),
    Updated(AccessGrant),
}

impl GrantOutcome {
    pub fn grant(&self) -> &AccessGrant {
        match self {
            GrantOutcome::Created(grant) | GrantOutcome::Updated(grant) => grant,
        }
    }

    pub fn into_grant(self) -> AccessGrant {
        match self {
            GrantOutcome::Created(grant) | GrantOutcome::Updated(grant) => grant,
        }
    }
}

pub async fn get_grant(
    conn: &mut SqliteConnection,
    patient_id: i64,
    clinician_id: i64,
) -> CareResult<Option<AccessGrant>> {
    let grant = sqlx::query_as::<_, AccessGrant>(
        "SELECT * FROM access_grants WHERE patient_id = ? AND clinician_id = ?",
    )
    .bind(patient_id)
    .bind(clinician_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(grant)
}

/// Cria o vínculo ou, se já existir, reativa e sobrescreve o consentimento.
///
/// Executa em uma única transação. Uma violação de unicidade na inserção
/// (concessão concorrente para o mesmo par) vira atualização.
pub async fn grant_or_update(
    conn: &mut SqliteConnection,
    patient_id: i64,
    clinician_id: i64,
    request: &GrantRequest,
    now: DateTime<Utc>,
) -> CareResult<GrantOutcome> {
    accounts::ensure_patient(&mut *conn, patient_id).await?;
    clinicians::get_clinician(&mut *conn, clinician_id).await?;

    let mut tx = conn.begin().await?;
    let consent = &request.consent;

    let inserted = sqlx::query(
        r#"
        INSERT INTO access_grants (
            patient_id, clinician_id, granted_by, access_level, status,
            consent_medications, consent_conditions, consent_allergies, consent_symptoms,
            consent_personal_info, consent_emergency_contacts, consent_work_history, consent_feedback,
            consent_given_at, granted_at, expires_at, notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(clinician_id)
    .bind(request.granted_by)
    .bind(request.access_level.as_str())
    .bind(GrantStatus::Active.as_str())
    .bind(consent.medications)
    .bind(consent.conditions)
    .bind(consent.allergies)
    .bind(consent.symptoms)
    .bind(consent.personal_info)
    .bind(consent.emergency_contacts)
    .bind(consent.work_history)
    .bind(consent.feedback)
    .bind(now)
    .bind(now)
    .bind(request.expires_at)
    .bind(&request.notes)
    .execute(&mut *tx)
    .await;

    let created = match inserted {
        Ok(_) => true,
        Err(e) => match DbError::from(e) {
            DbError::ConstraintViolation(_) => {
                debug!(patient_id, clinician_id, "Vínculo já existe, atualizando");
                let status = GrantStatus::Revoked.reactivate();
                sqlx::query(
                    r#"
                    UPDATE access_grants SET
                        access_level = ?, status = ?,
                        consent_medications = ?, consent_conditions = ?, consent_allergies = ?,
                        consent_symptoms = ?, consent_personal_info = ?, consent_emergency_contacts = ?,
                        consent_work_history = ?, consent_feedback = ?,
                        consent_given_at = ?, expires_at = ?, revoked_at = NULL,
                        granted_by = COALESCE(?, granted_by), notes = ?
                    WHERE patient_id = ? AND clinician_id = ?
                    "#,
                )
                .bind(request.access_level.as_str())
                .bind(status.as_str())
                .bind(consent.medications)
                .bind(consent.conditions)
                .bind(consent.allergies)
                .bind(consent.symptoms)
                .bind(consent.personal_info)
                .bind(consent.emergency_contacts)
                .bind(consent.work_history)
                .bind(consent.feedback)
                .bind(now)
                .bind(request.expires_at)
                .bind(request.granted_by)
                .bind(&request.notes)
                .bind(patient_id)
                .bind(clinician_id)
                .execute(&mut *tx)
                .await?;
                false
            }
            other => return Err(CareError::Database(other)),
        },
    };

    let grant = get_grant(&mut *tx, patient_id, clinician_id)
        .await?
        .ok_or_else(|| CareError::not_found("Vínculo de acesso"))?;
    tx.commit().await?;

    info!(
        patient_id,
        clinician_id,
        access_level = %grant.access_level,
        created,
        "Consentimento registrado"
    );
    Ok(if created {
        GrantOutcome::Created(grant)
    } else {
        GrantOutcome::Updated(grant)
    })
}

/// Revoga o vínculo sem apagar a linha. Revogar de novo não altera nada.
pub async fn revoke(
    conn: &mut SqliteConnection,
    patient_id: i64,
    clinician_id: i64,
    now: DateTime<Utc>,
) -> CareResult<AccessGrant> {
    let grant = get_grant(&mut *conn, patient_id, clinician_id)
        .await?
        .ok_or_else(|| CareError::not_found("Vínculo de acesso"))?;

    if !grant.is_active() {
        return Ok(grant);
    }

    let status = grant.status.revoke();
    sqlx::query(
        "UPDATE access_grants SET status = ?, revoked_at = ? WHERE patient_id = ? AND clinician_id = ?",
    )
    .bind(status.as_str())
    .bind(now)
    .bind(patient_id)
    .bind(clinician_id)
    .execute(&mut *conn)
    .await?;

    info!(patient_id, clinician_id, "Acesso revogado");
    get_grant(conn, patient_id, clinician_id)
        .await?
        .ok_or_else(|| CareError::not_found("Vínculo de acesso"))
}

/// Verdadeiro se existe vínculo ativo, não expirado, com a categoria consentida
pub async fn can_access(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    patient_id: i64,
    category: DataCategory,
    now: DateTime<Utc>,
) -> CareResult<bool> {
    let grant = get_grant(conn, patient_id, clinician_id).await?;
    Ok(grant
        .map(|g| g.permits(category, Operation::Read, now))
        .unwrap_or(false))
}

/// Variante de `can_access` que devolve o vínculo ou o motivo da recusa
pub async fn require_access(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    patient_id: i64,
    category: DataCategory,
    operation: Operation,
    now: DateTime<Utc>,
) -> CareResult<AccessGrant> {
    let grant = match get_grant(conn, patient_id, clinician_id).await? {
        Some(grant) => grant,
        None => {
            warn!(clinician_id, patient_id, %category, "Acesso sem vínculo recusado");
            return Err(CareError::denied("Você não tem acesso aos registros deste paciente"));
        }
    };

    if grant.permits(category, operation, now) {
        return Ok(grant);
    }

    let reason = if !grant.is_active() {
        "O paciente revogou o seu acesso".to_string()
    } else if grant.is_expired(now) {
        "O seu acesso a este paciente expirou".to_string()
    } else if !grant.consent.allows(category) {
        format!("O paciente não consentiu o compartilhamento de {}", category)
    } else {
        "O seu nível de acesso não permite alterar os registros deste paciente".to_string()
    };
    warn!(clinician_id, patient_id, %category, ?operation, "Acesso recusado pelo portão de consentimento");
    Err(CareError::PermissionDenied(reason))
}

/// Primeira etapa do resgate por código
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "clinician", rename_all = "snake_case")]
pub enum RedemptionPreview {
    /// Já existe vínculo ativo; nada a fazer
    AlreadyConnected(Clinician),
    /// Apresentar a seleção de consentimento antes de conceder
    ConsentRequired(Clinician),
}

/// Resultado do resgate confirmado
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RedemptionOutcome {
    AlreadyConnected { grant: AccessGrant },
    Granted { outcome: GrantOutcome },
}

async fn lookup_code(conn: &mut SqliteConnection, code: &str) -> CareResult<Clinician> {
    let code = normalize_code(code)?;
    clinicians::find_by_code(conn, &code)
        .await?
        .ok_or_else(|| CareError::not_found("Nenhum profissional encontrado com este código"))
}

fn already_connected(grant: Option<&AccessGrant>, now: DateTime<Utc>) -> bool {
    grant.map(|g| g.is_in_force(now)).unwrap_or(false)
}

/// Consulta o profissional pelo código e informa se o consentimento precisa ser coletado
pub async fn preview_redemption(
    conn: &mut SqliteConnection,
    patient_id: i64,
    code: &str,
    now: DateTime<Utc>,
) -> CareResult<RedemptionPreview> {
    let clinician = lookup_code(&mut *conn, code).await?;
    let grant = get_grant(conn, patient_id, clinician.id).await?;
    Ok(if already_connected(grant.as_ref(), now) {
        RedemptionPreview::AlreadyConnected(clinician)
    } else {
        RedemptionPreview::ConsentRequired(clinician)
    })
}

/// Resgata o código com as flags escolhidas pelo paciente; concede acesso completo
pub async fn redeem_code(
    conn: &mut SqliteConnection,
    patient_id: i64,
    code: &str,
    consent: ConsentFlags,
    now: DateTime<Utc>,
) -> CareResult<RedemptionOutcome> {
    let clinician = lookup_code(&mut *conn, code).await?;
    if let Some(grant) = get_grant(&mut *conn, patient_id, clinician.id).await? {
        // Vínculo em vigor não muda pelo código; as flags são alteradas por `grant_or_update`
        if already_connected(Some(&grant), now) {
            info!(patient_id, clinician_id = clinician.id, "Paciente já conectado ao profissional");
            return Ok(RedemptionOutcome::AlreadyConnected { grant });
        }
    }

    let mut request = GrantRequest::new(consent, AccessLevel::Full);
    request.granted_by = Some(patient_id);
    let outcome = grant_or_update(conn, patient_id, clinician.id, &request, now).await?;
    Ok(RedemptionOutcome::Granted { outcome })
}

/// Vínculos em vigor de um profissional, mais recentes primeiro
pub async fn list_clinician_grants(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    now: DateTime<Utc>,
) -> CareResult<Vec<AccessGrant>> {
    let grants = sqlx::query_as::<_, AccessGrant>(
        "SELECT * FROM access_grants WHERE clinician_id = ? AND status = 'active' ORDER BY granted_at DESC",
    )
    .bind(clinician_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(grants.into_iter().filter(|g| !g.is_expired(now)).collect())
}

/// Todos os vínculos do paciente, inclusive revogados
pub async fn list_patient_grants(
    conn: &mut SqliteConnection,
    patient_id: i64,
) -> CareResult<Vec<AccessGrant>> {
    let grants = sqlx::query_as::<_, AccessGrant>(
        "SELECT * FROM access_grants WHERE patient_id = ? ORDER BY granted_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(grants)
}
