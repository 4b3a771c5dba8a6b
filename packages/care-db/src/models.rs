//! Modelos de dados compartilhados entre aplicações
//!
//! Este módulo define as identidades (conta, paciente, profissional), o vínculo
//! de acesso paciente↔profissional com suas flags de consentimento e os convites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CareError, CareResult};

/// Decodifica uma coluna textual em um enum, no formato de erro do SQLx
pub(crate) fn decode_enum<T>(row: &SqliteRow, column: &str) -> sqlx::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|message| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    })
}

/// Papel do usuário autenticado, resolvido uma única vez por requisição
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum UserRole {
    /// Conta sem perfil profissional; o id do paciente é o id da conta
    Patient { patient_id: i64 },
    /// Conta vinculada a um perfil de profissional
    Clinician { clinician_id: i64 },
}

/// Contexto explícito da requisição, passado pela cadeia de chamadas
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub account_id: i64,
    pub role: UserRole,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    pub fn require_patient(&self) -> CareResult<i64> {
        match self.role {
            UserRole::Patient { patient_id } => Ok(patient_id),
            UserRole::Clinician { .. } => Err(CareError::denied(
                "Operação disponível apenas para pacientes",
            )),
        }
    }

    pub fn require_clinician(&self) -> CareResult<i64> {
        match self.role {
            UserRole::Clinician { clinician_id } => Ok(clinician_id),
            UserRole::Patient { .. } => Err(CareError::denied(
                "Você precisa ser um profissional cadastrado para acessar esta página",
            )),
        }
    }
}

/// Conta de login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Account {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Categorias de dados do paciente, uma por flag de consentimento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Medications,
    Conditions,
    Allergies,
    /// Sintomas e avaliações
    Symptoms,
    PersonalInfo,
    EmergencyContacts,
    WorkHistory,
    Feedback,
}

impl DataCategory {
    pub const ALL: [DataCategory; 8] = [
        DataCategory::Medications,
        DataCategory::Conditions,
        DataCategory::Allergies,
        DataCategory::Symptoms,
        DataCategory::PersonalInfo,
        DataCategory::EmergencyContacts,
        DataCategory::WorkHistory,
        DataCategory::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Medications => "medications",
            DataCategory::Conditions => "conditions",
            DataCategory::Allergies => "allergies",
            DataCategory::Symptoms => "symptoms",
            DataCategory::PersonalInfo => "personal_info",
            DataCategory::EmergencyContacts => "emergency_contacts",
            DataCategory::WorkHistory => "work_history",
            DataCategory::Feedback => "feedback",
        }
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tipo de operação que o profissional pretende executar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Flags de consentimento por categoria; todas concedidas por padrão
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentFlags {
    pub medications: bool,
    pub conditions: bool,
    pub allergies: bool,
    pub symptoms: bool,
    pub personal_info: bool,
    pub emergency_contacts: bool,
    pub work_history: bool,
    pub feedback: bool,
}

impl Default for ConsentFlags {
    fn default() -> Self {
        Self::all_granted()
    }
}

impl ConsentFlags {
    pub fn all_granted() -> Self {
        Self {
            medications: true,
            conditions: true,
            allergies: true,
            symptoms: true,
            personal_info: true,
            emergency_contacts: true,
            work_history: true,
            feedback: true,
        }
    }

    pub fn none_granted() -> Self {
        Self {
            medications: false,
            conditions: false,
            allergies: false,
            symptoms: false,
            personal_info: false,
            emergency_contacts: false,
            work_history: false,
            feedback: false,
        }
    }

    pub fn allows(&self, category: DataCategory) -> bool {
        match category {
            DataCategory::Medications => self.medications,
            DataCategory::Conditions => self.conditions,
            DataCategory::Allergies => self.allergies,
            DataCategory::Symptoms => self.symptoms,
            DataCategory::PersonalInfo => self.personal_info,
            DataCategory::EmergencyContacts => self.emergency_contacts,
            DataCategory::WorkHistory => self.work_history,
            DataCategory::Feedback => self.feedback,
        }
    }

    /// Categorias liberadas, na ordem de `DataCategory::ALL`
    pub fn granted(&self) -> Vec<DataCategory> {
        DataCategory::ALL
            .iter()
            .copied()
            .filter(|category| self.allows(*category))
            .collect()
    }
}

/// Nível de acesso do vínculo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Full,
    ReadOnly,
    Emergency,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Full => "full",
            AccessLevel::ReadOnly => "read_only",
            AccessLevel::Emergency => "emergency",
        }
    }

    /// Somente acesso completo permite gravar em nome do paciente
    pub fn permits_write(&self) -> bool {
        matches!(self, AccessLevel::Full)
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(AccessLevel::Full),
            "read_only" => Ok(AccessLevel::ReadOnly),
            "emergency" => Ok(AccessLevel::Emergency),
            other => Err(format!("Nível de acesso inválido: {}", other)),
        }
    }
}

/// Estado do vínculo; vínculos nunca são apagados, apenas revogados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Revoked => "revoked",
        }
    }

    pub fn revoke(self) -> Self {
        GrantStatus::Revoked
    }

    pub fn reactivate(self) -> Self {
        GrantStatus::Active
    }
}

impl FromStr for GrantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(GrantStatus::Active),
            "revoked" => Ok(GrantStatus::Revoked),
            other => Err(format!("Estado de vínculo inválido: {}", other)),
        }
    }
}

/// Vínculo de acesso entre paciente e profissional
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: i64,
    /// Paciente cujos registros são compartilhados
    pub patient_id: i64,
    /// Profissional que recebe o acesso
    pub clinician_id: i64,
    /// Conta que concedeu o acesso (normalmente o próprio paciente)
    pub granted_by: Option<i64>,
    pub access_level: AccessLevel,
    pub status: GrantStatus,
    pub consent: ConsentFlags,
    pub consent_given_at: DateTime<Utc>,
    pub granted_at: DateTime<Utc>,
    /// Sem data de expiração o vínculo nunca expira
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub notes: String,
}

impl AccessGrant {
    pub fn is_active(&self) -> bool {
        self.status == GrantStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expires| expires <= now).unwrap_or(false)
    }

    /// Vínculo ativo e dentro da validade
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && !self.is_expired(now)
    }

    /// Decisão do portão de consentimento para uma categoria e operação
    pub fn permits(&self, category: DataCategory, operation: Operation, now: DateTime<Utc>) -> bool {
        if !self.is_in_force(now) || !self.consent.allows(category) {
            return false;
        }
        match operation {
            Operation::Read => true,
            Operation::Write => self.access_level.permits_write(),
        }
    }
}

impl FromRow<'_, SqliteRow> for AccessGrant {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            clinician_id: row.try_get("clinician_id")?,
            granted_by: row.try_get("granted_by")?,
            access_level: decode_enum(row, "access_level")?,
            status: decode_enum(row, "status")?,
            consent: ConsentFlags {
                medications: row.try_get("consent_medications")?,
                conditions: row.try_get("consent_conditions")?,
                allergies: row.try_get("consent_allergies")?,
                symptoms: row.try_get("consent_symptoms")?,
                personal_info: row.try_get("consent_personal_info")?,
                emergency_contacts: row.try_get("consent_emergency_contacts")?,
                work_history: row.try_get("consent_work_history")?,
                feedback: row.try_get("consent_feedback")?,
            },
            consent_given_at: row.try_get("consent_given_at")?,
            granted_at: row.try_get("granted_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
            notes: row.try_get("notes")?,
        })
    }
}

/// Título profissional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicianTitle {
    Dr,
    Nurse,
    Physiotherapist,
    Paramedic,
    Specialist,
    Other,
}

impl Default for ClinicianTitle {
    fn default() -> Self {
        ClinicianTitle::Dr
    }
}

impl ClinicianTitle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClinicianTitle::Dr => "dr",
            ClinicianTitle::Nurse => "nurse",
            ClinicianTitle::Physiotherapist => "physiotherapist",
            ClinicianTitle::Paramedic => "paramedic",
            ClinicianTitle::Specialist => "specialist",
            ClinicianTitle::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ClinicianTitle::Dr => "Dr.",
            ClinicianTitle::Nurse => "Nurse",
            ClinicianTitle::Physiotherapist => "Physiotherapist",
            ClinicianTitle::Paramedic => "Paramedic",
            ClinicianTitle::Specialist => "Specialist",
            ClinicianTitle::Other => "Other",
        }
    }
}

impl FromStr for ClinicianTitle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dr" => Ok(ClinicianTitle::Dr),
            "nurse" => Ok(ClinicianTitle::Nurse),
            "physiotherapist" => Ok(ClinicianTitle::Physiotherapist),
            "paramedic" => Ok(ClinicianTitle::Paramedic),
            "specialist" => Ok(ClinicianTitle::Specialist),
            "other" => Ok(ClinicianTitle::Other),
            other => Err(format!("Título inválido: {}", other)),
        }
    }
}

/// Conselho profissional que mantém o registro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationBody {
    #[serde(rename = "GMC")]
    Gmc,
    #[serde(rename = "NMC")]
    Nmc,
    #[serde(rename = "HCPC")]
    Hcpc,
    #[serde(rename = "other")]
    Other,
}

impl RegistrationBody {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationBody::Gmc => "GMC",
            RegistrationBody::Nmc => "NMC",
            RegistrationBody::Hcpc => "HCPC",
            RegistrationBody::Other => "other",
        }
    }
}

impl FromStr for RegistrationBody {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GMC" => Ok(RegistrationBody::Gmc),
            "NMC" => Ok(RegistrationBody::Nmc),
            "HCPC" => Ok(RegistrationBody::Hcpc),
            "other" => Ok(RegistrationBody::Other),
            other => Err(format!("Conselho inválido: {}", other)),
        }
    }
}

/// Situação da verificação do registro profissional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    /// Formato do número válido, pendente de conferência manual
    FormatValid,
    FormatInvalid,
    Verified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::FormatValid => "format_valid",
            VerificationStatus::FormatInvalid => "format_invalid",
            VerificationStatus::Verified => "verified",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(VerificationStatus::Unverified),
            "format_valid" => Ok(VerificationStatus::FormatValid),
            "format_invalid" => Ok(VerificationStatus::FormatInvalid),
            "verified" => Ok(VerificationStatus::Verified),
            other => Err(format!("Situação de verificação inválida: {}", other)),
        }
    }
}

/// Perfil do profissional de saúde
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinician {
    pub id: i64,
    /// Conta de login, quando o profissional tem acesso ao sistema
    pub account_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub title: ClinicianTitle,
    pub registration_body: Option<RegistrationBody>,
    pub registration_number: String,
    pub verification_status: VerificationStatus,
    pub speciality: String,
    pub organisation: String,
    pub email: String,
    pub phone: String,
    /// Código de 5 caracteres gerado na criação; imutável
    pub practitioner_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clinician {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.title.display_name(), self.full_name())
    }

    pub fn is_physiotherapist(&self) -> bool {
        self.title == ClinicianTitle::Physiotherapist
    }
}

impl FromRow<'_, SqliteRow> for Clinician {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let registration_body = match row.try_get::<Option<String>, _>("registration_body")? {
            Some(raw) => Some(raw.parse::<RegistrationBody>().map_err(|message| {
                sqlx::Error::ColumnDecode {
                    index: "registration_body".to_string(),
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        message,
                    )),
                }
            })?),
            None => None,
        };
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            title: decode_enum(row, "title")?,
            registration_body,
            registration_number: row.try_get("registration_number")?,
            verification_status: decode_enum(row, "verification_status")?,
            speciality: row.try_get("speciality")?,
            organisation: row.try_get("organisation")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            practitioner_code: row.try_get("practitioner_code")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Convite enviado por um paciente a um profissional por e-mail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: i64,
    pub patient_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub notes: String,
    pub token: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Convite ainda utilizável: não aceito e não expirado
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_accepted && self.expires_at > now
    }
}

impl FromRow<'_, SqliteRow> for Invitation {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let token: String = row.try_get("token")?;
        let token = Uuid::parse_str(&token).map_err(|e| sqlx::Error::ColumnDecode {
            index: "token".to_string(),
            source: Box::new(e),
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            notes: row.try_get("notes")?,
            token,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            is_accepted: row.try_get("is_accepted")?,
            accepted_at: row.try_get("accepted_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(now: DateTime<Utc>) -> AccessGrant {
        AccessGrant {
            id: 1,
            patient_id: 10,
            clinician_id: 20,
            granted_by: Some(10),
            access_level: AccessLevel::Full,
            status: GrantStatus::Active,
            consent: ConsentFlags::all_granted(),
            consent_given_at: now,
            granted_at: now,
            expires_at: None,
            revoked_at: None,
            notes: String::new(),
        }
    }

    #[test]
    fn test_grant_without_expiry_never_expires() {
        let now = Utc::now();
        let g = grant(now);
        assert!(g.permits(DataCategory::Medications, Operation::Read, now + Duration::days(3650)));
    }

    #[test]
    fn test_grant_denies_when_revoked_expired_or_withheld() {
        let now = Utc::now();

        let mut revoked = grant(now);
        revoked.status = revoked.status.revoke();
        assert!(!revoked.permits(DataCategory::Medications, Operation::Read, now));

        let mut expired = grant(now);
        expired.expires_at = Some(now - Duration::minutes(1));
        assert!(!expired.permits(DataCategory::Medications, Operation::Read, now));

        let mut withheld = grant(now);
        withheld.consent.medications = false;
        assert!(!withheld.permits(DataCategory::Medications, Operation::Read, now));
        assert!(withheld.permits(DataCategory::Allergies, Operation::Read, now));
    }

    #[test]
    fn test_read_only_grant_cannot_write() {
        let now = Utc::now();
        let mut g = grant(now);
        g.access_level = AccessLevel::ReadOnly;
        assert!(g.permits(DataCategory::Symptoms, Operation::Read, now));
        assert!(!g.permits(DataCategory::Symptoms, Operation::Write, now));
    }

    #[test]
    fn test_consent_flags_default_to_granted() {
        let flags: ConsentFlags = serde_json::from_str(r#"{"feedback": false}"#).unwrap();
        assert!(flags.medications);
        assert!(!flags.feedback);
        assert_eq!(flags.granted().len(), 7);
    }

    #[test]
    fn test_invitation_validity() {
        let now = Utc::now();
        let mut invitation = Invitation {
            id: 1,
            patient_id: 1,
            email: "clinician@example.com".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            notes: String::new(),
            token: Uuid::new_v4(),
            created_at: now,
            expires_at: now - Duration::days(1),
            is_accepted: false,
            accepted_at: None,
        };
        assert!(!invitation.is_valid(now));

        invitation.expires_at = now + Duration::days(30);
        assert!(invitation.is_valid(now));

        invitation.is_accepted = true;
        assert!(!invitation.is_valid(now));
    }
}
