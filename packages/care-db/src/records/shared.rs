//! Visões compartilhadas: o registro do paciente visto pelo profissional,
//! o painel do profissional e a lista de vínculos vista pelo paciente

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use super::allergies::{self, Allergy};
use super::conditions::{self, Condition};
use super::feedback::{self, HealthcareFeedback};
use super::medications::{self, Medication};
use super::profile::{self, EmergencyContact, PersonalInfo};
use super::work_history::{self, WorkHistory};
use crate::access;
use crate::assessments::{self, Assessment};
use crate::clinicians;
use crate::error::{CareError, CareResult};
use crate::measures::{self, ObjectiveMeasures};
use crate::models::{AccessGrant, DataCategory, Operation};

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentView {
    #[serde(flatten)]
    pub assessment: Assessment,
    pub objective_measures: Option<ObjectiveMeasures>,
}

/// Registro do paciente filtrado pelo consentimento.
///
/// `None` significa categoria não consentida; lista vazia significa
/// categoria consentida sem registros.
#[derive(Debug, Clone, Serialize)]
pub struct SharedRecord {
    pub patient_id: i64,
    pub grant: AccessGrant,
    pub personal_info: Option<PersonalInfo>,
    pub emergency_contact: Option<EmergencyContact>,
    pub medications: Option<Vec<Medication>>,
    pub conditions: Option<Vec<Condition>>,
    pub allergies: Option<Vec<Allergy>>,
    pub assessments: Option<Vec<AssessmentView>>,
    pub work_history: Option<Vec<WorkHistory>>,
    pub feedback: Option<Vec<HealthcareFeedback>>,
}

async fn grant_in_force(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    patient_id: i64,
    now: DateTime<Utc>,
) -> CareResult<AccessGrant> {
    match access::get_grant(conn, patient_id, clinician_id).await? {
        Some(grant) if grant.is_in_force(now) => Ok(grant),
        _ => {
            warn!(clinician_id, patient_id, "Registro compartilhado sem vínculo em vigor");
            Err(CareError::denied("Você não tem acesso aos registros deste paciente"))
        }
    }
}

async fn assessment_views(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<Vec<AssessmentView>> {
    let mut views = Vec::new();
    for assessment in assessments::list_for_patient(&mut *conn, patient_id).await? {
        let objective_measures = measures::get_objective_measures(&mut *conn, assessment.id).await?;
        views.push(AssessmentView {
            assessment,
            objective_measures,
        });
    }
    Ok(views)
}

/// Carrega o registro do paciente para o profissional, categoria por categoria
pub async fn load_shared_record(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    patient_id: i64,
    now: DateTime<Utc>,
) -> CareResult<SharedRecord> {
    let grant = grant_in_force(&mut *conn, clinician_id, patient_id, now).await?;
    let allows = |category| grant.permits(category, Operation::Read, now);

    let profile = if allows(DataCategory::PersonalInfo) || allows(DataCategory::EmergencyContacts) {
        Some(profile::get_profile(&mut *conn, patient_id).await?)
    } else {
        None
    };
    let (personal_info, emergency_contact) = match profile {
        Some(profile) => (
            allows(DataCategory::PersonalInfo).then_some(profile.personal_info),
            allows(DataCategory::EmergencyContacts).then_some(profile.emergency_contact),
        ),
        None => (None, None),
    };

    let medications = if allows(DataCategory::Medications) {
        Some(medications::list(&mut *conn, patient_id).await?)
    } else {
        None
    };
    let conditions = if allows(DataCategory::Conditions) {
        Some(conditions::list(&mut *conn, patient_id).await?)
    } else {
        None
    };
    let allergies = if allows(DataCategory::Allergies) {
        Some(allergies::list(&mut *conn, patient_id).await?)
    } else {
        None
    };
    let assessments = if allows(DataCategory::Symptoms) {
        Some(assessment_views(&mut *conn, patient_id).await?)
    } else {
        None
    };
    let work_history = if allows(DataCategory::WorkHistory) {
        Some(work_history::list(&mut *conn, patient_id).await?)
    } else {
        None
    };
    let feedback = if allows(DataCategory::Feedback) {
        Some(feedback::list_shareable(&mut *conn, patient_id).await?)
    } else {
        None
    };

    debug!(
        clinician_id,
        patient_id,
        categories = grant.consent.granted().len(),
        "Registro compartilhado carregado"
    );
    Ok(SharedRecord {
        patient_id,
        grant,
        personal_info,
        emergency_contact,
        medications,
        conditions,
        allergies,
        assessments,
        work_history,
        feedback,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardPatient {
    pub patient_id: i64,
    pub username: String,
    pub grant: AccessGrant,
    /// `None` quando o paciente não consentiu sintomas e avaliações
    pub assessments: Option<Vec<Assessment>>,
}

/// Pacientes com vínculo em vigor para o profissional
pub async fn clinician_dashboard(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    now: DateTime<Utc>,
) -> CareResult<Vec<DashboardPatient>> {
    let grants = access::list_clinician_grants(&mut *conn, clinician_id, now).await?;
    let mut patients = Vec::with_capacity(grants.len());
    for grant in grants {
        let username: String = sqlx::query_scalar("SELECT username FROM accounts WHERE id = ?")
            .bind(grant.patient_id)
            .fetch_one(&mut *conn)
            .await?;
        let assessments = if grant.permits(DataCategory::Symptoms, Operation::Read, now) {
            Some(assessments::list_for_patient(&mut *conn, grant.patient_id).await?)
        } else {
            None
        };
        patients.push(DashboardPatient {
            patient_id: grant.patient_id,
            username,
            grant,
            assessments,
        });
    }
    Ok(patients)
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientConnection {
    pub clinician_id: i64,
    pub clinician_name: String,
    pub practitioner_code: String,
    pub grant: AccessGrant,
}

/// Vínculos do paciente, inclusive revogados, com o nome do profissional
pub async fn patient_connections(
    conn: &mut SqliteConnection,
    patient_id: i64,
) -> CareResult<Vec<PatientConnection>> {
    let grants = access::list_patient_grants(&mut *conn, patient_id).await?;
    let mut connections = Vec::with_capacity(grants.len());
    for grant in grants {
        let clinician = clinicians::get_clinician(&mut *conn, grant.clinician_id).await?;
        connections.push(PatientConnection {
            clinician_id: clinician.id,
            clinician_name: clinician.display_name(),
            practitioner_code: clinician.practitioner_code,
            grant,
        });
    }
    Ok(connections)
}
