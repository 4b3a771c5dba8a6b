//! Medidas objetivas (amplitude de movimento e força)
//!
//! O formulário envia um campo por movimento, no formato
//! `{articulação}_{movimento}_{rom|strength}_{lado}` (ou sem lado para a coluna).
//! Os valores são agrupados por movimento e gravados como JSON na coluna
//! correspondente. Coluna sem nenhum movimento informado grava `normal`:
//! articulação não examinada é registrada como normal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::{Serialize, Serializer};
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, FromRow, Row, SqliteConnection};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::access;
use crate::assessments;
use crate::error::{CareError, CareResult, DbError};
use crate::models::{DataCategory, Operation};

/// Valor gravado quando nenhum movimento foi informado
pub const NORMAL: &str = "normal";

/// Sentinela do formulário que aponta para o campo `{campo}_free`
pub const FREE_TEXT: &str = "free_text";

/// Graus da escala MRC aceitos para força
pub const MRC_GRADES: [&str; 6] = ["0/5", "1/5", "2/5", "3/5", "4/5", "5/5"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joint {
    Shoulder,
    Elbow,
    Wrist,
    Hand,
    Hip,
    Knee,
    Ankle,
    Foot,
    Cervical,
    Thoracic,
    Lumbar,
}

const SPINE_MOVEMENTS: &[&str] = &[
    "flexion",
    "extension",
    "lateral_flexion_left",
    "lateral_flexion_right",
    "rotation_left",
    "rotation_right",
];

impl Joint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Joint::Shoulder => "shoulder",
            Joint::Elbow => "elbow",
            Joint::Wrist => "wrist",
            Joint::Hand => "hand",
            Joint::Hip => "hip",
            Joint::Knee => "knee",
            Joint::Ankle => "ankle",
            Joint::Foot => "foot",
            Joint::Cervical => "cervical",
            Joint::Thoracic => "thoracic",
            Joint::Lumbar => "lumbar",
        }
    }

    /// Movimentos avaliados; articulações sem movimentos definidos usam `general`
    pub fn movements(&self) -> &'static [&'static str] {
        match self {
            Joint::Shoulder => &[
                "flexion",
                "extension",
                "abduction",
                "internal_rotation",
                "external_rotation",
            ],
            Joint::Elbow | Joint::Knee => &["flexion", "extension"],
            Joint::Wrist => &["flexion", "extension", "radial_deviation", "ulnar_deviation"],
            Joint::Hip => &[
                "flexion",
                "extension",
                "abduction",
                "adduction",
                "internal_rotation",
                "external_rotation",
            ],
            Joint::Ankle => &["dorsiflexion", "plantarflexion", "inversion", "eversion"],
            Joint::Cervical | Joint::Lumbar => SPINE_MOVEMENTS,
            Joint::Hand | Joint::Foot | Joint::Thoracic => &["general"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureKind {
    Rom,
    Strength,
}

impl MeasureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureKind::Rom => "rom",
            MeasureKind::Strength => "strength",
        }
    }
}

/// Uma coluna de `objective_measures` e a origem dos seus valores no formulário
#[derive(Debug, Clone, Copy)]
pub struct MeasureColumn {
    pub column: &'static str,
    pub joint: Joint,
    pub kind: MeasureKind,
    pub side: Option<Side>,
}

impl MeasureColumn {
    const fn new(column: &'static str, joint: Joint, kind: MeasureKind, side: Option<Side>) -> Self {
        Self {
            column,
            joint,
            kind,
            side,
        }
    }

    /// Nome do campo do formulário para um movimento desta coluna
    pub fn input_key(&self, movement: &str) -> String {
        match self.side {
            Some(side) => format!(
                "{}_{}_{}_{}",
                self.joint.as_str(),
                movement,
                self.kind.as_str(),
                side.as_str()
            ),
            None => format!("{}_{}_{}", self.joint.as_str(), movement, self.kind.as_str()),
        }
    }
}

use self::Joint::*;
use self::MeasureKind::{Rom, Strength};

const L: Option<Side> = Some(Side::Left);
const R: Option<Side> = Some(Side::Right);

pub const MEASURE_COLUMNS: [MeasureColumn; 34] = [
    MeasureColumn::new("shoulder_rom_left", Shoulder, Rom, L),
    MeasureColumn::new("shoulder_rom_right", Shoulder, Rom, R),
    MeasureColumn::new("elbow_rom_left", Elbow, Rom, L),
    MeasureColumn::new("elbow_rom_right", Elbow, Rom, R),
    MeasureColumn::new("wrist_rom_left", Wrist, Rom, L),
    MeasureColumn::new("wrist_rom_right", Wrist, Rom, R),
    MeasureColumn::new("hand_rom_left", Hand, Rom, L),
    MeasureColumn::new("hand_rom_right", Hand, Rom, R),
    MeasureColumn::new("hip_rom_left", Hip, Rom, L),
    MeasureColumn::new("hip_rom_right", Hip, Rom, R),
    MeasureColumn::new("knee_rom_left", Knee, Rom, L),
    MeasureColumn::new("knee_rom_right", Knee, Rom, R),
    MeasureColumn::new("ankle_rom_left", Ankle, Rom, L),
    MeasureColumn::new("ankle_rom_right", Ankle, Rom, R),
    MeasureColumn::new("foot_rom_left", Foot, Rom, L),
    MeasureColumn::new("foot_rom_right", Foot, Rom, R),
    MeasureColumn::new("cervical_rom", Cervical, Rom, None),
    MeasureColumn::new("thoracic_rom", Thoracic, Rom, None),
    MeasureColumn::new("lumbar_rom", Lumbar, Rom, None),
    MeasureColumn::new("shoulder_power_left", Shoulder, Strength, L),
    MeasureColumn::new("shoulder_power_right", Shoulder, Strength, R),
    MeasureColumn::new("elbow_power_left", Elbow, Strength, L),
    MeasureColumn::new("elbow_power_right", Elbow, Strength, R),
    MeasureColumn::new("wrist_power_left", Wrist, Strength, L),
    MeasureColumn::new("wrist_power_right", Wrist, Strength, R),
    MeasureColumn::new("grip_power_left", Hand, Strength, L),
    MeasureColumn::new("grip_power_right", Hand, Strength, R),
    MeasureColumn::new("hip_power_left", Hip, Strength, L),
    MeasureColumn::new("hip_power_right", Hip, Strength, R),
    MeasureColumn::new("knee_power_left", Knee, Strength, L),
    MeasureColumn::new("knee_power_right", Knee, Strength, R),
    MeasureColumn::new("ankle_power_left", Ankle, Strength, L),
    MeasureColumn::new("ankle_power_right", Ankle, Strength, R),
    MeasureColumn::new("core_power", Lumbar, Strength, None),
];

/// Valor de uma coluna de medida
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasureValue {
    Normal,
    /// Movimento → valor informado
    Movements(BTreeMap<String, String>),
    /// Texto livre gravado por versões anteriores do formulário; somente leitura
    Legacy(String),
}

impl MeasureValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == NORMAL {
            return MeasureValue::Normal;
        }
        if trimmed.starts_with('{') {
            if let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(trimmed) {
                return MeasureValue::Movements(map);
            }
        }
        MeasureValue::Legacy(trimmed.to_string())
    }

    pub fn encode(&self) -> CareResult<String> {
        match self {
            MeasureValue::Normal => Ok(NORMAL.to_string()),
            MeasureValue::Movements(map) => serde_json::to_string(map).map_err(|e| {
                CareError::Database(DbError::InternalError(format!(
                    "Falha ao serializar medidas: {}",
                    e
                )))
            }),
            MeasureValue::Legacy(text) => Ok(text.clone()),
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, MeasureValue::Normal)
    }
}

impl Serialize for MeasureValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MeasureValue::Normal => serializer.serialize_str(NORMAL),
            MeasureValue::Movements(map) => map.serialize(serializer),
            MeasureValue::Legacy(text) => serializer.serialize_str(text),
        }
    }
}

pub type MeasureSet = BTreeMap<&'static str, MeasureValue>;

/// Valor informado para o campo e se ele veio do texto livre `{campo}_free`
fn field_value<'f>(form: &'f HashMap<String, String>, key: &str) -> Option<(&'f str, bool)> {
    let value = form.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())?;
    if value == FREE_TEXT {
        return form
            .get(&format!("{}_free", key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|text| (text, true));
    }
    Some((value, false))
}

/// Agrupa os campos do formulário em um valor por coluna.
///
/// Todas as colunas aparecem no resultado. Força escolhida na lista precisa
/// ser um grau MRC; o texto livre `{campo}_free` é aceito como veio.
pub fn aggregate(form: &HashMap<String, String>) -> CareResult<MeasureSet> {
    let mut set = MeasureSet::new();
    for spec in MEASURE_COLUMNS.iter() {
        let mut movements = BTreeMap::new();
        for movement in spec.joint.movements() {
            let key = spec.input_key(movement);
            let Some((value, free_text)) = field_value(form, &key) else {
                continue;
            };
            // texto livre clínico dispensa a escala MRC
            if spec.kind == MeasureKind::Strength && !free_text && !MRC_GRADES.contains(&value) {
                return Err(CareError::invalid(format!(
                    "Força inválida em {}: use a escala MRC (0/5 a 5/5)",
                    key
                )));
            }
            movements.insert((*movement).to_string(), value.to_string());
        }
        let value = if movements.is_empty() {
            MeasureValue::Normal
        } else {
            MeasureValue::Movements(movements)
        };
        set.insert(spec.column, value);
    }
    debug!(
        recorded = set.values().filter(|v| !v.is_normal()).count(),
        "Medidas objetivas agregadas"
    );
    Ok(set)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ObjectiveMeasures {
    pub id: i64,
    pub assessment_id: i64,
    pub clinician_id: i64,
    pub assessment_date: Option<NaiveDate>,
    pub values: MeasureSet,
    pub additional_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectiveMeasures {
    pub fn value(&self, column: &str) -> Option<&MeasureValue> {
        self.values.get(column)
    }
}

impl FromRow<'_, SqliteRow> for ObjectiveMeasures {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let mut values = MeasureSet::new();
        for spec in MEASURE_COLUMNS.iter() {
            let raw: String = row.try_get(spec.column)?;
            values.insert(spec.column, MeasureValue::parse(&raw));
        }
        Ok(Self {
            id: row.try_get("id")?,
            assessment_id: row.try_get("assessment_id")?,
            clinician_id: row.try_get("clinician_id")?,
            assessment_date: row.try_get("assessment_date")?,
            values,
            additional_notes: row.try_get("additional_notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub async fn get_objective_measures(
    conn: &mut SqliteConnection,
    assessment_id: i64,
) -> CareResult<Option<ObjectiveMeasures>> {
    let measures = sqlx::query_as::<_, ObjectiveMeasures>(
        "SELECT * FROM objective_measures WHERE assessment_id = ?",
    )
    .bind(assessment_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(measures)
}

fn insert_sql() -> String {
    let columns: Vec<&str> = MEASURE_COLUMNS.iter().map(|c| c.column).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO objective_measures (assessment_id, clinician_id, assessment_date, {}, additional_notes, created_at, updated_at) \
         VALUES (?, ?, ?, {}, ?, ?, ?)",
        columns.join(", "),
        placeholders
    )
}

fn update_sql() -> String {
    let assignments: Vec<String> = MEASURE_COLUMNS
        .iter()
        .map(|c| format!("{} = ?", c.column))
        .collect();
    format!(
        "UPDATE objective_measures SET {}, additional_notes = ?, updated_at = ? WHERE assessment_id = ?",
        assignments.join(", ")
    )
}

/// Agrega o formulário e grava as medidas da avaliação.
///
/// Exige acesso de escrita aos sintomas do paciente. Medidas já existentes
/// só podem ser alteradas pelo profissional que as registrou.
pub async fn save_objective_measures(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    assessment_id: i64,
    form: &HashMap<String, String>,
    additional_notes: &str,
    now: DateTime<Utc>,
) -> CareResult<ObjectiveMeasures> {
    let assessment = assessments::get_assessment(&mut *conn, assessment_id).await?;
    access::require_access(
        &mut *conn,
        clinician_id,
        assessment.patient_id,
        DataCategory::Symptoms,
        Operation::Write,
        now,
    )
    .await?;

    let set = aggregate(form)?;
    // Mesma ordem das colunas em `insert_sql`/`update_sql`
    let ordered = MEASURE_COLUMNS
        .iter()
        .map(|spec| match set.get(spec.column) {
            Some(value) => value.encode(),
            None => Ok(NORMAL.to_string()),
        })
        .collect::<CareResult<Vec<String>>>()?;

    let mut tx = conn.begin().await?;
    let existing = get_objective_measures(&mut *tx, assessment_id).await?;

    match existing {
        Some(current) if current.clinician_id != clinician_id => {
            warn!(
                clinician_id,
                assessment_id,
                owner = current.clinician_id,
                "Tentativa de alterar medidas de outro profissional"
            );
            return Err(CareError::denied(
                "Somente o profissional que registrou as medidas pode alterá-las",
            ));
        }
        Some(_) => {
            let sql = update_sql();
            let mut query = sqlx::query(&sql);
            for value in &ordered {
                query = query.bind(value);
            }
            query
                .bind(additional_notes.trim())
                .bind(now)
                .bind(assessment_id)
                .execute(&mut *tx)
                .await?;
            info!(clinician_id, assessment_id, "Medidas objetivas atualizadas");
        }
        None => {
            let sql = insert_sql();
            let mut query = sqlx::query(&sql)
                .bind(assessment_id)
                .bind(clinician_id)
                .bind(assessment.assessment_date);
            for value in &ordered {
                query = query.bind(value);
            }
            query
                .bind(additional_notes.trim())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| match DbError::from(e) {
                    DbError::ConstraintViolation(_) => {
                        CareError::invalid("As medidas desta avaliação já foram registradas")
                    }
                    other => CareError::Database(other),
                })?;
            info!(clinician_id, assessment_id, "Medidas objetivas registradas");
        }
    }

    let saved = get_objective_measures(&mut *tx, assessment_id)
        .await?
        .ok_or_else(|| CareError::not_found("Medidas objetivas"))?;
    tx.commit().await?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{grant_or_update, GrantRequest};
    use crate::assessments::{create_clinical_assessment, ClinicalEntry};
    use crate::models::{AccessLevel, ClinicianTitle, ConsentFlags};
    use crate::test_support::{insert_clinician, insert_patient, temp_db};

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_knee_movements_collapse_into_one_column() {
        let set = aggregate(&form(&[
            ("knee_flexion_rom_left", "90"),
            ("knee_extension_rom_left", "0"),
        ]))
        .unwrap();

        let encoded = set["knee_rom_left"].encode().unwrap();
        let decoded: BTreeMap<String, String> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded["flexion"], "90");
        assert_eq!(decoded["extension"], "0");
        assert_eq!(set["knee_rom_right"], MeasureValue::Normal);
    }

    #[test]
    fn test_every_column_defaults_to_normal() {
        let set = aggregate(&HashMap::new()).unwrap();
        assert_eq!(set.len(), MEASURE_COLUMNS.len());
        for value in set.values() {
            assert_eq!(value.encode().unwrap(), NORMAL);
        }
    }

    #[test]
    fn test_blank_values_are_absent() {
        let set = aggregate(&form(&[("hip_flexion_rom_right", "   ")])).unwrap();
        assert!(set["hip_rom_right"].is_normal());
    }

    #[test]
    fn test_free_text_override() {
        let set = aggregate(&form(&[
            ("shoulder_abduction_rom_left", "free_text"),
            ("shoulder_abduction_rom_left_free", "  painful arc 60-120 "),
            ("shoulder_flexion_rom_right", "free_text"),
            ("shoulder_flexion_rom_right_free", "  "),
        ]))
        .unwrap();

        match &set["shoulder_rom_left"] {
            MeasureValue::Movements(map) => assert_eq!(map["abduction"], "painful arc 60-120"),
            other => panic!("valor inesperado: {:?}", other),
        }
        assert!(set["shoulder_rom_right"].is_normal());
    }

    #[test]
    fn test_free_text_override_on_strength() {
        let set = aggregate(&form(&[
            ("knee_flexion_strength_left", "free_text"),
            ("knee_flexion_strength_left_free", "4+/5 limited by pain"),
        ]))
        .unwrap();

        match &set["knee_power_left"] {
            MeasureValue::Movements(map) => assert_eq!(map["flexion"], "4+/5 limited by pain"),
            other => panic!("valor inesperado: {:?}", other),
        }
        assert!(matches!(
            aggregate(&form(&[("knee_flexion_strength_left", "4+/5 limited by pain")])),
            Err(CareError::Validation(_))
        ));
    }

    #[test]
    fn test_strength_requires_mrc_grade() {
        assert!(aggregate(&form(&[("knee_flexion_strength_left", "4/5")])).is_ok());
        assert!(matches!(
            aggregate(&form(&[("knee_flexion_strength_left", "strong")])),
            Err(CareError::Validation(_))
        ));
    }

    #[test]
    fn test_midline_and_grip_columns() {
        let set = aggregate(&form(&[
            ("cervical_rotation_left_rom", "70"),
            ("lumbar_flexion_strength", "5/5"),
            ("hand_general_strength_right", "3/5"),
        ]))
        .unwrap();
        assert!(matches!(&set["cervical_rom"], MeasureValue::Movements(m) if m["rotation_left"] == "70"));
        assert!(matches!(&set["core_power"], MeasureValue::Movements(m) if m["flexion"] == "5/5"));
        assert!(matches!(&set["grip_power_right"], MeasureValue::Movements(m) if m["general"] == "3/5"));
    }

    #[test]
    fn test_parse_tolerates_older_values() {
        assert_eq!(MeasureValue::parse("normal"), MeasureValue::Normal);
        assert_eq!(MeasureValue::parse("120"), MeasureValue::Legacy("120".to_string()));
        assert!(matches!(MeasureValue::parse(r#"{"flexion":"90"}"#), MeasureValue::Movements(_)));
        assert_eq!(
            serde_json::to_value(MeasureValue::Normal).unwrap(),
            serde_json::json!("normal")
        );
    }

    #[tokio::test]
    async fn test_save_and_update_by_owner_only() {
        let db = temp_db().await;
        let patient = insert_patient(&db.pool, "patient").await;
        let physio = insert_clinician(&db.pool, "Ana", ClinicianTitle::Physiotherapist).await;
        let other = insert_clinician(&db.pool, "Bob", ClinicianTitle::Physiotherapist).await;
        let mut conn = db.pool.acquire().await.unwrap();
        let now = Utc::now();

        for clinician in [&physio, &other] {
            grant_or_update(
                &mut conn,
                patient,
                clinician.id,
                &GrantRequest::new(ConsentFlags::all_granted(), AccessLevel::Full),
                now,
            )
            .await
            .unwrap();
        }
        let assessment = create_clinical_assessment(&mut conn, &physio, patient, &ClinicalEntry::default(), now)
            .await
            .unwrap();

        let saved = save_objective_measures(
            &mut conn,
            physio.id,
            assessment.id,
            &form(&[("knee_flexion_rom_left", "90"), ("knee_extension_rom_left", "0")]),
            "Reavaliar em 4 semanas",
            now,
        )
        .await
        .unwrap();
        assert!(matches!(saved.value("knee_rom_left"), Some(MeasureValue::Movements(_))));
        assert_eq!(saved.value("hip_rom_left"), Some(&MeasureValue::Normal));

        let stored: String = sqlx::query_scalar(
            "SELECT knee_rom_left FROM objective_measures WHERE assessment_id = ?",
        )
        .bind(assessment.id)
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        let decoded: BTreeMap<String, String> = serde_json::from_str(&stored).unwrap();
        assert_eq!(decoded["flexion"], "90");

        let updated = save_objective_measures(
            &mut conn,
            physio.id,
            assessment.id,
            &form(&[("knee_flexion_rom_left", "120")]),
            "",
            now,
        )
        .await
        .unwrap();
        assert_eq!(updated.id, saved.id);

        assert!(matches!(
            save_objective_measures(&mut conn, other.id, assessment.id, &HashMap::new(), "", now).await,
            Err(CareError::PermissionDenied(_))
        ));
    }
}
