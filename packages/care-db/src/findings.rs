//! Achados extraídos das notas digitalizadas de uma avaliação
//!
//! O serviço de extração devolve texto bruto, tabelas e pares chave-valor.
//! Os achados são derivados do texto linha a linha por palavras-chave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, FromRow, Row, SqliteConnection};
use std::str::FromStr;
use tracing::{debug, info};

use crate::access;
use crate::assessments;
use crate::error::{CareError, CareResult, DbError};
use crate::models::{decode_enum, DataCategory, Operation};

/// Categoria usada quando nenhuma palavra-chave apareceu antes da linha
pub const DEFAULT_CATEGORY: &str = "general";

/// Palavras-chave de categoria, na ordem de precedência
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("assessment", &["assessment", "findings", "evaluation", "examination"]),
    ("diagnosis", &["diagnosis", "diagnoses", "condition", "pathology"]),
    ("treatment", &["treatment", "plan", "intervention", "therapy", "exercise"]),
    ("prognosis", &["prognosis", "outcome", "expectation", "progress"]),
    ("recommendations", &["recommendation", "advice", "suggest", "should"]),
    ("measurements", &["rom", "range of motion", "strength", "power", "degrees"]),
    ("symptoms", &["symptom", "pain", "discomfort", "complaint"]),
];

const MEDICAL_TERMS: &[&str] = &[
    "pain", "stiffness", "weakness", "swelling", "tenderness", "rom", "range", "motion", "flexion",
    "extension", "abduction", "adduction", "strength", "power", "grade", "degrees", "cm", "mm",
    "improved", "worsened", "stable", "normal", "abnormal", "limited", "restricted", "full",
    "partial",
];

const MIN_FINDING_CHARS: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TableCell {
    pub row_index: Option<u32>,
    pub column_index: Option<u32>,
    pub content: String,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentTable {
    pub row_count: u32,
    pub column_count: u32,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// Resultado estruturado da análise de um documento
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentExtraction {
    pub raw_text: String,
    pub tables: Vec<DocumentTable>,
    pub key_value_pairs: Vec<KeyValuePair>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Measurement,
    Strength,
    Symptom,
    Treatment,
    Observation,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingType::Measurement => "measurement",
            FindingType::Strength => "strength",
            FindingType::Symptom => "symptom",
            FindingType::Treatment => "treatment",
            FindingType::Observation => "observation",
        }
    }
}

impl FromStr for FindingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "measurement" => Ok(FindingType::Measurement),
            "strength" => Ok(FindingType::Strength),
            "symptom" => Ok(FindingType::Symptom),
            "treatment" => Ok(FindingType::Treatment),
            "observation" => Ok(FindingType::Observation),
            other => Err(format!("Tipo de achado inválido: {}", other)),
        }
    }
}

/// Achado ainda não persistido
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindingDraft {
    pub category: &'static str,
    pub finding_type: FindingType,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFinding {
    pub id: i64,
    pub assessment_id: i64,
    pub category: String,
    pub finding_type: FindingType,
    pub text: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for ExtractedFinding {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            assessment_id: row.try_get("assessment_id")?,
            category: row.try_get("category")?,
            finding_type: decode_enum(row, "finding_type")?,
            text: row.try_get("text")?,
            is_verified: row.try_get("is_verified")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Linha com termo clínico e mais de 10 caracteres
pub fn is_finding_line(line: &str) -> bool {
    contains_any(&line.to_lowercase(), MEDICAL_TERMS) && line.chars().count() > MIN_FINDING_CHARS
}

pub fn classify_finding_type(text: &str) -> FindingType {
    let lower = text.to_lowercase();
    if contains_any(&lower, &["rom", "range of motion", "flexion", "extension", "degrees"]) {
        FindingType::Measurement
    } else if contains_any(&lower, &["strength", "power", "grade"]) {
        FindingType::Strength
    } else if contains_any(&lower, &["pain", "discomfort", "tenderness"]) {
        FindingType::Symptom
    } else if contains_any(&lower, &["exercise", "treatment", "therapy"]) {
        FindingType::Treatment
    } else {
        FindingType::Observation
    }
}

/// Deriva os achados do texto extraído.
///
/// Uma linha com palavra-chave de categoria passa a valer para as linhas
/// seguintes, inclusive ela mesma.
pub fn parse_findings(text: &str) -> Vec<FindingDraft> {
    let mut findings = Vec::new();
    let mut current_category: Option<&'static str> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_lowercase();
        if let Some((category, _)) = CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| contains_any(&lower, keywords))
        {
            current_category = Some(*category);
        }

        if is_finding_line(line) {
            findings.push(FindingDraft {
                category: current_category.unwrap_or(DEFAULT_CATEGORY),
                finding_type: classify_finding_type(line),
                text: line.to_string(),
            });
        }
    }
    findings
}

fn to_json<T: Serialize>(value: &T) -> CareResult<String> {
    serde_json::to_string(value).map_err(|e| {
        CareError::Database(DbError::InternalError(format!("Falha ao serializar extração: {}", e)))
    })
}

/// Grava a extração e substitui os achados anteriores da avaliação
pub async fn store_extraction(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    assessment_id: i64,
    extraction: &DocumentExtraction,
    now: DateTime<Utc>,
) -> CareResult<Vec<ExtractedFinding>> {
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

    let drafts = parse_findings(&extraction.raw_text);
    let tables_json = to_json(&extraction.tables)?;
    let pairs_json = to_json(&extraction.key_value_pairs)?;

    let mut tx = conn.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO note_extractions (assessment_id, raw_text, tables_json, key_value_pairs_json, processed_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (assessment_id) DO UPDATE SET
            raw_text = excluded.raw_text,
            tables_json = excluded.tables_json,
            key_value_pairs_json = excluded.key_value_pairs_json,
            processed_at = excluded.processed_at
        "#,
    )
    .bind(assessment_id)
    .bind(&extraction.raw_text)
    .bind(&tables_json)
    .bind(&pairs_json)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM extracted_findings WHERE assessment_id = ?")
        .bind(assessment_id)
        .execute(&mut *tx)
        .await?;

    for draft in &drafts {
        sqlx::query(
            "INSERT INTO extracted_findings (assessment_id, category, finding_type, text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(assessment_id)
        .bind(draft.category)
        .bind(draft.finding_type.as_str())
        .bind(&draft.text)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(
        clinician_id,
        assessment_id,
        findings = drafts.len(),
        "Extração das notas registrada"
    );
    load_findings(conn, assessment_id).await
}

async fn load_findings(conn: &mut SqliteConnection, assessment_id: i64) -> CareResult<Vec<ExtractedFinding>> {
    let rows = sqlx::query_as::<_, ExtractedFinding>(
        "SELECT * FROM extracted_findings WHERE assessment_id = ? ORDER BY id",
    )
    .bind(assessment_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Texto bruto e estrutura da última extração, se houver
pub async fn get_extraction(
    conn: &mut SqliteConnection,
    assessment_id: i64,
) -> CareResult<Option<DocumentExtraction>> {
    let row: Option<(String, String, String)> = sqlx::query_as(
        "SELECT raw_text, tables_json, key_value_pairs_json FROM note_extractions WHERE assessment_id = ?",
    )
    .bind(assessment_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        None => Ok(None),
        Some((raw_text, tables, pairs)) => {
            let parse_error = |e: serde_json::Error| {
                CareError::Database(DbError::InternalError(format!("Extração corrompida: {}", e)))
            };
            Ok(Some(DocumentExtraction {
                raw_text,
                tables: serde_json::from_str(&tables).map_err(parse_error)?,
                key_value_pairs: serde_json::from_str(&pairs).map_err(parse_error)?,
            }))
        }
    }
}

pub async fn list_findings(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    assessment_id: i64,
    now: DateTime<Utc>,
) -> CareResult<Vec<ExtractedFinding>> {
    let assessment = assessments::get_assessment(&mut *conn, assessment_id).await?;
    access::require_access(
        &mut *conn,
        clinician_id,
        assessment.patient_id,
        DataCategory::Symptoms,
        Operation::Read,
        now,
    )
    .await?;
    load_findings(conn, assessment_id).await
}

async fn finding_for_write(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    finding_id: i64,
    now: DateTime<Utc>,
) -> CareResult<ExtractedFinding> {
    let finding = sqlx::query_as::<_, ExtractedFinding>("SELECT * FROM extracted_findings WHERE id = ?")
        .bind(finding_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CareError::not_found("Achado"))?;
    let assessment = assessments::get_assessment(&mut *conn, finding.assessment_id).await?;
    access::require_access(
        conn,
        clinician_id,
        assessment.patient_id,
        DataCategory::Symptoms,
        Operation::Write,
        now,
    )
    .await?;
    Ok(finding)
}

/// Marca o achado como conferido pelo profissional
pub async fn verify_finding(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    finding_id: i64,
    now: DateTime<Utc>,
) -> CareResult<ExtractedFinding> {
    let mut finding = finding_for_write(&mut *conn, clinician_id, finding_id, now).await?;
    sqlx::query("UPDATE extracted_findings SET is_verified = 1 WHERE id = ?")
        .bind(finding_id)
        .execute(&mut *conn)
        .await?;
    finding.is_verified = true;
    debug!(clinician_id, finding_id, "Achado conferido");
    Ok(finding)
}

pub async fn delete_finding(
    conn: &mut SqliteConnection,
    clinician_id: i64,
    finding_id: i64,
    now: DateTime<Utc>,
) -> CareResult<()> {
    finding_for_write(&mut *conn, clinician_id, finding_id, now).await?;
    sqlx::query("DELETE FROM extracted_findings WHERE id = ?")
        .bind(finding_id)
        .execute(&mut *conn)
        .await?;
    info!(clinician_id, finding_id, "Achado removido");
    Ok(())
}
