//! Sistema de migrações para banco de dados
//!
//! Este módulo gerencia as migrações do banco de dados SQLite. A versão
//! aplicada fica em `PRAGMA user_version`.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{error, info};

/// Lista de migrações SQL a serem aplicadas
const MIGRATIONS: &[&str] = &[
    // 001_identities_and_access.sql
    r#"
    -- Contas de login (pacientes e profissionais)
    CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL DEFAULT '',
        password_hash TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL
    );

    -- Dados pessoais e contatos de emergência do paciente
    CREATE TABLE IF NOT EXISTS patient_profiles (
        account_id INTEGER PRIMARY KEY NOT NULL,
        date_of_birth DATE,
        phone_number TEXT NOT NULL DEFAULT '',
        emergency_contact_name TEXT NOT NULL DEFAULT '',
        emergency_contact_phone TEXT NOT NULL DEFAULT '',
        emergency_contact_relationship TEXT NOT NULL DEFAULT '',
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (account_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    -- Perfis de profissionais de saúde
    CREATE TABLE IF NOT EXISTS clinicians (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER UNIQUE,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT 'dr' CHECK (title IN ('dr', 'nurse', 'physiotherapist', 'paramedic', 'specialist', 'other')),
        registration_body TEXT CHECK (registration_body IN ('GMC', 'NMC', 'HCPC', 'other')),
        registration_number TEXT NOT NULL DEFAULT '',
        verification_status TEXT NOT NULL DEFAULT 'unverified' CHECK (verification_status IN ('unverified', 'format_valid', 'format_invalid', 'verified')),
        speciality TEXT NOT NULL DEFAULT '',
        organisation TEXT NOT NULL DEFAULT '',
        email TEXT NOT NULL,
        phone TEXT NOT NULL DEFAULT '',
        practitioner_code TEXT NOT NULL UNIQUE CHECK (length(practitioner_code) = 5),
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (account_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    -- O código do profissional é definido uma única vez
    CREATE TRIGGER IF NOT EXISTS clinicians_practitioner_code_immutable
    BEFORE UPDATE OF practitioner_code ON clinicians
    WHEN OLD.practitioner_code IS NOT NEW.practitioner_code
    BEGIN
        SELECT RAISE(ABORT, 'practitioner_code is immutable');
    END;

    -- Vínculos paciente ↔ profissional com consentimento por categoria
    CREATE TABLE IF NOT EXISTS access_grants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        clinician_id INTEGER NOT NULL,
        granted_by INTEGER,
        access_level TEXT NOT NULL DEFAULT 'read_only' CHECK (access_level IN ('full', 'read_only', 'emergency')),
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'revoked')),
        consent_medications BOOLEAN NOT NULL DEFAULT 1,
        consent_conditions BOOLEAN NOT NULL DEFAULT 1,
        consent_allergies BOOLEAN NOT NULL DEFAULT 1,
        consent_symptoms BOOLEAN NOT NULL DEFAULT 1,
        consent_personal_info BOOLEAN NOT NULL DEFAULT 1,
        consent_emergency_contacts BOOLEAN NOT NULL DEFAULT 1,
        consent_work_history BOOLEAN NOT NULL DEFAULT 1,
        consent_feedback BOOLEAN NOT NULL DEFAULT 1,
        consent_given_at TIMESTAMP NOT NULL,
        granted_at TIMESTAMP NOT NULL,
        expires_at TIMESTAMP,
        revoked_at TIMESTAMP,
        notes TEXT NOT NULL DEFAULT '',
        UNIQUE (patient_id, clinician_id),
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE,
        FOREIGN KEY (clinician_id) REFERENCES clinicians (id) ON DELETE CASCADE,
        FOREIGN KEY (granted_by) REFERENCES accounts (id) ON DELETE SET NULL
    );

    -- Convites de pacientes para profissionais
    CREATE TABLE IF NOT EXISTS invitations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        email TEXT NOT NULL,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        notes TEXT NOT NULL DEFAULT '',
        token TEXT NOT NULL UNIQUE,
        created_at TIMESTAMP NOT NULL,
        expires_at TIMESTAMP NOT NULL,
        is_accepted BOOLEAN NOT NULL DEFAULT 0,
        accepted_at TIMESTAMP,
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_access_grants_clinician ON access_grants (clinician_id, status);
    CREATE INDEX IF NOT EXISTS idx_invitations_patient ON invitations (patient_id);
    "#,

    // 002_health_records.sql
    r#"
    CREATE TABLE IF NOT EXISTS medications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        dosage TEXT NOT NULL DEFAULT '',
        frequency TEXT NOT NULL DEFAULT '',
        start_date DATE,
        end_date DATE,
        is_prescribed BOOLEAN NOT NULL DEFAULT 1,
        prescribing_clinician TEXT NOT NULL DEFAULT '',
        notes TEXT NOT NULL DEFAULT '',
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS conditions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        diagnosis_date DATE,
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'resolved', 'chronic', 'monitoring')),
        notes TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS allergies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        allergen TEXT NOT NULL,
        reaction TEXT NOT NULL,
        severity TEXT NOT NULL DEFAULT 'moderate' CHECK (severity IN ('mild', 'moderate', 'severe', 'life_threatening')),
        date_identified DATE,
        notes TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS work_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        job_title TEXT NOT NULL,
        employer TEXT NOT NULL DEFAULT '',
        start_date DATE,
        end_date DATE,
        is_current BOOLEAN NOT NULL DEFAULT 0,
        activities TEXT NOT NULL DEFAULT '[]', -- JSON com as atividades
        hours_per_week INTEGER,
        description TEXT NOT NULL DEFAULT '',
        notes TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS healthcare_feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        organisation TEXT NOT NULL,
        rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
        feedback_type TEXT NOT NULL,
        feedback_text TEXT NOT NULL,
        is_anonymous BOOLEAN NOT NULL DEFAULT 0,
        is_private BOOLEAN NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL,
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS assessments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        clinician_id INTEGER,
        assessment_type TEXT NOT NULL DEFAULT 'general' CHECK (assessment_type IN ('physiotherapy', 'general', 'specialist', 'emergency', 'other')),
        assessment_date DATE,
        completed_at TIMESTAMP,
        current_symptoms TEXT NOT NULL DEFAULT '',
        previous_symptoms TEXT NOT NULL DEFAULT '',
        condition_progression TEXT NOT NULL DEFAULT '',
        pain_level INTEGER CHECK (pain_level BETWEEN 0 AND 10),
        symptom_date DATE,
        objective_findings TEXT NOT NULL DEFAULT '',
        treatment_plan TEXT NOT NULL DEFAULT '',
        practitioner_notes TEXT NOT NULL DEFAULT '',
        notes_image_path TEXT,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (patient_id) REFERENCES accounts (id) ON DELETE CASCADE,
        FOREIGN KEY (clinician_id) REFERENCES clinicians (id) ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS idx_medications_patient ON medications (patient_id);
    CREATE INDEX IF NOT EXISTS idx_conditions_patient ON conditions (patient_id);
    CREATE INDEX IF NOT EXISTS idx_allergies_patient ON allergies (patient_id);
    CREATE INDEX IF NOT EXISTS idx_work_history_patient ON work_history (patient_id);
    CREATE INDEX IF NOT EXISTS idx_feedback_patient ON healthcare_feedback (patient_id);
    CREATE INDEX IF NOT EXISTS idx_assessments_patient ON assessments (patient_id);
    "#,

    // 003_objective_measures.sql
    r#"
    -- Medidas objetivas: uma linha por avaliação, uma coluna por articulação/lado/tipo
    CREATE TABLE IF NOT EXISTS objective_measures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        assessment_id INTEGER NOT NULL UNIQUE,
        clinician_id INTEGER NOT NULL,
        assessment_date DATE,
        shoulder_rom_left TEXT NOT NULL DEFAULT 'normal',
        shoulder_rom_right TEXT NOT NULL DEFAULT 'normal',
        elbow_rom_left TEXT NOT NULL DEFAULT 'normal',
        elbow_rom_right TEXT NOT NULL DEFAULT 'normal',
        wrist_rom_left TEXT NOT NULL DEFAULT 'normal',
        wrist_rom_right TEXT NOT NULL DEFAULT 'normal',
        hand_rom_left TEXT NOT NULL DEFAULT 'normal',
        hand_rom_right TEXT NOT NULL DEFAULT 'normal',
        hip_rom_left TEXT NOT NULL DEFAULT 'normal',
        hip_rom_right TEXT NOT NULL DEFAULT 'normal',
        knee_rom_left TEXT NOT NULL DEFAULT 'normal',
        knee_rom_right TEXT NOT NULL DEFAULT 'normal',
        ankle_rom_left TEXT NOT NULL DEFAULT 'normal',
        ankle_rom_right TEXT NOT NULL DEFAULT 'normal',
        foot_rom_left TEXT NOT NULL DEFAULT 'normal',
        foot_rom_right TEXT NOT NULL DEFAULT 'normal',
        cervical_rom TEXT NOT NULL DEFAULT 'normal',
        thoracic_rom TEXT NOT NULL DEFAULT 'normal',
        lumbar_rom TEXT NOT NULL DEFAULT 'normal',
        shoulder_power_left TEXT NOT NULL DEFAULT 'normal',
        shoulder_power_right TEXT NOT NULL DEFAULT 'normal',
        elbow_power_left TEXT NOT NULL DEFAULT 'normal',
        elbow_power_right TEXT NOT NULL DEFAULT 'normal',
        wrist_power_left TEXT NOT NULL DEFAULT 'normal',
        wrist_power_right TEXT NOT NULL DEFAULT 'normal',
        grip_power_left TEXT NOT NULL DEFAULT 'normal',
        grip_power_right TEXT NOT NULL DEFAULT 'normal',
        hip_power_left TEXT NOT NULL DEFAULT 'normal',
        hip_power_right TEXT NOT NULL DEFAULT 'normal',
        knee_power_left TEXT NOT NULL DEFAULT 'normal',
        knee_power_right TEXT NOT NULL DEFAULT 'normal',
        ankle_power_left TEXT NOT NULL DEFAULT 'normal',
        ankle_power_right TEXT NOT NULL DEFAULT 'normal',
        core_power TEXT NOT NULL DEFAULT 'normal',
        additional_notes TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (assessment_id) REFERENCES assessments (id) ON DELETE CASCADE,
        FOREIGN KEY (clinician_id) REFERENCES clinicians (id) ON DELETE CASCADE
    );

    -- Resultado bruto da extração de texto das notas
    CREATE TABLE IF NOT EXISTS note_extractions (
        assessment_id INTEGER PRIMARY KEY NOT NULL,
        raw_text TEXT NOT NULL DEFAULT '',
        tables_json TEXT NOT NULL DEFAULT '[]',
        key_value_pairs_json TEXT NOT NULL DEFAULT '[]',
        processed_at TIMESTAMP NOT NULL,
        FOREIGN KEY (assessment_id) REFERENCES assessments (id) ON DELETE CASCADE
    );

    -- Achados categorizados derivados do texto extraído
    CREATE TABLE IF NOT EXISTS extracted_findings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        assessment_id INTEGER NOT NULL,
        category TEXT NOT NULL,
        finding_type TEXT NOT NULL,
        text TEXT NOT NULL,
        is_verified BOOLEAN NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL,
        FOREIGN KEY (assessment_id) REFERENCES assessments (id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_extracted_findings_assessment ON extracted_findings (assessment_id);
    "#,
];

/// Executa todas as migrações pendentes no banco de dados
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Aplicando migrações de banco de dados...");

    // Obter a versão atual do banco de dados
    let mut version: i64 = 0;
    match sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
    {
        Ok(v) => version = v,
        Err(e) => {
            error!("Erro ao obter versão do banco: {}", e);
            // Continuar mesmo assim, pois pode ser a primeira execução
        }
    }

    info!("Versão atual do banco: {}", version);

    for (i, migration_sql) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as i64;

        if migration_version <= version {
            continue;
        }

        info!("Aplicando migração {}...", migration_version);

        let mut transaction = pool
            .begin()
            .await
            .with_context(|| format!("Falha ao iniciar transação para migração {}", migration_version))?;

        sqlx::query(migration_sql)
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Falha ao executar migração {}", migration_version))?;

        sqlx::query(&format!("PRAGMA user_version = {}", migration_version))
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Falha ao atualizar versão para {}", migration_version))?;

        transaction
            .commit()
            .await
            .with_context(|| format!("Falha ao confirmar transação para migração {}", migration_version))?;

        info!("Migração {} aplicada com sucesso", migration_version);
    }

    info!("Migrações concluídas. Versão atual: {}", MIGRATIONS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migrations.db");

        let conn_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(conn_options).await?;

        run_migrations(&pool).await?;

        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;

        assert_eq!(version, MIGRATIONS.len() as i64);

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&pool)
        .await?;

        for expected in [
            "accounts",
            "clinicians",
            "access_grants",
            "invitations",
            "assessments",
            "objective_measures",
            "extracted_findings",
        ] {
            assert!(tables.contains(&expected.to_string()), "tabela ausente: {}", expected);
        }

        // Reaplicar não deve falhar nem mudar a versão
        run_migrations(&pool).await?;
        let version_again: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;
        assert_eq!(version_again, version);

        Ok(())
    }
}
