//! Utilitários de teste: banco temporário já migrado e cadastros mínimos

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::clinicians::{self, NewClinician};
use crate::models::{Clinician, ClinicianTitle};
use crate::{init_db_pool, DbConfig};

/// Banco SQLite em diretório temporário; o diretório vive enquanto o valor existir
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn temp_db() -> TestDb {
    temp_db_with_connections(4).await
}

/// Banco temporário com o pool limitado a `max_connections`
pub async fn temp_db_with_connections(max_connections: u32) -> TestDb {
    let dir = tempfile::tempdir().expect("diretório temporário");
    let config = DbConfig {
        db_path: dir.path().join("care-test.db").to_string_lossy().to_string(),
        max_connections,
        busy_timeout_secs: 5,
    };
    let pool = init_db_pool(&config).await.expect("pool de teste");
    TestDb { pool, _dir: dir }
}

/// Insere uma conta de paciente sem senha utilizável
pub async fn insert_patient(pool: &SqlitePool, username: &str) -> i64 {
    insert_account(pool, username, Utc::now()).await
}

pub async fn insert_account(pool: &SqlitePool, username: &str, now: DateTime<Utc>) -> i64 {
    sqlx::query(
        "INSERT INTO accounts (username, email, password_hash, created_at) VALUES (?, ?, '!', ?)",
    )
    .bind(username)
    .bind(format!("{}@example.com", username))
    .bind(now)
    .execute(pool)
    .await
    .expect("inserir conta")
    .last_insert_rowid()
}

pub async fn insert_clinician(pool: &SqlitePool, first_name: &str, title: ClinicianTitle) -> Clinician {
    let mut conn = pool.acquire().await.expect("conexão");
    clinicians::create_clinician(
        &mut conn,
        &NewClinician {
            account_id: None,
            first_name: first_name.to_string(),
            last_name: "Doe".to_string(),
            title,
            email: format!("{}@clinic.example.com", first_name.to_lowercase()),
            ..NewClinician::default()
        },
        Utc::now(),
    )
    .await
    .expect("inserir profissional")
}

/// Profissional com conta de login própria
pub async fn insert_clinician_with_account(
    pool: &SqlitePool,
    username: &str,
    title: ClinicianTitle,
) -> Clinician {
    let account_id = insert_patient(pool, username).await;
    let mut conn = pool.acquire().await.expect("conexão");
    clinicians::create_clinician(
        &mut conn,
        &NewClinician {
            account_id: Some(account_id),
            first_name: username.to_string(),
            last_name: "Doe".to_string(),
            title,
            email: format!("{}@clinic.example.com", username),
            ..NewClinician::default()
        },
        Utc::now(),
    )
    .await
    .expect("inserir profissional")
}
