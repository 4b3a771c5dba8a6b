//! Care DB - Biblioteca compartilhada de registros de saúde e consentimento
//!
//! Esta biblioteca fornece:
//! - Modelos de dados compartilhados e migrações automáticas do SQLite
//! - Gerador de códigos de profissional
//! - Vínculos de acesso paciente↔profissional e o portão de consentimento
//! - Convites por e-mail para profissionais
//! - Agregação das medidas objetivas (amplitude de movimento e força)
//! - CRUD dos registros do paciente, sempre verificando propriedade ou consentimento

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod access;
pub mod accounts;
pub mod assessments;
pub mod clinicians;
pub mod error;
pub mod findings;
pub mod invitations;
pub mod measures;
pub mod migrations;
pub mod models;
pub mod practitioner_code;
pub mod records;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use error::{CareError, CareResult, DbError};

/// Configuração da conexão com o banco de dados
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Caminho para o arquivo SQLite
    pub db_path: String,
    /// Número máximo de conexões no pool
    pub max_connections: u32,
    /// Tempo de espera por um lock de escrita, em segundos
    pub busy_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            db_path: "data/care.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }
}

/// Inicializa o pool de conexões SQLite e aplica as migrações pendentes
pub async fn init_db_pool(config: &DbConfig) -> Result<SqlitePool> {
    let db_path = Path::new(&config.db_path);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .context("Falha ao criar diretório para banco de dados")?;
        }
    }

    let connection_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
        .pragma("synchronous", "NORMAL");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connection_options)
        .await
        .context("Falha ao conectar ao banco de dados SQLite")?;

    migrations::run_migrations(&pool)
        .await
        .context("Falha ao aplicar migrações")?;

    info!("Banco de dados inicializado com sucesso: {}", config.db_path);
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_db_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("test.db");

        let config = DbConfig {
            db_path: db_path.to_string_lossy().to_string(),
            max_connections: 2,
            busy_timeout_secs: 1,
        };

        let pool = init_db_pool(&config).await?;

        let result: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
        assert_eq!(result.0, 1);

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await?;
        assert_eq!(foreign_keys, 1);

        Ok(())
    }
}
