//! Definições de erro para a biblioteca care-db
//!
//! `DbError` cobre falhas do SQLite; `CareError` é a taxonomia exposta
//! às operações de domínio (consentimento, convites, registros).

use thiserror::Error;

/// Códigos estendidos do SQLite para violação de UNIQUE e PRIMARY KEY
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";

/// Erros específicos para operações de banco de dados
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Erro de conexão com banco de dados: {0}")]
    ConnectionError(String),

    #[error("Erro de migração: {0}")]
    MigrationError(String),

    #[error("Erro de consulta: {0}")]
    QueryError(String),

    #[error("Registro não encontrado")]
    RowNotFound,

    #[error("Violação de restrição: {0}")]
    ConstraintViolation(String),

    #[error("Erro interno: {0}")]
    InternalError(String),
}

impl DbError {
    /// Indica se o erro é uma violação de unicidade (corrida entre inserções)
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DbError::ConstraintViolation(_))
    }
}

/// Conversão de erros específicos do SQLx para nossos tipos de erro
impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DbError::RowNotFound,
            sqlx::Error::Database(dbe) => {
                let unique_code = dbe
                    .code()
                    .map(|code| {
                        code.as_ref() == SQLITE_CONSTRAINT_UNIQUE
                            || code.as_ref() == SQLITE_CONSTRAINT_PRIMARYKEY
                    })
                    .unwrap_or(false);
                if unique_code || dbe.is_unique_violation() {
                    return DbError::ConstraintViolation(dbe.message().to_string());
                }
                DbError::QueryError(dbe.message().to_string())
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::QueryError(format!("Coluna não encontrada: {}", col))
            }
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::QueryError(format!("Tipo não encontrado: {}", type_name))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::QueryError(format!("Erro ao decodificar coluna {}: {}", index, source))
            }
            sqlx::Error::Io(io_err) => DbError::ConnectionError(io_err.to_string()),
            sqlx::Error::Configuration(conf_err) => DbError::ConnectionError(conf_err.to_string()),
            sqlx::Error::PoolClosed => {
                DbError::ConnectionError("Pool de conexões fechado".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                DbError::ConnectionError("Timeout no pool de conexões".to_string())
            }
            sqlx::Error::WorkerCrashed => {
                DbError::InternalError("Worker do banco de dados falhou".to_string())
            }
            _ => DbError::InternalError(format!("Erro inesperado: {:?}", error)),
        }
    }
}

/// Erros das operações de domínio
#[derive(Error, Debug)]
pub enum CareError {
    /// Profissional, paciente, código ou registro inexistente
    #[error("Não encontrado: {0}")]
    NotFound(String),

    /// O portão de consentimento recusou a operação
    #[error("Acesso negado: {0}")]
    PermissionDenied(String),

    /// Entrada malformada (e-mail, tamanho do código, senhas divergentes)
    #[error("Dados inválidos: {0}")]
    Validation(String),

    /// Falha ou ausência de configuração de um serviço externo
    #[error("Serviço externo indisponível: {0}")]
    ExternalService(String),

    /// Limite de tentativas do gerador de códigos atingido
    #[error("Não foi possível gerar um código de profissional único após {attempts} tentativas")]
    CodeSpaceExhausted { attempts: u32 },

    #[error(transparent)]
    Database(#[from] DbError),
}

impl CareError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CareError::NotFound(what.into())
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        CareError::PermissionDenied(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        CareError::Validation(reason.into())
    }
}

impl From<sqlx::Error> for CareError {
    fn from(error: sqlx::Error) -> Self {
        CareError::Database(DbError::from(error))
    }
}

impl From<validator::ValidationErrors> for CareError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CareError::Validation(errors.to_string())
    }
}

pub type CareResult<T> = Result<T, CareError>;
