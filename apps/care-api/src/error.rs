//! Erros da camada HTTP
//!
//! Toda resposta de erro tem o corpo `{"error": "<mensagem>"}`. Falhas de banco
//! são registradas no log e devolvidas com uma mensagem genérica.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use care_db::CareError;
use tracing::{error, warn};

use crate::collaborators::document_intelligence::AnalyzerError;
use crate::collaborators::mailer::MailError;

const INTERNAL_MESSAGE: &str = "Erro interno do servidor";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn too_many_requests() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Muitas requisições. Tente novamente mais tarde.",
        )
    }

    pub fn internal(error: anyhow::Error) -> Self {
        error!(error = %error, "Falha interna");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.message
        }));
        (self.status, body).into_response()
    }
}

impl From<CareError> for ApiError {
    fn from(err: CareError) -> Self {
        match err {
            CareError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, what),
            CareError::PermissionDenied(reason) => Self::new(StatusCode::FORBIDDEN, reason),
            CareError::Validation(reason) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, reason),
            CareError::ExternalService(reason) => {
                warn!(reason = %reason, "Serviço externo falhou");
                Self::new(StatusCode::BAD_GATEWAY, reason)
            }
            err @ CareError::CodeSpaceExhausted { .. } => {
                error!(error = %err, "Espaço de códigos esgotado");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            CareError::Database(db_err) => {
                error!(error = %db_err, "Erro de banco de dados");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        CareError::from(err).into()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CareError::from(errors).into()
    }
}

impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        CareError::ExternalService(format!("Não foi possível enviar o e-mail: {}", err)).into()
    }
}

impl From<AnalyzerError> for ApiError {
    fn from(err: AnalyzerError) -> Self {
        match err {
            AnalyzerError::NotConfigured => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "O processamento de documentos não está configurado",
            ),
            other => CareError::ExternalService(other.to_string()).into(),
        }
    }
}
