//! Cliente do serviço de leitura de documentos
//!
//! Envia a imagem das notas do profissional e recebe o texto reconhecido,
//! as tabelas e os pares chave-valor encontrados.

use async_trait::async_trait;
use care_db::findings::{DocumentExtraction, DocumentTable, KeyValuePair};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DocumentIntelligenceConfig;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("processamento de documentos não configurado")]
    NotConfigured,

    #[error("processamento de documentos excedeu {0:?}")]
    Timeout(Duration),

    #[error("falha no processamento de documentos: {0}")]
    Failed(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn analyze(&self, path: &Path) -> Result<DocumentExtraction, AnalyzerError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalyzeResponse {
    content: String,
    tables: Vec<DocumentTable>,
    key_value_pairs: Vec<KeyValuePair>,
}

impl From<AnalyzeResponse> for DocumentExtraction {
    fn from(response: AnalyzeResponse) -> Self {
        DocumentExtraction {
            raw_text: response.content,
            tables: response.tables,
            key_value_pairs: response.key_value_pairs,
        }
    }
}

pub struct HttpDocumentAnalyzer {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpDocumentAnalyzer {
    pub fn new(config: &DocumentIntelligenceConfig) -> Self {
        let non_blank = |value: &Option<String>| value.as_ref().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            client: reqwest::Client::new(),
            endpoint: non_blank(&config.endpoint),
            api_key: non_blank(&config.api_key),
            timeout: config.timeout(),
        }
    }

    async fn post(&self, endpoint: &str, api_key: &str, bytes: Vec<u8>) -> Result<DocumentExtraction, AnalyzerError> {
        let response = self
            .client
            .post(endpoint)
            .header(API_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AnalyzerError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyzerError::Failed(format!("HTTP {}", status)));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Failed(format!("resposta inválida: {}", e)))?;
        Ok(parsed.into())
    }
}

#[async_trait]
impl DocumentAnalyzer for HttpDocumentAnalyzer {
    fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    async fn analyze(&self, path: &Path) -> Result<DocumentExtraction, AnalyzerError> {
        let (endpoint, api_key) = match (&self.endpoint, &self.api_key) {
            (Some(endpoint), Some(api_key)) => (endpoint, api_key),
            _ => return Err(AnalyzerError::NotConfigured),
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AnalyzerError::Failed(format!("não foi possível ler {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Enviando documento para análise");

        match tokio::time::timeout(self.timeout, self.post(endpoint, api_key, bytes)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Análise de documento excedeu o tempo limite");
                Err(AnalyzerError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analyzer_for(server: &MockServer, timeout_secs: u64) -> HttpDocumentAnalyzer {
        HttpDocumentAnalyzer::new(&DocumentIntelligenceConfig {
            endpoint: Some(format!("{}/analyze", server.uri())),
            api_key: Some("secret-key".to_string()),
            timeout_secs,
        })
    }

    fn notes_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"fake image bytes").unwrap();
        file
    }

    #[tokio::test]
    async fn test_analyze_parses_content_tables_and_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .and(header(API_KEY_HEADER, "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "Knee flexion 90 degrees\nPlan: physiotherapy twice weekly",
                "tables": [{
                    "row_count": 1,
                    "column_count": 2,
                    "cells": [{"row_index": 0, "column_index": 0, "content": "ROM"}]
                }],
                "key_value_pairs": [{"key": "Pain", "value": "6/10"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = notes_file();
        let extraction = analyzer_for(&server, 5).analyze(file.path()).await.unwrap();

        assert!(extraction.raw_text.starts_with("Knee flexion"));
        assert_eq!(extraction.tables.len(), 1);
        assert_eq!(extraction.tables[0].cells[0].content, "ROM");
        assert_eq!(extraction.key_value_pairs[0].value, "6/10");
    }

    #[tokio::test]
    async fn test_server_error_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let file = notes_file();
        let err = analyzer_for(&server, 5).analyze(file.path()).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Failed(message) if message.contains("500")));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"content": ""}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let file = notes_file();
        let err = analyzer_for(&server, 1).analyze(file.path()).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let analyzer = HttpDocumentAnalyzer::new(&DocumentIntelligenceConfig {
            endpoint: Some("http://localhost:1/analyze".to_string()),
            api_key: Some("   ".to_string()),
            timeout_secs: 1,
        });
        assert!(!analyzer.is_configured());

        let file = notes_file();
        assert!(matches!(
            analyzer.analyze(file.path()).await,
            Err(AnalyzerError::NotConfigured)
        ));
    }
}
