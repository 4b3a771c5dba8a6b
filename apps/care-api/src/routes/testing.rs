//! Aplicação montada sobre um banco temporário para os testes de rota

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use care_db::clinicians::{self, NewClinician};
use care_db::models::{Clinician, ClinicianTitle};
use care_db::test_support::{temp_db, temp_db_with_connections, TestDb};
use care_db::accounts;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::auth::issue_token;
use crate::collaborators::document_intelligence::{DocumentAnalyzer, MockDocumentAnalyzer};
use crate::collaborators::mailer::{Mailer, MockMailer};
use crate::config::{test_config, AppConfig};
use crate::state::AppState;

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: TestDb,
    pub uploads: TempDir,
}

impl TestApp {
    /// Mailer e analisador sem expectativas: qualquer chamada falha o teste
    pub async fn new() -> Self {
        Self::with(MockMailer::new(), MockDocumentAnalyzer::new(), |_| {}).await
    }

    pub async fn with_mailer(mailer: MockMailer) -> Self {
        Self::with(mailer, MockDocumentAnalyzer::new(), |_| {}).await
    }

    pub async fn with_analyzer(analyzer: MockDocumentAnalyzer) -> Self {
        Self::with(MockMailer::new(), analyzer, |_| {}).await
    }

    /// Pool com uma única conexão, para expor conexões presas durante chamadas externas
    pub async fn with_single_connection(analyzer: impl DocumentAnalyzer + 'static) -> Self {
        Self::build(temp_db_with_connections(1).await, MockMailer::new(), analyzer, |_| {}).await
    }

    pub async fn with(
        mailer: impl Mailer + 'static,
        analyzer: impl DocumentAnalyzer + 'static,
        configure: impl FnOnce(&mut AppConfig),
    ) -> Self {
        Self::build(temp_db().await, mailer, analyzer, configure).await
    }

    async fn build(
        db: TestDb,
        mailer: impl Mailer + 'static,
        analyzer: impl DocumentAnalyzer + 'static,
        configure: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let uploads = tempfile::tempdir().unwrap();
        let mut config = test_config(uploads.path());
        configure(&mut config);

        let state = AppState::new(db.pool.clone(), config, Arc::new(mailer), Arc::new(analyzer));
        let router = super::router(state.clone());
        Self {
            router,
            state,
            db,
            uploads,
        }
    }

    /// Conta de paciente com senha conhecida; devolve (id, token)
    pub async fn patient(&self, username: &str) -> (i64, String) {
        let mut conn = self.db.pool.acquire().await.unwrap();
        let account = accounts::create_account(
            &mut conn,
            username,
            &format!("{}@example.com", username),
            PASSWORD,
            Utc::now(),
        )
        .await
        .unwrap();
        let token = issue_token(&self.state.config.auth, &account, Utc::now()).unwrap();
        (account.id, token)
    }

    pub async fn clinician(&self, username: &str, title: ClinicianTitle) -> (Clinician, String) {
        let mut conn = self.db.pool.acquire().await.unwrap();
        let account = accounts::create_account(
            &mut conn,
            username,
            &format!("{}@clinic.example.com", username),
            PASSWORD,
            Utc::now(),
        )
        .await
        .unwrap();
        let clinician = clinicians::create_clinician(
            &mut conn,
            &NewClinician {
                account_id: Some(account.id),
                first_name: "John".to_string(),
                last_name: "Doe".to_string(),
                title,
                email: format!("{}@clinic.example.com", username),
                ..NewClinician::default()
            },
            Utc::now(),
        )
        .await
        .unwrap();
        let token = issue_token(&self.state.config.auth, &account, Utc::now()).unwrap();
        (clinician, token)
    }

    pub async fn raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<axum::body::BoxBody> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.raw(method, uri, token, body).await;
        read_json(response).await
    }

    pub async fn upload(&self, uri: &str, token: &str, content_type: &str, bytes: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        read_json(response).await
    }
}

async fn read_json(response: Response<axum::body::BoxBody>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, body)
}
