//! Care API - compartilhamento de registros de saúde entre pacientes e profissionais

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod auth;
mod collaborators;
mod config;
mod error;
mod rate_limit;
mod routes;
mod state;

#[allow(dead_code)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

use crate::collaborators::document_intelligence::{DocumentAnalyzer, HttpDocumentAnalyzer};
use crate::collaborators::mailer::LogMailer;
use crate::config::AppConfig;
use crate::state::AppState;

const DEFAULT_LOG_FILTER: &str = "care_api=info,care_db=info,tower_http=info";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Falha ao aguardar o sinal de encerramento");
    }
    info!("Encerrando o servidor");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Falha ao carregar a configuração")?;
    init_tracing(config.log_json);
    info!(
        version = built_info::PKG_VERSION,
        profile = built_info::PROFILE,
        "Iniciando care-api"
    );

    let pool = care_db::init_db_pool(&config.database)
        .await
        .context("Falha ao inicializar o banco de dados")?;
    tokio::fs::create_dir_all(&config.uploads.dir)
        .await
        .with_context(|| format!("Falha ao criar o diretório de uploads {}", config.uploads.dir))?;

    let mailer = Arc::new(LogMailer::new(config.mailer.from_address.clone()));
    let analyzer = Arc::new(HttpDocumentAnalyzer::new(&config.document_intelligence));
    if !analyzer.is_configured() {
        info!("Serviço de extração de documentos não configurado; processamento de notas desativado");
    }

    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Endereço inválido: {}", config.server.bind_addr))?;
    let state = AppState::new(pool, config, mailer, analyzer);
    let app = routes::router(state);

    info!(%addr, "Servidor escutando");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Falha no servidor HTTP")?;
    Ok(())
}
