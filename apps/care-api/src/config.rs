//! Configuração do serviço em camadas
//!
//! Ordem de precedência (a última vence):
//! 1. Valores padrão definidos aqui
//! 2. Arquivo `care.toml` opcional no diretório de trabalho
//! 3. Variáveis de ambiente `CARE_*`, com `__` separando seções
//!    (ex.: `CARE_DATABASE__DB_PATH`, `CARE_AUTH__JWT_SECRET`)
//!
//! O `.env` é carregado antes, então também alimenta a terceira camada.

use anyhow::{ensure, Context, Result};
use care_db::DbConfig;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "CARE";
pub const CONFIG_FILE: &str = "care";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Saída de log em JSON (`CARE_LOG_JSON=true`)
    pub log_json: bool,
    pub server: ServerConfig,
    pub database: DbConfig,
    pub auth: AuthConfig,
    pub mailer: MailerConfig,
    pub document_intelligence: DocumentIntelligenceConfig,
    pub uploads: UploadConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Requisições simultâneas atendidas antes de enfileirar
    pub max_concurrency: usize,
    /// Origens liberadas no CORS; vazio desliga o CORS
    pub cors_origins: Vec<String>,
    /// Endereço público usado nos links enviados por e-mail
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    pub from_address: String,
    pub timeout_secs: u64,
}

impl MailerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Serviço externo de leitura de documentos; sem endpoint fica desativado
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentIntelligenceConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl DocumentIntelligenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub dir: String,
    pub max_bytes: usize,
}

/// Limites por janela de tempo: (máximo de requisições, janela em segundos)
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_max: u32,
    pub login_window_secs: u64,
    pub send_code_max: u32,
    pub send_code_window_secs: u64,
}

impl AppConfig {
    /// Carrega a configuração a partir do `.env`, do `care.toml` e do ambiente
    pub fn load() -> Result<Self> {
        // .env é opcional
        dotenvy::dotenv().ok();

        let builder = Self::defaults(Config::builder())?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            );

        let config: AppConfig = builder
            .build()
            .context("Falha ao montar a configuração")?
            .try_deserialize()
            .context("Falha ao interpretar a configuração")?;
        config.validate()?;
        Ok(config)
    }

    fn defaults(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ConfigBuilder<config::builder::DefaultState>> {
        let db = DbConfig::default();
        Ok(builder
            .set_default("log_json", false)?
            .set_default("server.bind_addr", "127.0.0.1:8080")?
            .set_default("server.max_concurrency", 64)?
            .set_default("server.cors_origins", Vec::<String>::new())?
            .set_default("server.public_base_url", "http://localhost:8080")?
            .set_default("database.db_path", db.db_path)?
            .set_default("database.max_connections", db.max_connections)?
            .set_default("database.busy_timeout_secs", db.busy_timeout_secs)?
            .set_default("auth.jwt_secret", "")?
            .set_default("auth.token_ttl_minutes", 60 * 8)?
            .set_default("mailer.from_address", "noreply@sharemycare.local")?
            .set_default("mailer.timeout_secs", 10)?
            .set_default("document_intelligence.timeout_secs", 30)?
            .set_default("uploads.dir", "data/uploads")?
            .set_default("uploads.max_bytes", 10 * 1024 * 1024)?
            .set_default("rate_limit.login_max", 5)?
            .set_default("rate_limit.login_window_secs", 300)?
            .set_default("rate_limit.send_code_max", 10)?
            .set_default("rate_limit.send_code_window_secs", 3600)?)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.auth.jwt_secret.len() >= 32,
            "CARE_AUTH__JWT_SECRET deve ter pelo menos 32 caracteres"
        );
        ensure!(self.auth.token_ttl_minutes > 0, "auth.token_ttl_minutes deve ser positivo");
        ensure!(self.server.max_concurrency > 0, "server.max_concurrency deve ser positivo");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(upload_dir: &std::path::Path) -> AppConfig {
    AppConfig {
        log_json: false,
        server: ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_concurrency: 8,
            cors_origins: vec!["http://localhost:3000".to_string()],
            public_base_url: "http://care.test".to_string(),
        },
        database: DbConfig::default(),
        auth: AuthConfig {
            jwt_secret: "test-secret-with-at-least-32-characters!".to_string(),
            token_ttl_minutes: 30,
        },
        mailer: MailerConfig {
            from_address: "noreply@care.test".to_string(),
            timeout_secs: 1,
        },
        document_intelligence: DocumentIntelligenceConfig {
            endpoint: None,
            api_key: None,
            timeout_secs: 1,
        },
        uploads: UploadConfig {
            dir: upload_dir.to_string_lossy().to_string(),
            max_bytes: 1024 * 1024,
        },
        rate_limit: RateLimitConfig {
            login_max: 5,
            login_window_secs: 300,
            send_code_max: 2,
            send_code_window_secs: 3600,
        },
    }
}
