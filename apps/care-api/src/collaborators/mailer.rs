//! Envio de e-mails
//!
//! A entrega real fica fora do serviço; a implementação padrão apenas
//! registra a mensagem no log.

use async_trait::async_trait;
use care_db::models::{Clinician, Invitation};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("destinatário recusado: {0}")]
    Rejected(String),

    #[error("tempo esgotado após {0:?}")]
    Timeout(Duration),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError>;
}

/// Mailer que só registra o envio
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        info!(
            from = %self.from,
            to = %email.to,
            subject = %email.subject,
            "E-mail enviado"
        );
        Ok(())
    }
}

/// Envia com limite de tempo
pub async fn deliver(mailer: &dyn Mailer, email: OutboundEmail, timeout: Duration) -> Result<(), MailError> {
    let to = email.to.clone();
    match tokio::time::timeout(timeout, mailer.send(email)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(to = %to, ?timeout, "Envio de e-mail excedeu o tempo limite");
            Err(MailError::Timeout(timeout))
        }
    }
}

pub fn practitioner_code_email(clinician: &Clinician, to: &str, message: &str) -> OutboundEmail {
    let mut body = format!(
        "Olá,\n\n{} convidou você para compartilhar seus registros de saúde.\n\n\
         Código do profissional: {}\n\n\
         Entre na sua conta e informe este código na página de compartilhamento. \
         Você escolhe quais categorias de dados o profissional poderá ver.\n",
        clinician.display_name(),
        clinician.practitioner_code,
    );
    if !message.trim().is_empty() {
        body.push_str(&format!("\nMensagem do profissional:\n{}\n", message.trim()));
    }
    OutboundEmail {
        to: to.to_string(),
        subject: format!("Código de profissional de {}", clinician.display_name()),
        body,
    }
}

pub fn invitation_email(invitation: &Invitation, patient_username: &str, base_url: &str) -> OutboundEmail {
    let greeting = if invitation.first_name.is_empty() {
        "Olá".to_string()
    } else {
        format!("Olá, {}", invitation.first_name)
    };
    let mut body = format!(
        "{},\n\n{} convidou você para acessar os registros de saúde dele(a).\n\n\
         Crie sua conta de profissional pelo link abaixo:\n{}/invitations/{}\n\n\
         O convite vale até {}.\n",
        greeting,
        patient_username,
        base_url.trim_end_matches('/'),
        invitation.token,
        invitation.expires_at.format("%d/%m/%Y"),
    );
    if !invitation.notes.is_empty() {
        body.push_str(&format!("\nObservações do paciente:\n{}\n", invitation.notes));
    }
    OutboundEmail {
        to: invitation.email.clone(),
        subject: "Convite para acessar registros de saúde".to_string(),
        body,
    }
}
