//! Serviços externos usados pelo care-api

pub mod document_intelligence;
pub mod mailer;
