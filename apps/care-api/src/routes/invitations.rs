//! Convites de pacientes para profissionais ainda sem cadastro

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use care_db::invitations::{self, ClinicianSignup, NewInvitation};
use care_db::models::{AccessGrant, Clinician, Invitation};
use care_db::records::profile;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{issue_token, Auth};
use crate::collaborators::mailer::{self, invitation_email};
use crate::error::ApiResult;
use crate::state::{AppState, DbConn};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/patient/invitations",
            get(list_invitations).post(create_invitation),
        )
        .route("/api/invitations/:token", get(show_invitation))
        .route("/api/invitations/:token/accept", post(accept_invitation))
}

#[derive(Serialize)]
struct CreatedInvitation {
    invitation: Invitation,
    /// A falha no envio não desfaz o convite; o paciente pode compartilhar o link
    email_sent: bool,
}

/// O que o profissional convidado vê antes de se cadastrar
#[derive(Serialize)]
struct InvitationSummary {
    email: String,
    first_name: String,
    last_name: String,
    expires_at: DateTime<Utc>,
    is_valid: bool,
}

#[derive(Serialize)]
struct AcceptedResponse {
    token: String,
    clinician: Clinician,
    grant: AccessGrant,
}

async fn create_invitation(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(new): Json<NewInvitation>,
) -> ApiResult<(StatusCode, Json<CreatedInvitation>)> {
    let patient_id = ctx.require_patient()?;
    // conexão liberada antes do envio do e-mail
    let (invitation, patient) = {
        let mut conn = state.pool.acquire().await?;
        let invitation = invitations::create_invitation(&mut conn, patient_id, &new, ctx.now).await?;
        (invitation, profile::get_profile(&mut conn, patient_id).await?)
    };

    let email = invitation_email(
        &invitation,
        &patient.personal_info.username,
        &state.config.server.public_base_url,
    );
    let email_sent = match mailer::deliver(state.mailer.as_ref(), email, state.config.mailer.timeout()).await {
        Ok(()) => true,
        Err(err) => {
            warn!(invitation_id = invitation.id, error = %err, "Convite criado, mas o e-mail não foi enviado");
            false
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(CreatedInvitation {
            invitation,
            email_sent,
        }),
    ))
}

async fn list_invitations(Auth(ctx): Auth, DbConn(mut conn): DbConn) -> ApiResult<Json<Vec<Invitation>>> {
    let patient_id = ctx.require_patient()?;
    Ok(Json(invitations::list_patient_invitations(&mut conn, patient_id).await?))
}

async fn show_invitation(DbConn(mut conn): DbConn, Path(token): Path<Uuid>) -> ApiResult<Json<InvitationSummary>> {
    let invitation = invitations::get_by_token(&mut conn, token).await?;
    let is_valid = invitation.is_valid(Utc::now());
    Ok(Json(InvitationSummary {
        email: invitation.email,
        first_name: invitation.first_name,
        last_name: invitation.last_name,
        expires_at: invitation.expires_at,
        is_valid,
    }))
}

async fn accept_invitation(
    State(state): State<AppState>,
    DbConn(mut conn): DbConn,
    Path(token): Path<Uuid>,
    Json(signup): Json<ClinicianSignup>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let now = Utc::now();
    let accepted = invitations::accept_invitation(&mut conn, token, &signup, now).await?;
    let token = issue_token(&state.config.auth, &accepted.account, now)?;
    Ok((
        StatusCode::CREATED,
        Json(AcceptedResponse {
            token,
            clinician: accepted.clinician,
            grant: accepted.grant,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use crate::collaborators::mailer::{MailError, MockMailer};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    fn signup(username: &str) -> serde_json::Value {
        json!({
            "username": username,
            "password1": "correct-horse",
            "password2": "correct-horse",
            "first_name": "",
            "last_name": ""
        })
    }

    #[tokio::test]
    async fn test_invitation_round_trip() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|email| email.to == "doc@clinic.test" && email.body.contains("/invitations/"))
            .times(1)
            .returning(|_| Ok(()));
        let app = TestApp::with_mailer(mailer).await;
        let (patient_id, patient) = app.patient("maria").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/patient/invitations",
                Some(&patient),
                Some(json!({"email": "doc@clinic.test", "first_name": "Ana", "last_name": "Lima"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email_sent"], true);
        let token = body["invitation"]["token"].as_str().unwrap().to_string();

        let (status, body) = app
            .request(Method::GET, &format!("/api/invitations/{}", token), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_valid"], true);

        let accept_uri = format!("/api/invitations/{}/accept", token);
        let (status, body) = app
            .request(Method::POST, &accept_uri, None, Some(signup("dr_ana")))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["clinician"]["first_name"], "Ana");
        assert_eq!(body["grant"]["access_level"], "full");
        let clinician_token = body["token"].as_str().unwrap().to_string();

        let (status, body) = app
            .request(
                Method::GET,
                &format!("/api/clinician/patients/{}/record", patient_id),
                Some(&clinician_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["personal_info"].is_object());

        let (status, _) = app
            .request(Method::POST, &accept_uri, None, Some(signup("dr_ana2")))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, body) = app
            .request(Method::GET, &format!("/api/invitations/{}", token), None, None)
            .await;
        assert_eq!(body["is_valid"], false);
    }

    #[tokio::test]
    async fn test_mail_failure_keeps_invitation() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .times(1)
            .returning(|email| Err(MailError::Rejected(email.to)));
        let app = TestApp::with_mailer(mailer).await;
        let (_, patient) = app.patient("maria").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/patient/invitations",
                Some(&patient),
                Some(json!({"email": "doc@clinic.test"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email_sent"], false);

        let (_, body) = app
            .request(Method::GET, "/api/patient/invitations", Some(&patient), None)
            .await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_email_sends_nothing() {
        let app = TestApp::new().await;
        let (_, patient) = app.patient("maria").await;
        let (status, _) = app
            .request(
                Method::POST,
                "/api/patient/invitations",
                Some(&patient),
                Some(json!({"email": "not-an-email"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = app
            .request(
                Method::GET,
                "/api/invitations/00000000-0000-0000-0000-000000000000",
                None,
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
