//! Contas de login e resolução do papel do usuário

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::error::{CareError, CareResult, DbError};
use crate::models::{Account, UserRole};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Gera o hash Argon2id de uma senha
pub fn hash_password(password: &str) -> CareResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CareError::Database(DbError::InternalError(format!("Falha ao gerar hash: {}", e))))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Regras de senha do cadastro: obrigatória, mínimo de 8 caracteres, confirmação igual
pub fn validate_new_password(password: &str, confirmation: &str) -> CareResult<()> {
    if password.is_empty() {
        return Err(CareError::invalid("A senha é obrigatória"));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(CareError::invalid(format!(
            "A senha deve ter pelo menos {} caracteres",
            MIN_PASSWORD_LENGTH
        )));
    }
    if password != confirmation {
        return Err(CareError::invalid("As senhas não coincidem"));
    }
    Ok(())
}

pub async fn username_taken(conn: &mut SqliteConnection, username: &str) -> CareResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM accounts WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Cria uma conta; a senha já deve ter sido validada pelo chamador
pub async fn create_account(
    conn: &mut SqliteConnection,
    username: &str,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> CareResult<Account> {
    let username = username.trim();
    if username.is_empty() {
        return Err(CareError::invalid("O nome de usuário é obrigatório"));
    }
    if username_taken(&mut *conn, username).await? {
        return Err(CareError::invalid("Nome de usuário já existe"));
    }

    let password_hash = hash_password(password)?;
    let id = sqlx::query(
        "INSERT INTO accounts (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| match DbError::from(e) {
        err if err.is_constraint_violation() => CareError::invalid("Nome de usuário já existe"),
        other => CareError::Database(other),
    })?
    .last_insert_rowid();

    info!(account_id = id, "Conta criada");
    Ok(Account {
        id,
        username: username.to_string(),
        email: email.to_string(),
        password_hash,
        created_at: now,
    })
}

pub async fn find_by_username(conn: &mut SqliteConnection, username: &str) -> CareResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(account)
}

/// Confere usuário e senha; qualquer falha vira a mesma mensagem
pub async fn authenticate(
    conn: &mut SqliteConnection,
    username: &str,
    password: &str,
) -> CareResult<Account> {
    match find_by_username(conn, username.trim()).await? {
        Some(account) if verify_password(password, &account.password_hash) => Ok(account),
        _ => {
            debug!("Falha de autenticação");
            Err(CareError::denied("Usuário ou senha inválidos"))
        }
    }
}

/// Resolve o papel da conta: profissional se houver perfil vinculado, paciente caso contrário
pub async fn resolve_role(conn: &mut SqliteConnection, account_id: i64) -> CareResult<UserRole> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_none() {
        return Err(CareError::not_found("Conta"));
    }

    let clinician_id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM clinicians WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(match clinician_id {
        Some(clinician_id) => UserRole::Clinician { clinician_id },
        None => UserRole::Patient {
            patient_id: account_id,
        },
    })
}

/// Confirma que o id informado é uma conta de paciente
pub async fn ensure_patient(conn: &mut SqliteConnection, patient_id: i64) -> CareResult<()> {
    match resolve_role(conn, patient_id).await {
        Ok(UserRole::Patient { .. }) => Ok(()),
        Ok(UserRole::Clinician { .. }) | Err(CareError::NotFound(_)) => {
            Err(CareError::not_found("Paciente"))
        }
        Err(other) => Err(other),
    }
}

pub async fn delete_account(conn: &mut SqliteConnection, account_id: i64) -> CareResult<()> {
    let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CareError::not_found("Conta"));
    }
    info!(account_id, "Conta removida");
    Ok(())
}
