//! Gerador de códigos de profissional
//!
//! O código tem 5 caracteres em `[A-Z0-9]` (36^5 ≈ 60 milhões de combinações)
//! e é gerado uma única vez, na criação do profissional.

use rand::Rng;
use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::{CareError, CareResult};

pub const CODE_LENGTH: usize = 5;
pub const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Limite de tentativas antes de desistir com `CodeSpaceExhausted`
pub const MAX_CODE_ATTEMPTS: u32 = 32;

/// Sorteia um código candidato (sem verificar unicidade)
pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// Normaliza um código digitado pelo paciente e valida o formato
pub fn normalize_code(input: &str) -> CareResult<String> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() != CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(CareError::invalid(format!(
            "O código do profissional deve ter {} letras ou números",
            CODE_LENGTH
        )));
    }
    Ok(code)
}

pub async fn code_exists(conn: &mut SqliteConnection, code: &str) -> CareResult<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM clinicians WHERE practitioner_code = ?")
            .bind(code)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

/// Controla as tentativas de geração de um código ainda não utilizado
pub struct CodeGenerator<'r, R: Rng + ?Sized> {
    rng: &'r mut R,
    attempts: u32,
    max_attempts: u32,
}

impl<'r, R: Rng + ?Sized> CodeGenerator<'r, R> {
    pub fn new(rng: &'r mut R) -> Self {
        Self::with_max_attempts(rng, MAX_CODE_ATTEMPTS)
    }

    pub fn with_max_attempts(rng: &'r mut R, max_attempts: u32) -> Self {
        Self {
            rng,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Próximo código livre, contando cada sorteio contra o limite.
    ///
    /// Uma colisão detectada depois, na inserção, deve chamar este método
    /// de novo; a tentativa perdida continua contando.
    pub async fn next_free(&mut self, conn: &mut SqliteConnection) -> CareResult<String> {
        while self.attempts < self.max_attempts {
            self.attempts += 1;
            let candidate = random_code(&mut *self.rng);
            if !code_exists(&mut *conn, &candidate).await? {
                return Ok(candidate);
            }
            warn!(attempt = self.attempts, "Código de profissional já utilizado, sorteando outro");
        }
        Err(CareError::CodeSpaceExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_db;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_code_format() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let code = random_code(&mut rng);
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  ab12c ").unwrap(), "AB12C");
        assert!(matches!(normalize_code("AB12"), Err(CareError::Validation(_))));
        assert!(matches!(normalize_code("AB-12"), Err(CareError::Validation(_))));
        assert!(matches!(normalize_code("ABC123"), Err(CareError::Validation(_))));
    }

    #[tokio::test]
    async fn test_generator_gives_up_after_limit() {
        let db = temp_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        // Um RNG constante sempre sorteia o mesmo código
        let mut constant = StepRng::new(0, 0);
        let taken = random_code(&mut constant);
        sqlx::query(
            "INSERT INTO clinicians (first_name, last_name, email, practitioner_code, created_at, updated_at)
             VALUES ('A', 'B', 'a@b.com', ?, datetime('now'), datetime('now'))",
        )
        .bind(&taken)
        .execute(&mut *conn)
        .await
        .unwrap();

        let mut generator = CodeGenerator::with_max_attempts(&mut constant, 4);
        let result = generator.next_free(&mut conn).await;
        assert!(matches!(result, Err(CareError::CodeSpaceExhausted { attempts: 4 })));
        assert_eq!(generator.attempts(), 4);
    }

    #[tokio::test]
    async fn test_generator_returns_free_code() {
        let db = temp_db().await;
        let mut conn = db.pool.acquire().await.unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let mut generator = CodeGenerator::new(&mut rng);
        let code = generator.next_free(&mut conn).await.unwrap();
        assert_eq!(code.len(), CODE_LENGTH);
        assert_eq!(generator.attempts(), 1);
    }
}
