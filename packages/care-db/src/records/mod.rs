//! Registros de saúde do paciente
//!
//! Toda escrita do paciente inclui `patient_id` na cláusula WHERE; uma linha
//! de outro paciente é tratada como inexistente. A leitura pelo profissional
//! passa pelo portão de consentimento em `shared`.

use crate::error::{CareError, CareResult};

pub mod allergies;
pub mod conditions;
pub mod feedback;
pub mod medications;
pub mod profile;
pub mod shared;
pub mod work_history;

pub(crate) fn ensure_affected(rows_affected: u64, what: &str) -> CareResult<()> {
    if rows_affected == 0 {
        return Err(CareError::not_found(what));
    }
    Ok(())
}
