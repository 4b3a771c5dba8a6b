//! Limite de requisições por janela fixa, em memória
//!
//! Aplicado ao login (por nome de usuário) e ao envio do código do
//! profissional por e-mail (por profissional).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::{ApiError, ApiResult};

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Conta a requisição; `false` quando a chave já atingiu o limite da janela
    pub fn try_acquire(&self, key: &str, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.retain(|_, w| now.duration_since(w.started) < self.window);

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    pub fn check(&self, key: &str) -> ApiResult<()> {
        if self.try_acquire(key, Instant::now()) {
            Ok(())
        } else {
            warn!(key, "Limite de requisições excedido");
            Err(ApiError::too_many_requests())
        }
    }
}
