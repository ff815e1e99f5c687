//! Transaction retry machinery (spec §5): SERIALIZABLE isolation with
//! SQLSTATE-based retry, the same shape the teacher's `lmsr_api.rs` uses
//! for concurrent LMSR updates.

use crate::error::ExchangeError;
use rand::Rng;
use std::time::Duration as StdDuration;
use tokio::time::sleep;

const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_RETRY_DELAY_MS: u64 = 10;

mod pg_error_codes {
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const ACTIVE_SQL_TRANSACTION: &str = "25001";
    pub const UNIQUE_VIOLATION: &str = "23505";
}

/// Walks the error's `.source()` chain looking for a `sqlx::Error` whose
/// SQLSTATE marks it as the product of contention rather than a real
/// domain failure.
pub fn is_retryable(error: &ExchangeError) -> bool {
    let ExchangeError::Internal(anyhow_err) = error else {
        return false;
    };
    let mut current: &dyn std::error::Error = anyhow_err.as_ref();
    loop {
        if let Some(sqlx::Error::Database(db_error)) = current.downcast_ref::<sqlx::Error>() {
            if let Some(code) = db_error.code() {
                let retryable = matches!(
                    code.as_ref(),
                    pg_error_codes::SERIALIZATION_FAILURE
                        | pg_error_codes::DEADLOCK_DETECTED
                        | pg_error_codes::ACTIVE_SQL_TRANSACTION
                        | pg_error_codes::UNIQUE_VIOLATION
                );
                if retryable {
                    tracing::debug!(sqlstate = %code, "detected retryable database error");
                }
                return retryable;
            }
            return false;
        }
        match current.source() {
            Some(source) => current = source,
            None => return false,
        }
    }
}

pub async fn backoff(attempt: u32) {
    let jitter = rand::thread_rng().gen_range(0..10);
    let delay_ms = BASE_RETRY_DELAY_MS * (1u64 << (attempt - 1).min(6)) + jitter;
    sleep(StdDuration::from_millis(delay_ms)).await;
}

pub const MAX_ATTEMPTS: u32 = MAX_RETRY_ATTEMPTS;

/// Run `$body`, a closure producing a fresh `sqlx::Transaction` against
/// `$pool` on each attempt, retrying on SERIALIZABLE contention with
/// exponential backoff. `$body` receives the transaction and must commit
/// it itself on success (the UnitOfWork's methods already do this).
#[macro_export]
macro_rules! with_serializable_retry {
    ($pool:expr, |$tx_var:ident| $body:expr) => {{
        let mut attempt = 1u32;
        loop {
            let mut $tx_var = $pool.begin().await.map_err($crate::error::ExchangeError::from)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *$tx_var)
                .await
                .map_err($crate::error::ExchangeError::from)?;

            let result = async { $body }.await;
            match result {
                Ok(value) => {
                    $tx_var.commit().await.map_err($crate::error::ExchangeError::from)?;
                    break Ok(value);
                }
                Err(e) => {
                    $tx_var.rollback().await.ok();
                    if $crate::retry::is_retryable(&e) && attempt < $crate::retry::MAX_ATTEMPTS {
                        $crate::retry::backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    break Err(e);
                }
            }
        }
    }};
}
