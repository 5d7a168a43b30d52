//! Shared plumbing for the Postgres adapters.
//!
//! The store traits are synchronous, sqlx is async. Adapters hold a Tokio
//! runtime handle and run each query through [`block_on`].

use std::future::Future;

use tokio::runtime::{Handle, RuntimeFlavor};

/// Run `future` to completion from synchronous code.
///
/// On a multi-threaded runtime worker the current thread is handed over with
/// `block_in_place` first; from a plain thread the handle drives the future
/// directly. A current-thread runtime cannot be blocked on from inside
/// itself, which is reported through `on_unsupported`.
pub(crate) fn block_on<F, T, E>(
    handle: &Handle,
    future: F,
    on_unsupported: impl FnOnce(&'static str) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match Handle::try_current() {
        Ok(current) => match current.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(future))
            }
            _ => Err(on_unsupported(
                "synchronous store called from a current-thread runtime; use a worker thread",
            )),
        },
        Err(_) => handle.block_on(future),
    }
}

/// Classification of a sqlx failure shared by every adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SqlFailure {
    /// `23505`: the row already exists.
    UniqueViolation(String),
    Other(String),
}

pub(crate) fn classify_sqlx_error(operation: &str, err: sqlx::Error) -> SqlFailure {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => SqlFailure::UniqueViolation(msg),
                _ => SqlFailure::Other(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            SqlFailure::Other(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            SqlFailure::Other(format!("unexpected row not found in {}", operation))
        }
        _ => SqlFailure::Other(format!("sqlx error in {}: {}", operation, err)),
    }
}
