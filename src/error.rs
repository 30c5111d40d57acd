//! Error codes shared by every component error type.
//!
//! DESIGN
//! ======
//! Each module owns its own `thiserror` enum. This trait gives all of them a
//! grepable code and a retryable flag so log lines and callers can classify
//! failures without matching on foreign enums.

/// Grepable error code and retryable flag for structured logging.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
