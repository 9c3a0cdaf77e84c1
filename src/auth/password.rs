use crate::error::AppError;
use bcrypt::{hash, verify};

/// Work factor used for stored passwords.
pub const DEFAULT_COST: u32 = 10;

pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost)
        .map_err(|e| AppError::InternalServerError(format!("Failed to hash password: {}", e)))
}

/// Checks `password` against a stored hash. A hash that cannot be parsed is
/// treated as a mismatch and logged.
pub fn verify_password(password: &str, hashed_password: &str) -> bool {
    match verify(password, hashed_password) {
        Ok(matches) => matches,
        Err(e) => {
            log::error!("Stored password hash could not be checked: {}", e);
            false
        }
    }
}
