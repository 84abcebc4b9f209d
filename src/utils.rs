use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand_core::OsRng;

use crate::errors::AppError;

/// Accounts provisioned by an administrator start out with this password and
/// are forced through the change-password flow on first login.
pub const DEFAULT_PASSWORD: &str = "pass";

const MIN_PASSWORD_LENGTH: usize = 12;
const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?/~`";

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|err| AppError::internal(format!("invalid password hash: {err}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Password policy for self-service changes: minimum 12 characters with at
/// least one uppercase letter, one digit and one special character.
pub fn validate_password_strength(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }

    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| SPECIAL_CHARS.contains(c));

    let mut missing = Vec::new();
    if !has_upper {
        missing.push("1 uppercase letter");
    }
    if !has_digit {
        missing.push("1 number");
    }
    if !has_special {
        missing.push("1 special character");
    }

    if !missing.is_empty() {
        return Err(AppError::bad_request(format!(
            "password must contain: {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_policy_rejects_weak_passwords() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("alllowercase1!").is_err());
        assert!(validate_password_strength("NoDigitsHere!").is_err());
        assert!(validate_password_strength("NoSpecials123").is_err());
        assert!(validate_password_strength("Acceptable123!").is_ok());
    }

    #[test]
    fn hash_then_verify_roundtrip() {
        let hash = hash_password("Acceptable123!").unwrap();
        assert!(verify_password("Acceptable123!", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
