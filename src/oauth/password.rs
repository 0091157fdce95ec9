/// Argon2id password and client-secret hashing
use crate::error::{IdentityError, IdentityResult};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString},
    Argon2,
};
use rand::RngCore;

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 6;

#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

// Low-cost parameters for tests
#[cfg(test)]
fn hasher() -> Argon2<'static> {
    let params = argon2::Params::new(1024, 1, 1, None).expect("static argon2 params");
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
}

/// Hash a secret into a PHC string
pub fn hash(secret: &str) -> IdentityResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| IdentityError::Internal(format!("Salt encoding failed: {}", e)))?;

    hasher()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a secret against a stored PHC string
pub fn verify(secret: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => hasher()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

/// Reject passwords that are too short
pub fn validate(password: &str) -> IdentityResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(IdentityError::ValidationFailed(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let stored = hash("test_password").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify("test_password", &stored));
        assert!(!verify("wrong_password", &stored));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash("same").unwrap(), hash("same").unwrap());
    }

    #[test]
    fn test_verify_malformed_hash() {
        assert!(!verify("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_validate_length() {
        assert!(validate("12345").is_err());
        assert!(validate("123456").is_ok());
    }
}
