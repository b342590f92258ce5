use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// argon2 compares digests in constant time.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

lazy_static! {
    static ref DUMMY_HASH: Option<String> = hash_password("dummy-password-for-timing").ok();
}

/// Burns the same work as a real check so unknown emails are not distinguishable by latency.
pub fn verify_dummy(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_hash_is_a_salted_argon2_phc_string() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert!(a.starts_with("$argon2"));
        assert_ne!(a, b);
        assert!(!a.contains("same-password"));
        assert!(verify_password("same-password", &a).unwrap());
        assert!(verify_password("same-password", &b).unwrap());
    }

    #[test]
    fn near_miss_passwords_are_rejected() {
        let hash = hash_password("password1").unwrap();
        for attempt in ["password", "password12", "Password1", " password1", ""] {
            assert!(!verify_password(attempt, &hash).unwrap(), "{attempt:?} accepted");
        }
    }

    #[test]
    fn unparseable_hash_is_an_error_not_a_mismatch() {
        assert!(verify_password("anything", "plaintext-in-db").is_err());
    }

    #[test]
    fn dummy_hash_is_valid_and_rejects_real_passwords() {
        let hash = DUMMY_HASH.as_deref().expect("dummy hash is computed");
        assert!(PasswordHash::new(hash).is_ok());
        assert!(!verify_password("password1", hash).unwrap());
        verify_dummy("password1");
    }
}
