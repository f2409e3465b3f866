//! TOTP generation for automated login flows.
//!
//! Both supported brokers gate their automated login behind a time-based
//! one-time password; the user supplies the base32 secret from their
//! authenticator-app enrollment in config as `totp_secret`.
//!
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::{DalalError, Result};

/// Generate the current 6-digit TOTP code for a base32-encoded secret.
pub(crate) fn generate(secret: &str) -> Result<String> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| DalalError::auth(format!("Invalid TOTP secret: {:?}", e)))?;
    let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, bytes);
    totp.generate_current()
        .map_err(|e| DalalError::auth(format!("Failed to generate TOTP: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_six_digits_for_valid_secret() {
        // RFC 4648 base32 for "Hello!" repeated - any valid secret will do.
        let code = generate("JBSWY3DPEHPK3PXP").unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn invalid_secret_is_an_auth_error() {
        let err = generate("not-base32!").unwrap_err();
        assert!(matches!(err, DalalError::Authentication { .. }));
    }
}
