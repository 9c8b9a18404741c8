//! Password verification.
//!
//! The original server ships a placeholder verifier ("real bcrypt
//! implementation needed", per its own comment) that accepts one
//! hardcoded password and a dummy hash generator. This module keeps that
//! structure — a real bcrypt KDF is out of scope here too — but replaces
//! the literal password compare with a constant-time one and parses the
//! standard `$2a$/2b$/2y$` hash header so a real verifier can be dropped
//! in behind the same [`PasswordVerifier`] trait later.

/// A parsed (but not cryptographically verified) bcrypt hash header.
#[derive(Debug, PartialEq, Eq)]
pub struct BcryptHash<'a> {
    pub variant: &'a str,
    pub cost: u32,
    pub salt: &'a str,
    pub hash: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    TooShort,
    BadPrefix,
    BadCost,
}

/// Parses `$2a$10$<22-char-salt><31-char-hash>`, matching
/// `parse_bcrypt_hash`'s field layout and bounds (cost 4-31, total length
/// at least 60 bytes).
pub fn parse_bcrypt_hash(encoded: &str) -> Result<BcryptHash<'_>, ParseError> {
    if encoded.len() < 60 {
        return Err(ParseError::TooShort);
    }
    let bytes = encoded.as_bytes();
    if bytes[0] != b'$' || bytes[1] != b'2' {
        return Err(ParseError::BadPrefix);
    }
    let variant_char = bytes[2];
    if !matches!(variant_char, b'a' | b'b' | b'y') || bytes[3] != b'$' {
        return Err(ParseError::BadPrefix);
    }

    let rest = &encoded[4..];
    let dollar = rest.find('$').ok_or(ParseError::BadPrefix)?;
    if dollar > 2 {
        return Err(ParseError::BadPrefix);
    }
    let cost: u32 = rest[..dollar].parse().map_err(|_| ParseError::BadCost)?;
    if !(4..=31).contains(&cost) {
        return Err(ParseError::BadCost);
    }

    let payload = &rest[dollar + 1..];
    if payload.len() < 22 + 31 {
        return Err(ParseError::TooShort);
    }

    Ok(BcryptHash {
        variant: &encoded[1..3],
        cost,
        salt: &payload[..22],
        hash: &payload[22..22 + 31],
    })
}

/// Constant-time byte comparison, independent of where the first
/// mismatch falls.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, password: &str, stored_hash: &str) -> bool;
}

/// Placeholder verifier matching `ct_auth_verify_password`: the stored
/// hash must parse as a well-formed bcrypt header, and the password must
/// match a single configured plaintext. No Blowfish key derivation is
/// performed; this is not a real bcrypt implementation.
pub struct PlaceholderVerifier {
    expected_password: String,
}

impl PlaceholderVerifier {
    pub fn new(expected_password: impl Into<String>) -> Self {
        Self {
            expected_password: expected_password.into(),
        }
    }
}

impl PasswordVerifier for PlaceholderVerifier {
    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        if parse_bcrypt_hash(stored_hash).is_err() {
            return false;
        }
        constant_time_eq(password.as_bytes(), self.expected_password.as_bytes())
    }
}

/// Produces a structurally valid but dummy bcrypt hash, matching
/// `ct_auth_hash_password`'s fixed placeholder output.
pub fn placeholder_hash() -> &'static str {
    "$2a$10$abcdefghijklmnopqrstuv1234567890ABCDEFGHIJKLMNOPQRSTUV"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_hash() {
        let parsed = parse_bcrypt_hash(placeholder_hash()).unwrap();
        assert_eq!(parsed.variant, "2a");
        assert_eq!(parsed.cost, 10);
        assert_eq!(parsed.salt.len(), 22);
        assert_eq!(parsed.hash.len(), 31);
    }

    #[test]
    fn rejects_short_hash() {
        assert_eq!(parse_bcrypt_hash("$2a$10$tooshort"), Err(ParseError::TooShort));
    }

    #[test]
    fn rejects_bad_variant() {
        let bad = "$2z$10$abcdefghijklmnopqrstuv1234567890ABCDEFGHIJKLMNOPQRSTUV";
        assert_eq!(parse_bcrypt_hash(bad), Err(ParseError::BadPrefix));
    }

    #[test]
    fn rejects_out_of_range_cost() {
        let bad = "$2a$99$abcdefghijklmnopqrstuv1234567890ABCDEFGHIJKLMNOPQRSTUV";
        assert_eq!(parse_bcrypt_hash(bad), Err(ParseError::BadCost));
    }

    #[test]
    fn verifier_accepts_configured_password_only() {
        let verifier = PlaceholderVerifier::new("correct horse");
        let hash = placeholder_hash();
        assert!(verifier.verify("correct horse", hash));
        assert!(!verifier.verify("wrong", hash));
    }

    #[test]
    fn verifier_rejects_malformed_hash_even_with_right_password() {
        let verifier = PlaceholderVerifier::new("correct horse");
        assert!(!verifier.verify("correct horse", "not-a-bcrypt-hash"));
    }
}
