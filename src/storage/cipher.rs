// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reversible encryption of private-key columns.
//!
//! Keys are sealed with AES-256-GCM under a key derived from the
//! server-held password (PBKDF2-HMAC-SHA256). The salt is generated once
//! per database and persisted in the `meta` table.
//!
//! Sealed layout: `nonce (12) || ciphertext || tag (16)`.
//!
//! The column name is bound as associated data, so a value sealed for
//! `users.private_key` cannot be opened as `devices.private_key`.

use std::num::NonZeroU32;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

pub const SALT_LEN: usize = 16;

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("failed to derive column key")]
    KeyDerivation,

    #[error("failed to gather randomness")]
    Randomness,

    #[error("failed to seal value")]
    Seal,

    #[error("sealed value is truncated")]
    Truncated,

    #[error("sealed value could not be opened (wrong password or corrupted data)")]
    Open,

    #[error("opened value is not valid UTF-8")]
    Utf8,
}

/// Seals and opens private-key columns.
pub struct KeyCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCipher").finish_non_exhaustive()
    }
}

impl KeyCipher {
    /// Derive the column key from a password and salt.
    pub fn derive(password: &[u8], salt: &[u8]) -> Result<Self, CipherError> {
        let mut key_bytes = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            salt,
            password,
            &mut key_bytes,
        );

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes);
        key_bytes.fill(0);
        let key = unbound.map_err(|_| CipherError::KeyDerivation)?;

        Ok(Self {
            key: LessSafeKey::new(key),
            rng: SystemRandom::new(),
        })
    }

    /// Generate a fresh random salt.
    pub fn generate_salt() -> Result<[u8; SALT_LEN], CipherError> {
        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| CipherError::Randomness)?;
        Ok(salt)
    }

    /// Seal `plaintext` for the given column.
    pub fn seal(&self, column: &str, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CipherError::Randomness)?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(column.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| CipherError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    /// Open a value previously sealed for the given column.
    pub fn open(&self, column: &str, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CipherError::Truncated);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CipherError::Truncated)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext_len = self
            .key
            .open_in_place(nonce, Aad::from(column.as_bytes()), &mut in_out)
            .map_err(|_| CipherError::Open)?
            .len();
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }

    pub fn seal_str(&self, column: &str, plaintext: &str) -> Result<Vec<u8>, CipherError> {
        self.seal(column, plaintext.as_bytes())
    }

    pub fn open_string(&self, column: &str, sealed: &[u8]) -> Result<String, CipherError> {
        String::from_utf8(self.open(column, sealed)?).map_err(|_| CipherError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(password: &str) -> KeyCipher {
        KeyCipher::derive(password.as_bytes(), b"0123456789abcdef").unwrap()
    }

    #[test]
    fn seal_then_open() {
        let c = cipher("password");
        let sealed = c.seal_str("users.private_key", "s3cr3t").unwrap();

        assert_ne!(&sealed[NONCE_LEN..], b"s3cr3t");
        assert_eq!(c.open_string("users.private_key", &sealed).unwrap(), "s3cr3t");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let c = cipher("password");
        let a = c.seal_str("users.private_key", "same").unwrap();
        let b = c.seal_str("users.private_key", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_password_fails_to_open() {
        let sealed = cipher("password").seal_str("users.private_key", "s3cr3t").unwrap();
        let err = cipher("not-the-password")
            .open("users.private_key", &sealed)
            .unwrap_err();
        assert!(matches!(err, CipherError::Open));
    }

    #[test]
    fn column_is_bound_as_associated_data() {
        let c = cipher("password");
        let sealed = c.seal_str("users.private_key", "s3cr3t").unwrap();
        assert!(matches!(
            c.open("devices.private_key", &sealed),
            Err(CipherError::Open)
        ));
    }

    #[test]
    fn truncated_value_is_rejected() {
        let c = cipher("password");
        assert!(matches!(
            c.open("users.private_key", &[0u8; 10]),
            Err(CipherError::Truncated)
        ));
    }

    #[test]
    fn salts_are_random() {
        assert_ne!(
            KeyCipher::generate_salt().unwrap(),
            KeyCipher::generate_salt().unwrap()
        );
    }
}
