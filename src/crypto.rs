// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key pair generation for users and devices.
//!
//! The registrar only depends on the [`KeyGenerator`] trait. The default
//! implementation produces secp256k1 key pairs encoded as base64 strings:
//!
//! - private key: the 32-byte secret scalar
//! - public key: the 33-byte compressed SEC1 point

use std::fmt;

use base64ct::{Base64, Encoding};
use k256::ecdsa::SigningKey;
use ring::rand::{SecureRandom, SystemRandom};

#[derive(Debug, thiserror::Error)]
pub enum KeyGenError {
    #[error("failed to gather randomness for private key")]
    Randomness,

    #[error("generated scalar is not a valid secp256k1 key: {0}")]
    InvalidScalar(String),
}

/// A private/public key pair, both base64 encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Produces fresh key pairs on demand.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyPair, KeyGenError>;
}

/// secp256k1 key generator backed by the operating system RNG.
#[derive(Debug)]
pub struct Secp256k1KeyGenerator {
    rng: SystemRandom,
}

impl Default for Secp256k1KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Secp256k1KeyGenerator {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl KeyGenerator for Secp256k1KeyGenerator {
    fn generate(&self) -> Result<KeyPair, KeyGenError> {
        let mut secret = [0u8; 32];
        self.rng
            .fill(&mut secret)
            .map_err(|_| KeyGenError::Randomness)?;

        let signing_key = SigningKey::from_slice(&secret)
            .map_err(|e| KeyGenError::InvalidScalar(e.to_string()))?;
        secret.fill(0);

        let public_point = signing_key.verifying_key().to_encoded_point(true);

        Ok(KeyPair {
            private_key: Base64::encode_string(&signing_key.to_bytes()),
            public_key: Base64::encode_string(public_point.as_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_decodable_keys() {
        let pair = Secp256k1KeyGenerator::new().generate().unwrap();

        let private = Base64::decode_vec(&pair.private_key).unwrap();
        let public = Base64::decode_vec(&pair.public_key).unwrap();
        assert_eq!(private.len(), 32);
        assert_eq!(public.len(), 33);
        assert!(public[0] == 0x02 || public[0] == 0x03);

        // The public key must be derived from the private key.
        let signing_key = SigningKey::from_slice(&private).unwrap();
        let derived = signing_key.verifying_key().to_encoded_point(true);
        assert_eq!(derived.as_bytes(), public.as_slice());
    }

    #[test]
    fn generates_unique_keys() {
        let generator = Secp256k1KeyGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..10 {
            let pair = generator.generate().unwrap();
            assert!(seen.insert(pair.public_key), "Generated duplicate key");
        }
    }

    #[test]
    fn debug_redacts_private_key() {
        let pair = KeyPair {
            private_key: "c2VjcmV0".to_string(),
            public_key: "cHVibGlj".to_string(),
        };
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("cHVibGlj"));
    }
}
