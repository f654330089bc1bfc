//! Argon2id password hashing.
//!
//! Hashes are stored in PHC string format so the salt and the cost parameters
//! travel with the digest. `verify` returns `Ok(false)` only for a genuine
//! mismatch; a stored value that cannot be parsed is a [`HashingError`].

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_ITERATIONS: u32 = 2;
pub const DEFAULT_PARALLELISM: u32 = 1;

#[derive(Debug, Error)]
pub enum HashingError {
    #[error("invalid hashing cost: {0}")]
    InvalidCost(argon2::Error),
    #[error("malformed password hash")]
    MalformedHash,
    #[error("password hashing failed: {0}")]
    Hash(password_hash::Error),
    #[error("password verification failed: {0}")]
    Verify(password_hash::Error),
}

/// Argon2id work factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Plaintext behind the decoy hash. The decoy result is always discarded.
const DECOY_PLAINTEXT: &str = "gatehouse-decoy-credential";

#[derive(Debug)]
pub struct CredentialHasher {
    params: Params,
    decoy: String,
    verifications: AtomicU64,
}

impl CredentialHasher {
    /// # Errors
    /// Returns `HashingError::InvalidCost` if Argon2 rejects the parameters.
    pub fn new(cost: HashCost) -> Result<Self, HashingError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(HashingError::InvalidCost)?;
        let mut hasher = Self {
            params,
            decoy: String::new(),
            verifications: AtomicU64::new(0),
        };
        hasher.decoy = hasher.hash(&SecretString::from(DECOY_PLAINTEXT.to_string()))?;
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a plaintext password with a fresh random salt.
    ///
    /// # Errors
    /// Returns `HashingError::Hash` if Argon2 fails.
    pub fn hash(&self, plaintext: &SecretString) -> Result<String, HashingError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plaintext.expose_secret().as_bytes(), &salt)
            .map_err(HashingError::Hash)?;
        Ok(hash.to_string())
    }

    /// Check a plaintext password against a stored PHC hash.
    ///
    /// The cost parameters embedded in `hashed` win over the configured ones, so
    /// raising the work factor does not lock out existing principals.
    ///
    /// # Errors
    /// Returns `HashingError::MalformedHash` if `hashed` is not a valid PHC string,
    /// and `HashingError::Verify` for any other Argon2 fault.
    pub fn verify(&self, plaintext: &SecretString, hashed: &str) -> Result<bool, HashingError> {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        let parsed = PasswordHash::new(hashed).map_err(|_| HashingError::MalformedHash)?;
        match self
            .argon2()
            .verify_password(plaintext.expose_secret().as_bytes(), &parsed)
        {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(HashingError::Verify(err)),
        }
    }

    /// Spend the same work as a real `verify` when there is no stored hash to check,
    /// so a lookup miss takes as long as a wrong password.
    ///
    /// # Errors
    /// Returns `HashingError::Verify` if Argon2 fails.
    pub fn verify_decoy(&self, plaintext: &SecretString) -> Result<(), HashingError> {
        self.verify(plaintext, &self.decoy).map(|_| ())
    }

    /// Number of verifications run, decoys included.
    #[must_use]
    pub fn verifications(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }
}
