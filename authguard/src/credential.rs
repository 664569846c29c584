//! Credential encoding and comparison
//!
//! The password history guard never compares raw strings. It goes through a
//! [`CredentialComparator`], by default [`Argon2Comparator`], which hashes
//! with Argon2id and verifies in constant time.
//!
//! # Example
//!
//! ```rust,ignore
//! use authguard::credential::{Argon2Comparator, CredentialComparator};
//!
//! let comparator = Argon2Comparator::default();
//! let encoded = comparator.encode("my_secure_password")?;
//! assert!(comparator.matches("my_secure_password", &encoded)?);
//! assert!(!comparator.matches("wrong_password", &encoded)?);
//! ```

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

/// Encodes raw credentials and compares candidates against encoded values
///
/// Implementations are CPU-bound and synchronous; async callers run them on
/// the blocking pool.
pub trait CredentialComparator: Send + Sync + 'static {
    /// Encode a raw credential for storage
    fn encode(&self, raw: &str) -> Result<String>;

    /// Whether `candidate` matches `encoded`, compared in constant time
    fn matches(&self, candidate: &str, encoded: &str) -> Result<bool>;
}

/// Argon2id cost parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Settings {
    /// Memory cost in KiB (default: 19456 = 19 MiB)
    #[serde(default = "default_memory_cost")]
    pub memory_cost_kib: u32,

    /// Time cost / iterations (default: 2)
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,

    /// Parallelism degree (default: 1)
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for Argon2Settings {
    fn default() -> Self {
        Self {
            memory_cost_kib: default_memory_cost(),
            time_cost: default_time_cost(),
            parallelism: default_parallelism(),
        }
    }
}

impl Argon2Settings {
    /// Validate the cost parameters, returning an error message if invalid
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.params()
            .map(|_| ())
            .map_err(|e| format!("invalid Argon2 parameters: {}", e))
    }

    fn params(&self) -> std::result::Result<Params, argon2::Error> {
        Params::new(self.memory_cost_kib, self.time_cost, self.parallelism, None)
    }
}

fn default_memory_cost() -> u32 {
    Params::DEFAULT_M_COST
}

fn default_time_cost() -> u32 {
    Params::DEFAULT_T_COST
}

fn default_parallelism() -> u32 {
    Params::DEFAULT_P_COST
}

/// Argon2id comparator
///
/// Encoded values are PHC strings, so verification reads the parameters
/// from the stored value and keeps working after a parameter change.
#[derive(Clone)]
pub struct Argon2Comparator {
    params: Params,
}

impl Default for Argon2Comparator {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Comparator {
    /// Create a comparator with custom cost parameters
    pub fn new(settings: &Argon2Settings) -> Result<Self> {
        let params = settings
            .params()
            .map_err(|e| Error::InvalidConfig(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(Self { params })
    }

    /// Comparator using the `[credential]` section of the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.credential)
    }
}

impl CredentialComparator for Argon2Comparator {
    fn encode(&self, raw: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());

        let hash = argon2
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| Error::credential("Failed to hash credential", e))?;

        Ok(hash.to_string())
    }

    fn matches(&self, candidate: &str, encoded: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(encoded)
            .map_err(|e| Error::credential("Invalid credential hash format", e))?;

        // Parameters are read from the hash
        match Argon2::default().verify_password(candidate.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::credential("Credential verification failed", e)),
        }
    }
}
