use argon2::password_hash::{self, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier};
use rand_core::OsRng;
use sha_crypt::{Sha512Params, sha512_check, sha512_simple};
use thiserror::Error;

use crate::scheme::{PasswordScheme, SHA512_CRYPT_PREFIX};

/// Rounds used by sha512_crypt when a hash carries no `rounds=` field.
pub const SHA512_DEFAULT_ROUNDS: usize = 5_000;

const SHA512_SALT_MAX_LEN: usize = 16;
const SHA512_DIGEST_LEN: usize = 86;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// The stored hash could not be parsed. This is a data-integrity defect,
    /// not a wrong password.
    #[error("malformed password hash: {0}")]
    Malformed(String),

    #[error("unknown password scheme: {0}")]
    UnknownScheme(String),

    #[error("invalid sha512_crypt rounds: {0}")]
    InvalidRounds(usize),
}

/// Hashing configuration. New hashes use `scheme`; verification accepts any
/// scheme this crate knows so that rotating the default never locks anyone
/// out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordContext {
    scheme: PasswordScheme,
    sha512_rounds: usize,
}

impl Default for PasswordContext {
    fn default() -> Self {
        Self {
            scheme: PasswordScheme::default(),
            sha512_rounds: SHA512_DEFAULT_ROUNDS,
        }
    }
}

impl PasswordContext {
    pub fn new(scheme: PasswordScheme, sha512_rounds: usize) -> Result<Self, PasswordError> {
        Sha512Params::new(sha512_rounds).map_err(|_| PasswordError::InvalidRounds(sha512_rounds))?;
        Ok(Self {
            scheme,
            sha512_rounds,
        })
    }

    pub fn scheme(&self) -> PasswordScheme {
        self.scheme
    }

    pub fn sha512_rounds(&self) -> usize {
        self.sha512_rounds
    }

    /// Hash a raw password with a fresh random salt using the default scheme.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        match self.scheme {
            PasswordScheme::Sha512Crypt => {
                let params = Sha512Params::new(self.sha512_rounds)
                    .map_err(|_| PasswordError::InvalidRounds(self.sha512_rounds))?;
                sha512_simple(password, &params).map_err(|e| PasswordError::Hash(format!("{:?}", e)))
            }
            PasswordScheme::Argon2id => {
                let salt = SaltString::generate(&mut OsRng);
                Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|e| PasswordError::Hash(e.to_string()))
            }
        }
    }

    /// Check a raw password against a stored hash.
    ///
    /// A wrong password is `Ok(false)`. Both backends compare digests in
    /// constant time. An unparseable hash is an error.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        match identify(hash)? {
            PasswordScheme::Sha512Crypt => {
                parse_sha512(hash)?;
                Ok(sha512_check(password, hash).is_ok())
            }
            PasswordScheme::Argon2id => {
                let parsed =
                    PasswordHash::new(hash).map_err(|e| PasswordError::Malformed(e.to_string()))?;
                match Argon2::default().verify_password(password.as_bytes(), &parsed) {
                    Ok(()) => Ok(true),
                    Err(password_hash::Error::Password) => Ok(false),
                    Err(e) => Err(PasswordError::Malformed(e.to_string())),
                }
            }
        }
    }

    /// True when `hash` was produced with a scheme or cost other than this
    /// context's, so it should be replaced on the next successful login.
    /// Unparseable hashes always need rehashing.
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let Ok(scheme) = identify(hash) else {
            return true;
        };
        if scheme != self.scheme {
            return true;
        }

        match scheme {
            PasswordScheme::Sha512Crypt => match parse_sha512(hash) {
                Ok(rounds) => rounds != self.sha512_rounds,
                Err(_) => true,
            },
            PasswordScheme::Argon2id => {
                let Ok(parsed) = PasswordHash::new(hash) else {
                    return true;
                };
                if parsed.algorithm != Algorithm::Argon2id.ident() {
                    return true;
                }
                match Params::try_from(&parsed) {
                    Ok(params) => {
                        params.m_cost() != Params::DEFAULT_M_COST
                            || params.t_cost() != Params::DEFAULT_T_COST
                            || params.p_cost() != Params::DEFAULT_P_COST
                    }
                    Err(_) => true,
                }
            }
        }
    }
}

fn identify(hash: &str) -> Result<PasswordScheme, PasswordError> {
    PasswordScheme::identify(hash).ok_or_else(|| {
        let prefix: String = hash.chars().take(8).collect();
        PasswordError::UnknownScheme(prefix)
    })
}

/// Check the layout of `$6$[rounds=N$]salt$digest` and return its round
/// count. Anything that passes here and still fails `sha512_check` is a
/// wrong password.
fn parse_sha512(hash: &str) -> Result<usize, PasswordError> {
    let malformed = |why: &str| PasswordError::Malformed(format!("sha512_crypt: {}", why));

    let rest = hash
        .strip_prefix(SHA512_CRYPT_PREFIX)
        .ok_or_else(|| malformed("missing $6$ prefix"))?;
    let mut fields: Vec<&str> = rest.split('$').collect();

    let rounds = match fields.first().and_then(|f| f.strip_prefix("rounds=")) {
        Some(raw) => {
            let rounds: usize = raw.parse().map_err(|_| malformed("rounds is not a number"))?;
            Sha512Params::new(rounds).map_err(|_| malformed("rounds out of range"))?;
            fields.remove(0);
            rounds
        }
        None => SHA512_DEFAULT_ROUNDS,
    };

    let [salt, digest] = fields.as_slice() else {
        return Err(malformed("expected salt$digest"));
    };
    if salt.len() > SHA512_SALT_MAX_LEN {
        return Err(malformed("salt too long"));
    }
    if digest.len() != SHA512_DIGEST_LEN || !digest.bytes().all(is_crypt_base64) {
        return Err(malformed("bad digest"));
    }

    Ok(rounds)
}

fn is_crypt_base64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'/'
}
