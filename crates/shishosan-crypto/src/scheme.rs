use std::fmt;
use std::str::FromStr;

use crate::password::PasswordError;

/// Prefix of a SHA-512 crypt string (`$6$[rounds=N$]salt$hash`).
pub const SHA512_CRYPT_PREFIX: &str = "$6$";

/// Prefix shared by all Argon2 PHC strings.
pub const ARGON2_PREFIX: &str = "$argon2";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PasswordScheme {
    /// glibc-compatible SHA-512 crypt, the scheme existing accounts use.
    #[default]
    Sha512Crypt,
    Argon2id,
}

impl PasswordScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            PasswordScheme::Sha512Crypt => "sha512_crypt",
            PasswordScheme::Argon2id => "argon2id",
        }
    }

    /// Detect which scheme produced a stored hash, from its prefix alone.
    /// Returns `None` for anything unrecognised, including the empty string.
    pub fn identify(hash: &str) -> Option<Self> {
        if hash.starts_with(SHA512_CRYPT_PREFIX) {
            Some(PasswordScheme::Sha512Crypt)
        } else if hash.starts_with(ARGON2_PREFIX) {
            Some(PasswordScheme::Argon2id)
        } else {
            None
        }
    }
}

impl fmt::Display for PasswordScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PasswordScheme {
    type Err = PasswordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha512_crypt" | "sha512-crypt" | "sha512" => Ok(PasswordScheme::Sha512Crypt),
            "argon2id" | "argon2" => Ok(PasswordScheme::Argon2id),
            other => Err(PasswordError::UnknownScheme(other.to_string())),
        }
    }
}
