//! Shishosan Crypto Library
//!
//! Credential hashing for user accounts. Passwords are never stored or
//! compared in plaintext: a `PasswordContext` turns them into salted
//! crypt/PHC strings and checks candidates by recomputation.
//!
//! The context is a plain value handed to whoever needs it, so the default
//! scheme can be rotated (sha512_crypt -> argon2id) while hashes written by
//! the old scheme keep verifying.

pub mod password;
pub mod scheme;

pub use password::{PasswordContext, PasswordError};
pub use scheme::PasswordScheme;
