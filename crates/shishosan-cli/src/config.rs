use std::path::PathBuf;

use anyhow::{Context, Result};
use shishosan_crypto::{PasswordContext, PasswordScheme, password::SHA512_DEFAULT_ROUNDS};

pub const DEFAULT_DB_PATH: &str = "shishosan.db";
pub const DEFAULT_LOG_FILTER: &str = "shishosan=info";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub passwords: PasswordContext,
}

impl Config {
    /// Read `SHISHOSAN_*` variables from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("SHISHOSAN_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into());

        let scheme: PasswordScheme = match lookup("SHISHOSAN_PASSWORD_SCHEME") {
            Some(raw) => raw.parse::<PasswordScheme>().context("SHISHOSAN_PASSWORD_SCHEME")?,
            None => PasswordScheme::default(),
        };

        let rounds: usize = match lookup("SHISHOSAN_SHA512_ROUNDS") {
            Some(raw) => raw
                .parse::<usize>()
                .context("SHISHOSAN_SHA512_ROUNDS must be a number")?,
            None => SHA512_DEFAULT_ROUNDS,
        };

        let passwords = PasswordContext::new(scheme, rounds).context("SHISHOSAN_SHA512_ROUNDS")?;

        Ok(Self {
            db_path: PathBuf::from(db_path),
            passwords,
        })
    }
}
