//! Entities of the bookmark store.
//!
//! `New*` types are not yet persisted and carry no id. The persisted types
//! mirror their table rows one to one; relations are plain foreign ids,
//! resolved through `queries`.

use std::fmt;

use serde::Serialize;
use shishosan_crypto::{PasswordContext, PasswordError};
use tracing::warn;

/// A stored password hash. There is no way to build one from a raw password
/// without hashing it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(password: &str, ctx: &PasswordContext) -> Result<Self, PasswordError> {
        Ok(Self(ctx.hash(password)?))
    }

    /// Wrap a hash read back from storage. Only row mapping builds these.
    pub(crate) fn from_hash(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn check(&self, password: &str, ctx: &PasswordContext) -> Result<bool, PasswordError> {
        ctx.verify(password, &self.0)
    }

    /// Like `check`, but a corrupt hash counts as a failed match.
    pub fn verify(&self, password: &str, ctx: &PasswordContext) -> bool {
        match self.check(password, ctx) {
            Ok(matched) => matched,
            Err(e) => {
                warn!("Stored credential hash is unusable: {}", e);
                false
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// -- Users --

/// Only obtainable through `NewUser::new`, which hashes the password.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub(crate) name: String,
    pub(crate) credential: Credential,
}

impl NewUser {
    /// Hashes `password` right away; the raw value is not kept.
    pub fn new(
        name: impl Into<String>,
        password: &str,
        ctx: &PasswordContext,
    ) -> Result<Self, PasswordError> {
        Ok(Self {
            name: name.into(),
            credential: Credential::new(password, ctx)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn set_password(&mut self, password: &str, ctx: &PasswordContext) -> Result<(), PasswordError> {
        self.credential = Credential::new(password, ctx)?;
        Ok(())
    }

    pub fn verify_password(&self, password: &str, ctx: &PasswordContext) -> bool {
        self.credential.verify(password, ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub credential: Credential,
    pub created_at: String,
}

impl User {
    /// Replace the credential in memory. Persist with
    /// `queries::update_user_password`.
    pub fn set_password(&mut self, password: &str, ctx: &PasswordContext) -> Result<(), PasswordError> {
        self.credential = Credential::new(password, ctx)?;
        Ok(())
    }

    pub fn verify_password(&self, password: &str, ctx: &PasswordContext) -> bool {
        self.credential.verify(password, ctx)
    }

    /// Surfaces a corrupt stored hash as an error instead of a mismatch.
    pub fn check_password(&self, password: &str, ctx: &PasswordContext) -> Result<bool, PasswordError> {
        self.credential.check(password, ctx)
    }

    pub fn add_bookmark(&self, novel: &Novel) -> NewBookmark {
        NewBookmark::new(self, novel)
    }
}

// -- Novels --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNovel {
    pub name: String,
    pub site_name: Option<String>,
    /// Chapter URL template such as `http://typowriter.org/(\d+).svg`.
    /// Stored verbatim; never interpreted here.
    pub pattern_url: String,
}

impl NewNovel {
    pub fn new(name: impl Into<String>, pattern_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            site_name: None,
            pattern_url: pattern_url.into(),
        }
    }

    pub fn with_site_name(mut self, site_name: impl Into<String>) -> Self {
        self.site_name = Some(site_name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Novel {
    pub id: i64,
    pub name: String,
    pub site_name: Option<String>,
    pub pattern_url: String,
    pub created_at: String,
}

// -- Bookmarks --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    pub user_id: i64,
    pub novel_id: i64,
    pub state: i64,
    pub url: Option<String>,
}

impl NewBookmark {
    pub fn new(user: &User, novel: &Novel) -> Self {
        Self {
            user_id: user.id,
            novel_id: novel.id,
            state: 0,
            url: None,
        }
    }

    pub fn with_state(mut self, state: i64) -> Self {
        self.state = state;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bookmark {
    pub id: i64,
    pub user_id: i64,
    pub novel_id: i64,
    /// Progress marker owned by the crawler.
    pub state: i64,
    pub url: Option<String>,
    pub created_at: String,
}
