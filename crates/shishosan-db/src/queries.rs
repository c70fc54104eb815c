use rusqlite::{Connection, OptionalExtension, Row, params};
use shishosan_crypto::PasswordContext;
use tracing::{debug, info, warn};

use crate::models::{Bookmark, Credential, NewBookmark, NewNovel, NewUser, Novel, User};
use crate::{Database, DbError, Result};

const USER_COLUMNS: &str = "id, name, credential_hash, created_at";
const NOVEL_COLUMNS: &str = "id, name, site_name, pattern_url, created_at";
const BOOKMARK_COLUMNS: &str = "id, user_id, novel_id, state, url, created_at";

// -- Users --

/// Uniqueness of `name` is left to the UNIQUE constraint; a duplicate comes
/// back as `DbError::UniqueViolation`.
pub fn insert_user(conn: &Connection, user: &NewUser) -> Result<User> {
    let sql = format!(
        "INSERT INTO users (name, credential_hash) VALUES (?1, ?2) RETURNING {}",
        USER_COLUMNS
    );
    let user = conn.query_row(&sql, params![user.name, user.credential.as_str()], user_from_row)?;

    debug!(user_id = user.id, "User created");
    Ok(user)
}

pub fn user_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, [id], user_from_row).optional()?)
}

pub fn user_by_name(conn: &Connection, name: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE name = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, [name], user_from_row).optional()?)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?)
}

/// Write the in-memory credential of `user` back to its row.
pub fn update_user_password(conn: &Connection, user: &User) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET credential_hash = ?1 WHERE id = ?2",
        params![user.credential.as_str(), user.id],
    )?;
    if changed == 0 {
        return Err(DbError::not_found("user", user.id));
    }

    debug!(user_id = user.id, "Password updated");
    Ok(())
}

/// Removes the user together with their bookmarks.
pub fn delete_user(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
    if changed > 0 {
        debug!(user_id = id, "User deleted");
    }
    Ok(changed > 0)
}

/// Look up `name` and check `password`. Returns `None` for an unknown user,
/// a wrong password, or an unusable stored hash. On success a hash made with
/// an outdated scheme or cost is replaced with one from `ctx`.
pub fn authenticate(
    conn: &Connection,
    name: &str,
    password: &str,
    ctx: &PasswordContext,
) -> Result<Option<User>> {
    let Some(mut user) = user_by_name(conn, name)? else {
        return Ok(None);
    };

    if !user.verify_password(password, ctx) {
        return Ok(None);
    }

    if ctx.needs_rehash(user.credential.as_str()) {
        user.set_password(password, ctx)?;
        update_user_password(conn, &user)?;
        info!(user_id = user.id, scheme = %ctx.scheme(), "Credential rehashed");
    }

    Ok(Some(user))
}

// -- Novels --

pub fn insert_novel(conn: &Connection, novel: &NewNovel) -> Result<Novel> {
    let sql = format!(
        "INSERT INTO novels (name, site_name, pattern_url) VALUES (?1, ?2, ?3) RETURNING {}",
        NOVEL_COLUMNS
    );
    let novel = conn.query_row(
        &sql,
        params![novel.name, novel.site_name, novel.pattern_url],
        novel_from_row,
    )?;

    debug!(novel_id = novel.id, "Novel created");
    Ok(novel)
}

pub fn novel_by_id(conn: &Connection, id: i64) -> Result<Option<Novel>> {
    let sql = format!("SELECT {} FROM novels WHERE id = ?1", NOVEL_COLUMNS);
    Ok(conn.query_row(&sql, [id], novel_from_row).optional()?)
}

pub fn list_novels(conn: &Connection) -> Result<Vec<Novel>> {
    let sql = format!("SELECT {} FROM novels ORDER BY id", NOVEL_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], novel_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_novels(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM novels", [], |r| r.get(0))?)
}

pub fn update_novel_site_name(conn: &Connection, id: i64, site_name: Option<&str>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE novels SET site_name = ?1 WHERE id = ?2",
        params![site_name, id],
    )?;
    if changed == 0 {
        return Err(DbError::not_found("novel", id));
    }
    Ok(())
}

/// Fails with `DbError::ForeignKeyViolation` while any bookmark still points
/// at the novel.
pub fn delete_novel(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM novels WHERE id = ?1", [id])?;
    if changed > 0 {
        debug!(novel_id = id, "Novel deleted");
    }
    Ok(changed > 0)
}

// -- Bookmarks --

/// Both referenced rows must exist (or have been inserted earlier in the same
/// transaction); otherwise `DbError::ForeignKeyViolation`.
pub fn insert_bookmark(conn: &Connection, bookmark: &NewBookmark) -> Result<Bookmark> {
    let sql = format!(
        "INSERT INTO bookmarks (user_id, novel_id, state, url) VALUES (?1, ?2, ?3, ?4) RETURNING {}",
        BOOKMARK_COLUMNS
    );
    let bookmark = conn.query_row(
        &sql,
        params![bookmark.user_id, bookmark.novel_id, bookmark.state, bookmark.url],
        bookmark_from_row,
    )?;

    debug!(
        bookmark_id = bookmark.id,
        user_id = bookmark.user_id,
        novel_id = bookmark.novel_id,
        "Bookmark created"
    );
    Ok(bookmark)
}

pub fn bookmark_by_id(conn: &Connection, id: i64) -> Result<Option<Bookmark>> {
    let sql = format!("SELECT {} FROM bookmarks WHERE id = ?1", BOOKMARK_COLUMNS);
    Ok(conn.query_row(&sql, [id], bookmark_from_row).optional()?)
}

pub fn bookmarks_for_user(conn: &Connection, user_id: i64) -> Result<Vec<Bookmark>> {
    query_bookmarks(conn, "user_id", user_id)
}

pub fn bookmarks_for_novel(conn: &Connection, novel_id: i64) -> Result<Vec<Bookmark>> {
    query_bookmarks(conn, "novel_id", novel_id)
}

pub fn count_bookmarks(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM bookmarks", [], |r| r.get(0))?)
}

/// Record crawl progress. `url` of `None` keeps the stored one.
pub fn update_bookmark_progress(
    conn: &Connection,
    id: i64,
    state: i64,
    url: Option<&str>,
) -> Result<Bookmark> {
    let sql = format!(
        "UPDATE bookmarks SET state = ?1, url = COALESCE(?2, url) WHERE id = ?3 RETURNING {}",
        BOOKMARK_COLUMNS
    );
    let bookmark = conn
        .query_row(&sql, params![state, url, id], bookmark_from_row)
        .optional()?
        .ok_or_else(|| DbError::not_found("bookmark", id))?;

    debug!(bookmark_id = id, state, "Bookmark progress updated");
    Ok(bookmark)
}

pub fn delete_bookmark(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM bookmarks WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

/// Owner of a bookmark. A missing row means the store lost referential
/// integrity and is reported as `NotFound`.
pub fn bookmark_user(conn: &Connection, bookmark: &Bookmark) -> Result<User> {
    user_by_id(conn, bookmark.user_id)?.ok_or_else(|| {
        warn!(bookmark_id = bookmark.id, "Bookmark references a missing user");
        DbError::not_found("user", bookmark.user_id)
    })
}

pub fn bookmark_novel(conn: &Connection, bookmark: &Bookmark) -> Result<Novel> {
    novel_by_id(conn, bookmark.novel_id)?.ok_or_else(|| {
        warn!(bookmark_id = bookmark.id, "Bookmark references a missing novel");
        DbError::not_found("novel", bookmark.novel_id)
    })
}

fn query_bookmarks(conn: &Connection, column: &str, id: i64) -> Result<Vec<Bookmark>> {
    let sql = format!(
        "SELECT {} FROM bookmarks WHERE {} = ?1 ORDER BY id",
        BOOKMARK_COLUMNS, column
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([id], bookmark_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        credential: Credential::from_hash(row.get(2)?),
        created_at: row.get(3)?,
    })
}

fn novel_from_row(row: &Row<'_>) -> rusqlite::Result<Novel> {
    Ok(Novel {
        id: row.get(0)?,
        name: row.get(1)?,
        site_name: row.get(2)?,
        pattern_url: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn bookmark_from_row(row: &Row<'_>) -> rusqlite::Result<Bookmark> {
    Ok(Bookmark {
        id: row.get(0)?,
        user_id: row.get(1)?,
        novel_id: row.get(2)?,
        state: row.get(3)?,
        url: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// Units of work: each call runs in its own transaction.
impl Database {
    // -- Users --

    pub fn create_user(&self, name: &str, password: &str, ctx: &PasswordContext) -> Result<User> {
        let new_user = NewUser::new(name, password, ctx)?;
        self.transaction(|tx| insert_user(tx, &new_user))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| user_by_id(conn, id))
    }

    pub fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        self.with_conn(|conn| user_by_name(conn, name))
    }

    pub fn change_password(&self, user_id: i64, password: &str, ctx: &PasswordContext) -> Result<User> {
        self.transaction(|tx| {
            let mut user = user_by_id(tx, user_id)?.ok_or_else(|| DbError::not_found("user", user_id))?;
            user.set_password(password, ctx)?;
            update_user_password(tx, &user)?;
            Ok(user)
        })
    }

    pub fn authenticate(&self, name: &str, password: &str, ctx: &PasswordContext) -> Result<Option<User>> {
        self.transaction(|tx| authenticate(tx, name, password, ctx))
    }

    pub fn remove_user(&self, id: i64) -> Result<bool> {
        self.transaction(|tx| delete_user(tx, id))
    }

    // -- Novels --

    pub fn create_novel(&self, novel: &NewNovel) -> Result<Novel> {
        self.transaction(|tx| insert_novel(tx, novel))
    }

    pub fn get_novel(&self, id: i64) -> Result<Option<Novel>> {
        self.with_conn(|conn| novel_by_id(conn, id))
    }

    pub fn remove_novel(&self, id: i64) -> Result<bool> {
        self.transaction(|tx| delete_novel(tx, id))
    }

    // -- Bookmarks --

    pub fn add_bookmark(&self, user: &User, novel: &Novel) -> Result<Bookmark> {
        let bookmark = user.add_bookmark(novel);
        self.transaction(|tx| insert_bookmark(tx, &bookmark))
    }

    pub fn get_bookmark(&self, id: i64) -> Result<Option<Bookmark>> {
        self.with_conn(|conn| bookmark_by_id(conn, id))
    }

    pub fn get_bookmarks_for_user(&self, user_id: i64) -> Result<Vec<Bookmark>> {
        self.with_conn(|conn| bookmarks_for_user(conn, user_id))
    }

    pub fn record_progress(&self, bookmark_id: i64, state: i64, url: Option<&str>) -> Result<Bookmark> {
        self.transaction(|tx| update_bookmark_progress(tx, bookmark_id, state, url))
    }

    pub fn remove_bookmark(&self, id: i64) -> Result<bool> {
        self.transaction(|tx| delete_bookmark(tx, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shishosan_crypto::PasswordScheme;

    const PATTERN: &str = r"http://typowriter.org/(\d+).svg";

    fn setup() -> (Database, PasswordContext) {
        (Database::open_in_memory().unwrap(), PasswordContext::default())
    }

    fn make_user(db: &Database, ctx: &PasswordContext) -> User {
        db.create_user("youjo", "ninja", ctx).unwrap()
    }

    fn make_novel(db: &Database) -> Novel {
        db.create_novel(&NewNovel::new("YouJoの大冒険", PATTERN)).unwrap()
    }

    #[test]
    fn create_user_assigns_id() {
        let (db, ctx) = setup();
        assert_eq!(db.with_conn(count_users).unwrap(), 0);

        let user = db.create_user("ninja", "raija", &ctx).unwrap();
        assert!(user.id > 0);
        assert_eq!(user.name, "ninja");
        assert!(!user.created_at.is_empty());

        let loaded = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(loaded, user);
        assert!(loaded.verify_password("raija", &ctx));
        assert!(!loaded.verify_password("other", &ctx));
        assert_eq!(db.with_conn(count_users).unwrap(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (db, ctx) = setup();
        db.create_user("ninja", "raija", &ctx).unwrap();

        let err = db.create_user("ninja", "other", &ctx).unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation(_)), "got {:?}", err);
        assert_eq!(db.with_conn(count_users).unwrap(), 1);
    }

    #[test]
    fn change_password_is_persisted() {
        let (db, ctx) = setup();
        let user = db.create_user("ninja", "raija", &ctx).unwrap();

        db.change_password(user.id, "youjo", &ctx).unwrap();

        let loaded = db.get_user_by_name("ninja").unwrap().unwrap();
        assert!(!loaded.verify_password("raija", &ctx));
        assert!(loaded.verify_password("youjo", &ctx));
    }

    #[test]
    fn change_password_for_missing_user() {
        let (db, ctx) = setup();
        let err = db.change_password(99, "youjo", &ctx).unwrap_err();
        assert!(matches!(err, DbError::NotFound { entity: "user", .. }));
    }

    #[test]
    fn authenticate_checks_password() {
        let (db, ctx) = setup();
        db.create_user("ninja", "raija", &ctx).unwrap();

        assert!(db.authenticate("ninja", "raija", &ctx).unwrap().is_some());
        assert!(db.authenticate("ninja", "other", &ctx).unwrap().is_none());
        assert!(db.authenticate("nobody", "raija", &ctx).unwrap().is_none());
    }

    #[test]
    fn authenticate_upgrades_old_scheme() {
        let (db, legacy) = setup();
        let current = PasswordContext::new(PasswordScheme::Argon2id, 5_000).unwrap();
        let user = db.create_user("ninja", "raija", &legacy).unwrap();
        assert!(user.credential.as_str().starts_with("$6$"));

        let upgraded = db.authenticate("ninja", "raija", &current).unwrap().unwrap();
        assert!(upgraded.credential.as_str().starts_with("$argon2id$"));

        let stored = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(stored.credential, upgraded.credential);
        assert!(stored.verify_password("raija", &legacy));
    }

    #[test]
    fn authenticate_with_corrupt_hash_fails_closed() {
        let (db, ctx) = setup();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (name, credential_hash) VALUES ('ninja', 'garbage')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(db.authenticate("ninja", "garbage", &ctx).unwrap().is_none());
        let stored = db.get_user_by_name("ninja").unwrap().unwrap();
        assert_eq!(stored.credential.as_str(), "garbage");
    }

    #[test]
    fn novel_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.with_conn(count_novels).unwrap(), 0);

        let novel = make_novel(&db);
        let loaded = db.get_novel(novel.id).unwrap().unwrap();
        assert_eq!(loaded.name, "YouJoの大冒険");
        assert_eq!(loaded.pattern_url, PATTERN);
        assert_eq!(loaded.site_name, None);

        db.with_conn(|conn| update_novel_site_name(conn, novel.id, Some("typowriter")))
            .unwrap();
        let loaded = db.get_novel(novel.id).unwrap().unwrap();
        assert_eq!(loaded.site_name.as_deref(), Some("typowriter"));
        assert_eq!(db.with_conn(list_novels).unwrap().len(), 1);
    }

    #[test]
    fn bookmark_resolves_relations() {
        let (db, ctx) = setup();
        let user = make_user(&db, &ctx);
        let novel = make_novel(&db);

        let bookmark = db.add_bookmark(&user, &novel).unwrap();
        assert_eq!(bookmark.state, 0);
        assert_eq!(bookmark.url, None);

        let loaded = db.get_bookmark(bookmark.id).unwrap().unwrap();
        assert_eq!(loaded, bookmark);

        let (owner, target) = db
            .with_conn(|conn| Ok((bookmark_user(conn, &loaded)?, bookmark_novel(conn, &loaded)?)))
            .unwrap();
        assert_eq!(owner, user);
        assert_eq!(target, novel);
    }

    #[test]
    fn bookmark_with_unknown_novel_is_rejected() {
        let (db, ctx) = setup();
        let user = make_user(&db, &ctx);
        let ghost = Novel {
            id: 404,
            name: "ghost".into(),
            site_name: None,
            pattern_url: PATTERN.into(),
            created_at: String::new(),
        };

        let err = db.add_bookmark(&user, &ghost).unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation(_)), "got {:?}", err);
        assert_eq!(db.with_conn(count_bookmarks).unwrap(), 0);
    }

    #[test]
    fn user_novel_and_bookmark_in_one_transaction() {
        let (db, ctx) = setup();
        let new_user = NewUser::new("ninja", "raija", &ctx).unwrap();
        let new_novel = NewNovel::new("YouJoの大冒険", PATTERN);

        let bookmark = db
            .transaction(|tx| {
                let user = insert_user(tx, &new_user)?;
                let novel = insert_novel(tx, &new_novel)?;
                insert_bookmark(tx, &user.add_bookmark(&novel).with_url("http://typowriter.org/1.svg"))
            })
            .unwrap();

        assert_eq!(bookmark.url.as_deref(), Some("http://typowriter.org/1.svg"));
        assert_eq!(db.get_bookmarks_for_user(bookmark.user_id).unwrap().len(), 1);
    }

    #[test]
    fn progress_updates_state_and_url() {
        let (db, ctx) = setup();
        let user = make_user(&db, &ctx);
        let novel = make_novel(&db);
        let bookmark = db.add_bookmark(&user, &novel).unwrap();

        let updated = db
            .record_progress(bookmark.id, 3, Some("http://typowriter.org/3.svg"))
            .unwrap();
        assert_eq!(updated.state, 3);
        assert_eq!(updated.url.as_deref(), Some("http://typowriter.org/3.svg"));

        let updated = db.record_progress(bookmark.id, 4, None).unwrap();
        assert_eq!(updated.state, 4);
        assert_eq!(updated.url.as_deref(), Some("http://typowriter.org/3.svg"));

        let err = db.record_progress(999, 1, None).unwrap_err();
        assert!(matches!(err, DbError::NotFound { entity: "bookmark", .. }));
    }

    #[test]
    fn deleting_user_cascades_to_bookmarks() {
        let (db, ctx) = setup();
        let user = make_user(&db, &ctx);
        let novel = make_novel(&db);
        db.add_bookmark(&user, &novel).unwrap();

        assert!(db.remove_user(user.id).unwrap());
        assert_eq!(db.with_conn(count_bookmarks).unwrap(), 0);
        assert!(db.get_novel(novel.id).unwrap().is_some());
    }

    #[test]
    fn deleting_followed_novel_is_refused() {
        let (db, ctx) = setup();
        let user = make_user(&db, &ctx);
        let novel = make_novel(&db);
        let bookmark = db.add_bookmark(&user, &novel).unwrap();

        let err = db.remove_novel(novel.id).unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation(_)), "got {:?}", err);

        assert!(db.remove_bookmark(bookmark.id).unwrap());
        assert!(db.remove_novel(novel.id).unwrap());
        assert!(!db.remove_novel(novel.id).unwrap());
    }

    #[test]
    fn bookmarks_listed_per_novel() {
        let (db, ctx) = setup();
        let novel = make_novel(&db);
        let a = db.create_user("a", "pw", &ctx).unwrap();
        let b = db.create_user("b", "pw", &ctx).unwrap();
        db.add_bookmark(&a, &novel).unwrap();
        db.add_bookmark(&b, &novel).unwrap();

        let marks = db.with_conn(|conn| bookmarks_for_novel(conn, novel.id)).unwrap();
        let owners: Vec<i64> = marks.iter().map(|m| m.user_id).collect();
        assert_eq!(owners, vec![a.id, b.id]);
        assert_eq!(db.with_conn(list_users).unwrap().len(), 2);
    }
}
