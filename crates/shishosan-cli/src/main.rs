mod config;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use shishosan_crypto::PasswordContext;
use shishosan_db::models::{NewNovel, User};
use shishosan_db::{Database, queries};

use crate::config::{Config, DEFAULT_LOG_FILTER};

#[derive(Debug, Parser)]
#[command(name = "shishosan", about = "Manage the shishosan bookmark store")]
struct Cli {
    /// SQLite database file (overrides SHISHOSAN_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database file and apply migrations
    InitDb,
    /// Register a user. The password is read from stdin when omitted.
    CreateUser {
        name: String,
        #[arg(long)]
        password: Option<String>,
    },
    ChangePassword {
        name: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Exit status 0 when the password matches, 1 otherwise. Read-only:
    /// stored hashes are never rewritten here.
    VerifyPassword {
        name: String,
        #[arg(long)]
        password: Option<String>,
    },
    AddNovel {
        name: String,
        pattern_url: String,
        #[arg(long)]
        site: Option<String>,
    },
    AddBookmark {
        user: String,
        novel_id: i64,
        #[arg(long)]
        url: Option<String>,
    },
    ListBookmarks {
        user: String,
    },
    ListNovels,
}

fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    run(&db, &config, cli.command)
}

fn run(db: &Database, config: &Config, command: Command) -> Result<ExitCode> {
    let ctx = &config.passwords;

    match command {
        Command::InitDb => {
            info!("Database ready at {}", config.db_path.display());
        }
        Command::CreateUser { name, password } => {
            let password = password_or_stdin(password)?;
            let user = db.create_user(&name, &password, ctx)?;
            print_json(&user)?;
        }
        Command::ChangePassword { name, password } => {
            let user = find_user(db, &name)?;
            let password = password_or_stdin(password)?;
            db.change_password(user.id, &password, ctx)?;
            info!(user_id = user.id, "Password changed");
        }
        Command::VerifyPassword { name, password } => {
            let password = password_or_stdin(password)?;
            if !password_matches(db, &name, &password, ctx)? {
                eprintln!("password does not match");
                return Ok(ExitCode::FAILURE);
            }
            println!("ok");
        }
        Command::AddNovel {
            name,
            pattern_url,
            site,
        } => {
            let mut novel = NewNovel::new(name, pattern_url);
            if let Some(site) = site {
                novel = novel.with_site_name(site);
            }
            print_json(&db.create_novel(&novel)?)?;
        }
        Command::AddBookmark {
            user,
            novel_id,
            url,
        } => {
            let user = find_user(db, &user)?;
            let novel = db
                .get_novel(novel_id)?
                .with_context(|| format!("no novel with id {}", novel_id))?;

            let mut bookmark = user.add_bookmark(&novel);
            if let Some(url) = url {
                bookmark = bookmark.with_url(url);
            }
            print_json(&db.transaction(|tx| queries::insert_bookmark(tx, &bookmark))?)?;
        }
        Command::ListBookmarks { user } => {
            let user = find_user(db, &user)?;
            print_json(&db.get_bookmarks_for_user(user.id)?)?;
        }
        Command::ListNovels => {
            print_json(&db.with_conn(queries::list_novels)?)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Unknown users and unusable hashes count as a mismatch.
fn password_matches(db: &Database, name: &str, password: &str, ctx: &PasswordContext) -> Result<bool> {
    Ok(db
        .get_user_by_name(name)?
        .is_some_and(|user| user.verify_password(password, ctx)))
}

fn find_user(db: &Database, name: &str) -> Result<User> {
    db.get_user_by_name(name)?
        .with_context(|| format!("no user named {}", name))
}

fn password_or_stdin(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shishosan_crypto::PasswordScheme;

    fn config(passwords: PasswordContext) -> Config {
        Config {
            db_path: PathBuf::from(":memory:"),
            passwords,
        }
    }

    #[test]
    fn verify_password_leaves_hash_alone() {
        let db = Database::open_in_memory().unwrap();
        let legacy = PasswordContext::default();
        let user = db.create_user("ninja", "raija", &legacy).unwrap();

        // A context that would upgrade the hash on login.
        let current = PasswordContext::new(PasswordScheme::Argon2id, 5_000).unwrap();
        assert!(current.needs_rehash(user.credential.as_str()));

        assert!(password_matches(&db, "ninja", "raija", &current).unwrap());
        assert!(!password_matches(&db, "ninja", "other", &current).unwrap());
        assert!(!password_matches(&db, "nobody", "raija", &current).unwrap());

        let stored = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(stored.credential, user.credential);
    }

    #[test]
    fn verify_command_reports_through_exit_code() {
        let db = Database::open_in_memory().unwrap();
        let cfg = config(PasswordContext::default());
        db.create_user("ninja", "raija", &cfg.passwords).unwrap();

        let ok = run(
            &db,
            &cfg,
            Command::VerifyPassword {
                name: "ninja".into(),
                password: Some("raija".into()),
            },
        )
        .unwrap();
        assert_eq!(ok, ExitCode::SUCCESS);

        let mismatch = run(
            &db,
            &cfg,
            Command::VerifyPassword {
                name: "ninja".into(),
                password: Some("other".into()),
            },
        )
        .unwrap();
        assert_eq!(mismatch, ExitCode::FAILURE);
    }
}
