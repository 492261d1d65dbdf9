pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod swipes;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::info;

pub use error::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }
}

/// Timestamps are stored as RFC 3339 TEXT with millisecond precision, so
/// lexicographic ordering in SQL matches chronological ordering.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
pub(crate) mod test_support {
    use uuid::Uuid;

    use ember_types::models::{Gender, LookingFor};

    use crate::Database;
    use crate::users::NewTelegramUser;

    pub(crate) fn new_telegram_user(telegram_id: i64, name: &str) -> NewTelegramUser {
        NewTelegramUser {
            telegram_id,
            username: Some(format!("{}{}", name.to_lowercase(), telegram_id)),
            first_name: name.to_string(),
            last_name: None,
            age: Some(25),
            gender: Gender::Other,
            looking_for: LookingFor::Both,
            bio: Some("hey there".into()),
            interests: vec!["music".into()],
        }
    }

    /// A user who passes the profile-completeness gate.
    pub(crate) fn complete_user(db: &Database, telegram_id: i64, name: &str) -> Uuid {
        let (user, _) = db
            .upsert_telegram_user(&new_telegram_user(telegram_id, name))
            .unwrap();
        db.add_photo(user.id, "/photos/main.jpg", true).unwrap();
        user.id
    }
}
