use crate::Database;
use crate::models::UserRow;
use anyhow::Result;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;

/// Returned (inside `anyhow::Error`) when the username already has a row.
#[derive(Debug, Error)]
#[error("username {0} is already registered")]
pub struct UsernameTaken(pub String);

const USER_COLUMNS: &str = "id, username, email, password, created_at";

impl Database {
    // -- Users --

    /// Insert a user and return the stored row. A duplicate username fails
    /// with [`UsernameTaken`], which callers can recover with `downcast_ref`.
    pub fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<UserRow> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, email, password) VALUES (?1, ?2, ?3)",
                (username, email, password_hash),
            );
            match inserted {
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(UsernameTaken(username.to_string()).into());
                }
                other => {
                    other?;
                }
            }
            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    /// All users in registration order.
    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS))?;
    Ok(stmt.query_row([username], map_user).optional()?)
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))?;
    Ok(stmt.query_row([id], map_user).optional()?)
}
