use chatter_types::models::User;

/// Database row types. These map directly to SQLite rows and are kept apart
/// from the API models so the password hash stays inside the store.
#[derive(Debug)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
        }
    }
}
