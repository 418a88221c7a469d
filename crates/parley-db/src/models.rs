//! Database row types. These map directly to SQLite rows and are converted
//! into `parley-types` models at the edge of each query.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::User;

use crate::StoreError;

/// Input for account creation. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
}

pub(crate) struct UserRow {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub logged_in: bool,
    pub last_login: Option<String>,
    pub relationship_id: Option<String>,
    pub created_at: String,
}

pub(crate) const USER_COLUMNS: &str =
    "id, first_name, last_name, email, password, logged_in, last_login, relationship_id, created_at";

impl UserRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            password: row.get(4)?,
            logged_in: row.get(5)?,
            last_login: row.get(6)?,
            relationship_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_uuid(&row.id)?,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            password_hash: row.password,
            logged_in: row.logged_in,
            last_login: row.last_login.as_deref().map(parse_time).transpose()?,
            relationship_id: row.relationship_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_time(&row.created_at)?,
        })
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("id '{}': {}", raw, e)))
}

pub(crate) fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

pub(crate) fn time_from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} out of range", micros)))
}
