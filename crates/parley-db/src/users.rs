use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::User;

use crate::error::{OptionalExt, is_unique_violation};
use crate::models::{NewUser, USER_COLUMNS, UserRow};
use crate::{Database, StoreError, expect_one};

impl Database {
    /// Create a user together with its empty relationship record.
    ///
    /// The user row, the relationship row and the back-reference stamped on
    /// the user commit together or not at all.
    pub fn create_user(&self, new_user: &NewUser) -> Result<User, StoreError> {
        let user_id = Uuid::new_v4();
        let relationship_id = Uuid::new_v4();
        let created_at = Utc::now().to_rfc3339();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                [&new_user.email],
                |row| row.get(0),
            )?;
            if taken {
                return Err(StoreError::DuplicateEmail(new_user.email.clone()));
            }

            tx.execute(
                "INSERT INTO users (id, first_name, last_name, email, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    user_id.to_string(),
                    &new_user.first_name,
                    &new_user.last_name,
                    &new_user.email,
                    &new_user.password_hash,
                    &created_at,
                ),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateEmail(new_user.email.clone())
                } else {
                    e.into()
                }
            })?;

            let inserted = tx.execute(
                "INSERT INTO relationships (id, owner_id) VALUES (?1, ?2)",
                (relationship_id.to_string(), user_id.to_string()),
            )?;
            expect_one(inserted, "create relationship record")?;

            let stamped = tx.execute(
                "UPDATE users SET relationship_id = ?1 WHERE id = ?2 AND relationship_id IS NULL",
                (relationship_id.to_string(), user_id.to_string()),
            )?;
            expect_one(stamped, "stamp relationship on user")?;

            let user =
                query_user(&tx, "id", &user_id.to_string())?.ok_or(StoreError::NotFound)?;
            tx.commit()?;
            Ok(user)
        })
        .inspect(|user| info!("Created user {} ({})", user.email, user.id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.with_conn(|conn| query_user(conn, "email", email))?
            .ok_or(StoreError::NotFound)
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))?
            .ok_or(StoreError::NotFound)
    }

    /// Fetch several users, preserving the order of `ids`. Unknown ids are
    /// skipped.
    pub fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        self.with_conn(|conn| {
            let mut users = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(user) = query_user(conn, "id", &id.to_string())? {
                    users.push(user);
                }
            }
            Ok(users)
        })
    }

    pub fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (password_hash, id.to_string()),
            )?;
            expect_one(changed, format!("update password of {}", id))
        })
    }

    pub fn update_name(
        &self,
        id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET first_name = ?1, last_name = ?2 WHERE id = ?3",
                (first_name, last_name, id.to_string()),
            )?;
            expect_one(changed, format!("update name of {}", id))
        })
    }

    pub fn set_logged_in(&self, id: Uuid, logged_in: bool) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET logged_in = ?1 WHERE id = ?2",
                (logged_in, id.to_string()),
            )?;
            expect_one(changed, format!("set logged_in of {}", id))
        })?;
        debug!("User {} logged_in={}", id, logged_in);
        Ok(())
    }

    /// Mark the user online and stamp the login time.
    pub fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET logged_in = 1, last_login = ?1 WHERE id = ?2",
                (at.to_rfc3339(), id.to_string()),
            )?;
            expect_one(changed, format!("record login of {}", id))?;
            query_user(conn, "id", &id.to_string())?.ok_or(StoreError::NotFound)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<User>, StoreError> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], UserRow::from_row).optional()?;
    row.map(User::try_from).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::new_user;

    #[test]
    fn create_user_stamps_relationship() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(&new_user("a@x.com")).unwrap();

        let rel_id = user.relationship_id.expect("relationship stamped");
        let rel = db.get_relationship(user.id).unwrap();
        assert_eq!(rel.id, rel_id);
        assert!(!user.logged_in);
        assert!(user.last_login.is_none());
    }

    #[test]
    fn duplicate_email_is_rejected_without_second_document() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("a@x.com")).unwrap();

        let err = db.create_user(&new_user("a@x.com")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateEmail(ref e) if e == "a@x.com"
        ));

        let (users, rels): (i64, i64) = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM users), (SELECT COUNT(*) FROM relationships)",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .unwrap();
        assert_eq!((users, rels), (1, 1));
    }

    #[test]
    fn lookups_report_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_user_by_email("nobody@x.com").unwrap_err().is_not_found());
        assert!(db.get_user_by_id(Uuid::new_v4()).unwrap_err().is_not_found());
    }

    #[test]
    fn record_login_sets_flag_and_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(&new_user("a@x.com")).unwrap();

        let now = Utc::now();
        let user = db.record_login(user.id, now).unwrap();
        assert!(user.logged_in);
        assert_eq!(user.last_login.unwrap().timestamp(), now.timestamp());

        db.set_logged_in(user.id, false).unwrap();
        assert!(!db.get_user_by_id(user.id).unwrap().logged_in);
    }

    #[test]
    fn updates_on_missing_user_are_no_document_update() {
        let db = Database::open_in_memory().unwrap();
        let ghost = Uuid::new_v4();

        assert!(matches!(
            db.update_name(ghost, "A", "B"),
            Err(StoreError::NoDocumentUpdate(_))
        ));
        assert!(matches!(
            db.update_password(ghost, "h"),
            Err(StoreError::NoDocumentUpdate(_))
        ));
    }
}
