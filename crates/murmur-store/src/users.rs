//! Account records and handle resolution.

use murmur_shared::{Handle, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert a new account. A taken email yields [`StoreError::Conflict`].
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, email, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.as_str(),
                    user.email.as_str(),
                    user.password_hash,
                    encode_ts(&user.created_at),
                    encode_ts(&user.updated_at),
                ],
            )
            .map_err(|e| StoreError::from_insert(e, &format!("user {}", user.email)))?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, email, password_hash, created_at, updated_at
                 FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_by_email(&self, email: &Handle) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, email, password_hash, created_at, updated_at
                 FROM users WHERE email = ?1",
                params![email.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Resolve a client-facing handle to the internal identifier.
    /// `Ok(None)` means no such account.
    pub fn resolve_user_by_handle(&self, handle: &Handle) -> Result<Option<UserId>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![handle.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(UserId::from))
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let email: String = row.get(1)?;
    let password_hash: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;

    let email = Handle::parse(&email).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            "empty email".into(),
        )
    })?;

    Ok(User {
        id: UserId::from(id),
        email,
        password_hash,
        created_at: decode_ts(&created_str, 3)?,
        updated_at: decode_ts(&updated_str, 4)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::now;

    pub(crate) fn user(db: &Database, id: &str, email: &str) -> User {
        let ts = now();
        let user = User {
            id: UserId::new(id),
            email: Handle::parse(email).unwrap(),
            password_hash: "$argon2id$stub".to_string(),
            created_at: ts,
            updated_at: ts,
        };
        db.create_user(&user).unwrap();
        user
    }

    #[test]
    fn test_create_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let created = user(&db, "u1", "a@example.com");

        assert_eq!(db.get_user(&created.id).unwrap(), created);
        assert_eq!(
            db.get_user_by_email(&Handle::parse("A@example.com").unwrap()).unwrap(),
            created
        );
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "u1", "a@example.com");

        let ts = now();
        let dup = User {
            id: UserId::new("u2"),
            email: Handle::parse("a@example.com").unwrap(),
            password_hash: "x".into(),
            created_at: ts,
            updated_at: ts,
        };
        assert!(matches!(db.create_user(&dup), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_resolve_handle() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "u2", "b@example.com");

        let found = db
            .resolve_user_by_handle(&Handle::parse("b@example.com").unwrap())
            .unwrap();
        assert_eq!(found, Some(UserId::new("u2")));

        let missing = db
            .resolve_user_by_handle(&Handle::parse("ghost@example.com").unwrap())
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_missing_user_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(&UserId::new("nobody")),
            Err(StoreError::NotFound)
        ));
    }
}
