use rusqlite::{Connection, params};

use crate::error::{StoreError, StoreResult, is_unique_violation};
use crate::models::UserRow;
use crate::{Database, OptionalExt};

/// Shorter prefixes would sweep most of the user table.
const MIN_SEARCH_PREFIX: usize = 4;

/// Stateless input check for username search.
pub fn validate_search_prefix(prefix: &str) -> StoreResult<()> {
    if prefix.chars().count() < MIN_SEARCH_PREFIX {
        return Err(StoreError::Validation(format!(
            "search prefix must be at least {MIN_SEARCH_PREFIX} characters"
        )));
    }
    Ok(())
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        about: Option<&str>,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, about) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, password_hash, about],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict("username already taken")
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_user_by_id(&self, id: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                params![id, password_hash],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound("user"));
            }
            Ok(())
        })
    }

    pub fn update_about(&self, id: &str, about: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET about = ?2 WHERE id = ?1",
                params![id, about],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound("user"));
            }
            Ok(())
        })
    }

    /// Users whose username starts with `prefix`, sorted by username.
    pub fn search_users(&self, prefix: &str) -> StoreResult<Vec<UserRow>> {
        validate_search_prefix(prefix)?;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, about, created_at
                 FROM users
                 WHERE username LIKE ?1 ESCAPE '\\'
                 ORDER BY username",
            )?;

            let pattern = format!("{}%", escape_like(prefix));
            let rows = stmt
                .query_map([pattern], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

/// LIKE wildcards in user input must match literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn query_user_by_username(conn: &Connection, username: &str) -> StoreResult<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, password, about, created_at FROM users WHERE username = ?1",
    )?;

    let row = stmt.query_row([username], map_user_row).optional()?;
    Ok(row)
}

fn query_user_by_id(conn: &Connection, id: &str) -> StoreResult<Option<UserRow>> {
    let mut stmt = conn
        .prepare("SELECT id, username, password, about, created_at FROM users WHERE id = ?1")?;

    let row = stmt.query_row([id], map_user_row).optional()?;
    Ok(row)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        about: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "$argon2id$stub", None).unwrap();
        id
    }

    #[test]
    fn create_and_fetch_roundtrip() {
        let db = test_db();
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, "alice", "$argon2id$stub", Some("hi there"))
            .unwrap();

        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.about.as_deref(), Some("hi there"));

        let same = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(same.username, "alice");

        assert!(db.get_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let db = test_db();
        add_user(&db, "alice");

        let err = db
            .create_user(&Uuid::new_v4().to_string(), "alice", "$argon2id$other", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn password_and_about_updates_persist() {
        let db = test_db();
        let id = add_user(&db, "alice");

        db.update_password(&id, "$argon2id$new").unwrap();
        db.update_about(&id, "rust enjoyer").unwrap();

        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(user.password, "$argon2id$new");
        assert_eq!(user.about.as_deref(), Some("rust enjoyer"));

        let err = db.update_password("no-such-id", "$x").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn search_matches_prefix_only() {
        let db = test_db();
        add_user(&db, "samantha");
        add_user(&db, "samuel");
        add_user(&db, "thomas");

        let hits = db.search_users("sama").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].username, "samantha");

        let err = db.search_users("sam").unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let db = test_db();
        add_user(&db, "percent");

        assert!(db.search_users("perc%").unwrap().is_empty());
        assert_eq!(db.search_users("perc").unwrap().len(), 1);
    }
}
