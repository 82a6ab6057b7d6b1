use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, is_unique_violation};
use crate::models::{ConversationRow, MessageRow};
use crate::{Database, OptionalExt};

/// Message bodies are limited to this many characters.
const MAX_CONTENT_CHARS: usize = 300;

/// Stateless message body check: 1–300 characters.
pub fn validate_content(content: &str) -> StoreResult<()> {
    let chars = content.chars().count();
    if chars == 0 {
        return Err(StoreError::Validation(
            "message content cannot be empty".into(),
        ));
    }
    if chars > MAX_CONTENT_CHARS {
        return Err(StoreError::Validation(format!(
            "message content is limited to {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

impl Database {
    // -- Conversations & membership --

    /// Create a conversation with the creator as its only member.
    /// Summary row and membership row commit together or not at all.
    pub fn create_conversation(&self, creator_id: &str) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.with_tx(|tx| {
            insert_summary(tx, &id, 1, &now)?;
            insert_member(tx, &id, creator_id, &now)?;
            Ok(())
        })?;

        Ok(id)
    }

    /// Two users who mutually agree to connect share a fresh conversation.
    /// Driven by connection flows outside the HTTP surface.
    pub fn create_direct_conversation(&self, user_a: &str, user_b: &str) -> StoreResult<String> {
        if user_a == user_b {
            return Err(StoreError::Validation(
                "cannot open a direct conversation with yourself".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.with_tx(|tx| {
            insert_summary(tx, &id, 2, &now)?;
            insert_member(tx, &id, user_a, &now)?;
            insert_member(tx, &id, user_b, &now)?;
            Ok(())
        })?;

        Ok(id)
    }

    /// Add `target_user_id` to a conversation the acting user belongs to.
    /// Membership row and member_count bump commit together.
    pub fn add_member(
        &self,
        acting_user_id: &str,
        conversation_id: &str,
        target_user_id: &str,
    ) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();

        self.with_tx(|tx| {
            if !query_user_exists(tx, target_user_id)? {
                return Err(StoreError::NotFound("user"));
            }
            if !query_is_member(tx, acting_user_id, conversation_id)? {
                return Err(StoreError::Forbidden);
            }
            if query_is_member(tx, target_user_id, conversation_id)? {
                return Err(StoreError::Conflict(
                    "user is already a member of the conversation",
                ));
            }

            insert_member(tx, conversation_id, target_user_id, &now)?;
            increment_member_count(tx, conversation_id)?;
            Ok(())
        })
    }

    pub fn is_member(&self, user_id: &str, conversation_id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| query_is_member(conn, user_id, conversation_id))
    }

    pub fn get_conversation(&self, id: &str) -> StoreResult<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Every summary the user belongs to, most recently created first.
    pub fn conversations_for_user(&self, user_id: &str) -> StoreResult<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.member_count, c.message_count, c.last_message,
                        c.last_message_user_id, c.last_message_sent_on, c.created_at
                 FROM conversations c
                 JOIN members mb ON mb.conversation_id = c.id
                 WHERE mb.user_id = ?1
                 ORDER BY c.created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message and fold it into the conversation summary.
    /// Returns the assigned sequence number and timestamp. The insert and
    /// the summary update commit together or not at all.
    pub fn append_message(
        &self,
        sender_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> StoreResult<(i64, DateTime<Utc>)> {
        validate_content(content)?;

        let sent_at = Utc::now();
        let sent_at_str = sent_at.to_rfc3339();

        let seq = self.with_tx(|tx| {
            if !query_is_member(tx, sender_id, conversation_id)? {
                return Err(StoreError::Forbidden);
            }

            let seq = insert_message(tx, conversation_id, sender_id, content, &sent_at_str)?;
            record_last_message(tx, conversation_id, content, sender_id, &sent_at_str)?;
            Ok(seq)
        })?;

        Ok((seq, sent_at))
    }

    /// All messages in the conversation with seq strictly greater than
    /// `after_seq`, oldest first. Empty when `after_seq` is the latest.
    pub fn messages_since(
        &self,
        user_id: &str,
        conversation_id: &str,
        after_seq: i64,
    ) -> StoreResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            if !query_is_member(conn, user_id, conversation_id)? {
                return Err(StoreError::Forbidden);
            }
            query_messages_since(conn, conversation_id, after_seq)
        })
    }
}

fn insert_summary(
    conn: &Connection,
    id: &str,
    member_count: i64,
    created_at: &str,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO conversations (id, member_count, message_count, created_at)
         VALUES (?1, ?2, 0, ?3)",
        params![id, member_count, created_at],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Conflict("conversation already exists")
        } else {
            e.into()
        }
    })?;
    Ok(())
}

fn insert_member(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
    joined_at: &str,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO members (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![conversation_id, user_id, joined_at],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Conflict("user is already a member of the conversation")
        } else {
            e.into()
        }
    })?;
    Ok(())
}

fn increment_member_count(conn: &Connection, conversation_id: &str) -> StoreResult<()> {
    let updated = conn.execute(
        "UPDATE conversations SET member_count = member_count + 1 WHERE id = ?1",
        [conversation_id],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound("conversation"));
    }
    Ok(())
}

fn record_last_message(
    conn: &Connection,
    conversation_id: &str,
    content: &str,
    sender_id: &str,
    sent_at: &str,
) -> StoreResult<()> {
    let updated = conn.execute(
        "UPDATE conversations
         SET message_count = message_count + 1,
             last_message = ?2,
             last_message_user_id = ?3,
             last_message_sent_on = ?4
         WHERE id = ?1",
        params![conversation_id, content, sender_id, sent_at],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound("conversation"));
    }
    Ok(())
}

fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    sent_at: &str,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO messages (conversation_id, sender_id, content, sent_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![conversation_id, sender_id, content, sent_at],
    )?;
    Ok(conn.last_insert_rowid())
}

fn query_is_member(conn: &Connection, user_id: &str, conversation_id: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM members WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn query_user_exists(conn: &Connection, user_id: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn query_conversation(conn: &Connection, id: &str) -> StoreResult<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, member_count, message_count, last_message,
                last_message_user_id, last_message_sent_on, created_at
         FROM conversations WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_conversation_row).optional()?;
    Ok(row)
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        member_count: row.get(1)?,
        message_count: row.get(2)?,
        last_message: row.get(3)?,
        last_message_user_id: row.get(4)?,
        last_message_sent_on: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_messages_since(
    conn: &Connection,
    conversation_id: &str,
    after_seq: i64,
) -> StoreResult<Vec<MessageRow>> {
    // JOIN users to fetch sender_username in a single query (eliminates N+1)
    let mut stmt = conn.prepare(
        "SELECT m.seq, m.conversation_id, m.sender_id, u.username, m.content, m.sent_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.conversation_id = ?1 AND m.seq > ?2
         ORDER BY m.seq ASC",
    )?;

    let rows = stmt
        .query_map(params![conversation_id, after_seq], |row| {
            Ok(MessageRow {
                seq: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                sent_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "$argon2id$stub", None).unwrap();
        id
    }

    fn member_rows(db: &Database, conversation_id: &str) -> i64 {
        count_rows(db, "members", conversation_id)
    }

    fn message_rows(db: &Database, conversation_id: &str) -> i64 {
        count_rows(db, "messages", conversation_id)
    }

    fn count_rows(db: &Database, table: &str, conversation_id: &str) -> i64 {
        db.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM {table} WHERE conversation_id = ?1");
            Ok(conn.query_row(&sql, [conversation_id], |row| row.get(0))?)
        })
        .unwrap()
    }

    fn summary(db: &Database, conversation_id: &str) -> ConversationRow {
        db.get_conversation(conversation_id).unwrap().unwrap()
    }

    #[test]
    fn create_conversation_seeds_summary_and_membership() {
        let db = test_db();
        let alice = add_user(&db, "alice");

        let conv = db.create_conversation(&alice).unwrap();

        let s = summary(&db, &conv);
        assert_eq!(s.member_count, 1);
        assert_eq!(s.message_count, 0);
        assert!(s.last_message.is_none());
        assert!(db.is_member(&alice, &conv).unwrap());
        assert_eq!(member_rows(&db, &conv), s.member_count);
    }

    #[test]
    fn direct_conversation_has_both_members() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let conv = db.create_direct_conversation(&alice, &bob).unwrap();

        assert!(db.is_member(&alice, &conv).unwrap());
        assert!(db.is_member(&bob, &conv).unwrap());
        let s = summary(&db, &conv);
        assert_eq!(s.member_count, 2);
        assert_eq!(member_rows(&db, &conv), 2);
    }

    #[test]
    fn direct_conversation_with_self_is_rejected() {
        let db = test_db();
        let alice = add_user(&db, "alice");

        let err = db.create_direct_conversation(&alice, &alice).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn add_member_keeps_count_in_step_with_rows() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");

        let conv = db.create_conversation(&alice).unwrap();
        db.add_member(&alice, &conv, &bob).unwrap();
        db.add_member(&bob, &conv, &carol).unwrap();

        let s = summary(&db, &conv);
        assert_eq!(s.member_count, 3);
        assert_eq!(member_rows(&db, &conv), 3);
    }

    #[test]
    fn add_member_unknown_target_is_not_found() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let conv = db.create_conversation(&alice).unwrap();

        let err = db.add_member(&alice, &conv, "no-such-user").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(summary(&db, &conv).member_count, 1);
    }

    #[test]
    fn add_member_by_non_member_is_forbidden() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");
        let conv = db.create_conversation(&alice).unwrap();

        let err = db.add_member(&bob, &conv, &carol).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden));
        assert_eq!(summary(&db, &conv).member_count, 1);
    }

    #[test]
    fn add_member_twice_is_a_conflict_and_count_is_unchanged() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conv = db.create_conversation(&alice).unwrap();

        db.add_member(&alice, &conv, &bob).unwrap();
        let err = db.add_member(&alice, &conv, &bob).unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        let s = summary(&db, &conv);
        assert_eq!(s.member_count, 2);
        assert_eq!(member_rows(&db, &conv), 2);
    }

    #[test]
    fn append_message_updates_summary_exactly_once() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let conv = db.create_conversation(&alice).unwrap();

        db.append_message(&alice, &conv, "first").unwrap();
        db.append_message(&alice, &conv, "second").unwrap();

        let s = summary(&db, &conv);
        assert_eq!(s.message_count, 2);
        assert_eq!(message_rows(&db, &conv), 2);
        assert_eq!(s.last_message.as_deref(), Some("second"));
        assert_eq!(s.last_message_user_id.as_deref(), Some(alice.as_str()));
        assert!(s.last_message_sent_on.is_some());
    }

    #[test]
    fn append_by_non_member_is_forbidden_and_writes_nothing() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let mallory = add_user(&db, "mallory");
        let conv = db.create_conversation(&alice).unwrap();

        let err = db.append_message(&mallory, &conv, "hi").unwrap_err();

        assert!(matches!(err, StoreError::Forbidden));
        assert_eq!(message_rows(&db, &conv), 0);
        let s = summary(&db, &conv);
        assert_eq!(s.message_count, 0);
        assert!(s.last_message.is_none());
    }

    #[test]
    fn append_to_unknown_conversation_is_forbidden() {
        let db = test_db();
        let alice = add_user(&db, "alice");

        let err = db.append_message(&alice, "no-such-conv", "hi").unwrap_err();
        assert!(matches!(err, StoreError::Forbidden));
    }

    #[test]
    fn content_length_bounds_are_enforced() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let conv = db.create_conversation(&alice).unwrap();

        let err = db.append_message(&alice, &conv, "").unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let too_long = "x".repeat(301);
        let err = db.append_message(&alice, &conv, &too_long).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let at_limit = "x".repeat(300);
        db.append_message(&alice, &conv, &at_limit).unwrap();
        assert_eq!(summary(&db, &conv).message_count, 1);
    }

    #[test]
    fn messages_since_returns_strictly_newer_in_order() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let conv = db.create_conversation(&alice).unwrap();

        let (first, _) = db.append_message(&alice, &conv, "one").unwrap();
        let (second, _) = db.append_message(&alice, &conv, "two").unwrap();
        let (third, _) = db.append_message(&alice, &conv, "three").unwrap();

        let all = db.messages_since(&alice, &conv, 0).unwrap();
        assert_eq!(
            all.iter().map(|m| m.seq).collect::<Vec<_>>(),
            vec![first, second, third]
        );
        assert_eq!(all[0].content, "one");
        assert_eq!(all[0].sender_username, "alice");

        let newer = db.messages_since(&alice, &conv, second).unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].seq, third);

        assert!(db.messages_since(&alice, &conv, third).unwrap().is_empty());
    }

    #[test]
    fn messages_since_by_non_member_is_forbidden() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let mallory = add_user(&db, "mallory");
        let conv = db.create_conversation(&alice).unwrap();

        let err = db.messages_since(&mallory, &conv, 0).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden));
    }

    #[test]
    fn conversations_for_user_lists_only_memberships() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let shared = db.create_conversation(&alice).unwrap();
        db.add_member(&alice, &shared, &bob).unwrap();
        let private = db.create_conversation(&alice).unwrap();

        let bobs = db.conversations_for_user(&bob).unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].id, shared);

        let alices = db.conversations_for_user(&alice).unwrap();
        let mut ids: Vec<_> = alices.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        let mut expected = vec![shared.as_str(), private.as_str()];
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }

    // The walkthrough from the top of the house: create, invite, send, fetch.
    #[test]
    fn create_invite_send_fetch_scenario() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let conv = db.create_conversation(&alice).unwrap();
        let s = summary(&db, &conv);
        assert_eq!((s.member_count, s.message_count), (1, 0));

        db.add_member(&alice, &conv, &bob).unwrap();
        assert_eq!(summary(&db, &conv).member_count, 2);

        db.append_message(&bob, &conv, "hi").unwrap();
        let s = summary(&db, &conv);
        assert_eq!(s.message_count, 1);
        assert_eq!(s.last_message.as_deref(), Some("hi"));
        assert_eq!(s.last_message_user_id.as_deref(), Some(bob.as_str()));

        let new = db.messages_since(&alice, &conv, 0).unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].sender_id, bob);
        assert_eq!(new[0].content, "hi");
    }
}
