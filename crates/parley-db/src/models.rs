/// Database row types, mapping directly to SQLite rows.
/// Distinct from parley-types API models to keep the DB layer independent.

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub about: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub member_count: i64,
    pub message_count: i64,
    pub last_message: Option<String>,
    pub last_message_user_id: Option<String>,
    pub last_message_sent_on: Option<String>,
    pub created_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub seq: i64,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub sent_at: String,
}
