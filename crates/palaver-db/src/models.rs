//! Row types as they come out of SQLite. Timestamps stay as the TEXT the
//! database stores; the API layer converts them.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

pub struct MemberRow {
    pub group_id: i64,
    pub user_id: i64,
    pub role: String,
    pub joined_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
}
