use crate::Database;
use crate::models::{GroupRow, MemberRow, MessageRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO users (username) VALUES (?1)", [username])?;
            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)?.ok_or_else(|| anyhow!("user {} missing after insert", id))
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, username, created_at FROM users ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, created_at FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Groups --

    pub fn create_group(&self, name: &str) -> Result<GroupRow> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO groups (name) VALUES (?1)", [name])?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT id, name, created_at FROM groups WHERE id = ?1",
                [id],
                |row| {
                    Ok(GroupRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .map_err(Into::into)
        })
    }

    pub fn list_groups(&self) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, created_at FROM groups ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(GroupRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_group_by_name(&self, name: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at FROM groups WHERE name = ?1",
                [name],
                |row| {
                    Ok(GroupRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Membership --

    pub fn add_member(&self, group_id: i64, user_id: i64, role: &str) -> Result<MemberRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_members (group_id, user_id, role) VALUES (?1, ?2, ?3)",
                rusqlite::params![group_id, user_id, role],
            )?;
            conn.query_row(
                "SELECT group_id, user_id, role, joined_at FROM group_members
                 WHERE group_id = ?1 AND user_id = ?2",
                [group_id, user_id],
                |row| {
                    Ok(MemberRow {
                        group_id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: row.get(2)?,
                        joined_at: row.get(3)?,
                    })
                },
            )
            .map_err(Into::into)
        })
    }

    pub fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    [group_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        group_id: i64,
        user_id: i64,
        content: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (group_id, user_id, content, image_url) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![group_id, user_id, content, image_url],
            )?;
            let id = conn.last_insert_rowid();
            query_message_by_id(conn, id)?
                .ok_or_else(|| anyhow!("message {} missing after insert", id))
        })
    }

    /// Newest-first history for a group, windowed by created_at bounds.
    pub fn get_messages(
        &self,
        group_id: i64,
        limit: u32,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, group_id, limit, before, after))
    }
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, created_at FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}

fn query_message_by_id(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    conn.query_row(
        "SELECT m.id, m.group_id, m.user_id, u.username, m.content, m.image_url, m.created_at
         FROM messages m
         JOIN users u ON m.user_id = u.id
         WHERE m.id = ?1",
        [id],
        |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                group_id: row.get(1)?,
                user_id: row.get(2)?,
                username: row.get(3)?,
                content: row.get(4)?,
                image_url: row.get(5)?,
                created_at: row.get(6)?,
            })
        },
    )
    .optional()
}

fn query_messages(
    conn: &Connection,
    group_id: i64,
    limit: u32,
    before: Option<&str>,
    after: Option<&str>,
) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch the author username in a single query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.group_id, m.user_id, u.username, m.content, m.image_url, m.created_at
         FROM messages m
         JOIN users u ON m.user_id = u.id
         WHERE m.group_id = ?1
           AND (?2 IS NULL OR m.created_at < ?2)
           AND (?3 IS NULL OR m.created_at > ?3)
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?4",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![group_id, before, after, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                group_id: row.get(1)?,
                user_id: row.get(2)?,
                username: row.get(3)?,
                content: row.get(4)?,
                image_url: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
