//! Live schema introspection and bounded read-only query execution.

use crate::Database;
use anyhow::{Result, bail};
use rusqlite::Connection;
use rusqlite::types::ValueRef;

/// Keywords that mark a statement as mutating. Matched as whole tokens,
/// case-insensitively, anywhere outside quoted regions.
pub const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "create", "alter", "drop", "replace", "truncate", "attach",
    "detach", "pragma", "vacuum", "reindex", "analyze", "begin", "commit", "rollback",
];

#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
}

impl SchemaDescriptor {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Result table from a read-only query. `truncated` is set when the row
/// cap cut the result short.
#[derive(Debug, Clone)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub truncated: bool,
}

impl Database {
    pub fn describe_schema(&self) -> Result<SchemaDescriptor> {
        self.with_conn(|conn| describe_schema(conn))
    }

    pub fn run_read_only_query(&self, sql: &str, row_cap: usize) -> Result<QueryTable> {
        self.with_conn(|conn| run_read_only_query(conn, sql, row_cap))
    }
}

pub fn describe_schema(conn: &Connection) -> Result<SchemaDescriptor> {
    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_schema WHERE type = 'table' ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut tables = Vec::new();
    for name in names {
        if is_internal_object(&name) {
            continue;
        }
        let columns = table_columns(conn, &name)?;
        tables.push(TableInfo { name, columns });
    }
    Ok(SchemaDescriptor { tables })
}

/// Executes a single read-only statement, collecting at most `row_cap` rows.
///
/// The statement text is screened for mutating keywords before it reaches
/// the prepare step. This guard holds even for callers that skipped the
/// full validation pass.
pub fn run_read_only_query(conn: &Connection, sql: &str, row_cap: usize) -> Result<QueryTable> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        bail!("empty statement");
    }
    if let Some(keyword) = first_mutating_keyword(trimmed) {
        bail!("statement contains mutating keyword '{}'", keyword);
    }

    let mut stmt = conn.prepare(trimmed)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut out: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut truncated = false;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if out.len() >= row_cap {
            truncated = true;
            break;
        }
        let mut record = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            record.push(json_value_from_sql(row.get_ref(idx)?));
        }
        out.push(record);
    }

    Ok(QueryTable {
        columns,
        rows: out,
        truncated,
    })
}

/// First mutating keyword found in `sql`, scanning whole tokens only so
/// that identifiers like `created_at` never match `create`. String
/// literals and quoted identifiers are skipped; a verb inside one is
/// data, not a statement. SQLite escapes quotes by doubling them, which
/// the toggle handles without special casing.
pub fn first_mutating_keyword(sql: &str) -> Option<&'static str> {
    let mut token = String::new();
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            continue;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' {
            token.push(ch.to_ascii_lowercase());
            continue;
        }
        if let Some(keyword) = match_keyword(&token) {
            return Some(keyword);
        }
        token.clear();
        if ch == '\'' || ch == '"' {
            quote = Some(ch);
        }
    }
    match_keyword(&token)
}

fn match_keyword(token: &str) -> Option<&'static str> {
    MUTATING_KEYWORDS.iter().find(|kw| **kw == token).copied()
}

fn is_internal_object(name: &str) -> bool {
    name.starts_with("sqlite_")
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let pragma = format!("PRAGMA table_info({})", sqlite_single_quoted(table));
    let mut stmt = conn.prepare(&pragma)?;
    let columns = stmt
        .query_map([], |row| {
            let declared: Option<String> = row.get(2)?;
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: declared.filter(|t| !t.is_empty()),
                nullable: row.get::<_, i64>(3)? == 0,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn sqlite_single_quoted(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

fn json_value_from_sql(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(encode_blob_hex(b)),
    }
}

fn encode_blob_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn describes_chat_tables_without_internals() {
        let db = Database::open_in_memory().unwrap();
        let schema = db.describe_schema().unwrap();

        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["group_members", "groups", "messages", "users"]);
        assert!(!names.iter().any(|n| n.starts_with("sqlite_")));

        let users = schema.table("users").unwrap();
        let username = users.column("username").unwrap();
        assert_eq!(username.declared_type.as_deref(), Some("TEXT"));
        assert!(!username.nullable);
        assert!(users.column("id").unwrap().primary_key);
        assert!(users.column("nope").is_none());
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let schema = db.describe_schema().unwrap();
        assert!(schema.table("USERS").is_some());
        assert!(schema.table("Messages").unwrap().column("CONTENT").is_some());
    }

    #[test]
    fn caps_rows_and_flags_truncation() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..10 {
            db.create_user(&format!("user{}", i)).unwrap();
        }

        let table = db
            .run_read_only_query("SELECT id, username FROM users ORDER BY id", 3)
            .unwrap();
        assert_eq!(table.columns, ["id", "username"]);
        assert_eq!(table.rows.len(), 3);
        assert!(table.truncated);
        assert_eq!(table.rows[0][1], serde_json::json!("user0"));

        let full = db
            .run_read_only_query("SELECT id FROM users", 100)
            .unwrap();
        assert_eq!(full.rows.len(), 10);
        assert!(!full.truncated);
    }

    #[test]
    fn rejects_mutating_statements() {
        let db = Database::open_in_memory().unwrap();
        for sql in [
            "DELETE FROM users",
            "insert into users (username) values ('x')",
            "SELECT 1; DROP TABLE users",
            "PRAGMA journal_mode = DELETE",
            "",
        ] {
            assert!(db.run_read_only_query(sql, 10).is_err(), "accepted {sql:?}");
        }
        assert!(db.get_user_by_username("x").unwrap().is_none());

        let literal = db
            .run_read_only_query("SELECT count(*) FROM messages WHERE content = 'drop table'", 10)
            .unwrap();
        assert_eq!(literal.rows[0][0], serde_json::json!(0));
    }

    #[test]
    fn keyword_scan_matches_whole_tokens_only() {
        assert_eq!(first_mutating_keyword("SELECT created_at FROM users"), None);
        assert_eq!(
            first_mutating_keyword("SELECT * FROM updates_log"),
            None,
        );
        assert_eq!(first_mutating_keyword("DROP TABLE users"), Some("drop"));
        assert_eq!(first_mutating_keyword("select 1; delete"), Some("delete"));
    }

    #[test]
    fn keyword_scan_treats_quoted_verbs_as_data() {
        assert_eq!(
            first_mutating_keyword("SELECT * FROM messages WHERE content = 'drop table'"),
            None,
        );
        assert_eq!(
            first_mutating_keyword("SELECT * FROM messages WHERE content LIKE '%update%'"),
            None,
        );
        assert_eq!(
            first_mutating_keyword("SELECT 'it''s fine'; DELETE FROM users"),
            Some("delete"),
        );
    }

    #[test]
    fn converts_sql_values_to_json() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("ana").unwrap();
        db.create_group("g").unwrap();
        db.add_member(1, 1, "owner").unwrap();
        db.insert_message(1, 1, None, Some("http://img")).unwrap();

        let table = db
            .run_read_only_query(
                "SELECT id, content, image_url, 1.5 AS score FROM messages",
                10,
            )
            .unwrap();
        let row = &table.rows[0];
        assert_eq!(row[0], serde_json::json!(1));
        assert_eq!(row[1], serde_json::Value::Null);
        assert_eq!(row[2], serde_json::json!("http://img"));
        assert_eq!(row[3], serde_json::json!(1.5));
    }
}
