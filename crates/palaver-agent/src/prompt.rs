//! Deterministic prompt assembly. Same question plus same schema always
//! yields byte-identical prompt text.

use palaver_db::introspect::{SchemaDescriptor, TableInfo};

const HEADER: &str = "\
You are a SQL assistant for a group chat service backed by SQLite.
Answer the question with a single read-only SELECT statement.
Rules:
- Return ONLY the SQL statement, no explanation, no markdown.
- Never modify data. SELECT (or WITH ... SELECT) only.
- Use only the tables and columns listed below.
- Timestamps are TEXT in 'YYYY-MM-DD HH:MM:SS' (UTC).
";

const EXAMPLES: &str = "\
Examples:
Q: How many users are there?
SQL: SELECT COUNT(*) AS user_count FROM users

Q: Which group is most active?
SQL: SELECT g.name, COUNT(m.id) AS message_count FROM groups g JOIN messages m ON m.group_id = g.id GROUP BY g.id ORDER BY message_count DESC LIMIT 1

Q: Who posted most recently in general?
SQL: SELECT u.username, m.created_at FROM messages m JOIN users u ON u.id = m.user_id JOIN groups g ON g.id = m.group_id WHERE g.name = 'general' ORDER BY m.created_at DESC LIMIT 1
";

/// Builds the generation prompt, truncating the schema listing when the
/// result would exceed `max_chars`. Truncation drops the tables least
/// related to the question and never drops the last one.
pub fn build_prompt(question: &str, schema: &SchemaDescriptor, max_chars: usize) -> String {
    let all: Vec<&TableInfo> = schema.tables.iter().collect();
    let full = render(question, &all);
    if schema.tables.is_empty() || full.len() <= max_chars {
        return full;
    }

    let ranked = rank_tables(question, &schema.tables);
    for keep in (1..schema.tables.len()).rev() {
        let mut indices = ranked[..keep].to_vec();
        indices.sort_unstable();
        let subset: Vec<&TableInfo> = indices.iter().map(|&i| &schema.tables[i]).collect();
        let candidate = render(question, &subset);
        if candidate.len() <= max_chars {
            return candidate;
        }
    }

    // The single most relevant table is always included, cap or not.
    render(question, &[&schema.tables[ranked[0]]])
}

/// Extends a prompt with the rejection verdict so the next attempt can
/// correct it.
pub fn build_retry_prompt(base: &str, rejected_sql: &str, reason: &str) -> String {
    format!(
        "{base}\n\nThat statement was rejected: {reason}\nRejected statement:\n{rejected_sql}\nReturn a corrected SELECT statement.\nSQL:"
    )
}

fn render(question: &str, tables: &[&TableInfo]) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str(HEADER);
    out.push_str("\nTables:\n");
    for table in tables {
        out.push_str("  ");
        out.push_str(&table_line(table));
        out.push('\n');
    }
    out.push('\n');
    out.push_str(EXAMPLES);
    out.push_str("\nQ: ");
    out.push_str(question);
    out.push_str("\nSQL:");
    out
}

fn table_line(table: &TableInfo) -> String {
    let cols: Vec<String> = table
        .columns
        .iter()
        .map(|c| match &c.declared_type {
            Some(ty) => format!("{} {}", c.name, ty),
            None => c.name.clone(),
        })
        .collect();
    format!("{}({})", table.name, cols.join(", "))
}

/// Table indices sorted most-relevant-first. Relevance is word overlap
/// between the question and the table's name and column names; ties keep
/// schema order.
fn rank_tables(question: &str, tables: &[TableInfo]) -> Vec<usize> {
    let question_words = words(question);
    let mut scored: Vec<(usize, usize)> = tables
        .iter()
        .enumerate()
        .map(|(idx, table)| {
            let mut table_words = words(&table.name);
            for col in &table.columns {
                table_words.extend(words(&col.name));
            }
            let score = question_words
                .iter()
                .filter(|q| table_words.iter().any(|t| words_match(q, t)))
                .count();
            (idx, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(idx, _)| idx).collect()
}

fn words(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

// "group" matches "groups", "message" matches "messages"
fn words_match(a: &str, b: &str) -> bool {
    a == b || a.starts_with(b) || b.starts_with(a)
}
