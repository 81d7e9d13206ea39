//! Statement validation: shape, schema membership, and resource bounds.
//! Nothing generated reaches the executor without passing through here.

use crate::error::AgentError;
use palaver_db::introspect::{SchemaDescriptor, TableInfo, first_mutating_keyword};
use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, Ident, JoinConstraint,
    JoinOperator, ObjectName, OrderByExpr, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

/// A statement that passed validation. `sql` is re-serialized from the
/// parsed tree, so it is always exactly one statement with a row limit
/// in place.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    pub sql: String,
    pub limit_injected: bool,
}

pub fn validate_statement(
    sql: &str,
    schema: &SchemaDescriptor,
    row_ceiling: usize,
) -> Result<ValidatedQuery, AgentError> {
    // Raw-text screen first: a mutating keyword anywhere is grounds for
    // rejection, parseable or not.
    if let Some(keyword) = first_mutating_keyword(sql) {
        return Err(AgentError::NotReadOnly(format!(
            "statement contains mutating keyword '{}'",
            keyword
        )));
    }

    let mut statements = Parser::parse_sql(&SQLiteDialect {}, sql)
        .map_err(|e| AgentError::SyntaxError(e.to_string()))?;
    if statements.len() != 1 {
        return Err(AgentError::NotReadOnly(format!(
            "expected exactly one statement, found {}",
            statements.len()
        )));
    }

    match statements.remove(0) {
        Statement::Query(mut query) => {
            check_query(&query, schema, &[])?;
            let limit_injected = enforce_limit(&mut query, row_ceiling);
            Ok(ValidatedQuery {
                sql: Statement::Query(query).to_string(),
                limit_injected,
            })
        }
        other => Err(AgentError::NotReadOnly(format!(
            "only SELECT queries are allowed, found {}",
            statement_kind(&other)
        ))),
    }
}

/// One name visible to column references: a FROM-clause table or alias, a
/// CTE, or a derived table. `table` is `None` when the column set is not
/// statically known.
#[derive(Clone)]
struct Relation<'s> {
    name: String,
    table: Option<&'s TableInfo>,
}

struct ExprCtx<'s, 'r> {
    schema: &'s SchemaDescriptor,
    scope: &'r [Relation<'s>],
    aliases: &'r [String],
}

fn check_query<'s>(
    query: &Query,
    schema: &'s SchemaDescriptor,
    outer: &[Relation<'s>],
) -> Result<(), AgentError> {
    let mut scope: Vec<Relation<'s>> = outer.to_vec();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            // a CTE body may reference the CTEs declared before it
            check_query(&cte.query, schema, &scope)?;
            scope.push(Relation {
                name: cte.alias.name.value.to_ascii_lowercase(),
                table: None,
            });
        }
    }
    check_body(&query.body, schema, &scope, &query.order_by)
}

fn check_body<'s>(
    body: &SetExpr,
    schema: &'s SchemaDescriptor,
    scope: &[Relation<'s>],
    order_by: &[OrderByExpr],
) -> Result<(), AgentError> {
    match body {
        SetExpr::Select(select) => check_select(select, schema, scope, order_by),
        SetExpr::Query(inner) => check_query(inner, schema, scope),
        SetExpr::SetOperation { left, right, .. } => {
            check_body(left, schema, scope, &[])?;
            check_body(right, schema, scope, &[])
        }
        // VALUES lists reference no schema objects
        SetExpr::Values(_) => Ok(()),
        _ => Err(AgentError::NotReadOnly("query body must be a SELECT".into())),
    }
}

fn check_select<'s>(
    select: &Select,
    schema: &'s SchemaDescriptor,
    outer: &[Relation<'s>],
    order_by: &[OrderByExpr],
) -> Result<(), AgentError> {
    let mut scope: Vec<Relation<'s>> = outer.to_vec();
    let pre = scope.clone();
    for table in &select.from {
        collect_relations(table, schema, &pre, &mut scope)?;
    }

    let aliases = projection_aliases(&select.projection);
    let ctx = ExprCtx {
        schema,
        scope: &scope,
        aliases: &aliases,
    };

    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => check_expr(expr, &ctx)?,
            SelectItem::ExprWithAlias { expr, .. } => check_expr(expr, &ctx)?,
            SelectItem::QualifiedWildcard(name, _) => {
                resolve_binding(object_tail(name), &ctx)?;
            }
            SelectItem::Wildcard(_) => {}
        }
    }

    for table in &select.from {
        for join in &table.joins {
            check_join_constraint(&join.join_operator, &ctx)?;
        }
    }

    if let Some(expr) = &select.selection {
        check_expr(expr, &ctx)?;
    }
    if let GroupByExpr::Expressions(exprs) = &select.group_by {
        for expr in exprs {
            check_expr(expr, &ctx)?;
        }
    }
    if let Some(expr) = &select.having {
        check_expr(expr, &ctx)?;
    }
    for order in order_by {
        check_expr(&order.expr, &ctx)?;
    }
    Ok(())
}

fn collect_relations<'s>(
    table: &TableWithJoins,
    schema: &'s SchemaDescriptor,
    pre: &[Relation<'s>],
    out: &mut Vec<Relation<'s>>,
) -> Result<(), AgentError> {
    collect_factor(&table.relation, schema, pre, out)?;
    for join in &table.joins {
        collect_factor(&join.relation, schema, pre, out)?;
    }
    Ok(())
}

fn collect_factor<'s>(
    factor: &TableFactor,
    schema: &'s SchemaDescriptor,
    pre: &[Relation<'s>],
    out: &mut Vec<Relation<'s>>,
) -> Result<(), AgentError> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table_name = object_tail(name).to_string();
            let lowered = table_name.to_ascii_lowercase();
            let binding = alias
                .as_ref()
                .map(|a| a.name.value.to_ascii_lowercase())
                .unwrap_or_else(|| lowered.clone());
            // a CTE shadows a real table of the same name
            if let Some(rel) = pre.iter().rev().find(|r| r.name == lowered) {
                out.push(Relation {
                    name: binding,
                    table: rel.table,
                });
            } else if let Some(info) = schema.table(&table_name) {
                out.push(Relation {
                    name: binding,
                    table: Some(info),
                });
            } else {
                return Err(AgentError::UnknownReference {
                    kind: "table",
                    name: table_name,
                });
            }
            Ok(())
        }
        TableFactor::Derived { subquery, alias, .. } => {
            check_query(subquery, schema, pre)?;
            out.push(Relation {
                name: alias
                    .as_ref()
                    .map(|a| a.name.value.to_ascii_lowercase())
                    .unwrap_or_default(),
                table: None,
            });
            Ok(())
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_relations(table_with_joins, schema, pre, out),
        other => Err(AgentError::NotReadOnly(format!(
            "unsupported table expression: {}",
            other
        ))),
    }
}

fn check_join_constraint(operator: &JoinOperator, ctx: &ExprCtx<'_, '_>) -> Result<(), AgentError> {
    let constraint = match operator {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => c,
        _ => return Ok(()),
    };
    match constraint {
        JoinConstraint::On(expr) => check_expr(expr, ctx),
        JoinConstraint::Using(idents) => {
            for ident in idents {
                check_bare_column(&ident.value, ctx)?;
            }
            Ok(())
        }
        JoinConstraint::Natural | JoinConstraint::None => Ok(()),
    }
}

fn check_expr(expr: &Expr, ctx: &ExprCtx<'_, '_>) -> Result<(), AgentError> {
    match expr {
        Expr::Identifier(ident) => check_bare_column(&ident.value, ctx),
        Expr::CompoundIdentifier(parts) => check_qualified_column(parts, ctx),
        Expr::BinaryOp { left, right, .. } => {
            check_expr(left, ctx)?;
            check_expr(right, ctx)
        }
        Expr::UnaryOp { expr, .. } => check_expr(expr, ctx),
        Expr::Nested(inner) => check_expr(inner, ctx),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => check_expr(inner, ctx),
        Expr::Between {
            expr, low, high, ..
        } => {
            check_expr(expr, ctx)?;
            check_expr(low, ctx)?;
            check_expr(high, ctx)
        }
        Expr::InList { expr, list, .. } => {
            check_expr(expr, ctx)?;
            for item in list {
                check_expr(item, ctx)?;
            }
            Ok(())
        }
        Expr::InSubquery { expr, subquery, .. } => {
            check_expr(expr, ctx)?;
            check_query(subquery, ctx.schema, ctx.scope)
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            check_expr(expr, ctx)?;
            check_expr(pattern, ctx)
        }
        Expr::Cast { expr, .. } => check_expr(expr, ctx),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
            ..
        } => {
            if let Some(op) = operand {
                check_expr(op, ctx)?;
            }
            for cond in conditions {
                check_expr(cond, ctx)?;
            }
            for result in results {
                check_expr(result, ctx)?;
            }
            if let Some(else_result) = else_result {
                check_expr(else_result, ctx)?;
            }
            Ok(())
        }
        Expr::Function(func) => check_function(func, ctx),
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
            check_query(subquery, ctx.schema, ctx.scope)
        }
        Expr::Tuple(items) => {
            for item in items {
                check_expr(item, ctx)?;
            }
            Ok(())
        }
        // literals, typed strings, and anything else without name references
        _ => Ok(()),
    }
}

fn check_function(func: &Function, ctx: &ExprCtx<'_, '_>) -> Result<(), AgentError> {
    for arg in &func.args {
        let arg_expr = match arg {
            FunctionArg::Named { arg, .. } => arg,
            FunctionArg::Unnamed(arg) => arg,
        };
        match arg_expr {
            FunctionArgExpr::Expr(expr) => check_expr(expr, ctx)?,
            FunctionArgExpr::QualifiedWildcard(name) => {
                resolve_binding(object_tail(name), ctx)?;
            }
            FunctionArgExpr::Wildcard => {}
        }
    }
    Ok(())
}

fn projection_aliases(projection: &[SelectItem]) -> Vec<String> {
    projection
        .iter()
        .filter_map(|item| match item {
            SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}

fn check_bare_column(name: &str, ctx: &ExprCtx<'_, '_>) -> Result<(), AgentError> {
    let lowered = name.to_ascii_lowercase();
    // projection aliases are addressable in GROUP BY, HAVING and ORDER BY
    if ctx.aliases.iter().any(|a| *a == lowered) {
        return Ok(());
    }
    let mut any_virtual = false;
    for relation in ctx.scope {
        match relation.table {
            Some(info) => {
                if info.column(name).is_some() {
                    return Ok(());
                }
            }
            None => any_virtual = true,
        }
    }
    if any_virtual {
        // a CTE or derived table in scope could provide it
        return Ok(());
    }
    Err(AgentError::UnknownReference {
        kind: "column",
        name: name.to_string(),
    })
}

fn check_qualified_column(parts: &[Ident], ctx: &ExprCtx<'_, '_>) -> Result<(), AgentError> {
    if parts.len() < 2 {
        if let Some(ident) = parts.first() {
            return check_bare_column(&ident.value, ctx);
        }
        return Ok(());
    }
    // a three-part name like main.users.id resolves by its last two parts
    let column = &parts[parts.len() - 1].value;
    let qualifier = &parts[parts.len() - 2].value;
    match resolve_binding(qualifier, ctx)? {
        Some(info) => {
            if info.column(column).is_some() {
                Ok(())
            } else {
                Err(AgentError::UnknownReference {
                    kind: "column",
                    name: format!("{}.{}", qualifier, column),
                })
            }
        }
        None => Ok(()),
    }
}

/// Resolves a qualifier to its relation. `Ok(None)` means the name is
/// bound but its columns are not statically known.
fn resolve_binding<'s>(
    qualifier: &str,
    ctx: &ExprCtx<'s, '_>,
) -> Result<Option<&'s TableInfo>, AgentError> {
    let lowered = qualifier.to_ascii_lowercase();
    for relation in ctx.scope.iter().rev() {
        if relation.name == lowered {
            return Ok(relation.table);
        }
    }
    Err(AgentError::UnknownReference {
        kind: "table",
        name: qualifier.to_string(),
    })
}

/// Ensures the top-level query carries a LIMIT no larger than `ceiling`.
/// Returns true when the statement had to be changed.
fn enforce_limit(query: &mut Query, ceiling: usize) -> bool {
    let keep = matches!(
        &query.limit,
        Some(Expr::Value(Value::Number(n, _)))
            if n.parse::<u64>().map(|v| v <= ceiling as u64).unwrap_or(false)
    );
    if keep {
        return false;
    }
    query.limit = Some(Expr::Value(Value::Number(ceiling.to_string(), false)));
    true
}

fn object_tail(name: &ObjectName) -> &str {
    name.0.last().map(|ident| ident.value.as_str()).unwrap_or("")
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_db::Database;
    use palaver_db::introspect::MUTATING_KEYWORDS;

    fn chat_schema() -> SchemaDescriptor {
        Database::open_in_memory().unwrap().describe_schema().unwrap()
    }

    #[test]
    fn accepts_a_plain_select_and_injects_a_limit() {
        let schema = chat_schema();
        let validated = validate_statement("SELECT username FROM users", &schema, 200).unwrap();
        assert!(validated.limit_injected);
        assert!(validated.sql.ends_with("LIMIT 200"), "{}", validated.sql);
    }

    #[test]
    fn keeps_small_limits_and_clamps_large_ones() {
        let schema = chat_schema();

        let kept = validate_statement("SELECT id FROM users LIMIT 5", &schema, 200).unwrap();
        assert!(!kept.limit_injected);
        assert!(kept.sql.ends_with("LIMIT 5"), "{}", kept.sql);

        let clamped =
            validate_statement("SELECT id FROM users LIMIT 100000", &schema, 200).unwrap();
        assert!(clamped.limit_injected);
        assert!(clamped.sql.ends_with("LIMIT 200"), "{}", clamped.sql);
    }

    #[test]
    fn rejects_every_mutating_verb() {
        let schema = chat_schema();
        for keyword in MUTATING_KEYWORDS {
            let sql = format!("{} users", keyword.to_ascii_uppercase());
            let err = validate_statement(&sql, &schema, 200).unwrap_err();
            assert!(
                matches!(err, AgentError::NotReadOnly(_)),
                "keyword {} got {:?}",
                keyword,
                err
            );
        }
    }

    #[test]
    fn rejects_multi_statement_input() {
        let schema = chat_schema();
        let err = validate_statement("SELECT 1; SELECT 2", &schema, 200).unwrap_err();
        assert!(matches!(err, AgentError::NotReadOnly(_)));
    }

    #[test]
    fn rejects_explain() {
        let schema = chat_schema();
        let err = validate_statement("EXPLAIN SELECT 1", &schema, 200).unwrap_err();
        assert!(err.is_rejection(), "{:?}", err);
    }

    #[test]
    fn rejects_unknown_table() {
        let schema = chat_schema();
        let err = validate_statement("SELECT * FROM payments", &schema, 200).unwrap_err();
        match err {
            AgentError::UnknownReference { kind, name } => {
                assert_eq!(kind, "table");
                assert_eq!(name, "payments");
            }
            other => panic!("expected UnknownReference, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_column_bare_and_qualified() {
        let schema = chat_schema();

        let err = validate_statement("SELECT salary FROM users", &schema, 200).unwrap_err();
        match err {
            AgentError::UnknownReference { kind, name } => {
                assert_eq!(kind, "column");
                assert_eq!(name, "salary");
            }
            other => panic!("expected UnknownReference, got {:?}", other),
        }

        let err =
            validate_statement("SELECT u.salary FROM users u", &schema, 200).unwrap_err();
        match err {
            AgentError::UnknownReference { kind, name } => {
                assert_eq!(kind, "column");
                assert_eq!(name, "u.salary");
            }
            other => panic!("expected UnknownReference, got {:?}", other),
        }
    }

    #[test]
    fn rejects_garbage_as_syntax_error() {
        let schema = chat_schema();
        let err = validate_statement("SELEKT foo FRM bar", &schema, 200).unwrap_err();
        assert!(matches!(err, AgentError::SyntaxError(_)), "{:?}", err);
    }

    #[test]
    fn accepts_joins_aliases_and_grouping() {
        let schema = chat_schema();
        let sql = "SELECT g.name, COUNT(m.id) AS message_count \
                   FROM groups g JOIN messages m ON m.group_id = g.id \
                   GROUP BY g.id ORDER BY message_count DESC LIMIT 1";
        let validated = validate_statement(sql, &schema, 200).unwrap();
        assert!(!validated.limit_injected);
        assert!(validated.sql.contains("LIMIT 1"));
    }

    #[test]
    fn accepts_ctes_and_derived_tables() {
        let schema = chat_schema();

        let cte = "WITH counts AS (SELECT group_id, COUNT(*) AS n FROM messages GROUP BY group_id) \
                   SELECT g.name, c.n FROM groups g JOIN counts c ON c.group_id = g.id \
                   ORDER BY c.n DESC";
        let validated = validate_statement(cte, &schema, 200).unwrap();
        assert!(validated.limit_injected);

        let derived = "SELECT t.n FROM (SELECT COUNT(*) AS n FROM users) t";
        validate_statement(derived, &schema, 200).unwrap();
    }

    #[test]
    fn checks_membership_inside_subqueries() {
        let schema = chat_schema();

        validate_statement(
            "SELECT username FROM users WHERE id IN (SELECT user_id FROM messages)",
            &schema,
            200,
        )
        .unwrap();

        let err = validate_statement(
            "SELECT username FROM users WHERE id IN (SELECT sender FROM messages)",
            &schema,
            200,
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::UnknownReference { .. }));
    }

    #[test]
    fn correlated_subquery_sees_outer_alias() {
        let schema = chat_schema();
        validate_statement(
            "SELECT u.username FROM users u \
             WHERE EXISTS (SELECT 1 FROM messages m WHERE m.user_id = u.id)",
            &schema,
            200,
        )
        .unwrap();
    }

    #[test]
    fn accepts_union_bodies() {
        let schema = chat_schema();
        let validated = validate_statement(
            "SELECT id FROM users UNION SELECT id FROM groups",
            &schema,
            200,
        )
        .unwrap();
        assert!(validated.limit_injected);
    }

    #[test]
    fn validation_is_idempotent() {
        let schema = chat_schema();
        let first = validate_statement(
            "SELECT username FROM users ORDER BY username",
            &schema,
            200,
        )
        .unwrap();
        let second = validate_statement(&first.sql, &schema, 200).unwrap();
        assert_eq!(first.sql, second.sql);
        assert!(!second.limit_injected);
    }
}
