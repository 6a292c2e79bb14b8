use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Ms;

/// Parsed command from SQL input. The acting user is never part of the SQL —
/// it comes from the connection's startup `user` parameter.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        name: String,
        email: String,
    },
    UpdateUser {
        id: Ulid,
        name: Option<String>,
        email: Option<String>,
    },
    DeleteUser {
        id: Ulid,
    },
    SelectUsers {
        id: Option<Ulid>,
    },
    InsertItem {
        id: Ulid,
        name: String,
        description: String,
        available: bool,
    },
    UpdateItem {
        id: Ulid,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    },
    SelectItem {
        id: Ulid,
    },
    /// Items owned by the acting user, with booking summaries.
    SelectOwnItems {
        limit: Option<usize>,
        offset: Option<usize>,
    },
    /// Text search over available items — no booking summaries.
    SearchItems {
        text: String,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    InsertBooking {
        id: Ulid,
        item_id: Ulid,
        start: Ms,
        end: Ms,
    },
    DecideBooking {
        id: Ulid,
        approved: bool,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookings {
        /// Raw state value; the engine classifies it (and rejects unknowns).
        state: String,
        as_booker: bool,
        now: Option<Ms>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    InsertComment {
        id: Ulid,
        item_id: Ulid,
        text: String,
    },
    SelectComments {
        item_id: Ulid,
    },
    SelectSummaries {
        item_ids: Vec<Ulid>,
        now: Option<Ms>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("users", 3, values.len()));
            }
            Ok(Command::InsertUser {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                email: parse_string(&values[2])?,
            })
        }
        "items" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("items", 4, values.len()));
            }
            Ok(Command::InsertItem {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                description: parse_string(&values[2])?,
                available: parse_bool(&values[3])?,
            })
        }
        "bookings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                item_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
            })
        }
        "comments" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("comments", 3, values.len()));
            }
            Ok(Command::InsertComment {
                id: parse_ulid(&values[0])?,
                item_id: parse_ulid(&values[1])?,
                text: parse_string(&values[2])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "users" => {
            let mut name = None;
            let mut email = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "name" => name = Some(parse_string(&a.value)?),
                    "email" => email = Some(parse_string(&a.value)?),
                    col => return Err(SqlError::UnknownColumn(col.to_string())),
                }
            }
            Ok(Command::UpdateUser { id, name, email })
        }
        "items" => {
            let mut name = None;
            let mut description = None;
            let mut available = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "name" => name = Some(parse_string(&a.value)?),
                    "description" => description = Some(parse_string(&a.value)?),
                    "available" => available = Some(parse_bool(&a.value)?),
                    col => return Err(SqlError::UnknownColumn(col.to_string())),
                }
            }
            Ok(Command::UpdateItem {
                id,
                name,
                description,
                available,
            })
        }
        "bookings" => {
            let mut approved = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "approved" => approved = Some(parse_bool(&a.value)?),
                    col => return Err(SqlError::UnknownColumn(col.to_string())),
                }
            }
            let approved = approved.ok_or(SqlError::MissingFilter("approved"))?;
            Ok(Command::DecideBooking { id, approved })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "users" => Ok(Command::DeleteUser { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::collect(&select.selection)?;
    let (limit, offset) = extract_page(query)?;

    match table.as_str() {
        "users" => Ok(Command::SelectUsers {
            id: filters.ulid("id")?,
        }),
        "items" => {
            if let Some(id) = filters.ulid("id")? {
                Ok(Command::SelectItem { id })
            } else if let Some(text) = filters.string("search")? {
                Ok(Command::SearchItems { text, limit, offset })
            } else {
                Ok(Command::SelectOwnItems { limit, offset })
            }
        }
        "bookings" => {
            if let Some(id) = filters.ulid("id")? {
                return Ok(Command::SelectBooking { id });
            }
            let state = filters
                .string("state")?
                .unwrap_or_else(|| "ALL".to_string());
            let as_booker = match filters.string("role")?.as_deref() {
                None | Some("booker") => true,
                Some("owner") => false,
                Some(other) => return Err(SqlError::Parse(format!("unknown role: {other}"))),
            };
            Ok(Command::SelectBookings {
                state,
                as_booker,
                now: filters.i64("now")?,
                limit,
                offset,
            })
        }
        "comments" => Ok(Command::SelectComments {
            item_id: filters
                .ulid("item_id")?
                .ok_or(SqlError::MissingFilter("item_id"))?,
        }),
        "booking_summaries" => {
            let mut item_ids = filters.ulid_list("item_id")?;
            if let Some(single) = filters.ulid("item_id")? {
                item_ids.push(single);
            }
            if item_ids.is_empty() {
                return Err(SqlError::MissingFilter("item_id"));
            }
            Ok(Command::SelectSummaries {
                item_ids,
                now: filters.i64("now")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause filters ──────────────────────────────────────

/// Flat conjunction of `col = value` and `col IN (...)` filters. Anything
/// fancier than ANDed equality is rejected up front.
#[derive(Default)]
struct Filters {
    eq: Vec<(String, Expr)>,
    in_list: Vec<(String, Vec<Expr>)>,
}

impl Filters {
    fn collect(selection: &Option<Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.walk(expr)?;
        }
        Ok(filters)
    }

    fn walk(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                self.walk(left)?;
                self.walk(right)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left:?}")))?;
                self.eq.push((col, (**right).clone()));
                Ok(())
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } => {
                let col = expr_column_name(expr)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {expr:?}")))?;
                self.in_list.push((col, list.clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter: {other}"))),
        }
    }

    fn get(&self, col: &str) -> Option<&Expr> {
        self.eq.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map(parse_ulid).transpose()
    }

    fn i64(&self, col: &str) -> Result<Option<Ms>, SqlError> {
        self.get(col).map(parse_i64).transpose()
    }

    fn string(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.get(col).map(parse_string).transpose()
    }

    fn ulid_list(&self, col: &str) -> Result<Vec<Ulid>, SqlError> {
        let mut ids = Vec::new();
        for (c, list) in &self.in_list {
            if c == col {
                for e in list {
                    ids.push(parse_ulid(e)?);
                }
            }
        }
        Ok(ids)
    }
}

fn extract_page(query: &ast::Query) -> Result<(Option<usize>, Option<usize>), SqlError> {
    let mut limit = None;
    let mut offset = None;
    if let Some(clause) = &query.limit_clause {
        match clause {
            ast::LimitClause::LimitOffset {
                limit: l,
                offset: o,
                ..
            } => {
                if let Some(e) = l {
                    limit = Some(parse_usize(e)?);
                }
                if let Some(o) = o {
                    offset = Some(parse_usize(&o.value)?);
                }
            }
            ast::LimitClause::OffsetCommaLimit { offset: o, limit: l } => {
                offset = Some(parse_usize(o)?);
                limit = Some(parse_usize(l)?);
            }
        }
    }
    Ok((limit, offset))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let filters = Filters::collect(selection)?;
    filters.ulid("id")?.ok_or(SqlError::MissingFilter("id"))
}

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_usize(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_i64(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
