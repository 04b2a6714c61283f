use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::clock::{self, FormatError};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        id: Ulid,
        name: String,
        open: Minute,
        close: Minute,
        enabled: bool,
    },
    UpdateResource {
        id: Ulid,
        name: String,
        open: Minute,
        close: Minute,
        enabled: bool,
    },
    DisableResource {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
        participants: Vec<Participant>,
        status: ApprovalStatus,
    },
    SetBookingStatus {
        id: Ulid,
        status: ApprovalStatus,
    },
    DeactivateBooking {
        id: Ulid,
    },
    SelectResources,
    SelectBookings {
        resource_id: Ulid,
        date: Option<NaiveDate>,
    },
    SelectAvailability {
        resource_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Minute>,
    },
    SelectSlots {
        resource_id: Ulid,
        date: NaiveDate,
        step: Option<Minute>,
        start: Option<Minute>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let opt = |i: usize| values.get(i).filter(|e| !is_null(e));

    match table.as_str() {
        "resources" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("resources", 4, values.len()));
            }
            Ok(Command::InsertResource {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string_expr(&values[1])?,
                open: parse_minute_expr(&values[2])?,
                close: parse_minute_expr(&values[3])?,
                enabled: opt(4).map(parse_bool).transpose()?.unwrap_or(true),
            })
        }
        "resource_updates" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("resource_updates", 5, values.len()));
            }
            Ok(Command::UpdateResource {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string_expr(&values[1])?,
                open: parse_minute_expr(&values[2])?,
                close: parse_minute_expr(&values[3])?,
                enabled: parse_bool(&values[4])?,
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            let participants = match opt(5) {
                Some(expr) => serde_json::from_str(&parse_string_expr(expr)?)?,
                None => Vec::new(),
            };
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(&values[0])?,
                resource_id: parse_ulid_expr(&values[1])?,
                date: parse_date_expr(&values[2])?,
                start: parse_minute_expr(&values[3])?,
                end: parse_minute_expr(&values[4])?,
                participants,
                status: opt(6)
                    .map(parse_status_expr)
                    .transpose()?
                    .unwrap_or(ApprovalStatus::Pending),
            })
        }
        "booking_status" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("booking_status", 2, values.len()));
            }
            Ok(Command::SetBookingStatus {
                id: parse_ulid_expr(&values[0])?,
                status: parse_status_expr(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DisableResource { id }),
        "bookings" => Ok(Command::DeactivateBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = BTreeMap::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters);
    }
    let required = |col: &'static str| filters.get(col).ok_or(SqlError::MissingFilter(col));

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "bookings" => Ok(Command::SelectBookings {
            resource_id: parse_ulid_expr(required("resource_id")?)?,
            date: filters.get("date").map(|e| parse_date_expr(e)).transpose()?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            resource_id: parse_ulid_expr(required("resource_id")?)?,
            date: parse_date_expr(required("date")?)?,
            min_duration: filters
                .get("min_duration")
                .map(|e| parse_duration_expr(e))
                .transpose()?,
        }),
        "slots" => Ok(Command::SelectSlots {
            resource_id: parse_ulid_expr(required("resource_id")?)?,
            date: parse_date_expr(required("date")?)?,
            step: filters.get("step").map(|e| parse_duration_expr(e)).transpose()?,
            start: filters.get("start").map(|e| parse_minute_expr(e)).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` terms joined by AND, keyed by lower-cased column name.
/// Other predicates are ignored.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut BTreeMap<String, &'a Expr>) {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_eq_filters(left, out);
            collect_eq_filters(right, out);
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            if let Some(col) = expr_column_name(left) {
                out.insert(col, right.as_ref());
            }
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => {}
    }
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// The single VALUES row of an INSERT.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            rows => Err(SqlError::Unsupported(format!("{} VALUES rows; one at a time", rows.len()))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// A minute-of-day: an integer in `0..1440`, or a 12-hour string such as
/// `'09:30 AM'`.
fn parse_minute_expr(expr: &Expr) -> Result<Minute, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        if s.trim().parse::<i64>().is_err() {
            return Ok(clock::parse_12h(s)?);
        }
    }
    let v = parse_i64_expr(expr)?;
    match u16::try_from(v) {
        Ok(m) if m < MINUTES_PER_DAY => Ok(m),
        _ => Err(SqlError::Parse(format!("{v} is not a minute of the day"))),
    }
}

/// A positive length in minutes (durations, slot steps).
fn parse_duration_expr(expr: &Expr) -> Result<Minute, SqlError> {
    let v = parse_i64_expr(expr)?;
    match u16::try_from(v) {
        Ok(m) if m > 0 && m <= MINUTES_PER_DAY => Ok(m),
        _ => Err(SqlError::Parse(format!("{v} is not a duration in minutes"))),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| SqlError::Date(s))
}

/// Status by code (`1`..`4`) or by label, case-insensitive.
fn parse_status_expr(expr: &Expr) -> Result<ApprovalStatus, SqlError> {
    if let Ok(code) = parse_i64_expr(expr) {
        return ApprovalStatus::from_code(code).ok_or(SqlError::Status(code.to_string()));
    }
    let s = parse_string_expr(expr)?;
    match s.to_ascii_lowercase().as_str() {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "deactivated" => Ok(ApprovalStatus::Deactivated),
        "active" => Ok(ApprovalStatus::Active),
        _ => Err(SqlError::Status(s)),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" | "open" => Ok(true),
                "false" | "f" | "0" | "closed" => Ok(false),
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

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("bad time: {0}")]
    Time(#[from] FormatError),
    #[error("bad date '{0}': expected YYYY-MM-DD")]
    Date(String),
    #[error("bad participants: {0}")]
    Participants(#[from] serde_json::Error),
    #[error("unknown booking status: {0}")]
    Status(String),
}
