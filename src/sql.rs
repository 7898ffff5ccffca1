use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{Requester, ReservationRequest, ReservationStatus};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertFacility {
        id: Ulid,
        name: String,
        hourly_rate: Option<f64>,
        active: bool,
    },
    UpdateFacility {
        id: Ulid,
        name: String,
        hourly_rate: Option<f64>,
        active: bool,
    },
    DeleteFacility {
        id: Ulid,
    },
    InsertHoursRule {
        facility_id: Ulid,
        weekday: u8,
        start: NaiveTime,
        end: NaiveTime,
        available: bool,
    },
    DeleteHoursRule {
        facility_id: Ulid,
        weekday: u8,
    },
    InsertReservation {
        id: Ulid,
        request: ReservationRequest,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectFacilities,
    SelectHours {
        facility_id: Ulid,
    },
    SelectReservations {
        facility_id: Ulid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    SelectAvailability {
        facility_id: Ulid,
        date: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
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
        "facilities" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("facilities", 2, values.len()));
            }
            Ok(Command::InsertFacility {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                hourly_rate: if values.len() >= 3 {
                    parse_f64_or_null(&values[2])?
                } else {
                    None
                },
                active: if values.len() >= 4 {
                    parse_bool(&values[3])?
                } else {
                    true
                },
            })
        }
        "hours" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("hours", 4, values.len()));
            }
            Ok(Command::InsertHoursRule {
                facility_id: parse_ulid(&values[0])?,
                weekday: parse_weekday(&values[1])?,
                start: parse_time(&values[2])?,
                end: parse_time(&values[3])?,
                available: if values.len() >= 5 {
                    parse_bool(&values[4])?
                } else {
                    true
                },
            })
        }
        "reservations" => {
            // (id, facility_id, name, email, phone, title, description,
            //  start, "end", notes) — phone/description/notes may be NULL,
            // notes may be omitted entirely.
            if values.len() < 9 {
                return Err(SqlError::WrongArity("reservations", 9, values.len()));
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                request: ReservationRequest {
                    facility_id: parse_ulid(&values[1])?,
                    requester: Requester {
                        name: parse_string(&values[2])?,
                        email: parse_string(&values[3])?,
                        phone: parse_string_or_null(&values[4])?,
                    },
                    title: parse_string(&values[5])?,
                    description: parse_string_or_null(&values[6])?,
                    start: parse_timestamp(&values[7])?,
                    end: parse_timestamp(&values[8])?,
                    notes: if values.len() >= 10 {
                        parse_string_or_null(&values[9])?
                    } else {
                        None
                    },
                },
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
        "facilities" => {
            let (mut name, mut hourly_rate, mut active) = (None, None, None);
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "name" => name = Some(parse_string(&assignment.value)?),
                    "hourly_rate" => hourly_rate = Some(parse_f64_or_null(&assignment.value)?),
                    "active" => active = Some(parse_bool(&assignment.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            // Full replacement — all three fields must be assigned.
            Ok(Command::UpdateFacility {
                id,
                name: name.ok_or(SqlError::MissingFilter("name"))?,
                hourly_rate: hourly_rate.ok_or(SqlError::MissingFilter("hourly_rate"))?,
                active: active.ok_or(SqlError::MissingFilter("active"))?,
            })
        }
        "reservations" => {
            let mut status = None;
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "status" => {
                        let raw = parse_string(&assignment.value)?;
                        status = Some(
                            ReservationStatus::parse(&raw)
                                .ok_or_else(|| SqlError::Parse(format!("bad status: {raw}")))?,
                        );
                    }
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdateReservationStatus {
                id,
                status: status.ok_or(SqlError::MissingFilter("status"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "facilities" => Ok(Command::DeleteFacility {
            id: extract_where_id(&delete.selection)?,
        }),
        "hours" => {
            let (mut facility_id, mut weekday) = (None, None);
            if let Some(selection) = &delete.selection {
                extract_hours_filters(selection, &mut facility_id, &mut weekday)?;
            }
            Ok(Command::DeleteHoursRule {
                facility_id: facility_id.ok_or(SqlError::MissingFilter("facility_id"))?,
                weekday: weekday.ok_or(SqlError::MissingFilter("weekday"))?,
            })
        }
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

    match table.as_str() {
        "facilities" => Ok(Command::SelectFacilities),
        "hours" => {
            let mut facility_id = None;
            if let Some(selection) = &select.selection {
                let mut weekday = None;
                extract_hours_filters(selection, &mut facility_id, &mut weekday)?;
            }
            Ok(Command::SelectHours {
                facility_id: facility_id.ok_or(SqlError::MissingFilter("facility_id"))?,
            })
        }
        "reservations" => {
            let (mut facility_id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_reservation_filters(selection, &mut facility_id, &mut start, &mut end)?;
            }
            Ok(Command::SelectReservations {
                facility_id: facility_id.ok_or(SqlError::MissingFilter("facility_id"))?,
                start,
                end,
            })
        }
        "availability" => {
            let (mut facility_id, mut date) = (None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut facility_id, &mut date)?;
            }
            Ok(Command::SelectAvailability {
                facility_id: facility_id.ok_or(SqlError::MissingFilter("facility_id"))?,
                date: date.ok_or(SqlError::MissingFilter("date"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    facility_id: &mut Option<Ulid>,
    date: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, facility_id, date)?;
                extract_availability_filters(right, facility_id, date)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("facility_id") => *facility_id = Some(parse_ulid(right)?),
                Some("date") => *date = Some(parse_date(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

fn extract_reservation_filters(
    expr: &Expr,
    facility_id: &mut Option<Ulid>,
    start: &mut Option<DateTime<Utc>>,
    end: &mut Option<DateTime<Utc>>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_reservation_filters(left, facility_id, start, end)?;
                extract_reservation_filters(right, facility_id, start, end)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("facility_id") {
                    *facility_id = Some(parse_ulid(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_timestamp(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_timestamp(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_hours_filters(
    expr: &Expr,
    facility_id: &mut Option<Ulid>,
    weekday: &mut Option<u8>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_hours_filters(left, facility_id, weekday)?;
                extract_hours_filters(right, facility_id, weekday)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("facility_id") => *facility_id = Some(parse_ulid(right)?),
                Some("weekday") => *weekday = Some(parse_weekday(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
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

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
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
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
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
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_f64_or_null(expr: &Expr) -> Result<Option<f64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_f64(expr).map(Some)
}

fn parse_weekday(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_f64(expr)?;
    if v.fract() != 0.0 || !(0.0..=6.0).contains(&v) {
        return Err(SqlError::Parse(format!("weekday out of range: {v}")));
    }
    Ok(v as u8)
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

/// Instants arrive as RFC 3339 (`2024-06-10T14:00:00Z`) or as a plain
/// `YYYY-MM-DD HH:MM:SS`, which is taken as UTC.
fn parse_timestamp(expr: &Expr) -> Result<DateTime<Utc>, SqlError> {
    let s = parse_string(expr)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| SqlError::Parse(format!("bad timestamp '{s}': {e}")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time '{s}': {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
