use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::auth::AtriumAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::TimeRange;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct AtriumHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AtriumQueryParser>,
}

impl AtriumHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AtriumQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.dispatch_command(engine, cmd).await;

        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => status
        )
        .increment(1);

        result
    }

    async fn dispatch_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertFacility {
                id,
                name,
                hourly_rate,
                active,
            } => {
                engine
                    .create_facility(id, name, hourly_rate, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateFacility {
                id,
                name,
                hourly_rate,
                active,
            } => {
                engine
                    .update_facility(id, name, hourly_rate, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteFacility { id } => {
                engine.delete_facility(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertHoursRule {
                facility_id,
                weekday,
                start,
                end,
                available,
            } => {
                engine
                    .set_hours_rule(facility_id, weekday, start, end, available)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteHoursRule {
                facility_id,
                weekday,
            } => {
                engine
                    .clear_hours_rule(facility_id, weekday)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReservation { id, request } => {
                engine.create_reservation(id, request).await.map_err(|e| {
                    if matches!(e, EngineError::Conflict(_)) {
                        metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL)
                            .increment(1);
                    }
                    engine_err(e)
                })?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateReservationStatus { id, status } => {
                engine
                    .set_reservation_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectFacilities => {
                let facilities = engine.list_facilities();
                let schema = Arc::new(facilities_schema());
                let rows: Vec<PgWireResult<_>> = facilities
                    .into_iter()
                    .map(|f| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&f.id.to_string())?;
                        encoder.encode_field(&f.name)?;
                        encoder.encode_field(&f.hourly_rate)?;
                        encoder.encode_field(&f.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectHours { facility_id } => {
                let rules = engine
                    .get_hours_rules(facility_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(hours_schema());
                let rows: Vec<PgWireResult<_>> = rules
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.facility_id.to_string())?;
                        encoder.encode_field(&(r.weekday as i32))?;
                        encoder.encode_field(&r.start.format("%H:%M:%S").to_string())?;
                        encoder.encode_field(&r.end.format("%H:%M:%S").to_string())?;
                        encoder.encode_field(&r.available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectReservations {
                facility_id,
                start,
                end,
            } => {
                let window = match (start, end) {
                    (Some(s), Some(e)) if s < e => Some(TimeRange::new(s, e)),
                    (Some(_), Some(_)) => {
                        return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                            "ERROR".into(),
                            "22007".into(),
                            "reservation window start must be before end".into(),
                        ))));
                    }
                    _ => None,
                };
                let reservations = engine
                    .get_reservations(facility_id, window)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.facility_id.to_string())?;
                        encoder.encode_field(&r.requester.name)?;
                        encoder.encode_field(&r.requester.email)?;
                        encoder.encode_field(&r.requester.phone)?;
                        encoder.encode_field(&r.title)?;
                        encoder.encode_field(&r.description)?;
                        encoder.encode_field(&fmt_instant(r.range.start))?;
                        encoder.encode_field(&fmt_instant(r.range.end))?;
                        encoder.encode_field(&r.notes)?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&r.duration_hours)?;
                        encoder.encode_field(&r.hourly_rate)?;
                        encoder.encode_field(&r.total_cost)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { facility_id, date } => {
                let report = engine
                    .get_availability(facility_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let fid = report.facility_id.to_string();
                let rows: Vec<PgWireResult<_>> = report
                    .slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&fid)?;
                        encoder.encode_field(&fmt_instant(slot.range.start))?;
                        encoder.encode_field(&fmt_instant(slot.range.end))?;
                        encoder.encode_field(&slot.available)?;
                        encoder.encode_field(&slot.reason.map(|r| r.as_str()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn fmt_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn facilities_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        FieldInfo::new(
            "hourly_rate".into(),
            None,
            None,
            Type::FLOAT8,
            FieldFormat::Text,
        ),
        FieldInfo::new("active".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn hours_schema() -> Vec<FieldInfo> {
    vec![
        varchar("facility_id"),
        FieldInfo::new("weekday".into(), None, None, Type::INT4, FieldFormat::Text),
        varchar("start"),
        varchar("end"),
        FieldInfo::new(
            "available".into(),
            None,
            None,
            Type::BOOL,
            FieldFormat::Text,
        ),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("facility_id"),
        varchar("name"),
        varchar("email"),
        varchar("phone"),
        varchar("title"),
        varchar("description"),
        varchar("start"),
        varchar("end"),
        varchar("notes"),
        varchar("status"),
        FieldInfo::new(
            "duration_hours".into(),
            None,
            None,
            Type::FLOAT8,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "hourly_rate".into(),
            None,
            None,
            Type::FLOAT8,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "total_cost".into(),
            None,
            None,
            Type::FLOAT8,
            FieldFormat::Text,
        ),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        varchar("facility_id"),
        varchar("slot_start"),
        varchar("slot_end"),
        FieldInfo::new(
            "available".into(),
            None,
            None,
            Type::BOOL,
            FieldFormat::Text,
        ),
        varchar("reason"),
    ]
}

/// Result schema for a statement, guessed from its text. Only SELECTs have
/// row schemas; everything else returns a bare command tag.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("RESERVATIONS") {
        reservations_schema()
    } else if upper.contains("HOURS") {
        hours_schema()
    } else if upper.contains("FACILITIES") {
        facilities_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for AtriumHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AtriumQueryParser;

#[async_trait]
impl QueryParser for AtriumQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AtriumHandler {
    type Statement = String;
    type QueryParser = AtriumQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AtriumFactory {
    handler: Arc<AtriumHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AtriumAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AtriumFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AtriumAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AtriumHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AtriumFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = AtriumFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    // Conflicts get the exclusion-violation SQLSTATE so callers can match
    // on it; everything else is a generic raised exception.
    let code = match &e {
        EngineError::Conflict(_) => "23P01",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
