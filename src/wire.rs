use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RoombookAuthSource;
use crate::clock;
use crate::engine::{Engine, EngineError, Rejection, Verdict};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct RoombookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoombookQueryParser>,
    slot_step: Minute,
}

impl RoombookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, slot_step: Minute) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoombookQueryParser),
            slot_step,
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertResource { id, name, open, close, enabled } => {
                engine
                    .create_resource(id, name, Span { start: open, end: close }, enabled)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource { id, name, open, close, enabled } => {
                engine
                    .update_resource(id, name, Span { start: open, end: close }, enabled)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DisableResource { id } => {
                engine.disable_resource(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { id, resource_id, date, start, end, participants, status } => {
                let verdict = engine
                    .create_booking(id, resource_id, date, start, end, participants, status)
                    .await
                    .map_err(engine_err)?;
                verdict_ok(verdict)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetBookingStatus { id, status } => {
                let verdict = engine.set_booking_status(id, status).await.map_err(engine_err)?;
                verdict_ok(verdict)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeactivateBooking { id } => {
                engine.deactivate_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await;
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<_>> = resources
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&i32::from(r.window.start))?;
                        encoder.encode_field(&i32::from(r.window.end))?;
                        encoder.encode_field(&span_label(r.window))?;
                        encoder.encode_field(&r.enabled)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBookings { resource_id, date } => {
                let bookings = engine.list_bookings(resource_id, date).await.map_err(engine_err)?;
                let now = chrono::Local::now().naive_local();
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .iter()
                    .map(|b| {
                        let participants = serde_json::to_string(&b.participants)
                            .map_err(|e| user_error("XX000", e.to_string()))?;
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.resource_id.to_string())?;
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&i32::from(b.span.start))?;
                        encoder.encode_field(&i32::from(b.span.end))?;
                        encoder.encode_field(&span_label(b.span))?;
                        encoder.encode_field(&b.status.code())?;
                        encoder.encode_field(&crate::engine::label_for_status(b.status.code()).to_string())?;
                        encoder.encode_field(&Engine::classify(b, now).as_str().to_string())?;
                        encoder.encode_field(&participants)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability { resource_id, date, min_duration } => {
                let free = engine
                    .compute_free_intervals(resource_id, date, min_duration)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rid_str = resource_id.to_string();
                let date_str = date.to_string();
                let rows: Vec<PgWireResult<_>> = free
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid_str)?;
                        encoder.encode_field(&date_str)?;
                        encoder.encode_field(&i32::from(slot.start))?;
                        encoder.encode_field(&i32::from(slot.end))?;
                        encoder.encode_field(&i32::from(slot.duration()))?;
                        encoder.encode_field(&span_label(slot))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectSlots { resource_id, date, step, start } => {
                let options = engine
                    .slot_options(resource_id, date, step.unwrap_or(self.slot_step), start)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = options
                    .into_iter()
                    .map(|m| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i32::from(m))?;
                        encoder.encode_field(&minute_label(m))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

/// 12-hour text for a minute of the day.
fn minute_label(m: Minute) -> String {
    clock::format_12h(m).unwrap_or_else(|_| m.to_string())
}

fn span_label(span: Span) -> String {
    format!("{} - {}", minute_label(span.start), minute_label(span.end))
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("open", Type::INT4),
        text_field("close", Type::INT4),
        text_field("hours", Type::VARCHAR),
        text_field("enabled", Type::BOOL),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("resource_id", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("start", Type::INT4),
        text_field("end", Type::INT4),
        text_field("time", Type::VARCHAR),
        text_field("status", Type::INT8),
        text_field("status_label", Type::VARCHAR),
        text_field("state", Type::VARCHAR),
        text_field("participants", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("resource_id", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("start", Type::INT4),
        text_field("end", Type::INT4),
        text_field("duration", Type::INT4),
        text_field("label", Type::VARCHAR),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![text_field("minute", Type::INT4), text_field("label", Type::VARCHAR)]
}

/// Row description for a statement, decided from its text alone so that
/// statements with unbound `$N` placeholders can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    if lower.contains("availability") {
        availability_schema()
    } else if lower.contains("slots") {
        slots_schema()
    } else if lower.contains("bookings") {
        bookings_schema()
    } else if lower.contains("resources") {
        resources_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoombookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoombookQueryParser;

#[async_trait]
impl QueryParser for RoombookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoombookHandler {
    type Statement = String;
    type QueryParser = RoombookQueryParser;

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
        let mut responses = self.run(&engine, &sql).await?;
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1`, `$2`, ... with the bound parameter values as quoted text,
/// in one pass over the statement. Inserted values are never rescanned.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        if let Some(param) = param {
            out.push_str(&sql[copied..i]);
            match param {
                Some(value) => {
                    out.push('\'');
                    out.push_str(&String::from_utf8_lossy(value.as_ref()).replace('\'', "''"));
                    out.push('\'');
                }
                None => out.push_str("NULL"),
            }
            copied = end;
        }
        i = end.max(i + 1);
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoombookFactory {
    handler: Arc<RoombookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<RoombookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoombookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String, slot_step: Minute) -> Self {
        Self {
            handler: Arc::new(RoombookHandler::new(tenant_manager, slot_step)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                RoombookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoombookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    slot_step: Minute,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = RoombookFactory::new(tenant_manager, password, slot_step);
    pgwire::tokio::process_socket(socket, tls, factory)
        .await
        .map_err(|e| io::Error::other(e.to_string()))
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for a booking rejection: a conflict is an exclusion violation,
/// a malformed or out-of-hours range an invalid parameter.
fn rejection_code(rejection: &Rejection) -> &'static str {
    match rejection {
        Rejection::Overlaps(_) => "23P01",
        Rejection::InvalidRange | Rejection::OutsideOperatingHours => "22023",
    }
}

fn verdict_ok(verdict: Verdict) -> PgWireResult<()> {
    match verdict {
        Verdict::Accepted => Ok(()),
        Verdict::Rejected(r) => Err(user_error(rejection_code(&r), format!("booking rejected: {r}"))),
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match e {
        EngineError::DataIntegrity(_) => "XX001",
        _ => "P0001",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
