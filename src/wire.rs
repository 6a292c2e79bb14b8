use std::fmt::Debug;
use std::sync::Arc;

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
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::LendItAuthSource;
use crate::engine::{now_ms, Engine, EngineError, Page};
use crate::limits::DEFAULT_PAGE_SIZE;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct LendItHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<LendItQueryParser>,
}

impl LendItHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(LendItQueryParser),
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

    /// The acting user is the connection's startup `user` parameter, which
    /// must be a ULID for any actor-scoped command.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> Option<Ulid> {
        client
            .metadata()
            .get("user")
            .and_then(|u| Ulid::from_string(u).ok())
    }

    async fn dispatch<C>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let started = std::time::Instant::now();
        let result = self.execute_command(&engine, actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: Option<Ulid>,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertUser { id, name, email } => {
                engine.create_user(id, name, email).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateUser { id, name, email } => {
                engine.update_user(id, name, email).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteUser { id } => {
                engine.remove_user(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectUsers { id } => {
                let users = match id {
                    Some(id) => vec![engine.get_user(id).map_err(engine_err)?],
                    None => engine.list_users(),
                };
                Ok(vec![user_rows(&users)])
            }
            Command::InsertItem {
                id,
                name,
                description,
                available,
            } => {
                let owner = require_actor(actor)?;
                engine
                    .create_item(id, owner, name, description, available)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateItem {
                id,
                name,
                description,
                available,
            } => {
                let actor = require_actor(actor)?;
                engine
                    .update_item(id, actor, name, description, available)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectItem { id } => {
                let actor = require_actor(actor)?;
                let info = engine
                    .get_item_info(id, actor, now_ms())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![item_rows(&[info])])
            }
            Command::SelectOwnItems { limit, offset } => {
                let actor = require_actor(actor)?;
                let page = make_page(offset, limit)?;
                let infos = engine
                    .list_items_for_owner(actor, page, now_ms())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![item_rows(&infos)])
            }
            Command::SearchItems { text, limit, offset } => {
                let actor = require_actor(actor)?;
                let page = make_page(offset, limit)?;
                let infos = engine
                    .search_items(actor, &text, page)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![item_rows(&infos)])
            }
            Command::InsertBooking {
                id,
                item_id,
                start,
                end,
            } => {
                let booker = require_actor(actor)?;
                let result = engine.request_booking(id, item_id, booker, start, end).await;
                if matches!(result, Err(EngineError::Conflict(_))) {
                    metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                }
                result.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DecideBooking { id, approved } => {
                let actor = require_actor(actor)?;
                engine
                    .decide_booking(id, actor, approved)
                    .await
                    .map_err(engine_err)?;
                let decision = if approved { "approved" } else { "rejected" };
                metrics::counter!(observability::BOOKING_DECISIONS_TOTAL, "decision" => decision)
                    .increment(1);
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectBooking { id } => {
                let actor = require_actor(actor)?;
                let booking = engine.get_booking(id, actor).await.map_err(engine_err)?;
                Ok(vec![booking_rows(&[booking])])
            }
            Command::SelectBookings {
                state,
                as_booker,
                now,
                limit,
                offset,
            } => {
                let actor = require_actor(actor)?;
                let page = make_page(offset, limit)?;
                let bookings = engine
                    .list_bookings(actor, &state, as_booker, page, now.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(&bookings)])
            }
            Command::InsertComment { id, item_id, text } => {
                let author = require_actor(actor)?;
                engine
                    .add_comment(id, item_id, author, text, now_ms())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectComments { item_id } => {
                let comments = engine.list_comments(item_id).await.map_err(engine_err)?;
                Ok(vec![comment_rows(&comments)])
            }
            Command::SelectSummaries { item_ids, now } => {
                let summaries = engine
                    .summarize_items(&item_ids, now.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                let mut rows: Vec<(Ulid, BookingSummary)> = summaries.into_iter().collect();
                rows.sort_by_key(|(id, _)| *id);
                Ok(vec![summary_rows(&rows)])
            }
            Command::Listen { channel } => {
                let item_id_str = channel.strip_prefix("item_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected item_{{id}})"),
                    )))
                })?;
                let _item_id = Ulid::from_string(item_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn require_actor(actor: Option<Ulid>) -> PgWireResult<Ulid> {
    actor.ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "28000".into(),
            "connection user is not a ULID; actor-scoped commands need one".into(),
        )))
    })
}

fn make_page(offset: Option<usize>, limit: Option<usize>) -> PgWireResult<Page> {
    Page::new(offset.unwrap_or(0), limit.unwrap_or(DEFAULT_PAGE_SIZE)).map_err(engine_err)
}

// ── Row schemas and encoders ─────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn users_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("name"), varchar("email")]
}

fn items_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("owner_id"),
        varchar("name"),
        varchar("description"),
        boolean("available"),
        varchar("last_booking_id"),
        varchar("next_booking_id"),
        int8("rent_count"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("item_id"),
        varchar("booker_id"),
        int8("start"),
        int8("end"),
        varchar("status"),
    ]
}

fn comments_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("item_id"),
        varchar("author_id"),
        varchar("text"),
        int8("created_at"),
    ]
}

fn summaries_schema() -> Vec<FieldInfo> {
    vec![
        varchar("item_id"),
        varchar("last_booking_id"),
        int8("last_start"),
        varchar("next_booking_id"),
        int8("next_start"),
        int8("rent_count"),
    ]
}

fn user_rows(users: &[User]) -> Response {
    let schema = Arc::new(users_schema());
    let rows: Vec<PgWireResult<_>> = users
        .iter()
        .map(|u| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&u.id.to_string())?;
            encoder.encode_field(&u.name)?;
            encoder.encode_field(&u.email)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn item_rows(items: &[ItemInfo]) -> Response {
    let schema = Arc::new(items_schema());
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|i| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&i.id.to_string())?;
            encoder.encode_field(&i.owner_id.to_string())?;
            encoder.encode_field(&i.name)?;
            encoder.encode_field(&i.description)?;
            encoder.encode_field(&i.available)?;
            let last = i
                .summary
                .and_then(|s| s.last_booking)
                .map(|b| b.id.to_string());
            let next = i
                .summary
                .and_then(|s| s.next_booking)
                .map(|b| b.id.to_string());
            let rent_count = i.summary.map(|s| s.rent_count as i64);
            encoder.encode_field(&last)?;
            encoder.encode_field(&next)?;
            encoder.encode_field(&rent_count)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn booking_rows(bookings: &[BookingInfo]) -> Response {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.item_id.to_string())?;
            encoder.encode_field(&b.booker_id.to_string())?;
            encoder.encode_field(&b.start)?;
            encoder.encode_field(&b.end)?;
            encoder.encode_field(&b.status.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn comment_rows(comments: &[CommentInfo]) -> Response {
    let schema = Arc::new(comments_schema());
    let rows: Vec<PgWireResult<_>> = comments
        .iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.id.to_string())?;
            encoder.encode_field(&c.item_id.to_string())?;
            encoder.encode_field(&c.author_id.to_string())?;
            encoder.encode_field(&c.text)?;
            encoder.encode_field(&c.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn summary_rows(rows_in: &[(Ulid, BookingSummary)]) -> Response {
    let schema = Arc::new(summaries_schema());
    let rows: Vec<PgWireResult<_>> = rows_in
        .iter()
        .map(|(item_id, s)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&item_id.to_string())?;
            encoder.encode_field(&s.last_booking.map(|b| b.id.to_string()))?;
            encoder.encode_field(&s.last_booking.map(|b| b.start))?;
            encoder.encode_field(&s.next_booking.map(|b| b.id.to_string()))?;
            encoder.encode_field(&s.next_booking.map(|b| b.start))?;
            encoder.encode_field(&(s.rent_count as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Schema for a SELECT statement, keyed on the table it names.
fn select_schema(sql_upper: &str) -> Vec<FieldInfo> {
    if !sql_upper.contains("SELECT") {
        return vec![];
    }
    if sql_upper.contains("BOOKING_SUMMARIES") {
        summaries_schema()
    } else if sql_upper.contains("BOOKINGS") {
        bookings_schema()
    } else if sql_upper.contains("USERS") {
        users_schema()
    } else if sql_upper.contains("ITEMS") {
        items_schema()
    } else if sql_upper.contains("COMMENTS") {
        comments_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for LendItHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.dispatch(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LendItQueryParser;

#[async_trait]
impl QueryParser for LendItQueryParser {
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
        Ok(select_schema(&stmt.to_uppercase()))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LendItHandler {
    type Statement = String;
    type QueryParser = LendItQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.dispatch(client, &sql).await?;
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
        let schema = select_schema(&target.statement.to_uppercase());
        Ok(DescribeStatementResponse::new(param_types, schema))
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
        let schema = select_schema(&target.statement.statement.to_uppercase());
        Ok(DescribePortalResponse::new(schema))
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
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

pub struct LendItFactory {
    handler: Arc<LendItHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LendItAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LendItFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = LendItAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LendItHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LendItFactory {
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

/// Drive one client connection through the pgwire protocol machinery.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = LendItFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

// ── Error mapping ────────────────────────────────────────────────

/// Map engine failure kinds onto SQLSTATE codes: absence, privilege,
/// bad input, and overlap each get their own class.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden(_) => "42501",
        EngineError::BadRequest(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
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
