//! MySQL protocol engine: handshake, authentication policy, and the command
//! loop.
//!
//! Authentication is deliberately absent: any client whose handshake
//! response parses is accepted, and the scramble exists only to satisfy the
//! wire format. A handful of introspection queries that GUI clients fire
//! before any real work are answered from session state so they succeed even
//! when the backend dialect would reject them.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::backend::{BackendSession, RowSet, SqlOutcome};
use crate::config::DbKind;
use crate::parser;
use crate::protocol::mysql::{
    build_column_count, build_column_def, build_eof, build_err, build_handshake, build_ok,
    build_text_row, parse_handshake_response, ColumnMeta, Command, LoginRequest, MySqlCodec,
    Packet, Scramble,
};
use crate::typemap::{mysql_display_length, mysql_flags, mysql_type_byte};

use super::{ProtocolEngine, SessionCtx, SessionError};

const DEFAULT_SERVER_VERSION: &str = "5.7.25";
const ERR_GENERAL: u16 = 1001;
const ERR_ACCESS_DENIED: u16 = 1045;

/// Variables served without consulting the backend. Navicat and JDBC probe
/// these during connection setup.
const SESSION_VARIABLES: &[(&str, &str)] = &[
    ("lower_case_file_system", "OFF"),
    ("lower_case_table_names", "0"),
    (
        "sql_mode",
        "STRICT_TRANS_TABLES,NO_ZERO_DATE,NO_ZERO_IN_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION",
    ),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlEngine;

impl ProtocolEngine for MySqlEngine {
    fn protocol(&self) -> &'static str {
        "mysql"
    }

    fn connect_failure(&self, message: &str) -> Bytes {
        let payload = build_err(ERR_GENERAL, "HY000", &format!("Connection Error: {message}"));
        let mut framed = BytesMut::with_capacity(4 + payload.len());
        framed.extend_from_slice(&[
            (payload.len() & 0xFF) as u8,
            ((payload.len() >> 8) & 0xFF) as u8,
            ((payload.len() >> 16) & 0xFF) as u8,
            0,
        ]);
        framed.extend_from_slice(&payload);
        framed.freeze()
    }

    async fn serve<S, B>(
        &self,
        io: S,
        mut ctx: SessionCtx,
        backend: &mut B,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        B: BackendSession,
    {
        let mut framed = Framed::new(io, MySqlCodec::new());

        let version = backend
            .server_version()
            .unwrap_or_else(|| DEFAULT_SERVER_VERSION.to_string());
        let scramble = Scramble::generate();
        framed
            .send(Packet::new(
                0,
                build_handshake(&version, ctx.connection_id, &scramble).freeze(),
            ))
            .await?;

        let Some(login) = framed.next().await.transpose()? else {
            // EOF before the handshake response: close silently.
            return Ok(());
        };
        let login_seq = login.seq;

        match parse_handshake_response(&login.payload)? {
            LoginRequest::Ssl { .. } => {
                framed
                    .send(Packet::new(
                        login_seq.wrapping_add(1),
                        build_err(ERR_ACCESS_DENIED, "28000", "SSL not supported").freeze(),
                    ))
                    .await?;
                return Ok(());
            }
            LoginRequest::Login(response) => {
                info!(
                    user = %response.username,
                    database = ?response.database,
                    "mysql client login"
                );
                if let Some(database) = response.database {
                    match backend.set_schema(&database).await {
                        Ok(()) => ctx.schema = database,
                        Err(e) if e.is_fatal() => return Err(e.into()),
                        Err(e) => {
                            warn!(error = %e, database = %database, "could not switch login schema");
                            ctx.schema = database;
                        }
                    }
                }
                framed
                    .send(Packet::new(login_seq.wrapping_add(1), build_ok(0, 0).freeze()))
                    .await?;
            }
        }

        loop {
            let packet = tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                next = framed.next() => match next {
                    None => break, // client EOF
                    Some(Ok(packet)) => packet,
                    Some(Err(e)) => {
                        // Framing errors are fatal; the message is best-effort
                        // because the client may already be gone.
                        let _ = framed
                            .send(Packet::new(
                                0,
                                build_err(ERR_GENERAL, "HY000", &format!("Protocol Error: {e}"))
                                    .freeze(),
                            ))
                            .await;
                        return Err(e.into());
                    }
                },
            };
            let seq = packet.seq;

            match Command::parse(&packet.payload) {
                Command::Quit => break,
                Command::InitDb(database) => {
                    match backend.set_schema(&database).await {
                        Ok(()) => {
                            ctx.schema = database;
                            send_ok(&mut framed, seq.wrapping_add(1), 0).await?;
                        }
                        Err(e) if e.is_fatal() => return Err(e.into()),
                        Err(e) => {
                            send_err(
                                &mut framed,
                                seq.wrapping_add(1),
                                ERR_GENERAL,
                                "HY000",
                                &format!("Error: {e}"),
                            )
                            .await?;
                        }
                    }
                }
                Command::Query(sql) => {
                    handle_query(&mut framed, &ctx.schema, backend, seq, &sql).await?;
                }
                Command::Other(opcode) => {
                    // Permissive: unknown opcodes are acknowledged.
                    debug!(opcode, "unknown command, replying OK");
                    send_ok(&mut framed, seq.wrapping_add(1), 0).await?;
                }
                command => {
                    // COM_FIELD_LIST, COM_STATISTICS, COM_PING and the other
                    // administrative opcodes are acknowledged stubs.
                    debug!(?command, "stub command");
                    send_ok(&mut framed, seq.wrapping_add(1), 0).await?;
                }
            }
        }

        Ok(())
    }
}

async fn send_ok<S>(
    framed: &mut Framed<S, MySqlCodec>,
    seq: u8,
    affected_rows: u64,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(Packet::new(seq, build_ok(affected_rows, 0).freeze()))
        .await?;
    Ok(())
}

async fn send_err<S>(
    framed: &mut Framed<S, MySqlCodec>,
    seq: u8,
    code: u16,
    state: &str,
    message: &str,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(Packet::new(seq, build_err(code, state, message).freeze()))
        .await?;
    Ok(())
}

/// Writes one response series, keeping the sequence id contiguous across
/// every packet it emits.
struct ResponseStream<'a, S> {
    framed: &'a mut Framed<S, MySqlCodec>,
    seq: u8,
}

impl<'a, S> ResponseStream<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(framed: &'a mut Framed<S, MySqlCodec>, request_seq: u8) -> Self {
        Self {
            framed,
            seq: request_seq.wrapping_add(1),
        }
    }

    async fn send(&mut self, payload: BytesMut) -> Result<(), SessionError> {
        self.framed
            .send(Packet::new(self.seq, payload.freeze()))
            .await?;
        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    async fn ok(&mut self, affected_rows: u64) -> Result<(), SessionError> {
        self.send(build_ok(affected_rows, 0)).await
    }

    async fn error(&mut self, code: u16, state: &str, message: &str) -> Result<(), SessionError> {
        self.send(build_err(code, state, message)).await
    }

    async fn row_set(&mut self, rs: &RowSet) -> Result<(), SessionError> {
        self.send(build_column_count(rs.columns.len() as u64)).await?;
        for col in &rs.columns {
            let meta = ColumnMeta {
                schema: &col.schema,
                table: &col.table,
                name: &col.name,
                type_byte: mysql_type_byte(col.kind),
                column_length: mysql_display_length(col),
                flags: mysql_flags(col),
                decimals: col.scale as u8,
            };
            self.send(build_column_def(&meta)).await?;
        }
        self.send(build_eof()).await?;
        for row in &rs.rows {
            self.send(build_text_row(row)).await?;
        }
        self.send(build_eof()).await
    }
}

async fn handle_query<S, B>(
    framed: &mut Framed<S, MySqlCodec>,
    schema: &str,
    backend: &mut B,
    request_seq: u8,
    sql: &str,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: BackendSession,
{
    info!(sql, "mysql query");
    if !parser::validate(DbKind::MySql, sql) {
        debug!(sql, "statement did not parse as MySQL; forwarding anyway");
    }

    let mut out = ResponseStream::new(framed, request_seq);
    let statements = split_statements(sql);
    if statements.is_empty() {
        return out.ok(0).await;
    }
    for statement in statements {
        match run_statement(&mut out, schema, backend, statement).await {
            Ok(()) => {}
            Err(SessionError::Backend(e)) if !e.is_fatal() => {
                out.error(ERR_GENERAL, "HY000", &format!("SQL Error: {e}"))
                    .await?;
                break;
            }
            Err(other) => return Err(other),
        }
    }
    Ok(())
}

async fn run_statement<S, B>(
    out: &mut ResponseStream<'_, S>,
    schema: &str,
    backend: &mut B,
    statement: &str,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: BackendSession,
{
    let upper = statement.to_ascii_uppercase();

    if upper == "SELECT DATABASE()" {
        let rs = RowSet::single_column("DATABASE()", [schema.to_string()]);
        return out.row_set(&rs).await;
    }

    if upper.starts_with("SHOW DATABASES") {
        return match backend.execute(statement).await {
            Ok(SqlOutcome::Rows(rs)) => out.row_set(&rs).await,
            Err(e) if e.is_fatal() => Err(e.into()),
            _ => {
                let rs = RowSet::single_column("Database", fallback_databases(schema));
                out.row_set(&rs).await
            }
        };
    }

    if upper.starts_with("SHOW TABLES") {
        return match backend.execute(statement).await {
            Ok(SqlOutcome::Rows(rs)) => out.row_set(&rs).await,
            Err(e) if e.is_fatal() => Err(e.into()),
            _ => {
                let header = format!("Tables_in_{schema}");
                let rs = RowSet::single_column(&header, fallback_tables(schema));
                out.row_set(&rs).await
            }
        };
    }

    if upper.starts_with("SHOW VARIABLES") {
        let rs = variables_result(like_pattern(statement).as_deref());
        return out.row_set(&rs).await;
    }

    match backend.execute(statement).await {
        Ok(SqlOutcome::Rows(rs)) => out.row_set(&rs).await,
        Ok(SqlOutcome::Update(count)) => out.ok(count).await,
        Err(e) => Err(e.into()),
    }
}

/// Split a multi-statement query on semicolons, honoring single, double,
/// and backtick quoting. Sequence ids keep advancing across the resulting
/// response groups.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;
    for (i, c) in sql.char_indices() {
        match c {
            '\'' if !in_double && !in_backtick => in_single = !in_single,
            '"' if !in_single && !in_backtick => in_double = !in_double,
            '`' if !in_single && !in_double => in_backtick = !in_backtick,
            ';' if !in_single && !in_double && !in_backtick => {
                out.push(&sql[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&sql[start..]);
    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn fallback_databases(schema: &str) -> Vec<String> {
    let mut databases: Vec<String> = ["information_schema", "mysql", "performance_schema", "sys"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if !databases.iter().any(|d| d == schema) && !schema.is_empty() {
        databases.push(schema.to_string());
    }
    databases
}

fn fallback_tables(schema: &str) -> Vec<String> {
    let tables: &[&str] = match schema {
        "information_schema" => &[
            "COLUMNS", "TABLES", "SCHEMATA", "ROUTINES", "PARAMETERS", "ENGINES", "VARIABLES",
        ],
        "mysql" => &["user", "db", "tables_priv", "columns_priv", "procs_priv"],
        "performance_schema" => &[
            "accounts", "hosts", "threads", "events_waits_current", "events_waits_history",
        ],
        "sys" => &["sys_config", "statements_with_runtimes_in_95th_percentile"],
        _ => &["a", "b", "c"],
    };
    tables.iter().map(|t| t.to_string()).collect()
}

/// Extract the quoted pattern of a `LIKE '...'` clause, if present.
pub fn like_pattern(statement: &str) -> Option<String> {
    let upper = statement.to_ascii_uppercase();
    let idx = upper.find(" LIKE")?;
    let rest = statement[idx + 5..].trim_start();
    let quote = rest.chars().next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_string())
}

/// Translate a SQL LIKE pattern into an anchored case-insensitive regex.
pub fn like_to_regex(pattern: &str) -> Option<Regex> {
    let mut rx = String::with_capacity(pattern.len() + 8);
    rx.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '%' => rx.push_str(".*"),
            '_' => rx.push('.'),
            other => rx.push_str(&regex::escape(&other.to_string())),
        }
    }
    rx.push('$');
    Regex::new(&rx).ok()
}

fn variables_result(pattern: Option<&str>) -> RowSet {
    let matcher = pattern.and_then(like_to_regex);
    let rows = SESSION_VARIABLES
        .iter()
        .filter(|(name, _)| match (&matcher, pattern) {
            (Some(rx), _) => rx.is_match(name),
            (None, Some(_)) => false, // unparseable pattern matches nothing
            (None, None) => true,
        })
        .map(|(name, value)| vec![Some(name.to_string()), Some(value.to_string())])
        .collect();
    RowSet {
        columns: vec![
            crate::backend::ColumnDesc::text("Variable_name"),
            crate::backend::ColumnDesc::text("Value"),
        ],
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_quotes() {
        assert_eq!(split_statements("SELECT 1; SELECT 2"), vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(
            split_statements("SELECT 'a;b'; SELECT `x;y`"),
            vec!["SELECT 'a;b'", "SELECT `x;y`"]
        );
        assert_eq!(split_statements("SELECT 1;;  "), vec!["SELECT 1"]);
        assert_eq!(split_statements("  "), Vec::<&str>::new());
    }

    #[test]
    fn like_pattern_extraction() {
        assert_eq!(
            like_pattern("SHOW VARIABLES LIKE 'lower_case_%'").as_deref(),
            Some("lower_case_%")
        );
        assert_eq!(
            like_pattern("show variables like \"sql_mode\"").as_deref(),
            Some("sql_mode")
        );
        assert_eq!(like_pattern("SHOW VARIABLES"), None);
    }

    #[test]
    fn like_regex_semantics() {
        let rx = like_to_regex("lower_case_%").unwrap();
        assert!(rx.is_match("lower_case_file_system"));
        assert!(rx.is_match("LOWER_CASE_TABLE_NAMES"));
        assert!(!rx.is_match("sql_mode"));

        let exact = like_to_regex("sql_mode").unwrap();
        assert!(exact.is_match("sql_mode"));
        assert!(!exact.is_match("sql_mode_extra"));
    }

    #[test]
    fn variables_lookup() {
        let all = variables_result(None);
        assert_eq!(all.rows.len(), SESSION_VARIABLES.len());

        let lower = variables_result(Some("lower_case_%"));
        assert_eq!(lower.rows.len(), 2);

        let none = variables_result(Some("no_such_variable"));
        assert!(none.rows.is_empty());
        assert_eq!(none.columns.len(), 2);
    }

    #[test]
    fn fallback_database_list_includes_current_schema() {
        let dbs = fallback_databases("demo");
        assert_eq!(
            dbs,
            vec!["information_schema", "mysql", "performance_schema", "sys", "demo"]
        );
        // System schemas are not duplicated.
        assert_eq!(fallback_databases("sys").len(), 4);
    }

    #[test]
    fn fallback_tables_are_schema_aware() {
        assert!(fallback_tables("mysql").contains(&"user".to_string()));
        assert_eq!(fallback_tables("demo"), vec!["a", "b", "c"]);
    }
}
