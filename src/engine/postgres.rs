//! PostgreSQL protocol engine: startup, the simple-query flow, and the
//! extended-query flow.
//!
//! No password challenge is issued; a parsed StartupMessage authenticates.
//! The SSL probe is refused with a plain `N` so clients continue in
//! cleartext. Two compatibility rewrites are applied before delegation,
//! both inherited from what Navicat-class clients send to older servers.

use std::collections::HashMap;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::backend::{BackendSession, ColumnDesc, SqlOutcome};
use crate::config::DbKind;
use crate::parser;
use crate::protocol::postgres::{
    serialize, BackendMessage, FieldDescription, FrontendMessage, PostgresCodec, TargetKind,
    PROTOCOL_VERSION_3_0, TXN_FAILED, TXN_IDLE, TXN_IN_BLOCK,
};
use crate::typemap::{pg_type_oid, pg_type_size};

use super::{ProtocolEngine, SessionCtx, SessionError};

const DEFAULT_SERVER_VERSION: &str = "13.0";
const OID_TEXT: u32 = 25;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TransactionState {
    #[default]
    Idle,
    InBlock,
    Failed,
}

impl TransactionState {
    fn status_byte(self) -> u8 {
        match self {
            TransactionState::Idle => TXN_IDLE,
            TransactionState::InBlock => TXN_IN_BLOCK,
            TransactionState::Failed => TXN_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnAction {
    Begin,
    End,
}

struct PreparedStatement {
    query: String,
    param_types: Vec<u32>,
}

struct Portal {
    query: String,
    params: Vec<Option<Vec<u8>>>,
}

#[derive(Default)]
struct QueryState {
    prepared: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
    txn: TransactionState,
}

impl QueryState {
    fn observe_success(&mut self, action: Option<TxnAction>) {
        match action {
            Some(TxnAction::Begin) => self.txn = TransactionState::InBlock,
            Some(TxnAction::End) => self.txn = TransactionState::Idle,
            None => {}
        }
    }

    fn observe_error(&mut self) {
        if self.txn == TransactionState::InBlock {
            self.txn = TransactionState::Failed;
        }
    }
}

impl ProtocolEngine for PostgresEngine {
    fn protocol(&self) -> &'static str {
        "postgresql"
    }

    fn connect_failure(&self, message: &str) -> Bytes {
        serialize(BackendMessage::ErrorResponse {
            severity: "FATAL".to_string(),
            code: "08006".to_string(),
            message: format!("Connection Error: {message}"),
        })
        .freeze()
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
        let mut framed = Framed::new(io, PostgresCodec::new());

        // Startup phase: SSL probes are refused in place, a CancelRequest
        // closes the connection, anything else must be a StartupMessage.
        let parameters = loop {
            let message = tokio::select! {
                _ = ctx.shutdown.cancelled() => return Ok(()),
                next = framed.next() => match next {
                    None => return Ok(()),
                    Some(message) => message?,
                },
            };
            match message {
                FrontendMessage::SslRequest => {
                    framed.get_mut().write_all(b"N").await?;
                    framed.get_mut().flush().await?;
                }
                FrontendMessage::CancelRequest => return Ok(()),
                FrontendMessage::Startup { version, parameters } => {
                    if version != PROTOCOL_VERSION_3_0 {
                        debug!(version, "accepting non-3.0 startup version");
                    }
                    break parameters;
                }
                other => {
                    debug!(?other, "message before startup");
                    framed
                        .send(BackendMessage::ErrorResponse {
                            severity: "FATAL".to_string(),
                            code: "08P01".to_string(),
                            message: "expected startup message".to_string(),
                        })
                        .await?;
                    return Ok(());
                }
            }
        };

        let mut user = String::new();
        for (key, value) in &parameters {
            match key.as_str() {
                "user" => user = value.clone(),
                "database" => ctx.schema = value.clone(),
                "client_encoding" | "DateStyle" | "TimeZone" | "application_name" => {}
                other => debug!(key = other, "ignoring startup parameter"),
            }
        }
        info!(user, database = %ctx.schema, "postgres client startup");

        // Authentication sequence, without a password challenge.
        let version = backend
            .server_version()
            .unwrap_or_else(|| DEFAULT_SERVER_VERSION.to_string());
        framed.send(BackendMessage::AuthenticationOk).await?;
        let parameter_status = [
            ("server_version", version.as_str()),
            ("server_encoding", "UTF8"),
            ("client_encoding", "UTF8"),
            ("DateStyle", "ISO, MDY"),
            ("TimeZone", "UTC"),
            ("integer_datetimes", "on"),
        ];
        for (name, value) in parameter_status {
            framed
                .send(BackendMessage::ParameterStatus {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .await?;
        }
        framed
            .send(BackendMessage::BackendKeyData {
                process_id: ctx.connection_id,
                secret_key: OsRng.gen(),
            })
            .await?;
        framed
            .send(BackendMessage::ReadyForQuery { status: TXN_IDLE })
            .await?;

        let mut state = QueryState::default();
        loop {
            let message = tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                next = framed.next() => match next {
                    None => break,
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        // Framing errors are fatal; the message is best-effort
                        // because the client may already be gone.
                        let _ = framed
                            .send(BackendMessage::ErrorResponse {
                                severity: "FATAL".to_string(),
                                code: "08P01".to_string(),
                                message: format!("Protocol Error: {e}"),
                            })
                            .await;
                        return Err(e.into());
                    }
                },
            };
            match message {
                FrontendMessage::Query(sql) => {
                    handle_simple_query(&mut framed, backend, &mut state, &sql).await?;
                }
                FrontendMessage::Parse { name, query, param_types } => {
                    let param_types = if param_types.is_empty() {
                        vec![OID_TEXT; count_placeholders(&query)]
                    } else {
                        param_types
                    };
                    state
                        .prepared
                        .insert(name, PreparedStatement { query, param_types });
                    framed.send(BackendMessage::ParseComplete).await?;
                }
                FrontendMessage::Bind { portal, statement, params, .. } => {
                    let query = state
                        .prepared
                        .get(&statement)
                        .map(|s| s.query.clone())
                        .unwrap_or_default();
                    state.portals.insert(portal, Portal { query, params });
                    framed.send(BackendMessage::BindComplete).await?;
                }
                FrontendMessage::Describe { kind, name } => {
                    if kind == TargetKind::Statement {
                        let param_types = state
                            .prepared
                            .get(&name)
                            .map(|s| s.param_types.clone())
                            .unwrap_or_default();
                        framed
                            .send(BackendMessage::ParameterDescription { param_types })
                            .await?;
                    }
                    // The authoritative RowDescription is sent on Execute.
                    framed.send(BackendMessage::NoData).await?;
                }
                FrontendMessage::Execute { portal, .. } => {
                    handle_execute(&mut framed, backend, &mut state, &portal).await?;
                }
                FrontendMessage::Close { kind, name } => {
                    match kind {
                        TargetKind::Statement => {
                            state.prepared.remove(&name);
                        }
                        TargetKind::Portal => {
                            state.portals.remove(&name);
                        }
                    }
                    framed.send(BackendMessage::CloseComplete).await?;
                }
                FrontendMessage::Sync => {
                    framed
                        .send(BackendMessage::ReadyForQuery {
                            status: state.txn.status_byte(),
                        })
                        .await?;
                }
                FrontendMessage::Flush => {
                    framed.flush().await?;
                }
                FrontendMessage::Terminate => break,
                FrontendMessage::Unknown(tag) => {
                    debug!(tag, "unsupported message type");
                    framed
                        .send(BackendMessage::ErrorResponse {
                            severity: "ERROR".to_string(),
                            code: "0A000".to_string(),
                            message: format!("Unsupported message type: {}", tag as char),
                        })
                        .await?;
                    framed
                        .send(BackendMessage::ReadyForQuery {
                            status: state.txn.status_byte(),
                        })
                        .await?;
                }
                FrontendMessage::SslRequest
                | FrontendMessage::CancelRequest
                | FrontendMessage::Startup { .. } => {
                    framed
                        .send(BackendMessage::ErrorResponse {
                            severity: "ERROR".to_string(),
                            code: "08P01".to_string(),
                            message: "unexpected startup message in command phase".to_string(),
                        })
                        .await?;
                    framed
                        .send(BackendMessage::ReadyForQuery {
                            status: state.txn.status_byte(),
                        })
                        .await?;
                }
            }
        }

        Ok(())
    }
}

fn fields_from(columns: &[ColumnDesc]) -> Vec<FieldDescription> {
    columns
        .iter()
        .map(|col| FieldDescription::new(col.name.clone(), pg_type_oid(col.kind), pg_type_size(col.kind)))
        .collect()
}

async fn send_row_set<S>(
    framed: &mut Framed<S, PostgresCodec>,
    rs: &crate::backend::RowSet,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(BackendMessage::RowDescription {
            fields: fields_from(&rs.columns),
        })
        .await?;
    for row in &rs.rows {
        framed
            .send(BackendMessage::DataRow { values: row.clone() })
            .await?;
    }
    framed
        .send(BackendMessage::CommandComplete {
            tag: format!("SELECT {}", rs.rows.len()),
        })
        .await?;
    Ok(())
}

async fn handle_simple_query<S, B>(
    framed: &mut Framed<S, PostgresCodec>,
    backend: &mut B,
    state: &mut QueryState,
    sql: &str,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: BackendSession,
{
    let sql = sql.trim();
    info!(sql, "postgres query");

    if sql.is_empty() {
        framed.send(BackendMessage::EmptyQueryResponse).await?;
        framed
            .send(BackendMessage::ReadyForQuery {
                status: state.txn.status_byte(),
            })
            .await?;
        return Ok(());
    }

    let rewritten = rewrite_statement(sql);
    if !parser::validate(DbKind::Postgres, &rewritten) {
        debug!(sql = %rewritten, "statement did not parse as PostgreSQL; forwarding anyway");
    }
    let txn_action = txn_action_of(&rewritten);

    match backend.execute(&rewritten).await {
        Ok(SqlOutcome::Rows(rs)) => {
            state.observe_success(txn_action);
            send_row_set(framed, &rs).await?;
        }
        Ok(SqlOutcome::Update(count)) => {
            state.observe_success(txn_action);
            framed
                .send(BackendMessage::CommandComplete {
                    tag: command_tag(&rewritten, count),
                })
                .await?;
        }
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            state.observe_error();
            framed
                .send(BackendMessage::ErrorResponse {
                    severity: "ERROR".to_string(),
                    code: "42000".to_string(),
                    message: format!("SQL Error: {e}"),
                })
                .await?;
        }
    }

    framed
        .send(BackendMessage::ReadyForQuery {
            status: state.txn.status_byte(),
        })
        .await?;
    Ok(())
}

async fn handle_execute<S, B>(
    framed: &mut Framed<S, PostgresCodec>,
    backend: &mut B,
    state: &mut QueryState,
    portal: &str,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: BackendSession,
{
    let Some(bound) = state.portals.get(portal) else {
        framed
            .send(BackendMessage::ErrorResponse {
                severity: "ERROR".to_string(),
                code: "34000".to_string(),
                message: format!("portal \"{portal}\" does not exist"),
            })
            .await?;
        return Ok(());
    };

    if bound.query.trim().is_empty() {
        framed
            .send(BackendMessage::CommandComplete {
                tag: "SELECT 0".to_string(),
            })
            .await?;
        return Ok(());
    }

    let sql = bind_parameters(&bound.query, &bound.params);
    let txn_action = txn_action_of(&sql);
    match backend.execute(&sql).await {
        Ok(SqlOutcome::Rows(rs)) => {
            state.observe_success(txn_action);
            send_row_set(framed, &rs).await?;
        }
        Ok(SqlOutcome::Update(count)) => {
            state.observe_success(txn_action);
            framed
                .send(BackendMessage::CommandComplete {
                    tag: command_tag(&sql, count),
                })
                .await?;
        }
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            state.observe_error();
            framed
                .send(BackendMessage::ErrorResponse {
                    severity: "ERROR".to_string(),
                    code: "42000".to_string(),
                    message: format!("SQL Error: {e}"),
                })
                .await?;
        }
    }
    Ok(())
}

/// Compatibility rewrites applied before delegation.
pub fn rewrite_statement(sql: &str) -> String {
    let upper = sql.to_ascii_uppercase();
    // Navicat sends UNICODE; the backend wants UTF8.
    if upper.contains("SET CLIENT_ENCODING") && upper.contains("UNICODE") {
        return "SET client_encoding TO 'UTF8'".to_string();
    }
    // datlastsysoid disappeared in PostgreSQL 9.0.
    if upper.contains("DATLASTSYSOID") {
        return "SELECT DISTINCT 10000::oid as datlastsysoid FROM pg_database".to_string();
    }
    sql.to_string()
}

/// CommandComplete tag for a statement without rows, derived from the
/// leading keyword.
pub fn command_tag(sql: &str, update_count: u64) -> String {
    let keyword = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    match keyword.as_str() {
        "INSERT" => format!("INSERT 0 {update_count}"),
        "UPDATE" => format!("UPDATE {update_count}"),
        "DELETE" => format!("DELETE {update_count}"),
        "CREATE" => "CREATE TABLE".to_string(),
        "DROP" => "DROP TABLE".to_string(),
        "ALTER" => "ALTER TABLE".to_string(),
        "SET" => "SET".to_string(),
        "BEGIN" | "START" => "BEGIN".to_string(),
        "COMMIT" | "END" => "COMMIT".to_string(),
        "ROLLBACK" => "ROLLBACK".to_string(),
        _ => format!("SELECT {update_count}"),
    }
}

fn txn_action_of(sql: &str) -> Option<TxnAction> {
    let keyword = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    match keyword.as_str() {
        "BEGIN" | "START" => Some(TxnAction::Begin),
        "COMMIT" | "ROLLBACK" | "END" => Some(TxnAction::End),
        _ => None,
    }
}

/// Highest `$n` placeholder in a query, ignoring quoted regions.
pub fn count_placeholders(query: &str) -> usize {
    let mut max_param = 0usize;
    let mut chars = query.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '$' if !in_single && !in_double => {
                let mut digits = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() {
                        digits.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Ok(n) = digits.parse::<usize>() {
                    max_param = max_param.max(n);
                }
            }
            _ => {}
        }
    }
    max_param
}

/// Substitute text-format parameters into `$n` placeholders as quoted
/// literals (NULL for absent values). Quoted regions are left untouched.
pub fn bind_parameters(query: &str, params: &[Option<Vec<u8>>]) -> String {
    let mut out = String::with_capacity(query.len() + 16 * params.len());
    let mut chars = query.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '$' if !in_single && !in_double => {
                let mut digits = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() {
                        digits.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if digits.is_empty() {
                    out.push('$');
                    continue;
                }
                let index = digits.parse::<usize>().ok().and_then(|n| n.checked_sub(1));
                match index.and_then(|i| params.get(i)) {
                    Some(Some(bytes)) => {
                        let text = String::from_utf8_lossy(bytes);
                        out.push('\'');
                        out.push_str(&text.replace('\'', "''"));
                        out.push('\'');
                    }
                    Some(None) => out.push_str("NULL"),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_unicode_client_encoding() {
        assert_eq!(
            rewrite_statement("SET CLIENT_ENCODING TO 'UNICODE'"),
            "SET client_encoding TO 'UTF8'"
        );
        assert_eq!(
            rewrite_statement("set client_encoding to 'unicode'"),
            "SET client_encoding TO 'UTF8'"
        );
        assert_eq!(rewrite_statement("SET client_encoding TO 'UTF8'"), "SET client_encoding TO 'UTF8'");
    }

    #[test]
    fn rewrites_datlastsysoid_probe() {
        let rewritten = rewrite_statement("SELECT datlastsysoid FROM pg_database WHERE datname = 'dmp'");
        assert_eq!(
            rewritten,
            "SELECT DISTINCT 10000::oid as datlastsysoid FROM pg_database"
        );
    }

    #[test]
    fn leaves_ordinary_statements_alone() {
        assert_eq!(rewrite_statement("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn command_tags_follow_leading_keyword() {
        assert_eq!(command_tag("INSERT INTO t VALUES (1)", 1), "INSERT 0 1");
        assert_eq!(command_tag("update t set a = 1", 4), "UPDATE 4");
        assert_eq!(command_tag("DELETE FROM t", 2), "DELETE 2");
        assert_eq!(command_tag("CREATE TABLE t (a int)", 0), "CREATE TABLE");
        assert_eq!(command_tag("DROP TABLE t", 0), "DROP TABLE");
        assert_eq!(command_tag("ALTER TABLE t ADD b int", 0), "ALTER TABLE");
        assert_eq!(command_tag("SET search_path TO x", 0), "SET");
        assert_eq!(command_tag("EXPLAIN SELECT 1", 0), "SELECT 0");
    }

    #[test]
    fn txn_actions() {
        assert_eq!(txn_action_of("BEGIN"), Some(TxnAction::Begin));
        assert_eq!(txn_action_of("start transaction"), Some(TxnAction::Begin));
        assert_eq!(txn_action_of("COMMIT"), Some(TxnAction::End));
        assert_eq!(txn_action_of("rollback"), Some(TxnAction::End));
        assert_eq!(txn_action_of("SELECT 1"), None);
    }

    #[test]
    fn transaction_state_machine() {
        let mut state = QueryState::default();
        assert_eq!(state.txn.status_byte(), TXN_IDLE);
        state.observe_success(txn_action_of("BEGIN"));
        assert_eq!(state.txn.status_byte(), TXN_IN_BLOCK);
        state.observe_error();
        assert_eq!(state.txn.status_byte(), TXN_FAILED);
        state.observe_success(txn_action_of("ROLLBACK"));
        assert_eq!(state.txn.status_byte(), TXN_IDLE);
        // Errors outside a block do not poison the session.
        state.observe_error();
        assert_eq!(state.txn.status_byte(), TXN_IDLE);
    }

    #[test]
    fn placeholder_counting_skips_quotes() {
        assert_eq!(count_placeholders("SELECT $1, $2"), 2);
        assert_eq!(count_placeholders("SELECT '$9', $3"), 3);
        assert_eq!(count_placeholders("SELECT 1"), 0);
    }

    #[test]
    fn parameter_binding() {
        let sql = bind_parameters(
            "SELECT * FROM t WHERE a = $1 AND b = $2",
            &[Some(b"it's".to_vec()), None],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = 'it''s' AND b = NULL");

        // Placeholders inside quotes stay literal; unbound ones survive.
        let sql = bind_parameters("SELECT '$1', $2", &[Some(b"x".to_vec())]);
        assert_eq!(sql, "SELECT '$1', $2");
    }
}
