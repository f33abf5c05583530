//! Backend session over `tokio-postgres`.
//!
//! The gateway prepares each statement once to learn its column types, then
//! runs it through the simple-query protocol so every value arrives already
//! in text format. Statements the driver refuses to prepare (multi-statement
//! strings, some utility commands) still execute; their columns fall back to
//! plain text descriptors.

use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use super::{BackendConnector, BackendError, BackendSession, ColumnDesc, ColumnKind, RowSet, SqlOutcome};
use crate::config::TargetConfig;

#[derive(Clone, Debug, Default)]
pub struct PgConnector;

pub struct PgSession {
    client: Client,
    driver: JoinHandle<()>,
    version: Option<String>,
}

fn map_err(e: tokio_postgres::Error) -> BackendError {
    if e.is_closed() {
        BackendError::Gone(e.to_string())
    } else {
        BackendError::Sql(e.to_string())
    }
}

fn kind_of(ty: &Type) -> ColumnKind {
    if *ty == Type::BOOL {
        ColumnKind::Bool
    } else if *ty == Type::INT2 {
        ColumnKind::SmallInt
    } else if *ty == Type::INT4 {
        ColumnKind::Int
    } else if *ty == Type::INT8 {
        ColumnKind::BigInt
    } else if *ty == Type::FLOAT4 {
        ColumnKind::Float
    } else if *ty == Type::FLOAT8 {
        ColumnKind::Double
    } else if *ty == Type::NUMERIC {
        ColumnKind::Decimal
    } else if *ty == Type::BPCHAR {
        ColumnKind::Char
    } else if *ty == Type::VARCHAR {
        ColumnKind::Varchar
    } else if *ty == Type::DATE {
        ColumnKind::Date
    } else if *ty == Type::TIME {
        ColumnKind::Time
    } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ {
        ColumnKind::Timestamp
    } else if *ty == Type::BYTEA {
        ColumnKind::Bytes
    } else if *ty == Type::BIT || *ty == Type::VARBIT {
        ColumnKind::Bit
    } else if *ty == Type::TEXT || *ty == Type::NAME {
        ColumnKind::Text
    } else {
        ColumnKind::Other
    }
}

fn column_from_pg(col: &tokio_postgres::Column) -> ColumnDesc {
    ColumnDesc::text(col.name()).with_kind(kind_of(col.type_()))
}

impl BackendConnector for PgConnector {
    type Session = PgSession;

    async fn connect(&self, target: &TargetConfig) -> Result<PgSession, BackendError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&target.host)
            .port(target.port)
            .user(&target.username)
            .password(&target.password)
            .dbname(&target.database);

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "backend connection task ended");
            }
        });

        let version = match client.simple_query("SHOW server_version").await {
            Ok(msgs) => msgs.into_iter().find_map(|m| match m {
                SimpleQueryMessage::Row(row) => row.get(0).map(|v| v.to_string()),
                _ => None,
            }),
            Err(e) => {
                warn!(error = %e, "could not read backend server version");
                None
            }
        };

        Ok(PgSession {
            client,
            driver,
            version,
        })
    }
}

impl BackendSession for PgSession {
    async fn execute(&mut self, sql: &str) -> Result<SqlOutcome, BackendError> {
        // Best-effort metadata probe; text rows come from the simple query.
        let mut columns: Vec<ColumnDesc> = match self.client.prepare(sql).await {
            Ok(stmt) => stmt.columns().iter().map(column_from_pg).collect(),
            Err(_) => Vec::new(),
        };

        let messages = self.client.simple_query(sql).await.map_err(map_err)?;

        let mut rows: Vec<Vec<Option<String>>> = Vec::new();
        let mut update_count = 0u64;
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if columns.is_empty() {
                        columns = row
                            .columns()
                            .iter()
                            .map(|c| ColumnDesc::text(c.name()))
                            .collect();
                    }
                    let mut cells = Vec::with_capacity(row.len());
                    for i in 0..row.len() {
                        cells.push(row.get(i).map(str::to_string));
                    }
                    rows.push(cells);
                }
                SimpleQueryMessage::CommandComplete(n) => update_count = n,
                _ => {}
            }
        }

        if columns.is_empty() {
            Ok(SqlOutcome::Update(update_count))
        } else {
            Ok(SqlOutcome::Rows(RowSet { columns, rows }))
        }
    }

    async fn set_schema(&mut self, schema: &str) -> Result<(), BackendError> {
        let ident = schema.replace('"', "\"\"");
        self.client
            .simple_query(&format!("SET search_path TO \"{ident}\""))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    fn server_version(&self) -> Option<String> {
        self.version.clone()
    }

    async fn close(&mut self) {
        self.driver.abort();
    }
}
