//! Backend collaborator contracts.
//!
//! The gateway consumes a backend database through these traits and never
//! couples the protocol engines to a concrete driver; a fake implementation
//! is all the engines need for testing. The shipped implementation lives in
//! [`postgres`].

pub mod postgres;

use std::future::Future;

use thiserror::Error;

use crate::config::TargetConfig;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend connect failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Sql(String),
    #[error("backend session lost: {0}")]
    Gone(String),
}

impl BackendError {
    /// A lost session terminates the client session; a SQL failure does not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Connect(_) | BackendError::Gone(_))
    }
}

/// Coarse column classification used by the wire type maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    Timestamp,
    Char,
    Varchar,
    Text,
    Bytes,
    Other,
}

/// One column of a backend result set.
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: String,
    pub schema: String,
    pub table: String,
    pub kind: ColumnKind,
    pub display_size: u32,
    pub nullable: bool,
    pub signed: bool,
    pub auto_increment: bool,
    pub precision: u16,
    pub scale: u16,
}

impl ColumnDesc {
    /// A plain nullable text column; the default shape for synthesized and
    /// driver-untyped results.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: String::new(),
            table: String::new(),
            kind: ColumnKind::Text,
            display_size: 255,
            nullable: true,
            signed: true,
            auto_increment: false,
            precision: 0,
            scale: 0,
        }
    }

    pub fn with_kind(mut self, kind: ColumnKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A materialized result set: ordered column descriptors plus rows of
/// text-format cells (`None` is SQL NULL).
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RowSet {
    /// Single-column result set from a list of values, for synthesized
    /// catalog responses.
    pub fn single_column(name: &str, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            columns: vec![ColumnDesc::text(name)],
            rows: values.into_iter().map(|v| vec![Some(v)]).collect(),
        }
    }
}

/// What executing one statement produced.
#[derive(Debug, Clone)]
pub enum SqlOutcome {
    Rows(RowSet),
    Update(u64),
}

/// A live session on the backend database. One per client session; a session
/// never has more than one execution in flight.
pub trait BackendSession: Send + 'static {
    fn execute(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<SqlOutcome, BackendError>> + Send;

    /// Switch the session's current schema (MySQL `COM_INIT_DB`).
    fn set_schema(&mut self, schema: &str)
        -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Backend server version, when known; used for handshake strings.
    fn server_version(&self) -> Option<String>;

    /// Idempotent teardown.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens backend sessions for accepted clients.
pub trait BackendConnector: Clone + Send + Sync + 'static {
    type Session: BackendSession;

    fn connect(
        &self,
        target: &TargetConfig,
    ) -> impl Future<Output = Result<Self::Session, BackendError>> + Send;
}
