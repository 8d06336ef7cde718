//! The database session boundary.
//!
//! The actual driver is an external collaborator; this module defines the
//! narrow surface the stores consume: prepare a statement at a consistency
//! level, execute a bound statement, and read back rows. Conditional writes
//! report their outcome through the store-native `"[applied]"` boolean
//! column on the first result row.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Column name carrying the conditional-write outcome.
pub const APPLIED_COLUMN: &str = "[applied]";

/// A database value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    TinyInt(i8),
    Int(i32),
    BigInt(i64),
    Text(String),
    Blob(Bytes),
    Uuid(Uuid),
    Timestamp(OffsetDateTime),
    TinyIntList(Vec<i8>),
}

impl Value {
    /// Text value, or `Null` for `None`.
    pub fn opt_text(value: Option<String>) -> Value {
        value.map_or(Value::Null, Value::Text)
    }

    /// Uuid value, or `Null` for `None`.
    pub fn opt_uuid(value: Option<Uuid>) -> Value {
        value.map_or(Value::Null, Value::Uuid)
    }
}

/// Consistency level a prepared statement executes at. Parsed from the
/// statement catalog's `consistency_level` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl Consistency {
    /// Parse a level name, case-insensitively. An unknown name is fatal:
    /// it means the deployed catalog and this build disagree.
    pub fn parse(name: &str) -> StoreResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "any" => Ok(Consistency::Any),
            "one" => Ok(Consistency::One),
            "two" => Ok(Consistency::Two),
            "three" => Ok(Consistency::Three),
            "quorum" => Ok(Consistency::Quorum),
            "all" => Ok(Consistency::All),
            "localquorum" => Ok(Consistency::LocalQuorum),
            "eachquorum" => Ok(Consistency::EachQuorum),
            "serial" => Ok(Consistency::Serial),
            "localserial" => Ok(Consistency::LocalSerial),
            "localone" => Ok(Consistency::LocalOne),
            other => Err(StoreError::Config(format!(
                "unknown consistency level {other} in query catalog"
            ))),
        }
    }
}

/// A statement prepared against a specific session.
///
/// The id is only meaningful to the session that produced it; the text and
/// consistency are retained for diagnostics.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub id: u64,
    pub text: String,
    pub consistency: Consistency,
}

/// A prepared statement plus named parameter bindings.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub statement: PreparedStatement,
    values: Vec<(String, Value)>,
}

impl BoundStatement {
    pub fn new(statement: &PreparedStatement) -> Self {
        Self {
            statement: statement.clone(),
            values: Vec::new(),
        }
    }

    /// Bind a named parameter.
    pub fn set(mut self, name: &str, value: Value) -> Self {
        self.values.push((name.to_string(), value));
        self
    }

    /// Look up a bound parameter by name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// A single result row with named columns.
///
/// Accessors come in two contracts: `opt_*` treats an absent or null column
/// as `None` and only fails on a type mismatch; `try_*` additionally fails
/// when the column is null. Both failures are [`StoreError::MalformedRow`],
/// so decode problems are tagged distinctly from driver errors.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column insert.
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.columns.insert(name.to_string(), value);
        self
    }

    fn non_null(&self, name: &str) -> Option<&Value> {
        match self.columns.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn mismatch<T>(&self, name: &str, expected: &str) -> StoreResult<T> {
        Err(StoreError::MalformedRow(format!(
            "column {name} is not a {expected}: {:?}",
            self.columns.get(name)
        )))
    }

    fn required<T>(name: &str) -> StoreResult<T> {
        Err(StoreError::MalformedRow(format!("column {name} is null")))
    }

    pub fn opt_str(&self, name: &str) -> StoreResult<Option<&str>> {
        match self.non_null(name) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(_) => self.mismatch(name, "text"),
        }
    }

    pub fn opt_bool(&self, name: &str) -> StoreResult<Option<bool>> {
        match self.non_null(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => self.mismatch(name, "boolean"),
        }
    }

    pub fn opt_i8(&self, name: &str) -> StoreResult<Option<i8>> {
        match self.non_null(name) {
            None => Ok(None),
            Some(Value::TinyInt(v)) => Ok(Some(*v)),
            Some(_) => self.mismatch(name, "tinyint"),
        }
    }

    pub fn opt_i32(&self, name: &str) -> StoreResult<Option<i32>> {
        match self.non_null(name) {
            None => Ok(None),
            Some(Value::Int(v)) => Ok(Some(*v)),
            Some(_) => self.mismatch(name, "int"),
        }
    }

    pub fn opt_uuid(&self, name: &str) -> StoreResult<Option<Uuid>> {
        match self.non_null(name) {
            None => Ok(None),
            Some(Value::Uuid(v)) => Ok(Some(*v)),
            Some(_) => self.mismatch(name, "uuid"),
        }
    }

    pub fn opt_timestamp(&self, name: &str) -> StoreResult<Option<OffsetDateTime>> {
        match self.non_null(name) {
            None => Ok(None),
            Some(Value::Timestamp(v)) => Ok(Some(*v)),
            Some(_) => self.mismatch(name, "timestamp"),
        }
    }

    pub fn opt_blob(&self, name: &str) -> StoreResult<Option<&Bytes>> {
        match self.non_null(name) {
            None => Ok(None),
            Some(Value::Blob(v)) => Ok(Some(v)),
            Some(_) => self.mismatch(name, "blob"),
        }
    }

    pub fn try_str(&self, name: &str) -> StoreResult<&str> {
        self.opt_str(name)?.map_or_else(|| Self::required(name), Ok)
    }

    pub fn try_bool(&self, name: &str) -> StoreResult<bool> {
        self.opt_bool(name)?.map_or_else(|| Self::required(name), Ok)
    }

    pub fn try_i8(&self, name: &str) -> StoreResult<i8> {
        self.opt_i8(name)?.map_or_else(|| Self::required(name), Ok)
    }

    pub fn try_i32(&self, name: &str) -> StoreResult<i32> {
        self.opt_i32(name)?.map_or_else(|| Self::required(name), Ok)
    }

    pub fn try_uuid(&self, name: &str) -> StoreResult<Uuid> {
        self.opt_uuid(name)?.map_or_else(|| Self::required(name), Ok)
    }

    pub fn try_timestamp(&self, name: &str) -> StoreResult<OffsetDateTime> {
        self.opt_timestamp(name)?
            .map_or_else(|| Self::required(name), Ok)
    }

    pub fn try_blob(&self, name: &str) -> StoreResult<&Bytes> {
        self.opt_blob(name)?.map_or_else(|| Self::required(name), Ok)
    }
}

/// An ordered set of result rows.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// The conditional-write outcome of a lightweight transaction.
    ///
    /// A conditional statement always yields at least one row carrying the
    /// `[applied]` boolean; anything else is a malformed result.
    pub fn applied(&self) -> StoreResult<bool> {
        self.first()
            .ok_or_else(|| {
                StoreError::MalformedRow(
                    "conditional write returned no result row".to_string(),
                )
            })?
            .try_bool(APPLIED_COLUMN)
    }
}

/// A database session shared by all in-flight operations.
///
/// Implementations must be safe for concurrent use; the stores never
/// serialize their calls beyond first-time statement preparation.
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute an unprepared statement (catalog discovery only).
    async fn execute_simple(&self, cql: &str) -> StoreResult<RowSet>;

    /// Prepare a parameterized statement at the given consistency level.
    async fn prepare(&self, text: &str, consistency: Consistency) -> StoreResult<PreparedStatement>;

    /// Execute a bound statement.
    async fn execute(&self, statement: &BoundStatement) -> StoreResult<RowSet>;
}
