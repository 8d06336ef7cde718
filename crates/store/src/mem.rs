//! In-memory session emulator.
//!
//! An in-process stand-in for a real cluster session, implementing the
//! statement catalog and the single-row compare-and-swap semantics the
//! stores depend on. It is what the test suite and local development run
//! against; production deployments implement [`Session`] over a real
//! driver instead.
//!
//! The emulator seeds its own `queries` catalog with the canonical
//! statement texts and maps prepared statements back to their catalog keys,
//! so execution dispatches on the statement's identity rather than parsing
//! query text. Membership is modeled the way the real schema lays it out:
//! one partition holding a shared (static) version cell plus one clustered
//! row per member, which is what lets a single conditional statement guard
//! member writes with the table version.

use crate::error::{StoreError, StoreResult};
use crate::session::{
    APPLIED_COLUMN, BoundStatement, Consistency, PreparedStatement, Row, RowSet, Session, Value,
};
use crate::statements::keys;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

/// Canonical statement catalog: (key, text, consistency level).
const CATALOG: &[(&str, &str, &str)] = &[
    (
        keys::INSERT_MEMBERSHIP_VERSION,
        "INSERT INTO membership (partition_key, version) VALUES (0, 0) IF NOT EXISTS;",
        "Quorum",
    ),
    (
        keys::INSERT_MEMBERSHIP,
        "UPDATE membership SET version = :new_version, silo_name = :silo_name, \
         host_name = :host_name, status = :status, proxy_port = :proxy_port, \
         start_time = :start_time, i_am_alive_time = :i_am_alive_time \
         WHERE partition_key = 0 AND address = :address AND port = :port \
         AND generation = :generation IF version = :expected_version;",
        "Quorum",
    ),
    (
        keys::UPDATE_MEMBERSHIP,
        "UPDATE membership SET version = :new_version, status = :status, \
         suspect_times = :suspect_times, i_am_alive_time = :i_am_alive_time \
         WHERE partition_key = 0 AND address = :address AND port = :port \
         AND generation = :generation IF version = :expected_version;",
        "Quorum",
    ),
    (
        keys::UPDATE_I_AM_ALIVE_TIME,
        "UPDATE membership SET i_am_alive_time = :i_am_alive_time \
         WHERE partition_key = 0 AND address = :address AND port = :port \
         AND generation = :generation;",
        "One",
    ),
    (
        keys::MEMBERSHIP_READ_ALL,
        "SELECT version, address, port, generation, silo_name, host_name, status, \
         proxy_port, start_time, i_am_alive_time, suspect_times \
         FROM membership WHERE partition_key = 0;",
        "Quorum",
    ),
    (
        keys::MEMBERSHIP_READ_ROW,
        "SELECT version, address, port, generation, silo_name, host_name, status, \
         proxy_port, start_time, i_am_alive_time, suspect_times \
         FROM membership WHERE partition_key = 0 AND address = :address \
         AND port = :port AND generation = :generation;",
        "Quorum",
    ),
    (
        keys::MEMBERSHIP_READ_VERSION,
        "SELECT version FROM membership WHERE partition_key = 0;",
        "Quorum",
    ),
    (
        keys::DELETE_MEMBERSHIP_TABLE_ENTRIES,
        "DELETE FROM membership WHERE partition_key = 0;",
        "Quorum",
    ),
    (
        keys::DELETE_MEMBERSHIP_ENTRY,
        "DELETE FROM membership WHERE partition_key = 0 AND address = :address \
         AND port = :port AND generation = :generation;",
        "Quorum",
    ),
    (
        keys::GATEWAYS_QUERY,
        "SELECT address, proxy_port, generation FROM membership \
         WHERE partition_key = 0 AND status = :status AND proxy_port > 0 \
         ALLOW FILTERING;",
        "One",
    ),
    (
        keys::UPSERT_REMINDER_ROW,
        "INSERT INTO reminders (partition, grain_hash, grain_id, reminder_name, \
         start_time, period, etag) VALUES (:partition, :grain_hash, :grain_id, \
         :reminder_name, :start_time, :period, :etag);",
        "Quorum",
    ),
    (
        keys::READ_REMINDER_ROW,
        "SELECT grain_id, reminder_name, start_time, period, etag FROM reminders \
         WHERE partition = :partition AND grain_hash = :grain_hash \
         AND grain_id = :grain_id AND reminder_name = :reminder_name;",
        "Quorum",
    ),
    (
        keys::READ_REMINDER_ROWS,
        "SELECT grain_id, reminder_name, start_time, period, etag FROM reminders \
         WHERE partition = :partition AND grain_hash = :grain_hash \
         AND grain_id = :grain_id;",
        "Quorum",
    ),
    (
        keys::READ_REMINDERS_INSIDE_RANGE,
        "SELECT grain_id, reminder_name, start_time, period, etag FROM reminders \
         WHERE partition IN :partitions AND grain_hash >= :grain_hash_start \
         AND grain_hash <= :grain_hash_end;",
        "Quorum",
    ),
    (
        keys::READ_REMINDERS_OUTSIDE_RANGE_1,
        "SELECT grain_id, reminder_name, start_time, period, etag FROM reminders \
         WHERE partition IN :partitions AND grain_hash >= :grain_hash_start;",
        "Quorum",
    ),
    (
        keys::READ_REMINDERS_OUTSIDE_RANGE_2,
        "SELECT grain_id, reminder_name, start_time, period, etag FROM reminders \
         WHERE partition IN :partitions AND grain_hash <= :grain_hash_end;",
        "Quorum",
    ),
    (
        keys::DELETE_REMINDER_ROW,
        "DELETE FROM reminders WHERE partition = :partition \
         AND grain_hash = :grain_hash AND grain_id = :grain_id \
         AND reminder_name = :reminder_name IF etag = :etag;",
        "Quorum",
    ),
    (keys::DELETE_REMINDER_ROWS, "TRUNCATE reminders;", "All"),
    (
        keys::READ_FROM_STORAGE,
        "SELECT data, serializer_code, etag FROM storage \
         WHERE grain_type = :grain_type AND grain_id = :grain_id;",
        "Quorum",
    ),
    (
        keys::WRITE_TO_STORAGE,
        "UPDATE storage SET data = :data, serializer_code = :serializer_code, \
         etag = :etag WHERE grain_type = :grain_type AND grain_id = :grain_id \
         IF etag = :expected_etag;",
        "Quorum",
    ),
    (
        keys::CLEAR_STORAGE,
        "DELETE FROM storage WHERE grain_type = :grain_type \
         AND grain_id = :grain_id IF etag = :expected_etag;",
        "Quorum",
    ),
];

#[derive(Debug, Clone)]
struct CatalogEntry {
    key: String,
    text: String,
    consistency_level: String,
}

/// One clustered member row. Fields are individually optional because a
/// plain column update (the heartbeat) upserts in this data model and can
/// create a row that has never been properly inserted — exactly the
/// null-start-time tombstones the stores must filter.
#[derive(Debug, Clone, Default)]
struct MemberRow {
    silo_name: Option<String>,
    host_name: Option<String>,
    status: Option<i32>,
    proxy_port: Option<i32>,
    start_time: Option<OffsetDateTime>,
    i_am_alive_time: Option<OffsetDateTime>,
    suspect_times: Option<String>,
}

type MemberKey = (String, i32, i32);

#[derive(Debug, Default)]
struct MembershipPartition {
    /// Static column shared by every row of the partition; `None` until the
    /// version row is seeded.
    version: Option<i32>,
    members: BTreeMap<MemberKey, MemberRow>,
}

type ReminderKey = (i8, i32, Vec<u8>, String);

#[derive(Debug, Clone)]
struct ReminderRow {
    start_time: OffsetDateTime,
    period: i32,
    etag: Uuid,
}

type StorageKey = (String, Vec<u8>);

/// Raw storage cells; `None`s model rows a buggy writer left incomplete.
#[derive(Debug, Clone, Default)]
struct StorageRow {
    data: Option<Bytes>,
    serializer_code: Option<i8>,
    etag: Option<Uuid>,
}

#[derive(Default)]
struct MemState {
    catalog: Vec<CatalogEntry>,
    prepared: HashMap<u64, String>,
    next_statement_id: u64,
    membership: MembershipPartition,
    reminders: BTreeMap<ReminderKey, ReminderRow>,
    storage: HashMap<StorageKey, StorageRow>,
}

/// The in-memory session. Cheap to create, safe to share behind an `Arc`.
#[derive(Default)]
pub struct MemorySession {
    state: Mutex<MemState>,
}

impl MemorySession {
    pub fn new() -> Self {
        let session = Self::default();
        {
            let mut state = session.state.lock().expect("session state poisoned");
            state.catalog = CATALOG
                .iter()
                .map(|(key, text, consistency_level)| CatalogEntry {
                    key: (*key).to_string(),
                    text: (*text).to_string(),
                    consistency_level: (*consistency_level).to_string(),
                })
                .collect();
        }
        session
    }

    /// Test hook: drop a statement from the catalog to exercise the fatal
    /// missing-statement path.
    pub fn remove_catalog_statement(&self, key: &str) {
        let mut state = self.state.lock().expect("session state poisoned");
        state.catalog.retain(|entry| entry.key != key);
    }

    /// Test hook: plant a reminder row with an arbitrary (possibly
    /// undecodable) grain key blob.
    pub fn insert_raw_reminder_row(
        &self,
        partition: i8,
        grain_hash: i32,
        grain_id: Vec<u8>,
        name: &str,
        start_time: OffsetDateTime,
        period_ms: i32,
        etag: Uuid,
    ) {
        let mut state = self.state.lock().expect("session state poisoned");
        state.reminders.insert(
            (partition, grain_hash, grain_id, name.to_string()),
            ReminderRow {
                start_time,
                period: period_ms,
                etag,
            },
        );
    }

    /// Test hook: plant a storage row with arbitrary (possibly missing)
    /// cells.
    pub fn insert_raw_storage_row(
        &self,
        grain_type: &str,
        grain_id: Vec<u8>,
        data: Option<Bytes>,
        serializer_code: Option<i8>,
        etag: Option<Uuid>,
    ) {
        let mut state = self.state.lock().expect("session state poisoned");
        state.storage.insert(
            (grain_type.to_string(), grain_id),
            StorageRow {
                data,
                serializer_code,
                etag,
            },
        );
    }

    /// Test hook: the payload currently stored for a grain, if any.
    pub fn storage_payload(&self, grain_type: &str, grain_id: &[u8]) -> Option<Bytes> {
        let state = self.state.lock().expect("session state poisoned");
        state
            .storage
            .get(&(grain_type.to_string(), grain_id.to_vec()))
            .and_then(|row| row.data.clone())
    }
}

fn applied_result(applied: bool) -> RowSet {
    RowSet::new(vec![Row::new().with(APPLIED_COLUMN, Value::Bool(applied))])
}

fn missing(name: &str) -> StoreError {
    StoreError::Driver(format!("missing or mistyped parameter {name}"))
}

fn p_text(statement: &BoundStatement, name: &str) -> StoreResult<String> {
    match statement.value(name) {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(missing(name)),
    }
}

fn p_opt_text(statement: &BoundStatement, name: &str) -> StoreResult<Option<String>> {
    match statement.value(name) {
        Some(Value::Text(s)) => Ok(Some(s.clone())),
        Some(Value::Null) => Ok(None),
        _ => Err(missing(name)),
    }
}

fn p_i32(statement: &BoundStatement, name: &str) -> StoreResult<i32> {
    match statement.value(name) {
        Some(Value::Int(v)) => Ok(*v),
        _ => Err(missing(name)),
    }
}

fn p_i8(statement: &BoundStatement, name: &str) -> StoreResult<i8> {
    match statement.value(name) {
        Some(Value::TinyInt(v)) => Ok(*v),
        _ => Err(missing(name)),
    }
}

fn p_i8_list(statement: &BoundStatement, name: &str) -> StoreResult<Vec<i8>> {
    match statement.value(name) {
        Some(Value::TinyIntList(v)) => Ok(v.clone()),
        _ => Err(missing(name)),
    }
}

fn p_blob(statement: &BoundStatement, name: &str) -> StoreResult<Bytes> {
    match statement.value(name) {
        Some(Value::Blob(v)) => Ok(v.clone()),
        _ => Err(missing(name)),
    }
}

fn p_uuid(statement: &BoundStatement, name: &str) -> StoreResult<Uuid> {
    match statement.value(name) {
        Some(Value::Uuid(v)) => Ok(*v),
        _ => Err(missing(name)),
    }
}

fn p_opt_uuid(statement: &BoundStatement, name: &str) -> StoreResult<Option<Uuid>> {
    match statement.value(name) {
        Some(Value::Uuid(v)) => Ok(Some(*v)),
        Some(Value::Null) => Ok(None),
        _ => Err(missing(name)),
    }
}

fn p_timestamp(statement: &BoundStatement, name: &str) -> StoreResult<OffsetDateTime> {
    match statement.value(name) {
        Some(Value::Timestamp(v)) => Ok(*v),
        _ => Err(missing(name)),
    }
}

fn member_key(statement: &BoundStatement) -> StoreResult<MemberKey> {
    Ok((
        p_text(statement, "address")?,
        p_i32(statement, "port")?,
        p_i32(statement, "generation")?,
    ))
}

fn opt_ts(value: Option<OffsetDateTime>) -> Value {
    value.map_or(Value::Null, Value::Timestamp)
}

fn opt_i32_value(value: Option<i32>) -> Value {
    value.map_or(Value::Null, Value::Int)
}

fn member_row(version: i32, key: &MemberKey, row: &MemberRow) -> Row {
    Row::new()
        .with("version", Value::Int(version))
        .with("address", Value::Text(key.0.clone()))
        .with("port", Value::Int(key.1))
        .with("generation", Value::Int(key.2))
        .with("silo_name", Value::opt_text(row.silo_name.clone()))
        .with("host_name", Value::opt_text(row.host_name.clone()))
        .with("status", opt_i32_value(row.status))
        .with("proxy_port", opt_i32_value(row.proxy_port))
        .with("start_time", opt_ts(row.start_time))
        .with("i_am_alive_time", opt_ts(row.i_am_alive_time))
        .with("suspect_times", Value::opt_text(row.suspect_times.clone()))
}

fn reminder_row(key: &ReminderKey, row: &ReminderRow) -> Row {
    Row::new()
        .with("grain_id", Value::Blob(Bytes::from(key.2.clone())))
        .with("reminder_name", Value::Text(key.3.clone()))
        .with("start_time", Value::Timestamp(row.start_time))
        .with("period", Value::Int(row.period))
        .with("etag", Value::Uuid(row.etag))
}

impl MemState {
    fn execute(&mut self, key: &str, statement: &BoundStatement) -> StoreResult<RowSet> {
        match key {
            keys::INSERT_MEMBERSHIP_VERSION => {
                if self.membership.version.is_none() {
                    self.membership.version = Some(0);
                    Ok(applied_result(true))
                } else {
                    Ok(applied_result(false))
                }
            }
            keys::INSERT_MEMBERSHIP => {
                let expected = p_i32(statement, "expected_version")?;
                if self.membership.version != Some(expected) {
                    return Ok(applied_result(false));
                }
                self.membership.version = Some(p_i32(statement, "new_version")?);
                let row = self.membership.members.entry(member_key(statement)?).or_default();
                row.silo_name = Some(p_text(statement, "silo_name")?);
                row.host_name = Some(p_text(statement, "host_name")?);
                row.status = Some(p_i32(statement, "status")?);
                row.proxy_port = Some(p_i32(statement, "proxy_port")?);
                row.start_time = Some(p_timestamp(statement, "start_time")?);
                row.i_am_alive_time = Some(p_timestamp(statement, "i_am_alive_time")?);
                Ok(applied_result(true))
            }
            keys::UPDATE_MEMBERSHIP => {
                let expected = p_i32(statement, "expected_version")?;
                if self.membership.version != Some(expected) {
                    return Ok(applied_result(false));
                }
                self.membership.version = Some(p_i32(statement, "new_version")?);
                let row = self.membership.members.entry(member_key(statement)?).or_default();
                row.status = Some(p_i32(statement, "status")?);
                row.suspect_times = p_opt_text(statement, "suspect_times")?;
                row.i_am_alive_time = Some(p_timestamp(statement, "i_am_alive_time")?);
                Ok(applied_result(true))
            }
            keys::UPDATE_I_AM_ALIVE_TIME => {
                // Plain column update: upserts, possibly creating a
                // null-start-time row.
                let row = self.membership.members.entry(member_key(statement)?).or_default();
                row.i_am_alive_time = Some(p_timestamp(statement, "i_am_alive_time")?);
                Ok(RowSet::default())
            }
            keys::MEMBERSHIP_READ_ALL => {
                let Some(version) = self.membership.version else {
                    return Ok(RowSet::default());
                };
                if self.membership.members.is_empty() {
                    // The static row alone: version with null member columns.
                    return Ok(RowSet::new(vec![
                        Row::new().with("version", Value::Int(version)),
                    ]));
                }
                Ok(RowSet::new(
                    self.membership
                        .members
                        .iter()
                        .map(|(key, row)| member_row(version, key, row))
                        .collect(),
                ))
            }
            keys::MEMBERSHIP_READ_ROW => {
                let Some(version) = self.membership.version else {
                    return Ok(RowSet::default());
                };
                let key = member_key(statement)?;
                Ok(RowSet::new(
                    self.membership
                        .members
                        .get(&key)
                        .map(|row| member_row(version, &key, row))
                        .into_iter()
                        .collect(),
                ))
            }
            keys::MEMBERSHIP_READ_VERSION => Ok(RowSet::new(
                self.membership
                    .version
                    .map(|version| Row::new().with("version", Value::Int(version)))
                    .into_iter()
                    .collect(),
            )),
            keys::DELETE_MEMBERSHIP_TABLE_ENTRIES => {
                self.membership = MembershipPartition::default();
                Ok(RowSet::default())
            }
            keys::DELETE_MEMBERSHIP_ENTRY => {
                let key = member_key(statement)?;
                self.membership.members.remove(&key);
                Ok(RowSet::default())
            }
            keys::GATEWAYS_QUERY => {
                let status = p_i32(statement, "status")?;
                Ok(RowSet::new(
                    self.membership
                        .members
                        .iter()
                        // Null status and null proxy_port both fail these
                        // predicates, so partial heartbeat-only rows are out.
                        .filter(|(_, row)| {
                            row.status == Some(status) && row.proxy_port.unwrap_or(0) > 0
                        })
                        .map(|(key, row)| {
                            Row::new()
                                .with("address", Value::Text(key.0.clone()))
                                .with("proxy_port", opt_i32_value(row.proxy_port))
                                .with("generation", Value::Int(key.2))
                        })
                        .collect(),
                ))
            }
            keys::UPSERT_REMINDER_ROW => {
                let key = (
                    p_i8(statement, "partition")?,
                    p_i32(statement, "grain_hash")?,
                    p_blob(statement, "grain_id")?.to_vec(),
                    p_text(statement, "reminder_name")?,
                );
                self.reminders.insert(
                    key,
                    ReminderRow {
                        start_time: p_timestamp(statement, "start_time")?,
                        period: p_i32(statement, "period")?,
                        etag: p_uuid(statement, "etag")?,
                    },
                );
                Ok(RowSet::default())
            }
            keys::READ_REMINDER_ROW => {
                let key = (
                    p_i8(statement, "partition")?,
                    p_i32(statement, "grain_hash")?,
                    p_blob(statement, "grain_id")?.to_vec(),
                    p_text(statement, "reminder_name")?,
                );
                Ok(RowSet::new(
                    self.reminders
                        .get(&key)
                        .map(|row| reminder_row(&key, row))
                        .into_iter()
                        .collect(),
                ))
            }
            keys::READ_REMINDER_ROWS => {
                let partition = p_i8(statement, "partition")?;
                let hash = p_i32(statement, "grain_hash")?;
                let grain_id = p_blob(statement, "grain_id")?.to_vec();
                Ok(RowSet::new(
                    self.reminders
                        .iter()
                        .filter(|(key, _)| {
                            key.0 == partition && key.1 == hash && key.2 == grain_id
                        })
                        .map(|(key, row)| reminder_row(key, row))
                        .collect(),
                ))
            }
            keys::READ_REMINDERS_INSIDE_RANGE => {
                let partitions = p_i8_list(statement, "partitions")?;
                let start = p_i32(statement, "grain_hash_start")?;
                let end = p_i32(statement, "grain_hash_end")?;
                Ok(self.scan_reminders(&partitions, |hash| hash >= start && hash <= end))
            }
            keys::READ_REMINDERS_OUTSIDE_RANGE_1 => {
                let partitions = p_i8_list(statement, "partitions")?;
                let start = p_i32(statement, "grain_hash_start")?;
                Ok(self.scan_reminders(&partitions, |hash| hash >= start))
            }
            keys::READ_REMINDERS_OUTSIDE_RANGE_2 => {
                let partitions = p_i8_list(statement, "partitions")?;
                let end = p_i32(statement, "grain_hash_end")?;
                Ok(self.scan_reminders(&partitions, |hash| hash <= end))
            }
            keys::DELETE_REMINDER_ROW => {
                let key = (
                    p_i8(statement, "partition")?,
                    p_i32(statement, "grain_hash")?,
                    p_blob(statement, "grain_id")?.to_vec(),
                    p_text(statement, "reminder_name")?,
                );
                let etag = p_uuid(statement, "etag")?;
                match self.reminders.get(&key) {
                    Some(row) if row.etag == etag => {
                        self.reminders.remove(&key);
                        Ok(applied_result(true))
                    }
                    _ => Ok(applied_result(false)),
                }
            }
            keys::DELETE_REMINDER_ROWS => {
                self.reminders.clear();
                Ok(RowSet::default())
            }
            keys::READ_FROM_STORAGE => {
                let key = (
                    p_text(statement, "grain_type")?,
                    p_blob(statement, "grain_id")?.to_vec(),
                );
                Ok(RowSet::new(
                    self.storage
                        .get(&key)
                        .map(|row| {
                            Row::new()
                                .with(
                                    "data",
                                    row.data.clone().map_or(Value::Null, Value::Blob),
                                )
                                .with(
                                    "serializer_code",
                                    row.serializer_code.map_or(Value::Null, Value::TinyInt),
                                )
                                .with("etag", Value::opt_uuid(row.etag))
                        })
                        .into_iter()
                        .collect(),
                ))
            }
            keys::WRITE_TO_STORAGE => {
                let key = (
                    p_text(statement, "grain_type")?,
                    p_blob(statement, "grain_id")?.to_vec(),
                );
                let expected = p_opt_uuid(statement, "expected_etag")?;
                let current = self.storage.get(&key).and_then(|row| row.etag);
                if current != expected {
                    return Ok(applied_result(false));
                }
                self.storage.insert(
                    key,
                    StorageRow {
                        data: Some(p_blob(statement, "data")?),
                        serializer_code: Some(p_i8(statement, "serializer_code")?),
                        etag: Some(p_uuid(statement, "etag")?),
                    },
                );
                Ok(applied_result(true))
            }
            keys::CLEAR_STORAGE => {
                let key = (
                    p_text(statement, "grain_type")?,
                    p_blob(statement, "grain_id")?.to_vec(),
                );
                let expected = p_uuid(statement, "expected_etag")?;
                match self.storage.get(&key) {
                    Some(row) if row.etag == Some(expected) => {
                        self.storage.remove(&key);
                        Ok(applied_result(true))
                    }
                    _ => Ok(applied_result(false)),
                }
            }
            other => Err(StoreError::Driver(format!(
                "statement {other} not implemented by the memory session"
            ))),
        }
    }

    fn scan_reminders(&self, partitions: &[i8], accept: impl Fn(i32) -> bool) -> RowSet {
        RowSet::new(
            self.reminders
                .iter()
                .filter(|(key, _)| partitions.contains(&key.0) && accept(key.1))
                .map(|(key, row)| reminder_row(key, row))
                .collect(),
        )
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute_simple(&self, cql: &str) -> StoreResult<RowSet> {
        if cql != crate::statements::READ_QUERIES {
            return Err(StoreError::Driver(format!(
                "memory session only supports catalog discovery, got {cql:?}"
            )));
        }
        let state = self.state.lock().expect("session state poisoned");
        Ok(RowSet::new(
            state
                .catalog
                .iter()
                .map(|entry| {
                    Row::new()
                        .with("key", Value::Text(entry.key.clone()))
                        .with("text", Value::Text(entry.text.clone()))
                        .with(
                            "consistency_level",
                            Value::Text(entry.consistency_level.clone()),
                        )
                })
                .collect(),
        ))
    }

    async fn prepare(&self, text: &str, consistency: Consistency) -> StoreResult<PreparedStatement> {
        let mut state = self.state.lock().expect("session state poisoned");
        let key = state
            .catalog
            .iter()
            .find(|entry| entry.text == text)
            .map(|entry| entry.key.clone())
            .ok_or_else(|| {
                StoreError::Driver(format!("cannot prepare unknown statement text {text:?}"))
            })?;
        state.next_statement_id += 1;
        let id = state.next_statement_id;
        state.prepared.insert(id, key);
        Ok(PreparedStatement {
            id,
            text: text.to_string(),
            consistency,
        })
    }

    async fn execute(&self, statement: &BoundStatement) -> StoreResult<RowSet> {
        let mut state = self.state.lock().expect("session state poisoned");
        let key = state
            .prepared
            .get(&statement.statement.id)
            .cloned()
            .ok_or_else(|| {
                StoreError::Driver("statement was not prepared on this session".to_string())
            })?;
        state.execute(&key, statement)
    }
}
