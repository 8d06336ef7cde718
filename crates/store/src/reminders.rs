//! Scheduled-callback (reminder) table.
//!
//! One row per (grain, reminder name), spread over a fixed number of hash
//! partitions so the runtime can claim ownership of a ring arc with a
//! bounded scatter-gather scan. The partition and hash stored on a row are
//! always recomputed from the grain key here, never trusted from caller
//! input; otherwise a range scan could miss a row filed under the wrong
//! partition.

use crate::error::{StoreError, StoreResult};
use crate::session::{BoundStatement, Row, RowSet, Session, Value};
use crate::statements::{StatementCache, StatementSet, keys};
use bytes::Bytes;
use granary_core::{
    GrainRef, REMINDER_PARTITION_BITS, Sha256Hasher, UniformHasher, partition_of,
    partitions_for_range, rebias_to_signed,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// A single reminder registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderEntry {
    pub grain: GrainRef,
    pub name: String,
    pub start_at: OffsetDateTime,
    pub period: Duration,
    /// Version token of the stored row; `None` for an entry that has not
    /// been persisted yet.
    pub etag: Option<Uuid>,
}

/// Derived placement of a grain on the reminder ring.
struct GrainKeys {
    partition: i8,
    hash: i32,
    key_blob: Vec<u8>,
}

/// The reminder store.
pub struct ReminderStore {
    session: Arc<dyn Session>,
    hasher: Arc<dyn UniformHasher>,
    statements: StatementCache,
}

impl ReminderStore {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self::with_hasher(session, Arc::new(Sha256Hasher))
    }

    /// Use a custom uniform hash. The hash decides ring placement, so every
    /// host of a deployment must use the same one.
    pub fn with_hasher(session: Arc<dyn Session>, hasher: Arc<dyn UniformHasher>) -> Self {
        Self {
            session,
            hasher,
            statements: StatementCache::new(),
        }
    }

    /// Share a per-connection statement cache with other stores on the same
    /// session.
    pub fn with_statement_cache(mut self, statements: StatementCache) -> Self {
        self.statements = statements;
        self
    }

    /// Prepare the statement catalog.
    pub async fn initialize(&self) -> StoreResult<()> {
        self.statements().await?;
        Ok(())
    }

    async fn statements(&self) -> StoreResult<&StatementSet> {
        self.statements.get_or_load(self.session.as_ref()).await
    }

    fn grain_keys(&self, grain: &GrainRef) -> GrainKeys {
        let hash = rebias_to_signed(self.hasher.uniform_hash(grain));
        GrainKeys {
            partition: partition_of(hash, REMINDER_PARTITION_BITS),
            hash,
            key_blob: grain.encode(),
        }
    }

    fn bind_grain(&self, statement: BoundStatement, grain: &GrainRef) -> BoundStatement {
        let keys = self.grain_keys(grain);
        statement
            .set("partition", Value::TinyInt(keys.partition))
            .set("grain_hash", Value::Int(keys.hash))
            .set("grain_id", Value::Blob(Bytes::from(keys.key_blob)))
    }

    /// Read one reminder row, if present.
    pub async fn read_row(
        &self,
        grain: &GrainRef,
        name: &str,
    ) -> StoreResult<Option<ReminderEntry>> {
        let statements = self.statements().await?;
        let statement = self
            .bind_grain(BoundStatement::new(statements.get(keys::READ_REMINDER_ROW)?), grain)
            .set("reminder_name", Value::Text(name.to_string()));
        let rows = self.session.execute(&statement).await?;
        Ok(decode_rows(&rows, Some(grain), Some(name)).into_iter().next())
    }

    /// All reminders registered for one grain.
    pub async fn read_rows(&self, grain: &GrainRef) -> StoreResult<Vec<ReminderEntry>> {
        let statements = self.statements().await?;
        let statement =
            self.bind_grain(BoundStatement::new(statements.get(keys::READ_REMINDER_ROWS)?), grain);
        let rows = self.session.execute(&statement).await?;
        Ok(decode_rows(&rows, Some(grain), None))
    }

    /// All reminders whose grain hash falls in the ring arc from `start` to
    /// `end`, endpoints included.
    ///
    /// `start >= end` means the arc wraps past the top of the hash space: it
    /// is scanned as `[start, MAX]` plus `[MIN, end]`, each scoped to the
    /// partitions it can touch, and the results concatenated.
    pub async fn read_range(&self, start: u32, end: u32) -> StoreResult<Vec<ReminderEntry>> {
        let statements = self.statements().await?;

        if start < end {
            let statement =
                BoundStatement::new(statements.get(keys::READ_REMINDERS_INSIDE_RANGE)?)
                    .set(
                        "partitions",
                        Value::TinyIntList(partitions_for_range(start, end)),
                    )
                    .set("grain_hash_start", Value::Int(rebias_to_signed(start)))
                    .set("grain_hash_end", Value::Int(rebias_to_signed(end)));
            let rows = self.session.execute(&statement).await?;
            Ok(decode_rows(&rows, None, None))
        } else {
            let high = BoundStatement::new(statements.get(keys::READ_REMINDERS_OUTSIDE_RANGE_1)?)
                .set(
                    "partitions",
                    Value::TinyIntList(partitions_for_range(start, u32::MAX)),
                )
                .set("grain_hash_start", Value::Int(rebias_to_signed(start)));
            let low = BoundStatement::new(statements.get(keys::READ_REMINDERS_OUTSIDE_RANGE_2)?)
                .set(
                    "partitions",
                    Value::TinyIntList(partitions_for_range(0, end)),
                )
                .set("grain_hash_end", Value::Int(rebias_to_signed(end)));

            let mut entries = decode_rows(&self.session.execute(&high).await?, None, None);
            entries.extend(decode_rows(&self.session.execute(&low).await?, None, None));
            Ok(entries)
        }
    }

    /// Write a reminder row, minting and returning a fresh version token.
    ///
    /// Unconditional: a concurrent upsert of the same reminder simply loses
    /// its token. The returned token is what a later [`remove`](Self::remove)
    /// must present.
    pub async fn upsert(&self, entry: &ReminderEntry) -> StoreResult<Uuid> {
        // The period column is a 32-bit millisecond count; anything outside
        // that range would be silently mangled by a truncating store.
        let period_ms = i32::try_from(entry.period.whole_milliseconds()).map_err(|_| {
            StoreError::Serialization(format!(
                "reminder period {} does not fit the stored millisecond range",
                entry.period
            ))
        })?;

        let statements = self.statements().await?;
        let etag = Uuid::new_v4();
        let statement = self
            .bind_grain(
                BoundStatement::new(statements.get(keys::UPSERT_REMINDER_ROW)?),
                &entry.grain,
            )
            .set("reminder_name", Value::Text(entry.name.clone()))
            .set("start_time", Value::Timestamp(entry.start_at))
            .set("period", Value::Int(period_ms))
            .set("etag", Value::Uuid(etag));
        self.session.execute(&statement).await?;
        Ok(etag)
    }

    /// Conditionally delete a reminder row; applied only if the stored
    /// version token matches.
    pub async fn remove(&self, grain: &GrainRef, name: &str, etag: Uuid) -> StoreResult<bool> {
        let statements = self.statements().await?;
        let statement = self
            .bind_grain(
                BoundStatement::new(statements.get(keys::DELETE_REMINDER_ROW)?),
                grain,
            )
            .set("reminder_name", Value::Text(name.to_string()))
            .set("etag", Value::Uuid(etag));
        self.session.execute(&statement).await?.applied()
    }

    /// Drop every reminder row. Test support only.
    pub async fn clear_table(&self) -> StoreResult<()> {
        let statements = self.statements().await?;
        self.session
            .execute(&BoundStatement::new(
                statements.get(keys::DELETE_REMINDER_ROWS)?,
            ))
            .await?;
        Ok(())
    }
}

/// Decode a reminder projection, dropping rows that fail to decode.
///
/// Scans must stay best-effort under partial data corruption: one
/// unparseable grain key should not take down reminder processing for a
/// whole hash range.
fn decode_rows(
    rows: &RowSet,
    for_grain: Option<&GrainRef>,
    name: Option<&str>,
) -> Vec<ReminderEntry> {
    let mut entries = Vec::with_capacity(rows.rows.len());
    for row in &rows.rows {
        match decode_row(row, for_grain, name) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(error = %e, "skipping malformed reminder row"),
        }
    }
    entries
}

fn decode_row(
    row: &Row,
    for_grain: Option<&GrainRef>,
    name: Option<&str>,
) -> StoreResult<ReminderEntry> {
    let grain = match for_grain {
        Some(grain) => grain.clone(),
        None => GrainRef::decode(row.try_blob("grain_id")?)?,
    };
    Ok(ReminderEntry {
        grain,
        name: match name {
            Some(name) => name.to_string(),
            None => row.try_str("reminder_name")?.to_string(),
        },
        start_at: row.try_timestamp("start_time")?,
        period: Duration::milliseconds(i64::from(row.try_i32("period")?)),
        etag: Some(row.try_uuid("etag")?),
    })
}
