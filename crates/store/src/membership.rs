//! Cluster membership table.
//!
//! The membership set for a deployment lives in a single database partition:
//! one clustered row per silo, keyed by (address, port, generation), plus a
//! shared table-version counter. Every status mutation is one conditional
//! statement that writes the member columns AND bumps the version, guarded
//! by `IF version = expected` — optimistic concurrency over the whole
//! membership set, not per row. Losing writers get `Ok(false)` and must
//! re-read and retry; this layer never retries internally.

use crate::error::{StoreError, StoreResult};
use crate::session::{BoundStatement, Row, Session, Value};
use crate::statements::{StatementCache, StatementSet, keys};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Suspect-list timestamp wire format: `2024-01-30 13:45:30.123 GMT`.
const SUSPECT_DATE_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3] GMT");

/// A silo's unique address: endpoint plus start generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SiloAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub generation: i32,
}

impl SiloAddress {
    pub fn new(ip: IpAddr, port: u16, generation: i32) -> Self {
        Self {
            ip,
            port,
            generation,
        }
    }

    /// Parse the `ip:port@generation` form used on the wire.
    pub fn parse(s: &str) -> StoreResult<Self> {
        let malformed = || StoreError::MalformedRow(format!("invalid silo address {s:?}"));

        let (endpoint, generation) = s.rsplit_once('@').ok_or_else(malformed)?;
        // Split on the last colon: IPv6 addresses contain colons of their own.
        let (ip, port) = endpoint.rsplit_once(':').ok_or_else(malformed)?;
        Ok(Self {
            ip: ip.parse().map_err(|_| malformed())?,
            port: port.parse().map_err(|_| malformed())?,
            generation: generation.parse().map_err(|_| malformed())?,
        })
    }
}

impl std::fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.ip, self.port, self.generation)
    }
}

/// Silo lifecycle status, stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiloStatus {
    Created = 1,
    Joining = 2,
    Active = 3,
    ShuttingDown = 4,
    Stopping = 5,
    Dead = 6,
}

impl SiloStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> StoreResult<Self> {
        match code {
            1 => Ok(SiloStatus::Created),
            2 => Ok(SiloStatus::Joining),
            3 => Ok(SiloStatus::Active),
            4 => Ok(SiloStatus::ShuttingDown),
            5 => Ok(SiloStatus::Stopping),
            6 => Ok(SiloStatus::Dead),
            other => Err(StoreError::MalformedRow(format!(
                "unknown silo status code {other}"
            ))),
        }
    }
}

/// One member's view-relevant state.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipEntry {
    pub address: SiloAddress,
    pub silo_name: String,
    pub host_name: String,
    pub status: SiloStatus,
    pub proxy_port: u16,
    pub start_time: OffsetDateTime,
    pub i_am_alive_time: OffsetDateTime,
    /// Silos currently suspecting this one, with suspicion timestamps.
    pub suspect_times: Vec<(SiloAddress, OffsetDateTime)>,
}

/// The shared membership-set version counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableVersion {
    pub version: i32,
    pub etag: String,
}

impl TableVersion {
    pub fn new(version: i32) -> Self {
        Self {
            version,
            etag: version.to_string(),
        }
    }
}

/// A consistent-at-read snapshot of the membership set.
#[derive(Debug, Clone)]
pub struct MembershipSnapshot {
    /// Member entries with their per-row etags (unused by this table
    /// protocol, always empty strings).
    pub entries: Vec<(MembershipEntry, String)>,
    pub version: TableVersion,
}

/// A client gateway advertised by an active silo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub address: SocketAddr,
    pub generation: i32,
}

/// Serialize suspect times as `address,date|address,date|…`.
fn format_suspect_times(
    suspects: &[(SiloAddress, OffsetDateTime)],
) -> StoreResult<Option<String>> {
    if suspects.is_empty() {
        return Ok(None);
    }
    let parts: StoreResult<Vec<String>> = suspects
        .iter()
        .map(|(address, when)| {
            let date = when
                .to_offset(time::UtcOffset::UTC)
                .format(SUSPECT_DATE_FORMAT)
                .map_err(|e| {
                    StoreError::Serialization(format!("suspect timestamp format: {e}"))
                })?;
            Ok(format!("{address},{date}"))
        })
        .collect();
    Ok(Some(parts?.join("|")))
}

fn parse_suspect_times(raw: &str) -> StoreResult<Vec<(SiloAddress, OffsetDateTime)>> {
    raw.split('|')
        .map(|item| {
            let (address, date) = item.split_once(',').ok_or_else(|| {
                StoreError::MalformedRow(format!("invalid suspect entry {item:?}"))
            })?;
            let when = PrimitiveDateTime::parse(date, SUSPECT_DATE_FORMAT)
                .map_err(|e| {
                    StoreError::MalformedRow(format!("invalid suspect timestamp {date:?}: {e}"))
                })?
                .assume_utc();
            Ok((SiloAddress::parse(address)?, when))
        })
        .collect()
}

/// Decode a stored port column, which is int-typed but must fit a `u16`.
fn decode_port(row: &Row, name: &str) -> StoreResult<u16> {
    let value = row.try_i32(name)?;
    u16::try_from(value)
        .map_err(|_| StoreError::MalformedRow(format!("column {name} is not a port: {value}")))
}

/// Decode one membership row; `None` for tombstoned rows (null start time).
fn decode_member_row(row: &Row) -> StoreResult<Option<MembershipEntry>> {
    let Some(start_time) = row.opt_timestamp("start_time")? else {
        return Ok(None);
    };

    let suspect_times = match row.opt_str("suspect_times")? {
        Some(raw) if !raw.trim().is_empty() => parse_suspect_times(raw)?,
        _ => Vec::new(),
    };

    let ip: IpAddr = row
        .try_str("address")?
        .parse()
        .map_err(|e| StoreError::MalformedRow(format!("invalid member address: {e}")))?;

    Ok(Some(MembershipEntry {
        address: SiloAddress::new(ip, decode_port(row, "port")?, row.try_i32("generation")?),
        silo_name: row.try_str("silo_name")?.to_string(),
        host_name: row.try_str("host_name")?.to_string(),
        status: SiloStatus::from_code(row.try_i32("status")?)?,
        proxy_port: decode_port(row, "proxy_port")?,
        start_time,
        i_am_alive_time: row.try_timestamp("i_am_alive_time")?,
        suspect_times,
    }))
}

/// The membership store for one deployment.
pub struct MembershipStore {
    session: Arc<dyn Session>,
    statements: StatementCache,
}

impl MembershipStore {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            statements: StatementCache::new(),
        }
    }

    /// Share a per-connection statement cache with other stores on the same
    /// session, so the catalog is discovered and prepared once per
    /// connection rather than once per store.
    pub fn with_statement_cache(mut self, statements: StatementCache) -> Self {
        self.statements = statements;
        self
    }

    async fn statements(&self) -> StoreResult<&StatementSet> {
        self.statements.get_or_load(self.session.as_ref()).await
    }

    /// Prepare statements and optionally seed the version row.
    ///
    /// Seeding is an idempotent conditional insert: if the row already
    /// exists the insert silently no-ops.
    pub async fn initialize(&self, try_init_version: bool) -> StoreResult<()> {
        let statements = self.statements().await?;
        if try_init_version {
            let statement =
                BoundStatement::new(statements.get(keys::INSERT_MEMBERSHIP_VERSION)?);
            // Applied=false just means another silo won the seed race.
            let _ = self.session.execute(&statement).await?.applied()?;
        }
        Ok(())
    }

    fn bind_address(statement: BoundStatement, address: &SiloAddress) -> BoundStatement {
        statement
            .set("address", Value::Text(address.ip.to_string()))
            .set("port", Value::Int(i32::from(address.port)))
            .set("generation", Value::Int(address.generation))
    }

    /// Conditionally insert a new member row, bumping the table version from
    /// `expected_version` to `expected_version + 1` in the same statement.
    ///
    /// Returns whether the condition held. On `false` the caller must
    /// re-read and retry with the fresh version.
    pub async fn insert_row(
        &self,
        entry: &MembershipEntry,
        expected_version: i32,
    ) -> StoreResult<bool> {
        let statements = self.statements().await?;
        let statement =
            Self::bind_address(BoundStatement::new(statements.get(keys::INSERT_MEMBERSHIP)?), &entry.address)
                .set("silo_name", Value::Text(entry.silo_name.clone()))
                .set("host_name", Value::Text(entry.host_name.clone()))
                .set("status", Value::Int(entry.status.code()))
                .set("proxy_port", Value::Int(i32::from(entry.proxy_port)))
                .set("start_time", Value::Timestamp(entry.start_time))
                .set("i_am_alive_time", Value::Timestamp(entry.i_am_alive_time))
                .set("new_version", Value::Int(expected_version + 1))
                .set("expected_version", Value::Int(expected_version));
        self.session.execute(&statement).await?.applied()
    }

    /// Conditionally update an existing member row; same version contract as
    /// [`insert_row`](Self::insert_row).
    ///
    /// The `etag` parameter exists for API symmetry with other membership
    /// backends: the real guard is the table version.
    pub async fn update_row(
        &self,
        entry: &MembershipEntry,
        _etag: &str,
        expected_version: i32,
    ) -> StoreResult<bool> {
        let statements = self.statements().await?;
        let statement =
            Self::bind_address(BoundStatement::new(statements.get(keys::UPDATE_MEMBERSHIP)?), &entry.address)
                .set("status", Value::Int(entry.status.code()))
                .set(
                    "suspect_times",
                    Value::opt_text(format_suspect_times(&entry.suspect_times)?),
                )
                .set("i_am_alive_time", Value::Timestamp(entry.i_am_alive_time))
                .set("new_version", Value::Int(expected_version + 1))
                .set("expected_version", Value::Int(expected_version));
        self.session.execute(&statement).await?.applied()
    }

    async fn read_version(&self) -> StoreResult<TableVersion> {
        let statements = self.statements().await?;
        let rows = self
            .session
            .execute(&BoundStatement::new(
                statements.get(keys::MEMBERSHIP_READ_VERSION)?,
            ))
            .await?;
        let row = rows.first().ok_or_else(|| {
            StoreError::MalformedRow("membership version row missing".to_string())
        })?;
        Ok(TableVersion::new(row.try_i32("version")?))
    }

    /// Translate a membership projection into a snapshot: tombstoned rows
    /// filtered, version taken from the first row's shared column, with a
    /// fallback to the version row so a valid version is returned even when
    /// the projection is empty.
    async fn snapshot(&self, rows: crate::session::RowSet) -> StoreResult<MembershipSnapshot> {
        let Some(first) = rows.first() else {
            return Ok(MembershipSnapshot {
                entries: Vec::new(),
                version: self.read_version().await?,
            });
        };

        let version = TableVersion::new(first.try_i32("version")?);
        let mut entries = Vec::new();
        for row in &rows.rows {
            if let Some(entry) = decode_member_row(row)? {
                entries.push((entry, String::new()));
            }
        }
        Ok(MembershipSnapshot { entries, version })
    }

    /// Read the full membership set plus version.
    pub async fn read_all(&self) -> StoreResult<MembershipSnapshot> {
        let statements = self.statements().await?;
        let rows = self
            .session
            .execute(&BoundStatement::new(statements.get(keys::MEMBERSHIP_READ_ALL)?))
            .await?;
        self.snapshot(rows).await
    }

    /// Read one member row (if present) plus the current version.
    pub async fn read_row(&self, address: &SiloAddress) -> StoreResult<MembershipSnapshot> {
        let statements = self.statements().await?;
        let statement = Self::bind_address(
            BoundStatement::new(statements.get(keys::MEMBERSHIP_READ_ROW)?),
            address,
        );
        let rows = self.session.execute(&statement).await?;
        self.snapshot(rows).await
    }

    /// Unconditional heartbeat write. Liveness pings are not version-guarded;
    /// they carry no view-change information.
    pub async fn update_i_am_alive(&self, entry: &MembershipEntry) -> StoreResult<()> {
        let statements = self.statements().await?;
        let statement = Self::bind_address(
            BoundStatement::new(statements.get(keys::UPDATE_I_AM_ALIVE_TIME)?),
            &entry.address,
        )
        .set("i_am_alive_time", Value::Timestamp(entry.i_am_alive_time));
        self.session.execute(&statement).await?;
        Ok(())
    }

    /// Proxy endpoints of currently active silos.
    pub async fn read_gateways(&self) -> StoreResult<Vec<GatewayEndpoint>> {
        let statements = self.statements().await?;
        let statement = BoundStatement::new(statements.get(keys::GATEWAYS_QUERY)?)
            .set("status", Value::Int(SiloStatus::Active.code()));
        let rows = self.session.execute(&statement).await?;

        let mut gateways = Vec::with_capacity(rows.rows.len());
        for row in &rows.rows {
            let ip: IpAddr = row.try_str("address")?.parse().map_err(|e| {
                StoreError::MalformedRow(format!("invalid gateway address: {e}"))
            })?;
            gateways.push(GatewayEndpoint {
                address: SocketAddr::new(ip, decode_port(row, "proxy_port")?),
                generation: row.try_i32("generation")?,
            });
        }
        Ok(gateways)
    }

    /// Best-effort sweep of dead entries not heard from since `before`.
    ///
    /// The deletes are unconditional and follow an uncoordinated read of the
    /// member set, so the sweep can race with a concurrent reactivation of
    /// the same generation. Run it as maintenance, off the write path.
    pub async fn cleanup_defunct(&self, before: OffsetDateTime) -> StoreResult<usize> {
        let statements = self.statements().await?;
        let snapshot = self.read_all().await?;

        let mut removed = 0;
        for (entry, _) in &snapshot.entries {
            let last_seen = entry.i_am_alive_time.max(entry.start_time);
            if entry.status == SiloStatus::Dead && last_seen < before {
                let statement = Self::bind_address(
                    BoundStatement::new(statements.get(keys::DELETE_MEMBERSHIP_ENTRY)?),
                    &entry.address,
                );
                self.session.execute(&statement).await?;
                tracing::debug!(address = %entry.address, "purged defunct membership entry");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drop the whole membership partition, version row included.
    pub async fn delete_table_entries(&self) -> StoreResult<()> {
        let statements = self.statements().await?;
        self.session
            .execute(&BoundStatement::new(
                statements.get(keys::DELETE_MEMBERSHIP_TABLE_ENTRIES)?,
            ))
            .await?;
        Ok(())
    }
}
