//! The prepared-statement catalog.
//!
//! Every query the stores run is listed in a `queries` catalog table on the
//! cluster itself (columns `key`, `text`, `consistency_level`). At
//! initialization a store discovers the catalog, prepares every listed
//! statement at its declared consistency level, and afterwards only ever
//! looks statements up by name. There is no partial or retry mode: a catalog
//! that cannot be fully prepared would produce silently wrong reads later,
//! so any failure here is fatal.

use crate::error::{StoreError, StoreResult};
use crate::session::{Consistency, PreparedStatement, Session};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Catalog discovery query. The one piece of query text compiled into the
/// binary; everything else lives in the catalog.
pub const READ_QUERIES: &str = "SELECT key, text, consistency_level FROM queries;";

/// Statement names the stores bind. The catalog may carry more; it must not
/// carry fewer.
pub mod keys {
    pub const INSERT_MEMBERSHIP_VERSION: &str = "InsertMembershipVersionKey";
    pub const INSERT_MEMBERSHIP: &str = "InsertMembershipKey";
    pub const UPDATE_MEMBERSHIP: &str = "UpdateMembershipKey";
    pub const UPDATE_I_AM_ALIVE_TIME: &str = "UpdateIAmAliveTimeKey";
    pub const MEMBERSHIP_READ_ALL: &str = "MembershipReadAllKey";
    pub const MEMBERSHIP_READ_ROW: &str = "MembershipReadRowKey";
    pub const MEMBERSHIP_READ_VERSION: &str = "MembershipReadVersionKey";
    pub const DELETE_MEMBERSHIP_TABLE_ENTRIES: &str = "DeleteMembershipTableEntriesKey";
    pub const DELETE_MEMBERSHIP_ENTRY: &str = "DeleteMembershipEntryKey";
    pub const GATEWAYS_QUERY: &str = "GatewaysQueryKey";

    pub const UPSERT_REMINDER_ROW: &str = "UpsertReminderRowKey";
    pub const READ_REMINDER_ROW: &str = "ReadReminderRowKey";
    pub const READ_REMINDER_ROWS: &str = "ReadReminderRowsKey";
    pub const READ_REMINDERS_INSIDE_RANGE: &str = "ReadRemindersInsideRangeKey";
    pub const READ_REMINDERS_OUTSIDE_RANGE_1: &str = "ReadRemindersOutsideRangeKey1";
    pub const READ_REMINDERS_OUTSIDE_RANGE_2: &str = "ReadRemindersOutsideRangeKey2";
    pub const DELETE_REMINDER_ROW: &str = "DeleteReminderRowKey";
    pub const DELETE_REMINDER_ROWS: &str = "DeleteReminderRowsKey";

    pub const READ_FROM_STORAGE: &str = "ReadFromStorageKey";
    pub const WRITE_TO_STORAGE: &str = "WriteToStorageKey";
    pub const CLEAR_STORAGE: &str = "ClearStorageKey";
}

/// The full set of statement names required at load time.
pub const REQUIRED_STATEMENTS: [&str; 21] = [
    keys::INSERT_MEMBERSHIP_VERSION,
    keys::INSERT_MEMBERSHIP,
    keys::UPDATE_MEMBERSHIP,
    keys::UPDATE_I_AM_ALIVE_TIME,
    keys::MEMBERSHIP_READ_ALL,
    keys::MEMBERSHIP_READ_ROW,
    keys::MEMBERSHIP_READ_VERSION,
    keys::DELETE_MEMBERSHIP_TABLE_ENTRIES,
    keys::DELETE_MEMBERSHIP_ENTRY,
    keys::GATEWAYS_QUERY,
    keys::UPSERT_REMINDER_ROW,
    keys::READ_REMINDER_ROW,
    keys::READ_REMINDER_ROWS,
    keys::READ_REMINDERS_INSIDE_RANGE,
    keys::READ_REMINDERS_OUTSIDE_RANGE_1,
    keys::READ_REMINDERS_OUTSIDE_RANGE_2,
    keys::DELETE_REMINDER_ROW,
    keys::DELETE_REMINDER_ROWS,
    keys::READ_FROM_STORAGE,
    keys::WRITE_TO_STORAGE,
    keys::CLEAR_STORAGE,
];

/// The named, prepared, consistency-tagged statements of one connection.
pub struct StatementSet {
    statements: HashMap<String, PreparedStatement>,
}

impl StatementSet {
    /// Discover the catalog and prepare every listed statement.
    pub async fn load(session: &dyn Session) -> StoreResult<Self> {
        let catalog = session.execute_simple(READ_QUERIES).await?;

        let mut statements = HashMap::with_capacity(catalog.rows.len());
        for row in &catalog.rows {
            let key = row.try_str("key")?.to_string();
            let text = row.try_str("text")?;
            let consistency = Consistency::parse(row.try_str("consistency_level")?)?;
            let prepared = session.prepare(text, consistency).await?;
            statements.insert(key, prepared);
        }

        for name in REQUIRED_STATEMENTS {
            if !statements.contains_key(name) {
                return Err(StoreError::MissingStatement(name.to_string()));
            }
        }

        tracing::debug!(count = statements.len(), "prepared statement catalog");
        Ok(Self { statements })
    }

    /// Look up a prepared statement by catalog key.
    pub fn get(&self, name: &str) -> StoreResult<&PreparedStatement> {
        self.statements
            .get(name)
            .ok_or_else(|| StoreError::MissingStatement(name.to_string()))
    }
}

/// Per-connection handle to the prepared statement set.
///
/// Prepared statements belong to the session that prepared them, so the
/// cache is scoped to a connection, not to a store: a caller opening one
/// session builds one cache and hands clones of it to every store on that
/// session. All of them then share a single catalog discovery and
/// preparation, with concurrent first uses collapsing into one in-flight
/// load. A store constructed without an explicit cache gets a private one.
#[derive(Clone, Default)]
pub struct StatementCache {
    cell: Arc<OnceCell<StatementSet>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The prepared set for this connection, loading it on first use.
    ///
    /// A failed load is not sticky: the next call retries, so a transiently
    /// unreachable catalog does not permanently poison the connection.
    pub async fn get_or_load(&self, session: &dyn Session) -> StoreResult<&StatementSet> {
        self.cell
            .get_or_try_init(|| StatementSet::load(session))
            .await
    }
}
