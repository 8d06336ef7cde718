//! Grain-state persistence with optimistic concurrency.
//!
//! One row per (type string, encoded grain key). The version token (etag)
//! stored on the row is the CAS guard for writes and clears: a caller
//! presents the token it last read, and a `None` token means "this state
//! has never been persisted, the row must not exist yet".

use crate::error::{StoreError, StoreResult};
use crate::serialization::{ResolvedSerializer, SerializerRegistry};
use crate::session::{BoundStatement, Session, Value};
use crate::statements::{StatementCache, StatementSet, keys};
use bytes::Bytes;
use granary_core::GrainRef;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::sync::Arc;
use uuid::Uuid;

/// A state value together with the version token it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedState<T> {
    pub state: T,
    /// `None` until the state is first persisted.
    pub etag: Option<Uuid>,
}

/// The grain-state store.
pub struct GrainStateStore {
    session: Arc<dyn Session>,
    serializers: Arc<SerializerRegistry>,
    statements: StatementCache,
}

impl GrainStateStore {
    /// A store with only the built-in serde_json provider.
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self::with_serializers(session, Arc::new(SerializerRegistry::new()))
    }

    pub fn with_serializers(
        session: Arc<dyn Session>,
        serializers: Arc<SerializerRegistry>,
    ) -> Self {
        Self {
            session,
            serializers,
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

    fn resolve<T: Any>(&self, grain_type: &str) -> StoreResult<ResolvedSerializer> {
        self.serializers.resolve(grain_type, TypeId::of::<T>())
    }

    /// Read a grain's state.
    ///
    /// An absent row is a fresh grain: default state, no token. A row that
    /// exists but is missing payload, token, or serializer code is an
    /// inconsistency and fails loudly — defaulting there would silently
    /// discard persisted state.
    pub async fn read<T>(&self, grain_type: &str, grain: &GrainRef) -> StoreResult<VersionedState<T>>
    where
        T: DeserializeOwned + Default + Any + Send,
    {
        let resolved = self.resolve::<T>(grain_type)?;
        let statements = self.statements().await?;
        let statement = BoundStatement::new(statements.get(keys::READ_FROM_STORAGE)?)
            .set("grain_type", Value::Text(resolved.type_string.clone()))
            .set("grain_id", Value::Blob(Bytes::from(grain.encode())));
        let rows = self.session.execute(&statement).await?;

        let Some(row) = rows.first() else {
            return Ok(VersionedState {
                state: T::default(),
                etag: None,
            });
        };

        let (Some(data), Some(etag), Some(code)) = (
            row.opt_blob("data")?,
            row.opt_uuid("etag")?,
            row.opt_i8("serializer_code")?,
        ) else {
            return Err(StoreError::InconsistentState(format!(
                "stored row for grain {grain} of type {grain_type} is missing \
                 data, etag, or serializer code"
            )));
        };

        let state = match self.serializers.by_code(code)? {
            None => serde_json::from_slice(data)
                .map_err(|e| StoreError::Serialization(format!("decoding {grain}: {e}")))?,
            Some(provider) => *provider
                .deserialize(TypeId::of::<T>(), data)?
                .downcast::<T>()
                .map_err(|_| {
                    StoreError::Serialization(format!(
                        "serializer {code} produced an unexpected type for grain {grain}"
                    ))
                })?,
        };

        Ok(VersionedState {
            state,
            etag: Some(etag),
        })
    }

    /// Conditionally write a grain's state, returning the new version token.
    ///
    /// The write applies only if the stored token equals `etag` (`None`
    /// meaning the row must not exist); otherwise the stored payload is left
    /// untouched and a [`StoreError::VersionConflict`] is returned.
    pub async fn write<T>(
        &self,
        grain_type: &str,
        grain: &GrainRef,
        state: &T,
        etag: Option<Uuid>,
    ) -> StoreResult<Uuid>
    where
        T: Serialize + Any + Send + Sync,
    {
        let resolved = self.resolve::<T>(grain_type)?;
        let data = match &resolved.provider {
            None => Bytes::from(
                serde_json::to_vec(state)
                    .map_err(|e| StoreError::Serialization(format!("encoding {grain}: {e}")))?,
            ),
            Some(provider) => provider.serialize(state as &dyn Any)?,
        };

        let statements = self.statements().await?;
        let new_etag = Uuid::new_v4();
        let statement = BoundStatement::new(statements.get(keys::WRITE_TO_STORAGE)?)
            .set("grain_type", Value::Text(resolved.type_string.clone()))
            .set("grain_id", Value::Blob(Bytes::from(grain.encode())))
            .set("data", Value::Blob(data))
            .set("serializer_code", Value::TinyInt(resolved.code))
            .set("etag", Value::Uuid(new_etag))
            .set("expected_etag", Value::opt_uuid(etag));

        if self.session.execute(&statement).await?.applied()? {
            Ok(new_etag)
        } else {
            Err(StoreError::VersionConflict {
                grain_type: grain_type.to_string(),
                grain: grain.to_string(),
            })
        }
    }

    /// Delete a grain's state.
    ///
    /// Without a token there is nothing persisted to delete and the call is
    /// a no-op success. The delete itself is token-guarded, but a lost race
    /// is not surfaced: the state the caller wanted gone was replaced by a
    /// newer writer who now owns it.
    pub async fn clear<T>(
        &self,
        grain_type: &str,
        grain: &GrainRef,
        etag: Option<Uuid>,
    ) -> StoreResult<()>
    where
        T: Any,
    {
        let Some(etag) = etag else {
            return Ok(());
        };

        let resolved = self.resolve::<T>(grain_type)?;
        let statements = self.statements().await?;
        let statement = BoundStatement::new(statements.get(keys::CLEAR_STORAGE)?)
            .set("grain_type", Value::Text(resolved.type_string.clone()))
            .set("grain_id", Value::Blob(Bytes::from(grain.encode())))
            .set("expected_etag", Value::Uuid(etag));
        self.session.execute(&statement).await?;
        Ok(())
    }
}
