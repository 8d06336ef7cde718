//! Pluggable grain-state payload serialization.
//!
//! Providers are tried in registration order; the first one claiming a
//! state type wins. A built-in serde_json provider with the reserved code 0
//! is always the fallback. The resolved (code, type string, provider)
//! triple is cached per state type for the process lifetime: a grain's
//! declared state type does not change at runtime, and a racing duplicate
//! resolution is idempotent.

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Code of the built-in serde_json fallback provider.
pub const DEFAULT_SERIALIZER_CODE: i8 = 0;

/// Reserved delimiter used to join composite storage fields; a provider's
/// type string must never contain it.
pub const TYPE_STRING_DELIMITER: char = '!';

/// A payload serialization strategy.
///
/// `serialize`/`deserialize` work through `Any` because each provider only
/// claims the concrete state types it registered for; the generic-over-`T`
/// default path never reaches a provider.
pub trait SerializationProvider: Send + Sync {
    /// Whether this provider handles the given state type.
    fn is_supported_type(&self, ty: TypeId) -> bool;

    /// Storage type string for a state type, given the runtime's base type
    /// tag. Must not contain [`TYPE_STRING_DELIMITER`].
    fn type_string(&self, base_type: &str) -> String {
        base_type.to_string()
    }

    fn serialize(&self, state: &dyn Any) -> StoreResult<Bytes>;

    fn deserialize(&self, ty: TypeId, data: &[u8]) -> StoreResult<Box<dyn Any + Send>>;
}

/// A resolved serialization decision for one state type.
#[derive(Clone)]
pub struct ResolvedSerializer {
    pub code: i8,
    pub type_string: String,
    /// `None` means the built-in serde_json path.
    pub provider: Option<Arc<dyn SerializationProvider>>,
}

/// Ordered provider registry with a per-type resolution cache.
#[derive(Default)]
pub struct SerializerRegistry {
    providers: Vec<(i8, Arc<dyn SerializationProvider>)>,
    cache: RwLock<HashMap<TypeId, ResolvedSerializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under a code. Codes identify the provider in
    /// stored rows, so they must be unique and non-reserved.
    pub fn register(
        &mut self,
        code: i8,
        provider: Arc<dyn SerializationProvider>,
    ) -> StoreResult<()> {
        if code == DEFAULT_SERIALIZER_CODE {
            return Err(StoreError::Config(format!(
                "serializer code {DEFAULT_SERIALIZER_CODE} is reserved for the default provider"
            )));
        }
        if self.providers.iter().any(|(c, _)| *c == code) {
            return Err(StoreError::Config(format!(
                "serializer code {code} registered twice"
            )));
        }
        self.providers.push((code, provider));
        Ok(())
    }

    /// Resolve the serializer for a state type, first match in registration
    /// order, default last. Cached by type identity; one grain type per
    /// state type is assumed, as the cache key is the type alone.
    pub fn resolve(&self, base_type: &str, ty: TypeId) -> StoreResult<ResolvedSerializer> {
        if let Some(resolved) = self.cache.read().expect("serializer cache poisoned").get(&ty) {
            return Ok(resolved.clone());
        }

        let resolved = self
            .providers
            .iter()
            .find(|(_, provider)| provider.is_supported_type(ty))
            .map(|(code, provider)| ResolvedSerializer {
                code: *code,
                type_string: provider.type_string(base_type),
                provider: Some(provider.clone()),
            })
            .unwrap_or_else(|| ResolvedSerializer {
                code: DEFAULT_SERIALIZER_CODE,
                type_string: base_type.to_string(),
                provider: None,
            });

        if resolved.type_string.contains(TYPE_STRING_DELIMITER) {
            return Err(StoreError::Config(format!(
                "type string {:?} contains the reserved character {TYPE_STRING_DELIMITER:?}",
                resolved.type_string
            )));
        }

        self.cache
            .write()
            .expect("serializer cache poisoned")
            .insert(ty, resolved.clone());
        Ok(resolved)
    }

    /// Look up the provider a stored row's serializer code points at.
    /// `Ok(None)` is the default provider.
    pub fn by_code(&self, code: i8) -> StoreResult<Option<Arc<dyn SerializationProvider>>> {
        if code == DEFAULT_SERIALIZER_CODE {
            return Ok(None);
        }
        self.providers
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, provider)| Some(provider.clone()))
            .ok_or_else(|| {
                StoreError::Config(format!("serializer with code {code} has not been configured"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        ty: TypeId,
        type_string: String,
    }

    impl SerializationProvider for FixedProvider {
        fn is_supported_type(&self, ty: TypeId) -> bool {
            ty == self.ty
        }

        fn type_string(&self, _base_type: &str) -> String {
            self.type_string.clone()
        }

        fn serialize(&self, _state: &dyn Any) -> StoreResult<Bytes> {
            Ok(Bytes::new())
        }

        fn deserialize(&self, _ty: TypeId, _data: &[u8]) -> StoreResult<Box<dyn Any + Send>> {
            Ok(Box::new(()))
        }
    }

    #[test]
    fn reserved_and_duplicate_codes_are_rejected() {
        let provider = Arc::new(FixedProvider {
            ty: TypeId::of::<u8>(),
            type_string: "x".to_string(),
        });
        let mut registry = SerializerRegistry::new();
        assert!(registry.register(0, provider.clone()).is_err());
        registry.register(1, provider.clone()).unwrap();
        assert!(registry.register(1, provider).is_err());
    }

    #[test]
    fn resolution_prefers_registration_order_then_default() {
        let mut registry = SerializerRegistry::new();
        registry
            .register(
                2,
                Arc::new(FixedProvider {
                    ty: TypeId::of::<u8>(),
                    type_string: "first".to_string(),
                }),
            )
            .unwrap();
        registry
            .register(
                3,
                Arc::new(FixedProvider {
                    ty: TypeId::of::<u8>(),
                    type_string: "second".to_string(),
                }),
            )
            .unwrap();

        let resolved = registry.resolve("base", TypeId::of::<u8>()).unwrap();
        assert_eq!(resolved.code, 2);
        assert_eq!(resolved.type_string, "first");

        let fallback = registry.resolve("base", TypeId::of::<u16>()).unwrap();
        assert_eq!(fallback.code, DEFAULT_SERIALIZER_CODE);
        assert_eq!(fallback.type_string, "base");
        assert!(fallback.provider.is_none());
    }

    #[test]
    fn delimiter_in_type_string_is_fatal() {
        let mut registry = SerializerRegistry::new();
        registry
            .register(
                2,
                Arc::new(FixedProvider {
                    ty: TypeId::of::<u8>(),
                    type_string: "bad!string".to_string(),
                }),
            )
            .unwrap();
        assert!(registry.resolve("base", TypeId::of::<u8>()).is_err());

        // The delimiter check also covers the runtime-supplied base tag.
        let registry = SerializerRegistry::new();
        assert!(registry.resolve("also!bad", TypeId::of::<u8>()).is_err());
    }

    #[test]
    fn unknown_code_lookup_fails() {
        let registry = SerializerRegistry::new();
        assert!(registry.by_code(0).unwrap().is_none());
        assert!(registry.by_code(9).is_err());
    }
}
