//! Custom record registry.
//!
//! Callers may persist their own record types alongside the consensus
//! stream. Each type is named by an integer tag at or above
//! [`CUSTOM_TAG_MIN`](crate::record::CUSTOM_TAG_MIN) and bound to a handler
//! that decodes its payload during replay. The registry is an explicit value
//! injected at WAL construction; mappings are append-only for the life of
//! the registry.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::WalResult;
use crate::record::CUSTOM_TAG_MIN;

/// A caller-defined value that can be persisted as a custom record.
pub trait CustomRecord: Any + Send {
    /// The registered tag this value belongs to.
    fn record_tag(&self) -> i64;

    /// Serializes the value to record data.
    fn marshal(&self) -> Bytes;

    /// Upcast for downcasting replayed values back to their concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Decodes replayed custom-record payloads for one registered tag.
pub trait CustomRecordHandler: Send + Sync {
    /// Deserializes record data into the handler's value type.
    ///
    /// # Errors
    /// Returns an error if the payload does not decode; replay surfaces it
    /// as a fatal corruption of the stream.
    fn unmarshal(&self, data: &[u8]) -> WalResult<Box<dyn CustomRecord>>;
}

/// An append-only mapping from record tags to their handlers.
#[derive(Default, Clone)]
pub struct RecordRegistry {
    handlers: BTreeMap<i64, Arc<dyn CustomRecordHandler>>,
}

impl RecordRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `tag` to `handler`.
    ///
    /// # Panics
    /// Panics if `tag` is below the custom range or already registered;
    /// mappings are append-only.
    pub fn register(&mut self, tag: i64, handler: Arc<dyn CustomRecordHandler>) {
        assert!(
            tag >= CUSTOM_TAG_MIN,
            "custom record tags start at {CUSTOM_TAG_MIN}"
        );
        let previous = self.handlers.insert(tag, handler);
        assert!(previous.is_none(), "record tag {tag} is already registered");
    }

    /// Looks up the handler for `tag`.
    #[must_use]
    pub fn handler(&self, tag: i64) -> Option<&Arc<dyn CustomRecordHandler>> {
        self.handlers.get(&tag)
    }

    /// Returns true if `tag` has a registered handler.
    #[must_use]
    pub fn is_registered(&self, tag: i64) -> bool {
        self.handlers.contains_key(&tag)
    }
}

impl std::fmt::Debug for RecordRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordRegistry")
            .field("tags", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WalError;

    struct Marker(u64);

    impl CustomRecord for Marker {
        fn record_tag(&self) -> i64 {
            7
        }

        fn marshal(&self) -> Bytes {
            Bytes::copy_from_slice(&self.0.to_le_bytes())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct MarkerHandler;

    impl CustomRecordHandler for MarkerHandler {
        fn unmarshal(&self, data: &[u8]) -> WalResult<Box<dyn CustomRecord>> {
            let bytes: [u8; 8] = data.try_into().map_err(|_| WalError::Corrupt {
                offset: 0,
                reason: "marker record is not 8 bytes",
            })?;
            Ok(Box::new(Marker(u64::from_le_bytes(bytes))))
        }
    }

    #[test]
    fn test_register_and_roundtrip() {
        let mut registry = RecordRegistry::new();
        registry.register(7, Arc::new(MarkerHandler));
        assert!(registry.is_registered(7));
        assert!(!registry.is_registered(8));

        let value = Marker(99);
        let handler = registry.handler(7).unwrap();
        let decoded = handler.unmarshal(&value.marshal()).unwrap();
        let marker = decoded.as_any().downcast_ref::<Marker>().unwrap();
        assert_eq!(marker.0, 99);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_registry_is_append_only() {
        let mut registry = RecordRegistry::new();
        registry.register(7, Arc::new(MarkerHandler));
        registry.register(7, Arc::new(MarkerHandler));
    }

    #[test]
    #[should_panic(expected = "custom record tags start at")]
    fn test_reserved_tags_rejected() {
        let mut registry = RecordRegistry::new();
        registry.register(3, Arc::new(MarkerHandler));
    }
}
