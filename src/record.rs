//! Dirty-tracked persisted records
//!
//! A [`DirtyTracked`] owns one record, loads it lazily from the key-value
//! store and writes it back only when it has been marked dirty. The wrapper
//! does not observe field mutation: whoever changes the record marks it dirty,
//! either explicitly or through [`DirtyTracked::update`].
//!
//! Payloads are JSON objects encoded field by field and always carry a
//! `schemaVersion` so a later release can migrate them.

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::store::KeyValueStore;

/// Name of the version field present in every persisted payload
pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

/// A record type that can live under a single store key
pub trait PersistedRecord: Default {
    /// Stable store key for this record type
    const STORE_KEY: &'static str;
    /// Version written into `schemaVersion`
    const SCHEMA_VERSION: u32;

    /// Encode every field, including `schemaVersion`
    fn encode(&self) -> Value;

    /// Decode from a payload whose version has already been checked
    fn decode(fields: &RecordFields<'_>) -> Result<Self, RecordDecodeError>;
}

/// Reasons a stored payload could not be turned back into a record
#[derive(Debug, Error)]
pub enum RecordDecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unsupported schema version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Typed accessors over a payload object
pub struct RecordFields<'a> {
    object: &'a Map<String, Value>,
}

impl<'a> RecordFields<'a> {
    pub fn new(object: &'a Map<String, Value>) -> Self {
        Self { object }
    }

    fn required(&self, name: &str) -> Result<&'a Value, RecordDecodeError> {
        self.object
            .get(name)
            .ok_or_else(|| RecordDecodeError::MissingField(name.to_string()))
    }

    fn invalid(name: &str, reason: impl Into<String>) -> RecordDecodeError {
        RecordDecodeError::InvalidField {
            field: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn u64(&self, name: &str) -> Result<u64, RecordDecodeError> {
        self.required(name)?
            .as_u64()
            .ok_or_else(|| Self::invalid(name, "expected a non-negative integer"))
    }

    pub fn u32(&self, name: &str) -> Result<u32, RecordDecodeError> {
        let value = self.u64(name)?;
        u32::try_from(value).map_err(|_| Self::invalid(name, "integer out of range"))
    }

    pub fn string(&self, name: &str) -> Result<&'a str, RecordDecodeError> {
        self.required(name)?
            .as_str()
            .ok_or_else(|| Self::invalid(name, "expected a string"))
    }

    /// A string field that may be absent or `null`
    pub fn optional_string(&self, name: &str) -> Result<Option<&'a str>, RecordDecodeError> {
        match self.object.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(Self::invalid(name, "expected a string or null")),
        }
    }

    /// RFC 3339 timestamp, absent or `null` meaning none
    pub fn optional_timestamp(
        &self,
        name: &str,
    ) -> Result<Option<DateTime<Utc>>, RecordDecodeError> {
        self.optional_string(name)?
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Self::invalid(name, e.to_string()))
            })
            .transpose()
    }

    /// `YYYY-MM-DD` calendar date, absent or `null` meaning none
    pub fn optional_date(&self, name: &str) -> Result<Option<NaiveDate>, RecordDecodeError> {
        self.optional_string(name)?
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| Self::invalid(name, e.to_string()))
            })
            .transpose()
    }
}

/// Decode a stored payload, checking `schemaVersion` first
pub fn decode_record<T: PersistedRecord>(payload: &str) -> Result<T, RecordDecodeError> {
    let value: Value = serde_json::from_str(payload)?;
    let object = value.as_object().ok_or(RecordDecodeError::NotAnObject)?;
    let fields = RecordFields::new(object);

    let found = fields.u32(SCHEMA_VERSION_FIELD)?;
    if found > T::SCHEMA_VERSION {
        return Err(RecordDecodeError::UnsupportedVersion {
            found,
            supported: T::SCHEMA_VERSION,
        });
    }

    T::decode(&fields)
}

/// Encode a record to its stored string form
pub fn encode_record<T: PersistedRecord>(record: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&record.encode())
}

/// A lazily loaded record with an unsaved-changes flag
pub struct DirtyTracked<T: PersistedRecord> {
    store: Arc<dyn KeyValueStore>,
    value: T,
    loaded: bool,
    dirty: bool,
}

impl<T: PersistedRecord> DirtyTracked<T> {
    /// Wrap a default record; nothing is read until first access or [`Self::load`]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            value: T::default(),
            loaded: false,
            dirty: false,
        }
    }

    pub fn key(&self) -> &'static str {
        T::STORE_KEY
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Populate from the store, falling back to the default on any failure
    pub fn load(&mut self) {
        self.value = match self.store.get(T::STORE_KEY) {
            Ok(Some(payload)) => match decode_record::<T>(&payload) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        key = T::STORE_KEY,
                        error = %err,
                        "Stored record unreadable, using defaults"
                    );
                    T::default()
                }
            },
            Ok(None) => {
                tracing::debug!(key = T::STORE_KEY, "No stored record, using defaults");
                T::default()
            }
            Err(err) => {
                tracing::warn!(
                    key = T::STORE_KEY,
                    error = %err,
                    "Failed to read record, using defaults"
                );
                T::default()
            }
        };
        self.loaded = true;
        self.dirty = false;
    }

    fn ensure_loaded(&mut self) {
        if !self.loaded {
            self.load();
        }
    }

    /// Current value, loading it on first access
    pub fn value(&mut self) -> &T {
        self.ensure_loaded();
        &self.value
    }

    /// Mutable access; the caller must follow up with [`Self::mark_dirty`]
    pub fn value_mut(&mut self) -> &mut T {
        self.ensure_loaded();
        &mut self.value
    }

    /// Current in-memory value without triggering a load
    pub fn peek(&self) -> &T {
        &self.value
    }

    /// Mutate the record and mark it dirty
    pub fn update<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        self.ensure_loaded();
        let result = f(&mut self.value);
        self.mark_dirty();
        result
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Write back if dirty. Returns whether a physical write happened.
    ///
    /// The dirty flag is only cleared once the store confirms the write.
    pub fn try_save(&mut self) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        let payload = encode_record(&self.value)?;
        self.store.set(T::STORE_KEY, &payload)?;
        self.dirty = false;
        Ok(true)
    }

    /// [`Self::try_save`], logging and absorbing store failures
    pub fn save(&mut self) -> bool {
        match self.try_save() {
            Ok(written) => written,
            Err(err) => {
                tracing::warn!(key = T::STORE_KEY, error = %err, "Failed to save record");
                false
            }
        }
    }

    /// Delete the backing key and reset to a fresh, loaded default
    pub fn clear(&mut self) {
        if let Err(err) = self.store.delete(T::STORE_KEY) {
            tracing::warn!(key = T::STORE_KEY, error = %err, "Failed to delete record");
        }
        self.value = T::default();
        self.loaded = true;
        self.dirty = false;
    }
}
