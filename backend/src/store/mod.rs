//! Batched document storage used by the import pipeline.
//!
//! The pipeline only relies on merge-by-id writes and a few counts, so any
//! backend offering those can sit behind `DocumentStore`. `SqliteStore` is the
//! implementation the service runs with.

mod sqlite;

pub use sqlite::SqliteStore;

use serde_json::{Map, Value};

pub const ATTENDANCE: &str = "attendance";
pub const COURSES: &str = "courses";
pub const IMPORTS: &str = "imports";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid document body: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Document store lock poisoned")]
    Poisoned,
    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

/// A keyed JSON object. Writes merge `fields` into whatever is stored under `id`.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Document {
            id: id.into(),
            fields,
        }
    }

    /// Builds a document from any serializable value that renders as a JSON object.
    pub fn from_serialize<T: serde::Serialize>(
        id: impl Into<String>,
        value: &T,
    ) -> Result<Self, StoreError> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Document::new(id, fields)),
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other);
                Ok(Document::new(id, fields))
            }
        }
    }
}

pub trait DocumentStore: Send + Sync {
    /// Merges every document into `collection`, all or nothing.
    fn merge_batch(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError>;

    fn merge(&self, collection: &str, doc: &Document) -> Result<(), StoreError> {
        self.merge_batch(collection, std::slice::from_ref(doc))
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Map<String, Value>>, StoreError>;

    fn count(&self, collection: &str) -> Result<u64, StoreError>;

    /// Counts documents whose `year` field equals `year`.
    fn count_by_year(&self, collection: &str, year: i32) -> Result<u64, StoreError>;

    /// Cheap connectivity check, run before the first write of an import.
    fn ping(&self) -> Result<(), StoreError>;
}

/// Shallow merge: keys in `patch` replace keys in `base`, including nulls.
pub(crate) fn merge_fields(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        base.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Store wrappers for exercising failure paths.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails `merge_batch` on `collection` for a scripted number of calls.
    pub struct FlakyStore {
        pub inner: SqliteStore,
        pub collection: &'static str,
        failures: Mutex<Vec<bool>>,
        pub calls: AtomicUsize,
    }

    impl FlakyStore {
        /// `script[i]` says whether call `i` on `collection` fails. Calls past
        /// the end of the script succeed.
        pub fn new(collection: &'static str, script: Vec<bool>) -> Self {
            let mut failures = script;
            failures.reverse();
            FlakyStore {
                inner: SqliteStore::open_in_memory().unwrap(),
                collection,
                failures: Mutex::new(failures),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn always_failing(collection: &'static str) -> Self {
            Self::new(collection, vec![true; 1024])
        }
    }

    impl DocumentStore for FlakyStore {
        fn merge_batch(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
            if collection == self.collection {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let fail = self.failures.lock().unwrap().pop().unwrap_or(false);
                if fail {
                    return Err(StoreError::Unavailable("injected failure".into()));
                }
            }
            self.inner.merge_batch(collection, docs)
        }

        fn get(&self, collection: &str, id: &str) -> Result<Option<Map<String, Value>>, StoreError> {
            self.inner.get(collection, id)
        }

        fn count(&self, collection: &str) -> Result<u64, StoreError> {
            self.inner.count(collection)
        }

        fn count_by_year(&self, collection: &str, year: i32) -> Result<u64, StoreError> {
            self.inner.count_by_year(collection, year)
        }

        fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping()
        }
    }

    /// A store whose every operation fails, standing in for an unreachable backend.
    pub struct DownStore;

    impl DocumentStore for DownStore {
        fn merge_batch(&self, _: &str, _: &[Document]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn get(&self, _: &str, _: &str) -> Result<Option<Map<String, Value>>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn count(&self, _: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn count_by_year(&self, _: &str, _: i32) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }
}
