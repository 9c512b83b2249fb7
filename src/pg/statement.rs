//! Prepared statement management and caching.
//!
//! Each connection keeps an LRU of server-side prepared statements keyed by
//! query text and declared parameter types. The same text bound once with an
//! integer and once with text is two statements on the server.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::protocol::{FieldDescription, Format};
use super::types::Oid;

/// Column names shared by every row of every result of one statement.
pub type SharedColumns = Arc<Vec<String>>;

// ============================================================================
// Prepared Statement
// ============================================================================

/// A statement parsed by the server and described once.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-side name (e.g. "dualdb_s3")
    pub name: String,
    /// Result column names
    pub columns: SharedColumns,
    /// Result column type OIDs, in column order
    pub column_types: Vec<Oid>,
    /// Format requested for each result column in Bind
    pub result_formats: Vec<Format>,
}

impl PreparedStatement {
    /// Build from the RowDescription the server returned for Describe.
    /// Columns with a binary decoder are requested in binary, the rest in
    /// text.
    pub fn new(name: String, fields: &[FieldDescription]) -> Self {
        Self {
            name,
            columns: Arc::new(fields.iter().map(|f| f.name.clone()).collect()),
            column_types: fields.iter().map(|f| f.type_oid).collect(),
            result_formats: fields.iter().map(|f| f.type_oid.result_format()).collect(),
        }
    }

    /// Check if this statement returns rows.
    #[inline]
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

// ============================================================================
// Statement Cache (O(1) LRU)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatementKey {
    query: String,
    param_types: Vec<Oid>,
}

/// O(1) LRU cache for prepared statements.
pub struct StatementCache {
    cache: LruCache<StatementKey, Arc<PreparedStatement>>,
    next_id: u64,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            next_id: 0,
        }
    }

    /// Look up a statement and mark it recently used.
    pub fn get(&mut self, query: &str, param_types: &[Oid]) -> Option<Arc<PreparedStatement>> {
        let key = StatementKey {
            query: query.to_string(),
            param_types: param_types.to_vec(),
        };
        self.cache.get(&key).map(Arc::clone)
    }

    /// Insert a statement. Returns the name of the statement pushed out of
    /// the cache, which the caller must close on the server.
    pub fn insert(
        &mut self,
        query: &str,
        param_types: &[Oid],
        statement: Arc<PreparedStatement>,
    ) -> Option<String> {
        let key = StatementKey {
            query: query.to_string(),
            param_types: param_types.to_vec(),
        };
        self.cache
            .push(key, statement)
            .filter(|(evicted_key, _)| {
                evicted_key.query != query || evicted_key.param_types != param_types
            })
            .map(|(_, evicted)| evicted.name.clone())
    }

    /// Drop a statement the server no longer accepts.
    pub fn remove(&mut self, query: &str, param_types: &[Oid]) -> Option<Arc<PreparedStatement>> {
        let key = StatementKey {
            query: query.to_string(),
            param_types: param_types.to_vec(),
        };
        self.cache.pop(&key)
    }

    /// Generate a unique statement name for this connection.
    pub fn next_statement_name(&mut self) -> String {
        self.next_id += 1;
        format!("dualdb_s{}", self.next_id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget every statement. Does not close them on the server.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(100)
    }
}
