// ABOUTME: Memoization engine - content hashing of invocations and the result table
// ABOUTME: Short-circuits execution when an identical invocation already succeeded

use indexmap::IndexMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Compute the memoization key for one invocation.
///
/// The key covers the task function's identity and the fully resolved
/// arguments. Keyword arguments are normalized by sorting on key, and any
/// name listed in `ignore_for_cache` is dropped first, so pure side-channel
/// options never affect the key. Two invocations with equal identity and
/// equal post-normalization arguments always hash identically.
pub fn hash_invocation(
    task_name: &str,
    args: &[Value],
    kwargs: &IndexMap<String, Value>,
    ignore_for_cache: &[String],
) -> String {
    let mut normalized: Vec<(&String, &Value)> = kwargs
        .iter()
        .filter(|(key, _)| !ignore_for_cache.contains(key))
        .collect();
    normalized.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    hasher.update(task_name.as_bytes());
    hasher.update([0u8]);
    for arg in args {
        hasher.update(arg.to_string().as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([0u8]);
    for (key, value) in normalized {
        hasher.update(key.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.to_string().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// In-memory table of successful invocation results keyed by hashsum.
///
/// Populated from results produced in the current run and from checkpoint
/// entries loaded at startup. Concurrent lookups and inserts are safe; the
/// insert discipline is insert-if-absent, which is sound because an identical
/// hashsum implies an identical result.
pub struct Memoizer {
    table: Mutex<HashMap<String, Value>>,
}

impl Memoizer {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a prior successful result for this hashsum.
    pub fn check(&self, hashsum: &str) -> Option<Value> {
        let table = self.table.lock().expect("memo table poisoned");
        table.get(hashsum).cloned()
    }

    /// Record a successful result. The first writer wins; a concurrent
    /// duplicate insert is a no-op.
    pub fn update(&self, hashsum: String, value: Value) {
        let mut table = self.table.lock().expect("memo table poisoned");
        if table.contains_key(&hashsum) {
            debug!(%hashsum, "memo entry already present, keeping existing value");
            return;
        }
        table.insert(hashsum, value);
    }

    /// Seed the table from persisted checkpoint entries.
    pub fn seed(&self, entries: impl IntoIterator<Item = (String, Value)>) -> usize {
        let mut table = self.table.lock().expect("memo table poisoned");
        let mut loaded = 0;
        for (hashsum, value) in entries {
            if hashsum.is_empty() {
                warn!("skipping checkpoint entry with empty hashsum");
                continue;
            }
            table.entry(hashsum).or_insert(value);
            loaded += 1;
        }
        loaded
    }

    pub fn len(&self) -> usize {
        self.table.lock().expect("memo table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Memoizer {
    fn default() -> Self {
        Self::new()
    }
}
