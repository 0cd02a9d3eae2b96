//! Deduplication Cache (C3): canonicalizes a tool call's arguments, hashes
//! them, and serves a cached output for an identical call within a TTL
//! window — sparing a flaky or expensive tool a redundant invocation.
//!
//! Only successful outcomes are ever cached; validation failures and tools
//! that opt out of caching never populate or consult the cache (spec §4.3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Map, Number, Value};

/// Canonicalize a call's arguments so that calls the spec considers
/// equivalent (spec §4.3) hash identically: object keys are sorted
/// recursively regardless of emission order, numbers with the same value but
/// a different representation (`1` vs `1.0`) normalize to the same form, and
/// a key whose value is `null` — taken to mean "omitted" rather than an
/// explicit value — is dropped rather than compared.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                let canon = canonicalize(v);
                if canon.is_null() {
                    continue;
                }
                sorted.insert(k.clone(), canon);
            }
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => Value::Number(canonicalize_number(n)),
        other => other.clone(),
    }
}

/// Normalize a JSON number so an integral value round-trips to the same
/// representation no matter whether it arrived as `1` or `1.0`.
fn canonicalize_number(n: &Number) -> Number {
    if let Some(i) = n.as_i64() {
        return Number::from(i);
    }
    if let Some(f) = n.as_f64() {
        if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            return Number::from(f as i64);
        }
        if let Some(canon) = Number::from_f64(f) {
            return canon;
        }
    }
    n.clone()
}

/// A stable hash of `tool_name` plus canonicalized `arguments`, shared between
/// the dedupe cache's key and [`crate::state::ToolCallHistoryEntry::args_hash`]
/// (loop detection consults the same identity).
#[must_use]
pub fn canonical_hash(tool_name: &str, arguments: &Map<String, Value>) -> u64 {
    use std::hash::{Hash, Hasher};
    let canonical = canonicalize(&Value::Object(arguments.clone()));
    let rendered = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    tool_name.hash(&mut hasher);
    rendered.hash(&mut hasher);
    hasher.finish()
}

/// A human-diagnosable fingerprint string for a call's canonicalized input,
/// stored on [`crate::state::ToolExecutionResult`] for debugging, not used
/// as a cache or hashing key itself.
#[must_use]
pub fn fingerprint(tool_name: &str, arguments: &Map<String, Value>) -> String {
    format!("{tool_name}:{:016x}", canonical_hash(tool_name, arguments))
}

struct CacheEntry {
    output: Value,
    inserted_at: Instant,
    last_access_seq: AtomicU64,
}

/// Bounded, TTL-expiring cache of `(tool_name, canonical args) -> output`.
pub struct DedupeCache {
    entries: DashMap<u64, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    access_counter: AtomicU64,
}

/// A cache lookup that hit, carrying how long ago the value was stored.
pub struct CacheHit {
    /// The cached output value.
    pub output: Value,
    /// Milliseconds since the value was inserted.
    pub age_ms: u64,
}

impl DedupeCache {
    /// Build a cache with the given TTL and maximum resident-entry count.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            access_counter: AtomicU64::new(0),
        }
    }

    /// Look up a cached result for this call, evicting it first if expired.
    /// `ttl_override` lets a tool that opted into a custom TTL
    /// ([`crate::tool::ToolCachePolicy::Ttl`]) be judged against that TTL
    /// instead of the cache's configured default.
    #[must_use]
    pub fn get(&self, tool_name: &str, arguments: &Map<String, Value>, ttl_override: Option<Duration>) -> Option<CacheHit> {
        let ttl = ttl_override.unwrap_or(self.ttl);
        let key = canonical_hash(tool_name, arguments);
        let expired = match self.entries.get(&key) {
            Some(entry) => entry.inserted_at.elapsed() > ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(&key);
            return None;
        }
        let entry = self.entries.get(&key)?;
        entry
            .last_access_seq
            .store(self.access_counter.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(CacheHit {
            output: entry.output.clone(),
            age_ms: u64::try_from(entry.inserted_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Record a successful call's output. Evicts the least-recently-accessed
    /// entry first if this insertion would exceed `max_entries`.
    pub fn insert(&self, tool_name: &str, arguments: &Map<String, Value>, output: Value) {
        let key = canonical_hash(tool_name, arguments);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            CacheEntry {
                output,
                inserted_at: Instant::now(),
                last_access_seq: AtomicU64::new(self.access_counter.fetch_add(1, Ordering::Relaxed)),
            },
        );
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_access_seq.load(Ordering::Relaxed))
            .map(|entry| *entry.key());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Current number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no resident entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(json: &str) -> Map<String, Value> {
        match serde_json::from_str(json).unwrap() {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = args(r#"{"x": 1, "y": 2}"#);
        let b = args(r#"{"y": 2, "x": 1}"#);
        assert_eq!(canonical_hash("t", &a), canonical_hash("t", &b));
    }

    #[test]
    fn cache_hit_after_insert() {
        let cache = DedupeCache::new(Duration::from_secs(60), 16);
        let a = args(r#"{"a": 1}"#);
        assert!(cache.get("t", &a, None).is_none());
        cache.insert("t", &a, Value::String("ok".into()));
        let hit = cache.get("t", &a, None).expect("should hit");
        assert_eq!(hit.output, Value::String("ok".into()));
    }

    #[test]
    fn expired_entries_are_not_served() {
        let cache = DedupeCache::new(Duration::from_millis(1), 16);
        let a = args(r#"{"a": 1}"#);
        cache.insert("t", &a, Value::Bool(true));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("t", &a, None).is_none());
    }

    #[test]
    fn ttl_override_is_judged_instead_of_the_default() {
        let cache = DedupeCache::new(Duration::from_secs(60), 16);
        let a = args(r#"{"a": 1}"#);
        cache.insert("t", &a, Value::Bool(true));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("t", &a, Some(Duration::from_millis(1))).is_none());
        assert!(cache.get("t", &a, None).is_some());
    }

    #[test]
    fn evicts_least_recently_used_when_full() {
        let cache = DedupeCache::new(Duration::from_secs(60), 2);
        cache.insert("t", &args(r#"{"a":1}"#), Value::Bool(true));
        cache.insert("t", &args(r#"{"a":2}"#), Value::Bool(true));
        // touch the first so the second becomes LRU
        let _ = cache.get("t", &args(r#"{"a":1}"#), None);
        cache.insert("t", &args(r#"{"a":3}"#), Value::Bool(true));
        assert!(cache.get("t", &args(r#"{"a":2}"#), None).is_none());
        assert!(cache.get("t", &args(r#"{"a":1}"#), None).is_some());
        assert!(cache.get("t", &args(r#"{"a":3}"#), None).is_some());
    }

    #[test]
    fn canonicalize_normalizes_integral_floats_and_drops_nulls() {
        let a = args(r#"{"x": 1, "y": null}"#);
        let b = args(r#"{"x": 1.0}"#);
        assert_eq!(canonical_hash("t", &a), canonical_hash("t", &b));
    }
}
