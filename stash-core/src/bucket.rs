use std::collections::HashMap;

/// The unit of expiration: one or more named values sharing one TTL clock.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket<V> {
    values: HashMap<String, V>,
    timeout_secs: u64,
    expire_at: u64,
}

impl<V> Bucket<V> {
    /// Creates a bucket holding a single value, expiring `timeout_secs` after `now`.
    pub fn new(name: String, value: V, timeout_secs: u64, now: u64) -> Self {
        let mut values = HashMap::with_capacity(1);
        values.insert(name, value);
        Self {
            values,
            timeout_secs,
            expire_at: expiry_from(now, timeout_secs),
        }
    }

    /// Returns the value stored under `name`, if any
    pub fn get(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }

    /// Inserts or replaces `name` without touching the expiration clock.
    pub fn insert(&mut self, name: String, value: V) {
        self.values.insert(name, value);
    }

    /// Removes `name`, returning its value if it was present
    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.values.remove(name)
    }

    /// Returns `true` once the last named value has been removed
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Absolute expiration time in milliseconds since the Unix epoch
    pub fn expire_at(&self) -> u64 {
        self.expire_at
    }

    /// A bucket is stale once `now` is strictly past its expiration time.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expire_at
    }

    /// Restarts the expiration clock from `now` (sliding expiration).
    pub fn refresh(&mut self, now: u64) {
        self.expire_at = expiry_from(now, self.timeout_secs);
    }
}

fn expiry_from(now: u64, timeout_secs: u64) -> u64 {
    now.saturating_add(timeout_secs.saturating_mul(1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_bucket_expiry() {
        let bucket = Bucket::new("a".to_string(), 1, 5, 10_000);

        assert_eq!(bucket.get("a"), Some(&1));
        assert_eq!(bucket.timeout_secs, 5);
        assert_eq!(bucket.expire_at(), 15_000);
    }

    #[test]
    fn test_expired_only_strictly_after_expire_at() {
        let bucket = Bucket::new("a".to_string(), (), 1, 0);

        assert!(!bucket.is_expired(999));
        assert!(!bucket.is_expired(1_000));
        assert!(bucket.is_expired(1_001));
    }

    #[test]
    fn test_insert_keeps_clock() {
        let mut bucket = Bucket::new("a".to_string(), 1, 5, 0);
        bucket.insert("b".to_string(), 2);

        assert_eq!(bucket.get("b"), Some(&2));
        assert_eq!(bucket.expire_at(), 5_000);
    }

    #[test]
    fn test_remove_last_value_empties() {
        let mut bucket = Bucket::new("a".to_string(), 1, 5, 0);

        assert_eq!(bucket.remove("missing"), None);
        assert_eq!(bucket.remove("a"), Some(1));
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_refresh_slides_window() {
        let mut bucket = Bucket::new("a".to_string(), 1, 2, 0);
        bucket.refresh(1_500);

        assert_eq!(bucket.expire_at(), 3_500);
    }

    #[test]
    fn test_extreme_timeout_saturates() {
        let bucket = Bucket::new("a".to_string(), 1, u64::MAX, 42);

        assert_eq!(bucket.expire_at(), u64::MAX);
        assert!(!bucket.is_expired(u64::MAX));
    }
}
