//! The general-purpose distributed-cache interface.
//!
//! Callers that only need byte get/set/refresh/remove can depend on these
//! traits instead of [`SqliteCache`] directly.

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::cache::SqliteCache;
use crate::expiry::EntryOptions;

/// Blocking byte-oriented cache.
pub trait DistributedCache: Send + Sync {
    /// Value for `key`, if present and not expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace `key`.
    fn set(&self, key: &str, value: &[u8], options: &EntryOptions) -> Result<()>;

    /// Extend a live sliding entry without reading it.
    fn refresh(&self, key: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// [`get`](Self::get) decoded as UTF-8. Invalid UTF-8 is replaced, not rejected.
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key)?.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn set_string(&self, key: &str, value: &str, options: &EntryOptions) -> Result<()> {
        self.set(key, value.as_bytes(), options)
    }
}

/// Non-blocking counterpart of [`DistributedCache`].
///
/// A token cancelled before an operation starts prevents it from running.
#[async_trait::async_trait]
pub trait AsyncDistributedCache: Send + Sync {
    async fn get_async(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>>;

    async fn set_async(
        &self, key: &str, value: &[u8], options: &EntryOptions, cancel: &CancellationToken,
    ) -> Result<()>;

    async fn refresh_async(&self, key: &str, cancel: &CancellationToken) -> Result<()>;

    async fn remove_async(&self, key: &str, cancel: &CancellationToken) -> Result<()>;
}

impl DistributedCache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        SqliteCache::get(self, key)
    }

    fn set(&self, key: &str, value: &[u8], options: &EntryOptions) -> Result<()> {
        SqliteCache::set(self, key, value, options)
    }

    fn refresh(&self, key: &str) -> Result<()> {
        SqliteCache::refresh(self, key).map(drop)
    }

    fn remove(&self, key: &str) -> Result<()> {
        SqliteCache::remove(self, key).map(drop)
    }
}

#[async_trait::async_trait]
impl AsyncDistributedCache for SqliteCache {
    async fn get_async(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        SqliteCache::get_async(self, key, cancel).await
    }

    async fn set_async(
        &self, key: &str, value: &[u8], options: &EntryOptions, cancel: &CancellationToken,
    ) -> Result<()> {
        SqliteCache::set_async(self, key, value, options, cancel).await
    }

    async fn refresh_async(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        SqliteCache::refresh_async(self, key, cancel).await.map(drop)
    }

    async fn remove_async(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        SqliteCache::remove_async(self, key, cancel).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn shared() -> Arc<dyn DistributedCache> {
        Arc::new(SqliteCache::open_in_memory().unwrap())
    }

    #[test]
    fn test_strings_through_trait_object() {
        let cache = shared();
        cache.set_string("greeting", "hello", &EntryOptions::new()).unwrap();
        assert_eq!(cache.get_string("greeting").unwrap().as_deref(), Some("hello"));

        cache.remove("greeting").unwrap();
        assert!(cache.get_string("greeting").unwrap().is_none());
    }

    #[test]
    fn test_get_string_is_lossy() {
        let cache = shared();
        cache.set("bad", &[0x66, 0xFF, 0x6F], &EntryOptions::new()).unwrap();
        assert_eq!(cache.get_string("bad").unwrap().as_deref(), Some("f\u{FFFD}o"));
    }

    #[test]
    fn test_refresh_and_remove_missing_are_ok() {
        let cache = shared();
        cache.refresh("missing").unwrap();
        cache.remove("missing").unwrap();
    }

    #[tokio::test]
    async fn test_async_trait_object() {
        let cache: Arc<dyn AsyncDistributedCache> = Arc::new(SqliteCache::open_in_memory().unwrap());
        let cancel = CancellationToken::new();
        let options = EntryOptions::new().sliding_expiration(Duration::from_secs(60));

        cache.set_async("k", b"v", &options, &cancel).await.unwrap();
        cache.refresh_async("k", &cancel).await.unwrap();
        assert_eq!(cache.get_async("k", &cancel).await.unwrap(), Some(b"v".to_vec()));
        cache.remove_async("k", &cancel).await.unwrap();
        assert!(cache.get_async("k", &cancel).await.unwrap().is_none());
    }
}
