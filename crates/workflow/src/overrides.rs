use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use faultdesk_core::errors::ApplicationError;
use faultdesk_core::routing::policy::normalize_site_code;
use faultdesk_core::routing::VendorOverrideSet;
use faultdesk_db::repositories::VendorOverrideRepository;

/// Immutable membership snapshot handed to the pure resolver.
#[derive(Clone, Debug)]
pub struct OverrideSnapshot(Arc<HashSet<String>>);

impl VendorOverrideSet for OverrideSnapshot {
    fn contains(&self, site_code: &str) -> bool {
        self.0.contains(&normalize_site_code(site_code))
    }
}

/// Read-through cache over the vendor-override store.
///
/// The ingestion collaborator refreshes the underlying table and calls
/// [`CachedOverrideSet::invalidate`] (or [`CachedOverrideSet::refresh`]);
/// there is no TTL and no ambient global state.
pub struct CachedOverrideSet {
    repo: Arc<dyn VendorOverrideRepository>,
    cache: RwLock<Option<Arc<HashSet<String>>>>,
}

impl CachedOverrideSet {
    pub fn new(repo: Arc<dyn VendorOverrideRepository>) -> Self {
        Self { repo, cache: RwLock::new(None) }
    }

    pub async fn snapshot(&self) -> Result<OverrideSnapshot, ApplicationError> {
        {
            let cache = self.cache.read().await;
            if let Some(sites) = cache.as_ref() {
                return Ok(OverrideSnapshot(Arc::clone(sites)));
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have filled the cache while we waited.
        if let Some(sites) = cache.as_ref() {
            return Ok(OverrideSnapshot(Arc::clone(sites)));
        }

        let sites = self
            .repo
            .list_sites()
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        let set: Arc<HashSet<String>> =
            Arc::new(sites.into_iter().map(|s| normalize_site_code(&s)).collect());
        *cache = Some(Arc::clone(&set));

        Ok(OverrideSnapshot(set))
    }

    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    /// Full refresh on behalf of the ingestion collaborator: replace the
    /// stored set, then drop the cached snapshot.
    pub async fn refresh(&self, sites: Vec<String>) -> Result<(), ApplicationError> {
        self.repo
            .replace_all(sites)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        self.invalidate().await;
        Ok(())
    }
}
