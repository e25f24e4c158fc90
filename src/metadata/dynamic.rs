//! On-demand metadata providers
//!
//! Resolve a single entity at lookup time: directly from the entityID as a
//! URL (Dynamic), from an MDQ responder (MDQ), or from a local directory
//! keyed by hashed entityID (LocalDynamic). Results are cached per entity
//! with a TTL scaled from the instance's validity; failures are cached too,
//! at the minimum TTL, to prevent retry storms.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::SamlError;
use crate::metadata::filters::{apply_filters, FilterContext, MetadataFilter};
use crate::metadata::provider::{
    CredentialCache, EntityLookup, LookupCriteria, LookupKey, MetadataObserver, MetadataProvider,
    Observers, ProviderGuard,
};
use crate::metadata::store::{sha1_hex, MetadataStore};
use crate::model::metadata::{EntitiesDescriptor, MetadataRoot};
use crate::security::{Credential, MetadataCredentialCriteria};

fn default_min_cache_duration() -> u64 {
    600
}

fn default_max_cache_duration() -> u64 {
    28_800
}

fn default_refresh_delay_factor() -> f64 {
    0.75
}

/// Shared configuration of the on-demand providers.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicProviderConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_min_cache_duration")]
    pub min_cache_duration: u64,
    #[serde(default = "default_max_cache_duration")]
    pub max_cache_duration: u64,
    #[serde(default = "default_refresh_delay_factor")]
    pub refresh_delay_factor: f64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for DynamicProviderConfig {
    fn default() -> Self {
        Self {
            id: None,
            min_cache_duration: default_min_cache_duration(),
            max_cache_duration: default_max_cache_duration(),
            refresh_delay_factor: default_refresh_delay_factor(),
            timeout_secs: None,
        }
    }
}

/// Source of raw per-entity metadata documents.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch(&self, entity_id: &str) -> Result<Vec<u8>, SamlError>;
}

/// Fetch the entityID itself as a URL.
pub struct HttpEntityFetcher {
    http: reqwest::Client,
}

impl HttpEntityFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, SamlError> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .map_err(|e| SamlError::Metadata(format!("failed to create HTTP client: {}", e)))?,
        })
    }
}

#[async_trait]
impl EntityFetcher for HttpEntityFetcher {
    fn id(&self) -> &str {
        "Dynamic"
    }

    async fn fetch(&self, entity_id: &str) -> Result<Vec<u8>, SamlError> {
        if !entity_id.starts_with("http://") && !entity_id.starts_with("https://") {
            return Err(SamlError::Metadata(format!(
                "entityID ({}) is not resolvable as a location",
                entity_id
            )));
        }
        let response = self.http.get(entity_id).send().await?;
        if !response.status().is_success() {
            return Err(SamlError::Metadata(format!(
                "metadata fetch failed with status {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Fetch from an MDQ responder: base URL + "/entities/" + identifier, the
/// identifier optionally transformed to the hashed "{sha1}" form.
pub struct MdqFetcher {
    http: reqwest::Client,
    base_url: String,
    hash_request: bool,
}

impl MdqFetcher {
    pub fn new(base_url: impl Into<String>, hash_request: bool, timeout_secs: u64) -> Result<Self, SamlError> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .map_err(|e| SamlError::Metadata(format!("failed to create HTTP client: {}", e)))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            hash_request,
        })
    }

    fn request_url(&self, entity_id: &str) -> String {
        if self.hash_request {
            format!("{}/entities/%7Bsha1%7D{}", self.base_url, sha1_hex(entity_id))
        } else {
            format!(
                "{}/entities/{}",
                self.base_url,
                urlencoding::encode(entity_id)
            )
        }
    }
}

#[async_trait]
impl EntityFetcher for MdqFetcher {
    fn id(&self) -> &str {
        "MDQ"
    }

    async fn fetch(&self, entity_id: &str) -> Result<Vec<u8>, SamlError> {
        let url = self.request_url(entity_id);
        debug!(url = %url, "querying MDQ responder");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SamlError::Metadata(format!(
                "MDQ query failed with status {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Fetch from a directory of per-entity files named by hashed entityID.
pub struct LocalFetcher {
    directory: PathBuf,
}

impl LocalFetcher {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl EntityFetcher for LocalFetcher {
    fn id(&self) -> &str {
        "LocalDynamic"
    }

    async fn fetch(&self, entity_id: &str) -> Result<Vec<u8>, SamlError> {
        let path = self.directory.join(format!("{}.xml", sha1_hex(entity_id)));
        Ok(tokio::fs::read(&path).await?)
    }
}

/// On-demand provider over any fetcher.
pub struct DynamicProvider {
    id: String,
    config: DynamicProviderConfig,
    fetcher: Box<dyn EntityFetcher>,
    gate: Arc<RwLock<()>>,
    store: std::sync::RwLock<MetadataStore>,
    /// Per-key cache expirations, tracking failed lookups as well.
    cache: std::sync::RwLock<HashMap<String, DateTime<Utc>>>,
    filters: Vec<Box<dyn MetadataFilter>>,
    observers: Observers,
    credentials: CredentialCache,
    last_update: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl DynamicProvider {
    pub fn new(mut config: DynamicProviderConfig, fetcher: Box<dyn EntityFetcher>) -> Self {
        if config.min_cache_duration > config.max_cache_duration {
            warn!("minCacheDuration exceeds maxCacheDuration, lowering to match it");
            config.min_cache_duration = config.max_cache_duration;
        }
        if config.refresh_delay_factor <= 0.0 || config.refresh_delay_factor >= 1.0 {
            warn!("invalid refreshDelayFactor setting, using default");
            config.refresh_delay_factor = default_refresh_delay_factor();
        }
        Self {
            id: config
                .id
                .clone()
                .unwrap_or_else(|| fetcher.id().to_string()),
            config,
            fetcher,
            gate: Arc::new(RwLock::new(())),
            store: std::sync::RwLock::new(MetadataStore::default()),
            cache: std::sync::RwLock::new(HashMap::new()),
            filters: Vec::new(),
            observers: Observers::default(),
            credentials: CredentialCache::default(),
            last_update: std::sync::Mutex::new(None),
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn MetadataFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock().unwrap()
    }

    fn cached_until(&self, key: &str) -> Option<DateTime<Utc>> {
        self.cache.read().unwrap().get(key).copied()
    }

    fn cache_key(&self, current: &Option<EntityLookup>, criteria: &LookupCriteria) -> String {
        current
            .as_ref()
            .map(|l| l.entity.entity_id.clone())
            .unwrap_or_else(|| criteria.key_string().to_string())
    }

    async fn resolve_entity(&self, name: &str) -> Result<MetadataRoot, SamlError> {
        let bytes = self.fetcher.fetch(name).await?;
        crate::xml::metadata::read_metadata(&bytes)
    }

    /// TTL for a freshly resolved entity: min(validUntil − now, cacheDuration)
    /// scaled by the delay factor, clamped to the configured bounds.
    fn cache_ttl(&self, valid_until: Option<DateTime<Utc>>, cache_duration: Option<Duration>) -> u64 {
        let now = Utc::now();
        let mut secs = valid_until
            .map(|v| (v - now).num_seconds().max(0) as u64)
            .unwrap_or(u64::MAX);
        if let Some(cache) = cache_duration {
            secs = secs.min(cache.num_seconds().max(0) as u64);
        }
        let scaled = if secs == u64::MAX {
            self.config.max_cache_duration
        } else {
            (secs as f64 * self.config.refresh_delay_factor) as u64
        };
        scaled.clamp(self.config.min_cache_duration, self.config.max_cache_duration)
    }
}

#[async_trait]
impl MetadataProvider for DynamicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<(), SamlError> {
        Ok(())
    }

    async fn lock(&self) -> ProviderGuard {
        ProviderGuard::single(self.gate.clone().read_owned().await)
    }

    async fn entity(
        &self,
        guard: &mut ProviderGuard,
        criteria: &LookupCriteria,
    ) -> Result<Option<EntityLookup>, SamlError> {
        let now = Utc::now();
        let current = self.store.read().unwrap().lookup_entity(criteria, now);

        // Inside the caching interval the indexed answer stands, even when
        // it is a miss: failed lookups cache too.
        let key = self.cache_key(&current, criteria);
        if let Some(until) = self.cached_until(&key) {
            if now <= until {
                return Ok(current);
            }
            self.cache.write().unwrap().remove(&key);
        }

        let name = match &criteria.key {
            LookupKey::EntityId(id) => id.clone(),
            LookupKey::ArtifactSource(_) => {
                return Err(SamlError::Metadata(
                    "unable to resolve metadata dynamically from an artifact".to_string(),
                ))
            }
        };

        if current.is_some() {
            info!(entity_id = %name, "metadata beyond caching interval, attempting to refresh");
        } else {
            info!(entity_id = %name, "resolving metadata");
        }

        let resolved: Result<_, SamlError> = async {
            let mut root = self.resolve_entity(&name).await?;

            let MetadataRoot::Entity(ref entity) = root else {
                return Err(SamlError::Metadata(
                    "root of metadata instance not recognized".to_string(),
                ));
            };
            if entity.entity_id != name {
                return Err(SamlError::Metadata(
                    "metadata instance did not match expected entityID".to_string(),
                ));
            }

            apply_filters(&self.filters, &FilterContext::default(), &mut root)?;

            let MetadataRoot::Entity(entity) = root else { unreachable!() };
            if let Some(valid_until) = entity.valid_until {
                if valid_until < Utc::now() + Duration::seconds(60) {
                    return Err(SamlError::Metadata(
                        "metadata was already invalid at the time of retrieval".to_string(),
                    ));
                }
            }

            let ttl = self.cache_ttl(entity.valid_until, entity.cache_duration);
            info!(entity_id = %name, seconds = ttl, "caching resolved metadata");
            Ok((entity, ttl))
        }
        .await;

        match resolved {
            Ok((entity, ttl)) => {
                // Upgrade to the writer side to swap the entity in, giving
                // up the caller's read lock first, then downgrade back.
                guard.locks.clear();
                {
                    let _write = self.gate.write().await;
                    self.credentials.invalidate();
                    self.observers.emit(&self.id);
                    self.cache.write().unwrap().insert(
                        entity.entity_id.clone(),
                        Utc::now() + Duration::seconds(ttl as i64),
                    );
                    self.store.write().unwrap().index_replacing(entity);
                    *self.last_update.lock().unwrap() = Some(Utc::now());
                }
                guard.locks.push(self.gate.clone().read_owned().await);

                Ok(self.store.read().unwrap().lookup_entity(criteria, Utc::now()))
            }
            Err(e) => {
                warn!(
                    entity_id = %name,
                    error = %e,
                    seconds = self.config.min_cache_duration,
                    "error resolving metadata, next refresh no sooner than minimum"
                );
                self.cache.write().unwrap().insert(
                    key,
                    Utc::now() + Duration::seconds(self.config.min_cache_duration as i64),
                );
                Ok(current)
            }
        }
    }

    async fn entities_group(
        &self,
        _guard: &mut ProviderGuard,
        _name: &str,
        _require_valid: bool,
    ) -> Result<Option<Arc<EntitiesDescriptor>>, SamlError> {
        Ok(None)
    }

    async fn resolve(
        &self,
        _guard: &ProviderGuard,
        criteria: &MetadataCredentialCriteria,
    ) -> Result<Vec<Credential>, SamlError> {
        Ok(self.credentials.resolve(criteria))
    }

    fn add_observer(&self, observer: Arc<dyn MetadataObserver>) {
        self.observers.add(observer);
    }
}
