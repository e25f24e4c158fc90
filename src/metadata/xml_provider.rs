//! Reloadable XML metadata provider
//!
//! Loads an EntityDescriptor or EntitiesDescriptor tree from a local file or
//! a remote URL. Remote sources are refreshed periodically at an interval
//! scaled from the tree's validity window, with exponential backoff after
//! failures and conditional fetches via ETag. After a successful load and
//! filter pass a backing copy is committed atomically (write to a random
//! temp name, then rename) so a restart can fall back to the last good
//! instance.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::SamlError;
use crate::metadata::discovery::{self, DiscoverableMetadata};
use crate::metadata::filters::{apply_filters, FilterContext, MetadataFilter};
use crate::metadata::provider::{
    CredentialCache, EntityLookup, LookupCriteria, MetadataObserver, MetadataProvider, Observers,
    ProviderGuard,
};
use crate::metadata::store::MetadataStore;
use crate::model::metadata::EntitiesDescriptor;
use crate::security::{Credential, MetadataCredentialCriteria};

fn default_min_refresh_delay() -> u64 {
    600
}

fn default_max_refresh_delay() -> u64 {
    28_800
}

fn default_refresh_delay_factor() -> f64 {
    0.75
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

/// Configuration for the XML provider.
#[derive(Debug, Clone, Deserialize)]
pub struct XmlProviderConfig {
    /// File path or http(s) URL of the metadata instance.
    pub source: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Local copy committed after each successful remote load.
    #[serde(default)]
    pub backing_file: Option<PathBuf>,
    #[serde(default = "default_min_refresh_delay")]
    pub min_refresh_delay: u64,
    #[serde(default = "default_max_refresh_delay")]
    pub max_refresh_delay: u64,
    #[serde(default = "default_refresh_delay_factor")]
    pub refresh_delay_factor: f64,
    #[serde(default = "default_true")]
    pub discovery_feed: bool,
    #[serde(default)]
    pub legacy_org_names: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl XmlProviderConfig {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: None,
            backing_file: None,
            min_refresh_delay: default_min_refresh_delay(),
            max_refresh_delay: default_max_refresh_delay(),
            refresh_delay_factor: default_refresh_delay_factor(),
            discovery_feed: true,
            legacy_org_names: false,
            timeout_secs: default_timeout(),
        }
    }

    fn is_remote(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }
}

struct RefreshState {
    reload_interval: u64,
    backoff_factor: u64,
    etag: Option<String>,
    last_update: Option<DateTime<Utc>>,
    loaded: bool,
}

enum LoadOutcome {
    Loaded,
    NotModified,
}

/// File- or URL-backed metadata provider with periodic refresh.
pub struct XmlProvider {
    config: XmlProviderConfig,
    id: String,
    gate: Arc<RwLock<()>>,
    store: std::sync::RwLock<Option<Arc<MetadataStore>>>,
    filters: Vec<Box<dyn MetadataFilter>>,
    observers: Observers,
    credentials: CredentialCache,
    http: reqwest::Client,
    state: std::sync::Mutex<RefreshState>,
    feed: std::sync::Mutex<Option<(String, String)>>,
}

impl XmlProvider {
    pub fn new(mut config: XmlProviderConfig) -> Result<Self, SamlError> {
        if config.refresh_delay_factor <= 0.0 || config.refresh_delay_factor >= 1.0 {
            warn!("invalid refreshDelayFactor setting, using default");
            config.refresh_delay_factor = default_refresh_delay_factor();
        }
        if config.min_refresh_delay > config.max_refresh_delay {
            warn!("minRefreshDelay exceeds maxRefreshDelay, lowering to match it");
            config.min_refresh_delay = config.max_refresh_delay;
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SamlError::Metadata(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            id: config.id.clone().unwrap_or_else(|| "XML".to_string()),
            state: std::sync::Mutex::new(RefreshState {
                reload_interval: config.max_refresh_delay,
                backoff_factor: 1,
                etag: None,
                last_update: None,
                loaded: false,
            }),
            config,
            gate: Arc::new(RwLock::new(())),
            store: std::sync::RwLock::new(None),
            filters: Vec::new(),
            observers: Observers::default(),
            credentials: CredentialCache::default(),
            http,
            feed: std::sync::Mutex::new(None),
        })
    }

    pub fn with_filter(mut self, filter: Box<dyn MetadataFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Seconds until the next refresh attempt, as last computed.
    pub fn reload_interval(&self) -> u64 {
        self.state.lock().unwrap().reload_interval
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_update
    }

    async fn fetch(&self, backup: bool) -> Result<Vec<u8>, SamlError> {
        if backup {
            let path = self.config.backing_file.as_ref().ok_or_else(|| {
                SamlError::Metadata("no backing file configured".to_string())
            })?;
            return Ok(tokio::fs::read(path).await?);
        }

        if !self.config.is_remote() {
            return Ok(tokio::fs::read(&self.config.source).await?);
        }

        let mut request = self.http.get(&self.config.source);
        if let Some(etag) = self.state.lock().unwrap().etag.clone() {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Err(SamlError::Metadata("not modified".to_string()));
        }
        if !response.status().is_success() {
            return Err(SamlError::Metadata(format!(
                "metadata fetch failed with status {}",
                response.status()
            )));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.state.lock().unwrap().etag = etag;

        Ok(response.bytes().await?.to_vec())
    }

    /// Commit a backup copy atomically: write to the final path suffixed
    /// with "." and random hex, then rename over the real location.
    fn commit_backup(&self, bytes: &[u8]) -> Option<PathBuf> {
        let backing = self.config.backing_file.as_ref()?;
        let mut suffix = [0u8; 2];
        rand::thread_rng().fill_bytes(&mut suffix);
        let temp = PathBuf::from(format!("{}.{}", backing.display(), hex::encode(suffix)));
        debug!(path = %temp.display(), "backing up remote metadata resource");
        if let Err(e) = std::fs::write(&temp, bytes) {
            warn!(error = %e, "exception while backing up metadata");
            return None;
        }
        Some(temp)
    }

    async fn load(&self, backup: bool) -> Result<LoadOutcome, SamlError> {
        let bytes = match self.fetch(backup).await {
            Ok(bytes) => bytes,
            Err(SamlError::Metadata(msg)) if msg == "not modified" => {
                return Ok(LoadOutcome::NotModified)
            }
            Err(e) => return Err(e),
        };

        let mut root = crate::xml::metadata::read_metadata(&bytes)?;

        if !root.is_valid(Utc::now()) {
            return Err(SamlError::Metadata(
                "metadata instance was invalid at time of acquisition".to_string(),
            ));
        }

        // Superficially correct metadata; take the backup before filtering,
        // commit it only if the filters pass.
        let staged_backup = if !backup { self.commit_backup(&bytes) } else { None };

        let ctx = FilterContext { is_backup: backup };
        if let Err(e) = apply_filters(&self.filters, &ctx, &mut root) {
            if let Some(temp) = staged_backup {
                let _ = std::fs::remove_file(temp);
            }
            return Err(e);
        }

        if let (Some(temp), Some(backing)) = (staged_backup, self.config.backing_file.as_ref()) {
            debug!(path = %backing.display(), "committing backup file to permanent location");
            let _ = std::fs::remove_file(backing);
            if std::fs::rename(&temp, backing).is_err() {
                warn!("unable to rename metadata backup file");
            }
        }

        let new_store = Arc::new(MetadataStore::build(root));

        // Swap in under the writer side of the reader gate.
        let _write = self.gate.write().await;
        let changed = {
            let mut slot = self.store.write().unwrap();
            let changed = slot.is_some();
            *slot = Some(new_store.clone());
            changed
        };

        if self.config.discovery_feed {
            let json = discovery::generate_feed(
                new_store.entities().map(|e| e.as_ref()),
                self.config.legacy_org_names,
            );
            *self.feed.lock().unwrap() = Some((json, discovery::generate_feed_tag()));
        }

        if changed {
            self.credentials.invalidate();
            self.observers.emit(&self.id);
        }

        {
            let mut state = self.state.lock().unwrap();
            state.last_update = Some(Utc::now());
            state.loaded = true;
            if !backup && self.config.is_remote() {
                state.backoff_factor = 1;
                state.reload_interval = self.compute_next_refresh(&new_store);
                info!(seconds = state.reload_interval, "adjusted reload interval");
            }
        }

        Ok(LoadOutcome::Loaded)
    }

    /// Next refresh delay: the remaining validity (or cacheDuration, if
    /// smaller) scaled by the delay factor, clamped to the configured range.
    fn compute_next_refresh(&self, store: &MetadataStore) -> u64 {
        let now = Utc::now();
        match store.last_valid_until {
            Some(valid_until) if valid_until < now => self.config.min_refresh_delay,
            valid_until => {
                let mut secs = valid_until
                    .map(|v| (v - now).num_seconds().max(0) as u64)
                    .unwrap_or(self.config.max_refresh_delay);
                if let Some(cache) = store.root_cache_duration {
                    secs = secs.min(cache.num_seconds().max(0) as u64);
                }
                secs = (secs as f64 * self.config.refresh_delay_factor) as u64;
                secs.clamp(self.config.min_refresh_delay, self.config.max_refresh_delay)
            }
        }
    }

    /// One refresh pass with error backoff and backup fallback; used by the
    /// background refresh task.
    pub async fn refresh(&self) -> Result<(), SamlError> {
        match self.load(false).await {
            Ok(LoadOutcome::Loaded) => Ok(()),
            Ok(LoadOutcome::NotModified) => {
                let interval = {
                    let store = self.store.read().unwrap().clone();
                    store
                        .map(|s| self.compute_next_refresh(&s))
                        .unwrap_or(self.config.min_refresh_delay)
                };
                let mut state = self.state.lock().unwrap();
                state.reload_interval = interval;
                info!(
                    source = %self.config.source,
                    seconds = state.reload_interval,
                    "remote resource unchanged, adjusted reload interval"
                );
                Ok(())
            }
            Err(e) => {
                let fall_back = {
                    let mut state = self.state.lock().unwrap();
                    state.reload_interval =
                        (self.config.min_refresh_delay * state.backoff_factor)
                            .min(self.config.max_refresh_delay);
                    state.backoff_factor += 1;
                    warn!(
                        seconds = state.reload_interval,
                        error = %e,
                        "metadata refresh failed, adjusted reload interval"
                    );
                    !state.loaded && self.config.backing_file.is_some()
                };
                if fall_back {
                    info!("falling back to backup metadata instance");
                    self.load(true).await?;
                    return Ok(());
                }
                Err(e)
            }
        }
    }

    /// Spawn the periodic refresh task for a remote provider.
    pub fn spawn_refresh_task(provider: Arc<XmlProvider>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(source = %provider.config.source, "starting metadata refresh task");
            loop {
                let delay = provider.reload_interval();
                tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                if let Err(e) = provider.refresh().await {
                    warn!(error = %e, "background metadata refresh failed");
                }
            }
        })
    }

    fn snapshot(&self) -> Result<Arc<MetadataStore>, SamlError> {
        self.store
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| SamlError::Metadata("metadata instance not loaded".to_string()))
    }
}

#[async_trait]
impl MetadataProvider for XmlProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<(), SamlError> {
        self.refresh().await
    }

    async fn lock(&self) -> ProviderGuard {
        ProviderGuard::single(self.gate.clone().read_owned().await)
    }

    async fn entity(
        &self,
        _guard: &mut ProviderGuard,
        criteria: &LookupCriteria,
    ) -> Result<Option<EntityLookup>, SamlError> {
        Ok(self.snapshot()?.lookup_entity(criteria, Utc::now()))
    }

    async fn entities_group(
        &self,
        _guard: &mut ProviderGuard,
        name: &str,
        require_valid: bool,
    ) -> Result<Option<Arc<EntitiesDescriptor>>, SamlError> {
        Ok(self.snapshot()?.lookup_group(name, require_valid, Utc::now()))
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

impl DiscoverableMetadata for XmlProvider {
    fn feed(&self) -> Option<String> {
        self.feed.lock().unwrap().as_ref().map(|(json, _)| json.clone())
    }

    fn feed_tag(&self) -> Option<String> {
        self.feed.lock().unwrap().as_ref().map(|(_, tag)| tag.clone())
    }
}
