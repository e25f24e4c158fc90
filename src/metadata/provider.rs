//! Metadata provider abstraction
//!
//! A provider is a locked lookup source over entity descriptors. Readers
//! take a guard for the span of lookup plus use of the returned data;
//! background refreshes take the write side of the same gate, so a swap is
//! atomic with respect to readers. The guard also carries the bookkeeping
//! the chaining provider needs to release exactly the child locks one call
//! path acquired and to dispatch credential resolution back to the child
//! that produced a role.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OwnedRwLockReadGuard;

use crate::error::SamlError;
use crate::model::metadata::{EntitiesDescriptor, EntityDescriptor, RoleRef, RoleType};
use crate::security::{Credential, MetadataCredentialCriteria};

/// What to look an entity up by.
#[derive(Debug, Clone)]
pub enum LookupKey {
    EntityId(String),
    /// Reverse lookup through an artifact's source string.
    ArtifactSource(String),
}

/// Entity lookup criteria.
#[derive(Debug, Clone)]
pub struct LookupCriteria {
    pub key: LookupKey,
    pub role: Option<RoleType>,
    pub protocol: Option<String>,
    /// Fallback protocol tried when `protocol` finds no role.
    pub protocol2: Option<String>,
    pub valid_only: bool,
}

impl LookupCriteria {
    pub fn entity_id(id: impl Into<String>) -> Self {
        Self {
            key: LookupKey::EntityId(id.into()),
            role: None,
            protocol: None,
            protocol2: None,
            valid_only: true,
        }
    }

    pub fn artifact_source(source: impl Into<String>) -> Self {
        Self {
            key: LookupKey::ArtifactSource(source.into()),
            role: None,
            protocol: None,
            protocol2: None,
            valid_only: true,
        }
    }

    pub fn with_role(mut self, role: RoleType, protocol: impl Into<String>) -> Self {
        self.role = Some(role);
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_fallback_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol2 = Some(protocol.into());
        self
    }

    /// The string key this lookup indexes by.
    pub fn key_string(&self) -> &str {
        match &self.key {
            LookupKey::EntityId(id) => id,
            LookupKey::ArtifactSource(source) => source,
        }
    }
}

/// A successful entity lookup: the entity, and the matched role when the
/// criteria asked for one.
#[derive(Debug, Clone)]
pub struct EntityLookup {
    pub entity: Arc<EntityDescriptor>,
    pub role: Option<RoleRef>,
}

/// Read guard over one provider (or, for a chain, the children locked so
/// far). Dropping it releases exactly the locks this call path acquired.
#[derive(Default)]
pub struct ProviderGuard {
    pub(crate) locks: Vec<OwnedRwLockReadGuard<()>>,
    pub(crate) children: HashMap<usize, ProviderGuard>,
    pub(crate) role_map: HashMap<String, usize>,
}

impl ProviderGuard {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn single(lock: OwnedRwLockReadGuard<()>) -> Self {
        Self {
            locks: vec![lock],
            children: HashMap::new(),
            role_map: HashMap::new(),
        }
    }

    /// Indexes of chain children whose locks this guard holds.
    pub fn held_children(&self) -> Vec<usize> {
        let mut held: Vec<usize> = self.children.keys().copied().collect();
        held.sort_unstable();
        held
    }
}

/// Observer of provider change events.
pub trait MetadataObserver: Send + Sync {
    fn on_change(&self, provider_id: &str);
}

/// A locked lookup source of SAML metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Perform initial load. Providers that load lazily make this a no-op.
    async fn initialize(&self) -> Result<(), SamlError>;

    /// Acquire a read guard. Lookups and any use of returned descriptors
    /// must happen within the guard's lifetime.
    async fn lock(&self) -> ProviderGuard;

    /// Look up an entity (and role) by the criteria. Returns the first valid
    /// match; an expired instance is returned only when `valid_only` is off.
    async fn entity(
        &self,
        guard: &mut ProviderGuard,
        criteria: &LookupCriteria,
    ) -> Result<Option<EntityLookup>, SamlError>;

    /// Look up a named group.
    async fn entities_group(
        &self,
        guard: &mut ProviderGuard,
        name: &str,
        require_valid: bool,
    ) -> Result<Option<Arc<EntitiesDescriptor>>, SamlError>;

    /// Resolve credentials for a role previously returned by this provider,
    /// filtered by the criteria.
    async fn resolve(
        &self,
        guard: &ProviderGuard,
        criteria: &MetadataCredentialCriteria,
    ) -> Result<Vec<Credential>, SamlError>;

    fn add_observer(&self, observer: Arc<dyn MetadataObserver>);
}

/// Observer list shared by the observable providers.
#[derive(Default)]
pub(crate) struct Observers {
    list: std::sync::Mutex<Vec<Arc<dyn MetadataObserver>>>,
}

impl Observers {
    pub fn add(&self, observer: Arc<dyn MetadataObserver>) {
        self.list.lock().unwrap().push(observer);
    }

    pub fn emit(&self, provider_id: &str) {
        for observer in self.list.lock().unwrap().iter() {
            observer.on_change(provider_id);
        }
    }
}

/// Lazily built, change-invalidated credential cache keyed per role.
#[derive(Default)]
pub(crate) struct CredentialCache {
    map: std::sync::Mutex<HashMap<(String, usize), Vec<Credential>>>,
}

impl CredentialCache {
    /// Resolve credentials for the criteria's role, caching the full
    /// per-role set and filtering by the criteria.
    pub fn resolve(&self, criteria: &MetadataCredentialCriteria) -> Vec<Credential> {
        let role = &criteria.role;
        let key = (role.entity_id().to_string(), role.index);
        let mut map = self.map.lock().unwrap();
        let all = map.entry(key).or_insert_with(|| {
            role.role()
                .key_descriptors
                .iter()
                .filter_map(|k| Credential::from_key_descriptor(role.entity_id(), k))
                .collect()
        });
        all.iter().filter(|c| criteria.matches(c)).cloned().collect()
    }

    pub fn invalidate(&self) {
        self.map.lock().unwrap().clear();
    }
}
