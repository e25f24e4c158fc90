//! Chaining and folder metadata providers
//!
//! The chain consults an ordered list of child providers with first-match or
//! last-wins precedence. Its own lock is a no-op; instead the guard records
//! exactly which child locks a call path acquired, and which child produced
//! each entity, so unlock releases precisely those locks and credential
//! resolution dispatches to the right child.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::SamlError;
use crate::metadata::discovery::{generate_feed_tag, DiscoverableMetadata};
use crate::metadata::provider::{
    EntityLookup, LookupCriteria, MetadataObserver, MetadataProvider, Observers, ProviderGuard,
};
use crate::metadata::xml_provider::{XmlProvider, XmlProviderConfig};
use crate::model::metadata::EntitiesDescriptor;
use crate::security::{Credential, MetadataCredentialCriteria};

/// Precedence among chained children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    First,
    Last,
}

struct Child {
    provider: Arc<dyn MetadataProvider>,
    discoverable: Option<Arc<dyn DiscoverableMetadata>>,
}

/// Ordered chain of child providers.
pub struct ChainingProvider {
    id: String,
    first_match: bool,
    children: Vec<Child>,
    observers: Observers,
    feed_tag: std::sync::Mutex<String>,
}

struct ChainObserver {
    chain: Weak<ChainingProvider>,
}

impl MetadataObserver for ChainObserver {
    fn on_change(&self, _provider_id: &str) {
        if let Some(chain) = self.chain.upgrade() {
            // Reset the cache tag for the feed and propagate the event.
            *chain.feed_tag.lock().unwrap() = generate_feed_tag();
            chain.observers.emit(&chain.id);
        }
    }
}

/// Builder for a chain.
pub struct ChainingProviderBuilder {
    id: String,
    precedence: Precedence,
    children: Vec<Child>,
}

impl ChainingProviderBuilder {
    pub fn new(precedence: Precedence) -> Self {
        Self {
            id: "Chaining".to_string(),
            precedence,
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn push(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.children.push(Child {
            provider,
            discoverable: None,
        });
        self
    }

    /// Add a child that also serves a discovery feed.
    pub fn push_discoverable<P>(mut self, provider: Arc<P>) -> Self
    where
        P: MetadataProvider + DiscoverableMetadata + 'static,
    {
        self.children.push(Child {
            discoverable: Some(provider.clone()),
            provider,
        });
        self
    }

    pub fn build(self) -> Arc<ChainingProvider> {
        let chain = Arc::new(ChainingProvider {
            id: self.id,
            first_match: self.precedence == Precedence::First,
            children: self.children,
            observers: Observers::default(),
            feed_tag: std::sync::Mutex::new(generate_feed_tag()),
        });
        for child in &chain.children {
            child.provider.add_observer(Arc::new(ChainObserver {
                chain: Arc::downgrade(&chain),
            }));
        }
        chain
    }
}

impl ChainingProvider {
    /// Acquire the child's lock unless an earlier call already holds it.
    async fn lock_if(
        &self,
        index: usize,
        guard: &ProviderGuard,
        temp: &mut HashMap<usize, ProviderGuard>,
    ) {
        if !guard.children.contains_key(&index) && !temp.contains_key(&index) {
            temp.insert(index, self.children[index].provider.lock().await);
        }
    }

    /// Release the child's lock unless it was remembered by an earlier call.
    fn unlock_if(index: usize, temp: &mut HashMap<usize, ProviderGuard>) {
        temp.remove(&index);
    }

    /// Keep the child's lock for the guard's lifetime, recording the entity
    /// it produced for credential dispatch.
    fn remember(
        guard: &mut ProviderGuard,
        temp: &mut HashMap<usize, ProviderGuard>,
        index: usize,
        entity_id: Option<&str>,
    ) {
        if let Some(child_guard) = temp.remove(&index) {
            guard.children.insert(index, child_guard);
        }
        if let Some(entity_id) = entity_id {
            guard.role_map.insert(entity_id.to_string(), index);
        }
    }

    fn child_guard<'g>(
        &self,
        guard: &'g mut ProviderGuard,
        temp: &'g mut HashMap<usize, ProviderGuard>,
        index: usize,
    ) -> &'g mut ProviderGuard {
        if guard.children.contains_key(&index) {
            guard.children.get_mut(&index).unwrap()
        } else {
            temp.get_mut(&index).unwrap()
        }
    }
}

#[async_trait]
impl MetadataProvider for ChainingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<(), SamlError> {
        for child in &self.children {
            if let Err(e) = child.provider.initialize().await {
                error!(provider = child.provider.id(), error = %e, "failure initializing child MetadataProvider");
            }
        }
        *self.feed_tag.lock().unwrap() = generate_feed_tag();
        Ok(())
    }

    async fn lock(&self) -> ProviderGuard {
        // Not lockable ourselves; children are locked per call.
        ProviderGuard::empty()
    }

    async fn entity(
        &self,
        guard: &mut ProviderGuard,
        criteria: &LookupCriteria,
    ) -> Result<Option<EntityLookup>, SamlError> {
        let mut temp: HashMap<usize, ProviderGuard> = HashMap::new();
        let mut held: Option<usize> = None;
        let mut ret: Option<EntityLookup> = None;

        for index in 0..self.children.len() {
            self.lock_if(index, guard, &mut temp).await;
            let child_guard = self.child_guard(guard, &mut temp, index);
            let cur = self.children[index]
                .provider
                .entity(child_guard, criteria)
                .await?;

            let Some(cur) = cur else {
                Self::unlock_if(index, &mut temp);
                continue;
            };

            if criteria.role.is_some() {
                if cur.role.is_some() {
                    if self.first_match {
                        if let Some(h) = held.take() {
                            Self::unlock_if(h, &mut temp);
                        }
                        let entity_id = cur.entity.entity_id.clone();
                        Self::remember(guard, &mut temp, index, Some(&entity_id));
                        return Ok(Some(cur));
                    }
                    if let Some(h) = held.take() {
                        if ret.as_ref().is_some_and(|r| r.role.is_some()) {
                            warn!(
                                key = criteria.key_string(),
                                "found duplicate entity with role, using last matching copy"
                            );
                        }
                        Self::unlock_if(h, &mut temp);
                    }
                    held = Some(index);
                    ret = Some(cur);
                } else if ret.as_ref().is_some_and(|r| r.role.is_some()) {
                    // Already have a complete match; stick with it.
                    Self::unlock_if(index, &mut temp);
                } else {
                    // Entity-only result, at least as good as what we had.
                    if let Some(h) = held.take() {
                        Self::unlock_if(h, &mut temp);
                    }
                    held = Some(index);
                    ret = Some(cur);
                }
            } else {
                if self.first_match {
                    if let Some(h) = held.take() {
                        Self::unlock_if(h, &mut temp);
                    }
                    let entity_id = cur.entity.entity_id.clone();
                    Self::remember(guard, &mut temp, index, Some(&entity_id));
                    return Ok(Some(cur));
                }
                if let Some(h) = held.take() {
                    warn!(
                        key = criteria.key_string(),
                        "found duplicate entity, using last matching copy"
                    );
                    Self::unlock_if(h, &mut temp);
                }
                held = Some(index);
                ret = Some(cur);
            }
        }

        if let Some(h) = held {
            let entity_id = ret.as_ref().map(|r| r.entity.entity_id.clone());
            Self::remember(guard, &mut temp, h, entity_id.as_deref());
        }
        Ok(ret)
    }

    async fn entities_group(
        &self,
        guard: &mut ProviderGuard,
        name: &str,
        require_valid: bool,
    ) -> Result<Option<Arc<EntitiesDescriptor>>, SamlError> {
        let mut temp: HashMap<usize, ProviderGuard> = HashMap::new();
        let mut held: Option<usize> = None;
        let mut ret: Option<Arc<EntitiesDescriptor>> = None;

        for index in 0..self.children.len() {
            self.lock_if(index, guard, &mut temp).await;
            let child_guard = self.child_guard(guard, &mut temp, index);
            let cur = self.children[index]
                .provider
                .entities_group(child_guard, name, require_valid)
                .await?;

            match cur {
                Some(group) => {
                    if self.first_match {
                        Self::remember(guard, &mut temp, index, None);
                        return Ok(Some(group));
                    }
                    if let Some(h) = held.take() {
                        warn!(name, "found duplicate group, using last matching copy");
                        Self::unlock_if(h, &mut temp);
                    }
                    held = Some(index);
                    ret = Some(group);
                }
                None => Self::unlock_if(index, &mut temp),
            }
        }

        if let Some(h) = held {
            Self::remember(guard, &mut temp, h, None);
        }
        Ok(ret)
    }

    async fn resolve(
        &self,
        guard: &ProviderGuard,
        criteria: &MetadataCredentialCriteria,
    ) -> Result<Vec<Credential>, SamlError> {
        let entity_id = criteria.role.entity_id();
        let index = guard.role_map.get(entity_id).ok_or_else(|| {
            SamlError::Metadata(
                "no record of corresponding child provider for the supplied role".to_string(),
            )
        })?;
        let child_guard = guard.children.get(index).ok_or_else(|| {
            SamlError::Metadata("child provider for the supplied role is not locked".to_string())
        })?;
        self.children[*index]
            .provider
            .resolve(child_guard, criteria)
            .await
    }

    fn add_observer(&self, observer: Arc<dyn MetadataObserver>) {
        self.observers.add(observer);
    }
}

impl DiscoverableMetadata for ChainingProvider {
    /// Merge the children's feeds into one array.
    fn feed(&self) -> Option<String> {
        let mut entries: Vec<serde_json::Value> = Vec::new();
        for child in &self.children {
            if let Some(feed) = child.discoverable.as_ref().and_then(|d| d.feed()) {
                if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(&feed) {
                    entries.extend(items);
                }
            }
        }
        serde_json::to_string_pretty(&entries).ok()
    }

    fn feed_tag(&self) -> Option<String> {
        Some(self.feed_tag.lock().unwrap().clone())
    }
}

/// Build a chain out of one XML provider per file in a directory, recursing
/// into subdirectories.
pub struct FolderProvider;

impl FolderProvider {
    pub fn build(directory: impl AsRef<Path>) -> Result<Arc<ChainingProvider>, SamlError> {
        let mut files = Vec::new();
        collect_files(directory.as_ref(), &mut files)?;
        files.sort();

        let mut builder =
            ChainingProviderBuilder::new(Precedence::First).with_id("Folder".to_string());
        for file in files {
            info!(path = %file.display(), "adding XML provider for folder member");
            let config = XmlProviderConfig::for_source(file.to_string_lossy().to_string());
            builder = builder.push_discoverable(Arc::new(XmlProvider::new(config)?));
        }
        Ok(builder.build())
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SamlError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.starts_with('.'))
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_xml(id: &str) -> String {
        format!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/>
</md:EntityDescriptor>"#,
            id
        )
    }

    async fn file_provider(id: &str) -> (Arc<XmlProvider>, PathBuf) {
        let path = std::env::temp_dir().join(format!("saml-core-chain-{}.xml", uuid::Uuid::new_v4()));
        std::fs::write(&path, entity_xml(id)).unwrap();
        let provider = Arc::new(
            XmlProvider::new(XmlProviderConfig::for_source(path.to_string_lossy().to_string()))
                .unwrap(),
        );
        provider.initialize().await.unwrap();
        (provider, path)
    }

    #[tokio::test]
    async fn test_first_match_holds_only_first_child_lock() {
        let (p1, f1) = file_provider("https://idp.example.org").await;
        let (p2, f2) = file_provider("https://idp.example.org").await;

        let chain = ChainingProviderBuilder::new(Precedence::First)
            .push(p1.clone())
            .push(p2.clone())
            .build();

        let mut guard = chain.lock().await;
        let lookup = chain
            .entity(&mut guard, &LookupCriteria::entity_id("https://idp.example.org"))
            .await
            .unwrap();
        assert!(lookup.is_some());

        // Only the first child's lock is held at unlock time.
        assert_eq!(guard.held_children(), vec![0]);
        drop(guard);

        std::fs::remove_file(f1).ok();
        std::fs::remove_file(f2).ok();
    }

    #[tokio::test]
    async fn test_miss_releases_all_child_locks() {
        let (p1, f1) = file_provider("https://a.example.org").await;
        let (p2, f2) = file_provider("https://b.example.org").await;

        let chain = ChainingProviderBuilder::new(Precedence::First)
            .push(p1)
            .push(p2)
            .build();

        let mut guard = chain.lock().await;
        let lookup = chain
            .entity(&mut guard, &LookupCriteria::entity_id("https://missing.example.org"))
            .await
            .unwrap();
        assert!(lookup.is_none());
        assert!(guard.held_children().is_empty());
        drop(guard);

        std::fs::remove_file(f1).ok();
        std::fs::remove_file(f2).ok();
    }

    #[tokio::test]
    async fn test_last_precedence_wins() {
        let (p1, f1) = file_provider("https://idp.example.org").await;
        let (p2, f2) = file_provider("https://idp.example.org").await;

        let chain = ChainingProviderBuilder::new(Precedence::Last)
            .push(p1)
            .push(p2)
            .build();

        let mut guard = chain.lock().await;
        let lookup = chain
            .entity(&mut guard, &LookupCriteria::entity_id("https://idp.example.org"))
            .await
            .unwrap();
        assert!(lookup.is_some());
        assert_eq!(guard.held_children(), vec![1]);
        drop(guard);

        std::fs::remove_file(f1).ok();
        std::fs::remove_file(f2).ok();
    }

    #[tokio::test]
    async fn test_folder_provider_builds_chain() {
        let dir = std::env::temp_dir().join(format!("saml-core-folder-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("a.xml"), entity_xml("https://a.example.org")).unwrap();
        std::fs::write(
            dir.join("sub/b.xml"),
            entity_xml("https://b.example.org"),
        )
        .unwrap();

        let chain = FolderProvider::build(&dir).unwrap();
        chain.initialize().await.unwrap();

        let mut guard = chain.lock().await;
        for id in ["https://a.example.org", "https://b.example.org"] {
            assert!(chain
                .entity(&mut guard, &LookupCriteria::entity_id(id))
                .await
                .unwrap()
                .is_some());
        }
        drop(guard);

        std::fs::remove_dir_all(dir).ok();
    }
}
