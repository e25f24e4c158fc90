//! Null metadata provider
//!
//! Synthesizes an entity for any queried entityID from a configured
//! template. Useful for deployments that accept arbitrary peers with a
//! fixed role shape; there is nothing to refresh.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::SamlError;
use crate::metadata::provider::{
    CredentialCache, EntityLookup, LookupCriteria, LookupKey, MetadataObserver, MetadataProvider,
    Observers, ProviderGuard,
};
use crate::model::metadata::{EntitiesDescriptor, EntityDescriptor, RoleRef};
use crate::security::{Credential, MetadataCredentialCriteria};

pub struct NullProvider {
    template: EntityDescriptor,
    gate: Arc<RwLock<()>>,
    observers: Observers,
    credentials: CredentialCache,
}

impl NullProvider {
    /// The template's entityID is ignored; every lookup stamps the queried
    /// name onto a fresh copy.
    pub fn new(template: EntityDescriptor) -> Self {
        Self {
            template,
            gate: Arc::new(RwLock::new(())),
            observers: Observers::default(),
            credentials: CredentialCache::default(),
        }
    }
}

#[async_trait]
impl MetadataProvider for NullProvider {
    fn id(&self) -> &str {
        "Null"
    }

    async fn initialize(&self) -> Result<(), SamlError> {
        Ok(())
    }

    async fn lock(&self) -> ProviderGuard {
        ProviderGuard::single(self.gate.clone().read_owned().await)
    }

    async fn entity(
        &self,
        _guard: &mut ProviderGuard,
        criteria: &LookupCriteria,
    ) -> Result<Option<EntityLookup>, SamlError> {
        let LookupKey::EntityId(ref entity_id) = criteria.key else {
            return Ok(None);
        };

        let mut entity = self.template.clone();
        entity.entity_id = entity_id.clone();
        let entity = Arc::new(entity);

        let role = match (&criteria.role, criteria.protocol.as_deref()) {
            (Some(role_type), Some(protocol)) => entity
                .role_descriptor(role_type, protocol)
                .or_else(|| {
                    criteria
                        .protocol2
                        .as_deref()
                        .and_then(|p2| entity.role_descriptor(role_type, p2))
                })
                .map(|(index, _)| RoleRef::new(entity.clone(), index)),
            _ => None,
        };

        Ok(Some(EntityLookup { entity, role }))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::consts;
    use crate::model::metadata::{RoleDescriptor, RoleType};

    #[tokio::test]
    async fn test_synthesizes_entity_from_template() {
        let template = EntityDescriptor {
            entity_id: "urn:template".to_string(),
            roles: vec![RoleDescriptor {
                role_type: Some(RoleType::IdpSso),
                protocol_support_enumeration: consts::SAML20P_PROTOCOL_ENUM.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let provider = NullProvider::new(template);

        let criteria = LookupCriteria::entity_id("https://anything.example.org")
            .with_role(RoleType::IdpSso, consts::SAML20P_PROTOCOL_ENUM);
        let mut guard = provider.lock().await;
        let lookup = provider.entity(&mut guard, &criteria).await.unwrap().unwrap();
        assert_eq!(lookup.entity.entity_id, "https://anything.example.org");
        assert!(lookup.role.is_some());
    }
}
