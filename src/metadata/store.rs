//! Metadata index store
//!
//! On load a provider walks the tree and builds three string-keyed maps:
//! entityID to entity, artifact source to entity, and group name to group.
//! Each entity's effective validUntil is the minimum of its own and every
//! enclosing group's, pushed down during indexing; the smallest validity
//! found anywhere is lifted back up to drive the refresh schedule.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::metadata::provider::{EntityLookup, LookupCriteria, LookupKey};
use crate::model::consts;
use crate::model::metadata::{
    EntitiesDescriptor, EntityDescriptor, MetadataRoot, RoleRef, RoleType,
};

/// Lowercase hex SHA-1 of an entityID, the artifact source form.
pub fn sha1_hex(value: &str) -> String {
    hex::encode(Sha1::digest(value.as_bytes()))
}

/// Indexed view over one loaded metadata instance.
#[derive(Default)]
pub struct MetadataStore {
    sites: HashMap<String, Vec<Arc<EntityDescriptor>>>,
    sources: HashMap<String, Vec<Arc<EntityDescriptor>>>,
    groups: HashMap<String, Vec<Arc<EntitiesDescriptor>>>,
    /// Tightest validUntil seen across the tree, for refresh scheduling.
    pub last_valid_until: Option<DateTime<Utc>>,
    /// Root cacheDuration, the other refresh-interval constraint.
    pub root_cache_duration: Option<chrono::Duration>,
}

impl MetadataStore {
    /// Index a loaded tree. validUntil fences are propagated while the tree
    /// is still mutable, then descriptors are frozen behind Arcs.
    pub fn build(root: MetadataRoot) -> Self {
        let mut store = MetadataStore::default();
        store.root_cache_duration = root.cache_duration();
        match root {
            MetadataRoot::Entity(mut entity) => {
                let mut fence = None;
                propagate_entity(&mut entity, &mut fence);
                store.last_valid_until = fence;
                store.index_entity(Arc::new(entity));
            }
            MetadataRoot::Entities(mut group) => {
                let mut fence = None;
                propagate_group(&mut group, &mut fence);
                store.last_valid_until = fence;
                store.index_group(&group);
                // Arc the propagated groups for name lookups.
                store.index_group_names(Arc::new(group));
            }
        }
        store
    }

    /// Index a single entity, replacing any prior copies of the same
    /// entityID (and their artifact sources).
    pub fn index_replacing(&mut self, entity: EntityDescriptor) -> Arc<EntityDescriptor> {
        let mut entity = entity;
        let mut fence = None;
        propagate_entity(&mut entity, &mut fence);
        let arc = Arc::new(entity);

        if let Some(existing) = self.sites.remove(&arc.entity_id) {
            self.sources.retain(|_, entities| {
                entities.retain(|e| !existing.iter().any(|old| Arc::ptr_eq(old, e)));
                !entities.is_empty()
            });
        }
        self.index_entity(arc.clone());
        arc
    }

    fn index_entity(&mut self, entity: Arc<EntityDescriptor>) {
        self.sites
            .entry(entity.entity_id.clone())
            .or_default()
            .push(entity.clone());

        let hashed = sha1_hex(&entity.entity_id);
        for role in entity.idp_sso_roles() {
            if role.has_support(consts::SAML10_PROTOCOL_ENUM)
                || role.has_support(consts::SAML11_PROTOCOL_ENUM)
            {
                if let Some(source_id) = role
                    .extensions
                    .as_ref()
                    .and_then(|e| e.source_id.as_ref())
                {
                    self.sources
                        .entry(hex::encode(source_id))
                        .or_default()
                        .push(entity.clone());
                }
                self.sources
                    .entry(hashed.clone())
                    .or_default()
                    .push(entity.clone());
                for ars in &role.artifact_resolution_services {
                    if !ars.endpoint.location.is_empty() {
                        self.sources
                            .entry(ars.endpoint.location.clone())
                            .or_default()
                            .push(entity.clone());
                    }
                }
            }
            if role.has_support(consts::SAML20P_PROTOCOL_ENUM) {
                self.sources
                    .entry(hashed.clone())
                    .or_default()
                    .push(entity.clone());
            }
        }
    }

    fn index_group(&mut self, group: &EntitiesDescriptor) {
        for child in &group.groups {
            self.index_group(child);
        }
        for entity in &group.entities {
            self.index_entity(Arc::new(entity.clone()));
        }
    }

    fn index_group_names(&mut self, group: Arc<EntitiesDescriptor>) {
        for child in group.groups.iter() {
            self.index_group_names(Arc::new(child.clone()));
        }
        if let Some(ref name) = group.name {
            self.groups.entry(name.clone()).or_default().push(group);
        }
    }

    /// Entity lookup honoring validity and role criteria. The first valid
    /// candidate wins; failing that the most recent expired instance is
    /// returned (logged) unless `valid_only` is set.
    pub fn lookup_entity(&self, criteria: &LookupCriteria, now: DateTime<Utc>) -> Option<EntityLookup> {
        let candidates = match &criteria.key {
            LookupKey::EntityId(id) => self.sites.get(id),
            LookupKey::ArtifactSource(source) => self.sources.get(source),
        }?;

        let mut found = candidates
            .iter()
            .find(|e| e.valid_until.map_or(true, |v| now < v))
            .cloned();

        if found.is_none() {
            if criteria.valid_only {
                warn!(key = criteria.key_string(), "ignored expired metadata instance");
                return None;
            }
            info!(
                key = criteria.key_string(),
                "no valid metadata found, returning expired instance"
            );
            found = candidates.last().cloned();
        }

        let entity = found?;
        let role = match (&criteria.role, &criteria.protocol) {
            (Some(role_type), Some(protocol)) => {
                let matched = entity
                    .role_descriptor(role_type, protocol)
                    .or_else(|| {
                        criteria
                            .protocol2
                            .as_deref()
                            .and_then(|p2| entity.role_descriptor(role_type, p2))
                    })
                    .map(|(index, _)| RoleRef::new(entity.clone(), index));
                matched
            }
            _ => None,
        };

        Some(EntityLookup { entity, role })
    }

    /// Group lookup by name.
    pub fn lookup_group(
        &self,
        name: &str,
        require_valid: bool,
        now: DateTime<Utc>,
    ) -> Option<Arc<EntitiesDescriptor>> {
        let candidates = self.groups.get(name)?;
        let valid = candidates
            .iter()
            .find(|g| g.valid_until.map_or(true, |v| now < v))
            .cloned();
        if valid.is_some() {
            return valid;
        }
        if require_valid {
            warn!(name, "ignored expired metadata group");
            None
        } else {
            info!(name, "no valid metadata found, returning expired metadata group");
            candidates.last().cloned()
        }
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.sites.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Push the enclosing fence down into an entity (and its roles), lifting the
/// tighter of the two back into the fence.
fn propagate_entity(entity: &mut EntityDescriptor, fence: &mut Option<DateTime<Utc>>) {
    match (*fence, entity.valid_until) {
        (Some(f), Some(v)) if f < v => entity.valid_until = Some(f),
        (Some(f), None) => entity.valid_until = Some(f),
        (_, v) => *fence = v.or(*fence),
    }
    if let Some(v) = entity.valid_until {
        *fence = Some(match *fence {
            Some(f) if f < v => f,
            _ => v,
        });
    }
    for role in &mut entity.roles {
        if let (Some(entity_vu), Some(role_vu)) = (entity.valid_until, role.valid_until) {
            if entity_vu < role_vu {
                role.valid_until = Some(entity_vu);
            }
        } else if role.valid_until.is_none() {
            role.valid_until = entity.valid_until;
        }
    }
}

/// Group recursion: each child sees the current fence, and the smallest
/// validity found among the children is passed back up.
fn propagate_group(group: &mut EntitiesDescriptor, fence: &mut Option<DateTime<Utc>>) {
    match (*fence, group.valid_until) {
        (Some(f), Some(v)) if f < v => group.valid_until = Some(f),
        (Some(f), None) => group.valid_until = Some(f),
        _ => {}
    }
    if group.valid_until.is_some() && fence.map_or(true, |f| group.valid_until.unwrap() < f) {
        *fence = group.valid_until;
    }

    let mut min_child: Option<DateTime<Utc>> = *fence;
    for child in &mut group.groups {
        let mut sub = *fence;
        propagate_group(child, &mut sub);
        min_child = min_opt(min_child, sub);
    }
    for entity in &mut group.entities {
        let mut sub = *fence;
        propagate_entity(entity, &mut sub);
        min_child = min_opt(min_child, sub);
    }
    if let Some(min) = min_child {
        if fence.map_or(true, |f| min < f) {
            *fence = Some(min);
        }
    }
}

fn min_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (x, None) => x,
        (None, y) => y,
    }
}
