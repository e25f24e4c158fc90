//! Metadata filters
//!
//! Filters run in registration order after a load and before indexing. Each
//! mutates the tree in place or rejects the whole instance. Removal of the
//! root (or the only entity) is always an error rather than a silent empty
//! result.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::SamlError;
use crate::metadata::matchers::{EntityMatcher, GroupContext, MatchContext};
use crate::model::metadata::{
    EntitiesDescriptor, EntityAttributes, EntityDescriptor, Extensions, MetadataRoot, RoleType,
    UiInfo,
};
use crate::model::saml::Attribute;
use crate::security::{Credential, ExplicitKeyTrustEngine, SignatureTrustEngine};

/// Context handed to filters alongside the tree.
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    /// True when the instance was loaded from a backup file rather than the
    /// authoritative source.
    pub is_backup: bool,
}

/// A mutation or rejection pass over a loaded metadata instance.
pub trait MetadataFilter: Send + Sync {
    fn id(&self) -> &str;

    fn filter(&self, ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError>;
}

/// Run filters in order.
pub fn apply_filters(
    filters: &[Box<dyn MetadataFilter>],
    ctx: &FilterContext,
    root: &mut MetadataRoot,
) -> Result<(), SamlError> {
    for filter in filters {
        info!(filter = filter.id(), "applying metadata filter");
        filter.filter(ctx, root)?;
    }
    Ok(())
}

// ---------- Include / Exclude ----------

/// Keep only matching entities (the legacy Whitelist filter).
pub struct IncludeFilter {
    pub entities: HashSet<String>,
    pub matchers: Vec<Box<dyn EntityMatcher>>,
}

/// Remove matching entities (the legacy Blacklist filter).
pub struct ExcludeFilter {
    pub entities: HashSet<String>,
    pub matchers: Vec<Box<dyn EntityMatcher>>,
}

fn selected(
    entities: &HashSet<String>,
    matchers: &[Box<dyn EntityMatcher>],
    entity: &EntityDescriptor,
    ancestors: &[GroupContext],
) -> bool {
    if !entities.is_empty() && entities.contains(&entity.entity_id) {
        return true;
    }
    let ctx = MatchContext { entity, ancestors };
    matchers.iter().any(|m| m.matches(&ctx))
}

fn filter_group_entities<F>(group: &mut EntitiesDescriptor, ancestors: &mut Vec<GroupContext>, keep: &F)
where
    F: Fn(&EntityDescriptor, &[GroupContext]) -> bool,
{
    ancestors.push(GroupContext::of(group));
    group.entities.retain(|entity| {
        let kept = keep(entity, ancestors);
        if !kept {
            info!(entity_id = %entity.entity_id, "filtering out entity");
        }
        kept
    });
    for child in &mut group.groups {
        filter_group_entities(child, ancestors, keep);
    }
    ancestors.pop();
}

impl MetadataFilter for IncludeFilter {
    fn id(&self) -> &str {
        "Include"
    }

    fn filter(&self, _ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        match root {
            MetadataRoot::Entities(group) => {
                let mut ancestors = Vec::new();
                filter_group_entities(group, &mut ancestors, &|entity, groups| {
                    selected(&self.entities, &self.matchers, entity, groups)
                });
                Ok(())
            }
            MetadataRoot::Entity(entity) => {
                if selected(&self.entities, &self.matchers, entity, &[]) {
                    Ok(())
                } else {
                    Err(SamlError::MetadataFilter(
                        "Include filter instructed to filter the root/only entity in the metadata"
                            .to_string(),
                    ))
                }
            }
        }
    }
}

impl MetadataFilter for ExcludeFilter {
    fn id(&self) -> &str {
        "Exclude"
    }

    fn filter(&self, _ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        match root {
            MetadataRoot::Entities(group) => {
                let mut ancestors = Vec::new();
                filter_group_entities(group, &mut ancestors, &|entity, groups| {
                    !selected(&self.entities, &self.matchers, entity, groups)
                });
                Ok(())
            }
            MetadataRoot::Entity(entity) => {
                if selected(&self.entities, &self.matchers, entity, &[]) {
                    Err(SamlError::MetadataFilter(
                        "Exclude filter instructed to filter the root/only entity in the metadata"
                            .to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

// ---------- Entity role whitelist ----------

/// Remove role descriptors not in the retained set, then optionally entities
/// left without roles and groups left empty.
pub struct EntityRoleFilter {
    pub retained_roles: HashSet<RoleType>,
    pub remove_roleless_entities: bool,
    pub remove_empty_groups: bool,
}

impl EntityRoleFilter {
    fn filter_entity(&self, entity: &mut EntityDescriptor) {
        entity.roles.retain(|role| {
            role.role_type
                .as_ref()
                .is_some_and(|t| self.retained_roles.contains(t))
        });
    }

    fn filter_group(&self, group: &mut EntitiesDescriptor) {
        for entity in &mut group.entities {
            self.filter_entity(entity);
        }
        if self.remove_roleless_entities {
            group.entities.retain(|entity| {
                let keep = !entity.roles.is_empty();
                if !keep {
                    debug!(entity_id = %entity.entity_id, "filtering out role-less entity");
                }
                keep
            });
        }
        for child in &mut group.groups {
            self.filter_group(child);
        }
        if self.remove_empty_groups {
            group.groups.retain(|child| {
                let keep = !(child.entities.is_empty() && child.groups.is_empty());
                if !keep {
                    debug!(
                        name = child.name.as_deref().unwrap_or("unnamed"),
                        "filtering out empty group"
                    );
                }
                keep
            });
        }
    }
}

impl MetadataFilter for EntityRoleFilter {
    fn id(&self) -> &str {
        "EntityRoleWhiteList"
    }

    fn filter(&self, _ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        match root {
            MetadataRoot::Entities(group) => self.filter_group(group),
            MetadataRoot::Entity(entity) => self.filter_entity(entity),
        }
        Ok(())
    }
}

// ---------- Signature ----------

/// Require a valid enveloped signature on the root, optionally on each
/// child, dropping children that fail. Skipped on backup loads when
/// `verify_backup` is off.
pub struct SignatureFilter {
    /// Trust anchors the signatures must verify against.
    pub credentials: Vec<Credential>,
    pub verify_roles: bool,
    pub verify_backup: bool,
}

impl SignatureFilter {
    fn verify(&self, signature: &crate::model::xmlsec::Signature, id: Option<&str>) -> bool {
        ExplicitKeyTrustEngine::new()
            .validate_signature(signature, id, &self.credentials)
            .unwrap_or(false)
    }

    fn filter_entity(&self, entity: &mut EntityDescriptor) -> bool {
        if let Some(ref signature) = entity.signature {
            if !self.verify(signature, entity.id.as_deref()) {
                warn!(entity_id = %entity.entity_id, "dropping entity with invalid signature");
                return false;
            }
        }
        if self.verify_roles {
            entity.roles.retain(|role| {
                role.signature.as_ref().map_or(true, |sig| {
                    let ok = self.verify(sig, None);
                    if !ok {
                        warn!("dropping role with invalid signature");
                    }
                    ok
                })
            });
        }
        true
    }

    fn filter_group(&self, group: &mut EntitiesDescriptor) {
        group.entities.retain_mut(|entity| self.filter_entity(entity));
        for child in &mut group.groups {
            if let Some(ref signature) = child.signature {
                if !self.verify(signature, child.id.as_deref()) {
                    warn!(
                        name = child.name.as_deref().unwrap_or("unnamed"),
                        "clearing group with invalid signature"
                    );
                    child.entities.clear();
                    child.groups.clear();
                    continue;
                }
            }
            self.filter_group(child);
        }
    }
}

impl MetadataFilter for SignatureFilter {
    fn id(&self) -> &str {
        "Signature"
    }

    fn filter(&self, ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        if ctx.is_backup && !self.verify_backup {
            debug!("skipping signature verification of backup metadata");
            return Ok(());
        }

        let (signature, id) = match root {
            MetadataRoot::Entity(entity) => (entity.signature.clone(), entity.id.clone()),
            MetadataRoot::Entities(group) => (group.signature.clone(), group.id.clone()),
        };
        let Some(signature) = signature else {
            return Err(SamlError::MetadataFilter(
                "metadata instance was unsigned, instance will be filtered".to_string(),
            ));
        };
        if !self.verify(&signature, id.as_deref()) {
            return Err(SamlError::MetadataFilter(
                "unable to verify signature of metadata instance".to_string(),
            ));
        }

        match root {
            MetadataRoot::Entity(entity) => {
                if self.verify_roles {
                    self.filter_entity(entity);
                }
                Ok(())
            }
            MetadataRoot::Entities(group) => {
                self.filter_group(group);
                Ok(())
            }
        }
    }
}

// ---------- RequireValidUntil ----------

/// Reject instances whose root lacks validUntil or promises validity beyond
/// the acceptable interval.
pub struct RequireValidUntilFilter {
    pub max_validity_interval: Duration,
}

impl MetadataFilter for RequireValidUntilFilter {
    fn id(&self) -> &str {
        "RequireValidUntil"
    }

    fn filter(&self, _ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        let Some(valid_until) = root.valid_until() else {
            return Err(SamlError::MetadataFilter(
                "metadata instance lacks a validUntil attribute".to_string(),
            ));
        };
        if valid_until - Utc::now() > self.max_validity_interval {
            return Err(SamlError::MetadataFilter(
                "metadata validity interval exceeds the acceptable maximum".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------- EntityAttributes injection ----------

/// Inject tag attributes into matched entities' Extensions.
pub struct EntityAttributesFilter {
    pub rules: Vec<(Box<dyn EntityMatcher>, Vec<Attribute>)>,
}

impl EntityAttributesFilter {
    fn apply(&self, entity: &mut EntityDescriptor, ancestors: &[GroupContext]) {
        let matched: Vec<&Vec<Attribute>> = self
            .rules
            .iter()
            .filter(|(matcher, _)| {
                matcher.matches(&MatchContext {
                    entity,
                    ancestors,
                })
            })
            .map(|(_, tags)| tags)
            .collect();
        if matched.is_empty() {
            return;
        }

        let extensions = entity.extensions.get_or_insert_with(Extensions::default);
        let container = extensions
            .entity_attributes
            .get_or_insert_with(EntityAttributes::default);
        for tags in matched {
            for tag in tags {
                if let Some(existing) = container.attributes.iter_mut().find(|a| {
                    a.name == tag.name
                        && a.effective_name_format() == tag.effective_name_format()
                }) {
                    for value in &tag.values {
                        if !existing.values.contains(value) {
                            existing.values.push(value.clone());
                        }
                    }
                } else {
                    container.attributes.push(tag.clone());
                }
            }
        }
    }

    fn walk(&self, group: &mut EntitiesDescriptor, ancestors: &mut Vec<GroupContext>) {
        ancestors.push(GroupContext::of(group));
        for entity in &mut group.entities {
            self.apply(entity, ancestors);
        }
        for child in &mut group.groups {
            self.walk(child, ancestors);
        }
        ancestors.pop();
    }
}

impl MetadataFilter for EntityAttributesFilter {
    fn id(&self) -> &str {
        "EntityAttributes"
    }

    fn filter(&self, _ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        match root {
            MetadataRoot::Entity(entity) => self.apply(entity, &[]),
            MetadataRoot::Entities(group) => {
                let mut ancestors = Vec::new();
                self.walk(group, &mut ancestors);
            }
        }
        Ok(())
    }
}

// ---------- UIInfo injection ----------

/// Inject a UIInfo extension into matched entities' IdP roles.
pub struct UiInfoFilter {
    pub rules: Vec<(Box<dyn EntityMatcher>, UiInfo)>,
    /// Evict an existing UIInfo instead of leaving it in place.
    pub replace: bool,
}

impl UiInfoFilter {
    fn apply(&self, entity: &mut EntityDescriptor, ancestors: &[GroupContext]) {
        let matched: Vec<&UiInfo> = self
            .rules
            .iter()
            .filter(|(matcher, _)| matcher.matches(&MatchContext { entity, ancestors }))
            .map(|(_, ui)| ui)
            .collect();
        let Some(ui) = matched.first() else {
            return;
        };

        for role in &mut entity.roles {
            if role.role_type != Some(RoleType::IdpSso) {
                continue;
            }
            let extensions = role.extensions.get_or_insert_with(Extensions::default);
            if extensions.ui_info.is_some() && !self.replace {
                continue;
            }
            extensions.ui_info = Some((*ui).clone());
        }
    }

    fn walk(&self, group: &mut EntitiesDescriptor, ancestors: &mut Vec<GroupContext>) {
        ancestors.push(GroupContext::of(group));
        for entity in &mut group.entities {
            self.apply(entity, ancestors);
        }
        for child in &mut group.groups {
            self.walk(child, ancestors);
        }
        ancestors.pop();
    }
}

impl MetadataFilter for UiInfoFilter {
    fn id(&self) -> &str {
        "UIInfo"
    }

    fn filter(&self, _ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        match root {
            MetadataRoot::Entity(entity) => self.apply(entity, &[]),
            MetadataRoot::Entities(group) => {
                let mut ancestors = Vec::new();
                self.walk(group, &mut ancestors);
            }
        }
        Ok(())
    }
}

// ---------- Inline logo stripping ----------

/// Strip data: URL logos out of UIInfo extensions.
#[derive(Default)]
pub struct InlineLogoFilter;

impl InlineLogoFilter {
    fn strip(extensions: &mut Option<Extensions>) {
        if let Some(ui) = extensions.as_mut().and_then(|e| e.ui_info.as_mut()) {
            ui.logos.retain(|logo| {
                let keep = !logo.value.trim_start().starts_with("data:");
                if !keep {
                    debug!("removing inline data: logo from UIInfo");
                }
                keep
            });
        }
    }

    fn filter_entity(entity: &mut EntityDescriptor) {
        Self::strip(&mut entity.extensions);
        for role in &mut entity.roles {
            Self::strip(&mut role.extensions);
        }
    }

    fn filter_group(group: &mut EntitiesDescriptor) {
        for entity in &mut group.entities {
            Self::filter_entity(entity);
        }
        for child in &mut group.groups {
            Self::filter_group(child);
        }
    }
}

impl MetadataFilter for InlineLogoFilter {
    fn id(&self) -> &str {
        "InlineLogo"
    }

    fn filter(&self, _ctx: &FilterContext, root: &mut MetadataRoot) -> Result<(), SamlError> {
        match root {
            MetadataRoot::Entity(entity) => Self::filter_entity(entity),
            MetadataRoot::Entities(group) => Self::filter_group(group),
        }
        Ok(())
    }
}
