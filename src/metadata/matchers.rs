//! Entity matchers
//!
//! Pluggable predicates over an entity and its enclosing groups, used by the
//! include/exclude filters and the injection filters to decide which
//! entities a rule applies to.

use std::collections::HashSet;

use crate::model::metadata::{EntitiesDescriptor, EntityAttributes, EntityDescriptor};
use crate::model::saml::Attribute;

/// Ancestor group information carried down while a filter walks the tree.
#[derive(Debug, Clone, Default)]
pub struct GroupContext {
    pub name: Option<String>,
    pub entity_attributes: Option<EntityAttributes>,
    pub registration_authority: Option<String>,
}

impl GroupContext {
    pub fn of(group: &EntitiesDescriptor) -> Self {
        Self {
            name: group.name.clone(),
            entity_attributes: group
                .extensions
                .as_ref()
                .and_then(|e| e.entity_attributes.clone()),
            registration_authority: group
                .extensions
                .as_ref()
                .and_then(|e| e.registration_info.as_ref())
                .map(|r| r.registration_authority.clone()),
        }
    }
}

/// The entity under consideration plus its enclosing group chain, outermost
/// first.
pub struct MatchContext<'a> {
    pub entity: &'a EntityDescriptor,
    pub ancestors: &'a [GroupContext],
}

/// Predicate over entities for include/exclude decisions.
pub trait EntityMatcher: Send + Sync {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool;
}

/// Match an entityID or any enclosing group name.
pub struct NameMatcher {
    pub name: String,
}

impl EntityMatcher for NameMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        if ctx.entity.entity_id == self.name {
            return true;
        }
        ctx.ancestors
            .iter()
            .any(|g| g.name.as_deref() == Some(self.name.as_str()))
    }
}

/// Match when every value of every configured attribute is present in an
/// EntityAttributes extension of the entity or an enclosing group.
pub struct EntityAttributesMatcher {
    pub attributes: Vec<Attribute>,
    /// Trim whitespace around candidate values before comparing.
    pub trim_tags: bool,
}

impl EntityAttributesMatcher {
    fn attribute_satisfied(&self, required: &Attribute, ctx: &MatchContext<'_>) -> bool {
        let mut candidates: Vec<&EntityAttributes> = Vec::new();
        if let Some(ext) = ctx.entity.extensions.as_ref() {
            if let Some(ea) = ext.entity_attributes.as_ref() {
                candidates.push(ea);
            }
        }
        for group in ctx.ancestors {
            if let Some(ea) = group.entity_attributes.as_ref() {
                candidates.push(ea);
            }
        }

        required.values.iter().all(|wanted| {
            candidates.iter().any(|ea| {
                ea.attributes.iter().any(|tag| {
                    tag.name == required.name
                        && tag.effective_name_format() == required.effective_name_format()
                        && tag.values.iter().any(|value| {
                            if self.trim_tags {
                                value.trim() == wanted
                            } else {
                                value == wanted
                            }
                        })
                })
            })
        })
    }
}

impl EntityMatcher for EntityAttributesMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        !self.attributes.is_empty()
            && self
                .attributes
                .iter()
                .all(|required| self.attribute_satisfied(required, ctx))
    }
}

/// Match when the registration authority of the entity or any enclosing
/// group is in the configured set.
pub struct RegistrationAuthorityMatcher {
    pub authorities: HashSet<String>,
}

impl EntityMatcher for RegistrationAuthorityMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        let entity_authority = ctx
            .entity
            .extensions
            .as_ref()
            .and_then(|e| e.registration_info.as_ref())
            .map(|r| r.registration_authority.as_str());
        if let Some(authority) = entity_authority {
            if self.authorities.contains(authority) {
                return true;
            }
        }
        ctx.ancestors.iter().any(|g| {
            g.registration_authority
                .as_deref()
                .is_some_and(|a| self.authorities.contains(a))
        })
    }
}
