//! SAML metadata data model
//!
//! Beans for EntityDescriptor trees and their role descriptors, plus the
//! capability traits (time-bound, cacheable, signable) the providers and
//! filters operate through. Ownership is a plain tree: entities own roles,
//! groups own entities; back-references are expressed as index lookups via
//! [`RoleRef`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;

use crate::model::saml::Attribute;
use crate::model::xmlsec::{KeyInfo, Signature};

/// A string with an optional xml:lang tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedString {
    pub value: String,
    pub lang: Option<String>,
}

/// An unindexed protocol endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub binding: String,
    pub location: String,
    pub response_location: Option<String>,
}

/// An indexed endpoint (e.g. AssertionConsumerService, ArtifactResolutionService).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedEndpoint {
    pub endpoint: Endpoint,
    pub index: Option<u16>,
    pub is_default: Option<bool>,
}

/// Lookup over a set of unindexed endpoints.
pub struct EndpointManager<'a, T> {
    endpoints: &'a [T],
    binding: fn(&T) -> &str,
}

impl<'a, T> EndpointManager<'a, T> {
    pub fn new(endpoints: &'a [T], binding: fn(&T) -> &str) -> Self {
        Self { endpoints, binding }
    }

    /// First endpoint supporting the given binding.
    pub fn by_binding(&self, binding: &str) -> Option<&'a T> {
        self.endpoints.iter().find(|e| (self.binding)(e) == binding)
    }
}

/// Lookup over indexed endpoints, memoizing the default endpoint.
pub struct IndexedEndpointManager<'a> {
    endpoints: &'a [IndexedEndpoint],
    default: OnceCell<Option<usize>>,
}

impl<'a> IndexedEndpointManager<'a> {
    pub fn new(endpoints: &'a [IndexedEndpoint]) -> Self {
        Self {
            endpoints,
            default: OnceCell::new(),
        }
    }

    /// The default endpoint: the one flagged isDefault, else the first.
    pub fn default_endpoint(&self) -> Option<&'a IndexedEndpoint> {
        let idx = self.default.get_or_init(|| {
            self.endpoints
                .iter()
                .position(|e| e.is_default == Some(true))
                .or(if self.endpoints.is_empty() { None } else { Some(0) })
        });
        idx.map(|i| &self.endpoints[i])
    }

    pub fn by_index(&self, index: u16) -> Option<&'a IndexedEndpoint> {
        self.endpoints.iter().find(|e| e.index == Some(index))
    }

    /// Binding lookup favoring the default endpoint.
    pub fn by_binding(&self, binding: &str) -> Option<&'a IndexedEndpoint> {
        if let Some(def) = self.default_endpoint() {
            if def.endpoint.binding == binding {
                return Some(def);
            }
        }
        self.endpoints.iter().find(|e| e.endpoint.binding == binding)
    }
}

/// Intended use of a KeyDescriptor's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUse {
    Signing,
    Encryption,
}

/// md:EncryptionMethod algorithm hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionMethod {
    pub algorithm: String,
}

/// md:KeyDescriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDescriptor {
    /// None means the key serves both signing and encryption.
    pub key_use: Option<KeyUse>,
    pub key_info: Option<KeyInfo>,
    pub encryption_methods: Vec<EncryptionMethod>,
}

impl KeyDescriptor {
    pub fn usable_for_signing(&self) -> bool {
        matches!(self.key_use, None | Some(KeyUse::Signing))
    }

    pub fn usable_for_encryption(&self) -> bool {
        matches!(self.key_use, None | Some(KeyUse::Encryption))
    }
}

/// md:Organization (display names only; the rest is opaque to the core).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Organization {
    pub display_names: Vec<LocalizedString>,
}

/// md:ContactPerson.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPerson {
    pub contact_type: String,
    pub given_name: Option<String>,
    pub sur_name: Option<String>,
    pub email_addresses: Vec<String>,
}

/// mdui logo entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Logo {
    pub value: String,
    pub height: u32,
    pub width: u32,
    pub lang: Option<String>,
}

/// mdui:UIInfo extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiInfo {
    pub display_names: Vec<LocalizedString>,
    pub descriptions: Vec<LocalizedString>,
    pub keywords: Vec<LocalizedString>,
    pub information_urls: Vec<LocalizedString>,
    pub privacy_statement_urls: Vec<LocalizedString>,
    pub logos: Vec<Logo>,
}

/// mdui:DiscoHints extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoHints {
    pub ip_hints: Vec<String>,
    pub domain_hints: Vec<String>,
    pub geolocation_hints: Vec<String>,
}

/// mdattr:EntityAttributes extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityAttributes {
    pub attributes: Vec<Attribute>,
}

/// mdrpi:RegistrationInfo extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub registration_authority: String,
    pub registration_instant: Option<DateTime<Utc>>,
}

/// Heterogeneous Extensions content the core recognizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    /// SAML 1.x artifact SourceID extension (20 raw bytes).
    pub source_id: Option<Vec<u8>>,
    pub ui_info: Option<UiInfo>,
    pub disco_hints: Option<DiscoHints>,
    pub entity_attributes: Option<EntityAttributes>,
    pub registration_info: Option<RegistrationInfo>,
    /// alg:DigestMethod algorithm hints.
    pub digest_methods: Vec<String>,
    /// alg:SigningMethod algorithm hints.
    pub signing_methods: Vec<String>,
}

/// Role kinds an entity may advertise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleType {
    IdpSso,
    SpSso,
    AuthnAuthority,
    AttributeAuthority,
    Pdp,
    AuthnQuery,
    AttributeQuery,
    AuthzQuery,
    Other(String),
}

impl RoleType {
    /// Element local name within the metadata namespace.
    pub fn local_name(&self) -> &str {
        match self {
            RoleType::IdpSso => "IDPSSODescriptor",
            RoleType::SpSso => "SPSSODescriptor",
            RoleType::AuthnAuthority => "AuthnAuthorityDescriptor",
            RoleType::AttributeAuthority => "AttributeAuthorityDescriptor",
            RoleType::Pdp => "PDPDescriptor",
            RoleType::AuthnQuery => "AuthnQueryDescriptorType",
            RoleType::AttributeQuery => "AttributeQueryDescriptorType",
            RoleType::AuthzQuery => "AuthzDecisionQueryDescriptorType",
            RoleType::Other(name) => name,
        }
    }
}

/// A role descriptor: protocol support, keys, endpoints and extensions.
#[derive(Debug, Clone, Default)]
pub struct RoleDescriptor {
    pub role_type: Option<RoleType>,
    /// Space-separated protocol URIs; matching is exact per token.
    pub protocol_support_enumeration: String,
    pub key_descriptors: Vec<KeyDescriptor>,
    pub extensions: Option<Extensions>,
    pub error_url: Option<String>,
    pub organization: Option<Organization>,
    pub contact_persons: Vec<ContactPerson>,
    pub valid_until: Option<DateTime<Utc>>,
    pub cache_duration: Option<Duration>,
    pub signature: Option<Signature>,
    pub single_sign_on_services: Vec<Endpoint>,
    pub artifact_resolution_services: Vec<IndexedEndpoint>,
    pub assertion_consumer_services: Vec<IndexedEndpoint>,
    pub want_authn_requests_signed: Option<bool>,
    pub authn_requests_signed: Option<bool>,
}

impl RoleDescriptor {
    /// Exact token match against the protocol support enumeration.
    pub fn has_support(&self, protocol: &str) -> bool {
        self.protocol_support_enumeration
            .split_whitespace()
            .any(|token| token == protocol)
    }

    /// KeyDescriptors usable for the given purpose.
    pub fn keys_for(&self, key_use: KeyUse) -> impl Iterator<Item = &KeyDescriptor> {
        self.key_descriptors.iter().filter(move |k| match key_use {
            KeyUse::Signing => k.usable_for_signing(),
            KeyUse::Encryption => k.usable_for_encryption(),
        })
    }

    pub fn is(&self, role_type: &RoleType) -> bool {
        self.role_type.as_ref() == Some(role_type)
    }
}

/// md:AffiliationDescriptor.
#[derive(Debug, Clone, Default)]
pub struct AffiliationDescriptor {
    pub affiliation_owner_id: String,
    pub members: Vec<String>,
    pub key_descriptors: Vec<KeyDescriptor>,
}

/// md:EntityDescriptor, one federation participant.
#[derive(Debug, Clone, Default)]
pub struct EntityDescriptor {
    pub entity_id: String,
    /// Document identifier, when the tree carries one for signing.
    pub id: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub cache_duration: Option<Duration>,
    pub roles: Vec<RoleDescriptor>,
    pub affiliation: Option<AffiliationDescriptor>,
    pub organization: Option<Organization>,
    pub contact_persons: Vec<ContactPerson>,
    pub extensions: Option<Extensions>,
    pub signature: Option<Signature>,
}

impl EntityDescriptor {
    /// First role of the given kind supporting the protocol, in document order.
    pub fn role_descriptor(&self, role_type: &RoleType, protocol: &str) -> Option<(usize, &RoleDescriptor)> {
        self.roles
            .iter()
            .enumerate()
            .find(|(_, r)| r.is(role_type) && r.has_support(protocol))
    }

    pub fn idp_sso_roles(&self) -> impl Iterator<Item = &RoleDescriptor> {
        self.roles.iter().filter(|r| r.is(&RoleType::IdpSso))
    }
}

/// md:EntitiesDescriptor, a recursive named group.
#[derive(Debug, Clone, Default)]
pub struct EntitiesDescriptor {
    pub name: Option<String>,
    pub id: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub cache_duration: Option<Duration>,
    pub entities: Vec<EntityDescriptor>,
    pub groups: Vec<EntitiesDescriptor>,
    pub extensions: Option<Extensions>,
    pub signature: Option<Signature>,
}

/// Root of a loaded metadata instance.
#[derive(Debug, Clone)]
pub enum MetadataRoot {
    Entity(EntityDescriptor),
    Entities(EntitiesDescriptor),
}

impl MetadataRoot {
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        match self {
            MetadataRoot::Entity(e) => e.valid_until,
            MetadataRoot::Entities(g) => g.valid_until,
        }
    }

    pub fn cache_duration(&self) -> Option<Duration> {
        match self {
            MetadataRoot::Entity(e) => e.cache_duration,
            MetadataRoot::Entities(g) => g.cache_duration,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.valid_until().map_or(true, |v| now < v)
    }
}

/// Time-bound SAML object: validity ends at validUntil, absence means
/// unbounded.
pub trait TimeBound {
    fn valid_until(&self) -> Option<DateTime<Utc>>;

    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.valid_until().map_or(true, |v| now < v)
    }
}

/// Cacheable SAML object advertising a refresh interval.
pub trait Cacheable {
    fn cache_duration(&self) -> Option<Duration>;
}

/// Signable SAML object with an enveloped signature slot.
pub trait Signable {
    fn signature(&self) -> Option<&Signature>;
    fn set_signature(&mut self, signature: Signature);
    fn signable_id(&self) -> Option<&str>;
}

macro_rules! impl_capabilities {
    ($ty:ty, $id:ident) => {
        impl TimeBound for $ty {
            fn valid_until(&self) -> Option<DateTime<Utc>> {
                self.valid_until
            }
        }

        impl Cacheable for $ty {
            fn cache_duration(&self) -> Option<Duration> {
                self.cache_duration
            }
        }
    };
}

impl_capabilities!(EntityDescriptor, entity);
impl_capabilities!(EntitiesDescriptor, group);
impl_capabilities!(RoleDescriptor, role);

impl Signable for EntityDescriptor {
    fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = Some(signature);
    }

    fn signable_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl Signable for EntitiesDescriptor {
    fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = Some(signature);
    }

    fn signable_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// A role located within a provider-owned entity: the entity is shared, the
/// role addressed by index. This is the arena+index rendition of the child
/// to parent back-reference.
#[derive(Debug, Clone)]
pub struct RoleRef {
    pub entity: Arc<EntityDescriptor>,
    pub index: usize,
}

impl RoleRef {
    pub fn new(entity: Arc<EntityDescriptor>, index: usize) -> Self {
        Self { entity, index }
    }

    pub fn role(&self) -> &RoleDescriptor {
        &self.entity.roles[self.index]
    }

    pub fn entity_id(&self) -> &str {
        &self.entity.entity_id
    }

    /// Identity comparison for conflict detection between rules.
    pub fn same_role(&self, other: &RoleRef) -> bool {
        self.index == other.index && Arc::ptr_eq(&self.entity, &other.entity)
    }
}
