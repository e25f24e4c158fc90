//! Library configuration and plugin registries
//!
//! A process-wide configuration object with reference-counted init/term.
//! Built-in plugins register on the first init; the last term deregisters
//! every factory and drops the artifact map. Third-party plugins register
//! through the same tag-keyed maps, taking their configuration as a JSON
//! value.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Duration;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::binding::artifact::ArtifactMap;
use crate::error::SamlError;
use crate::metadata::chaining::{ChainingProviderBuilder, FolderProvider, Precedence};
use crate::metadata::dynamic::{
    DynamicProvider, DynamicProviderConfig, HttpEntityFetcher, LocalFetcher, MdqFetcher,
};
use crate::metadata::filters::*;
use crate::metadata::matchers::{
    EntityAttributesMatcher, EntityMatcher, NameMatcher, RegistrationAuthorityMatcher,
};
use crate::metadata::null_provider::NullProvider;
use crate::metadata::xml_provider::{XmlProvider, XmlProviderConfig};
use crate::metadata::MetadataProvider;
use crate::model::metadata::{ContactPerson, EntityDescriptor, RoleDescriptor, RoleType, UiInfo};
use crate::model::saml::Attribute;
use crate::policy::rules::*;
use crate::policy::SecurityPolicyRule;
use crate::replay::ReplayCache;
use crate::security::Credential;

pub type RuleFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn SecurityPolicyRule>, SamlError> + Send + Sync>;
pub type FilterFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn MetadataFilter>, SamlError> + Send + Sync>;
pub type MatcherFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn EntityMatcher>, SamlError> + Send + Sync>;
pub type ProviderFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn MetadataProvider>, SamlError> + Send + Sync>;

/// Process-wide library configuration.
pub struct SamlConfig {
    init_count: Mutex<i64>,
    clock_skew_secs: AtomicI64,
    contact_priority: RwLock<Vec<String>>,
    replay_cache: RwLock<Option<Arc<dyn ReplayCache>>>,
    artifact_map: RwLock<Option<Arc<ArtifactMap>>>,
    rule_factories: RwLock<HashMap<String, RuleFactory>>,
    filter_factories: RwLock<HashMap<String, FilterFactory>>,
    matcher_factories: RwLock<HashMap<String, MatcherFactory>>,
    provider_factories: RwLock<HashMap<String, ProviderFactory>>,
}

static GLOBAL: Lazy<SamlConfig> = Lazy::new(|| SamlConfig {
    init_count: Mutex::new(0),
    clock_skew_secs: AtomicI64::new(180),
    contact_priority: RwLock::new(vec!["support".to_string(), "technical".to_string()]),
    replay_cache: RwLock::new(None),
    artifact_map: RwLock::new(None),
    rule_factories: RwLock::new(HashMap::new()),
    filter_factories: RwLock::new(HashMap::new()),
    matcher_factories: RwLock::new(HashMap::new()),
    provider_factories: RwLock::new(HashMap::new()),
});

impl SamlConfig {
    pub fn global() -> &'static SamlConfig {
        &GLOBAL
    }

    /// Initialize the library. Re-entrant; each call must be paired with a
    /// `term`.
    pub fn init(&self) -> bool {
        let mut count = self.init_count.lock().unwrap();
        if *count == i64::MAX {
            error!("library initialized too many times");
            return false;
        }
        if *count >= 1 {
            *count += 1;
            return true;
        }

        debug!("library initialization started");
        self.register_builtin_rules();
        self.register_builtin_filters();
        self.register_builtin_matchers();
        self.register_builtin_providers();
        *self.artifact_map.write().unwrap() = Some(Arc::new(ArtifactMap::new()));

        info!("library initialization complete");
        *count += 1;
        true
    }

    /// Tear the library down. The last term deregisters every plugin
    /// factory and destroys the artifact map.
    pub fn term(&self) {
        let mut count = self.init_count.lock().unwrap();
        if *count == 0 {
            error!("term without corresponding init");
            return;
        }
        *count -= 1;
        if *count > 0 {
            return;
        }

        self.rule_factories.write().unwrap().clear();
        self.filter_factories.write().unwrap().clear();
        self.matcher_factories.write().unwrap().clear();
        self.provider_factories.write().unwrap().clear();
        *self.artifact_map.write().unwrap() = None;

        info!("library shutdown complete");
    }

    // ---------- Global knobs ----------

    pub fn clock_skew(&self) -> Duration {
        Duration::seconds(self.clock_skew_secs.load(Ordering::Relaxed))
    }

    pub fn set_clock_skew(&self, skew: Duration) {
        self.clock_skew_secs
            .store(skew.num_seconds(), Ordering::Relaxed);
    }

    pub fn replay_cache(&self) -> Option<Arc<dyn ReplayCache>> {
        self.replay_cache.read().unwrap().clone()
    }

    pub fn set_replay_cache(&self, cache: Arc<dyn ReplayCache>) {
        *self.replay_cache.write().unwrap() = Some(cache);
    }

    pub fn artifact_map(&self) -> Option<Arc<ArtifactMap>> {
        self.artifact_map.read().unwrap().clone()
    }

    /// Contact types in selection priority order.
    pub fn set_contact_priority(&self, types: &str) {
        let mut priority = self.contact_priority.write().unwrap();
        priority.clear();
        priority.extend(types.split_whitespace().map(str::to_string));
    }

    /// First contact whose type matches the configured priority list.
    pub fn contact_person<'a>(
        &self,
        contacts: impl Iterator<Item = &'a ContactPerson> + Clone,
    ) -> Option<&'a ContactPerson> {
        for wanted in self.contact_priority.read().unwrap().iter() {
            if let Some(cp) = contacts.clone().find(|c| &c.contact_type == wanted) {
                return Some(cp);
            }
        }
        None
    }

    // ---------- Identifier generation ----------

    /// 16 random bytes as "_" followed by 32 lowercase hex digits.
    pub fn generate_identifier() -> String {
        format!("_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn generate_random_bytes(len: usize) -> Vec<u8> {
        use rand::RngCore;
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    // ---------- Registries ----------

    pub fn register_rule(&self, tag: &str, factory: RuleFactory) {
        self.rule_factories
            .write()
            .unwrap()
            .insert(tag.to_string(), factory);
    }

    pub fn build_rule(&self, tag: &str, config: &Value) -> Result<Box<dyn SecurityPolicyRule>, SamlError> {
        let factory = self
            .rule_factories
            .read()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| {
                SamlError::SecurityPolicy(format!("unknown policy rule type ({})", tag))
            })?;
        info!(rule = tag, "building SecurityPolicyRule");
        factory(config)
    }

    pub fn register_filter(&self, tag: &str, factory: FilterFactory) {
        self.filter_factories
            .write()
            .unwrap()
            .insert(tag.to_string(), factory);
    }

    pub fn build_filter(&self, tag: &str, config: &Value) -> Result<Box<dyn MetadataFilter>, SamlError> {
        let factory = self
            .filter_factories
            .read()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| SamlError::MetadataFilter(format!("unknown filter type ({})", tag)))?;
        info!(filter = tag, "building MetadataFilter");
        factory(config)
    }

    pub fn register_matcher(&self, tag: &str, factory: MatcherFactory) {
        self.matcher_factories
            .write()
            .unwrap()
            .insert(tag.to_string(), factory);
    }

    pub fn build_matcher(&self, tag: &str, config: &Value) -> Result<Box<dyn EntityMatcher>, SamlError> {
        let factory = self
            .matcher_factories
            .read()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| SamlError::Metadata(format!("unknown matcher type ({})", tag)))?;
        factory(config)
    }

    pub fn register_provider(&self, tag: &str, factory: ProviderFactory) {
        self.provider_factories
            .write()
            .unwrap()
            .insert(tag.to_string(), factory);
    }

    pub fn build_provider(&self, tag: &str, config: &Value) -> Result<Arc<dyn MetadataProvider>, SamlError> {
        let factory = self
            .provider_factories
            .read()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| SamlError::Metadata(format!("unknown provider type ({})", tag)))?;
        info!(provider = tag, "building MetadataProvider");
        factory(config)
    }

    // ---------- Built-in registrations ----------

    fn register_builtin_rules(&self) {
        self.register_rule(MESSAGEFLOW_POLICY_RULE, Arc::new(|config| {
            let parsed: MessageFlowConfig = from_value(config)?;
            Ok(Box::new(MessageFlowRule::new(parsed)))
        }));
        self.register_rule(CONDITIONS_POLICY_RULE, Arc::new(|config| {
            let children = config.get("rules").and_then(Value::as_array);
            match children {
                None => Ok(Box::new(ConditionsRule::with_default_rules())),
                Some(children) => {
                    let mut rules: Vec<Box<dyn SecurityPolicyRule>> = Vec::new();
                    for child in children {
                        let tag = child
                            .get("type")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                SamlError::SecurityPolicy(
                                    "policy rule missing type attribute".to_string(),
                                )
                            })?;
                        rules.push(SamlConfig::global().build_rule(tag, child)?);
                    }
                    Ok(Box::new(ConditionsRule::with_rules(rules)))
                }
            }
        }));
        self.register_rule(AUDIENCE_POLICY_RULE, Arc::new(|config| {
            let parsed: AudienceConfig = from_value(config)?;
            Ok(Box::new(AudienceRule::new(parsed)))
        }));
        self.register_rule(IGNORE_POLICY_RULE, Arc::new(|config| {
            let parsed: IgnoreConfig = from_value(config)?;
            Ok(Box::new(IgnoreRule::new(parsed)))
        }));
        self.register_rule(BEARER_POLICY_RULE, Arc::new(|config| {
            let parsed: BearerConfirmationConfig = from_value(config)?;
            Ok(Box::new(BearerConfirmationRule::new(parsed)))
        }));
        self.register_rule(CLIENTCERTAUTH_POLICY_RULE, Arc::new(|config| {
            let parsed: SigningRuleConfig = from_value(config)?;
            Ok(Box::new(ClientCertAuthRule::new(parsed)))
        }));
        self.register_rule(XMLSIGNING_POLICY_RULE, Arc::new(|config| {
            let parsed: SigningRuleConfig = from_value(config)?;
            Ok(Box::new(XmlSigningRule::new(parsed)))
        }));
        self.register_rule(SIMPLESIGNING_POLICY_RULE, Arc::new(|config| {
            let parsed: SigningRuleConfig = from_value(config)?;
            Ok(Box::new(SimpleSigningRule::new(parsed)))
        }));
        self.register_rule(NULLSECURITY_POLICY_RULE, Arc::new(|_| {
            Ok(Box::new(NullSecurityRule))
        }));
        self.register_rule(SAML1BROWSERSSO_POLICY_RULE, Arc::new(|_| {
            Ok(Box::new(Saml1BrowserSsoRule))
        }));
        self.register_rule(DELEGATION_POLICY_RULE, Arc::new(|config| {
            let parsed: DelegationConfig = from_value(config)?;
            Ok(Box::new(DelegationRestrictionRule::new(parsed)))
        }));
    }

    fn register_builtin_filters(&self) {
        let include: FilterFactory = Arc::new(|config| {
            let (entities, matchers) = selection_config(config)?;
            Ok(Box::new(IncludeFilter { entities, matchers }))
        });
        let exclude: FilterFactory = Arc::new(|config| {
            let (entities, matchers) = selection_config(config)?;
            Ok(Box::new(ExcludeFilter { entities, matchers }))
        });
        // Legacy element names remain registered.
        self.register_filter("Include", include.clone());
        self.register_filter("Whitelist", include.clone());
        self.register_filter("WhitelistMetadataFilter", include);
        self.register_filter("Exclude", exclude.clone());
        self.register_filter("Blacklist", exclude.clone());
        self.register_filter("BlacklistMetadataFilter", exclude);

        self.register_filter("EntityRoleWhiteList", Arc::new(|config| {
            let retained = config
                .get("retained_roles")
                .and_then(Value::as_array)
                .map(|roles| {
                    roles
                        .iter()
                        .filter_map(Value::as_str)
                        .map(role_type_from_name)
                        .collect::<HashSet<_>>()
                })
                .unwrap_or_default();
            Ok(Box::new(EntityRoleFilter {
                retained_roles: retained,
                remove_roleless_entities: config
                    .get("remove_roleless_entities")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                remove_empty_groups: config
                    .get("remove_empty_groups")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            }))
        }));

        let signature: FilterFactory = Arc::new(|config| {
            let mut credentials = Vec::new();
            if let Some(keys) = config.get("public_keys").and_then(Value::as_array) {
                use base64::Engine;
                use rsa::pkcs8::DecodePublicKey;
                for key in keys.iter().filter_map(Value::as_str) {
                    let der = base64::engine::general_purpose::STANDARD
                        .decode(key)
                        .map_err(|_| {
                            SamlError::MetadataFilter(
                                "malformed base64 public key in Signature filter".to_string(),
                            )
                        })?;
                    credentials.push(Credential {
                        entity_id: None,
                        usage: None,
                        key_names: Vec::new(),
                        public_key: rsa::RsaPublicKey::from_public_key_der(&der).ok(),
                        certificates: Vec::new(),
                        algorithms: Vec::new(),
                    });
                }
            }
            Ok(Box::new(SignatureFilter {
                credentials,
                verify_roles: config
                    .get("verify_roles")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                verify_backup: config
                    .get("verify_backup")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            }))
        });
        self.register_filter("Signature", signature.clone());
        self.register_filter("SignatureMetadataFilter", signature);

        let valid_until: FilterFactory = Arc::new(|config| {
            let max = config
                .get("max_validity_interval_secs")
                .and_then(Value::as_u64)
                .unwrap_or(60 * 60 * 24 * 14);
            Ok(Box::new(RequireValidUntilFilter {
                max_validity_interval: Duration::seconds(max as i64),
            }))
        });
        self.register_filter("RequireValidUntil", valid_until.clone());
        self.register_filter("RequiredValidUntil", valid_until);

        self.register_filter("EntityAttributes", Arc::new(|config| {
            let mut rules = Vec::new();
            if let Some(entries) = config.get("rules").and_then(Value::as_array) {
                for entry in entries {
                    let matcher = matcher_from_config(entry.get("matcher"))?;
                    let attributes: Vec<Attribute> = entry
                        .get("attributes")
                        .map(|v| attributes_from_value(v))
                        .transpose()?
                        .unwrap_or_default();
                    rules.push((matcher, attributes));
                }
            }
            Ok(Box::new(EntityAttributesFilter { rules }))
        }));

        self.register_filter("UIInfo", Arc::new(|config| {
            let mut rules: Vec<(Box<dyn EntityMatcher>, UiInfo)> = Vec::new();
            if let Some(entries) = config.get("rules").and_then(Value::as_array) {
                for entry in entries {
                    let matcher = matcher_from_config(entry.get("matcher"))?;
                    let ui: UiInfoValue = from_value(entry.get("ui_info").unwrap_or(&Value::Null))?;
                    rules.push((matcher, ui.into()));
                }
            }
            Ok(Box::new(UiInfoFilter {
                rules,
                replace: config
                    .get("replace")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }))
        }));

        self.register_filter("InlineLogo", Arc::new(|_| Ok(Box::new(InlineLogoFilter))));
    }

    fn register_builtin_matchers(&self) {
        self.register_matcher("Name", Arc::new(|config| {
            let name = config
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| SamlError::Metadata("Name matcher requires a name".to_string()))?;
            Ok(Box::new(NameMatcher {
                name: name.to_string(),
            }))
        }));
        self.register_matcher("EntityAttributes", Arc::new(|config| {
            let attributes = config
                .get("attributes")
                .map(attributes_from_value)
                .transpose()?
                .unwrap_or_default();
            Ok(Box::new(EntityAttributesMatcher {
                attributes,
                trim_tags: config
                    .get("trim_tags")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }))
        }));
        self.register_matcher("RegistrationAuthority", Arc::new(|config| {
            let authorities = config
                .get("authorities")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect::<HashSet<_>>()
                })
                .unwrap_or_default();
            Ok(Box::new(RegistrationAuthorityMatcher { authorities }))
        }));
    }

    fn register_builtin_providers(&self) {
        self.register_provider("XML", Arc::new(|config| {
            let parsed: XmlProviderConfig = from_value(config)?;
            let mut provider = XmlProvider::new(parsed)?;
            for filter in filters_from_config(config)? {
                provider = provider.with_filter(filter);
            }
            Ok(Arc::new(provider) as Arc<dyn MetadataProvider>)
        }));

        self.register_provider("Dynamic", Arc::new(|config| {
            let parsed: DynamicProviderConfig = from_value(config)?;
            let fetcher = HttpEntityFetcher::new(parsed.timeout_secs.unwrap_or(30))?;
            let mut provider = DynamicProvider::new(parsed, Box::new(fetcher));
            for filter in filters_from_config(config)? {
                provider = provider.with_filter(filter);
            }
            Ok(Arc::new(provider) as Arc<dyn MetadataProvider>)
        }));

        self.register_provider("LocalDynamic", Arc::new(|config| {
            let directory = config
                .get("directory")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SamlError::Metadata("LocalDynamic provider requires a directory".to_string())
                })?;
            let parsed: DynamicProviderConfig = from_value(config)?;
            let mut provider =
                DynamicProvider::new(parsed, Box::new(LocalFetcher::new(directory)));
            for filter in filters_from_config(config)? {
                provider = provider.with_filter(filter);
            }
            Ok(Arc::new(provider) as Arc<dyn MetadataProvider>)
        }));

        self.register_provider("MDQ", Arc::new(|config| {
            let base_url = config
                .get("base_url")
                .and_then(Value::as_str)
                .ok_or_else(|| SamlError::Metadata("MDQ provider requires a base_url".to_string()))?;
            let parsed: DynamicProviderConfig = from_value(config)?;
            let fetcher = MdqFetcher::new(
                base_url,
                config
                    .get("hash_request")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                parsed.timeout_secs.unwrap_or(30),
            )?;
            let mut provider = DynamicProvider::new(parsed, Box::new(fetcher));
            for filter in filters_from_config(config)? {
                provider = provider.with_filter(filter);
            }
            Ok(Arc::new(provider) as Arc<dyn MetadataProvider>)
        }));

        self.register_provider("Chaining", Arc::new(|config| {
            let precedence = match config.get("precedence").and_then(Value::as_str) {
                Some("last") => Precedence::Last,
                _ => Precedence::First,
            };
            let mut builder = ChainingProviderBuilder::new(precedence);
            if let Some(children) = config.get("providers").and_then(Value::as_array) {
                for child in children {
                    let tag = child.get("type").and_then(Value::as_str).ok_or_else(|| {
                        SamlError::Metadata("MetadataProvider missing type attribute".to_string())
                    })?;
                    match SamlConfig::global().build_provider(tag, child) {
                        Ok(provider) => builder = builder.push(provider),
                        Err(e) => error!(error = %e, "error building MetadataProvider"),
                    }
                }
            }
            Ok(builder.build() as Arc<dyn MetadataProvider>)
        }));

        self.register_provider("Folder", Arc::new(|config| {
            let directory = config
                .get("directory")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SamlError::Metadata("Folder provider requires a directory".to_string())
                })?;
            Ok(FolderProvider::build(directory)? as Arc<dyn MetadataProvider>)
        }));

        self.register_provider("Null", Arc::new(|config| {
            let mut template = EntityDescriptor::default();
            if let Some(roles) = config.get("roles").and_then(Value::as_array) {
                for role in roles {
                    template.roles.push(RoleDescriptor {
                        role_type: role
                            .get("type")
                            .and_then(Value::as_str)
                            .map(role_type_from_name),
                        protocol_support_enumeration: role
                            .get("protocol_support_enumeration")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        ..Default::default()
                    });
                }
            }
            Ok(Arc::new(NullProvider::new(template)) as Arc<dyn MetadataProvider>)
        }));
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, SamlError> {
    let value = if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| SamlError::Metadata(format!("malformed plugin configuration: {}", e)))
}

fn role_type_from_name(name: &str) -> RoleType {
    match name {
        "IDPSSO" | "IDPSSODescriptor" => RoleType::IdpSso,
        "SPSSO" | "SPSSODescriptor" => RoleType::SpSso,
        "AuthnAuthority" | "AuthnAuthorityDescriptor" => RoleType::AuthnAuthority,
        "AttributeAuthority" | "AttributeAuthorityDescriptor" => RoleType::AttributeAuthority,
        "PDP" | "PDPDescriptor" => RoleType::Pdp,
        "AuthnQuery" | "AuthnQueryDescriptorType" => RoleType::AuthnQuery,
        "AttributeQuery" | "AttributeQueryDescriptorType" => RoleType::AttributeQuery,
        "AuthzQuery" | "AuthzDecisionQueryDescriptorType" => RoleType::AuthzQuery,
        other => RoleType::Other(other.to_string()),
    }
}

fn attributes_from_value(value: &Value) -> Result<Vec<Attribute>, SamlError> {
    let entries = value.as_array().ok_or_else(|| {
        SamlError::Metadata("attributes configuration must be a list".to_string())
    })?;
    let mut attributes = Vec::new();
    for entry in entries {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SamlError::Metadata("attribute requires a name".to_string()))?;
        attributes.push(Attribute {
            name: name.to_string(),
            name_format: entry
                .get("name_format")
                .and_then(Value::as_str)
                .map(str::to_string),
            values: entry
                .get("values")
                .and_then(Value::as_array)
                .map(|v| {
                    v.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        });
    }
    Ok(attributes)
}

fn matcher_from_config(value: Option<&Value>) -> Result<Box<dyn EntityMatcher>, SamlError> {
    let value = value
        .ok_or_else(|| SamlError::Metadata("filter rule requires a matcher".to_string()))?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SamlError::Metadata("matcher missing type attribute".to_string()))?;
    SamlConfig::global().build_matcher(tag, value)
}

fn selection_config(
    config: &Value,
) -> Result<(HashSet<String>, Vec<Box<dyn EntityMatcher>>), SamlError> {
    let entities = config
        .get("entities")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<HashSet<_>>()
        })
        .unwrap_or_default();
    let mut matchers = Vec::new();
    if let Some(entries) = config.get("matchers").and_then(Value::as_array) {
        for entry in entries {
            matchers.push(matcher_from_config(Some(entry))?);
        }
    }
    Ok((entities, matchers))
}

fn filters_from_config(config: &Value) -> Result<Vec<Box<dyn MetadataFilter>>, SamlError> {
    let mut filters = Vec::new();
    if let Some(entries) = config.get("filters").and_then(Value::as_array) {
        for entry in entries {
            let tag = entry.get("type").and_then(Value::as_str).ok_or_else(|| {
                SamlError::MetadataFilter("MetadataFilter missing type attribute".to_string())
            })?;
            filters.push(SamlConfig::global().build_filter(tag, entry)?);
        }
    }
    Ok(filters)
}

/// serde shape for UIInfo injection configuration.
#[derive(Debug, Default, serde::Deserialize)]
struct UiInfoValue {
    #[serde(default)]
    display_names: Vec<LocalizedValue>,
    #[serde(default)]
    descriptions: Vec<LocalizedValue>,
    #[serde(default)]
    information_urls: Vec<LocalizedValue>,
    #[serde(default)]
    privacy_statement_urls: Vec<LocalizedValue>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct LocalizedValue {
    value: String,
    #[serde(default)]
    lang: Option<String>,
}

impl From<UiInfoValue> for UiInfo {
    fn from(v: UiInfoValue) -> Self {
        let convert = |list: Vec<LocalizedValue>| {
            list.into_iter()
                .map(|l| crate::model::metadata::LocalizedString {
                    value: l.value,
                    lang: l.lang,
                })
                .collect()
        };
        UiInfo {
            display_names: convert(v.display_names),
            descriptions: convert(v.descriptions),
            information_urls: convert(v.information_urls),
            privacy_statement_urls: convert(v.privacy_statement_urls),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_format() {
        let id = SamlConfig::generate_identifier();
        assert_eq!(id.len(), 33);
        assert!(id.starts_with('_'));
        assert!(id[1..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    // The global configuration is shared process state, so its lifecycle and
    // registry behavior is exercised in one sequential test.
    #[test]
    fn test_lifecycle_and_registries() {
        let config = SamlConfig::global();
        assert!(config.init());
        assert!(config.init());

        // Registries are populated while initialized.
        assert!(config.build_rule("MessageFlow", &Value::Null).is_ok());
        assert!(config.artifact_map().is_some());

        for alias in [
            "Whitelist",
            "WhitelistMetadataFilter",
            "Blacklist",
            "BlacklistMetadataFilter",
            "SignatureMetadataFilter",
            "RequiredValidUntil",
        ] {
            assert!(
                config.build_filter(alias, &json!({})).is_ok(),
                "alias {} should build",
                alias
            );
        }

        let rule = config
            .build_rule(
                "Conditions",
                &json!({
                    "rules": [
                        {"type": "Audience", "audiences": ["https://sp.example.org"]},
                        {"type": "Ignore", "condition": "saml2:OneTimeUse"}
                    ]
                }),
            )
            .unwrap();
        assert_eq!(rule.rule_type(), "Conditions");

        config.term();
        // Still initialized after the first term.
        assert!(config.build_rule("MessageFlow", &Value::Null).is_ok());

        config.term();
        assert!(config.build_rule("MessageFlow", &Value::Null).is_err());
        assert!(config.artifact_map().is_none());
    }

    #[test]
    fn test_contact_priority() {
        let config = SamlConfig::global();
        let contacts = vec![
            ContactPerson {
                contact_type: "technical".to_string(),
                given_name: Some("Tech".to_string()),
                ..Default::default()
            },
            ContactPerson {
                contact_type: "support".to_string(),
                given_name: Some("Support".to_string()),
                ..Default::default()
            },
        ];
        let selected = config.contact_person(contacts.iter()).unwrap();
        assert_eq!(selected.contact_type, "support");
    }
}
