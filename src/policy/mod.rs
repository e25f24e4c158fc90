//! Security policy engine
//!
//! A policy is constructed per incoming message, mutated in place by an
//! ordered sequence of rules, and discarded (or reset) afterwards. It is
//! not thread-safe; the shared, concurrent resources it references
//! (metadata provider, trust engine, replay cache) are.

pub mod rules;

use std::cell::Cell;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::binding::request::ProtocolRequest;
use crate::config::SamlConfig;
use crate::error::SamlError;
use crate::metadata::{LookupCriteria, MetadataProvider, ProviderGuard};
use crate::model::consts;
use crate::model::metadata::{KeyUse, RoleRef, RoleType};
use crate::model::saml::{Condition, Issuer, SamlMessage, SubjectConfirmation};
use crate::replay::ReplayCache;
use crate::security::{Credential, MetadataCredentialCriteria, SignatureTrustEngine};

/// What a rule evaluates: a decoded message, or an individual condition
/// during recursive Conditions processing.
#[derive(Clone, Copy)]
pub enum PolicyTarget<'a> {
    Message(&'a SamlMessage),
    Condition(&'a Condition),
}

impl<'a> PolicyTarget<'a> {
    pub fn message(&self) -> Option<&'a SamlMessage> {
        match self {
            PolicyTarget::Message(m) => Some(m),
            PolicyTarget::Condition(_) => None,
        }
    }

    pub fn condition(&self) -> Option<&'a Condition> {
        match self {
            PolicyTarget::Condition(c) => Some(c),
            PolicyTarget::Message(_) => None,
        }
    }
}

/// A rule a protocol request and message must meet to be valid and secure.
///
/// Rules are stateless and thread-safe across evaluations. Returning false
/// signals the rule was inapplicable to the message; an error is a fatal
/// policy failure.
#[async_trait]
pub trait SecurityPolicyRule: Send + Sync {
    fn rule_type(&self) -> &'static str;

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError>;
}

/// Pluggable issuer comparison.
pub trait IssuerMatching: Send + Sync {
    /// A missing operand matches anything.
    fn issuer_matches(&self, existing: Option<&Issuer>, candidate: Option<&Issuer>) -> bool;
}

/// Default matching: names equal, formats equal with the entity default,
/// qualifiers equal with an empty default.
pub struct DefaultIssuerMatching;

impl IssuerMatching for DefaultIssuerMatching {
    fn issuer_matches(&self, existing: Option<&Issuer>, candidate: Option<&Issuer>) -> bool {
        let (Some(a), Some(b)) = (existing, candidate) else {
            return true;
        };
        if a.name.is_empty() || b.name.is_empty() || a.name != b.name {
            return false;
        }
        if a.effective_format() != b.effective_format() {
            return false;
        }
        if a.name_qualifier.as_deref().unwrap_or("") != b.name_qualifier.as_deref().unwrap_or("") {
            return false;
        }
        if a.sp_name_qualifier.as_deref().unwrap_or("")
            != b.sp_name_qualifier.as_deref().unwrap_or("")
        {
            return false;
        }
        true
    }
}

/// Overall policy used to verify the security of an incoming message.
pub struct SecurityPolicy {
    rules: Vec<Box<dyn SecurityPolicyRule>>,

    metadata: Option<Arc<dyn MetadataProvider>>,
    guard: Option<ProviderGuard>,
    role: Option<RoleType>,
    trust: Option<Arc<dyn SignatureTrustEngine>>,
    replay: Option<Arc<dyn ReplayCache>>,
    matching: Option<Box<dyn IssuerMatching>>,

    validate: bool,
    entity_only: bool,
    clock_skew: Duration,
    ts: Cell<Option<DateTime<Utc>>>,
    correlation_id: Option<String>,
    audiences: Vec<String>,

    // Per-message state.
    message_id: Option<String>,
    issue_instant: Option<DateTime<Utc>>,
    in_response_to: Option<String>,
    issuer: Option<Issuer>,
    issuer_role: Option<RoleRef>,
    authenticated: bool,
    /// The bearer SubjectConfirmation that satisfied policy; cleared only on
    /// a full reset.
    subject_confirmation: Option<SubjectConfirmation>,
}

impl SecurityPolicy {
    pub fn new(
        metadata: Option<Arc<dyn MetadataProvider>>,
        role: Option<RoleType>,
        trust: Option<Arc<dyn SignatureTrustEngine>>,
        validate: bool,
    ) -> Self {
        Self {
            rules: Vec::new(),
            metadata,
            guard: None,
            role,
            trust,
            replay: None,
            matching: None,
            validate,
            entity_only: true,
            clock_skew: SamlConfig::global().clock_skew(),
            ts: Cell::new(None),
            correlation_id: None,
            audiences: Vec::new(),
            message_id: None,
            issue_instant: None,
            in_response_to: None,
            issuer: None,
            issuer_role: None,
            authenticated: false,
            subject_confirmation: None,
        }
    }

    // ---------- Configuration ----------

    pub fn add_rule(&mut self, rule: Box<dyn SecurityPolicyRule>) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn metadata_provider(&self) -> Option<&Arc<dyn MetadataProvider>> {
        self.metadata.as_ref()
    }

    pub fn role(&self) -> Option<&RoleType> {
        self.role.as_ref()
    }

    pub fn set_role(&mut self, role: Option<RoleType>) {
        self.role = role;
    }

    pub fn trust_engine(&self) -> Option<&Arc<dyn SignatureTrustEngine>> {
        self.trust.as_ref()
    }

    pub fn replay_cache(&self) -> Option<Arc<dyn ReplayCache>> {
        self.replay
            .clone()
            .or_else(|| SamlConfig::global().replay_cache())
    }

    pub fn set_replay_cache(&mut self, cache: Arc<dyn ReplayCache>) {
        self.replay = Some(cache);
    }

    pub fn validating(&self) -> bool {
        self.validate
    }

    /// Whether only entity-format issuers are acceptable.
    pub fn require_entity_issuer(&self) -> bool {
        self.entity_only
    }

    pub fn set_require_entity_issuer(&mut self, entity_only: bool) {
        self.entity_only = entity_only;
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    pub fn set_clock_skew(&mut self, skew: Duration) {
        self.clock_skew = skew;
    }

    /// Evaluation timestamp, fixed at first access.
    pub fn time(&self) -> DateTime<Utc> {
        match self.ts.get() {
            Some(ts) => ts,
            None => {
                let now = Utc::now();
                self.ts.set(Some(now));
                now
            }
        }
    }

    pub fn set_time(&mut self, ts: DateTime<Utc>) {
        self.ts.set(Some(ts));
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn set_correlation_id(&mut self, id: Option<String>) {
        self.correlation_id = id.filter(|i| !i.is_empty());
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    pub fn audiences_mut(&mut self) -> &mut Vec<String> {
        &mut self.audiences
    }

    pub fn set_issuer_matching(&mut self, matching: Box<dyn IssuerMatching>) {
        self.matching = Some(matching);
    }

    fn matching(&self) -> &dyn IssuerMatching {
        static DEFAULT: DefaultIssuerMatching = DefaultIssuerMatching;
        self.matching.as_deref().unwrap_or(&DEFAULT)
    }

    // ---------- Per-message state ----------

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn set_message_id(&mut self, id: Option<String>) {
        self.message_id = id.filter(|i| !i.is_empty());
    }

    pub fn issue_instant(&self) -> Option<DateTime<Utc>> {
        self.issue_instant
    }

    pub fn set_issue_instant(&mut self, instant: Option<DateTime<Utc>>) {
        self.issue_instant = instant;
    }

    pub fn in_response_to(&self) -> Option<&str> {
        self.in_response_to.as_deref()
    }

    pub fn set_in_response_to(&mut self, id: Option<String>) {
        self.in_response_to = id.filter(|i| !i.is_empty());
    }

    pub fn issuer(&self) -> Option<&Issuer> {
        self.issuer.as_ref()
    }

    /// Record the message issuer. A conflicting issuer from an earlier rule
    /// is fatal; a non-entity format is fatal when entity issuers are
    /// required.
    pub fn set_issuer(&mut self, issuer: Issuer) -> Result<(), SamlError> {
        if !self.matching().issuer_matches(self.issuer.as_ref(), Some(&issuer)) {
            return Err(SamlError::SecurityPolicy(
                "An Issuer was supplied that conflicts with previous results.".to_string(),
            ));
        }

        if self.issuer.is_none() {
            if self.entity_only
                && issuer
                    .format
                    .as_deref()
                    .is_some_and(|f| f != consts::NAMEID_FORMAT_ENTITY)
            {
                return Err(SamlError::SecurityPolicy(
                    "A non-entity Issuer was supplied, violating policy.".to_string(),
                ));
            }
            self.issuer_role = None;
            self.issuer = Some(issuer);
        }
        Ok(())
    }

    /// Record the issuer by name only.
    pub fn set_issuer_name(&mut self, name: &str) -> Result<(), SamlError> {
        if name.is_empty() {
            return Ok(());
        }
        self.set_issuer(Issuer::entity(name))
    }

    pub fn issuer_metadata(&self) -> Option<&RoleRef> {
        self.issuer_role.as_ref()
    }

    /// Record the issuer's metadata role. A different role supplied by an
    /// earlier rule is fatal.
    pub fn set_issuer_metadata(&mut self, role: Option<RoleRef>) -> Result<(), SamlError> {
        if let (Some(new), Some(existing)) = (role.as_ref(), self.issuer_role.as_ref()) {
            if !new.same_role(existing) {
                return Err(SamlError::SecurityPolicy(
                    "A rule supplied a RoleDescriptor that conflicts with previous results."
                        .to_string(),
                ));
            }
        }
        self.issuer_role = role;
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn subject_confirmation(&self) -> Option<&SubjectConfirmation> {
        self.subject_confirmation.as_ref()
    }

    pub fn set_subject_confirmation(&mut self, confirmation: SubjectConfirmation) {
        self.subject_confirmation = Some(confirmation);
    }

    // ---------- Metadata access ----------

    /// Lock the metadata provider for the span of this policy's use.
    pub async fn metadata_guard(&mut self) -> Option<&mut ProviderGuard> {
        if self.guard.is_none() {
            if let Some(provider) = self.metadata.clone() {
                self.guard = Some(provider.lock().await);
            }
        }
        self.guard.as_mut()
    }

    /// Release the metadata lock.
    pub fn unlock_metadata(&mut self) {
        self.guard = None;
    }

    /// Metadata lookup through the held guard.
    pub async fn lookup_entity(
        &mut self,
        criteria: &LookupCriteria,
    ) -> Result<Option<crate::metadata::EntityLookup>, SamlError> {
        let Some(provider) = self.metadata.clone() else {
            return Ok(None);
        };
        if self.guard.is_none() {
            self.guard = Some(provider.lock().await);
        }
        let guard = self.guard.as_mut().unwrap();
        provider.entity(guard, criteria).await
    }

    /// Resolve credentials for the current issuer role.
    pub async fn resolve_credentials(
        &mut self,
        usage: KeyUse,
        algorithm: Option<String>,
    ) -> Result<Vec<Credential>, SamlError> {
        let Some(role) = self.issuer_role.clone() else {
            return Ok(Vec::new());
        };
        let mut criteria = MetadataCredentialCriteria::new(role.clone()).with_usage(usage);
        criteria.algorithm = algorithm;

        if let Some(provider) = self.metadata.clone() {
            if self.guard.is_none() {
                self.guard = Some(provider.lock().await);
            }
            let guard = self.guard.as_ref().unwrap();
            return provider.resolve(guard, &criteria).await;
        }

        // Without a provider, fall back to the role's own key descriptors.
        Ok(crate::security::role_credentials(&role, usage))
    }

    // ---------- Evaluation ----------

    /// Evaluate every rule, in order, against the message. Rules do not
    /// short-circuit; each sees every message.
    pub async fn evaluate(
        &mut self,
        message: &SamlMessage,
        request: Option<&(dyn ProtocolRequest + '_)>,
    ) -> Result<(), SamlError> {
        let rules = std::mem::take(&mut self.rules);
        let mut result = Ok(());
        for rule in &rules {
            match rule.evaluate(PolicyTarget::Message(message), request, self).await {
                Ok(_) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.rules = rules;
        result
    }

    /// Clear per-message state; a full reset also clears issuer identity and
    /// authentication results.
    pub fn reset(&mut self, message_only: bool) {
        self.message_id = None;
        self.issue_instant = None;
        if !message_only {
            self.issuer = None;
            self.issuer_role = None;
            self.authenticated = false;
            self.subject_confirmation = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(name: &str) -> Issuer {
        Issuer::entity(name)
    }

    #[test]
    fn test_issuer_matching_reflexive_and_null() {
        let matching = DefaultIssuerMatching;
        let a = issuer("https://idp.example.org");
        assert!(matching.issuer_matches(Some(&a), Some(&a)));
        assert!(matching.issuer_matches(None, Some(&a)));
        assert!(matching.issuer_matches(Some(&a), None));
        assert!(matching.issuer_matches(None, None));
    }

    #[test]
    fn test_issuer_matching_defaults() {
        let matching = DefaultIssuerMatching;
        let plain = issuer("https://idp.example.org");
        let explicit = Issuer {
            format: Some(consts::NAMEID_FORMAT_ENTITY.to_string()),
            ..issuer("https://idp.example.org")
        };
        // An absent format defaults to entity.
        assert!(matching.issuer_matches(Some(&plain), Some(&explicit)));

        let qualified = Issuer {
            name_qualifier: Some("qual".to_string()),
            ..issuer("https://idp.example.org")
        };
        assert!(!matching.issuer_matches(Some(&plain), Some(&qualified)));
    }

    #[test]
    fn test_set_issuer_conflict() {
        let mut policy = SecurityPolicy::new(None, None, None, false);
        policy.set_issuer(issuer("https://a.example.org")).unwrap();
        let err = policy.set_issuer(issuer("https://b.example.org")).unwrap_err();
        assert!(matches!(err, SamlError::SecurityPolicy(_)));

        // The same issuer again is fine and leaves the first in place.
        policy.set_issuer(issuer("https://a.example.org")).unwrap();
        assert_eq!(policy.issuer().unwrap().name, "https://a.example.org");
    }

    #[test]
    fn test_non_entity_issuer_rejected() {
        let mut policy = SecurityPolicy::new(None, None, None, false);
        let err = policy
            .set_issuer(Issuer {
                format: Some(consts::NAMEID_FORMAT_PERSISTENT.to_string()),
                ..issuer("someone")
            })
            .unwrap_err();
        assert!(matches!(err, SamlError::SecurityPolicy(_)));

        policy.set_require_entity_issuer(false);
        policy
            .set_issuer(Issuer {
                format: Some(consts::NAMEID_FORMAT_PERSISTENT.to_string()),
                ..issuer("someone")
            })
            .unwrap();
    }

    #[test]
    fn test_reset_semantics() {
        let mut policy = SecurityPolicy::new(None, None, None, false);
        policy.set_message_id(Some("_m1".to_string()));
        policy.set_issue_instant(Some(Utc::now()));
        policy.set_issuer(issuer("https://idp.example.org")).unwrap();
        policy.set_authenticated(true);

        policy.reset(true);
        assert!(policy.message_id().is_none());
        assert!(policy.issue_instant().is_none());
        assert!(policy.issuer().is_some());
        assert!(policy.is_authenticated());

        policy.reset(false);
        assert!(policy.issuer().is_none());
        assert!(!policy.is_authenticated());
    }

    #[test]
    fn test_time_is_fixed_once_read() {
        let policy = SecurityPolicy::new(None, None, None, false);
        let first = policy.time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(policy.time(), first);
    }
}
