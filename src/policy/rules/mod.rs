//! Built-in security policy rules

pub mod bearer;
pub mod browser_sso;
pub mod conditions;
pub mod delegation;
pub mod message_flow;
pub mod signing;

pub use bearer::{BearerConfirmationConfig, BearerConfirmationRule, BEARER_POLICY_RULE};
pub use browser_sso::{Saml1BrowserSsoRule, SAML1BROWSERSSO_POLICY_RULE};
pub use conditions::{
    AudienceConfig, AudienceRule, ConditionsRule, IgnoreConfig, IgnoreRule, AUDIENCE_POLICY_RULE,
    CONDITIONS_POLICY_RULE, IGNORE_POLICY_RULE,
};
pub use delegation::{
    DelegateMatch, DelegationConfig, DelegationRestrictionRule, ExpectedDelegate,
    DELEGATION_POLICY_RULE,
};
pub use message_flow::{MessageFlowConfig, MessageFlowRule, MESSAGEFLOW_POLICY_RULE};
pub use signing::{
    ClientCertAuthRule, NullSecurityRule, SimpleSigningRule, SigningRuleConfig, XmlSigningRule,
    CLIENTCERTAUTH_POLICY_RULE, NULLSECURITY_POLICY_RULE, SIMPLESIGNING_POLICY_RULE,
    XMLSIGNING_POLICY_RULE,
};
