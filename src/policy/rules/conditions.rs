//! Conditions processing
//!
//! The Conditions rule verifies the assertion's validity window and then
//! evaluates each condition against its configured sub-rules; a condition
//! no sub-rule accepts is fatal. The Audience and Ignore rules are the
//! standard sub-rules.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use crate::binding::request::ProtocolRequest;
use crate::error::SamlError;
use crate::model::saml::Condition;
use crate::policy::{PolicyTarget, SecurityPolicy, SecurityPolicyRule};

pub const CONDITIONS_POLICY_RULE: &str = "Conditions";
pub const AUDIENCE_POLICY_RULE: &str = "Audience";
pub const IGNORE_POLICY_RULE: &str = "Ignore";

/// Configuration of the Audience sub-rule: a static audience list checked in
/// addition to the policy's own.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudienceConfig {
    #[serde(default)]
    pub audiences: Vec<String>,
}

/// Accepts an AudienceRestriction when one of its audiences is known to the
/// policy or the rule.
#[derive(Default)]
pub struct AudienceRule {
    audiences: Vec<String>,
}

impl AudienceRule {
    pub fn new(config: AudienceConfig) -> Self {
        Self {
            audiences: config.audiences,
        }
    }
}

#[async_trait]
impl SecurityPolicyRule for AudienceRule {
    fn rule_type(&self) -> &'static str {
        AUDIENCE_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        _request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        let Some(Condition::AudienceRestriction { audiences }) = target.condition() else {
            return Ok(false);
        };

        for audience in audiences {
            if policy.audiences().iter().any(|a| a == audience)
                || self.audiences.iter().any(|a| a == audience)
            {
                return Ok(true);
            }
        }

        error!(?audiences, "unacceptable AudienceRestriction in assertion");
        Err(SamlError::SecurityPolicy(
            "Assertion contains an unacceptable AudienceRestriction.".to_string(),
        ))
    }
}

/// Configuration of the Ignore sub-rule: the QName (or local name) of the
/// condition to wave through.
#[derive(Debug, Clone, Deserialize)]
pub struct IgnoreConfig {
    pub condition: String,
}

/// Accepts a condition with a given type as harmless.
pub struct IgnoreRule {
    local_name: String,
}

impl IgnoreRule {
    pub fn new(config: IgnoreConfig) -> Self {
        Self::for_condition(&config.condition)
    }

    /// Accepts "OneTimeUse", "saml2:OneTimeUse" or "{ns}OneTimeUse" forms.
    pub fn for_condition(name: &str) -> Self {
        let local = name
            .rsplit(|c| c == ':' || c == '}')
            .next()
            .unwrap_or(name)
            .to_string();
        Self { local_name: local }
    }

    fn matches(&self, condition: &Condition) -> bool {
        match condition {
            Condition::OneTimeUse => self.local_name == "OneTimeUse",
            Condition::ProxyRestriction { .. } => self.local_name == "ProxyRestriction",
            Condition::DoNotCache => self.local_name == "DoNotCacheCondition",
            Condition::AudienceRestriction { .. } => self.local_name == "AudienceRestriction",
            Condition::DelegationRestriction { .. } => {
                self.local_name == "DelegationRestrictionType"
                    || self.local_name == "DelegationRestriction"
            }
            Condition::Other { local_name, .. } => {
                local_name == &self.local_name
                    || local_name.rsplit(':').next() == Some(self.local_name.as_str())
            }
        }
    }
}

#[async_trait]
impl SecurityPolicyRule for IgnoreRule {
    fn rule_type(&self) -> &'static str {
        IGNORE_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        _request: Option<&(dyn ProtocolRequest + '_)>,
        _policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        let Some(condition) = target.condition() else {
            return Ok(false);
        };
        if self.matches(condition) {
            info!(condition = %condition.type_name(), "ignoring condition");
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Recursively evaluates an assertion's Conditions.
pub struct ConditionsRule {
    rules: Vec<Box<dyn SecurityPolicyRule>>,
}

impl ConditionsRule {
    pub fn with_rules(rules: Vec<Box<dyn SecurityPolicyRule>>) -> Self {
        Self { rules }
    }

    /// The stock configuration: audiences checked, caching and proxy
    /// conditions waved through.
    pub fn with_default_rules() -> Self {
        Self::with_rules(vec![
            Box::new(AudienceRule::default()),
            Box::new(IgnoreRule::for_condition("DoNotCacheCondition")),
            Box::new(IgnoreRule::for_condition("OneTimeUse")),
            Box::new(IgnoreRule::for_condition("ProxyRestriction")),
        ])
    }

    async fn check_window(
        policy: &mut SecurityPolicy,
        not_before: Option<chrono::DateTime<chrono::Utc>>,
        not_on_or_after: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), SamlError> {
        // Window boundaries compare at whole-second (epoch) granularity;
        // fractional digits in the instants must not tip the comparison.
        let now = policy.time().timestamp();
        let skew = policy.clock_skew().num_seconds();
        if let Some(nb) = not_before {
            if now + skew < nb.timestamp() {
                return Err(SamlError::SecurityPolicy(
                    "Assertion is not yet valid.".to_string(),
                ));
            }
        }
        if let Some(noa) = not_on_or_after {
            if noa.timestamp() <= now - skew {
                return Err(SamlError::SecurityPolicy(
                    "Assertion is no longer valid.".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn check_conditions(
        &self,
        conditions: &[Condition],
        request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
        saml1: bool,
    ) -> Result<(), SamlError> {
        for condition in conditions {
            let mut valid = false;
            for rule in &self.rules {
                if rule
                    .evaluate(PolicyTarget::Condition(condition), request, policy)
                    .await?
                {
                    valid = true;
                    break;
                }
            }
            if !valid {
                let message = match condition {
                    Condition::AudienceRestriction { .. } if saml1 => {
                        "AudienceRestrictionCondition not successfully validated by policy."
                            .to_string()
                    }
                    Condition::AudienceRestriction { .. } => {
                        "AudienceRestriction condition not successfully validated by policy."
                            .to_string()
                    }
                    Condition::OneTimeUse => {
                        "OneTimeUse condition not successfully validated by policy.".to_string()
                    }
                    Condition::ProxyRestriction { .. } => {
                        "ProxyRestriction condition not successfully validated by policy."
                            .to_string()
                    }
                    Condition::DoNotCache => {
                        "DoNotCacheCondition not successfully validated by policy.".to_string()
                    }
                    other => format!(
                        "Extension condition ({}) not successfully validated by policy.",
                        other.type_name()
                    ),
                };
                return Err(SamlError::SecurityPolicy(message));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SecurityPolicyRule for ConditionsRule {
    fn rule_type(&self) -> &'static str {
        CONDITIONS_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        let Some(message) = target.message() else {
            return Ok(false);
        };

        if let Some(assertion) = message.as_saml2_assertion() {
            let Some(conditions) = assertion.conditions.as_ref() else {
                return Ok(true);
            };
            Self::check_window(policy, conditions.not_before, conditions.not_on_or_after).await?;
            self.check_conditions(&conditions.conditions, request, policy, false)
                .await?;
            return Ok(true);
        }

        if let Some(assertion) = message.as_saml1_assertion() {
            let Some(conditions) = assertion.conditions.as_ref() else {
                return Ok(true);
            };
            Self::check_window(policy, conditions.not_before, conditions.not_on_or_after).await?;
            self.check_conditions(&conditions.conditions, request, policy, true)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::saml::{Assertion, Conditions, SamlMessage};
    use crate::xml::parse_datetime;
    use chrono::Duration;

    fn assertion_with_window() -> SamlMessage {
        SamlMessage::Assertion(Assertion {
            id: "_a1".to_string(),
            conditions: Some(Conditions {
                not_before: parse_datetime("1984-08-26T10:01:30.043Z"),
                not_on_or_after: parse_datetime("1984-08-26T10:11:30.043Z"),
                conditions: Vec::new(),
            }),
            ..Default::default()
        })
    }

    fn policy_at(time: &str) -> SecurityPolicy {
        let mut policy = SecurityPolicy::new(None, None, None, false);
        policy.set_clock_skew(Duration::seconds(30));
        policy.set_time(parse_datetime(time).unwrap());
        policy
    }

    #[tokio::test]
    async fn test_window_accepted_within_skew() {
        let rule = ConditionsRule::with_default_rules();
        let msg = assertion_with_window();
        let mut policy = policy_at("1984-08-26T10:01:00Z");
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let rule = ConditionsRule::with_default_rules();
        let msg = assertion_with_window();
        let mut policy = policy_at("1984-08-26T10:00:59Z");
        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "security policy violation: Assertion is not yet valid."
        );
    }

    #[tokio::test]
    async fn test_no_longer_valid() {
        let rule = ConditionsRule::with_default_rules();
        let msg = assertion_with_window();
        let mut policy = policy_at("1984-08-26T10:12:01Z");
        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "security policy violation: Assertion is no longer valid."
        );
    }

    #[tokio::test]
    async fn test_audience_match_through_policy_list() {
        let rule = ConditionsRule::with_default_rules();
        let msg = SamlMessage::Assertion(Assertion {
            id: "_a1".to_string(),
            conditions: Some(Conditions {
                conditions: vec![Condition::AudienceRestriction {
                    audiences: vec!["https://sp.example.org".to_string()],
                }],
                ..Default::default()
            }),
            ..Default::default()
        });

        let mut policy = SecurityPolicy::new(None, None, None, false);
        policy
            .audiences_mut()
            .push("https://sp.example.org".to_string());
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());

        let mut other = SecurityPolicy::new(None, None, None, false);
        other.audiences_mut().push("https://other".to_string());
        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut other)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unacceptable AudienceRestriction"));
    }

    #[tokio::test]
    async fn test_one_time_use_ignored_by_default() {
        let rule = ConditionsRule::with_default_rules();
        let msg = SamlMessage::Assertion(Assertion {
            id: "_a1".to_string(),
            conditions: Some(Conditions {
                conditions: vec![Condition::OneTimeUse],
                ..Default::default()
            }),
            ..Default::default()
        });
        let mut policy = SecurityPolicy::new(None, None, None, false);
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_condition_fatal() {
        let rule = ConditionsRule::with_default_rules();
        let msg = SamlMessage::Assertion(Assertion {
            id: "_a1".to_string(),
            conditions: Some(Conditions {
                conditions: vec![Condition::Other {
                    namespace: "urn:example".to_string(),
                    local_name: "Strange".to_string(),
                }],
                ..Default::default()
            }),
            ..Default::default()
        });
        let mut policy = SecurityPolicy::new(None, None, None, false);
        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("{urn:example}Strange"));
    }

    #[tokio::test]
    async fn test_missing_conditions_is_success() {
        let rule = ConditionsRule::with_default_rules();
        let msg = SamlMessage::Assertion(Assertion {
            id: "_a1".to_string(),
            ..Default::default()
        });
        let mut policy = SecurityPolicy::new(None, None, None, false);
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());
    }
}
