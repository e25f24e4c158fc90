//! Delegation restriction evaluation

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use tracing::debug;

use crate::binding::request::ProtocolRequest;
use crate::error::SamlError;
use crate::model::consts;
use crate::model::saml::{Condition, Delegate};
use crate::policy::{PolicyTarget, SecurityPolicy, SecurityPolicyRule};

pub const DELEGATION_POLICY_RULE: &str = "Delegation";

/// How the configured delegate chain is matched against the condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegateMatch {
    #[default]
    #[serde(rename = "anyOrder", alias = "any")]
    Any,
    Newest,
    Oldest,
}

/// A delegate the policy expects to see.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedDelegate {
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
    /// None matches any confirmation method.
    #[serde(default)]
    pub confirmation_method: Option<String>,
}

/// Configuration of the delegation rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DelegationConfig {
    #[serde(default)]
    pub delegates: Vec<ExpectedDelegate>,
    #[serde(default)]
    pub match_mode: DelegateMatch,
    /// Window, in seconds, since the original delegation.
    #[serde(default)]
    pub max_time_since_delegation: Option<u64>,
}

/// Evaluates a DelegationRestriction condition against a configured chain.
pub struct DelegationRestrictionRule {
    delegates: Vec<ExpectedDelegate>,
    match_mode: DelegateMatch,
    max_time: Option<Duration>,
}

impl DelegationRestrictionRule {
    pub fn new(config: DelegationConfig) -> Self {
        Self {
            delegates: config.delegates,
            match_mode: config.match_mode,
            max_time: config
                .max_time_since_delegation
                .map(|s| Duration::seconds(s as i64)),
        }
    }

    fn same_format(f1: Option<&str>, f2: Option<&str>) -> bool {
        let f1 = f1.filter(|f| !f.is_empty()).unwrap_or(consts::NAMEID_FORMAT_UNSPECIFIED);
        let f2 = f2.filter(|f| !f.is_empty()).unwrap_or(consts::NAMEID_FORMAT_UNSPECIFIED);
        f1 == f2
    }

    /// The condition's delegate matches an expected one when names and
    /// formats agree and, if the expectation names one, the confirmation
    /// method as well.
    fn is_same(expected: &ExpectedDelegate, presented: &Delegate) -> bool {
        if let Some(ref method) = expected.confirmation_method {
            if presented.confirmation_method.as_deref() != Some(method.as_str()) {
                return false;
            }
        }
        expected.name == presented.name
            && Self::same_format(expected.format.as_deref(), presented.format.as_deref())
    }

    fn matches_sequence(&self, presented: &[&Delegate]) -> bool {
        if presented.len() < self.delegates.len() {
            return false;
        }
        self.delegates
            .iter()
            .zip(presented.iter())
            .all(|(expected, presented)| Self::is_same(expected, presented))
    }
}

#[async_trait]
impl SecurityPolicyRule for DelegationRestrictionRule {
    fn rule_type(&self) -> &'static str {
        DELEGATION_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        _request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        let Some(Condition::DelegationRestriction { delegates }) = target.condition() else {
            return Ok(false);
        };

        if !self.delegates.is_empty() {
            let ok = match self.match_mode {
                DelegateMatch::Any => {
                    // Each delegate in the condition must match an expected one.
                    delegates.iter().all(|presented| {
                        self.delegates
                            .iter()
                            .any(|expected| Self::is_same(expected, presented))
                    })
                }
                DelegateMatch::Oldest => {
                    let forward: Vec<&Delegate> = delegates.iter().collect();
                    self.matches_sequence(&forward)
                }
                DelegateMatch::Newest => {
                    let reversed: Vec<&Delegate> = delegates.iter().rev().collect();
                    self.matches_sequence(&reversed)
                }
            };
            if !ok {
                return Ok(false);
            }
        }

        if let Some(max_time) = self.max_time {
            // Whole-second (epoch) comparison of the delegation age.
            let now = policy.time().timestamp();
            let skew = policy.clock_skew().num_seconds();
            let within = delegates
                .first()
                .and_then(|d| d.delegation_instant)
                .is_some_and(|instant| now - instant.timestamp() - skew <= max_time.num_seconds());
            if !within {
                debug!("delegation chain is older than the acceptable window");
            }
            return Ok(within);
        }

        Ok(true)
    }
}
