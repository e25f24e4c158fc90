//! Bearer SubjectConfirmation validation

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::binding::request::ProtocolRequest;
use crate::error::SamlError;
use crate::model::consts;
use crate::policy::{PolicyTarget, SecurityPolicy, SecurityPolicyRule};

pub const BEARER_POLICY_RULE: &str = "Bearer";

fn default_true() -> bool {
    true
}

/// Configuration of the bearer confirmation rule.
#[derive(Debug, Clone, Deserialize)]
pub struct BearerConfirmationConfig {
    #[serde(default = "default_true")]
    pub check_validity: bool,
    #[serde(default = "default_true")]
    pub check_recipient: bool,
    #[serde(default)]
    pub check_correlation: bool,
    #[serde(default)]
    pub block_unsolicited: bool,
    #[serde(default = "default_true")]
    pub missing_fatal: bool,
}

impl Default for BearerConfirmationConfig {
    fn default() -> Self {
        Self {
            check_validity: true,
            check_recipient: true,
            check_correlation: false,
            block_unsolicited: false,
            missing_fatal: true,
        }
    }
}

/// Validates that a SAML 2.0 assertion carries a bearer SubjectConfirmation
/// satisfying delivery requirements, and records the satisfying confirmation
/// on the policy.
pub struct BearerConfirmationRule {
    check_validity: bool,
    check_recipient: bool,
    check_correlation: bool,
    missing_fatal: bool,
}

impl BearerConfirmationRule {
    pub fn new(config: BearerConfirmationConfig) -> Self {
        let mut check_correlation = config.check_correlation;
        if config.block_unsolicited && !check_correlation {
            check_correlation = true;
            tracing::info!(
                "enabling request/response correlation checking to block unsolicited responses"
            );
        }
        Self {
            check_validity: config.check_validity,
            check_recipient: config.check_recipient,
            check_correlation,
            missing_fatal: config.missing_fatal,
        }
    }
}

impl Default for BearerConfirmationRule {
    fn default() -> Self {
        Self::new(BearerConfirmationConfig::default())
    }
}

#[async_trait]
impl SecurityPolicyRule for BearerConfirmationRule {
    fn rule_type(&self) -> &'static str {
        BEARER_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        let Some(assertion) = target.message().and_then(|m| m.as_saml2_assertion()) else {
            return Ok(false);
        };

        let mut msg = "assertion is missing bearer SubjectConfirmation";

        if let Some(subject) = assertion.subject.as_ref() {
            'confirmation: for confirmation in &subject.confirmations {
                if confirmation.method != consts::CONFIRMATION_BEARER {
                    continue;
                }
                let data = confirmation.data.as_ref();

                if self.check_recipient {
                    if let Some(url) = request.map(|r| r.request_url()) {
                        let destination = url.split('?').next().unwrap_or(url);
                        if data.and_then(|d| d.recipient.as_deref()) != Some(destination) {
                            msg = "bearer confirmation failed with recipient mismatch";
                            continue 'confirmation;
                        }
                    }
                }

                if self.check_correlation {
                    if let Some(correlation_id) = policy.correlation_id() {
                        if data.and_then(|d| d.in_response_to.as_deref()) == Some(correlation_id) {
                            debug!("request/response correlation validated");
                        } else {
                            msg = "bearer confirmation failed on lack of request/response correlation";
                            continue 'confirmation;
                        }
                    } else if data.and_then(|d| d.in_response_to.as_deref()).is_some() {
                        msg = "bearer confirmation issued in response to request failed on lack of correlation ID";
                        continue 'confirmation;
                    } else {
                        msg = "unsolicited bearer confirmation rejected by policy";
                        continue 'confirmation;
                    }
                } else {
                    debug!("ignoring InResponseTo, correlation checking is disabled");
                }

                if self.check_validity {
                    // Whole-second (epoch) comparison, as with Conditions
                    // windows; fractional digits must not tip the boundary.
                    let now = policy.time().timestamp();
                    let skew = policy.clock_skew().num_seconds();
                    let Some(not_on_or_after) = data.and_then(|d| d.not_on_or_after) else {
                        msg = "bearer SubjectConfirmationData missing NotOnOrAfter attribute";
                        continue 'confirmation;
                    };
                    if not_on_or_after.timestamp() <= now - skew {
                        msg = "bearer confirmation has expired";
                        continue 'confirmation;
                    }
                    if let Some(not_before) = data.and_then(|d| d.not_before) {
                        if now + skew < not_before.timestamp() {
                            msg = "bearer confirmation not yet valid";
                            continue 'confirmation;
                        }
                    }
                }

                policy.set_subject_confirmation(confirmation.clone());
                debug!("assertion satisfied bearer confirmation requirements");
                return Ok(true);
            }
        }

        warn!("{}", msg);
        if self.missing_fatal {
            return Err(SamlError::SecurityPolicy(format!(
                "Unable to locate satisfiable bearer SubjectConfirmation in assertion ({}).",
                msg
            )));
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::request::HttpRequest;
    use crate::model::saml::{
        Assertion, SamlMessage, Subject, SubjectConfirmation, SubjectConfirmationData,
    };
    use chrono::{Duration, Utc};

    fn bearer_assertion(recipient: &str, in_response_to: Option<&str>) -> SamlMessage {
        SamlMessage::Assertion(Assertion {
            id: "_a1".to_string(),
            subject: Some(Subject {
                name_id: None,
                confirmations: vec![SubjectConfirmation {
                    method: consts::CONFIRMATION_BEARER.to_string(),
                    name_id: None,
                    data: Some(SubjectConfirmationData {
                        recipient: Some(recipient.to_string()),
                        not_on_or_after: Some(Utc::now() + Duration::seconds(300)),
                        in_response_to: in_response_to.map(str::to_string),
                        ..Default::default()
                    }),
                }],
            }),
            ..Default::default()
        })
    }

    fn request_for(url: &str) -> HttpRequest {
        HttpRequest::builder().method("POST").url(url).build()
    }

    #[tokio::test]
    async fn test_recipient_match_ignores_query() {
        let rule = BearerConfirmationRule::default();
        let msg = bearer_assertion("https://sp.example.org/ACS", None);
        let request = request_for("https://sp.example.org/ACS?foo=bar");
        let mut policy = SecurityPolicy::new(None, None, None, false);

        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), Some(&request), &mut policy)
            .await
            .unwrap());
        assert!(policy.subject_confirmation().is_some());
    }

    #[tokio::test]
    async fn test_recipient_mismatch_fatal() {
        let rule = BearerConfirmationRule::default();
        let msg = bearer_assertion("https://other/ACS", None);
        let request = request_for("https://sp.example.org/ACS?foo=bar");
        let mut policy = SecurityPolicy::new(None, None, None, false);

        let err = rule
            .evaluate(PolicyTarget::Message(&msg), Some(&request), &mut policy)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("recipient mismatch"));
    }

    #[tokio::test]
    async fn test_expired_confirmation_rejected() {
        let rule = BearerConfirmationRule::default();
        let mut msg = bearer_assertion("https://sp.example.org/ACS", None);
        if let SamlMessage::Assertion(ref mut a) = msg {
            a.subject.as_mut().unwrap().confirmations[0]
                .data
                .as_mut()
                .unwrap()
                .not_on_or_after = Some(Utc::now() - Duration::hours(1));
        }
        let request = request_for("https://sp.example.org/ACS");
        let mut policy = SecurityPolicy::new(None, None, None, false);

        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), Some(&request), &mut policy)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_correlation_enforced() {
        let rule = BearerConfirmationRule::new(BearerConfirmationConfig {
            check_correlation: true,
            ..Default::default()
        });
        let msg = bearer_assertion("https://sp.example.org/ACS", Some("_req1"));
        let request = request_for("https://sp.example.org/ACS");

        let mut policy = SecurityPolicy::new(None, None, None, false);
        policy.set_correlation_id(Some("_req1".to_string()));
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), Some(&request), &mut policy)
            .await
            .unwrap());

        let mut wrong = SecurityPolicy::new(None, None, None, false);
        wrong.set_correlation_id(Some("_other".to_string()));
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), Some(&request), &mut wrong)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_not_fatal_when_configured() {
        let rule = BearerConfirmationRule::new(BearerConfirmationConfig {
            missing_fatal: false,
            ..Default::default()
        });
        let msg = SamlMessage::Assertion(Assertion {
            id: "_a1".to_string(),
            ..Default::default()
        });
        let mut policy = SecurityPolicy::new(None, None, None, false);
        assert!(!rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());
    }
}
