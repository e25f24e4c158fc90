//! SAML 1.x Browser SSO profile validation

use async_trait::async_trait;
use tracing::warn;

use crate::binding::request::ProtocolRequest;
use crate::error::SamlError;
use crate::model::consts;
use crate::model::saml::Saml1Assertion;
use crate::policy::{PolicyTarget, SecurityPolicy, SecurityPolicyRule};

pub const SAML1BROWSERSSO_POLICY_RULE: &str = "SAML1BrowserSSO";

const ACCEPTED_METHODS: [&str; 3] = [
    consts::SAML1_CONFIRMATION_BEARER,
    consts::SAML1_CONFIRMATION_ARTIFACT,
    consts::SAML1_CONFIRMATION_ARTIFACT01,
];

/// Enforces presence of time conditions and browser-profile subject
/// confirmation on SAML 1.x SSO assertions.
#[derive(Default)]
pub struct Saml1BrowserSsoRule;

impl Saml1BrowserSsoRule {
    fn check_assertion(assertion: &Saml1Assertion) -> Result<(), SamlError> {
        let conditions_ok = assertion
            .conditions
            .as_ref()
            .is_some_and(|c| c.not_before.is_some() && c.not_on_or_after.is_some());
        if !conditions_ok {
            warn!(
                assertion_id = %assertion.assertion_id,
                "rejecting assertion without time-bounded conditions"
            );
            return Err(SamlError::SecurityPolicy(
                "Browser SSO assertion missing NotBefore/NotOnOrAfter attributes.".to_string(),
            ));
        }

        for statement in &assertion.statements {
            let confirmed = statement
                .confirmation_methods
                .iter()
                .any(|m| ACCEPTED_METHODS.contains(&m.as_str()));
            if !confirmed {
                warn!(
                    assertion_id = %assertion.assertion_id,
                    "rejecting statement without browser-profile subject confirmation"
                );
                return Err(SamlError::SecurityPolicy(
                    "Browser SSO statement lacks a supported SubjectConfirmation method."
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SecurityPolicyRule for Saml1BrowserSsoRule {
    fn rule_type(&self) -> &'static str {
        SAML1BROWSERSSO_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        _request: Option<&(dyn ProtocolRequest + '_)>,
        _policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        let Some(message) = target.message() else {
            return Ok(false);
        };

        if let Some(assertion) = message.as_saml1_assertion() {
            Self::check_assertion(assertion)?;
            return Ok(true);
        }

        if let crate::model::saml::SamlMessage::Saml1Response(response) = message {
            for assertion in &response.assertions {
                Self::check_assertion(assertion)?;
            }
            return Ok(true);
        }

        Ok(false)
    }
}
