//! Transport security rules
//!
//! XML signature verification, raw "blob" signature verification for the
//! redirect and POST SimpleSign bindings, TLS client certificate matching,
//! and the security-bypass rule.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::binding::request::ProtocolRequest;
use crate::error::SamlError;
use crate::model::metadata::KeyUse;
use crate::policy::{PolicyTarget, SecurityPolicy, SecurityPolicyRule};
use crate::signature::blob;

pub const XMLSIGNING_POLICY_RULE: &str = "XMLSigning";
pub const SIMPLESIGNING_POLICY_RULE: &str = "SimpleSigning";
pub const CLIENTCERTAUTH_POLICY_RULE: &str = "ClientCertAuth";
pub const NULLSECURITY_POLICY_RULE: &str = "NullSecurity";

/// Shared shape of the signature rules' configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigningRuleConfig {
    #[serde(default)]
    pub error_fatal: bool,
}

/// Validates the enveloped XML signature profile and verifies the signature
/// with the trust engine against the issuer's metadata credentials.
#[derive(Default)]
pub struct XmlSigningRule {
    error_fatal: bool,
}

impl XmlSigningRule {
    pub fn new(config: SigningRuleConfig) -> Self {
        Self {
            error_fatal: config.error_fatal,
        }
    }
}

#[async_trait]
impl SecurityPolicyRule for XmlSigningRule {
    fn rule_type(&self) -> &'static str {
        XMLSIGNING_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        _request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        let Some(message) = target.message() else {
            return Ok(false);
        };
        if policy.issuer_metadata().is_none() {
            debug!("ignoring message, no issuer metadata supplied");
            return Ok(false);
        }
        let Some(trust) = policy.trust_engine().cloned() else {
            debug!("ignoring message, no SignatureTrustEngine supplied");
            return Ok(false);
        };
        let Some(signature) = message.signature().cloned() else {
            return Ok(false);
        };

        let credentials = policy
            .resolve_credentials(KeyUse::Signing, Some(signature.algorithm.clone()))
            .await?;

        match trust.validate_signature(&signature, message.signable_id(), &credentials) {
            Ok(true) => {
                debug!("signature verified against message issuer");
                policy.set_authenticated(true);
                Ok(true)
            }
            outcome => {
                if let Err(ref e) = outcome {
                    error!(error = %e, "signature profile or verification failure");
                } else {
                    error!("unable to verify message signature with supplied trust engine");
                }
                if self.error_fatal {
                    return Err(SamlError::SecurityPolicy(
                        "Message was signed, but signature could not be verified.".to_string(),
                    ));
                }
                Ok(false)
            }
        }
    }
}

/// Reconstructs the signed blob for redirect or POST SimpleSign messages and
/// verifies it against the issuer's signing credentials.
#[derive(Default)]
pub struct SimpleSigningRule {
    error_fatal: bool,
}

impl SimpleSigningRule {
    pub fn new(config: SigningRuleConfig) -> Self {
        Self {
            error_fatal: config.error_fatal,
        }
    }
}

#[async_trait]
impl SecurityPolicyRule for SimpleSigningRule {
    fn rule_type(&self) -> &'static str {
        SIMPLESIGNING_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        if target.message().is_none() {
            return Ok(false);
        }
        if policy.issuer_metadata().is_none() {
            debug!("ignoring message, no issuer metadata supplied");
            return Ok(false);
        }
        let Some(trust) = policy.trust_engine().cloned() else {
            debug!("ignoring message, no SignatureTrustEngine supplied");
            return Ok(false);
        };
        let Some(request) = request else {
            return Ok(false);
        };

        let Some(signature_b64) = request.parameter("Signature") else {
            return Ok(false);
        };
        let Some(sig_alg) = request.parameter("SigAlg").map(str::to_string) else {
            error!("SigAlg parameter not found, no way to verify the signature");
            return Ok(false);
        };

        let input: Vec<u8> = if request.method() == "GET" {
            // The raw query string must be used; URL-encoding isn't
            // canonical, so decoded parameters would not round-trip.
            blob::redirect_blob(request.query_string()).into_bytes()
        } else {
            match blob::post_blob(
                request.parameter("SAMLRequest"),
                request.parameter("SAMLResponse"),
                request.parameter("RelayState"),
                &sig_alg,
            ) {
                Some(input) => input,
                None => {
                    warn!("unable to decode base64 in POST binding message");
                    return Ok(false);
                }
            }
        };

        let Ok(signature) = BASE64.decode(signature_b64.as_bytes()) else {
            warn!("unable to decode base64 signature parameter");
            return Ok(false);
        };

        let credentials = policy
            .resolve_credentials(KeyUse::Signing, Some(sig_alg.clone()))
            .await?;

        if trust.validate_blob(&sig_alg, &signature, &input, &credentials)? {
            debug!("signature verified against message issuer");
            policy.set_authenticated(true);
            Ok(true)
        } else {
            error!("unable to verify message signature with supplied trust engine");
            if self.error_fatal {
                return Err(SamlError::SecurityPolicy(
                    "Message was signed, but signature could not be verified.".to_string(),
                ));
            }
            Ok(false)
        }
    }
}

/// Matches a TLS client certificate presented on the transport against the
/// signing credentials of the issuer's metadata role.
#[derive(Default)]
pub struct ClientCertAuthRule {
    error_fatal: bool,
}

impl ClientCertAuthRule {
    pub fn new(config: SigningRuleConfig) -> Self {
        Self {
            error_fatal: config.error_fatal,
        }
    }
}

#[async_trait]
impl SecurityPolicyRule for ClientCertAuthRule {
    fn rule_type(&self) -> &'static str {
        CLIENTCERTAUTH_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        if target.message().is_none() {
            return Ok(false);
        }
        if policy.issuer_metadata().is_none() {
            debug!("ignoring message, no issuer metadata supplied");
            return Ok(false);
        }
        let Some(request) = request else {
            return Ok(false);
        };
        let presented = request.client_certificates().to_vec();
        if presented.is_empty() {
            return Ok(false);
        }

        let credentials = policy.resolve_credentials(KeyUse::Signing, None).await?;
        let matched = presented.iter().any(|cert| {
            credentials
                .iter()
                .any(|cred| cred.certificates.iter().any(|c| c == cert))
        });

        if matched {
            debug!("client certificate verified against metadata credentials");
            policy.set_authenticated(true);
            return Ok(true);
        }

        warn!("unable to match client certificate against metadata credentials");
        if self.error_fatal {
            return Err(SamlError::SecurityPolicy(
                "Unable to verify client certificate against issuer metadata.".to_string(),
            ));
        }
        Ok(false)
    }
}

/// Marks the message authenticated unconditionally. Debug use only.
#[derive(Default)]
pub struct NullSecurityRule;

#[async_trait]
impl SecurityPolicyRule for NullSecurityRule {
    fn rule_type(&self) -> &'static str {
        NULLSECURITY_POLICY_RULE
    }

    async fn evaluate(
        &self,
        _target: PolicyTarget<'_>,
        _request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        warn!("security enforced using NULL policy rule, be sure you know what you're doing");
        policy.set_authenticated(true);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::request::HttpRequest;
    use crate::model::consts;
    use crate::model::metadata::{EntityDescriptor, KeyDescriptor, RoleDescriptor, RoleRef};
    use crate::model::saml::{Response, SamlMessage};
    use crate::model::xmlsec::KeyInfo;
    use crate::security::test_keys::KEY_A;
    use crate::security::{sign_bytes, ExplicitKeyTrustEngine};
    use crate::signature::{sign_content, ContentReference};
    use rsa::pkcs8::EncodePublicKey;
    use std::sync::Arc;

    fn role_with_key(entity_id: &str) -> RoleRef {
        let spki = KEY_A.public_key().to_public_key_der().unwrap().into_vec();
        let entity = Arc::new(EntityDescriptor {
            entity_id: entity_id.to_string(),
            roles: vec![RoleDescriptor {
                role_type: Some(crate::model::metadata::RoleType::IdpSso),
                protocol_support_enumeration: consts::SAML20P_PROTOCOL_ENUM.to_string(),
                key_descriptors: vec![KeyDescriptor {
                    key_use: None,
                    key_info: Some(KeyInfo {
                        public_keys: vec![spki],
                        ..Default::default()
                    }),
                    encryption_methods: Vec::new(),
                }],
                ..Default::default()
            }],
            ..Default::default()
        });
        RoleRef::new(entity, 0)
    }

    fn policy_with_issuer(entity_id: &str) -> SecurityPolicy {
        let mut policy = SecurityPolicy::new(
            None,
            None,
            Some(Arc::new(ExplicitKeyTrustEngine::new())),
            false,
        );
        policy.set_issuer_metadata(Some(role_with_key(entity_id))).unwrap();
        policy
    }

    #[tokio::test]
    async fn test_xml_signing_authenticates() {
        let content = b"<samlp:Response ID=\"_r1\"/>";
        let signature = sign_content(
            content,
            Some("_r1"),
            &KEY_A,
            consts::SIG_RSA_SHA256,
            ContentReference::for_object(Some("_r1")),
        )
        .unwrap();

        let msg = SamlMessage::Response(Response {
            id: "_r1".to_string(),
            signature: Some(signature),
            ..Default::default()
        });

        let rule = XmlSigningRule::default();
        let mut policy = policy_with_issuer("https://idp.example.org");
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());
        assert!(policy.is_authenticated());
    }

    #[tokio::test]
    async fn test_xml_signing_bad_signature_fatal_when_configured() {
        let content = b"<samlp:Response ID=\"_r1\"/>";
        let mut signature = sign_content(
            content,
            Some("_r1"),
            &KEY_A,
            consts::SIG_RSA_SHA256,
            ContentReference::for_object(Some("_r1")),
        )
        .unwrap();
        signature.signed_info[10] ^= 0xff;

        let msg = SamlMessage::Response(Response {
            id: "_r1".to_string(),
            signature: Some(signature),
            ..Default::default()
        });

        let lenient = XmlSigningRule::default();
        let mut policy = policy_with_issuer("https://idp.example.org");
        assert!(!lenient
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());
        assert!(!policy.is_authenticated());

        let strict = XmlSigningRule::new(SigningRuleConfig { error_fatal: true });
        let mut policy = policy_with_issuer("https://idp.example.org");
        assert!(strict
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_simple_signing_redirect() {
        // The signed blob is the raw query substring, URL-encoding intact.
        let blob = format!(
            "SAMLResponse=X&RelayState=Y&SigAlg={}",
            urlencoding::encode(consts::SIG_RSA_SHA256)
        );
        let signature = sign_bytes(&KEY_A, consts::SIG_RSA_SHA256, blob.as_bytes()).unwrap();
        let query = format!(
            "{}&Signature={}",
            blob,
            urlencoding::encode(&BASE64.encode(&signature))
        );

        let request = HttpRequest::builder()
            .method("GET")
            .url("https://sp.example.org/SAML2/Redirect")
            .query(&query)
            .build();

        let msg = SamlMessage::Response(Response {
            id: "_r1".to_string(),
            ..Default::default()
        });

        let rule = SimpleSigningRule::default();
        let mut policy = policy_with_issuer("https://idp.example.org");
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), Some(&request), &mut policy)
            .await
            .unwrap());
        assert!(policy.is_authenticated());
    }

    #[tokio::test]
    async fn test_null_security_authenticates() {
        let msg = SamlMessage::Response(Response::default());
        let rule = NullSecurityRule;
        let mut policy = SecurityPolicy::new(None, None, None, false);
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());
        assert!(policy.is_authenticated());
    }
}
