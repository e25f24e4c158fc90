//! Mock collaborators

use async_trait::async_trait;

use saml_core::binding::{ArtifactResolver, SamlArtifact};
use saml_core::error::SamlError;
use saml_core::model::metadata::RoleRef;
use saml_core::model::saml::{ArtifactResponse, Saml1Response, SamlMessage, Status};
use saml_core::policy::SecurityPolicy;

/// Artifact resolver returning canned responses instead of performing a
/// SOAP exchange.
pub struct MockArtifactResolver {
    pub saml1_response: Option<Saml1Response>,
    pub saml2_message: Option<SamlMessage>,
}

impl MockArtifactResolver {
    pub fn with_saml1(response: Saml1Response) -> Self {
        Self {
            saml1_response: Some(response),
            saml2_message: None,
        }
    }

    pub fn with_saml2(message: SamlMessage) -> Self {
        Self {
            saml1_response: None,
            saml2_message: Some(message),
        }
    }
}

#[async_trait]
impl ArtifactResolver for MockArtifactResolver {
    async fn resolve_saml1(
        &self,
        _artifacts: &[SamlArtifact],
        _idp: &RoleRef,
        _policy: &mut SecurityPolicy,
    ) -> Result<Saml1Response, SamlError> {
        self.saml1_response
            .clone()
            .ok_or_else(|| SamlError::Binding("no canned SAML 1 response".to_string()))
    }

    async fn resolve_saml2(
        &self,
        artifact: &SamlArtifact,
        _role: &RoleRef,
        _policy: &mut SecurityPolicy,
    ) -> Result<ArtifactResponse, SamlError> {
        let message = self
            .saml2_message
            .clone()
            .ok_or_else(|| SamlError::Binding("no canned SAML 2 message".to_string()))?;
        Ok(ArtifactResponse {
            id: format!("_ar{}", hex::encode(&artifact.message_handle()[..4])),
            in_response_to: None,
            issue_instant: Some(chrono::Utc::now()),
            issuer: None,
            status: Some(Status::success()),
            message: Some(Box::new(message)),
        })
    }
}
