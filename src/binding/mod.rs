//! Binding and transport decode layer
//!
//! Decoders turn a transport request into the abstract message object the
//! policy engine consumes, extracting message details (identifier, issue
//! instant, issuer and its metadata role) into the policy along the way.

pub mod artifact;
pub mod request;
pub mod saml1;
pub mod saml2;

use async_trait::async_trait;

use crate::error::SamlError;
use crate::model::metadata::RoleRef;
use crate::model::saml::{ArtifactResponse, Saml1Response, SamlMessage};
use crate::policy::SecurityPolicy;

pub use artifact::{ArtifactMap, SamlArtifact};
pub use request::{HttpRequest, HttpResponse, ProtocolRequest, ProtocolResponse};

/// A decoded message plus the caller-side relay state.
#[derive(Debug)]
pub struct DecodedMessage {
    pub message: SamlMessage,
    pub relay_state: Option<String>,
}

/// A binding-specific message decoder.
#[async_trait]
pub trait MessageDecoder: Send + Sync {
    /// Binding URI this decoder implements.
    fn binding(&self) -> &'static str;

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError>;
}

/// Out-of-band dereference of artifacts into protocol messages, supplied by
/// the caller (typically a SOAP client).
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve_saml1(
        &self,
        artifacts: &[SamlArtifact],
        idp: &RoleRef,
        policy: &mut SecurityPolicy,
    ) -> Result<Saml1Response, SamlError>;

    async fn resolve_saml2(
        &self,
        artifact: &SamlArtifact,
        role: &RoleRef,
        policy: &mut SecurityPolicy,
    ) -> Result<ArtifactResponse, SamlError>;
}
