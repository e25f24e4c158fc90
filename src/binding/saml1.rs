//! SAML 1.x binding decoders
//!
//! Browser POST profile, artifact profile and SOAP. SAML 1.x has no message
//! Issuer element; the issuer is taken from the first assertion (or, for
//! artifacts, from the metadata reverse lookup).

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tracing::{debug, error, warn};

use crate::binding::request::{ProtocolRequest, ProtocolResponse};
use crate::binding::{ArtifactResolver, DecodedMessage, MessageDecoder, SamlArtifact};
use crate::error::SamlError;
use crate::metadata::LookupCriteria;
use crate::model::consts;
use crate::model::metadata::RoleType;
use crate::model::saml::{Saml1Response, SamlMessage};
use crate::policy::SecurityPolicy;

/// Record message identifier, issue instant and issuer details on the
/// policy, then look the issuer's role up in metadata.
pub(crate) async fn extract_message_details(
    message: &SamlMessage,
    protocol: &str,
    fallback_protocol: Option<&str>,
    policy: &mut SecurityPolicy,
) -> Result<(), SamlError> {
    policy.set_message_id(message.id().map(str::to_string));
    policy.set_issue_instant(message.issue_instant());

    let issuer_name = match message {
        SamlMessage::Saml1Response(response) => response
            .assertions
            .first()
            .map(|a| a.issuer.clone())
            .filter(|i| !i.is_empty()),
        _ => None,
    };

    let Some(issuer_name) = issuer_name else {
        warn!("issuer identity not extracted");
        return Ok(());
    };
    debug!(issuer = %issuer_name, "extracted issuer from SAML 1.x message");
    policy.set_issuer_name(&issuer_name)?;

    if policy.issuer_metadata().is_some() {
        debug!("metadata for issuer already set, leaving in place");
        return Ok(());
    }

    let Some(role_type) = policy.role().cloned() else {
        return Ok(());
    };
    if policy.metadata_provider().is_none() {
        return Ok(());
    }

    let mut criteria = LookupCriteria::entity_id(issuer_name.clone()).with_role(role_type, protocol);
    if let Some(p2) = fallback_protocol {
        criteria = criteria.with_fallback_protocol(p2);
    }
    match policy.lookup_entity(&criteria).await? {
        Some(lookup) => match lookup.role {
            Some(role) => policy.set_issuer_metadata(Some(role))?,
            None => warn!(issuer = %issuer_name, "unable to find compatible role in metadata"),
        },
        None => {
            warn!(issuer = %issuer_name, "no metadata found, can't establish identity of issuer")
        }
    }
    Ok(())
}

/// Browser POST profile decoder.
#[derive(Default)]
pub struct Saml1PostDecoder;

#[async_trait]
impl MessageDecoder for Saml1PostDecoder {
    fn binding(&self) -> &'static str {
        consts::SAML1_PROFILE_BROWSER_POST
    }

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        _response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError> {
        debug!("validating input");
        if request.method() != "POST" {
            return Err(SamlError::Binding(format!(
                "invalid HTTP method ({})",
                request.method()
            )));
        }
        let (Some(saml_response), Some(target)) =
            (request.parameter("SAMLResponse"), request.parameter("TARGET"))
        else {
            return Err(SamlError::Binding(
                "request missing SAMLResponse or TARGET form parameters".to_string(),
            ));
        };
        let relay_state = target.to_string();

        let decoded = BASE64.decode(saml_response.as_bytes()).map_err(|_| {
            SamlError::Binding("unable to decode base64 in POST profile response".to_string())
        })?;

        let message = crate::xml::message::read_message(&decoded)?;
        let SamlMessage::Saml1Response(ref response) = message else {
            return Err(SamlError::Binding(
                "decoded message was not a SAML 1.x Response".to_string(),
            ));
        };
        let protocol = response.protocol();

        extract_message_details(&message, protocol, None, policy).await?;
        policy.evaluate(&message, Some(request)).await?;

        // The Recipient attribute must name this endpoint.
        let SamlMessage::Saml1Response(ref response) = message else {
            unreachable!()
        };
        check_recipient(response, request)?;

        Ok(DecodedMessage {
            message,
            relay_state: Some(relay_state),
        })
    }
}

fn check_recipient(
    response: &Saml1Response,
    request: &(dyn ProtocolRequest + '_),
) -> Result<(), SamlError> {
    let Some(recipient) = response.recipient.as_deref().filter(|r| !r.is_empty()) else {
        error!("response missing Recipient attribute");
        return Err(SamlError::Binding(
            "SAML response did not contain Recipient attribute identifying intended destination"
                .to_string(),
        ));
    };
    let url = request.request_url();
    let delivered = url.split('?').next().unwrap_or(url);
    if recipient != delivered {
        error!(targeted = %recipient, delivered = %delivered, "POST delivered to incorrect URL");
        return Err(SamlError::Binding(
            "SAML message delivered with POST to incorrect server URL".to_string(),
        ));
    }
    Ok(())
}

/// Artifact profile decoder: replay-checks the raw artifacts, locates the
/// source via metadata, and hands dereferencing to the caller-supplied
/// resolver.
pub struct Saml1ArtifactDecoder {
    resolver: Arc<dyn ArtifactResolver>,
}

impl Saml1ArtifactDecoder {
    pub fn new(resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl MessageDecoder for Saml1ArtifactDecoder {
    fn binding(&self) -> &'static str {
        consts::SAML1_PROFILE_BROWSER_ARTIFACT
    }

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        _response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError> {
        debug!("validating input");
        let encoded = request.parameters("SAMLart");
        let target = request.parameter("TARGET");
        if encoded.is_empty() || target.is_none() {
            return Err(SamlError::Binding(
                "request missing SAMLart or TARGET query string parameters".to_string(),
            ));
        }
        let relay_state = target.unwrap().to_string();

        if policy.metadata_provider().is_none() || policy.role().is_none() {
            return Err(SamlError::Binding(
                "artifact profile requires ArtifactResolver and MetadataProvider implementations be supplied"
                    .to_string(),
            ));
        }

        let mut artifacts = Vec::new();
        for raw in &encoded {
            debug!(artifact = %raw, "processing encoded artifact");

            // Replay cache expiration for artifacts is twice the clock skew.
            if let Some(cache) = policy.replay_cache() {
                let expires = Utc::now() + policy.clock_skew() + policy.clock_skew();
                if !cache.check("SAML1Artifact", raw, expires) {
                    error!(artifact = %raw, "replay detected of artifact");
                    return Err(SamlError::Binding(format!(
                        "rejecting replayed artifact ({})",
                        raw
                    )));
                }
            } else {
                warn!("replay cache was not provided, this is a serious security risk!");
            }

            artifacts.push(SamlArtifact::parse(raw)?);
        }

        debug!("attempting to determine source of artifact(s)");
        let criteria = LookupCriteria::artifact_source(artifacts[0].source())
            .with_role(policy.role().cloned().unwrap(), consts::SAML11_PROTOCOL_ENUM)
            .with_fallback_protocol(consts::SAML10_PROTOCOL_ENUM);
        let lookup = policy.lookup_entity(&criteria).await?.ok_or_else(|| {
            error!(
                artifact = %hex::encode(artifacts[0].raw()),
                "metadata lookup failed, unable to determine issuer of artifact"
            );
            SamlError::Binding(
                "metadata lookup failed, unable to determine artifact issuer".to_string(),
            )
        })?;

        debug!(issuer = %lookup.entity.entity_id, "artifact issued by");
        let Some(role) = lookup.role else {
            return Err(SamlError::Binding(
                "unable to find compatible metadata role for artifact issuer".to_string(),
            ));
        };
        if !role.role().is(&RoleType::IdpSso) {
            return Err(SamlError::Binding(
                "unable to find compatible metadata role for artifact issuer".to_string(),
            ));
        }

        policy.set_issuer_name(&lookup.entity.entity_id)?;
        policy.set_issuer_metadata(Some(role.clone()))?;

        debug!("calling ArtifactResolver");
        let response = self
            .resolver
            .resolve_saml1(&artifacts, &role, policy)
            .await?;

        // The policy is enforced against the response by the resolve step.
        Ok(DecodedMessage {
            message: SamlMessage::Saml1Response(response),
            relay_state: Some(relay_state),
        })
    }
}

/// SOAP binding decoder with two-layer policy evaluation: the envelope
/// first, then (after a message-state reset) the inner request.
#[derive(Default)]
pub struct Saml1SoapDecoder;

#[async_trait]
impl MessageDecoder for Saml1SoapDecoder {
    fn binding(&self) -> &'static str {
        consts::SAML1_BINDING_SOAP
    }

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        _response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError> {
        debug!("validating input");
        let content_type = request.content_type().unwrap_or("");
        if !content_type.starts_with("text/xml") {
            return Err(SamlError::Binding(format!(
                "invalid content type ({}) for SOAP message",
                content_type
            )));
        }
        let body = request
            .body()
            .ok_or_else(|| SamlError::Binding("SOAP request had an empty body".to_string()))?;

        let envelope_message = crate::xml::message::read_message(body)?;
        let SamlMessage::Envelope(ref envelope) = envelope_message else {
            return Err(SamlError::Binding(
                "decoded message was not a SOAP 1.1 Envelope".to_string(),
            ));
        };

        let inner = match envelope.body.as_slice() {
            [SamlMessage::Saml1Request(request)] => request.clone(),
            _ => {
                return Err(SamlError::Binding(
                    "SOAP Envelope did not contain a single SAML Request".to_string(),
                ))
            }
        };

        // Layer 1: the envelope itself.
        policy.evaluate(&envelope_message, Some(request)).await?;
        policy.reset(true);

        // Layer 2: the SAML request inside the body.
        let message = SamlMessage::Saml1Request(inner);
        policy.set_message_id(message.id().map(str::to_string));
        policy.set_issue_instant(message.issue_instant());
        policy.evaluate(&message, Some(request)).await?;

        Ok(DecodedMessage {
            message,
            relay_state: None,
        })
    }
}
