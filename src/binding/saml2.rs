//! SAML 2.0 binding decoders
//!
//! POST (plus SimpleSign), Redirect (DEFLATE), Artifact and SOAP/PAOS. The
//! decoders also recover request/response correlation state stashed in
//! cookies keyed by relay state, and garbage-collect stale correlation
//! cookies.

use std::io::Read;
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
use crate::model::saml::SamlMessage;
use crate::policy::SecurityPolicy;

const CORRELATION_COOKIE_PREFIX: &str = "_opensaml_req_";
const MAX_CORRELATION_COOKIES: usize = 20;

/// Recover a correlation ID stashed in a cookie named by the relay state,
/// deleting the cookie, and garbage-collect stale correlation cookies.
pub(crate) fn extract_correlation_id(
    request: &(dyn ProtocolRequest + '_),
    mut response: Option<&mut (dyn ProtocolResponse + '_)>,
    relay_state: Option<&str>,
    policy: &mut SecurityPolicy,
) {
    let Some(relay_state) = relay_state.filter(|r| !r.is_empty()) else {
        debug!("no RelayState, unable to search for request/response correlation cookie");
        return;
    };

    if let Some(ref mut response) = response {
        // Walk the correlation cookies in reverse name order, keep the limit,
        // clean up the remainder.
        let mut kept = 0usize;
        let mut purged = 0usize;
        for (name, _) in request.cookies().iter().rev() {
            if name.starts_with(CORRELATION_COOKIE_PREFIX) {
                if kept < MAX_CORRELATION_COOKIES {
                    kept += 1;
                } else {
                    response.set_cookie(name, None);
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            debug!(purged, "purged stale request correlation cookie(s) from client");
        }
    }

    let cookie_name = format!(
        "{}{}",
        CORRELATION_COOKIE_PREFIX,
        urlencoding::encode(relay_state)
    );
    match request.cookies().get(&cookie_name) {
        Some(value) if !value.is_empty() => {
            debug!(value = %value, "recovered request/response correlation value");
            let decoded = urlencoding::decode(value)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| value.clone());
            policy.set_correlation_id(Some(decoded));
            if let Some(response) = response {
                response.set_cookie(&cookie_name, None);
            }
        }
        _ => debug!("no request/response correlation cookie found"),
    }
}

/// Record SAML 2.0 message details on the policy: identifier, issue
/// instant, InResponseTo, the issuer (falling back to the first assertion's
/// for a Response), and the issuer's metadata role.
pub(crate) async fn extract_message_details(
    message: &SamlMessage,
    protocol: &str,
    policy: &mut SecurityPolicy,
) -> Result<(), SamlError> {
    policy.set_message_id(message.id().map(str::to_string));
    policy.set_issue_instant(message.issue_instant());
    policy.set_in_response_to(message.in_response_to().map(str::to_string));

    debug!("extracting issuer from SAML 2.0 protocol message");
    let issuer = message.issuer().cloned().or_else(|| {
        message
            .as_saml2_response()
            .and_then(|r| r.assertions.first())
            .and_then(|a| a.issuer.clone())
    });

    let Some(issuer) = issuer else {
        warn!("issuer identity not extracted");
        return Ok(());
    };
    debug!(issuer = %issuer.name, "message from");

    // Only an entity-format issuer is usable for metadata lookup.
    let entity_format = issuer
        .format
        .as_deref()
        .map_or(true, |f| f == consts::NAMEID_FORMAT_ENTITY);
    policy.set_issuer(issuer.clone())?;

    if policy.issuer_metadata().is_some() {
        debug!("metadata for issuer already set, leaving in place");
        return Ok(());
    }
    if policy.metadata_provider().is_none() || policy.role().is_none() {
        return Ok(());
    }
    if !entity_format {
        warn!("non-system entity issuer, skipping metadata lookup");
        return Ok(());
    }

    debug!("searching metadata for message issuer");
    let criteria = LookupCriteria::entity_id(issuer.name.clone())
        .with_role(policy.role().cloned().unwrap(), protocol);
    match policy.lookup_entity(&criteria).await? {
        None => warn!(issuer = %issuer.name, "no metadata found, can't establish identity of issuer"),
        Some(lookup) => match lookup.role {
            None => warn!("unable to find compatible role in metadata"),
            Some(role) => policy.set_issuer_metadata(Some(role))?,
        },
    }
    Ok(())
}

fn decode_message_parameter(
    request: &(dyn ProtocolRequest + '_),
) -> Result<(String, Vec<u8>), SamlError> {
    let encoded = request
        .parameter("SAMLResponse")
        .or_else(|| request.parameter("SAMLRequest"))
        .ok_or_else(|| {
            SamlError::Binding(
                "request missing SAMLRequest or SAMLResponse parameter".to_string(),
            )
        })?;
    let decoded = BASE64
        .decode(encoded.as_bytes())
        .map_err(|_| SamlError::Binding("unable to decode base64 in SAML message".to_string()))?;
    Ok((encoded.to_string(), decoded))
}

/// HTTP-POST binding decoder; also used for POST-SimpleSign, whose signature
/// is handled by the SimpleSigning policy rule.
pub struct Saml2PostDecoder {
    binding: &'static str,
}

impl Saml2PostDecoder {
    pub fn new() -> Self {
        Self {
            binding: consts::SAML20_BINDING_HTTP_POST,
        }
    }

    pub fn simple_sign() -> Self {
        Self {
            binding: consts::SAML20_BINDING_HTTP_POST_SIMPLESIGN,
        }
    }
}

impl Default for Saml2PostDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageDecoder for Saml2PostDecoder {
    fn binding(&self) -> &'static str {
        self.binding
    }

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError> {
        debug!("validating input");
        if request.method() != "POST" {
            return Err(SamlError::Binding(format!(
                "invalid HTTP method ({})",
                request.method()
            )));
        }
        let (_, xml) = decode_message_parameter(request)?;
        let relay_state = request.parameter("RelayState").map(str::to_string);

        let message = crate::xml::message::read_message(&xml)?;

        extract_correlation_id(request, response, relay_state.as_deref(), policy);
        extract_message_details(&message, consts::SAML20P_PROTOCOL_ENUM, policy).await?;
        policy.evaluate(&message, Some(request)).await?;

        Ok(DecodedMessage {
            message,
            relay_state,
        })
    }
}

/// HTTP-Redirect (DEFLATE) binding decoder; the signature, when present, is
/// verified over the raw query by the SimpleSigning rule.
#[derive(Default)]
pub struct Saml2RedirectDecoder;

impl Saml2RedirectDecoder {
    fn inflate(data: &[u8]) -> Result<Vec<u8>, SamlError> {
        let mut decoder = flate2::read::DeflateDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|_| SamlError::Binding("unable to inflate message".to_string()))?;
        Ok(out)
    }
}

#[async_trait]
impl MessageDecoder for Saml2RedirectDecoder {
    fn binding(&self) -> &'static str {
        consts::SAML20_BINDING_HTTP_REDIRECT
    }

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError> {
        debug!("validating input");
        let (_, compressed) = decode_message_parameter(request)?;
        let xml = Self::inflate(&compressed)?;
        let relay_state = request.parameter("RelayState").map(str::to_string);

        let message = crate::xml::message::read_message(&xml)?;

        extract_correlation_id(request, response, relay_state.as_deref(), policy);
        extract_message_details(&message, consts::SAML20P_PROTOCOL_ENUM, policy).await?;
        policy.evaluate(&message, Some(request)).await?;

        Ok(DecodedMessage {
            message,
            relay_state,
        })
    }
}

/// HTTP-Artifact binding decoder.
pub struct Saml2ArtifactDecoder {
    resolver: Arc<dyn ArtifactResolver>,
}

impl Saml2ArtifactDecoder {
    pub fn new(resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl MessageDecoder for Saml2ArtifactDecoder {
    fn binding(&self) -> &'static str {
        consts::SAML20_BINDING_HTTP_ARTIFACT
    }

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError> {
        debug!("validating input");
        let Some(encoded) = request.parameter("SAMLart").map(str::to_string) else {
            return Err(SamlError::Binding(
                "request missing SAMLart parameter".to_string(),
            ));
        };
        let relay_state = request.parameter("RelayState").map(str::to_string);

        if policy.metadata_provider().is_none() || policy.role().is_none() {
            return Err(SamlError::Binding(
                "artifact binding requires ArtifactResolver and MetadataProvider implementations be supplied"
                    .to_string(),
            ));
        }

        if let Some(cache) = policy.replay_cache() {
            let expires = Utc::now() + policy.clock_skew() + policy.clock_skew();
            if !cache.check("SAML2Artifact", &encoded, expires) {
                error!(artifact = %encoded, "replay detected of artifact");
                return Err(SamlError::Binding(format!(
                    "rejecting replayed artifact ({})",
                    encoded
                )));
            }
        } else {
            warn!("replay cache was not provided, this is a serious security risk!");
        }

        let artifact = SamlArtifact::parse(&encoded)?;
        if !artifact.is_saml2() {
            return Err(SamlError::Artifact(
                "artifact is not a SAML 2.0 type".to_string(),
            ));
        }

        debug!("attempting to determine source of artifact");
        let criteria = LookupCriteria::artifact_source(artifact.source()).with_role(
            policy.role().cloned().unwrap(),
            consts::SAML20P_PROTOCOL_ENUM,
        );
        let lookup = policy.lookup_entity(&criteria).await?.ok_or_else(|| {
            SamlError::Binding(
                "metadata lookup failed, unable to determine artifact issuer".to_string(),
            )
        })?;
        let Some(role) = lookup.role else {
            return Err(SamlError::Binding(
                "unable to find compatible metadata role for artifact issuer".to_string(),
            ));
        };

        policy.set_issuer_name(&lookup.entity.entity_id)?;
        policy.set_issuer_metadata(Some(role.clone()))?;

        debug!("calling ArtifactResolver");
        let artifact_response = self.resolver.resolve_saml2(&artifact, &role, policy).await?;

        let wrapper = SamlMessage::ArtifactResponse(artifact_response);
        extract_correlation_id(request, response, relay_state.as_deref(), policy);
        extract_message_details(&wrapper, consts::SAML20P_PROTOCOL_ENUM, policy).await?;
        policy.evaluate(&wrapper, Some(request)).await?;

        // Unwrap the dereferenced message when present.
        let message = match wrapper {
            SamlMessage::ArtifactResponse(ar) if ar.message.is_some() => *ar.message.unwrap(),
            other => other,
        };

        Ok(DecodedMessage {
            message,
            relay_state,
        })
    }
}

/// SOAP and PAOS (ECP) decoders with two-layer policy evaluation.
pub struct Saml2SoapDecoder {
    binding: &'static str,
}

impl Saml2SoapDecoder {
    pub fn soap() -> Self {
        Self {
            binding: consts::SAML20_BINDING_SOAP,
        }
    }

    pub fn paos() -> Self {
        Self {
            binding: consts::SAML20_BINDING_PAOS,
        }
    }
}

#[async_trait]
impl MessageDecoder for Saml2SoapDecoder {
    fn binding(&self) -> &'static str {
        self.binding
    }

    async fn decode(
        &self,
        request: &(dyn ProtocolRequest + '_),
        _response: Option<&mut (dyn ProtocolResponse + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<DecodedMessage, SamlError> {
        debug!("validating input");
        let content_type = request.content_type().unwrap_or("");
        let acceptable = content_type.starts_with("text/xml")
            || (self.binding == consts::SAML20_BINDING_PAOS
                && content_type.starts_with("application/vnd.paos+xml"));
        if !acceptable {
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
            [message] => message.clone(),
            _ => {
                return Err(SamlError::Binding(
                    "SOAP Envelope did not contain a single SAML message".to_string(),
                ))
            }
        };

        // Layer 1: the envelope.
        policy.evaluate(&envelope_message, Some(request)).await?;
        policy.reset(true);

        // Layer 2: the inner message.
        extract_message_details(&inner, consts::SAML20P_PROTOCOL_ENUM, policy).await?;
        policy.evaluate(&inner, Some(request)).await?;

        Ok(DecodedMessage {
            message: inner,
            relay_state: None,
        })
    }
}
