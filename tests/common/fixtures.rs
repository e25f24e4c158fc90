//! Test fixtures: keys, metadata documents and protocol messages

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;

use saml_core::model::consts;
use saml_core::security::KeyPair;

pub const IDP_ENTITY_ID: &str = "https://idp.example.org/shibboleth";
pub const SP_ENTITY_ID: &str = "https://sp.example.org/shibboleth";
pub const ACS_URL: &str = "https://sp.example.org/Shibboleth.sso/SAML2/POST";

/// IdP signing key, shared across tests (RSA generation is slow).
pub static IDP_KEY: Lazy<Arc<KeyPair>> = Lazy::new(|| {
    let mut rng = rand::thread_rng();
    Arc::new(KeyPair::new(RsaPrivateKey::new(&mut rng, 2048).unwrap()).with_key_name("idp-signing"))
});

/// SP encryption key.
pub static SP_KEY: Lazy<Arc<KeyPair>> = Lazy::new(|| {
    let mut rng = rand::thread_rng();
    Arc::new(KeyPair::new(RsaPrivateKey::new(&mut rng, 2048).unwrap()).with_key_name("sp-encryption"))
});

/// An unrelated key that must never verify anything.
pub static ROGUE_KEY: Lazy<Arc<KeyPair>> = Lazy::new(|| {
    let mut rng = rand::thread_rng();
    Arc::new(KeyPair::new(RsaPrivateKey::new(&mut rng, 2048).unwrap()))
});

pub fn spki_b64(key: &KeyPair) -> String {
    BASE64.encode(key.public_key().to_public_key_der().unwrap().as_bytes())
}

/// IdP entity descriptor XML advertising the signing key and both SAML
/// protocol generations.
pub fn idp_metadata_xml() -> String {
    format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol urn:oasis:names:tc:SAML:1.1:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:KeyName>idp-signing</ds:KeyName>
        <ds:DEREncodedKeyValue>{key}</ds:DEREncodedKeyValue>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.org/sso"/>
    <md:ArtifactResolutionService Binding="urn:oasis:names:tc:SAML:2.0:bindings:SOAP" Location="https://idp.example.org/artifact" index="0"/>
  </md:IDPSSODescriptor>
  <md:ContactPerson contactType="support">
    <md:GivenName>Federation</md:GivenName>
    <md:SurName>Support</md:SurName>
    <md:EmailAddress>support@example.org</md:EmailAddress>
  </md:ContactPerson>
</md:EntityDescriptor>"#,
        entity = IDP_ENTITY_ID,
        key = spki_b64(&IDP_KEY),
    )
}

/// A federation aggregate with the IdP inside a named group.
pub fn federation_metadata_xml() -> String {
    format!(
        r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" Name="urn:example:federation">
{}
</md:EntitiesDescriptor>"#,
        idp_metadata_xml()
    )
}

/// Unsigned SAML 2.0 response with a bearer assertion addressed to the SP.
pub fn saml2_response_xml(response_id: &str, in_response_to: Option<&str>) -> String {
    let now = Utc::now();
    let irt = in_response_to
        .map(|id| format!(" InResponseTo=\"{}\"", id))
        .unwrap_or_default();
    format!(
        r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}"{irt} Version="2.0" IssueInstant="{instant}" Destination="{acs}"><saml:Issuer>{idp}</saml:Issuer><samlp:Status><samlp:StatusCode Value="{success}"/></samlp:Status><saml:Assertion ID="{id}a" Version="2.0" IssueInstant="{instant}"><saml:Issuer>{idp}</saml:Issuer><saml:Subject><saml:NameID Format="{email}">user@example.org</saml:NameID><saml:SubjectConfirmation Method="{bearer}"><saml:SubjectConfirmationData Recipient="{acs}"{irt} NotOnOrAfter="{not_after}"/></saml:SubjectConfirmation></saml:Subject><saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_after}"><saml:AudienceRestriction><saml:Audience>{sp}</saml:Audience></saml:AudienceRestriction></saml:Conditions><saml:AuthnStatement AuthnInstant="{instant}" SessionIndex="_s1"/></saml:Assertion></samlp:Response>"#,
        id = response_id,
        irt = irt,
        instant = now.format("%Y-%m-%dT%H:%M:%SZ"),
        not_before = (now - Duration::minutes(5)).format("%Y-%m-%dT%H:%M:%SZ"),
        not_after = (now + Duration::minutes(5)).format("%Y-%m-%dT%H:%M:%SZ"),
        acs = ACS_URL,
        idp = IDP_ENTITY_ID,
        sp = SP_ENTITY_ID,
        email = consts::NAMEID_FORMAT_EMAIL,
        bearer = consts::CONFIRMATION_BEARER,
        success = consts::STATUS_SUCCESS,
    )
}

/// Sign a serialized message with the IdP key and splice the ds:Signature
/// element in before the closing root tag.
pub fn sign_message_xml(xml: &str, id: &str, key: &KeyPair) -> String {
    let signature = saml_core::signature::sign_content(
        xml.as_bytes(),
        Some(id),
        key,
        consts::SIG_RSA_SHA256,
        saml_core::signature::ContentReference::for_object(Some(id)),
    )
    .unwrap();
    let rendered = saml_core::signature::write_signature_xml(&signature);

    let close = xml.rfind("</samlp:Response>").unwrap();
    format!("{}{}{}", &xml[..close], rendered, &xml[close..])
}

/// Write content to a unique temp file, returning its path.
pub fn temp_file(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "saml-core-it-{}-{}",
        uuid::Uuid::new_v4().simple(),
        name
    ));
    std::fs::write(&path, content).unwrap();
    path
}
