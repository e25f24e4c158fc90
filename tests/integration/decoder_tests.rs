//! Binding decoder tests against live metadata and signatures

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use saml_core::binding::saml2::{Saml2ArtifactDecoder, Saml2PostDecoder, Saml2RedirectDecoder};
use saml_core::binding::{artifact, HttpRequest, MessageDecoder, SamlArtifact};
use saml_core::metadata::{MetadataProvider, XmlProvider, XmlProviderConfig};
use saml_core::model::consts;
use saml_core::model::metadata::RoleType;
use saml_core::model::saml::SamlMessage;
use saml_core::policy::rules::{SigningRuleConfig, XmlSigningRule};
use saml_core::policy::SecurityPolicy;
use saml_core::security::ExplicitKeyTrustEngine;
use saml_core::InMemoryReplayCache;

use crate::common::*;

async fn idp_provider() -> (Arc<dyn MetadataProvider>, std::path::PathBuf) {
    let path = temp_file("idp-metadata.xml", &idp_metadata_xml());
    let provider = Arc::new(
        XmlProvider::new(XmlProviderConfig::for_source(
            path.to_string_lossy().to_string(),
        ))
        .unwrap(),
    );
    provider.initialize().await.unwrap();
    (provider, path)
}

fn policy_for(provider: Arc<dyn MetadataProvider>) -> SecurityPolicy {
    let mut policy = SecurityPolicy::new(
        Some(provider),
        Some(RoleType::IdpSso),
        Some(Arc::new(ExplicitKeyTrustEngine::new())),
        false,
    );
    policy.set_replay_cache(Arc::new(InMemoryReplayCache::new()));
    policy
}

#[tokio::test]
async fn post_decode_resolves_issuer_role_from_metadata() {
    let (provider, path) = idp_provider().await;
    let xml = saml2_response_xml("_post1", None);

    let request = HttpRequest::builder()
        .method("POST")
        .url(ACS_URL)
        .form("SAMLResponse", &BASE64.encode(&xml))
        .form("RelayState", "app-state")
        .build();

    let mut policy = policy_for(provider);
    let decoded = Saml2PostDecoder::new()
        .decode(&request, None, &mut policy)
        .await
        .unwrap();

    assert_eq!(decoded.relay_state.as_deref(), Some("app-state"));
    assert_eq!(policy.issuer().map(|i| i.name.as_str()), Some(IDP_ENTITY_ID));
    let role = policy.issuer_metadata().expect("role resolved from metadata");
    assert!(role.role().is(&RoleType::IdpSso));

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn signed_post_response_authenticates_via_xml_signing_rule() {
    let (provider, path) = idp_provider().await;

    let xml = saml2_response_xml("_signed1", None);
    let signed = sign_message_xml(&xml, "_signed1", &IDP_KEY);

    let request = HttpRequest::builder()
        .method("POST")
        .url(ACS_URL)
        .form("SAMLResponse", &BASE64.encode(&signed))
        .build();

    let mut policy = policy_for(provider);
    policy.add_rule(Box::new(XmlSigningRule::new(SigningRuleConfig {
        error_fatal: true,
    })));

    Saml2PostDecoder::new()
        .decode(&request, None, &mut policy)
        .await
        .unwrap();
    assert!(policy.is_authenticated());

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn signature_round_trip_fails_with_wrong_credential() {
    let (provider, path) = idp_provider().await;

    // Signed by a key the metadata does not advertise.
    let xml = saml2_response_xml("_rogue1", None);
    let signed = sign_message_xml(&xml, "_rogue1", &ROGUE_KEY);

    let request = HttpRequest::builder()
        .method("POST")
        .url(ACS_URL)
        .form("SAMLResponse", &BASE64.encode(&signed))
        .build();

    let mut policy = policy_for(provider);
    policy.add_rule(Box::new(XmlSigningRule::new(SigningRuleConfig {
        error_fatal: true,
    })));

    assert!(Saml2PostDecoder::new()
        .decode(&request, None, &mut policy)
        .await
        .is_err());

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn redirect_decode_end_to_end() {
    use std::io::Write;

    let (provider, path) = idp_provider().await;
    let xml = saml2_response_xml("_redirect1", None);

    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = BASE64.encode(encoder.finish().unwrap());

    let request = HttpRequest::builder()
        .method("GET")
        .url(ACS_URL)
        .query(&format!(
            "SAMLResponse={}&RelayState=rs1",
            urlencoding::encode(&compressed)
        ))
        .build();

    let mut policy = policy_for(provider);
    let decoded = Saml2RedirectDecoder::default()
        .decode(&request, None, &mut policy)
        .await
        .unwrap();
    assert!(matches!(decoded.message, SamlMessage::Response(_)));
    assert_eq!(policy.message_id(), Some("_redirect1"));

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn artifact_decode_dereferences_and_replays_are_rejected() {
    let (provider, path) = idp_provider().await;

    let inner_xml = saml2_response_xml("_deref1", None);
    let inner = saml_core::xml::message::read_message(inner_xml.as_bytes()).unwrap();
    let resolver = Arc::new(MockArtifactResolver::with_saml2(inner));
    let decoder = Saml2ArtifactDecoder::new(resolver);

    // SourceID in a type 0x0004 artifact is SHA1(entityID).
    let mut source_id = [0u8; 20];
    source_id.copy_from_slice(&hex::decode(saml_core::metadata::store::sha1_hex(IDP_ENTITY_ID)).unwrap());
    let saml_artifact = artifact::build_saml2_artifact(0, &source_id, &[0x42; 20]);

    let request = HttpRequest::builder()
        .method("GET")
        .url("https://sp.example.org/Shibboleth.sso/SAML2/Artifact")
        .query(&format!(
            "SAMLart={}&RelayState=rs",
            urlencoding::encode(&saml_artifact.encode())
        ))
        .build();

    let cache: Arc<InMemoryReplayCache> = Arc::new(InMemoryReplayCache::new());
    let mut policy = policy_for(provider.clone());
    policy.set_replay_cache(cache.clone());

    let decoded = decoder.decode(&request, None, &mut policy).await.unwrap();
    assert!(matches!(decoded.message, SamlMessage::Response(_)));
    assert_eq!(policy.issuer().map(|i| i.name.as_str()), Some(IDP_ENTITY_ID));

    // The raw artifact replays.
    let mut policy = policy_for(provider);
    policy.set_replay_cache(cache);
    let err = decoder.decode(&request, None, &mut policy).await.unwrap_err();
    assert!(err.to_string().contains("replayed artifact"));

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn artifact_round_trip_bytewise() {
    let source: Vec<u8> = (0u8..20).collect();
    let handle: Vec<u8> = (100u8..120).collect();
    let built = artifact::build_saml2_artifact(3, &source.try_into().unwrap(), &handle.try_into().unwrap());
    let parsed = SamlArtifact::parse(&built.encode()).unwrap();
    assert_eq!(parsed.raw(), built.raw());
    assert_eq!(parsed.encode(), built.encode());
}

#[tokio::test]
async fn simple_sign_blob_matches_spec_shape() {
    let query = "SAMLResponse=X&RelayState=Y&SigAlg=Z&Signature=S";
    assert_eq!(
        saml_core::signature::blob::redirect_blob(query),
        "SAMLResponse=X&RelayState=Y&SigAlg=Z"
    );
}

#[tokio::test]
async fn identifier_generation_shape() {
    let id = saml_core::SamlConfig::generate_identifier();
    assert_eq!(id.len(), 33);
    assert!(id.starts_with('_'));
    assert!(id[1..].chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
}

#[tokio::test]
async fn unknown_artifact_type_yields_artifact_error() {
    let raw = BASE64.encode([0x00u8, 0x03, 0x01, 0x02]);
    let err = SamlArtifact::parse(&raw).unwrap_err();
    assert!(matches!(err, saml_core::SamlError::Artifact(_)));
}

#[tokio::test]
async fn type_dispatch_inspects_leading_bytes() {
    let a1 = artifact::build_saml1_artifact(&[0u8; 20], &[1u8; 20]);
    assert_eq!(&a1.encode()[..4], "AAEA");
    assert!(matches!(
        SamlArtifact::parse(&a1.encode()).unwrap(),
        SamlArtifact::Saml1(_)
    ));

    let a2 = artifact::build_saml2_artifact(0, &[0u8; 20], &[1u8; 20]);
    assert_eq!(&a2.encode()[..4], "AAQA");
    assert!(matches!(
        SamlArtifact::parse(&a2.encode()).unwrap(),
        SamlArtifact::Saml2(_)
    ));
}

#[tokio::test]
async fn saml2_consts_spot_checks() {
    assert_eq!(consts::SAML20P_NS, "urn:oasis:names:tc:SAML:2.0:protocol");
    assert_eq!(
        consts::SAML20_BINDING_PAOS,
        "urn:oasis:names:tc:SAML:2.0:bindings:PAOS"
    );
}
