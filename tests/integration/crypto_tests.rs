//! Signature and encryption round-trip laws

use saml_core::encryption::{self, Recipient};
use saml_core::model::consts;
use saml_core::model::metadata::KeyUse;
use saml_core::model::saml::SamlMessage;
use saml_core::security::{Credential, ExplicitKeyTrustEngine, KeyPair, SignatureTrustEngine};
use saml_core::signature::{sign_content, ContentReference};

use crate::common::*;

fn encryption_credential(key: &KeyPair, entity_id: &str) -> Credential {
    Credential {
        entity_id: Some(entity_id.to_string()),
        usage: Some(KeyUse::Encryption),
        key_names: key.key_names.clone(),
        public_key: Some(key.public_key()),
        certificates: Vec::new(),
        algorithms: Vec::new(),
    }
}

#[test]
fn signature_round_trip_law() {
    // Sign, serialize, re-parse, verify with the same credential; a
    // different credential must fail.
    let xml = saml2_response_xml("_law1", None);
    let signed = sign_message_xml(&xml, "_law1", &IDP_KEY);

    let message = saml_core::xml::message::read_message(signed.as_bytes()).unwrap();
    let signature = message.signature().expect("signature parsed");

    let engine = ExplicitKeyTrustEngine::new();
    let good = Credential {
        entity_id: Some(IDP_ENTITY_ID.to_string()),
        usage: None,
        key_names: vec![],
        public_key: Some(IDP_KEY.public_key()),
        certificates: Vec::new(),
        algorithms: Vec::new(),
    };
    assert!(engine
        .validate_signature(signature, message.signable_id(), &[good])
        .unwrap());

    let wrong = Credential {
        entity_id: None,
        usage: None,
        key_names: vec![],
        public_key: Some(ROGUE_KEY.public_key()),
        certificates: Vec::new(),
        algorithms: Vec::new(),
    };
    assert!(!engine
        .validate_signature(signature, message.signable_id(), &[wrong])
        .unwrap());
}

#[test]
fn signature_profile_rejects_foreign_reference() {
    let mut reference = ContentReference::for_object(Some("_whatever"));
    reference.set_digest_algorithm(consts::DIGEST_SHA256);
    let signature = sign_content(
        b"<x ID=\"_whatever\"/>",
        Some("_whatever"),
        &IDP_KEY,
        consts::SIG_RSA_SHA256,
        reference,
    )
    .unwrap();

    // Presenting the signature against an object with another identifier
    // violates the SAML profile.
    let engine = ExplicitKeyTrustEngine::new();
    let cred = Credential {
        entity_id: None,
        usage: None,
        key_names: vec![],
        public_key: Some(IDP_KEY.public_key()),
        certificates: Vec::new(),
        algorithms: Vec::new(),
    };
    assert!(engine
        .validate_signature(&signature, Some("_other"), &[cred])
        .is_err());
}

#[test]
fn multi_recipient_encryption_law() {
    // An assertion encrypted for N recipients decrypts with any of their
    // private keys, back to the original element.
    let plaintext = saml2_response_xml("_enc1", None);
    let assertion_xml = {
        let start = plaintext.find("<saml:Assertion").unwrap();
        let end = plaintext.find("</saml:Assertion>").unwrap() + "</saml:Assertion>".len();
        // Assertions travel with the namespace declared on the response;
        // re-declare it for the standalone fragment.
        plaintext[start..end].replacen(
            "<saml:Assertion ",
            "<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
            1,
        )
    };

    let recipients = vec![
        Recipient {
            entity_id: "https://sp1.example.org".to_string(),
            credentials: vec![encryption_credential(&SP_KEY, "https://sp1.example.org")],
        },
        Recipient {
            entity_id: "https://sp2.example.org".to_string(),
            credentials: vec![encryption_credential(&IDP_KEY, "https://sp2.example.org")],
        },
    ];

    let element = encryption::encrypt_multi(assertion_xml.as_bytes(), &recipients, None).unwrap();
    assert_eq!(element.encrypted_keys.len(), 2);

    // Carried key name links every key to the data.
    let carried = element.encrypted_data.as_ref().unwrap().key_info.as_ref().unwrap().key_names[0]
        .clone();
    for key in &element.encrypted_keys {
        assert_eq!(key.carried_key_name.as_deref(), Some(carried.as_str()));
    }
    assert_eq!(encryption::resolve_encrypted_keys(&element).len(), 2);

    for key in [&*SP_KEY, &*IDP_KEY] {
        let message = encryption::decrypt_to_message(&element, key, None).unwrap();
        let SamlMessage::Assertion(assertion) = message else {
            panic!("expected an assertion");
        };
        assert_eq!(assertion.id, "_enc1a");
        assert_eq!(
            assertion.issuer.as_ref().map(|i| i.name.as_str()),
            Some(IDP_ENTITY_ID)
        );
    }

    // A key outside the recipient set fails.
    assert!(encryption::decrypt(&element, &ROGUE_KEY, None).is_err());
}

#[test]
fn single_recipient_defaults_to_aes256() {
    let element = encryption::encrypt_single(
        b"<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ID=\"_x\" Version=\"2.0\" IssueInstant=\"2026-08-01T00:00:00Z\"/>",
        &[encryption_credential(&SP_KEY, SP_ENTITY_ID)],
        None,
    )
    .unwrap();

    let data = element.encrypted_data.as_ref().unwrap();
    assert_eq!(data.algorithm, consts::ENC_AES256_CBC);
    assert_eq!(element.encrypted_keys.len(), 1);
    assert_eq!(
        element.encrypted_keys[0].algorithm,
        consts::ENC_RSA_OAEP_MGF1P
    );

    let message = encryption::decrypt_to_message(&element, &SP_KEY, None).unwrap();
    assert_eq!(message.id(), Some("_x"));
}

#[test]
fn encryption_method_preference_is_honored() {
    let mut cred = encryption_credential(&SP_KEY, SP_ENTITY_ID);
    cred.algorithms = vec![
        consts::ENC_AES128_CBC.to_string(),
        consts::ENC_RSA_1_5.to_string(),
    ];

    let element = encryption::encrypt_single(b"<a/>", &[cred], None).unwrap();
    assert_eq!(
        element.encrypted_data.as_ref().unwrap().algorithm,
        consts::ENC_AES128_CBC
    );
    assert_eq!(element.encrypted_keys[0].algorithm, consts::ENC_RSA_1_5);
}
