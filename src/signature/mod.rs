//! Signing and verification of SAML objects
//!
//! The signing path builds the SAML-profile reference, composes the
//! SignedInfo octets and computes the RSA signature value. Canonicalization
//! of foreign documents stays out of scope; SignedInfo emitted here is
//! already in canonical form, and parsed signatures carry the serialized
//! SignedInfo bytes for verification.

pub mod blob;
pub mod content_reference;
pub mod profile;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::SamlError;
use crate::model::consts;
use crate::model::xmlsec::{KeyInfo, Signature, SignatureReference};
use crate::security::{sign_bytes, KeyPair};

pub use content_reference::{non_visibly_used_prefixes, ContentReference};
pub use profile::validate_signature_profile;

/// Sign a SAML object's canonical content bytes, producing a complete
/// signature bean with the profile reference shape.
pub fn sign_content(
    content: &[u8],
    signable_id: Option<&str>,
    key_pair: &KeyPair,
    algorithm: &str,
    reference: ContentReference,
) -> Result<Signature, SamlError> {
    let digest_value = digest(&reference.digest_algorithm, content)?;

    let sig_reference = SignatureReference {
        uri: reference.uri.clone().or_else(|| signable_id.map(|i| format!("#{}", i))),
        transforms: reference.transforms.clone(),
        digest_algorithm: reference.digest_algorithm.clone(),
        digest_value,
    };

    let signed_info = write_signed_info(
        &reference.canonicalization_method,
        algorithm,
        &sig_reference,
        &reference.inclusive_prefix_list(),
    );

    let signature_value = sign_bytes(key_pair, algorithm, signed_info.as_bytes())?;

    Ok(Signature {
        algorithm: algorithm.to_string(),
        canonicalization_method: reference.canonicalization_method.clone(),
        references: vec![sig_reference],
        inclusive_prefixes: reference.inclusive_prefixes(),
        key_info: if key_pair.key_names.is_empty() {
            None
        } else {
            Some(KeyInfo {
                key_names: key_pair.key_names.clone(),
                ..Default::default()
            })
        },
        signature_value,
        signed_info: signed_info.into_bytes(),
    })
}

/// Check the reference digest against the object's canonical content bytes.
pub fn verify_reference_digest(signature: &Signature, content: &[u8]) -> Result<(), SamlError> {
    let reference = signature
        .references
        .first()
        .ok_or_else(|| SamlError::SecurityPolicy("signature has no reference".to_string()))?;
    let computed = digest(&reference.digest_algorithm, content)?;
    if computed != reference.digest_value {
        return Err(SamlError::SecurityPolicy(
            "reference digest mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Serialize a complete ds:Signature element for embedding into a document.
pub fn write_signature_xml(signature: &Signature) -> String {
    let mut out = String::new();
    out.push_str("<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    out.push_str(std::str::from_utf8(&signature.signed_info).unwrap_or(""));
    out.push_str("<ds:SignatureValue>");
    out.push_str(&BASE64.encode(&signature.signature_value));
    out.push_str("</ds:SignatureValue>");
    if let Some(ref key_info) = signature.key_info {
        out.push_str("<ds:KeyInfo>");
        for name in &key_info.key_names {
            out.push_str("<ds:KeyName>");
            out.push_str(name);
            out.push_str("</ds:KeyName>");
        }
        for der in &key_info.public_keys {
            out.push_str("<ds:DEREncodedKeyValue>");
            out.push_str(&BASE64.encode(der));
            out.push_str("</ds:DEREncodedKeyValue>");
        }
        out.push_str("</ds:KeyInfo>");
    }
    out.push_str("</ds:Signature>");
    out
}

fn write_signed_info(
    c14n_method: &str,
    signature_algorithm: &str,
    reference: &SignatureReference,
    inclusive_prefixes: &str,
) -> String {
    let mut out = String::new();
    out.push_str("<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    out.push_str(&format!(
        "<ds:CanonicalizationMethod Algorithm=\"{}\"/>",
        c14n_method
    ));
    out.push_str(&format!(
        "<ds:SignatureMethod Algorithm=\"{}\"/>",
        signature_algorithm
    ));
    match reference.uri.as_deref() {
        Some(uri) => out.push_str(&format!("<ds:Reference URI=\"{}\">", uri)),
        None => out.push_str("<ds:Reference URI=\"\">"),
    }
    out.push_str("<ds:Transforms>");
    for transform in &reference.transforms {
        if transform == consts::TRANSFORM_C14N_EXCL && !inclusive_prefixes.is_empty() {
            out.push_str(&format!("<ds:Transform Algorithm=\"{}\">", transform));
            out.push_str(&format!(
                "<ec:InclusiveNamespaces xmlns:ec=\"{}\" PrefixList=\"{}\"/>",
                consts::TRANSFORM_C14N_EXCL, inclusive_prefixes
            ));
            out.push_str("</ds:Transform>");
        } else {
            out.push_str(&format!("<ds:Transform Algorithm=\"{}\"/>", transform));
        }
    }
    out.push_str("</ds:Transforms>");
    out.push_str(&format!(
        "<ds:DigestMethod Algorithm=\"{}\"/>",
        reference.digest_algorithm
    ));
    out.push_str("<ds:DigestValue>");
    out.push_str(&BASE64.encode(&reference.digest_value));
    out.push_str("</ds:DigestValue>");
    out.push_str("</ds:Reference>");
    out.push_str("</ds:SignedInfo>");
    out
}

fn digest(algorithm: &str, content: &[u8]) -> Result<Vec<u8>, SamlError> {
    match algorithm {
        consts::DIGEST_SHA256 => Ok(Sha256::digest(content).to_vec()),
        consts::DIGEST_SHA1 => Ok(Sha1::digest(content).to_vec()),
        other => Err(SamlError::SecurityPolicy(format!(
            "unsupported digest algorithm ({})",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::test_keys::{credential_for, KEY_A, KEY_B};
    use crate::security::{ExplicitKeyTrustEngine, SignatureTrustEngine};
    use crate::xml::message::read_message;

    const ASSERTION: &str = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_sig1" IssueInstant="2026-08-01T12:00:00Z" Version="2.0"><saml:Issuer>https://idp.example.org</saml:Issuer></saml:Assertion>"#;

    #[test]
    fn test_sign_and_verify_round_trip() {
        let reference = ContentReference::for_object(Some("_sig1"));
        let signature = sign_content(
            ASSERTION.as_bytes(),
            Some("_sig1"),
            &KEY_A,
            consts::SIG_RSA_SHA256,
            reference,
        )
        .unwrap();

        // Serialize, splice the signature in, and parse back.
        let signed_xml = ASSERTION.replace(
            "</saml:Assertion>",
            &format!("{}</saml:Assertion>", write_signature_xml(&signature)),
        );
        let message = read_message(signed_xml.as_bytes()).unwrap();
        let parsed = message.signature().expect("signature survived round trip");

        assert_eq!(parsed.algorithm, consts::SIG_RSA_SHA256);
        assert_eq!(parsed.signature_value, signature.signature_value);
        assert_eq!(parsed.signed_info, signature.signed_info);

        let engine = ExplicitKeyTrustEngine::new();
        let good = credential_for(&KEY_A, "https://idp.example.org");
        assert!(engine
            .validate_signature(parsed, message.signable_id(), &[good])
            .unwrap());

        // A different credential fails.
        let bad = credential_for(&KEY_B, "https://other.example.org");
        assert!(!engine
            .validate_signature(parsed, message.signable_id(), &[bad])
            .unwrap());
    }

    #[test]
    fn test_reference_digest_round_trip() {
        let signature = sign_content(
            ASSERTION.as_bytes(),
            Some("_sig1"),
            &KEY_A,
            consts::SIG_RSA_SHA256,
            ContentReference::for_object(Some("_sig1")),
        )
        .unwrap();

        assert!(verify_reference_digest(&signature, ASSERTION.as_bytes()).is_ok());
        assert!(verify_reference_digest(&signature, b"tampered").is_err());
    }

    #[test]
    fn test_inclusive_prefixes_serialized() {
        let mut reference = ContentReference::for_object(Some("_sig1"));
        reference.add_inclusive_prefix("xs");
        reference.add_inclusive_prefix("");
        let signature = sign_content(
            ASSERTION.as_bytes(),
            Some("_sig1"),
            &KEY_A,
            consts::SIG_RSA_SHA256,
            reference,
        )
        .unwrap();

        let signed_info = String::from_utf8(signature.signed_info.clone()).unwrap();
        assert!(signed_info.contains("PrefixList=\"#default xs\""));
        assert_eq!(
            signature.inclusive_prefixes,
            vec!["#default".to_string(), "xs".to_string()]
        );
    }
}
