//! XML-DSig and XML-Enc beans
//!
//! The core never canonicalizes XML itself; the DOM layer that produced a
//! `Signature` is responsible for supplying the canonicalized SignedInfo
//! octets the signature value covers. Everything else about the SAML
//! signature and encryption profiles is modeled here.

use crate::model::consts;

/// Key material reference carried inside signatures, encrypted elements and
/// metadata KeyDescriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInfo {
    pub key_names: Vec<String>,
    /// DER-encoded X.509 certificates, passed through opaquely.
    pub x509_certificates: Vec<Vec<u8>>,
    /// DER-encoded SubjectPublicKeyInfo blobs usable directly as keys.
    pub public_keys: Vec<Vec<u8>>,
}

impl KeyInfo {
    pub fn with_key_name(name: impl Into<String>) -> Self {
        Self {
            key_names: vec![name.into()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_names.is_empty() && self.x509_certificates.is_empty() && self.public_keys.is_empty()
    }
}

/// A single ds:Reference within a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureReference {
    /// Reference URI; empty or None for a whole-document reference,
    /// otherwise "#" + the signed object's identifier.
    pub uri: Option<String>,
    pub transforms: Vec<String>,
    pub digest_algorithm: String,
    pub digest_value: Vec<u8>,
}

impl SignatureReference {
    /// The identifier a fragment reference points at, without the "#".
    pub fn fragment(&self) -> Option<&str> {
        self.uri.as_deref().and_then(|u| u.strip_prefix('#'))
    }

    pub fn is_whole_document(&self) -> bool {
        self.uri.as_deref().map_or(true, |u| u.is_empty())
    }
}

/// Enveloped XML signature bean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub algorithm: String,
    pub canonicalization_method: String,
    pub references: Vec<SignatureReference>,
    /// Inclusive namespace prefixes pinned on the canonicalization transform.
    pub inclusive_prefixes: Vec<String>,
    pub key_info: Option<KeyInfo>,
    pub signature_value: Vec<u8>,
    /// Canonicalized SignedInfo octets, as produced by the DOM layer. The
    /// signature value is computed over exactly these bytes.
    pub signed_info: Vec<u8>,
}

/// xenc:EncryptedData bean. The ciphertext is IV-prefixed per XML-Enc.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedData {
    pub id: Option<String>,
    pub algorithm: String,
    pub key_info: Option<KeyInfo>,
    pub ciphertext: Vec<u8>,
}

/// xenc:EncryptedKey bean wrapping a data-encryption key for one recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedKey {
    pub id: Option<String>,
    pub algorithm: String,
    pub recipient: Option<String>,
    pub key_info: Option<KeyInfo>,
    pub ciphertext: Vec<u8>,
    pub carried_key_name: Option<String>,
    /// DataReference URIs back at the EncryptedData this key unlocks.
    pub data_references: Vec<String>,
}

/// An EncryptedElementType: EncryptedData plus zero or more EncryptedKeys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedElement {
    pub encrypted_data: Option<EncryptedData>,
    pub encrypted_keys: Vec<EncryptedKey>,
}

/// Digest algorithm fallback order: SHA-256 when the crypto layer offers
/// SHA-2, SHA-1 otherwise. The Rust crypto stack always has SHA-2.
pub fn default_digest_algorithm() -> &'static str {
    consts::DIGEST_SHA256
}

/// Data encryption algorithm fallback order mirrors the digest rule.
pub fn default_data_encryption_algorithm() -> &'static str {
    consts::ENC_AES256_CBC
}
