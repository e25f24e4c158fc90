//! Credentials and trust evaluation
//!
//! Peer credentials are extracted lazily from metadata KeyDescriptors; local
//! credentials (private keys) come from a resolver supplied by the embedding
//! application. The explicit-key trust engine accepts a signature when any
//! metadata credential for the peer role verifies it.

use std::sync::Arc;

use rsa::pkcs8::DecodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::SamlError;
use crate::model::consts;
use crate::model::metadata::{KeyDescriptor, KeyUse, RoleRef};
use crate::model::xmlsec::Signature;
use crate::signature::profile::validate_signature_profile;

/// A resolved peer credential: public key material plus the metadata context
/// it came from.
#[derive(Debug, Clone)]
pub struct Credential {
    pub entity_id: Option<String>,
    pub usage: Option<KeyUse>,
    pub key_names: Vec<String>,
    pub public_key: Option<RsaPublicKey>,
    /// DER certificates carried alongside, passed through opaquely.
    pub certificates: Vec<Vec<u8>>,
    /// Algorithm preferences from the surrounding EncryptionMethod elements.
    pub algorithms: Vec<String>,
}

impl Credential {
    /// Build a credential from a metadata KeyDescriptor's KeyInfo.
    pub fn from_key_descriptor(entity_id: &str, key: &KeyDescriptor) -> Option<Credential> {
        let info = key.key_info.as_ref()?;
        if info.is_empty() {
            return None;
        }
        let public_key = info
            .public_keys
            .iter()
            .find_map(|der| RsaPublicKey::from_public_key_der(der).ok());
        Some(Credential {
            entity_id: Some(entity_id.to_string()),
            usage: key.key_use,
            key_names: info.key_names.clone(),
            public_key,
            certificates: info.x509_certificates.clone(),
            algorithms: key
                .encryption_methods
                .iter()
                .map(|m| m.algorithm.clone())
                .collect(),
        })
    }

    pub fn has_key_name(&self, name: &str) -> bool {
        self.key_names.iter().any(|n| n == name)
    }
}

/// Criteria for selecting credentials out of a metadata role.
#[derive(Debug, Clone)]
pub struct MetadataCredentialCriteria {
    pub role: RoleRef,
    pub usage: Option<KeyUse>,
    /// XML signature/encryption algorithm the credential must be usable with.
    pub algorithm: Option<String>,
    pub key_name: Option<String>,
}

impl MetadataCredentialCriteria {
    pub fn new(role: RoleRef) -> Self {
        Self {
            role,
            usage: None,
            algorithm: None,
            key_name: None,
        }
    }

    pub fn with_usage(mut self, usage: KeyUse) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn matches(&self, credential: &Credential) -> bool {
        if let Some(usage) = self.usage {
            match credential.usage {
                Some(u) if u != usage => return false,
                _ => {}
            }
        }
        if let Some(ref name) = self.key_name {
            if !credential.key_names.is_empty() && !credential.has_key_name(name) {
                return false;
            }
        }
        true
    }
}

/// Extract every credential advertised by a role for the given use, in
/// document order. This is the key-info iteration the trust engine walks.
pub fn role_credentials(role: &RoleRef, usage: KeyUse) -> Vec<Credential> {
    role.role()
        .keys_for(usage)
        .filter_map(|k| Credential::from_key_descriptor(role.entity_id(), k))
        .map(|mut c| {
            if c.usage.is_none() {
                c.usage = Some(usage);
            }
            c
        })
        .collect()
}

/// A local key pair for signing and decryption.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: RsaPrivateKey,
    pub key_names: Vec<String>,
}

impl KeyPair {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self {
            private_key,
            key_names: Vec::new(),
        }
    }

    pub fn with_key_name(mut self, name: impl Into<String>) -> Self {
        self.key_names.push(name.into());
        self
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }
}

/// Resolver for local credentials, supplied by the embedding application.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, key_name: Option<&str>) -> Vec<Arc<KeyPair>>;
}

/// Fixed set of local keys.
#[derive(Default)]
pub struct StaticCredentialResolver {
    keys: Vec<Arc<KeyPair>>,
}

impl StaticCredentialResolver {
    pub fn new(keys: Vec<Arc<KeyPair>>) -> Self {
        Self { keys }
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, key_name: Option<&str>) -> Vec<Arc<KeyPair>> {
        match key_name {
            Some(name) => self
                .keys
                .iter()
                .filter(|k| k.key_names.is_empty() || k.key_names.iter().any(|n| n == name))
                .cloned()
                .collect(),
            None => self.keys.clone(),
        }
    }
}

/// Trust evaluation over XML signatures and raw signed blobs.
pub trait SignatureTrustEngine: Send + Sync {
    /// Validate an enveloped signature: profile restrictions first, then the
    /// signature value against the candidate credentials.
    fn validate_signature(
        &self,
        signature: &Signature,
        signable_id: Option<&str>,
        credentials: &[Credential],
    ) -> Result<bool, SamlError>;

    /// Validate a detached signature over raw content bytes.
    fn validate_blob(
        &self,
        algorithm: &str,
        signature: &[u8],
        content: &[u8],
        credentials: &[Credential],
    ) -> Result<bool, SamlError>;
}

/// Trust engine that accepts signatures verifiable by a key explicitly
/// present in the peer's metadata.
#[derive(Debug, Default, Clone)]
pub struct ExplicitKeyTrustEngine;

impl ExplicitKeyTrustEngine {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureTrustEngine for ExplicitKeyTrustEngine {
    fn validate_signature(
        &self,
        signature: &Signature,
        signable_id: Option<&str>,
        credentials: &[Credential],
    ) -> Result<bool, SamlError> {
        validate_signature_profile(signature, signable_id)?;

        if signature.signed_info.is_empty() {
            return Err(SamlError::SecurityPolicy(
                "signature carries no SignedInfo to verify".to_string(),
            ));
        }

        for credential in credentials {
            if verify_bytes(
                credential,
                &signature.algorithm,
                &signature.signed_info,
                &signature.signature_value,
            ) {
                debug!(
                    entity_id = credential.entity_id.as_deref().unwrap_or(""),
                    "signature verified with explicit metadata key"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn validate_blob(
        &self,
        algorithm: &str,
        signature: &[u8],
        content: &[u8],
        credentials: &[Credential],
    ) -> Result<bool, SamlError> {
        for credential in credentials {
            if verify_bytes(credential, algorithm, content, signature) {
                debug!(
                    entity_id = credential.entity_id.as_deref().unwrap_or(""),
                    "blob signature verified with explicit metadata key"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// RSA verification dispatched on the XML signature algorithm URI.
pub fn verify_bytes(
    credential: &Credential,
    algorithm: &str,
    content: &[u8],
    signature: &[u8],
) -> bool {
    let Some(ref key) = credential.public_key else {
        return false;
    };
    match algorithm {
        consts::SIG_RSA_SHA256 => {
            let digest = Sha256::digest(content);
            key.verify(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                .is_ok()
        }
        consts::SIG_RSA_SHA1 => {
            let digest = Sha1::digest(content);
            key.verify(rsa::Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
                .is_ok()
        }
        _ => false,
    }
}

/// RSA signing dispatched on the XML signature algorithm URI.
pub fn sign_bytes(
    key_pair: &KeyPair,
    algorithm: &str,
    content: &[u8],
) -> Result<Vec<u8>, SamlError> {
    match algorithm {
        consts::SIG_RSA_SHA256 => {
            let digest = Sha256::digest(content);
            key_pair
                .private_key
                .sign(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest)
                .map_err(|e| SamlError::SecurityPolicy(format!("signing failed: {}", e)))
        }
        consts::SIG_RSA_SHA1 => {
            let digest = Sha1::digest(content);
            key_pair
                .private_key
                .sign(rsa::Pkcs1v15Sign::new::<Sha1>(), &digest)
                .map_err(|e| SamlError::SecurityPolicy(format!("signing failed: {}", e)))
        }
        other => Err(SamlError::SecurityPolicy(format!(
            "unsupported signature algorithm ({})",
            other
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use super::*;
    use once_cell::sync::Lazy;

    /// Deterministic test keys are expensive to generate, so share them.
    pub static KEY_A: Lazy<Arc<KeyPair>> = Lazy::new(|| {
        let mut rng = rand::thread_rng();
        Arc::new(KeyPair::new(RsaPrivateKey::new(&mut rng, 2048).unwrap()).with_key_name("key-a"))
    });

    pub static KEY_B: Lazy<Arc<KeyPair>> = Lazy::new(|| {
        let mut rng = rand::thread_rng();
        Arc::new(KeyPair::new(RsaPrivateKey::new(&mut rng, 2048).unwrap()).with_key_name("key-b"))
    });

    pub fn credential_for(pair: &KeyPair, entity_id: &str) -> Credential {
        Credential {
            entity_id: Some(entity_id.to_string()),
            usage: None,
            key_names: pair.key_names.clone(),
            public_key: Some(pair.public_key()),
            certificates: Vec::new(),
            algorithms: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;

    #[test]
    fn test_blob_sign_verify_round_trip() {
        let content = b"SAMLResponse=abc&RelayState=xyz&SigAlg=alg";
        let signature = sign_bytes(&KEY_A, consts::SIG_RSA_SHA256, content).unwrap();

        let cred = credential_for(&KEY_A, "https://idp.example.org");
        assert!(verify_bytes(&cred, consts::SIG_RSA_SHA256, content, &signature));

        // Wrong credential fails.
        let other = credential_for(&KEY_B, "https://other.example.org");
        assert!(!verify_bytes(&other, consts::SIG_RSA_SHA256, content, &signature));

        // Tampered content fails.
        assert!(!verify_bytes(&cred, consts::SIG_RSA_SHA256, b"tampered", &signature));
    }

    #[test]
    fn test_trust_engine_blob() {
        let engine = ExplicitKeyTrustEngine::new();
        let content = b"signed content";
        let signature = sign_bytes(&KEY_A, consts::SIG_RSA_SHA1, content).unwrap();

        let good = credential_for(&KEY_A, "a");
        let bad = credential_for(&KEY_B, "b");

        // Credentials are attempted in turn until one succeeds.
        assert!(engine
            .validate_blob(consts::SIG_RSA_SHA1, &signature, content, &[bad.clone(), good])
            .unwrap());
        assert!(!engine
            .validate_blob(consts::SIG_RSA_SHA1, &signature, content, &[bad])
            .unwrap());
    }

    #[test]
    fn test_criteria_key_name_match() {
        let role_entity = std::sync::Arc::new(crate::model::metadata::EntityDescriptor {
            entity_id: "https://idp.example.org".to_string(),
            roles: vec![Default::default()],
            ..Default::default()
        });
        let criteria = MetadataCredentialCriteria {
            role: RoleRef::new(role_entity, 0),
            usage: Some(KeyUse::Signing),
            algorithm: None,
            key_name: Some("key-a".to_string()),
        };

        let mut cred = credential_for(&KEY_A, "x");
        assert!(criteria.matches(&cred));

        cred.key_names = vec!["other".to_string()];
        assert!(!criteria.matches(&cred));

        // Encryption-only credential is rejected for signing use.
        cred.key_names.clear();
        cred.usage = Some(KeyUse::Encryption);
        assert!(!criteria.matches(&cred));
    }
}
